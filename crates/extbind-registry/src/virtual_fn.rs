//! Virtual method implementations.
//!
//! A [`VirtualFn`] is the type-erased entry stored in a class's dispatch
//! table. Implementations are either raw closures over a [`CallContext`] or
//! typed closures converted through [`IntoVirtualFn`], whose argument types
//! are fixed at compile time and decoded from the frame in declared order.

use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

use extbind_core::{CallError, FrameValue, IntoVariant, Variant};

use crate::context::CallContext;
use crate::flags::MethodFlags;

/// Trait for callable virtual method implementations.
pub trait VirtualCallable: Send + Sync {
    fn call(&self, ctx: &mut CallContext<'_, '_>) -> Result<Variant, CallError>;
}

impl<F> VirtualCallable for F
where
    F: Fn(&mut CallContext<'_, '_>) -> Result<Variant, CallError> + Send + Sync,
{
    fn call(&self, ctx: &mut CallContext<'_, '_>) -> Result<Variant, CallError> {
        (self)(ctx)
    }
}

/// Type-erased virtual method.
///
/// Clones share the underlying callable.
#[derive(Clone)]
pub struct VirtualFn {
    arity: Option<usize>,
    flags: MethodFlags,
    inner: Arc<dyn VirtualCallable>,
}

impl VirtualFn {
    /// Wrap a raw implementation. With `Some(arity)` the frame's argument
    /// count is checked before the implementation runs.
    pub fn new<F>(arity: Option<usize>, f: F) -> Self
    where
        F: VirtualCallable + 'static,
    {
        Self {
            arity,
            flags: MethodFlags::default(),
            inner: Arc::new(f),
        }
    }

    pub fn with_flags(mut self, flags: MethodFlags) -> Self {
        self.flags = flags;
        self
    }

    pub fn arity(&self) -> Option<usize> {
        self.arity
    }

    pub fn flags(&self) -> MethodFlags {
        self.flags
    }

    #[cfg_attr(feature = "profiling", profiling::function)]
    pub fn call(&self, ctx: &mut CallContext<'_, '_>) -> Result<Variant, CallError> {
        if let Some(arity) = self.arity {
            ctx.expect_args(arity)?;
        }
        self.inner.call(ctx)
    }
}

impl fmt::Debug for VirtualFn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VirtualFn")
            .field("arity", &self.arity)
            .field("flags", &self.flags)
            .finish_non_exhaustive()
    }
}

/// Marker for typed implementations that receive the instance state first.
pub struct WithThis<T>(PhantomData<fn(&mut T)>);

/// Conversion of typed closures into [`VirtualFn`].
///
/// Implemented for `Fn(A0, .., An) -> R` and `Fn(&mut T, A0, .., An) -> R`
/// with up to four [`FrameValue`] arguments and an [`IntoVariant`] result.
///
/// ```ignore
/// builder
///     .method("area", |w: f64, h: f64| w * h)
///     .method("grow", |this: &mut Widget, by: f64| this.size += by);
/// ```
pub trait IntoVirtualFn<Marker> {
    fn into_virtual_fn(self) -> VirtualFn;
}

impl IntoVirtualFn<()> for VirtualFn {
    fn into_virtual_fn(self) -> VirtualFn {
        self
    }
}

macro_rules! impl_into_virtual_fn {
    ($count:literal; $($arg:ident $val:ident $idx:tt),*) => {
        impl<F, R, $($arg,)*> IntoVirtualFn<fn($($arg),*) -> R> for F
        where
            F: Fn($($arg),*) -> R + Send + Sync + 'static,
            R: IntoVariant,
            $($arg: FrameValue,)*
        {
            #[allow(unused_variables)]
            fn into_virtual_fn(self) -> VirtualFn {
                VirtualFn::new(Some($count), move |ctx: &mut CallContext<'_, '_>| {
                    Ok((self)($(ctx.arg::<$arg>($idx)?),*).into_variant())
                })
            }
        }

        impl<F, T, R, $($arg,)*> IntoVirtualFn<(WithThis<T>, fn($($arg),*) -> R)> for F
        where
            F: Fn(&mut T, $($arg),*) -> R + Send + Sync + 'static,
            T: 'static,
            R: IntoVariant,
            $($arg: FrameValue,)*
        {
            fn into_virtual_fn(self) -> VirtualFn {
                VirtualFn::new(Some($count), move |ctx: &mut CallContext<'_, '_>| {
                    $(let $val = ctx.arg::<$arg>($idx)?;)*
                    let this = ctx.this_mut::<T>()?;
                    Ok((self)(this, $($val),*).into_variant())
                })
            }
        }
    };
}

impl_into_virtual_fn!(0;);
impl_into_virtual_fn!(1; A0 a0 0);
impl_into_virtual_fn!(2; A0 a0 0, A1 a1 1);
impl_into_virtual_fn!(3; A0 a0 0, A1 a1 1, A2 a2 2);
impl_into_virtual_fn!(4; A0 a0 0, A1 a1 1, A2 a2 2, A3 a3 3);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::NullLifecycle;
    use extbind_core::{CallErrorKind, Frame, HandleRegistry, StringName};
    use std::any::Any;

    fn call(
        f: &VirtualFn,
        frame: &Frame<'_>,
        this: Option<&mut (dyn Any + Send)>,
    ) -> Result<Variant, CallError> {
        let registry = Arc::new(HandleRegistry::new(Arc::new(NullLifecycle)));
        let mut ctx = CallContext::new(
            frame,
            this,
            StringName::new("Test"),
            StringName::new("m"),
            &registry,
        );
        f.call(&mut ctx)
    }

    #[test]
    fn typed_two_argument_function() {
        let f = (|w: f64, h: f64| w * h).into_virtual_fn();
        assert_eq!(f.arity(), Some(2));

        let mut frame = Frame::new(2);
        frame.put_arg(0, 3.0f64).put_arg(1, 4.0f64);
        assert_eq!(call(&f, &frame, None), Ok(Variant::Float(12.0)));
    }

    #[test]
    fn arity_mismatch_is_a_call_error() {
        let f = (|a: i64| a).into_virtual_fn();
        let frame = Frame::new(2);
        assert_eq!(
            call(&f, &frame, None).unwrap_err().kind,
            CallErrorKind::TooManyArguments
        );
    }

    #[test]
    fn unit_return_is_nil() {
        let f = (|| ()).into_virtual_fn();
        assert_eq!(call(&f, &Frame::new(0), None), Ok(Variant::Nil));
    }

    #[test]
    fn receiver_gets_instance_state() {
        struct Widget {
            size: f64,
        }
        let f = (|this: &mut Widget, by: f64| {
            this.size += by;
            this.size
        })
        .into_virtual_fn();

        let mut state: Box<dyn Any + Send> = Box::new(Widget { size: 1.0 });
        let mut frame = Frame::new(1);
        frame.put_arg(0, 2.5f64);
        assert_eq!(call(&f, &frame, Some(&mut *state)), Ok(Variant::Float(3.5)));
        assert_eq!(state.downcast_ref::<Widget>().map(|w| w.size), Some(3.5));
    }

    #[test]
    fn receiver_without_instance_fails() {
        let f = (|this: &mut u32| *this).into_virtual_fn();
        assert_eq!(
            call(&f, &Frame::new(0), None).unwrap_err().kind,
            CallErrorKind::InstanceIsNull
        );
    }

    #[test]
    fn raw_closure_sees_context() {
        let f = VirtualFn::new(None, |ctx: &mut CallContext<'_, '_>| {
            Ok(Variant::Int(ctx.arg_count() as i64))
        })
        .with_flags(MethodFlags::CONST);
        assert_eq!(call(&f, &Frame::new(3), None), Ok(Variant::Int(3)));
        assert!(f.flags().contains(MethodFlags::CONST));
    }
}
