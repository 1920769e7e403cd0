//! Call context handed to virtual method implementations.

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use extbind_core::{CallError, Frame, FrameValue, HandleRegistry, RawHandle, StrRef, StringName};

/// Context for a host-issued virtual call.
///
/// Bridges the decoded call frame and the extension implementation: typed
/// argument access, the receiving instance's state, and the handle registry
/// for acquiring object arguments.
///
/// ```ignore
/// let w: f64 = ctx.arg(0)?;
/// let widget = ctx.this_mut::<Widget>()?;
/// ```
pub struct CallContext<'call, 'frame> {
    frame: &'call Frame<'frame>,
    this: Option<&'call mut (dyn Any + Send)>,
    class: StringName,
    method: StringName,
    registry: &'call Arc<HandleRegistry>,
}

impl<'call, 'frame> CallContext<'call, 'frame> {
    pub fn new(
        frame: &'call Frame<'frame>,
        this: Option<&'call mut (dyn Any + Send)>,
        class: StringName,
        method: StringName,
        registry: &'call Arc<HandleRegistry>,
    ) -> Self {
        Self {
            frame,
            this,
            class,
            method,
            registry,
        }
    }

    /// Number of arguments in the frame.
    pub fn arg_count(&self) -> usize {
        self.frame.argc()
    }

    /// Fail with an arity error unless the frame has exactly `expected`
    /// arguments.
    pub fn expect_args(&self, expected: usize) -> Result<(), CallError> {
        match self.arg_count() {
            n if n == expected => Ok(()),
            n => Err(CallError::arity(n, expected)),
        }
    }

    /// Decode argument `index`.
    pub fn arg<T: FrameValue>(&self, index: usize) -> Result<T, CallError> {
        if index >= self.arg_count() {
            return Err(CallError::arity(self.arg_count(), index + 1));
        }
        Ok(self.frame.arg(index))
    }

    /// Decode argument `index` as a string.
    ///
    /// # Safety
    ///
    /// The caller must know from the method's signature that the slot holds a
    /// string that is still alive.
    pub unsafe fn str_arg(&self, index: usize) -> Result<StrRef<'frame>, CallError> {
        if index >= self.arg_count() {
            return Err(CallError::arity(self.arg_count(), index + 1));
        }
        // SAFETY: guaranteed by the caller.
        Ok(unsafe { self.frame.str_arg(index) })
    }

    /// Decode an object argument. The handle is borrowed for this call; use
    /// [`registry`](Self::registry) to acquire it if it must be kept.
    pub fn object_arg(&self, index: usize) -> Result<RawHandle, CallError> {
        self.arg::<RawHandle>(index)
    }

    /// The receiving instance's state.
    pub fn this<T: Any>(&self) -> Result<&T, CallError> {
        match self.this.as_deref() {
            Some(state) => state
                .downcast_ref::<T>()
                .ok_or_else(CallError::instance_is_null),
            None => Err(CallError::instance_is_null()),
        }
    }

    /// The receiving instance's state, mutably.
    pub fn this_mut<T: Any>(&mut self) -> Result<&mut T, CallError> {
        match self.this.as_deref_mut() {
            Some(state) => state
                .downcast_mut::<T>()
                .ok_or_else(CallError::instance_is_null),
            None => Err(CallError::instance_is_null()),
        }
    }

    pub fn has_instance(&self) -> bool {
        self.this.is_some()
    }

    /// Class the call was dispatched on (not necessarily the class that
    /// implements the method).
    pub fn class(&self) -> StringName {
        self.class
    }

    pub fn method(&self) -> StringName {
        self.method
    }

    pub fn frame(&self) -> &Frame<'frame> {
        self.frame
    }

    pub fn registry(&self) -> &Arc<HandleRegistry> {
        self.registry
    }
}

impl fmt::Debug for CallContext<'_, '_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallContext")
            .field("class", &self.class)
            .field("method", &self.method)
            .field("argc", &self.frame.argc())
            .field("has_instance", &self.this.is_some())
            .finish()
    }
}
