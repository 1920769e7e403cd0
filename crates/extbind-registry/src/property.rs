//! Properties, signals and per-instance hooks.
//!
//! A [`PropertyBinding`] exposes a field of the instance state to the host
//! as a named, typed value. Reads and writes go through [`Variant`]: the
//! getter packs the field, the setter unpacks the incoming value and reports
//! a mismatched type as an invalid argument. A [`SignalBinding`] only
//! describes a signal; emitting it is a host call like any other.

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use extbind_core::{CallError, FromVariant, IntoVariant, StringName, Variant, VariantType};

use crate::flags::PropertyUsage;

type Getter = Arc<dyn Fn(&(dyn Any + Send)) -> Result<Variant, CallError> + Send + Sync>;
type Setter = Arc<dyn Fn(&mut (dyn Any + Send), &Variant) -> Result<(), CallError> + Send + Sync>;

/// Handler for host notifications, run against the instance state.
pub type NotificationHandler = Arc<dyn Fn(&mut (dyn Any + Send), i32) + Send + Sync>;

/// Text form of an instance. `None` leaves the host's default in place.
pub type ToStringHandler = Arc<dyn Fn(&(dyn Any + Send)) -> Option<String> + Send + Sync>;

/// A property exposed on every instance of a class.
#[derive(Clone)]
pub struct PropertyBinding {
    name: StringName,
    variant_type: VariantType,
    usage: PropertyUsage,
    getter: Getter,
    setter: Option<Setter>,
}

impl PropertyBinding {
    pub(crate) fn typed<T, V, G>(name: StringName, get: G) -> Self
    where
        T: Any,
        V: IntoVariant + FromVariant,
        G: Fn(&T) -> V + Send + Sync + 'static,
    {
        Self {
            name,
            variant_type: V::variant_type(),
            usage: PropertyUsage::default() | PropertyUsage::READ_ONLY,
            getter: Arc::new(move |this| {
                let this = this.downcast_ref::<T>().ok_or_else(CallError::instance_is_null)?;
                Ok(get(this).into_variant())
            }),
            setter: None,
        }
    }

    pub(crate) fn with_setter<T, V, S>(mut self, set: S) -> Self
    where
        T: Any,
        V: FromVariant,
        S: Fn(&mut T, V) + Send + Sync + 'static,
    {
        self.usage.remove(PropertyUsage::READ_ONLY);
        self.setter = Some(Arc::new(move |this, value| {
            let this = this.downcast_mut::<T>().ok_or_else(CallError::instance_is_null)?;
            let value = V::from_variant(value)
                .map_err(|_| CallError::invalid_argument(0, i64::from(V::variant_type()) as i32))?;
            set(this, value);
            Ok(())
        }));
        self
    }

    pub(crate) fn with_usage(mut self, usage: PropertyUsage) -> Self {
        self.usage = usage;
        self
    }

    pub fn name(&self) -> StringName {
        self.name
    }

    /// Declared type. `Nil` for properties holding any variant.
    pub fn variant_type(&self) -> VariantType {
        self.variant_type
    }

    pub fn usage(&self) -> PropertyUsage {
        self.usage
    }

    pub fn is_read_only(&self) -> bool {
        self.setter.is_none()
    }

    pub fn get(&self, this: &(dyn Any + Send)) -> Result<Variant, CallError> {
        (self.getter)(this)
    }

    /// Store `value`. A read-only property rejects every write.
    pub fn set(&self, this: &mut (dyn Any + Send), value: &Variant) -> Result<(), CallError> {
        match &self.setter {
            Some(setter) => setter(this, value),
            None => Err(CallError::invalid_method()),
        }
    }
}

impl fmt::Debug for PropertyBinding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PropertyBinding")
            .field("name", &self.name)
            .field("variant_type", &self.variant_type)
            .field("usage", &self.usage)
            .field("read_only", &self.is_read_only())
            .finish()
    }
}

/// A signal a class can emit, with its typed arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignalBinding {
    name: StringName,
    args: Vec<(StringName, VariantType)>,
}

impl SignalBinding {
    pub fn new(
        name: impl Into<StringName>,
        args: impl IntoIterator<Item = (impl Into<StringName>, VariantType)>,
    ) -> Self {
        Self {
            name: name.into(),
            args: args.into_iter().map(|(arg, ty)| (arg.into(), ty)).collect(),
        }
    }

    pub fn name(&self) -> StringName {
        self.name
    }

    pub fn args(&self) -> &[(StringName, VariantType)] {
        &self.args
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use extbind_core::CallErrorKind;

    struct Unit {
        hp: i64,
        label: String,
    }

    fn state() -> Box<dyn Any + Send> {
        Box::new(Unit {
            hp: 10,
            label: "scout".into(),
        })
    }

    #[test]
    fn getter_packs_and_setter_unpacks() {
        let hp = PropertyBinding::typed(StringName::new("hp"), |u: &Unit| u.hp)
            .with_setter(|u: &mut Unit, hp: i64| u.hp = hp);
        assert_eq!(hp.variant_type(), VariantType::Int);
        assert!(!hp.is_read_only());
        assert_eq!(hp.usage(), PropertyUsage::default());

        let mut this = state();
        assert_eq!(hp.get(&*this), Ok(Variant::Int(10)));
        hp.set(&mut *this, &Variant::Int(3)).unwrap();
        assert_eq!(hp.get(&*this), Ok(Variant::Int(3)));
    }

    #[test]
    fn wrong_value_type_is_an_invalid_argument() {
        let hp = PropertyBinding::typed(StringName::new("hp"), |u: &Unit| u.hp)
            .with_setter(|u: &mut Unit, hp: i64| u.hp = hp);
        let mut this = state();
        let err = hp.set(&mut *this, &Variant::String("lots".into())).unwrap_err();
        assert_eq!(err.kind, CallErrorKind::InvalidArgument);
        assert_eq!(err.expected, 2);
        assert_eq!(hp.get(&*this), Ok(Variant::Int(10)));
    }

    #[test]
    fn read_only_rejects_writes() {
        let label = PropertyBinding::typed(StringName::new("label"), |u: &Unit| u.label.clone());
        assert!(label.is_read_only());
        assert!(label.usage().contains(PropertyUsage::READ_ONLY));
        let mut this = state();
        assert_eq!(
            label.set(&mut *this, &Variant::String("x".into())),
            Err(CallError::invalid_method())
        );
        assert_eq!(label.get(&*this), Ok(Variant::String("scout".into())));
    }

    #[test]
    fn foreign_state_reads_as_null_instance() {
        let hp = PropertyBinding::typed(StringName::new("hp"), |u: &Unit| u.hp);
        let other: Box<dyn Any + Send> = Box::new(());
        assert_eq!(hp.get(&*other), Err(CallError::instance_is_null()));
    }

    #[test]
    fn signal_arguments_keep_order() {
        let signal = SignalBinding::new("hit", [("damage", VariantType::Int), ("by", VariantType::Object)]);
        assert_eq!(signal.name().as_str(), "hit");
        assert_eq!(signal.args()[0], (StringName::new("damage"), VariantType::Int));
        assert_eq!(signal.args()[1].1, VariantType::Object);
    }
}
