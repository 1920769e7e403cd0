//! Error types for registration and dispatch.

use extbind_core::{CallError, ConversionError, HandleError, HostError, StringName};
use thiserror::Error;

use crate::instance::InstanceId;
use crate::lifecycle::LifecycleState;

/// Errors that can occur while registering extension classes or moving
/// through the lifecycle.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistrationError {
    /// The requested lifecycle transition is not legal from the current state.
    #[error("illegal lifecycle transition from {from:?} to {to:?}")]
    InvalidTransition {
        from: LifecycleState,
        to: LifecycleState,
    },

    /// Classes can only be registered during the registration phase.
    #[error("cannot register class '{class}' while {state:?}")]
    NotRegistering {
        class: StringName,
        state: LifecycleState,
    },

    /// The runtime has started shutting down and accepts no more hooks.
    #[error("runtime no longer accepts registrations while {0:?}")]
    Closed(LifecycleState),

    /// A class with this name is already registered.
    #[error("duplicate class: {0}")]
    DuplicateClass(StringName),

    /// A method name appears twice in one class.
    #[error("duplicate method '{method}' in class '{class}'")]
    DuplicateMethod {
        class: StringName,
        method: StringName,
    },

    /// A constant name appears twice in one class.
    #[error("duplicate constant '{constant}' in class '{class}'")]
    DuplicateConstant {
        class: StringName,
        constant: StringName,
    },

    /// A property name appears twice in one class.
    #[error("duplicate property '{property}' in class '{class}'")]
    DuplicateProperty {
        class: StringName,
        property: StringName,
    },

    /// A signal name appears twice in one class.
    #[error("duplicate signal '{signal}' in class '{class}'")]
    DuplicateSignal {
        class: StringName,
        signal: StringName,
    },

    /// The parent chain of a class loops back on itself.
    #[error("inheritance cycle through class '{0}'")]
    InheritanceCycle(StringName),

    /// The class definition is malformed.
    #[error("invalid class '{class}': {reason}")]
    InvalidClass {
        class: StringName,
        reason: &'static str,
    },
}

/// Errors that can occur when routing a host call to extension code.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DispatchError {
    /// Dispatch is only legal while the runtime is active.
    #[error("dispatch is not available while {0:?}")]
    NotActive(LifecycleState),

    /// No class with this name is registered.
    #[error("unknown class '{0}'")]
    UnknownClass(StringName),

    /// Neither the class nor any registered ancestor implements the method.
    #[error("no implementation of '{method}' on '{class}' or its registered ancestors")]
    Unresolved {
        class: StringName,
        method: StringName,
    },

    /// The instance id is stale or was never issued.
    #[error("unknown instance {0}")]
    UnknownInstance(InstanceId),

    /// Neither the class nor any registered ancestor declares the property.
    #[error("no property '{property}' on '{class}' or its registered ancestors")]
    UnknownProperty {
        class: StringName,
        property: StringName,
    },

    /// The property has no setter.
    #[error("property '{class}::{property}' is read-only")]
    ReadOnlyProperty {
        class: StringName,
        property: StringName,
    },

    /// The class cannot be instantiated.
    #[error("class '{0}' is abstract")]
    AbstractClass(StringName),

    /// The implementation rejected the call.
    #[error("call to '{class}::{method}' failed: {error}")]
    Call {
        class: StringName,
        method: StringName,
        error: CallError,
    },
}

impl DispatchError {
    /// The status to report back to the host for this failure.
    pub fn to_call_error(&self) -> CallError {
        match self {
            DispatchError::Call { error, .. } => *error,
            DispatchError::UnknownInstance(_) => CallError::instance_is_null(),
            _ => CallError::invalid_method(),
        }
    }
}

/// Umbrella error for the binding layer.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BindingError {
    #[error("conversion error: {0}")]
    Conversion(#[from] ConversionError),

    #[error("handle error: {0}")]
    Handle(#[from] HandleError),

    #[error("host error: {0}")]
    Host(#[from] HostError),

    #[error("registration error: {0}")]
    Registration(#[from] RegistrationError),

    #[error("dispatch error: {0}")]
    Dispatch(#[from] DispatchError),
}

#[cfg(test)]
mod tests {
    use super::*;
    use extbind_core::ErrorCode;

    #[test]
    fn invalid_transition_names_states() {
        let err = RegistrationError::InvalidTransition {
            from: LifecycleState::Active,
            to: LifecycleState::Registering,
        };
        assert!(err.to_string().contains("Active"));
        assert!(err.to_string().contains("Registering"));
    }

    #[test]
    fn unresolved_names_class_and_method() {
        let err = DispatchError::Unresolved {
            class: StringName::new("Widget"),
            method: StringName::new("spin"),
        };
        assert!(err.to_string().contains("Widget"));
        assert!(err.to_string().contains("spin"));
        assert_eq!(err.to_call_error(), CallError::invalid_method());
    }

    #[test]
    fn property_errors_report_invalid_method() {
        let err = DispatchError::ReadOnlyProperty {
            class: StringName::new("Unit"),
            property: StringName::new("hp"),
        };
        assert!(err.to_string().contains("Unit::hp"));
        assert_eq!(err.to_call_error(), CallError::invalid_method());
    }

    #[test]
    fn call_error_passes_through() {
        let err = DispatchError::Call {
            class: StringName::new("Widget"),
            method: StringName::new("area"),
            error: CallError::arity(1, 2),
        };
        assert_eq!(err.to_call_error(), CallError::arity(1, 2));
        assert!(err.to_string().contains("too few arguments"));
    }

    #[test]
    fn binding_error_from_each_tier() {
        let err: BindingError = HostError::Code(ErrorCode::Busy).into();
        assert!(matches!(err, BindingError::Host(_)));
        let err: BindingError = RegistrationError::DuplicateClass(StringName::new("A")).into();
        assert!(err.to_string().contains("duplicate class: A"));
        let err: BindingError = ConversionError::UnknownVariantType(99).into();
        assert!(matches!(err, BindingError::Conversion(_)));
    }
}
