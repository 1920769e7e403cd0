//! Extension class registration and virtual dispatch.
//!
//! Extensions describe their classes with [`ClassBuilder`], hand them to an
//! [`ExtensionRuntime`] while it is registering, and then receive host calls
//! through [`ExtensionRuntime::dispatch`] and
//! [`ExtensionRuntime::dispatch_on`] once it is active. Properties,
//! notifications and text conversion of live instances go through the same
//! runtime.

pub mod class;
pub mod config;
pub mod context;
pub mod dispatch;
pub mod error;
pub mod flags;
pub mod instance;
pub mod lifecycle;
pub mod property;
pub mod virtual_fn;

#[cfg(test)]
mod testing;

pub use class::{ClassBinding, ClassBuilder, Constructor};
pub use config::{ExtensionConfig, InitLevel, LeakPolicy};
pub use context::CallContext;
pub use dispatch::{DispatchTable, Resolved};
pub use error::{BindingError, DispatchError, RegistrationError};
pub use flags::{ClassFlags, MethodFlags, PropertyUsage};
pub use instance::{Instance, InstanceId, InstanceState, InstanceStore};
pub use lifecycle::{ExtensionRuntime, LeakReport, LifecycleState};
pub use property::{NotificationHandler, PropertyBinding, SignalBinding, ToStringHandler};
pub use virtual_fn::{IntoVirtualFn, VirtualCallable, VirtualFn, WithThis};
