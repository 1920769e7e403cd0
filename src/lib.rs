//! Cross-language extension binding runtime.
//!
//! Lets Rust code extend a host engine's native object model: it tracks the
//! ownership of native handles crossing the boundary, encodes call frames
//! for native function pointers, converts dynamically typed [`Variant`]s, and
//! routes the host's virtual calls to extension classes.
//!
//! ```ignore
//! use extbind::prelude::*;
//!
//! struct Widget {
//!     size: f64,
//! }
//!
//! fn register(rt: &mut ExtensionRuntime) -> Result<(), BindingError> {
//!     rt.register_class(
//!         ClassBuilder::new("Widget")
//!             .parent("Node")
//!             .constructor(|| Widget { size: 1.0 })
//!             .method("area", |w: f64, h: f64| w * h)
//!             .method("grow", |this: &mut Widget, by: f64| this.size += by)
//!             .property("size", |w: &Widget| w.size, |w: &mut Widget, size: f64| w.size = size)
//!             .signal("resized", [("size", VariantType::Float)])
//!             .build()?,
//!     )?;
//!     Ok(())
//! }
//!
//! extbind::export_extension!(ExtensionConfig::new(), register);
//! ```

pub mod entry;

pub use extbind_core;
pub use extbind_registry;

pub use extbind_core::{
    CallError, CallErrorKind, ConversionError, ErrorCode, Frame, FrameValue, HandleError,
    HandleRegistry, HostApi, HostError, HostInterface, ObjectRef, Ownership, PropertyInfo,
    RawHandle, SingletonCell, StrRef, StringName, Token, Variant, VariantType, contract,
};
pub use extbind_registry::{
    BindingError, CallContext, ClassBuilder, DispatchError, ExtensionConfig, ExtensionRuntime,
    InitLevel, LeakPolicy, LifecycleState, PropertyUsage, RegistrationError,
};

pub mod prelude {
    pub use extbind_core::{
        CallError, Frame, FromVariant, HandleRegistry, HostApi, IntoVariant, Ownership, RawHandle,
        SingletonCell, StringName, Token, Variant, VariantType,
    };
    pub use extbind_registry::{
        BindingError, CallContext, ClassBuilder, ClassFlags, ExtensionConfig, ExtensionRuntime,
        InitLevel, LeakPolicy, MethodFlags, PropertyUsage,
    };
}

/// Emit the library's C entry points.
///
/// Expands to `extbind_library_init`, which installs the extension and hands
/// the host its level callbacks, and `extbind_library_deinit`, which unloads
/// it. `$register` is an [`entry::RegisterFn`].
#[macro_export]
macro_rules! export_extension {
    ($config:expr, $register:expr) => {
        /// # Safety
        ///
        /// Called once by the host with a valid interface table and a
        /// writable initialization record.
        #[unsafe(no_mangle)]
        pub unsafe extern "C" fn extbind_library_init(
            host: *const $crate::HostInterface,
            init: *mut $crate::entry::Initialization,
        ) -> bool {
            // SAFETY: forwarded from the host.
            unsafe { $crate::entry::library_init(host, init, $config, $register) }
        }

        #[unsafe(no_mangle)]
        pub extern "C" fn extbind_library_deinit() {
            $crate::entry::deinitialize();
        }
    };
}
