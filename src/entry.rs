//! Process entry and teardown.
//!
//! The host loads the extension library, calls its init symbol once with a
//! [`HostInterface`] table, then brings the extension up level by level
//! through the callbacks written into [`Initialization`]. At the configured
//! registration level the extension's classes are registered, frozen and
//! announced to the host together with their properties and signals; on the
//! way down the same level unregisters them and
//! terminates the runtime. The deinit symbol is the last call into the
//! library.
//!
//! Use [`export_extension!`](crate::export_extension) to emit the symbols.
//!
//! Host-facing trampolines cannot return Rust errors. Conditions that mean
//! the host and extension disagree about the ABI (an unresolvable virtual
//! call, freeing an unknown instance) escalate through
//! [`contract::violation`]; a panic across the `extern "C"` boundary aborts
//! the process. Values cross in host-owned variants and strings, built and
//! read through the host table's constructors.

use std::ffi::c_void;
use std::sync::Arc;

use extbind_core::{
    CallError, ClassRegistrationInfo, Frame, FrameSlot, HostApi, HostInterface, PropertyInfo,
    StrRef, StringName, VariantType, contract,
};
use extbind_registry::{
    BindingError, ClassBinding, DispatchError, ExtensionConfig, ExtensionRuntime, InitLevel,
    InstanceId, LeakReport, LifecycleState, RegistrationError,
};
use parking_lot::RwLock;

/// Extension hook that registers classes and cleanup hooks.
///
/// Runs with the process-wide runtime locked for writing, so it must not
/// call [`with_runtime`] or [`host`].
pub type RegisterFn = fn(&mut ExtensionRuntime) -> Result<(), BindingError>;

/// Level callbacks the extension hands back to the host from its init symbol.
#[derive(Debug, Clone, Copy)]
#[repr(C)]
pub struct Initialization {
    pub minimum_level: u32,
    pub initialize: Option<unsafe extern "C" fn(level: u32)>,
    pub deinitialize: Option<unsafe extern "C" fn(level: u32)>,
}

struct Extension {
    host: HostApi,
    register: RegisterFn,
    runtime: ExtensionRuntime,
}

static EXTENSION: RwLock<Option<Extension>> = parking_lot::const_rwlock(None);

// ============================================================================
// Safe API
// ============================================================================

/// Install the extension for `host`. Fails if one is already installed.
#[tracing::instrument(skip(host, register))]
pub fn initialize(
    host: HostApi,
    config: ExtensionConfig,
    register: RegisterFn,
) -> Result<(), BindingError> {
    let mut slot = EXTENSION.write();
    if let Some(existing) = slot.as_ref() {
        return Err(RegistrationError::InvalidTransition {
            from: existing.runtime.state(),
            to: LifecycleState::Uninitialized,
        }
        .into());
    }
    tracing::info!(host_version = %host.version(), "extension loaded");
    *slot = Some(Extension {
        host,
        register,
        runtime: ExtensionRuntime::new(config, Arc::new(host)),
    });
    Ok(())
}

/// Host reached `level`. Registers classes at the registration level.
#[tracing::instrument]
pub fn initialize_level(level: InitLevel) -> Result<(), BindingError> {
    let mut slot = EXTENSION.write();
    let Some(ext) = slot.as_mut() else {
        return Err(not_loaded());
    };
    if level != ext.runtime.config().registration_level() {
        return Ok(());
    }

    ext.runtime.begin_registration()?;
    (ext.register)(&mut ext.runtime)?;
    let table = ext.runtime.finish_registration()?;

    for binding in table.bindings() {
        let name = binding.name();
        let info = ClassRegistrationInfo {
            class_name: name.as_str_ref(),
            parent_name: binding
                .parent()
                .map_or(StrRef::new(""), StringName::as_str_ref),
            flags: binding.flags().bits(),
            class_userdata: u64::from(name.id()),
            create_instance,
            free_instance,
            call_virtual,
            set_property,
            get_property,
            notification,
            to_string,
        };
        ext.host.register_class(&info)?;
        announce_members(&ext.host, binding)?;
        tracing::debug!(class = %name, "class announced to host");
    }
    Ok(())
}

fn property_info(name: StringName, variant_type: VariantType, usage: u32) -> PropertyInfo<'static> {
    PropertyInfo {
        variant_type: variant_type.into(),
        name: name.as_str_ref(),
        class_name: StrRef::new(""),
        hint: 0,
        hint_string: StrRef::new(""),
        usage,
    }
}

fn announce_members(host: &HostApi, binding: &ClassBinding) -> Result<(), BindingError> {
    let class = binding.name();
    for property in binding.properties() {
        let info = property_info(property.name(), property.variant_type(), property.usage().bits());
        host.register_property(class, &info)?;
    }
    for signal in binding.signals() {
        let args: Vec<PropertyInfo<'static>> = signal
            .args()
            .iter()
            .map(|&(arg, ty)| property_info(arg, ty, 0))
            .collect();
        host.register_signal(class, signal.name(), &args)?;
    }
    Ok(())
}

/// Host is leaving `level`. Tears the runtime down at the registration
/// level and returns what was still live.
#[tracing::instrument]
pub fn deinitialize_level(level: InitLevel) -> Result<Option<LeakReport>, BindingError> {
    let mut slot = EXTENSION.write();
    let Some(ext) = slot.as_mut() else {
        return Err(not_loaded());
    };
    if level != ext.runtime.config().registration_level() {
        return Ok(None);
    }
    shutdown(ext).map(Some)
}

/// Unload the extension, shutting it down first if the host skipped the
/// level callbacks.
#[tracing::instrument]
pub fn deinitialize() -> Option<LeakReport> {
    let mut ext = EXTENSION.write().take()?;
    let report = match ext.runtime.state() {
        LifecycleState::Active => contract::enforce(shutdown(&mut ext)),
        _ => LeakReport::default(),
    };
    tracing::info!("extension unloaded");
    Some(report)
}

fn shutdown(ext: &mut Extension) -> Result<LeakReport, BindingError> {
    if let Some(table) = ext.runtime.table().cloned() {
        for binding in table.bindings().rev() {
            ext.host.unregister_class(binding.name())?;
        }
    }
    ext.runtime.begin_shutdown()?;
    Ok(ext.runtime.terminate()?)
}

fn not_loaded() -> BindingError {
    RegistrationError::InvalidTransition {
        from: LifecycleState::Uninitialized,
        to: LifecycleState::Registering,
    }
    .into()
}

/// Run `f` against the installed runtime.
///
/// Safe to call from inside a virtual method implementation.
pub fn with_runtime<R>(f: impl FnOnce(&ExtensionRuntime) -> R) -> Option<R> {
    with_extension(|ext| f(&ext.runtime))
}

fn with_extension<R>(f: impl FnOnce(&Extension) -> R) -> Option<R> {
    EXTENSION.read_recursive().as_ref().map(f)
}

/// The installed host table.
pub fn host() -> Option<HostApi> {
    EXTENSION.read_recursive().as_ref().map(|ext| ext.host)
}

// ============================================================================
// C ABI
// ============================================================================

/// Body of the exported init symbol.
///
/// # Safety
///
/// `host` must be null or point to a valid [`HostInterface`] whose functions
/// stay callable until the library is unloaded; `init` must be null or
/// writable.
pub unsafe fn library_init(
    host: *const HostInterface,
    init: *mut Initialization,
    config: ExtensionConfig,
    register: RegisterFn,
) -> bool {
    // SAFETY: guaranteed by the caller.
    let Some(host) = (unsafe { HostApi::from_raw(host) }) else {
        tracing::error!("host passed a null interface table");
        return false;
    };
    // SAFETY: guaranteed by the caller.
    let Some(init) = (unsafe { init.as_mut() }) else {
        tracing::error!("host passed a null initialization record");
        return false;
    };
    let minimum_level = config.minimum_level();
    if let Err(err) = initialize(host, config, register) {
        tracing::error!(%err, "extension init failed");
        return false;
    }
    *init = Initialization {
        minimum_level: minimum_level.into(),
        initialize: Some(initialize_level_c),
        deinitialize: Some(deinitialize_level_c),
    };
    true
}

unsafe extern "C" fn initialize_level_c(level: u32) {
    match InitLevel::try_from(level) {
        Ok(level) => contract::enforce(initialize_level(level)),
        Err(_) => tracing::warn!(level, "ignoring unknown initialization level"),
    }
}

unsafe extern "C" fn deinitialize_level_c(level: u32) {
    match InitLevel::try_from(level) {
        Ok(level) => {
            contract::enforce(deinitialize_level(level));
        }
        Err(_) => tracing::warn!(level, "ignoring unknown initialization level"),
    }
}

fn class_of(class_userdata: u64) -> StringName {
    u32::try_from(class_userdata)
        .ok()
        .and_then(StringName::from_id)
        .unwrap_or_else(|| contract::violation(format_args!("unknown class id {class_userdata}")))
}

/// Host callback: create extension state for a new instance.
pub unsafe extern "C" fn create_instance(class_userdata: u64) -> u64 {
    let class = class_of(class_userdata);
    let created = with_runtime(|rt| rt.create_instance(class));
    match created {
        Some(Ok(id)) => id.to_bits(),
        Some(Err(err)) => {
            tracing::error!(%class, %err, "instance creation failed");
            0
        }
        None => contract::violation("create_instance called with no extension loaded"),
    }
}

/// Host callback: drop extension state for `instance`.
pub unsafe extern "C" fn free_instance(_class_userdata: u64, instance: u64) {
    let Some(id) = InstanceId::from_bits(instance) else {
        return;
    };
    with_runtime(|rt| rt.release_instance(id))
        .unwrap_or_else(|| contract::violation("free_instance called with no extension loaded"));
}

/// Host callback: invoke virtual `method` on `instance` (0 for static
/// calls).
///
/// # Safety
///
/// `args` must point to `argc` readable slots, `ret` must point to a live
/// host variant and `error` must be writable.
pub unsafe extern "C" fn call_virtual(
    class_userdata: u64,
    instance: u64,
    method: StrRef<'_>,
    args: *const FrameSlot,
    argc: u32,
    ret: *mut c_void,
    error: *mut CallError,
) {
    let class = class_of(class_userdata);
    let method = StringName::new(method.as_str());
    // SAFETY: guaranteed by the caller.
    let frame = unsafe { Frame::from_raw(args, argc as usize) };

    let outcome = with_extension(|ext| {
        let value = ext
            .runtime
            .call_virtual(class, InstanceId::from_bits(instance), method, &frame)?;
        // SAFETY: `ret` points to a live host variant.
        unsafe { ext.host.write_variant(ret, &value) }.map_err(|err| {
            tracing::warn!(%class, %method, %err, "return value cannot be handed to the host");
            CallError::invalid_method()
        })
    })
    .unwrap_or_else(|| contract::violation("call_virtual called with no extension loaded"));

    let status = match outcome {
        Ok(()) => CallError::OK,
        Err(err) => err,
    };
    // SAFETY: guaranteed by the caller.
    unsafe { *error = status };
}

/// Host callback: store the host variant at `value` into property `name`.
///
/// Returns `false` for properties the class does not declare, so the host
/// can fall back to its own.
///
/// # Safety
///
/// `value` must point to a live host variant.
pub unsafe extern "C" fn set_property(
    class_userdata: u64,
    instance: u64,
    name: StrRef<'_>,
    value: *const c_void,
) -> bool {
    let Some(id) = InstanceId::from_bits(instance) else {
        return false;
    };
    let property = StringName::new(name.as_str());
    with_extension(|ext| {
        // SAFETY: guaranteed by the caller.
        let value = match unsafe { ext.host.read_variant(value, ext.runtime.registry()) } {
            Ok(value) => value,
            Err(err) => {
                tracing::warn!(class = %class_of(class_userdata), %property, %err, "unreadable property value");
                return false;
            }
        };
        match ext.runtime.set_property(id, property, &value) {
            Ok(()) => true,
            Err(DispatchError::UnknownProperty { .. }) => false,
            Err(err) => {
                tracing::warn!(%err, "property write rejected");
                false
            }
        }
    })
    .unwrap_or_else(|| contract::violation("set_property called with no extension loaded"))
}

/// Host callback: read property `name` into the host variant at `ret`.
///
/// # Safety
///
/// `ret` must point to a live host variant.
pub unsafe extern "C" fn get_property(
    class_userdata: u64,
    instance: u64,
    name: StrRef<'_>,
    ret: *mut c_void,
) -> bool {
    let Some(id) = InstanceId::from_bits(instance) else {
        return false;
    };
    let property = StringName::new(name.as_str());
    with_extension(|ext| match ext.runtime.get_property(id, property) {
        // SAFETY: guaranteed by the caller.
        Ok(value) => match unsafe { ext.host.write_variant(ret, &value) } {
            Ok(()) => true,
            Err(err) => {
                tracing::warn!(class = %class_of(class_userdata), %property, %err, "property value cannot be handed to the host");
                false
            }
        },
        Err(DispatchError::UnknownProperty { .. }) => false,
        Err(err) => {
            tracing::warn!(%err, "property read failed");
            false
        }
    })
    .unwrap_or_else(|| contract::violation("get_property called with no extension loaded"))
}

/// Host callback: deliver notification `what` to `instance`.
pub unsafe extern "C" fn notification(_class_userdata: u64, instance: u64, what: i32, reversed: bool) {
    let Some(id) = InstanceId::from_bits(instance) else {
        return;
    };
    match with_runtime(|rt| rt.notify(id, what, reversed)) {
        Some(Ok(())) => {}
        Some(Err(err)) => tracing::warn!(what, %err, "notification dropped"),
        None => contract::violation("notification called with no extension loaded"),
    }
}

/// Host callback: build the instance's text form as a host string at `out`.
///
/// # Safety
///
/// `out` must be writable storage for one host string.
pub unsafe extern "C" fn to_string(_class_userdata: u64, instance: u64, out: *mut c_void) -> bool {
    let Some(id) = InstanceId::from_bits(instance) else {
        return false;
    };
    with_extension(|ext| match ext.runtime.to_string(id) {
        Ok(Some(text)) => {
            // SAFETY: guaranteed by the caller.
            unsafe { ext.host.new_string(out, &text) };
            true
        }
        Ok(None) => false,
        Err(err) => {
            tracing::warn!(%err, "text conversion failed");
            false
        }
    })
    .unwrap_or_else(|| contract::violation("to_string called with no extension loaded"))
}
