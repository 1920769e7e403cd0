//! The host-provided function table and its safe wrapper.
//!
//! At load time the host hands the extension a [`HostInterface`]: a
//! `#[repr(C)]` table of function pointers for invoking object methods,
//! constructing and destroying objects, driving native refcounts, resolving
//! singletons and method binds, building host strings and variants, and
//! registering extension classes with their properties and signals.
//! [`HostApi`] wraps a validated copy of that table.
//!
//! Host strings and variants are opaque: the extension never assumes their
//! layout and only touches them through the table's constructors (see
//! [`crate::bridge`]).

use std::ffi::c_void;
use std::fmt;
use std::sync::OnceLock;

use parking_lot::Mutex;

use crate::error::HostError;
use crate::error_code::{CallError, ErrorCode};
use crate::frame::{Frame, FrameSlot};
use crate::handle::{NativeLifecycle, RawHandle};
use crate::string_name::{StrRef, StringName};

/// Host engine version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
#[repr(C)]
pub struct HostVersion {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
}

impl fmt::Display for HostVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

/// Host callback creating extension-side state for a new instance of the
/// class identified by `class_userdata`. Returns the instance id, or 0.
pub type CreateInstanceFn = unsafe extern "C" fn(class_userdata: u64) -> u64;

/// Host callback dropping extension-side state for `instance`.
pub type FreeInstanceFn = unsafe extern "C" fn(class_userdata: u64, instance: u64);

/// Host callback invoking virtual method `method` on `instance`.
///
/// `args` points to `argc` frame slots. `ret` points to a valid `Variant`
/// that receives the result; `error` receives the call status.
pub type CallVirtualFn = unsafe extern "C" fn(
    class_userdata: u64,
    instance: u64,
    method: StrRef<'_>,
    args: *const FrameSlot,
    argc: u32,
    ret: *mut c_void,
    error: *mut CallError,
);

/// Host callback storing the host variant at `value` into property `name`.
/// Returns `false` if the instance has no such property.
pub type SetPropertyFn = unsafe extern "C" fn(
    class_userdata: u64,
    instance: u64,
    name: StrRef<'_>,
    value: *const c_void,
) -> bool;

/// Host callback reading property `name` into the live host variant at `ret`.
/// Returns `false` if the instance has no such property.
pub type GetPropertyFn =
    unsafe extern "C" fn(class_userdata: u64, instance: u64, name: StrRef<'_>, ret: *mut c_void) -> bool;

/// Host callback delivering notification `what`. With `reversed`, the most
/// derived class handles it first.
pub type NotificationFn =
    unsafe extern "C" fn(class_userdata: u64, instance: u64, what: i32, reversed: bool);

/// Host callback building the instance's text form as a host string in the
/// uninitialized storage at `out`. Returns `false` (leaving `out` untouched)
/// to fall back to the host's default.
pub type ToStringFn = unsafe extern "C" fn(class_userdata: u64, instance: u64, out: *mut c_void) -> bool;

/// Host constructor building a variant in uninitialized storage at `dest`
/// from the native value at `native`.
pub type VariantFromTypeFn = unsafe extern "C" fn(dest: *mut c_void, native: *const c_void);

/// Host constructor writing the native value of the variant at `variant` into
/// uninitialized storage at `dest`.
pub type VariantToTypeFn = unsafe extern "C" fn(dest: *mut c_void, variant: *const c_void);

/// Everything the host needs to expose an extension class.
#[repr(C)]
pub struct ClassRegistrationInfo<'a> {
    pub class_name: StrRef<'a>,
    pub parent_name: StrRef<'a>,
    /// `ClassFlags` bits.
    pub flags: u32,
    pub class_userdata: u64,
    pub create_instance: CreateInstanceFn,
    pub free_instance: FreeInstanceFn,
    pub call_virtual: CallVirtualFn,
    pub set_property: SetPropertyFn,
    pub get_property: GetPropertyFn,
    pub notification: NotificationFn,
    pub to_string: ToStringFn,
}

/// Host description of a property or signal argument.
#[derive(Debug, Clone, Copy)]
#[repr(C)]
pub struct PropertyInfo<'a> {
    /// [`VariantType`](crate::VariantType) ordinal.
    pub variant_type: i64,
    pub name: StrRef<'a>,
    /// Class of object-typed properties; empty otherwise.
    pub class_name: StrRef<'a>,
    pub hint: u32,
    pub hint_string: StrRef<'a>,
    /// Property usage bits.
    pub usage: u32,
}

/// Function table passed to the extension's entry point.
#[derive(Clone, Copy)]
#[repr(C)]
pub struct HostInterface {
    pub get_version: unsafe extern "C" fn() -> HostVersion,
    pub object_method_bind_ptrcall: unsafe extern "C" fn(
        method: *const c_void,
        instance: u64,
        args: *const FrameSlot,
        ret: *mut FrameSlot,
    ),
    pub classdb_construct_object: unsafe extern "C" fn(class: StrRef<'_>) -> u64,
    pub object_destroy: unsafe extern "C" fn(object: u64),
    pub object_reference: unsafe extern "C" fn(object: u64) -> bool,
    pub object_unreference: unsafe extern "C" fn(object: u64) -> bool,
    pub global_get_singleton: unsafe extern "C" fn(name: StrRef<'_>) -> u64,
    pub classdb_get_method_bind:
        unsafe extern "C" fn(class: StrRef<'_>, method: StrRef<'_>, hash: u64) -> *const c_void,
    pub classdb_register_extension_class:
        unsafe extern "C" fn(info: *const ClassRegistrationInfo<'_>) -> i64,
    pub classdb_unregister_extension_class: unsafe extern "C" fn(class: StrRef<'_>) -> i64,
    pub classdb_register_extension_class_property:
        unsafe extern "C" fn(class: StrRef<'_>, info: *const PropertyInfo<'_>) -> i64,
    pub classdb_register_extension_class_signal: unsafe extern "C" fn(
        class: StrRef<'_>,
        signal: StrRef<'_>,
        args: *const PropertyInfo<'_>,
        argc: u32,
    ) -> i64,
    /// Build a host string in uninitialized storage at `dest`.
    pub string_new_with_utf8_chars_and_len:
        unsafe extern "C" fn(dest: *mut c_void, text: *const u8, len: i64),
    /// Copy up to `capacity` UTF-8 bytes of the string at `string` into
    /// `buf` and return the string's full byte length.
    pub string_to_utf8_chars:
        unsafe extern "C" fn(string: *const c_void, buf: *mut u8, capacity: i64) -> i64,
    pub string_destroy: unsafe extern "C" fn(string: *mut c_void),
    pub variant_new_nil: unsafe extern "C" fn(dest: *mut c_void),
    pub variant_destroy: unsafe extern "C" fn(variant: *mut c_void),
    pub variant_get_type: unsafe extern "C" fn(variant: *const c_void) -> i64,
    pub get_variant_from_type_constructor:
        unsafe extern "C" fn(variant_type: i64) -> Option<VariantFromTypeFn>,
    pub get_variant_to_type_constructor:
        unsafe extern "C" fn(variant_type: i64) -> Option<VariantToTypeFn>,
}

/// An opaque host method identifier resolved by name and signature hash.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MethodBind(*const c_void);

// SAFETY: a method bind is an immutable host-side descriptor.
unsafe impl Send for MethodBind {}
unsafe impl Sync for MethodBind {}

impl MethodBind {
    pub fn as_ptr(self) -> *const c_void {
        self.0
    }
}

/// Safe wrapper over a [`HostInterface`].
#[derive(Clone, Copy)]
pub struct HostApi {
    pub(crate) table: HostInterface,
}

impl HostApi {
    /// Wrap a host function table.
    ///
    /// # Safety
    ///
    /// Every function pointer in `table` must be callable for as long as the
    /// returned value (or any copy) is used, and must follow the documented
    /// contract for its arguments.
    pub unsafe fn new(table: HostInterface) -> Self {
        Self { table }
    }

    /// Copy the table behind a pointer received from the host.
    ///
    /// # Safety
    ///
    /// `table` must be null or point to a valid [`HostInterface`]; see
    /// [`HostApi::new`].
    pub unsafe fn from_raw(table: *const HostInterface) -> Option<Self> {
        // SAFETY: guaranteed by the caller.
        unsafe { table.as_ref().map(|t| Self::new(*t)) }
    }

    pub fn version(&self) -> HostVersion {
        // SAFETY: table validity is the constructor's contract.
        unsafe { (self.table.get_version)() }
    }

    /// Construct a new host object of `class`. The caller owns the result.
    pub fn construct(&self, class: StringName) -> Result<RawHandle, HostError> {
        // SAFETY: table validity is the constructor's contract.
        let raw = unsafe { (self.table.classdb_construct_object)(class.as_str_ref()) };
        non_null(raw, "class", class)
    }

    /// Look up a host global by name. Prefer [`SingletonCell`] for repeated
    /// lookups.
    pub fn singleton(&self, name: StringName) -> Result<RawHandle, HostError> {
        // SAFETY: table validity is the constructor's contract.
        let raw = unsafe { (self.table.global_get_singleton)(name.as_str_ref()) };
        non_null(raw, "singleton", name)
    }

    pub fn method_bind(
        &self,
        class: StringName,
        method: StringName,
        hash: u64,
    ) -> Result<MethodBind, HostError> {
        // SAFETY: table validity is the constructor's contract.
        let ptr = unsafe {
            (self.table.classdb_get_method_bind)(class.as_str_ref(), method.as_str_ref(), hash)
        };
        if ptr.is_null() {
            return Err(HostError::NotFound {
                kind: "method",
                name: format!("{class}::{method}"),
            });
        }
        Ok(MethodBind(ptr))
    }

    /// Invoke a host method through `frame`.
    ///
    /// # Safety
    ///
    /// `frame` must be laid out for `method`'s signature, and `instance`
    /// must be a live object of a class that has `method` (or null for
    /// static methods).
    #[cfg_attr(feature = "profiling", profiling::function)]
    pub unsafe fn call_method(&self, method: MethodBind, instance: RawHandle, frame: &mut Frame<'_>) {
        let args = frame.args_ptr();
        let ret = frame.ret_ptr();
        // SAFETY: guaranteed by the caller.
        unsafe { (self.table.object_method_bind_ptrcall)(method.0, instance.to_bits(), args, ret) };
    }

    pub fn register_class(&self, info: &ClassRegistrationInfo<'_>) -> Result<(), HostError> {
        // SAFETY: table validity is the constructor's contract; `info` is a
        // live reference for the duration of the call.
        let code = unsafe { (self.table.classdb_register_extension_class)(info) };
        ErrorCode::check(code)
    }

    pub fn unregister_class(&self, class: StringName) -> Result<(), HostError> {
        // SAFETY: table validity is the constructor's contract.
        let code = unsafe { (self.table.classdb_unregister_extension_class)(class.as_str_ref()) };
        ErrorCode::check(code)
    }

    /// Announce a property of a registered class. Reads and writes reach the
    /// extension through the class's get/set callbacks.
    pub fn register_property(&self, class: StringName, info: &PropertyInfo<'_>) -> Result<(), HostError> {
        // SAFETY: table validity is the constructor's contract; `info` lives
        // for the duration of the call.
        let code = unsafe { (self.table.classdb_register_extension_class_property)(class.as_str_ref(), info) };
        ErrorCode::check(code)
    }

    pub fn register_signal(
        &self,
        class: StringName,
        signal: StringName,
        args: &[PropertyInfo<'_>],
    ) -> Result<(), HostError> {
        // SAFETY: table validity is the constructor's contract; `args` lives
        // for the duration of the call.
        let code = unsafe {
            (self.table.classdb_register_extension_class_signal)(
                class.as_str_ref(),
                signal.as_str_ref(),
                args.as_ptr(),
                args.len() as u32,
            )
        };
        ErrorCode::check(code)
    }
}

fn non_null(raw: u64, kind: &'static str, name: StringName) -> Result<RawHandle, HostError> {
    match RawHandle::from_bits(raw) {
        raw if raw.is_null() => Err(HostError::NotFound {
            kind,
            name: name.to_string(),
        }),
        raw => Ok(raw),
    }
}

impl NativeLifecycle for HostApi {
    fn destroy(&self, raw: RawHandle) {
        // SAFETY: table validity is the constructor's contract.
        unsafe { (self.table.object_destroy)(raw.to_bits()) }
    }

    fn reference(&self, raw: RawHandle) -> bool {
        // SAFETY: table validity is the constructor's contract.
        unsafe { (self.table.object_reference)(raw.to_bits()) }
    }

    fn unreference(&self, raw: RawHandle) -> bool {
        // SAFETY: table validity is the constructor's contract.
        unsafe { (self.table.object_unreference)(raw.to_bits()) }
    }
}

impl fmt::Debug for HostApi {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HostApi").finish_non_exhaustive()
    }
}

// ============================================================================
// Lazy singletons
// ============================================================================

/// A host global resolved on first use.
///
/// Concurrent first use performs the native lookup exactly once; every caller
/// observes the same handle. A failed lookup is not cached.
///
/// ```ignore
/// static ENGINE: SingletonCell = SingletonCell::new("Engine");
///
/// let engine = ENGINE.get(&host)?;
/// ```
pub struct SingletonCell {
    name: &'static str,
    cell: OnceLock<RawHandle>,
    init: Mutex<()>,
}

impl SingletonCell {
    pub const fn new(name: &'static str) -> Self {
        Self {
            name,
            cell: OnceLock::new(),
            init: Mutex::new(()),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Resolve through the host table.
    pub fn get(&self, host: &HostApi) -> Result<RawHandle, HostError> {
        self.get_or_resolve(|name| host.singleton(name))
    }

    /// Resolve with a custom lookup, which runs at most once successfully.
    pub fn get_or_resolve(
        &self,
        resolve: impl FnOnce(StringName) -> Result<RawHandle, HostError>,
    ) -> Result<RawHandle, HostError> {
        if let Some(raw) = self.cell.get() {
            return Ok(*raw);
        }

        let _guard = self.init.lock();
        if let Some(raw) = self.cell.get() {
            return Ok(*raw);
        }
        let raw = resolve(StringName::new(self.name))?;
        tracing::debug!(singleton = self.name, %raw, "singleton resolved");
        Ok(*self.cell.get_or_init(|| raw))
    }

    /// The resolved handle, if any.
    pub fn resolved(&self) -> Option<RawHandle> {
        self.cell.get().copied()
    }
}

impl fmt::Debug for SingletonCell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SingletonCell")
            .field("name", &self.name)
            .field("resolved", &self.cell.get())
            .finish()
    }
}
