//! Core of the extbind binding runtime.
//!
//! This crate contains the pieces every generated wrapper depends on:
//!
//! - [`handle`]: the handle & ownership registry (generational arena of
//!   native handles and their ownership kinds)
//! - [`frame`]: the call-frame codec used to invoke native function pointers
//! - [`variant`]: the dynamically typed [`Variant`] and its conversions
//! - [`host`]: the host function table, method binds and lazy singletons
//! - [`bridge`]: variants and strings in host-owned storage
//! - [`string_name`]: interned identifiers and wire strings
//! - [`error_code`], [`error`], [`contract`]: the two error tiers

pub mod bridge;
pub mod contract;
pub mod error;
pub mod error_code;
pub mod frame;
pub mod handle;
pub mod host;
pub mod string_name;
pub mod variant;

pub use error::{ConversionError, HandleError, HostError};
pub use error_code::{CallError, CallErrorKind, ErrorCode};
pub use frame::{Frame, FrameSlot, FrameValue, NativeCall};
pub use handle::{Borrowed, Entry, HandleRegistry, NativeLifecycle, Ownership, RawHandle, Token};
pub use host::{
    CallVirtualFn, ClassRegistrationInfo, CreateInstanceFn, FreeInstanceFn, GetPropertyFn,
    HostApi, HostInterface, HostVersion, MethodBind, NotificationFn, PropertyInfo,
    SetPropertyFn, SingletonCell, ToStringFn, VariantFromTypeFn, VariantToTypeFn,
};
pub use string_name::{StrRef, StringName};
pub use variant::{
    Color, Dictionary, FromVariant, IntoVariant, MAX_NESTING, ObjectRef, PackedArray, Rid,
    Variant, VariantArray, VariantType,
};

/// Math types carried by variants and frames.
pub use glam;
