//! Moving [`Variant`]s and strings in and out of host-owned storage.
//!
//! Host variants and strings are opaque. A value crosses the boundary as its
//! native by-value form (the same encoding a [`FrameSlot`] uses) and the host
//! builds or unpacks its own representation through the per-type constructors
//! it publishes in the [`HostInterface`](crate::HostInterface) table.
//!
//! Only arms with a fixed by-value form are bridged: nil, scalars, strings,
//! small vectors, quaternions, colors, resource ids and objects. Containers
//! and matrices report [`ConversionError::NotBridged`].

use std::ffi::c_void;
use std::sync::Arc;

use crate::error::ConversionError;
use crate::frame::FrameSlot;
use crate::handle::{HandleRegistry, Ownership, RawHandle};
use crate::host::{HostApi, VariantFromTypeFn, VariantToTypeFn};
use crate::variant::{ObjectRef, Variant, VariantType};

/// Encode a variant's payload in its native by-value form.
fn encode_native(value: &Variant) -> Result<FrameSlot, ConversionError> {
    let mut slot = FrameSlot::ZERO;
    match value {
        Variant::Bool(v) => slot.store(*v),
        Variant::Int(v) => slot.store(*v),
        Variant::Float(v) => slot.store(*v),
        Variant::Vector2(v) => slot.store(*v),
        Variant::Vector2i(v) => slot.store(*v),
        Variant::Vector3(v) => slot.store(*v),
        Variant::Vector3i(v) => slot.store(*v),
        Variant::Vector4(v) => slot.store(*v),
        Variant::Vector4i(v) => slot.store(*v),
        Variant::Quaternion(v) => slot.store(*v),
        Variant::Color(v) => slot.store(*v),
        Variant::Rid(v) => slot.store(*v),
        Variant::Object(obj) => slot.store(obj.raw()),
        other => return Err(ConversionError::NotBridged(other.type_name())),
    }
    Ok(slot)
}

fn decode_native(ty: VariantType, slot: &FrameSlot) -> Result<Variant, ConversionError> {
    Ok(match ty {
        VariantType::Bool => Variant::Bool(slot.load()),
        VariantType::Int => Variant::Int(slot.load()),
        VariantType::Float => Variant::Float(slot.load()),
        VariantType::Vector2 => Variant::Vector2(slot.load()),
        VariantType::Vector2i => Variant::Vector2i(slot.load()),
        VariantType::Vector3 => Variant::Vector3(slot.load()),
        VariantType::Vector3i => Variant::Vector3i(slot.load()),
        VariantType::Vector4 => Variant::Vector4(slot.load()),
        VariantType::Vector4i => Variant::Vector4i(slot.load()),
        VariantType::Quaternion => Variant::Quaternion(slot.load()),
        VariantType::Color => Variant::Color(slot.load()),
        VariantType::Rid => Variant::Rid(slot.load()),
        other => return Err(ConversionError::NotBridged(other.name())),
    })
}

impl HostApi {
    fn from_type(&self, ty: VariantType) -> Result<VariantFromTypeFn, ConversionError> {
        // SAFETY: table validity is the constructor's contract.
        unsafe { (self.table.get_variant_from_type_constructor)(ty.into()) }
            .ok_or(ConversionError::NotBridged(ty.name()))
    }

    fn to_type(&self, ty: VariantType) -> Result<VariantToTypeFn, ConversionError> {
        // SAFETY: table validity is the constructor's contract.
        unsafe { (self.table.get_variant_to_type_constructor)(ty.into()) }
            .ok_or(ConversionError::NotBridged(ty.name()))
    }

    /// Build a host string holding `text` in uninitialized storage at `dest`.
    ///
    /// # Safety
    ///
    /// `dest` must be valid, suitably aligned storage for one host string.
    /// The caller owns the result.
    pub unsafe fn new_string(&self, dest: *mut c_void, text: &str) {
        // SAFETY: guaranteed by the caller; `text` outlives the call.
        unsafe { (self.table.string_new_with_utf8_chars_and_len)(dest, text.as_ptr(), text.len() as i64) }
    }

    /// Copy a host string's contents out. Invalid UTF-8 is replaced.
    ///
    /// # Safety
    ///
    /// `string` must point to a live host string.
    pub unsafe fn read_string(&self, string: *const c_void) -> String {
        // SAFETY: guaranteed by the caller; a zero capacity only measures.
        let len = unsafe { (self.table.string_to_utf8_chars)(string, std::ptr::null_mut(), 0) };
        let mut buf = vec![0u8; len.max(0) as usize];
        // SAFETY: `buf` has room for `len` bytes.
        let written = unsafe { (self.table.string_to_utf8_chars)(string, buf.as_mut_ptr(), len) };
        buf.truncate(written.clamp(0, len.max(0)) as usize);
        String::from_utf8_lossy(&buf).into_owned()
    }

    /// Replace the live host variant at `dest` with `value`.
    ///
    /// An arm without a host constructor is reported before `dest` is
    /// touched, so on error `dest` still holds its previous value. Objects
    /// are written as their raw handle; the host takes its own reference.
    ///
    /// # Safety
    ///
    /// `dest` must point to a live host variant.
    #[cfg_attr(feature = "profiling", profiling::function)]
    pub unsafe fn write_variant(&self, dest: *mut c_void, value: &Variant) -> Result<(), ConversionError> {
        let ty = value.variant_type();
        if ty == VariantType::Nil {
            // SAFETY: guaranteed by the caller.
            unsafe {
                (self.table.variant_destroy)(dest);
                (self.table.variant_new_nil)(dest);
            }
            return Ok(());
        }
        let construct = self.from_type(ty)?;

        if let Variant::String(text) = value {
            let mut native = FrameSlot::ZERO;
            let native_ptr = std::ptr::addr_of_mut!(native).cast::<c_void>();
            // SAFETY: `native` is a host string slot for the duration of the
            // constructor call and is destroyed right after it.
            unsafe {
                self.new_string(native_ptr, text);
                (self.table.variant_destroy)(dest);
                construct(dest, native_ptr);
                (self.table.string_destroy)(native_ptr);
            }
            return Ok(());
        }

        let native = encode_native(value)?;
        // SAFETY: guaranteed by the caller; `native` holds the by-value form
        // of `ty`.
        unsafe {
            (self.table.variant_destroy)(dest);
            construct(dest, std::ptr::addr_of!(native).cast());
        }
        Ok(())
    }

    /// Copy the host variant at `src` into a [`Variant`].
    ///
    /// Objects are tracked in `registry` as borrowed handles: they stay valid
    /// for the current call only. A null object reads as nil.
    ///
    /// # Safety
    ///
    /// `src` must point to a live host variant.
    #[cfg_attr(feature = "profiling", profiling::function)]
    pub unsafe fn read_variant(
        &self,
        src: *const c_void,
        registry: &Arc<HandleRegistry>,
    ) -> Result<Variant, ConversionError> {
        // SAFETY: guaranteed by the caller.
        let ty = VariantType::from_raw(unsafe { (self.table.variant_get_type)(src) })?;
        if ty == VariantType::Nil {
            return Ok(Variant::Nil);
        }
        let unpack = self.to_type(ty)?;
        let mut native = FrameSlot::ZERO;
        let native_ptr = std::ptr::addr_of_mut!(native).cast::<c_void>();
        // SAFETY: `native` is large enough for every bridged by-value form.
        unsafe { unpack(native_ptr, src) };

        match ty {
            VariantType::String => {
                // SAFETY: the constructor left a host string in `native`.
                let text = unsafe { self.read_string(native_ptr) };
                unsafe { (self.table.string_destroy)(native_ptr) };
                Ok(Variant::String(text))
            }
            VariantType::Object => {
                let raw: RawHandle = native.load();
                if raw.is_null() {
                    return Ok(Variant::Nil);
                }
                let object = ObjectRef::acquire(registry.clone(), raw, Ownership::Borrowed, None)?;
                Ok(Variant::Object(object))
            }
            other => decode_native(other, &native),
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::handle::tests::CountingLifecycle;
    use crate::host::tests::host;
    use crate::variant::{Color, Rid, VariantArray};
    use glam::{IVec3, Quat, Vec2};

    // Host-side doubles. A host string is a boxed `String` whose pointer sits
    // at the start of its slot; a host variant is a `FakeVariant`.

    #[derive(Debug, Default)]
    #[repr(C)]
    pub(crate) struct FakeVariant {
        pub ty: i64,
        pub slot: FrameSlot,
    }

    unsafe fn host_string<'a>(string: *const c_void) -> &'a String {
        let slot = unsafe { &*string.cast::<FrameSlot>() };
        unsafe { &*(slot.load::<u64>() as usize as *const String) }
    }

    fn boxed_string(text: String) -> FrameSlot {
        let mut slot = FrameSlot::ZERO;
        slot.store(Box::into_raw(Box::new(text)) as usize as u64);
        slot
    }

    pub(crate) unsafe extern "C" fn string_new(dest: *mut c_void, text: *const u8, len: i64) {
        let bytes = unsafe { std::slice::from_raw_parts(text, len as usize) };
        let text = String::from_utf8_lossy(bytes).into_owned();
        unsafe { *dest.cast::<FrameSlot>() = boxed_string(text) };
    }

    pub(crate) unsafe extern "C" fn string_to_utf8(string: *const c_void, buf: *mut u8, capacity: i64) -> i64 {
        let text = unsafe { host_string(string) };
        let n = text.len().min(capacity.max(0) as usize);
        if n > 0 {
            unsafe { std::ptr::copy_nonoverlapping(text.as_ptr(), buf, n) };
        }
        text.len() as i64
    }

    pub(crate) unsafe extern "C" fn string_destroy(string: *mut c_void) {
        let slot = unsafe { &mut *string.cast::<FrameSlot>() };
        drop(unsafe { Box::from_raw(slot.load::<u64>() as usize as *mut String) });
        *slot = FrameSlot::ZERO;
    }

    pub(crate) unsafe extern "C" fn variant_new_nil(dest: *mut c_void) {
        unsafe { *dest.cast::<FakeVariant>() = FakeVariant::default() };
    }

    pub(crate) unsafe extern "C" fn variant_destroy(variant: *mut c_void) {
        let variant = unsafe { &mut *variant.cast::<FakeVariant>() };
        if variant.ty == i64::from(VariantType::String) {
            unsafe { string_destroy(std::ptr::addr_of_mut!(variant.slot).cast()) };
        }
        *variant = FakeVariant::default();
    }

    pub(crate) unsafe extern "C" fn variant_get_type(variant: *const c_void) -> i64 {
        unsafe { (*variant.cast::<FakeVariant>()).ty }
    }

    const STRING: i64 = VariantType::String as i64;

    unsafe extern "C" fn from_type<const TY: i64>(dest: *mut c_void, native: *const c_void) {
        let native = unsafe { &*native.cast::<FrameSlot>() };
        let slot = if TY == STRING {
            boxed_string(unsafe { host_string(native as *const FrameSlot as *const c_void) }.clone())
        } else {
            *native
        };
        unsafe { *dest.cast::<FakeVariant>() = FakeVariant { ty: TY, slot } };
    }

    unsafe extern "C" fn to_type<const TY: i64>(dest: *mut c_void, variant: *const c_void) {
        let variant = unsafe { &*variant.cast::<FakeVariant>() };
        let slot = if TY == STRING {
            boxed_string(unsafe { host_string(std::ptr::addr_of!(variant.slot).cast()) }.clone())
        } else {
            variant.slot
        };
        unsafe { *dest.cast::<FrameSlot>() = slot };
    }

    macro_rules! constructor_table {
        ($name:ident, $ret:ty, $ctor:ident; $($ty:literal)*) => {
            pub(crate) unsafe extern "C" fn $name(ty: i64) -> Option<$ret> {
                match ty {
                    $($ty => Some($ctor::<$ty> as $ret),)*
                    _ => None,
                }
            }
        };
    }

    constructor_table!(from_type_constructor, VariantFromTypeFn, from_type; 1 2 3 4 5 6 9 10 12 13 15 20 23 24);
    constructor_table!(to_type_constructor, VariantToTypeFn, to_type; 1 2 3 4 5 6 9 10 12 13 15 20 23 24);

    fn registry() -> (Arc<CountingLifecycle>, Arc<HandleRegistry>) {
        let lifecycle = Arc::new(CountingLifecycle::default());
        let registry = Arc::new(HandleRegistry::new(lifecycle.clone()));
        (lifecycle, registry)
    }

    fn through_host(value: Variant) -> Variant {
        let host = host();
        let (_, registry) = registry();
        let mut cell = FakeVariant::default();
        let ptr = std::ptr::addr_of_mut!(cell).cast::<c_void>();
        unsafe {
            host.write_variant(ptr, &value).unwrap();
            let back = host.read_variant(ptr, &registry).unwrap();
            variant_destroy(ptr);
            back
        }
    }

    #[test]
    fn scalars_and_vectors_cross_by_value() {
        assert_eq!(through_host(Variant::Bool(true)), Variant::Bool(true));
        assert_eq!(through_host(Variant::Int(-42)), Variant::Int(-42));
        assert_eq!(through_host(Variant::Float(0.25)), Variant::Float(0.25));
        assert_eq!(
            through_host(Variant::Vector2(Vec2::new(1.5, -2.0))),
            Variant::Vector2(Vec2::new(1.5, -2.0))
        );
        assert_eq!(
            through_host(Variant::Vector3i(IVec3::new(1, 2, 3))),
            Variant::Vector3i(IVec3::new(1, 2, 3))
        );
        assert_eq!(
            through_host(Variant::Quaternion(Quat::IDENTITY)),
            Variant::Quaternion(Quat::IDENTITY)
        );
        assert_eq!(through_host(Variant::Color(Color::WHITE)), Variant::Color(Color::WHITE));
        assert_eq!(through_host(Variant::Rid(Rid(77))), Variant::Rid(Rid(77)));
        assert_eq!(through_host(Variant::Nil), Variant::Nil);
    }

    #[test]
    fn strings_are_copied_into_host_storage() {
        assert_eq!(
            through_host(Variant::String("héllo".into())),
            Variant::String("héllo".into())
        );
        assert_eq!(through_host(Variant::String(String::new())), Variant::String(String::new()));
    }

    #[test]
    fn writing_replaces_previous_host_value() {
        let host = host();
        let (_, registry) = registry();
        let mut cell = FakeVariant::default();
        let ptr = std::ptr::addr_of_mut!(cell).cast::<c_void>();
        unsafe {
            host.write_variant(ptr, &Variant::String("first".into())).unwrap();
            host.write_variant(ptr, &Variant::Int(3)).unwrap();
            assert_eq!(host.read_variant(ptr, &registry), Ok(Variant::Int(3)));
            host.write_variant(ptr, &Variant::Nil).unwrap();
        }
        assert_eq!(cell.ty, 0);
    }

    #[test]
    fn containers_are_not_bridged_and_leave_destination_alone() {
        let host = host();
        let mut cell = FakeVariant::default();
        let ptr = std::ptr::addr_of_mut!(cell).cast::<c_void>();
        unsafe {
            host.write_variant(ptr, &Variant::Int(9)).unwrap();
            assert_eq!(
                host.write_variant(ptr, &Variant::Array(VariantArray::new())),
                Err(ConversionError::NotBridged("Array"))
            );
        }
        assert_eq!(cell.ty, 2);
        assert_eq!(cell.slot.load::<i64>(), 9);
    }

    #[test]
    fn unknown_host_type_is_reported() {
        let host = host();
        let (_, registry) = registry();
        let cell = FakeVariant { ty: 99, slot: FrameSlot::ZERO };
        let ptr = std::ptr::addr_of!(cell).cast::<c_void>();
        assert_eq!(
            unsafe { host.read_variant(ptr, &registry) },
            Err(ConversionError::UnknownVariantType(99))
        );
    }

    #[test]
    fn objects_arrive_borrowed() {
        let host = host();
        let (lifecycle, registry) = registry();
        let mut slot = FrameSlot::ZERO;
        slot.store(RawHandle::from_bits(0x5000));
        let cell = FakeVariant { ty: 24, slot };
        let value = unsafe { host.read_variant(std::ptr::addr_of!(cell).cast(), &registry) }.unwrap();
        let Variant::Object(object) = &value else {
            panic!("expected an object, got {value:?}");
        };
        assert_eq!(object.raw(), RawHandle::from_bits(0x5000));
        assert_eq!(registry.len(), 1);
        drop(value);
        assert!(registry.is_empty());
        assert_eq!(lifecycle.refcount(RawHandle::from_bits(0x5000)), 0);

        let null = FakeVariant { ty: 24, slot: FrameSlot::ZERO };
        assert_eq!(
            unsafe { host.read_variant(std::ptr::addr_of!(null).cast(), &registry) },
            Ok(Variant::Nil)
        );
    }
}
