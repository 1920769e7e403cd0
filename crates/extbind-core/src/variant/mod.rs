//! The dynamically typed value bridging extension code and the host's
//! property and object system.
//!
//! A [`Variant`] is a closed sum type; the active arm fully determines the
//! payload. Conversions to and from concrete Rust types go through
//! [`IntoVariant`] and [`FromVariant`]. Unpacking checks the arm and returns
//! [`ConversionError::WrongVariantType`] on mismatch; there is no implicit
//! widening between arms.
//!
//! ```
//! use extbind_core::Variant;
//!
//! let v = Variant::pack(12.0f64);
//! assert_eq!(v.unpack::<f64>(), Ok(12.0));
//! assert!(Variant::pack("hello").unpack::<i64>().is_err());
//! ```

mod container;
mod convert;
mod math;
mod object;

pub use container::{Dictionary, MAX_NESTING, PackedArray, VariantArray};
pub use convert::{FromVariant, IntoVariant};
pub use math::{Color, Rid};
pub use object::ObjectRef;

use std::hash::{Hash, Hasher};

use glam::{Affine2, Affine3A, IVec2, IVec3, IVec4, Mat3, Mat4, Quat, Vec2, Vec3, Vec4};
use num_enum::{IntoPrimitive, TryFromPrimitive};
use ordered_float::OrderedFloat;

use crate::error::ConversionError;
use crate::string_name::StringName;

/// Host variant type ordinals.
///
/// The numbering is part of the ABI. Some types (rectangles, planes, bounding
/// boxes, node paths, callables, signals) are known by ordinal only and have
/// no [`Variant`] arm in this crate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, TryFromPrimitive, IntoPrimitive)]
#[repr(i64)]
pub enum VariantType {
    Nil = 0,
    Bool = 1,
    Int = 2,
    Float = 3,
    String = 4,
    Vector2 = 5,
    Vector2i = 6,
    Rect2 = 7,
    Rect2i = 8,
    Vector3 = 9,
    Vector3i = 10,
    Transform2D = 11,
    Vector4 = 12,
    Vector4i = 13,
    Plane = 14,
    Quaternion = 15,
    Aabb = 16,
    Basis = 17,
    Transform3D = 18,
    Projection = 19,
    Color = 20,
    StringName = 21,
    NodePath = 22,
    Rid = 23,
    Object = 24,
    Callable = 25,
    Signal = 26,
    Dictionary = 27,
    Array = 28,
    PackedByteArray = 29,
    PackedInt32Array = 30,
    PackedInt64Array = 31,
    PackedFloat32Array = 32,
    PackedFloat64Array = 33,
    PackedStringArray = 34,
    PackedVector2Array = 35,
    PackedVector3Array = 36,
    PackedColorArray = 37,
    PackedVector4Array = 38,
}

impl VariantType {
    /// Number of variant types the host defines.
    pub const COUNT: usize = 39;

    pub fn from_raw(raw: i64) -> Result<Self, ConversionError> {
        Self::try_from(raw).map_err(|_| ConversionError::UnknownVariantType(raw))
    }

    /// The host's name for this type.
    pub fn name(self) -> &'static str {
        match self {
            VariantType::Nil => "Nil",
            VariantType::Bool => "bool",
            VariantType::Int => "int",
            VariantType::Float => "float",
            VariantType::String => "String",
            VariantType::Vector2 => "Vector2",
            VariantType::Vector2i => "Vector2i",
            VariantType::Rect2 => "Rect2",
            VariantType::Rect2i => "Rect2i",
            VariantType::Vector3 => "Vector3",
            VariantType::Vector3i => "Vector3i",
            VariantType::Transform2D => "Transform2D",
            VariantType::Vector4 => "Vector4",
            VariantType::Vector4i => "Vector4i",
            VariantType::Plane => "Plane",
            VariantType::Quaternion => "Quaternion",
            VariantType::Aabb => "AABB",
            VariantType::Basis => "Basis",
            VariantType::Transform3D => "Transform3D",
            VariantType::Projection => "Projection",
            VariantType::Color => "Color",
            VariantType::StringName => "StringName",
            VariantType::NodePath => "NodePath",
            VariantType::Rid => "RID",
            VariantType::Object => "Object",
            VariantType::Callable => "Callable",
            VariantType::Signal => "Signal",
            VariantType::Dictionary => "Dictionary",
            VariantType::Array => "Array",
            VariantType::PackedByteArray => "PackedByteArray",
            VariantType::PackedInt32Array => "PackedInt32Array",
            VariantType::PackedInt64Array => "PackedInt64Array",
            VariantType::PackedFloat32Array => "PackedFloat32Array",
            VariantType::PackedFloat64Array => "PackedFloat64Array",
            VariantType::PackedStringArray => "PackedStringArray",
            VariantType::PackedVector2Array => "PackedVector2Array",
            VariantType::PackedVector3Array => "PackedVector3Array",
            VariantType::PackedColorArray => "PackedColorArray",
            VariantType::PackedVector4Array => "PackedVector4Array",
        }
    }
}

/// A dynamically typed host value.
///
/// Cloning is cheap: strings are copied, but arrays and dictionaries are
/// aliased and packed arrays share storage until written.
#[derive(Debug, Clone, Default)]
pub enum Variant {
    #[default]
    Nil,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    StringName(StringName),
    Vector2(Vec2),
    Vector2i(IVec2),
    Vector3(Vec3),
    Vector3i(IVec3),
    Vector4(Vec4),
    Vector4i(IVec4),
    Quaternion(Quat),
    Basis(Mat3),
    Transform2D(Affine2),
    Transform3D(Affine3A),
    Projection(Mat4),
    Color(Color),
    Rid(Rid),
    Object(ObjectRef),
    Array(VariantArray),
    Dictionary(Dictionary),
    PackedByteArray(PackedArray<u8>),
    PackedInt32Array(PackedArray<i32>),
    PackedInt64Array(PackedArray<i64>),
    PackedFloat32Array(PackedArray<f32>),
    PackedFloat64Array(PackedArray<f64>),
    PackedStringArray(PackedArray<String>),
    PackedVector2Array(PackedArray<Vec2>),
    PackedVector3Array(PackedArray<Vec3>),
    PackedColorArray(PackedArray<Color>),
    PackedVector4Array(PackedArray<Vec4>),
}

macro_rules! payload_arms {
    ($mac:ident) => {
        $mac! {
            Bool,
            Int,
            Float,
            String,
            StringName,
            Vector2,
            Vector2i,
            Vector3,
            Vector3i,
            Vector4,
            Vector4i,
            Quaternion,
            Basis,
            Transform2D,
            Transform3D,
            Projection,
            Color,
            Rid,
            Object,
            Array,
            Dictionary,
            PackedByteArray,
            PackedInt32Array,
            PackedInt64Array,
            PackedFloat32Array,
            PackedFloat64Array,
            PackedStringArray,
            PackedVector2Array,
            PackedVector3Array,
            PackedColorArray,
            PackedVector4Array
        }
    };
}

macro_rules! impl_variant_type_of {
    ($($arm:ident),*) => {
        impl Variant {
            /// The host type ordinal of the active arm.
            pub fn variant_type(&self) -> VariantType {
                match self {
                    Variant::Nil => VariantType::Nil,
                    $(Variant::$arm(_) => VariantType::$arm,)*
                }
            }
        }
    };
}

payload_arms!(impl_variant_type_of);

impl Variant {
    /// Pack a value into the arm matching its type.
    pub fn pack<T: IntoVariant>(value: T) -> Variant {
        value.into_variant()
    }

    /// Unpack into `T`, failing if the active arm does not match.
    pub fn unpack<T: FromVariant>(&self) -> Result<T, ConversionError> {
        T::from_variant(self)
    }

    pub fn type_name(&self) -> &'static str {
        self.variant_type().name()
    }

    pub fn is_nil(&self) -> bool {
        matches!(self, Variant::Nil)
    }

    /// Truthiness as the host evaluates it in conditions.
    ///
    /// Nil, zero, empty strings, zero vectors and empty containers are
    /// false; objects are true while their registry entry is live.
    pub fn booleanize(&self) -> bool {
        match self {
            Variant::Nil => false,
            Variant::Bool(b) => *b,
            Variant::Int(i) => *i != 0,
            Variant::Float(f) => *f != 0.0,
            Variant::String(s) => !s.is_empty(),
            Variant::StringName(n) => !n.as_str().is_empty(),
            Variant::Vector2(v) => *v != Vec2::ZERO,
            Variant::Vector2i(v) => *v != IVec2::ZERO,
            Variant::Vector3(v) => *v != Vec3::ZERO,
            Variant::Vector3i(v) => *v != IVec3::ZERO,
            Variant::Vector4(v) => *v != Vec4::ZERO,
            Variant::Vector4i(v) => *v != IVec4::ZERO,
            Variant::Quaternion(q) => *q != Quat::IDENTITY,
            Variant::Basis(m) => *m != Mat3::IDENTITY,
            Variant::Transform2D(t) => *t != Affine2::IDENTITY,
            Variant::Transform3D(t) => *t != Affine3A::IDENTITY,
            Variant::Projection(m) => *m != Mat4::IDENTITY,
            Variant::Color(c) => *c != Color::BLACK,
            Variant::Rid(r) => r.is_valid(),
            Variant::Object(o) => o.is_live(),
            Variant::Array(a) => !a.is_empty(),
            Variant::Dictionary(d) => !d.is_empty(),
            Variant::PackedByteArray(p) => !p.is_empty(),
            Variant::PackedInt32Array(p) => !p.is_empty(),
            Variant::PackedInt64Array(p) => !p.is_empty(),
            Variant::PackedFloat32Array(p) => !p.is_empty(),
            Variant::PackedFloat64Array(p) => !p.is_empty(),
            Variant::PackedStringArray(p) => !p.is_empty(),
            Variant::PackedVector2Array(p) => !p.is_empty(),
            Variant::PackedVector3Array(p) => !p.is_empty(),
            Variant::PackedColorArray(p) => !p.is_empty(),
            Variant::PackedVector4Array(p) => !p.is_empty(),
        }
    }

    /// Copy that does not alias `self`'s containers.
    ///
    /// Without `deep`, only the outermost array or dictionary is copied.
    /// Objects are never duplicated; the copy co-owns the same entry.
    pub fn duplicate(&self, deep: bool) -> Variant {
        match self {
            Variant::Array(a) => Variant::Array(a.duplicate(deep)),
            Variant::Dictionary(d) => Variant::Dictionary(d.duplicate(deep)),
            Variant::PackedByteArray(p) => Variant::PackedByteArray(p.duplicate()),
            Variant::PackedInt32Array(p) => Variant::PackedInt32Array(p.duplicate()),
            Variant::PackedInt64Array(p) => Variant::PackedInt64Array(p.duplicate()),
            Variant::PackedFloat32Array(p) => Variant::PackedFloat32Array(p.duplicate()),
            Variant::PackedFloat64Array(p) => Variant::PackedFloat64Array(p.duplicate()),
            Variant::PackedStringArray(p) => Variant::PackedStringArray(p.duplicate()),
            Variant::PackedVector2Array(p) => Variant::PackedVector2Array(p.duplicate()),
            Variant::PackedVector3Array(p) => Variant::PackedVector3Array(p.duplicate()),
            Variant::PackedColorArray(p) => Variant::PackedColorArray(p.duplicate()),
            Variant::PackedVector4Array(p) => Variant::PackedVector4Array(p.duplicate()),
            other => other.clone(),
        }
    }
}

// ============================================================================
// Equality and hashing
// ============================================================================

/// Equality and hashing that treat floats by bit-level identity, so variants
/// (including NaN payloads) can be dictionary keys.
trait Canonical {
    fn canon_eq(&self, other: &Self) -> bool;
    fn canon_hash<H: Hasher>(&self, state: &mut H);
}

macro_rules! impl_canonical_exact {
    ($($t:ty),* $(,)?) => {
        $(
            impl Canonical for $t {
                fn canon_eq(&self, other: &Self) -> bool {
                    self == other
                }

                fn canon_hash<H: Hasher>(&self, state: &mut H) {
                    self.hash(state);
                }
            }
        )*
    };
}

impl_canonical_exact!(
    bool,
    u8,
    i32,
    i64,
    String,
    StringName,
    Rid,
    ObjectRef,
    VariantArray,
    Dictionary,
);

macro_rules! impl_canonical_int_vector {
    ($($t:ty),* $(,)?) => {
        $(
            impl Canonical for $t {
                fn canon_eq(&self, other: &Self) -> bool {
                    self == other
                }

                fn canon_hash<H: Hasher>(&self, state: &mut H) {
                    self.to_array().hash(state);
                }
            }
        )*
    };
}

impl_canonical_int_vector!(IVec2, IVec3, IVec4);

macro_rules! impl_canonical_lanes {
    ($($t:ty => $lanes:ident),* $(,)?) => {
        $(
            impl Canonical for $t {
                fn canon_eq(&self, other: &Self) -> bool {
                    self.$lanes()
                        .iter()
                        .zip(other.$lanes().iter())
                        .all(|(a, b)| OrderedFloat(*a) == OrderedFloat(*b))
                }

                fn canon_hash<H: Hasher>(&self, state: &mut H) {
                    for lane in self.$lanes() {
                        OrderedFloat(lane).hash(state);
                    }
                }
            }
        )*
    };
}

impl_canonical_lanes!(
    Vec2 => to_array,
    Vec3 => to_array,
    Vec4 => to_array,
    Quat => to_array,
    Color => to_array,
    Mat3 => to_cols_array,
    Mat4 => to_cols_array,
    Affine2 => to_cols_array,
    Affine3A => to_cols_array,
);

impl Canonical for f32 {
    fn canon_eq(&self, other: &Self) -> bool {
        OrderedFloat(*self) == OrderedFloat(*other)
    }

    fn canon_hash<H: Hasher>(&self, state: &mut H) {
        OrderedFloat(*self).hash(state);
    }
}

impl Canonical for f64 {
    fn canon_eq(&self, other: &Self) -> bool {
        OrderedFloat(*self) == OrderedFloat(*other)
    }

    fn canon_hash<H: Hasher>(&self, state: &mut H) {
        OrderedFloat(*self).hash(state);
    }
}

impl<T: Canonical> Canonical for PackedArray<T> {
    fn canon_eq(&self, other: &Self) -> bool {
        self.shares_storage_with(other)
            || (self.len() == other.len()
                && self.iter().zip(other.iter()).all(|(a, b)| a.canon_eq(b)))
    }

    fn canon_hash<H: Hasher>(&self, state: &mut H) {
        self.len().hash(state);
        for item in self.iter() {
            item.canon_hash(state);
        }
    }
}

macro_rules! impl_variant_eq_hash {
    ($($arm:ident),*) => {
        impl PartialEq for Variant {
            fn eq(&self, other: &Self) -> bool {
                match (self, other) {
                    (Variant::Nil, Variant::Nil) => true,
                    $((Variant::$arm(a), Variant::$arm(b)) => a.canon_eq(b),)*
                    _ => false,
                }
            }
        }

        impl Eq for Variant {}

        impl Hash for Variant {
            fn hash<H: Hasher>(&self, state: &mut H) {
                self.variant_type().hash(state);
                match self {
                    Variant::Nil => {}
                    $(Variant::$arm(v) => v.canon_hash(state),)*
                }
            }
        }
    };
}

payload_arms!(impl_variant_eq_hash);
