//! Conversion traits between Rust values and [`Variant`].
//!
//! - [`IntoVariant`]: pack a Rust value into the matching arm
//! - [`FromVariant`]: unpack a variant, checking the active arm
//!
//! ## Supported Types
//!
//! - Integers: `i8`..`i64`, `u8`..`u64` (range-checked on unpack)
//! - Floats: `f32`, `f64`
//! - `bool`, `String`, `&str` (pack only), [`StringName`]
//! - glam vectors, quaternions, matrices and affine transforms
//! - [`Color`], [`Rid`], [`ObjectRef`]
//! - Containers: [`VariantArray`], [`Dictionary`], [`PackedArray`],
//!   `Vec<T>` and `HashMap<K, V>` (through the shared container arms)
//! - `Option<T>`: `None` is Nil; Nil unpacks only into `Option`
//! - `()`: Nil

use std::collections::HashMap;
use std::hash::{BuildHasher, Hash};

use glam::{Affine2, Affine3A, IVec2, IVec3, IVec4, Mat3, Mat4, Quat, Vec2, Vec3, Vec4};

use super::{Color, Dictionary, ObjectRef, PackedArray, Rid, Variant, VariantArray, VariantType};
use crate::error::ConversionError;
use crate::string_name::StringName;

/// Convert a value into a variant.
pub trait IntoVariant {
    fn into_variant(self) -> Variant;
}

/// Extract a value from a variant.
pub trait FromVariant: Sized {
    /// Returns [`ConversionError::WrongVariantType`] if the active arm does
    /// not hold a `Self`.
    fn from_variant(variant: &Variant) -> Result<Self, ConversionError>;

    /// The arm this type unpacks from, used to describe properties to the
    /// host. Nil means any arm.
    fn variant_type() -> VariantType {
        VariantType::Nil
    }
}

fn mismatch(expected: VariantType, actual: &Variant) -> ConversionError {
    ConversionError::wrong_type(expected.name(), actual.type_name())
}

impl IntoVariant for Variant {
    fn into_variant(self) -> Variant {
        self
    }
}

impl FromVariant for Variant {
    fn from_variant(variant: &Variant) -> Result<Self, ConversionError> {
        Ok(variant.clone())
    }
}

// ============================================================================
// Integer implementations
// ============================================================================

macro_rules! impl_variant_int {
    ($($ty:ty),*) => {
        $(
            impl FromVariant for $ty {
                fn from_variant(variant: &Variant) -> Result<Self, ConversionError> {
                    match variant {
                        Variant::Int(v) => <$ty>::try_from(*v).map_err(|_| {
                            ConversionError::IntegerOverflow {
                                value: *v,
                                target_type: stringify!($ty),
                            }
                        }),
                        other => Err(mismatch(VariantType::Int, other)),
                    }
                }

                fn variant_type() -> VariantType {
                    VariantType::Int
                }
            }

            impl IntoVariant for $ty {
                fn into_variant(self) -> Variant {
                    Variant::Int(self as i64)
                }
            }
        )*
    };
}

impl_variant_int!(i8, i16, i32, i64, u8, u16, u32);

// u64 travels as the same 64 bits; values above i64::MAX appear negative to
// the host.
impl FromVariant for u64 {
    fn from_variant(variant: &Variant) -> Result<Self, ConversionError> {
        match variant {
            Variant::Int(v) => Ok(*v as u64),
            other => Err(mismatch(VariantType::Int, other)),
        }
    }

    fn variant_type() -> VariantType {
        VariantType::Int
    }
}

impl IntoVariant for u64 {
    fn into_variant(self) -> Variant {
        Variant::Int(self as i64)
    }
}

// ============================================================================
// Float implementations
// ============================================================================

impl FromVariant for f64 {
    fn from_variant(variant: &Variant) -> Result<Self, ConversionError> {
        match variant {
            Variant::Float(v) => Ok(*v),
            other => Err(mismatch(VariantType::Float, other)),
        }
    }

    fn variant_type() -> VariantType {
        VariantType::Float
    }
}

impl IntoVariant for f64 {
    fn into_variant(self) -> Variant {
        Variant::Float(self)
    }
}

impl FromVariant for f32 {
    fn from_variant(variant: &Variant) -> Result<Self, ConversionError> {
        f64::from_variant(variant).map(|v| v as f32)
    }

    fn variant_type() -> VariantType {
        VariantType::Float
    }
}

impl IntoVariant for f32 {
    fn into_variant(self) -> Variant {
        Variant::Float(self as f64)
    }
}

// ============================================================================
// Arms holding the Rust type directly
// ============================================================================

macro_rules! impl_variant_arm {
    ($($ty:ty => $arm:ident),* $(,)?) => {
        $(
            impl FromVariant for $ty {
                fn from_variant(variant: &Variant) -> Result<Self, ConversionError> {
                    match variant {
                        Variant::$arm(v) => Ok(v.clone()),
                        other => Err(mismatch(VariantType::$arm, other)),
                    }
                }

                fn variant_type() -> VariantType {
                    VariantType::$arm
                }
            }

            impl IntoVariant for $ty {
                fn into_variant(self) -> Variant {
                    Variant::$arm(self)
                }
            }
        )*
    };
}

impl_variant_arm!(
    bool => Bool,
    String => String,
    StringName => StringName,
    Vec2 => Vector2,
    IVec2 => Vector2i,
    Vec3 => Vector3,
    IVec3 => Vector3i,
    Vec4 => Vector4,
    IVec4 => Vector4i,
    Quat => Quaternion,
    Mat3 => Basis,
    Affine2 => Transform2D,
    Affine3A => Transform3D,
    Mat4 => Projection,
    Color => Color,
    Rid => Rid,
    ObjectRef => Object,
    VariantArray => Array,
    Dictionary => Dictionary,
    PackedArray<u8> => PackedByteArray,
    PackedArray<i32> => PackedInt32Array,
    PackedArray<i64> => PackedInt64Array,
    PackedArray<f32> => PackedFloat32Array,
    PackedArray<f64> => PackedFloat64Array,
    PackedArray<String> => PackedStringArray,
    PackedArray<Vec2> => PackedVector2Array,
    PackedArray<Vec3> => PackedVector3Array,
    PackedArray<Color> => PackedColorArray,
    PackedArray<Vec4> => PackedVector4Array,
);

impl IntoVariant for &str {
    fn into_variant(self) -> Variant {
        Variant::String(self.to_owned())
    }
}

// ============================================================================
// Nullable and unit
// ============================================================================

impl<T: IntoVariant> IntoVariant for Option<T> {
    fn into_variant(self) -> Variant {
        match self {
            Some(value) => value.into_variant(),
            None => Variant::Nil,
        }
    }
}

impl<T: FromVariant> FromVariant for Option<T> {
    fn from_variant(variant: &Variant) -> Result<Self, ConversionError> {
        match variant {
            Variant::Nil => Ok(None),
            other => T::from_variant(other).map(Some),
        }
    }

    fn variant_type() -> VariantType {
        T::variant_type()
    }
}

impl IntoVariant for () {
    fn into_variant(self) -> Variant {
        Variant::Nil
    }
}

impl FromVariant for () {
    fn from_variant(variant: &Variant) -> Result<Self, ConversionError> {
        match variant {
            Variant::Nil => Ok(()),
            other => Err(mismatch(VariantType::Nil, other)),
        }
    }
}

// ============================================================================
// Std collections through the shared container arms
// ============================================================================

impl<T: IntoVariant> IntoVariant for Vec<T> {
    fn into_variant(self) -> Variant {
        Variant::Array(self.into_iter().map(IntoVariant::into_variant).collect())
    }
}

impl<T: FromVariant> FromVariant for Vec<T> {
    fn from_variant(variant: &Variant) -> Result<Self, ConversionError> {
        match variant {
            Variant::Array(array) => array.with(|items| items.iter().map(T::from_variant).collect()),
            other => Err(mismatch(VariantType::Array, other)),
        }
    }

    fn variant_type() -> VariantType {
        VariantType::Array
    }
}

impl<K, V, S> IntoVariant for HashMap<K, V, S>
where
    K: IntoVariant,
    V: IntoVariant,
{
    fn into_variant(self) -> Variant {
        Variant::Dictionary(
            self.into_iter()
                .map(|(k, v)| (k.into_variant(), v.into_variant()))
                .collect(),
        )
    }
}

impl<K, V, S> FromVariant for HashMap<K, V, S>
where
    K: FromVariant + Eq + Hash,
    V: FromVariant,
    S: BuildHasher + Default,
{
    fn from_variant(variant: &Variant) -> Result<Self, ConversionError> {
        match variant {
            Variant::Dictionary(dict) => dict
                .entries()
                .iter()
                .map(|(k, v)| Ok((K::from_variant(k)?, V::from_variant(v)?)))
                .collect(),
            other => Err(mismatch(VariantType::Dictionary, other)),
        }
    }

    fn variant_type() -> VariantType {
        VariantType::Dictionary
    }
}
