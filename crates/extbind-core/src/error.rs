//! Error types for the binding core.
//!
//! Recoverable conditions are returned as these typed errors. Contract
//! violations are escalated through [`crate::contract::violation`].

use thiserror::Error;

use crate::error_code::ErrorCode;
use crate::handle::{RawHandle, Token};

/// Errors that can occur when unpacking a [`Variant`](crate::Variant).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConversionError {
    /// The active variant arm does not match the requested type.
    #[error("wrong variant type: expected {expected}, got {actual}")]
    WrongVariantType {
        expected: &'static str,
        actual: &'static str,
    },

    /// Integer does not fit in the requested width.
    #[error("integer overflow: value {value} does not fit in {target_type}")]
    IntegerOverflow { value: i64, target_type: &'static str },

    /// The host reported a variant type ordinal this build does not know.
    #[error("unknown variant type ordinal {0}")]
    UnknownVariantType(i64),

    /// The arm has no by-value form the host can construct a variant from.
    #[error("{0} values cannot cross the host boundary")]
    NotBridged(&'static str),

    /// An object arriving from the host could not be tracked.
    #[error("object conversion failed: {0}")]
    Handle(#[from] HandleError),
}

impl ConversionError {
    pub fn wrong_type(expected: &'static str, actual: &'static str) -> Self {
        ConversionError::WrongVariantType { expected, actual }
    }
}

/// Errors reported by the handle & ownership registry.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HandleError {
    /// The native side refused to take a reference (object already destroyed).
    #[error("stale handle {raw}: native refcount increment rejected")]
    StaleHandle { raw: RawHandle },

    /// The token's entry has been released; its slot may have been reused.
    #[error("stale token {token}: entry was already released")]
    StaleToken { token: Token },

    /// `release` was called a second time for the same token.
    #[error("double release of token {token}")]
    DoubleRelease { token: Token },

    /// The token was never issued by this registry.
    #[error("unknown token {token}")]
    UnknownToken { token: Token },

    /// The null handle cannot be tracked.
    #[error("null handle cannot be acquired")]
    NullHandle,
}

/// Errors surfaced from the host function table.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HostError {
    /// The host returned a known, non-`Ok` error code.
    #[error("host returned {0}")]
    Code(ErrorCode),

    /// The host returned a code outside the known enumeration.
    #[error("host returned unknown error code {0}")]
    UnknownCode(i64),

    /// A lookup by name came back empty.
    #[error("host has no {kind} named {name:?}")]
    NotFound { kind: &'static str, name: String },
}
