//! Test doubles shared by the unit tests in this crate.

use extbind_core::{NativeLifecycle, RawHandle};

/// Lifecycle that accepts every call and does nothing.
pub struct NullLifecycle;

impl NativeLifecycle for NullLifecycle {
    fn destroy(&self, _raw: RawHandle) {}

    fn reference(&self, _raw: RawHandle) -> bool {
        true
    }

    fn unreference(&self, _raw: RawHandle) -> bool {
        false
    }
}
