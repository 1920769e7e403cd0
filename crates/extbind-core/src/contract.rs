//! Escalation path for contract violations.
//!
//! A contract violation means the extension and the host no longer agree on
//! the ABI, or calling code broke a documented invariant. Continuing would
//! risk corrupting native memory, so these abort the current call with a
//! diagnostic instead of returning an error.

use std::fmt;

/// Log `err` and panic.
#[cold]
#[track_caller]
pub fn violation(err: impl fmt::Display) -> ! {
    let location = std::panic::Location::caller();
    tracing::error!(%location, "contract violation: {err}");
    panic!("contract violation: {err}");
}

/// Unwrap a result, escalating the error as a contract violation.
#[track_caller]
pub fn enforce<T, E: fmt::Display>(result: Result<T, E>) -> T {
    match result {
        Ok(value) => value,
        Err(err) => violation(err),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    #[should_panic(expected = "contract violation: boom")]
    fn violation_panics_with_context() {
        violation("boom");
    }

    #[test]
    fn enforce_passes_ok_through() {
        assert_eq!(enforce::<_, String>(Ok(5)), 5);
    }

    #[test]
    #[should_panic(expected = "contract violation")]
    fn enforce_escalates_err() {
        enforce::<(), _>(Err("mismatch"));
    }
}
