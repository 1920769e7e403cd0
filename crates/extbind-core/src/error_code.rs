//! The host's numeric error enumeration and virtual-call error records.
//!
//! Many host operations return a raw integer instead of throwing; the binding
//! layer treats that integer as a closed set and passes it through unchanged.

use std::fmt;

use num_enum::{IntoPrimitive, TryFromPrimitive};

use crate::error::HostError;

/// Result codes returned by host-invoked operations.
///
/// The numbering is part of the ABI and must never be reordered.
///
/// ```
/// use extbind_core::{ErrorCode, HostError};
///
/// assert!(ErrorCode::check(0).is_ok());
/// assert_eq!(
///     ErrorCode::check(7),
///     Err(HostError::Code(ErrorCode::FileNotFound))
/// );
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, TryFromPrimitive, IntoPrimitive)]
#[repr(i64)]
pub enum ErrorCode {
    /// Operation completed successfully.
    Ok = 0,
    /// Generic failure.
    Failed = 1,
    Unavailable = 2,
    Unconfigured = 3,
    Unauthorized = 4,
    ParameterRangeError = 5,
    OutOfMemory = 6,
    FileNotFound = 7,
    FileBadDrive = 8,
    FileBadPath = 9,
    FileNoPermission = 10,
    FileAlreadyInUse = 11,
    FileCantOpen = 12,
    FileCantWrite = 13,
    FileCantRead = 14,
    FileUnrecognized = 15,
    FileCorrupt = 16,
    FileMissingDependencies = 17,
    FileEof = 18,
    CantOpen = 19,
    CantCreate = 20,
    QueryFailed = 21,
    AlreadyInUse = 22,
    Locked = 23,
    Timeout = 24,
    CantConnect = 25,
    CantResolve = 26,
    ConnectionError = 27,
    CantAcquireResource = 28,
    CantFork = 29,
    InvalidData = 30,
    InvalidParameter = 31,
    AlreadyExists = 32,
    DoesNotExist = 33,
    DatabaseCantRead = 34,
    DatabaseCantWrite = 35,
    CompilationFailed = 36,
    MethodNotFound = 37,
    LinkFailed = 38,
    ScriptFailed = 39,
    CyclicLink = 40,
    InvalidDeclaration = 41,
    DuplicateSymbol = 42,
    ParseError = 43,
    Busy = 44,
    Skip = 45,
    Help = 46,
    /// An internal host bug was detected.
    Bug = 47,
    PrinterOnFire = 48,
}

impl ErrorCode {
    /// Decode a raw code received from the host.
    pub fn from_raw(raw: i64) -> Result<Self, HostError> {
        Self::try_from(raw).map_err(|_| HostError::UnknownCode(raw))
    }

    /// Decode a raw code and turn anything but `Ok` into an error.
    pub fn check(raw: i64) -> Result<(), HostError> {
        Self::from_raw(raw)?.into_result()
    }

    pub fn into_result(self) -> Result<(), HostError> {
        match self {
            ErrorCode::Ok => Ok(()),
            code => Err(HostError::Code(code)),
        }
    }

    pub fn is_ok(self) -> bool {
        self == ErrorCode::Ok
    }

    /// Human readable description.
    pub fn description(self) -> &'static str {
        use ErrorCode::*;
        match self {
            Ok => "ok",
            Failed => "generic failure",
            Unavailable => "unavailable",
            Unconfigured => "unconfigured",
            Unauthorized => "unauthorized",
            ParameterRangeError => "parameter out of range",
            OutOfMemory => "out of memory",
            FileNotFound => "file not found",
            FileBadDrive => "bad drive",
            FileBadPath => "bad path",
            FileNoPermission => "no permission",
            FileAlreadyInUse => "file already in use",
            FileCantOpen => "can't open file",
            FileCantWrite => "can't write file",
            FileCantRead => "can't read file",
            FileUnrecognized => "file unrecognized",
            FileCorrupt => "file corrupt",
            FileMissingDependencies => "file missing dependencies",
            FileEof => "end of file",
            CantOpen => "can't open",
            CantCreate => "can't create",
            QueryFailed => "query failed",
            AlreadyInUse => "already in use",
            Locked => "locked",
            Timeout => "timeout",
            CantConnect => "can't connect",
            CantResolve => "can't resolve",
            ConnectionError => "connection error",
            CantAcquireResource => "can't acquire resource",
            CantFork => "can't fork",
            InvalidData => "invalid data",
            InvalidParameter => "invalid parameter",
            AlreadyExists => "already exists",
            DoesNotExist => "does not exist",
            DatabaseCantRead => "can't read database",
            DatabaseCantWrite => "can't write database",
            CompilationFailed => "compilation failed",
            MethodNotFound => "method not found",
            LinkFailed => "link failed",
            ScriptFailed => "script failed",
            CyclicLink => "cyclic link",
            InvalidDeclaration => "invalid declaration",
            DuplicateSymbol => "duplicate symbol",
            ParseError => "parse error",
            Busy => "busy",
            Skip => "skip",
            Help => "help",
            Bug => "bug",
            PrinterOnFire => "printer on fire",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.description(), i64::from(*self))
    }
}

// ============================================================================
// Virtual call errors
// ============================================================================

/// Why a host-issued call into extension code failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, TryFromPrimitive, IntoPrimitive)]
#[repr(i32)]
pub enum CallErrorKind {
    Ok = 0,
    InvalidMethod = 1,
    InvalidArgument = 2,
    TooManyArguments = 3,
    TooFewArguments = 4,
    InstanceIsNull = 5,
    MethodNotConst = 6,
}

impl Default for CallErrorKind {
    fn default() -> Self {
        CallErrorKind::Ok
    }
}

/// Error record written back to the host after a virtual call.
///
/// `argument` is the offending argument index (or the expected count for
/// arity errors); `expected` is the expected variant type ordinal for
/// `InvalidArgument`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(C)]
pub struct CallError {
    pub kind: CallErrorKind,
    pub argument: i32,
    pub expected: i32,
}

impl CallError {
    pub const OK: CallError = CallError {
        kind: CallErrorKind::Ok,
        argument: 0,
        expected: 0,
    };

    pub fn invalid_method() -> Self {
        Self {
            kind: CallErrorKind::InvalidMethod,
            ..Self::OK
        }
    }

    pub fn invalid_argument(argument: usize, expected: i32) -> Self {
        Self {
            kind: CallErrorKind::InvalidArgument,
            argument: argument as i32,
            expected,
        }
    }

    /// Build an arity error for a call that supplied `given` arguments to a
    /// method that takes `expected`.
    pub fn arity(given: usize, expected: usize) -> Self {
        let kind = if given > expected {
            CallErrorKind::TooManyArguments
        } else {
            CallErrorKind::TooFewArguments
        };
        Self {
            kind,
            argument: expected as i32,
            expected: 0,
        }
    }

    pub fn instance_is_null() -> Self {
        Self {
            kind: CallErrorKind::InstanceIsNull,
            ..Self::OK
        }
    }

    pub fn is_ok(&self) -> bool {
        self.kind == CallErrorKind::Ok
    }
}

impl fmt::Display for CallError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            CallErrorKind::Ok => f.write_str("ok"),
            CallErrorKind::InvalidMethod => f.write_str("invalid method"),
            CallErrorKind::InvalidArgument => write!(
                f,
                "invalid argument {} (expected variant type {})",
                self.argument, self.expected
            ),
            CallErrorKind::TooManyArguments => {
                write!(f, "too many arguments (expected {})", self.argument)
            }
            CallErrorKind::TooFewArguments => {
                write!(f, "too few arguments (expected {})", self.argument)
            }
            CallErrorKind::InstanceIsNull => f.write_str("instance is null"),
            CallErrorKind::MethodNotConst => f.write_str("method is not const"),
        }
    }
}

impl std::error::Error for CallError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numbering_is_stable() {
        assert_eq!(i64::from(ErrorCode::Ok), 0);
        assert_eq!(i64::from(ErrorCode::FileNotFound), 7);
        assert_eq!(i64::from(ErrorCode::AlreadyInUse), 22);
        assert_eq!(i64::from(ErrorCode::Timeout), 24);
        assert_eq!(i64::from(ErrorCode::Bug), 47);
        assert_eq!(i64::from(ErrorCode::PrinterOnFire), 48);
    }

    #[test]
    fn every_known_code_round_trips() {
        for raw in 0..=48 {
            let code = ErrorCode::from_raw(raw).unwrap();
            assert_eq!(i64::from(code), raw);
        }
    }

    #[test]
    fn unknown_code_is_passed_through() {
        assert_eq!(ErrorCode::from_raw(49), Err(HostError::UnknownCode(49)));
        assert_eq!(ErrorCode::from_raw(-1), Err(HostError::UnknownCode(-1)));
    }

    #[test]
    fn check_maps_ok_to_unit() {
        assert!(ErrorCode::check(0).is_ok());
        assert_eq!(
            ErrorCode::check(24),
            Err(HostError::Code(ErrorCode::Timeout))
        );
    }

    #[test]
    fn display_includes_number() {
        let text = ErrorCode::FileNotFound.to_string();
        assert!(text.contains("file not found"));
        assert!(text.contains('7'));
    }

    #[test]
    fn arity_error_kind() {
        assert_eq!(CallError::arity(3, 2).kind, CallErrorKind::TooManyArguments);
        assert_eq!(CallError::arity(1, 2).kind, CallErrorKind::TooFewArguments);
        assert_eq!(CallError::arity(1, 2).argument, 2);
    }

    #[test]
    fn call_error_display() {
        let err = CallError::invalid_argument(1, 3);
        assert!(err.to_string().contains("invalid argument 1"));
        assert!(CallError::OK.is_ok());
        assert!(!CallError::invalid_method().is_ok());
    }

    #[test]
    fn call_error_kind_numbering() {
        assert_eq!(i32::from(CallErrorKind::InstanceIsNull), 5);
        assert_eq!(
            CallErrorKind::try_from(6).unwrap(),
            CallErrorKind::MethodNotConst
        );
    }
}
