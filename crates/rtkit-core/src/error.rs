//! Error types for the rtkit service

use thiserror::Error;

/// Result type for caller-facing operations
pub type GrantResult<T> = Result<T, GrantError>;

/// Result type for OS backend operations
pub type BackendResult<T> = Result<T, BackendError>;

/// Errors reported to a caller on its deferred-reply channel.
///
/// Every failure is resolved where it is detected and sent as one of these;
/// there is no retry.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GrantError {
    /// Target process or thread does not exist or does not match
    #[error("invalid arguments: {0}")]
    InvalidArgs(String),

    /// Ownership mismatch, authorization denied or rate limit exceeded
    #[error("access denied: {0}")]
    AccessDenied(String),

    /// Backend syscall failure or unrecognized priority class
    #[error("failed: {0}")]
    Failed(String),
}

impl GrantError {
    pub fn invalid_args(msg: impl Into<String>) -> Self {
        GrantError::InvalidArgs(msg.into())
    }

    pub fn access_denied(msg: impl Into<String>) -> Self {
        GrantError::AccessDenied(msg.into())
    }

    pub fn failed(msg: impl Into<String>) -> Self {
        GrantError::Failed(msg.into())
    }

    /// Wire taxonomy name, forwarded verbatim by transports.
    pub fn name(&self) -> &'static str {
        match self {
            GrantError::InvalidArgs(_) => "org.freedesktop.DBus.Error.InvalidArgs",
            GrantError::AccessDenied(_) => "org.freedesktop.DBus.Error.AccessDenied",
            GrantError::Failed(_) => "org.freedesktop.DBus.Error.Failed",
        }
    }

    /// Human-readable message without the taxonomy prefix
    pub fn message(&self) -> &str {
        match self {
            GrantError::InvalidArgs(m) | GrantError::AccessDenied(m) | GrantError::Failed(m) => m,
        }
    }
}

/// OS privilege backend errors
#[derive(Debug, Error)]
pub enum BackendError {
    /// Backend could not be initialized (fatal at start-up)
    #[error("privilege backend unavailable: {0}")]
    Unavailable(String),

    /// Process enumeration was entered while already in progress
    #[error("process enumeration is not reentrant")]
    ReentrantEnumeration,

    /// Underlying I/O failure
    #[error("backend I/O error: {0}")]
    Io(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_names() {
        assert_eq!(
            GrantError::invalid_args("x").name(),
            "org.freedesktop.DBus.Error.InvalidArgs"
        );
        assert_eq!(
            GrantError::access_denied("x").name(),
            "org.freedesktop.DBus.Error.AccessDenied"
        );
        assert_eq!(GrantError::failed("x").name(), "org.freedesktop.DBus.Error.Failed");
    }

    #[test]
    fn test_error_display() {
        let e = GrantError::access_denied("You are calling too often");
        assert_eq!(format!("{}", e), "access denied: You are calling too often");
        assert_eq!(e.message(), "You are calling too often");

        let e = BackendError::ReentrantEnumeration;
        assert_eq!(format!("{}", e), "process enumeration is not reentrant");
    }

    #[test]
    fn test_io_conversion() {
        let io = std::io::Error::from(std::io::ErrorKind::NotFound);
        let e: BackendError = io.into();
        assert!(matches!(e, BackendError::Io(_)));
    }
}
