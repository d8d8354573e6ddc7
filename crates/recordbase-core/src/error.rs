//! Core error types.

use thiserror::Error;

/// Core engine errors.
///
/// `PermissionDenied` and `NotFound` are routine outcomes that callers are
/// expected to translate into typed results. `Validation` and
/// `Configuration` describe what to fix in a definition and never carry
/// record payload values.
#[derive(Debug, Error)]
pub enum Error {
    /// The acting user's ability does not cover the requested action.
    #[error("permission denied: {0}")]
    PermissionDenied(String),

    /// The id does not resolve to a visible entity.
    #[error("not found: {0}")]
    NotFound(String),

    /// Malformed condition, expression, pipeline stage, identifier shape or payload.
    #[error("validation error: {0}")]
    Validation(String),

    /// Resource, form or role definitions are internally inconsistent.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Storage layer error.
    #[error("storage error: {0}")]
    Storage(#[from] sled::Error),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Stored bytes could not be interpreted.
    #[error("corrupt data: {0}")]
    Corrupt(String),
}

impl Error {
    /// Whether this error is an ability denial.
    pub fn is_permission_denied(&self) -> bool {
        matches!(self, Error::PermissionDenied(_))
    }

    /// Whether this error is a missing or invisible entity.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound(_))
    }

    /// Whether this error should be reported as a fault rather than a normal outcome.
    pub fn is_fault(&self) -> bool {
        matches!(
            self,
            Error::Storage(_) | Error::Serialization(_) | Error::Corrupt(_)
        )
    }
}

/// Result type for core operations.
pub type Result<T> = std::result::Result<T, Error>;
