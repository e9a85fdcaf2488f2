//! Crate error types
//!
//! Every failure raised by the store, executor, pipeline and lifecycle
//! controller is one of these kinds. Errors propagate unmodified to the
//! caller; transactional rollback is the only automatic recovery.

use thiserror::Error;

/// Result type used across the crate
pub type Result<T> = std::result::Result<T, Error>;

/// Crate error kinds
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    /// Malformed or unsupported caller input
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    /// Permission, editability or validation-state violation
    #[error("forbidden: {0}")]
    Forbidden(String),

    /// Lookup miss when existence is required
    #[error("record not exists: {0}")]
    RecordNotExists(String),

    /// Uniqueness violation on create
    #[error("duplicated record: {0}")]
    DuplicatedRecord(String),

    /// Internal invariant violation on an outgoing value
    #[error("invalid response: {0}")]
    InvalidResponse(String),

    /// Misuse of the storage layer
    #[error("database exception: {0}")]
    DatabaseException(String),
}

impl Error {
    /// Create an invalid parameter error
    pub fn invalid_parameter(msg: impl Into<String>) -> Self {
        Self::InvalidParameter(msg.into())
    }

    /// Create a forbidden error
    pub fn forbidden(msg: impl Into<String>) -> Self {
        Self::Forbidden(msg.into())
    }

    /// Create a record not exists error
    pub fn record_not_exists(msg: impl Into<String>) -> Self {
        Self::RecordNotExists(msg.into())
    }

    /// Create a duplicated record error
    pub fn duplicated_record(msg: impl Into<String>) -> Self {
        Self::DuplicatedRecord(msg.into())
    }

    /// Create an invalid response error
    pub fn invalid_response(msg: impl Into<String>) -> Self {
        Self::InvalidResponse(msg.into())
    }

    /// Create a database exception
    pub fn database_exception(msg: impl Into<String>) -> Self {
        Self::DatabaseException(msg.into())
    }

    /// Get error code for API responses
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidParameter(_) => "INVALID_PARAMETER",
            Self::Forbidden(_) => "FORBIDDEN",
            Self::RecordNotExists(_) => "RECORD_NOT_EXISTS",
            Self::DuplicatedRecord(_) => "DUPLICATED_RECORD",
            Self::InvalidResponse(_) => "INVALID_RESPONSE",
            Self::DatabaseException(_) => "DATABASE_EXCEPTION",
        }
    }

    /// Get HTTP status code for the outer resource layer
    pub fn status_code(&self) -> u16 {
        match self {
            Self::InvalidParameter(_) => 400,
            Self::Forbidden(_) => 403,
            Self::RecordNotExists(_) => 404,
            Self::DuplicatedRecord(_) => 409,
            Self::InvalidResponse(_) => 500,
            Self::DatabaseException(_) => 500,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        assert_eq!(Error::invalid_parameter("x").status_code(), 400);
        assert_eq!(Error::forbidden("x").status_code(), 403);
        assert_eq!(Error::record_not_exists("x").status_code(), 404);
        assert_eq!(Error::duplicated_record("x").status_code(), 409);
        assert_eq!(Error::invalid_response("x").status_code(), 500);
        assert_eq!(Error::database_exception("x").status_code(), 500);
    }

    #[test]
    fn test_error_display() {
        let err = Error::forbidden("host web-1 is not editable");
        assert_eq!(format!("{}", err), "forbidden: host web-1 is not editable");
        assert_eq!(err.code(), "FORBIDDEN");
    }
}
