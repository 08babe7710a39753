//! Error types for dccbot
//!
//! All errors are defined here so that admission, work-area and conversion
//! failures share one taxonomy across crates.

use thiserror::Error;

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// dccbot error type
#[derive(Error, Debug)]
pub enum Error {
    // ========================================================================
    // Configuration / storage
    // ========================================================================
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Storage error: {0}")]
    Storage(String),

    // ========================================================================
    // Admission (rejected before a job exists)
    // ========================================================================
    #[error("User {0} already has a conversion in progress")]
    AlreadyRunning(String),

    #[error("User {user} has reached the limit of {limit} conversions")]
    QuotaExceeded { user: String, limit: u32 },

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    // ========================================================================
    // Job execution
    // ========================================================================
    #[error("Work area backup failed: {0}")]
    Backup(String),

    #[error("Conversion failed: {0}")]
    Conversion(String),

    #[error("Work area restore failed: {0}")]
    Restore(String),

    #[error("Cancelled")]
    Cancelled,

    // ========================================================================
    // General
    // ========================================================================
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Errors raised by admission control. These never create a job.
    pub fn is_admission(&self) -> bool {
        matches!(
            self,
            Error::AlreadyRunning(_) | Error::QuotaExceeded { .. } | Error::InvalidInput(_)
        )
    }

    /// Errors whose message can be shown to the submitting user as is
    pub fn is_user_facing(&self) -> bool {
        matches!(
            self,
            Error::AlreadyRunning(_)
                | Error::QuotaExceeded { .. }
                | Error::InvalidInput(_)
                | Error::NotFound(_)
                | Error::Conversion(_)
                | Error::Cancelled
        )
    }

    pub fn quota_exceeded(user: impl Into<String>, limit: u32) -> Self {
        Error::QuotaExceeded {
            user: user.into(),
            limit,
        }
    }
}

impl From<String> for Error {
    fn from(s: String) -> Self {
        Error::Internal(s)
    }
}

impl From<&str> for Error {
    fn from(s: &str) -> Self {
        Error::Internal(s.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_admission_classification() {
        assert!(Error::AlreadyRunning("42".into()).is_admission());
        assert!(Error::quota_exceeded("42", 5).is_admission());
        assert!(Error::InvalidInput("bad".into()).is_admission());
        assert!(!Error::Backup("missing".into()).is_admission());
        assert!(!Error::Internal("boom".into()).is_admission());
    }

    #[test]
    fn test_quota_message() {
        let err = Error::quota_exceeded("42", 5);
        assert_eq!(
            err.to_string(),
            "User 42 has reached the limit of 5 conversions"
        );
    }

    #[test]
    fn test_internal_not_user_facing() {
        assert!(!Error::Internal("boom".into()).is_user_facing());
        assert!(Error::Cancelled.is_user_facing());
    }
}
