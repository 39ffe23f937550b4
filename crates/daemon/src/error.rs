//! Error taxonomy for the shrink daemon.
//!
//! Subsystems carry their own error enums (probe, encode, replace); everything
//! that crosses an operation boundary rolls up into [`Error`] so callers and
//! the HTTP layer see a single set of kinds.

use thiserror::Error;

/// Top-level error type for daemon operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Malformed input: bad setting bound, bad exclusion type, missing field.
    #[error("Validation failed for '{field}': {message}")]
    Validation { field: String, message: String },

    /// Referenced entity does not exist.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Unique constraint violation or a busy singleton slot.
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Any other database failure.
    #[error("Storage error: {0}")]
    Storage(sqlx::Error),

    /// Probe tool exited non-zero or produced unusable output.
    #[error("Probe failed: {0}")]
    ProbeFailed(String),

    /// The probed file has no video stream.
    #[error("No video stream found")]
    NoVideoStream,

    /// Transcoder exited non-zero after the CPU-decode retry.
    #[error("Encode failed: {0}")]
    EncodeFailed(String),

    /// Copy/rename/unlink failure during scratch handling or safe replace.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The current encode or scan was cancelled.
    #[error("Cancelled")]
    Cancelled,
}

impl Error {
    /// Validation error helper naming the offending field.
    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Validation {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl From<sqlx::Error> for Error {
    fn from(e: sqlx::Error) -> Self {
        if let sqlx::Error::Database(ref db) = e {
            if matches!(db.kind(), sqlx::error::ErrorKind::UniqueViolation) {
                return Error::Conflict(db.message().to_string());
            }
        }
        Error::Storage(e)
    }
}

impl From<crate::probe::ProbeError> for Error {
    fn from(e: crate::probe::ProbeError) -> Self {
        match e {
            crate::probe::ProbeError::NoVideoStream => Error::NoVideoStream,
            other => Error::ProbeFailed(other.to_string()),
        }
    }
}

/// Convenience alias used throughout the crate.
pub type Result<T, E = Error> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_helper_carries_field() {
        let err = Error::validation("bitrate_factor", "must be in (0, 1]");
        match err {
            Error::Validation { field, message } => {
                assert_eq!(field, "bitrate_factor");
                assert!(message.contains("(0, 1]"));
            }
            other => panic!("Expected Validation, got {:?}", other),
        }
    }

    #[test]
    fn test_probe_error_maps_to_kinds() {
        let err: Error = crate::probe::ProbeError::NoVideoStream.into();
        assert!(matches!(err, Error::NoVideoStream));

        let err: Error = crate::probe::ProbeError::Failed("boom".to_string()).into();
        assert!(matches!(err, Error::ProbeFailed(_)));
    }
}
