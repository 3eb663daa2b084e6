//! Error types for RingDB

use crate::Timestamp;
use thiserror::Error;

/// Result type alias for RingDB operations
pub type Result<T> = std::result::Result<T, RingError>;

/// RingDB error types
#[derive(Error, Debug)]
pub enum RingError {
    /// IO operation failed
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Malformed or missing configuration fields
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Bad update-batch shape or over-length source name
    #[error("validation error: {0}")]
    Validation(String),

    /// Archive file missing when an update or status was requested
    #[error("database unavailable: no archive file for subsystem '{subsystem}'")]
    Unavailable {
        /// Subsystem whose archive file is absent
        subsystem: String,
    },

    /// Archive creation failed or files still absent after the attempt
    #[error("provisioning failed: database '{database}' not created")]
    Provisioning {
        /// Database base name
        database: String,
    },

    /// Sample refused by the archive layer, without caller context
    #[error("sample rejected: {0}")]
    SampleRejected(String),

    /// Update refused by the storage backend
    #[error("update rejected for '{subsystem}' at {timestamp}: {detail}")]
    UpdateRejected {
        /// Subsystem the batch was addressed to
        subsystem: String,
        /// Resolved sample timestamp (UTC seconds)
        timestamp: Timestamp,
        /// Backend rejection detail
        detail: String,
    },

    /// Lookup key not present in the schema
    #[error("not found: {0}")]
    NotFound(String),

    /// Data corruption detected
    #[error("data corruption: {0}")]
    Corruption(String),

    /// Checksum mismatch
    #[error("checksum mismatch: expected {expected}, got {actual}")]
    ChecksumMismatch { expected: u32, actual: u32 },

    /// Invalid data format
    #[error("invalid format: {0}")]
    InvalidFormat(String),
}

impl RingError {
    /// Check if the error is recoverable by the caller (corrected input
    /// or a provisioning pass may succeed on retry)
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            RingError::Validation(_)
                | RingError::Unavailable { .. }
                | RingError::SampleRejected(_)
                | RingError::UpdateRejected { .. }
                | RingError::NotFound(_)
        )
    }

    /// Check if the error indicates archive-file corruption
    pub fn is_corruption(&self) -> bool {
        matches!(
            self,
            RingError::Corruption(_) | RingError::ChecksumMismatch { .. }
        )
    }
}
