//! Error types for the audit logging system.

use thiserror::Error;

/// Errors that can occur during audit logging operations.
///
/// Any failure to append is fatal for the operation being audited: callers
/// must treat the originating operation as failed.
#[derive(Debug, Error)]
pub enum AuditError {
    /// The audit sink could not be written or synced.
    #[error("audit write failed: {0}")]
    Io(#[from] std::io::Error),

    /// Failed to serialize or parse an entry.
    #[error("audit serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The audit sink refuses writes.
    #[error("audit log unavailable: {0}")]
    Unavailable(String),

    /// Invalid hashing key material.
    #[error("invalid audit hash key: {0}")]
    InvalidKey(String),
}

/// Result type alias for audit operations.
pub type Result<T> = std::result::Result<T, AuditError>;
