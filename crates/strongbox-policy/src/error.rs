//! Error types for policy loading and validation.

use thiserror::Error;

/// Errors that can occur while building or loading policies.
///
/// Evaluation itself never fails: a request that cannot be matched is denied.
#[derive(Debug, Error)]
pub enum PolicyError {
    /// A pattern could not be compiled.
    #[error("invalid pattern '{pattern}': {reason}")]
    InvalidPattern {
        /// The offending pattern.
        pattern: String,
        /// Why it was rejected.
        reason: String,
    },

    /// A policy failed validation.
    #[error("invalid policy '{id}': {reason}")]
    InvalidPolicy {
        /// The policy identifier.
        id: String,
        /// Why it was rejected.
        reason: String,
    },

    /// A policy source could not be read.
    #[error("policy source error: {0}")]
    Io(#[from] std::io::Error),

    /// A policy document could not be parsed.
    #[error("policy parse error: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Result type alias for policy operations.
pub type Result<T> = std::result::Result<T, PolicyError>;
