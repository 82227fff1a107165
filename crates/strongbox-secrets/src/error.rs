//! Error types for the secret lifecycle core.
//!
//! Two layers:
//! - [`BackendError`]: classified failures of a storage adapter
//! - [`Error`]: what the [`SecretService`](crate::SecretService) reports to callers

use std::fmt;

use strongbox_audit::AuditError;
use thiserror::Error;

/// Classified failure of a backend adapter.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BackendError {
    /// The backend could not be reached. Transient; retried with backoff.
    #[error("backend unreachable: {reason}")]
    Unreachable {
        /// What went wrong.
        reason: String,
    },

    /// The key or version does not exist.
    #[error("not found: {what}")]
    NotFound {
        /// The missing item.
        what: String,
    },

    /// Optimistic version check failed, or the version is in the wrong state.
    #[error("conflict: {reason}")]
    Conflict {
        /// What collided.
        reason: String,
    },

    /// The backend's own authentication refused the call.
    #[error("backend permission denied: {reason}")]
    PermissionDenied {
        /// The backend's explanation.
        reason: String,
    },

    /// Stored data could not be decoded or decrypted.
    #[error("storage error: {reason}")]
    Storage {
        /// What went wrong.
        reason: String,
    },
}

impl BackendError {
    /// Returns true if retrying the same call may succeed.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Unreachable { .. })
    }

    pub(crate) fn not_found(what: impl fmt::Display) -> Self {
        Self::NotFound {
            what: what.to_string(),
        }
    }

    pub(crate) fn storage(reason: impl fmt::Display) -> Self {
        Self::Storage {
            reason: reason.to_string(),
        }
    }
}

/// Result type for backend operations.
pub type BackendResult<T> = std::result::Result<T, BackendError>;

/// A startup-time routing misconfiguration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("routing error: {reason}")]
pub struct RoutingError {
    /// What is misconfigured.
    pub reason: String,
}

impl RoutingError {
    pub(crate) fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

/// Coarse error classification for programmatic handling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Routing misconfiguration.
    Routing,
    /// Backend failure.
    Provider,
    /// Key or version absent.
    NotFound,
    /// Optimistic write collision.
    Conflict,
    /// Denied by policy.
    AccessDenied,
    /// Rotation candidate failed live validation.
    Validation,
    /// Audit entry could not be recorded.
    AuditWriteFailure,
    /// Malformed secret key.
    InvalidKey,
    /// Invalid configuration.
    Config,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Routing => "routing",
            Self::Provider => "provider",
            Self::NotFound => "not_found",
            Self::Conflict => "conflict",
            Self::AccessDenied => "access_denied",
            Self::Validation => "validation",
            Self::AuditWriteFailure => "audit_write_failure",
            Self::InvalidKey => "invalid_key",
            Self::Config => "config",
        };
        f.write_str(name)
    }
}

/// Errors reported by the secret service.
#[derive(Debug, Error)]
pub enum Error {
    /// No backend can serve a key. Raised at startup only.
    #[error(transparent)]
    Routing(#[from] RoutingError),

    /// The backend failed.
    #[error("backend '{backend}' failed: {source}")]
    Provider {
        /// The backend id.
        backend: String,
        /// The classified backend failure.
        #[source]
        source: BackendError,
    },

    /// Key or version absent.
    #[error("secret not found: {what}")]
    NotFound {
        /// The missing item.
        what: String,
    },

    /// Optimistic write collision.
    #[error("conflict: {reason}")]
    Conflict {
        /// What collided.
        reason: String,
    },

    /// Denied by the access policy engine.
    #[error("access denied: {reason}")]
    AccessDenied {
        /// The decision's explanation.
        reason: String,
    },

    /// A rotation candidate failed validation and was rolled back.
    #[error("rotation validation failed: {reason}")]
    Validation {
        /// Why the candidate was rejected.
        reason: String,
    },

    /// The audit entry could not be durably recorded; the operation is failed.
    #[error("audit write failed: {0}")]
    AuditWriteFailure(#[source] AuditError),

    /// The secret key is malformed.
    #[error("invalid secret key: {reason}")]
    InvalidKey {
        /// Why the key was rejected.
        reason: String,
    },

    /// Configuration could not be loaded or is invalid.
    #[error("configuration error: {reason}")]
    Config {
        /// What is wrong.
        reason: String,
    },
}

impl Error {
    /// Maps a backend failure, keeping not-found and conflict distinct.
    pub fn from_backend(backend: &str, err: BackendError) -> Self {
        match err {
            BackendError::NotFound { what } => Self::NotFound { what },
            BackendError::Conflict { reason } => Self::Conflict { reason },
            source => Self::Provider {
                backend: backend.to_string(),
                source,
            },
        }
    }

    /// Returns the error classification.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::Routing(_) => ErrorKind::Routing,
            Self::Provider { .. } => ErrorKind::Provider,
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::Conflict { .. } => ErrorKind::Conflict,
            Self::AccessDenied { .. } => ErrorKind::AccessDenied,
            Self::Validation { .. } => ErrorKind::Validation,
            Self::AuditWriteFailure(_) => ErrorKind::AuditWriteFailure,
            Self::InvalidKey { .. } => ErrorKind::InvalidKey,
            Self::Config { .. } => ErrorKind::Config,
        }
    }

    /// Returns true if the caller may retry the same request.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        match self {
            Self::Provider { source, .. } => source.is_retryable(),
            _ => false,
        }
    }

    pub(crate) fn config(reason: impl fmt::Display) -> Self {
        Self::Config {
            reason: reason.to_string(),
        }
    }
}

/// Result type alias for service operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test]
    fn backend_errors_classify_retryability() {
        assert!(BackendError::Unreachable { reason: "timeout".into() }.is_retryable());
        assert!(!BackendError::Conflict { reason: "v2".into() }.is_retryable());
        assert!(!BackendError::PermissionDenied { reason: "token".into() }.is_retryable());
        assert!(!BackendError::not_found("db/prod").is_retryable());
    }

    #[test_case(BackendError::not_found("k"), ErrorKind::NotFound)]
    #[test_case(BackendError::Conflict { reason: "r".into() }, ErrorKind::Conflict)]
    #[test_case(BackendError::Unreachable { reason: "r".into() }, ErrorKind::Provider)]
    #[test_case(BackendError::PermissionDenied { reason: "r".into() }, ErrorKind::Provider)]
    #[test_case(BackendError::storage("bad"), ErrorKind::Provider)]
    fn from_backend_kinds(err: BackendError, expected: ErrorKind) {
        assert_eq!(Error::from_backend("vault", err).kind(), expected);
    }

    #[test]
    fn only_unreachable_provider_errors_are_retryable() {
        let transient = Error::from_backend(
            "vault",
            BackendError::Unreachable {
                reason: "connection refused".into(),
            },
        );
        assert!(transient.is_retryable());
        assert!(!Error::AccessDenied { reason: "no".into() }.is_retryable());
        assert!(!Error::from_backend("vault", BackendError::storage("x")).is_retryable());
    }

    #[test]
    fn error_display_formats_correctly() {
        let err = Error::from_backend(
            "files",
            BackendError::Unreachable {
                reason: "disk offline".into(),
            },
        );
        assert_eq!(
            err.to_string(),
            "backend 'files' failed: backend unreachable: disk offline"
        );
        assert_eq!(ErrorKind::AuditWriteFailure.to_string(), "audit_write_failure");
    }
}
