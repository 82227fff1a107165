//! CLI error types.

use thiserror::Error;

/// CLI-specific errors.
#[derive(Debug, Error)]
pub enum CliError {
    /// The secret service rejected or failed the request.
    #[error(transparent)]
    Secrets(#[from] strongbox_secrets::Error),

    /// Invalid argument.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Output formatting error.
    #[error("format error: {0}")]
    Format(String),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl CliError {
    /// Process exit code for this error.
    ///
    /// Denials and not-found share a code so scripts cannot tell them apart
    /// when the service conceals denials.
    #[must_use]
    pub fn exit_code(&self) -> u8 {
        use strongbox_secrets::ErrorKind;

        match self {
            Self::Secrets(err) => match err.kind() {
                ErrorKind::NotFound | ErrorKind::AccessDenied => 3,
                ErrorKind::Conflict => 4,
                ErrorKind::Validation => 5,
                ErrorKind::AuditWriteFailure => 6,
                _ => 1,
            },
            Self::InvalidArgument(_) => 2,
            Self::Format(_) | Self::Io(_) => 1,
        }
    }
}
