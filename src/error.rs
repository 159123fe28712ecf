//! Centralized error types for mailstash.

use std::path::PathBuf;
use thiserror::Error;

/// All errors produced by the mailstash library.
#[derive(Error, Debug)]
pub enum ExportError {
    /// I/O error with the associated file path.
    #[error("I/O error on '{path}': {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// The remote store failed to answer a page or message request.
    #[error("Transport error: {0}")]
    Transport(String),

    /// The remote store does not know the requested message.
    #[error("Message not found: {0}")]
    MessageNotFound(String),

    /// The filter specification is malformed.
    #[error("Invalid filter: {0}")]
    InvalidFilter(String),

    /// A date or timestamp string could not be parsed.
    #[error("Invalid timestamp '{0}' (expected Unix epoch, RFC 3339, YYYY-MM-DD, YYYY/MM/DD or YYYYMMDD)")]
    InvalidTimestamp(String),

    /// Checking whether a message was already exported failed.
    #[error("Could not check export state of message '{id}': {reason}")]
    DedupCheck { id: String, reason: String },

    /// A message id cannot be used as a file name in a backup directory.
    #[error("Invalid message id '{id}': {reason}")]
    InvalidMessageId { id: String, reason: String },

    /// A decrypted message could not be built into an RFC 5322 document.
    #[error("Could not assemble message '{id}': {reason}")]
    Assembly { id: String, reason: String },

    /// A sidecar record on disk is unreadable or malformed.
    #[error("Invalid export record '{path}': {reason}")]
    InvalidRecord { path: PathBuf, reason: String },

    /// The operation was cancelled.
    #[error("Operation cancelled")]
    Cancelled,

    /// A pipeline task panicked or was aborted.
    #[error("Pipeline task failed: {0}")]
    Task(String),
}

/// Convenience alias for `Result<T, ExportError>`.
pub type Result<T> = std::result::Result<T, ExportError>;

impl ExportError {
    /// Create an `Io` variant from a path and an `io::Error`.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Whether this error must stop the whole pipeline.
    ///
    /// A failed dedup check or a rejected id only loses the message it was
    /// about; the run carries on.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, Self::DedupCheck { .. } | Self::InvalidMessageId { .. })
    }
}

/// Allow `?` on `std::io::Error` when no path context is available
/// (rare, prefer `ExportError::io`).
impl From<std::io::Error> for ExportError {
    fn from(source: std::io::Error) -> Self {
        Self::Io {
            path: PathBuf::from("<unknown>"),
            source,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_per_message_errors_are_not_fatal() {
        let err = ExportError::DedupCheck {
            id: "m1".into(),
            reason: "disk".into(),
        };
        assert!(!err.is_fatal());
        let err = ExportError::InvalidMessageId {
            id: "../x".into(),
            reason: "path separator".into(),
        };
        assert!(!err.is_fatal());
        assert!(ExportError::Transport("reset".into()).is_fatal());
        assert!(ExportError::Cancelled.is_fatal());
    }

    #[test]
    fn test_io_display_includes_path() {
        let err = ExportError::io(
            "/tmp/x",
            std::io::Error::new(std::io::ErrorKind::NotFound, "gone"),
        );
        assert!(err.to_string().contains("/tmp/x"));
    }
}
