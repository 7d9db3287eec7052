//! Error types for the core library.

use thiserror::Error;

use crate::attachment::FileAccessError;
use crate::recipients::EmptySourceError;
use crate::report::DeliveryReport;

/// Input problems detected before any message is sent.
#[derive(Debug, Error)]
pub enum ValidationError {
    /// The request names no file.
    #[error("No files to deliver")]
    NoFiles,

    /// A file to deliver is missing, not a regular file, or unreadable.
    #[error(transparent)]
    File(#[from] FileAccessError),

    /// The recipient source could not be read.
    #[error("Cannot read delivery list: {0}")]
    RecipientSource(#[source] std::io::Error),

    /// The recipient source holds no valid address.
    #[error(transparent)]
    EmptyRecipients(#[from] EmptySourceError),
}

/// Failures to establish or use a transport session.
#[derive(Debug, Error)]
pub enum SessionError {
    /// Network, TLS, greeting or EHLO failure.
    #[error("Connection failed: {0}")]
    Connection(String),

    /// The server rejected the credentials.
    #[error("Authentication failed: {0}")]
    Authentication(String),

    /// The operation did not finish within the configured timeout.
    #[error("Timed out after {0:?}")]
    Timeout(std::time::Duration),

    /// `send` was called on a session that is not authenticated.
    #[error("Session is not open")]
    NotOpen,
}

/// Errors that end a delivery run.
#[derive(Debug, Error)]
pub enum DeliveryError {
    /// Inputs were rejected; nothing was sent.
    #[error("Validation failed: {0}")]
    Validation(#[from] ValidationError),

    /// A session could not be opened; nothing was sent.
    #[error("Delivery aborted: {0}")]
    Aborted(#[from] SessionError),

    /// The run was cancelled; the report covers the recipients attempted so far.
    #[error("Delivery cancelled after {} recipient(s)", .0.total_attempted())]
    Cancelled(DeliveryReport),
}

impl DeliveryError {
    /// Returns the partial report of a cancelled run.
    #[must_use]
    pub const fn partial_report(&self) -> Option<&DeliveryReport> {
        match self {
            Self::Cancelled(report) => Some(report),
            _ => None,
        }
    }
}

/// Result type alias using [`DeliveryError`].
pub type Result<T> = std::result::Result<T, DeliveryError>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn validation_errors_convert() {
        let err: DeliveryError =
            ValidationError::from(FileAccessError::NotFound(PathBuf::from("/nope.txt"))).into();
        assert!(matches!(
            err,
            DeliveryError::Validation(ValidationError::File(FileAccessError::NotFound(_)))
        ));
        assert!(err.to_string().contains("/nope.txt"));
        assert!(err.partial_report().is_none());
    }

    #[test]
    fn cancelled_carries_report() {
        let err = DeliveryError::Cancelled(DeliveryReport::default());
        assert_eq!(err.partial_report(), Some(&DeliveryReport::default()));
        assert_eq!(err.to_string(), "Delivery cancelled after 0 recipient(s)");
    }
}
