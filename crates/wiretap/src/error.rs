//! Error types shared by the interception pipeline.

use serde::Serialize;

/// Errors surfaced by the interception pipeline.
///
/// A wait that times out is not an error: `wait_for` returns `None` and
/// `wait_for_many` returns the partial result set.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CaptureError {
    #[error("Request is not eligible for interception: {0}")]
    InterceptionIneligible(String),
    #[error("Transport task was cancelled")]
    TransportCancelled,
    #[error("Transport failed: {0}")]
    TransportFailed(String),
    #[error("Failed to read request body: {0}")]
    BodyRead(String),
}

impl CaptureError {
    /// Short machine-readable kind, used for error snapshots and metrics labels.
    pub fn kind(&self) -> ErrorKind {
        match self {
            CaptureError::InterceptionIneligible(_) => ErrorKind::Ineligible,
            CaptureError::TransportCancelled => ErrorKind::Cancelled,
            CaptureError::TransportFailed(_) => ErrorKind::TransportFailed,
            CaptureError::BodyRead(_) => ErrorKind::BodyRead,
        }
    }
}

/// Session-level error reported with a `Completed` event.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("cancelled")]
    Cancelled,
    #[error("{0}")]
    Failed(String),
}

impl From<TransportError> for CaptureError {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::Cancelled => CaptureError::TransportCancelled,
            TransportError::Failed(cause) => CaptureError::TransportFailed(cause),
        }
    }
}

impl From<hyper_util::client::legacy::Error> for TransportError {
    fn from(err: hyper_util::client::legacy::Error) -> Self {
        TransportError::Failed(err.to_string())
    }
}

impl From<hyper::Error> for TransportError {
    fn from(err: hyper::Error) -> Self {
        TransportError::Failed(err.to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Ineligible,
    Cancelled,
    TransportFailed,
    BodyRead,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Ineligible => "ineligible",
            ErrorKind::Cancelled => "cancelled",
            ErrorKind::TransportFailed => "transport_failed",
            ErrorKind::BodyRead => "body_read",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transport_error_conversion() {
        assert_eq!(
            CaptureError::from(TransportError::Cancelled),
            CaptureError::TransportCancelled
        );
        assert_eq!(
            CaptureError::from(TransportError::Failed("connection refused".into())),
            CaptureError::TransportFailed("connection refused".into())
        );
    }

    #[test]
    fn test_error_kind_labels() {
        assert_eq!(CaptureError::TransportCancelled.kind().as_str(), "cancelled");
        assert_eq!(
            CaptureError::BodyRead("eof".into()).kind(),
            ErrorKind::BodyRead
        );
    }
}
