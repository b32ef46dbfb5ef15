use conduit_core::{FormatError, SerializationError};

use crate::observer::ObserverError;

/// Errors surfaced by send, publish, and consume operations.
///
/// Transport and consumer failures carry the original error untouched so a
/// caller-supplied retry policy can inspect it.
#[derive(Debug, thiserror::Error)]
pub enum BusError {
    #[error(transparent)]
    Format(#[from] FormatError),
    #[error(transparent)]
    Serialization(#[from] SerializationError),
    #[error("operation not supported by this transport: {operation}")]
    UnsupportedOperation { operation: &'static str },
    #[error("transport failure: {0}")]
    Transport(#[source] anyhow::Error),
    #[error(transparent)]
    Observer(#[from] ObserverError),
    #[error("consumer {consumer} failed: {source}")]
    Consumer {
        consumer: &'static str,
        #[source]
        source: anyhow::Error,
    },
    #[error("filter failed: {0}")]
    Filter(#[source] anyhow::Error),
    #[error("filter panicked: {message}")]
    FilterPanicked { message: String },
    #[error("operation cancelled before transmission")]
    Cancelled,
    #[error("receive timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },
    #[error("no endpoint for address {address}")]
    EndpointNotFound { address: String },
    #[error("no serializer registered for content type {content_type:?}")]
    UnsupportedContentType { content_type: Option<String> },
    #[error("pending task did not complete: {0}")]
    PendingTaskFailed(String),
}

impl BusError {
    /// Wraps an opaque transport error.
    pub fn transport(error: impl Into<anyhow::Error>) -> Self {
        Self::Transport(error.into())
    }

    /// Wraps an opaque filter error.
    pub fn filter(error: impl Into<anyhow::Error>) -> Self {
        Self::Filter(error.into())
    }
}
