use thiserror::Error;

/// Core error type for sporestream.
/// Internally, modules can use `anyhow::Result<T>` for convenience,
/// but public boundaries should expose `CoreResult<T>` with this error.
///
/// Only failures that happen before an exchange produces events live here.
/// Everything that goes wrong mid-stream is delivered as a terminal
/// [`crate::stream::StreamEvent::Error`] instead.
#[derive(Debug, Error)]
pub enum StreamError {
    #[error("validation failed: {0}")]
    Validation(String),

    /// The endpoint answered with a non-success status.
    #[error("connection failed with status {status}: {message}")]
    Connection { status: u16, message: String },

    /// The request never got a response (DNS, TCP, TLS, timeout).
    #[error("endpoint unavailable: {reason}")]
    Unavailable { reason: String },

    /// A session refused to start a second exchange while one is in flight.
    #[error("an exchange is already streaming for this conversation")]
    Busy,

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl StreamError {
    /// True for the `ConnectionError` family: the exchange was never established.
    pub fn is_connection(&self) -> bool {
        matches!(self, Self::Connection { .. } | Self::Unavailable { .. })
    }
}

pub type CoreResult<T> = std::result::Result<T, StreamError>;
