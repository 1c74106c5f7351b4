//! Event types produced by an exchange.
//!
//! Contract:
//! - An exchange yields 0..n `Status` and `Content` events in byte-arrival order.
//! - The stream **must** terminate with exactly one terminal event: `Complete` or `Error`.
//! - After a terminal event, no further events are emitted.

use serde::{Deserialize, Serialize};

/// Progress reported by the server (or inferred from the first content fragment).
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Thinking,
    Streaming,
    Done,
}

impl Status {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "thinking" => Some(Self::Thinking),
            "streaming" => Some(Self::Streaming),
            "done" => Some(Self::Done),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Thinking => "thinking",
            Self::Streaming => "streaming",
            Self::Done => "done",
        }
    }
}

/// Why an exchange ended abnormally.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// The server sent an explicit error payload.
    ServerSignaled,
    /// The body ended before a terminal frame was seen.
    Interrupted,
    /// Reading the body failed at the transport level.
    Transport,
    /// The caller cancelled the exchange.
    Cancelled,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ServerSignaled => "server_signaled",
            Self::Interrupted => "interrupted",
            Self::Transport => "transport",
            Self::Cancelled => "cancelled",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorEvent {
    pub kind: ErrorKind,
    pub message: String,
}

/// What the caller receives incrementally.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    Status(Status),
    /// Partial assistant text. Concatenating all of them yields the reply.
    Content(String),
    /// Normal end of stream.
    Complete,
    /// Abnormal end of stream.
    Error(ErrorEvent),
}

impl StreamEvent {
    pub fn error(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self::Error(ErrorEvent { kind, message: message.into() })
    }

    /// The synthetic event emitted when the body closes without a terminal frame.
    pub fn interrupted() -> Self {
        Self::error(ErrorKind::Interrupted, "connection closed")
    }

    pub fn cancelled() -> Self {
        Self::error(ErrorKind::Cancelled, "cancelled")
    }

    /// Returns true if this event terminates the stream (`Complete` or `Error`).
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Complete | Self::Error(_))
    }

    /// Convenience accessor for `Content` text.
    pub fn as_text_delta(&self) -> Option<&str> {
        match self {
            Self::Content(s) => Some(s.as_str()),
            _ => None,
        }
    }
}
