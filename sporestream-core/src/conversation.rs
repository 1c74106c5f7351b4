use serde::Serialize;

use crate::stream::{ErrorEvent, Status, StreamEvent};

/// What a UI renders: idle, "assistant is thinking", partial text, finished, failed.
#[derive(Debug, Serialize, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
#[serde(rename_all = "lowercase")]
pub enum ConversationStatus {
    #[default]
    Idle,
    Thinking,
    Streaming,
    Done,
    Error,
}

impl ConversationStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Thinking => "thinking",
            Self::Streaming => "streaming",
            Self::Done => "done",
            Self::Error => "error",
        }
    }
}

impl From<Status> for ConversationStatus {
    fn from(s: Status) -> Self {
        match s {
            Status::Thinking => Self::Thinking,
            Status::Streaming => Self::Streaming,
            Status::Done => Self::Done,
        }
    }
}

/// State of one request/response exchange.
///
/// Status only ever moves forward (idle → thinking → streaming → done) and
/// fragments are only ever appended. Anything that would break either rule is
/// dropped.
///
/// A `done` status is only what the UI shows; the exchange stays open until
/// `Complete` or an error arrives, and an error still overrides `done`.
#[derive(Debug, Clone, Default)]
pub struct ConversationState {
    status: ConversationStatus,
    fragments: Vec<String>,
    error: Option<ErrorEvent>,
    closed: bool,
}

impl ConversationState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn status(&self) -> ConversationStatus {
        self.status
    }

    pub fn fragments(&self) -> &[String] {
        &self.fragments
    }

    pub fn text(&self) -> String {
        self.fragments.concat()
    }

    pub fn error(&self) -> Option<&ErrorEvent> {
        self.error.as_ref()
    }

    /// `Complete` or an error has been applied; nothing else will be.
    pub fn is_terminal(&self) -> bool {
        self.closed
    }

    /// Start over for a new exchange.
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// The request went out; nothing has come back yet.
    pub fn begin(&mut self) {
        self.reset();
        self.status = ConversationStatus::Thinking;
    }

    /// Fold one event into the state. Returns whether anything changed.
    pub fn apply(&mut self, event: &StreamEvent) -> bool {
        let current = self.status();
        if self.closed {
            tracing::debug!(status = current.as_str(), ?event, "event after terminal state ignored");
            return false;
        }
        match event {
            StreamEvent::Status(s) => self.advance((*s).into()),
            StreamEvent::Content(text) => {
                self.advance(ConversationStatus::Streaming);
                self.fragments.push(text.clone());
                true
            }
            StreamEvent::Complete => {
                self.advance(ConversationStatus::Done);
                self.closed = true;
                true
            }
            StreamEvent::Error(e) => {
                if current == ConversationStatus::Idle {
                    tracing::debug!(message = %e.message, "error before exchange began ignored");
                    return false;
                }
                self.status = ConversationStatus::Error;
                self.error = Some(e.clone());
                self.closed = true;
                true
            }
        }
    }

    fn advance(&mut self, to: ConversationStatus) -> bool {
        if to > self.status() {
            self.status = to;
            true
        } else {
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::ErrorKind;

    #[test]
    fn typed_exchange_walks_forward() {
        let mut st = ConversationState::new();
        assert_eq!(st.status(), ConversationStatus::Idle);
        st.begin();
        assert_eq!(st.status(), ConversationStatus::Thinking);
        st.apply(&StreamEvent::Status(Status::Thinking));
        st.apply(&StreamEvent::Status(Status::Streaming));
        st.apply(&StreamEvent::Content("Keep ".into()));
        st.apply(&StreamEvent::Content("it at 15 PSI.".into()));
        st.apply(&StreamEvent::Status(Status::Done));
        assert_eq!(st.status(), ConversationStatus::Done);
        assert!(!st.is_terminal());
        st.apply(&StreamEvent::Complete);
        assert!(st.is_terminal());
        assert_eq!(st.text(), "Keep it at 15 PSI.");
        assert_eq!(st.fragments().len(), 2);
    }

    #[test]
    fn error_after_done_status_overrides_it() {
        let mut st = ConversationState::new();
        st.begin();
        st.apply(&StreamEvent::Content("x".into()));
        st.apply(&StreamEvent::Status(Status::Done));
        assert!(st.apply(&StreamEvent::error(ErrorKind::ServerSignaled, "insert failed")));
        assert_eq!(st.status(), ConversationStatus::Error);
        assert_eq!(st.error().map(|e| e.message.as_str()), Some("insert failed"));
        assert!(st.is_terminal());
        assert_eq!(st.text(), "x");
    }

    #[test]
    fn content_after_done_status_is_kept() {
        let mut st = ConversationState::new();
        st.begin();
        st.apply(&StreamEvent::Status(Status::Done));
        assert!(st.apply(&StreamEvent::Content("late".into())));
        assert_eq!(st.status(), ConversationStatus::Done);
        assert_eq!(st.text(), "late");
    }

    #[test]
    fn status_never_regresses() {
        let mut st = ConversationState::new();
        st.begin();
        st.apply(&StreamEvent::Status(Status::Streaming));
        assert!(!st.apply(&StreamEvent::Status(Status::Thinking)));
        assert_eq!(st.status(), ConversationStatus::Streaming);
    }

    #[test]
    fn content_promotes_to_streaming() {
        let mut st = ConversationState::new();
        st.begin();
        st.apply(&StreamEvent::Content("a".into()));
        assert_eq!(st.status(), ConversationStatus::Streaming);
    }

    #[test]
    fn error_short_circuits_and_is_final() {
        let mut st = ConversationState::new();
        st.begin();
        st.apply(&StreamEvent::Content("partial".into()));
        assert!(st.apply(&StreamEvent::interrupted()));
        assert_eq!(st.status(), ConversationStatus::Error);
        assert_eq!(st.error().map(|e| e.kind), Some(ErrorKind::Interrupted));
        assert!(!st.apply(&StreamEvent::Content("late".into())));
        assert!(!st.apply(&StreamEvent::Complete));
        assert_eq!(st.text(), "partial");
    }

    #[test]
    fn error_ignored_while_idle() {
        let mut st = ConversationState::new();
        assert!(!st.apply(&StreamEvent::cancelled()));
        assert_eq!(st.status(), ConversationStatus::Idle);
    }

    #[test]
    fn nothing_after_done() {
        let mut st = ConversationState::new();
        st.begin();
        st.apply(&StreamEvent::Complete);
        assert!(!st.apply(&StreamEvent::Content("x".into())));
        assert_eq!(st.text(), "");
    }

    #[test]
    fn reset_clears_everything() {
        let mut st = ConversationState::new();
        st.begin();
        st.apply(&StreamEvent::Content("x".into()));
        st.reset();
        assert_eq!(st.status(), ConversationStatus::Idle);
        assert!(st.fragments().is_empty());
        assert!(st.error().is_none());
    }
}
