use serde::Serialize;

use crate::conversation::ConversationState;

/// Structured record of one finished exchange.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ExchangeLog {
    pub conversation_id: Option<String>,
    pub request_id: Option<String>,
    pub schema: Option<String>,
    pub http_status: Option<u16>,
    pub latency_ms: Option<u64>,
    pub duration_ms: Option<u64>,

    /// "complete" or an error kind such as "interrupted".
    pub outcome: Option<String>,
    pub error_message: Option<String>,

    pub fragments: usize,
    pub chars: usize,
}

impl ExchangeLog {
    pub fn new() -> Self { Self::default() }
    pub fn conversation_id_opt(mut self, v: Option<&str>) -> Self { self.conversation_id = v.map(|s| s.to_string()); self }
    pub fn request_id_opt(mut self, v: Option<&str>) -> Self { self.request_id = v.map(|s| s.to_string()); self }
    pub fn schema(mut self, v: &str) -> Self { self.schema = Some(v.to_string()); self }
    pub fn http_status(mut self, v: u16) -> Self { self.http_status = Some(v); self }
    pub fn latency_ms(mut self, v: u64) -> Self { self.latency_ms = Some(v); self }
    pub fn duration_ms(mut self, v: u64) -> Self { self.duration_ms = Some(v); self }
    pub fn outcome(mut self, v: &str) -> Self { self.outcome = Some(v.to_string()); self }
    pub fn error_message(mut self, v: &str) -> Self { self.error_message = Some(v.to_string()); self }

    /// Fill outcome, error and size counters from a finished state.
    pub fn from_state(mut self, state: &ConversationState) -> Self {
        self.fragments = state.fragments().len();
        self.chars = state.fragments().iter().map(|f| f.chars().count()).sum();
        match state.error() {
            Some(e) => {
                self.outcome = Some(e.kind.as_str().to_string());
                self.error_message = Some(e.message.clone());
            }
            None => self.outcome = Some(state.status().as_str().to_string()),
        }
        self
    }
}
