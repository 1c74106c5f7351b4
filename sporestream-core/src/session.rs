use std::sync::Arc;
use std::time::Instant;

use futures_util::StreamExt;

use crate::config::{Config, OverlapPolicy};
use crate::consumer::{CancelHandle, EventStream, StreamConsumer};
use crate::conversation::{ConversationState, ConversationStatus};
use crate::error::{CoreResult, StreamError};
use crate::model::StreamRequest;
use crate::stream::{ErrorKind, StreamEvent};
use crate::telemetry::{ExchangeLog, TelemetrySink};

/// Final result of a drained exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transcript {
    pub status: ConversationStatus,
    pub text: String,
    pub error: Option<String>,
}

struct Active {
    events: EventStream,
    log: ExchangeLog,
    started: Instant,
}

/// One conversation: a consumer, its state and at most one live exchange.
pub struct ChatSession {
    consumer: StreamConsumer,
    conversation_id: Option<String>,
    overlap: OverlapPolicy,
    state: ConversationState,
    active: Option<Active>,
    sink: Option<Arc<dyn TelemetrySink>>,
}

impl ChatSession {
    pub fn new(consumer: StreamConsumer, overlap: OverlapPolicy) -> Self {
        Self {
            consumer,
            conversation_id: None,
            overlap,
            state: ConversationState::new(),
            active: None,
            sink: None,
        }
    }

    pub fn from_config(cfg: &Config) -> CoreResult<Self> {
        Ok(Self::new(StreamConsumer::from_config(cfg)?, cfg.stream.overlap))
    }

    pub fn with_conversation_id(mut self, id: impl Into<String>) -> Self {
        self.conversation_id = Some(id.into());
        self
    }

    pub fn with_sink(mut self, sink: Arc<dyn TelemetrySink>) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn conversation_id(&self) -> Option<&str> {
        self.conversation_id.as_deref()
    }

    pub fn state(&self) -> &ConversationState {
        &self.state
    }

    /// An exchange is open and its stream has not yet handed out a terminal event.
    ///
    /// A `done` status alone does not end it; the body may still carry
    /// `complete` or an error.
    pub fn is_streaming(&self) -> bool {
        self.active.as_ref().is_some_and(|a| !a.events.is_drained())
    }

    pub fn cancel_handle(&self) -> Option<CancelHandle> {
        self.active.as_ref().map(|a| a.events.cancel_handle())
    }

    /// Open a new exchange, applying the overlap policy to any live one.
    pub async fn start(&mut self, request: StreamRequest) -> CoreResult<()> {
        if request.messages.is_empty() {
            return Err(StreamError::Validation("request has no messages".into()));
        }
        if self.is_streaming() {
            match self.overlap {
                OverlapPolicy::Reject => return Err(StreamError::Busy),
                OverlapPolicy::CancelPrevious => {
                    tracing::debug!(
                        conversation.id = self.conversation_id().unwrap_or(""),
                        "cancelling previous exchange"
                    );
                    self.cancel();
                }
            }
        }
        self.finish_active();

        self.state.begin();
        let log = ExchangeLog::new()
            .conversation_id_opt(self.conversation_id.as_deref())
            .request_id_opt(request.request_id.as_deref());
        let started = Instant::now();

        match self.consumer.open(&request, self.conversation_id.as_deref()).await {
            Ok(events) => {
                self.active = Some(Active { events, log, started });
                Ok(())
            }
            Err(e) => {
                self.state.apply(&StreamEvent::error(ErrorKind::Transport, e.to_string()));
                self.emit(log.outcome("connection_error").error_message(&e.to_string()), started);
                Err(e)
            }
        }
    }

    /// Pull the next event, fold it into the state and hand it back.
    ///
    /// `None` once the exchange is over, or if none was started.
    pub async fn next_event(&mut self) -> Option<StreamEvent> {
        let active = self.active.as_mut()?;
        match active.events.next().await {
            Some(ev) => {
                self.state.apply(&ev);
                if ev.is_terminal() {
                    self.finish_active();
                }
                Some(ev)
            }
            None => {
                self.finish_active();
                None
            }
        }
    }

    /// Drain the live exchange.
    pub async fn collect(&mut self) -> Transcript {
        while self.next_event().await.is_some() {}
        Transcript {
            status: self.state.status(),
            text: self.state.text(),
            error: self.state.error().map(|e| e.message.clone()),
        }
    }

    /// Cancel the live exchange. The state moves to `Error{Cancelled}`
    /// unless it had already finished. Idempotent.
    pub fn cancel(&mut self) {
        let Some(active) = self.active.as_mut() else {
            return;
        };
        active.events.cancel();
        if !self.state.is_terminal() {
            self.state.apply(&StreamEvent::cancelled());
        }
        self.finish_active();
    }

    fn finish_active(&mut self) {
        if let Some(active) = self.active.take() {
            let mut log = active.log.schema(self.consumer_schema());
            if let Some(status) = active.events.http_status() {
                log = log.http_status(status);
            }
            if let Some(ms) = active.events.latency_ms() {
                log = log.latency_ms(ms as u64);
            }
            self.emit(log.from_state(&self.state), active.started);
        }
    }

    fn consumer_schema(&self) -> &str {
        self.consumer.schema_name()
    }

    fn emit(&self, log: ExchangeLog, started: Instant) {
        if let Some(sink) = &self.sink {
            sink.record_exchange(log.duration_ms(started.elapsed().as_millis() as u64));
        }
    }
}

impl std::fmt::Debug for ChatSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChatSession")
            .field("conversation_id", &self.conversation_id)
            .field("status", &self.state.status())
            .field("streaming", &self.is_streaming())
            .finish()
    }
}
