use std::collections::HashMap;
use std::sync::Arc;

use crate::config::Config;
use crate::consumer::StreamConsumer;
use crate::error::CoreResult;
use crate::session::ChatSession;
use crate::telemetry::TelemetrySink;

/// Live sessions by conversation id (a post id, a thread id, ...).
///
/// Owned by whatever drives several conversations at once; there is no
/// process-wide instance.
pub struct StreamRegistry {
    cfg: Config,
    consumer: StreamConsumer,
    sink: Option<Arc<dyn TelemetrySink>>,
    sessions: HashMap<String, ChatSession>, // conversation id -> session
}

impl StreamRegistry {
    pub fn from_config(cfg: &Config) -> CoreResult<Self> {
        Ok(Self {
            consumer: StreamConsumer::from_config(cfg)?,
            cfg: cfg.clone(),
            sink: None,
            sessions: HashMap::new(),
        })
    }

    /// Every session created from now on reports to this sink.
    pub fn with_sink(mut self, sink: Arc<dyn TelemetrySink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Session for a conversation, created on first use with the shared consumer.
    pub fn session(&mut self, conversation_id: &str) -> &mut ChatSession {
        let consumer = &self.consumer;
        let overlap = self.cfg.stream.overlap;
        let sink = &self.sink;
        self.sessions
            .entry(conversation_id.to_string())
            .or_insert_with(|| {
                let s = ChatSession::new(consumer.clone(), overlap)
                    .with_conversation_id(conversation_id);
                match sink {
                    Some(sink) => s.with_sink(sink.clone()),
                    None => s,
                }
            })
    }

    pub fn get(&self, conversation_id: &str) -> Option<&ChatSession> {
        self.sessions.get(conversation_id)
    }

    pub fn is_streaming(&self, conversation_id: &str) -> bool {
        self.sessions
            .get(conversation_id)
            .is_some_and(ChatSession::is_streaming)
    }

    /// Conversation ids with a live exchange, sorted.
    pub fn streaming_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .sessions
            .iter()
            .filter(|(_, s)| s.is_streaming())
            .map(|(id, _)| id.clone())
            .collect();
        ids.sort();
        ids
    }

    /// Returns whether a session by that id existed.
    pub fn cancel(&mut self, conversation_id: &str) -> bool {
        match self.sessions.get_mut(conversation_id) {
            Some(s) => {
                s.cancel();
                true
            }
            None => false,
        }
    }

    pub fn cancel_all(&mut self) {
        for s in self.sessions.values_mut() {
            s.cancel();
        }
    }

    /// Drop sessions that are not streaming. Returns how many were removed.
    pub fn prune_finished(&mut self) -> usize {
        let before = self.sessions.len();
        self.sessions.retain(|_, s| s.is_streaming());
        let removed = before - self.sessions.len();
        if removed > 0 {
            tracing::debug!(removed, remaining = self.sessions.len(), "pruned finished sessions");
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}
