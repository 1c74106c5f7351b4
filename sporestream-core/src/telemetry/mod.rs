//! Telemetry primitives for streamed exchanges.
//!
//! Spans are emitted through `tracing` under [`keys::SPAN_EXCHANGE`]. Structured
//! records go to a [`TelemetrySink`] handed to the session that owns the
//! exchange; nothing is emitted when no sink is given.

pub mod keys;
pub mod types;
#[cfg(test)]
pub mod test_span;

pub use keys::*;
pub use types::*;

use std::sync::{Arc, Mutex};

/// Implement this to receive one record per finished exchange.
///
/// Requirements:
/// - Implementations must be thread-safe (`Send + Sync`) and `'static`.
/// - `record_exchange` may be called from any task; implementations should avoid panicking.
pub trait TelemetrySink: Send + Sync + 'static {
    fn record_exchange(&self, log: ExchangeLog);
}

/// Keeps every record in memory. Handy for tests and the CLI summary.
#[derive(Debug, Default)]
pub struct MemorySink {
    logs: Mutex<Vec<ExchangeLog>>,
}

impl MemorySink {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn logs(&self) -> Vec<ExchangeLog> {
        self.logs.lock().map(|l| l.clone()).unwrap_or_default()
    }
}

impl TelemetrySink for MemorySink {
    fn record_exchange(&self, log: ExchangeLog) {
        if let Ok(mut logs) = self.logs.lock() {
            logs.push(log);
        }
    }
}

/// Writes each record as one JSON line at info level.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl TelemetrySink for TracingSink {
    fn record_exchange(&self, log: ExchangeLog) {
        match serde_json::to_string(&log) {
            Ok(line) => tracing::info!(target: "sporestream::exchange", "{line}"),
            Err(e) => tracing::warn!(error = %e, "exchange log not serializable"),
        }
    }
}
