/// Span/log attribute keys for one streamed exchange.
/// Keep these stable; changing them is a breaking change for dashboards.
pub const SPAN_EXCHANGE: &str = "sse.exchange";

pub const KEY_CONVERSATION_ID: &str = "conversation.id";
pub const KEY_REQUEST_ID: &str = "req.id";
pub const KEY_SCHEMA: &str = "stream.schema";
pub const KEY_HTTP_STATUS: &str = "http.status";
pub const KEY_LATENCY_MS: &str = "latency.ms";

/// "complete", or the error kind that ended the exchange.
pub const KEY_OUTCOME: &str = "stream.outcome";
pub const KEY_FRAGMENTS: &str = "stream.fragments";
pub const KEY_CHARS: &str = "stream.chars";
