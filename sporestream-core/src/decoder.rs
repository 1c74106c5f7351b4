//! Payload decoding strategies and the synchronous body decoder.
//!
//! Different endpoints put different JSON inside the same `data:` framing.
//! A [`PayloadDecoder`] maps one payload to at most one [`StreamEvent`];
//! [`EventDecoder`] runs bytes through framing and a decoder and enforces
//! the terminal-event contract.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::framing::{Frame, LineBuffer};
use crate::stream::{ErrorKind, Status, StreamEvent};

/// A single payload could not be decoded. Never fatal to the stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodeError(pub String);

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<serde_json::Error> for DecodeError {
    fn from(e: serde_json::Error) -> Self {
        Self(e.to_string())
    }
}

/// Maps one `data:` payload (prefix and `[DONE]` already handled) to an event.
///
/// `Ok(None)` means the payload was understood but carries nothing for the
/// consumer.
pub trait PayloadDecoder: Send + Sync {
    fn name(&self) -> &str;
    fn decode(&self, payload: &str) -> Result<Option<StreamEvent>, DecodeError>;
}

/// Which built-in decoder an endpoint speaks.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum PayloadSchema {
    /// `{type: "status"|"content"|"complete"|"error", ...}`
    #[default]
    Typed,
    /// OpenAI chat-completions chunks, `choices[0].delta.content`.
    #[serde(rename = "openai")]
    OpenAi,
    /// AI SDK data-stream parts, `0:"text"`, `3:"error"`, `d:{...}`.
    AiSdk,
}

impl PayloadSchema {
    pub fn decoder(self) -> Arc<dyn PayloadDecoder> {
        match self {
            Self::Typed => Arc::new(TypedDecoder),
            Self::OpenAi => Arc::new(OpenAiDecoder),
            Self::AiSdk => Arc::new(AiSdkDecoder),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Typed => "typed",
            Self::OpenAi => "openai",
            Self::AiSdk => "ai_sdk",
        }
    }
}

impl std::str::FromStr for PayloadSchema {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "typed" => Ok(Self::Typed),
            "openai" => Ok(Self::OpenAi),
            "ai_sdk" | "ai-sdk" => Ok(Self::AiSdk),
            other => Err(format!("unknown payload schema '{other}'")),
        }
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct TypedDecoder;

#[derive(Deserialize)]
struct TypedPayload {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

impl PayloadDecoder for TypedDecoder {
    fn name(&self) -> &str {
        "typed"
    }

    fn decode(&self, payload: &str) -> Result<Option<StreamEvent>, DecodeError> {
        let p: TypedPayload = serde_json::from_str(payload)?;
        let ev = match p.kind.as_str() {
            "status" => p.status.as_deref().and_then(Status::parse).map(StreamEvent::Status),
            "content" => p.content.map(StreamEvent::Content),
            "complete" => Some(StreamEvent::Complete),
            "error" => Some(StreamEvent::error(
                ErrorKind::ServerSignaled,
                p.message.unwrap_or_else(|| "stream error".into()),
            )),
            _ => None,
        };
        Ok(ev)
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct OpenAiDecoder;

#[derive(Deserialize)]
struct OAChunk {
    #[serde(default)]
    choices: Vec<OAChoice>,
    #[serde(default)]
    error: Option<OAError>,
}

#[derive(Deserialize)]
struct OAChoice {
    #[serde(default)]
    delta: Option<OADelta>,
}

#[derive(Deserialize)]
struct OADelta {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Deserialize)]
struct OAError {
    #[serde(default)]
    message: Option<String>,
}

impl PayloadDecoder for OpenAiDecoder {
    fn name(&self) -> &str {
        "openai"
    }

    fn decode(&self, payload: &str) -> Result<Option<StreamEvent>, DecodeError> {
        let chunk: OAChunk = serde_json::from_str(payload)?;
        if let Some(err) = chunk.error {
            return Ok(Some(StreamEvent::error(
                ErrorKind::ServerSignaled,
                err.message.unwrap_or_else(|| "upstream error".into()),
            )));
        }
        let text = chunk
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.delta)
            .and_then(|d| d.content)
            .filter(|s| !s.is_empty());
        Ok(text.map(StreamEvent::Content))
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct AiSdkDecoder;

impl PayloadDecoder for AiSdkDecoder {
    fn name(&self) -> &str {
        "ai_sdk"
    }

    fn decode(&self, payload: &str) -> Result<Option<StreamEvent>, DecodeError> {
        let Some((code, body)) = payload.split_once(':') else {
            return Err(DecodeError(format!("missing part code in '{payload}'")));
        };
        match code {
            "0" => {
                let text: String = serde_json::from_str(body)?;
                Ok(Some(StreamEvent::Content(text)))
            }
            "3" => {
                let message = match serde_json::from_str::<Value>(body)? {
                    Value::String(s) => s,
                    v => v
                        .get("message")
                        .and_then(Value::as_str)
                        .unwrap_or("stream error")
                        .to_string(),
                };
                Ok(Some(StreamEvent::error(ErrorKind::ServerSignaled, message)))
            }
            "d" => Ok(Some(StreamEvent::Complete)),
            _ => Ok(None),
        }
    }
}

/// Adapter for call sites that want a one-off mapping from parsed JSON.
pub struct JsonFnDecoder<F> {
    name: String,
    f: F,
}

impl<F> JsonFnDecoder<F>
where
    F: Fn(&Value) -> Option<StreamEvent> + Send + Sync,
{
    pub fn new(name: impl Into<String>, f: F) -> Self {
        Self { name: name.into(), f }
    }
}

impl<F> PayloadDecoder for JsonFnDecoder<F>
where
    F: Fn(&Value) -> Option<StreamEvent> + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn decode(&self, payload: &str) -> Result<Option<StreamEvent>, DecodeError> {
        let v: Value = serde_json::from_str(payload)?;
        Ok((self.f)(&v))
    }
}

/// Bytes in, events out. No I/O, no clocks.
///
/// Once a terminal event has been produced every later byte is dropped.
pub struct EventDecoder {
    lines: LineBuffer,
    payloads: Arc<dyn PayloadDecoder>,
    terminated: bool,
    malformed: usize,
}

impl EventDecoder {
    pub fn new(payloads: Arc<dyn PayloadDecoder>) -> Self {
        Self {
            lines: LineBuffer::new(),
            payloads,
            terminated: false,
            malformed: 0,
        }
    }

    /// Cap on a single unterminated line; exceeding it ends the stream.
    pub fn with_line_limit(mut self, limit: usize) -> Self {
        self.lines = LineBuffer::with_limit(limit);
        self
    }

    pub fn is_terminated(&self) -> bool {
        self.terminated
    }

    /// Number of payloads skipped because they failed to decode.
    pub fn malformed(&self) -> usize {
        self.malformed
    }

    pub fn schema_name(&self) -> &str {
        self.payloads.name()
    }

    pub fn feed(&mut self, chunk: &[u8]) -> Vec<StreamEvent> {
        if self.terminated {
            return Vec::new();
        }
        let mut out = Vec::new();
        for line in self.lines.push(chunk) {
            self.handle_line(&line, &mut out);
            if self.terminated {
                return out;
            }
        }
        if self.lines.is_over_limit() {
            let limit = self.lines.limit();
            self.lines.clear();
            self.terminated = true;
            tracing::warn!(limit, "line exceeded limit without a newline");
            out.push(StreamEvent::error(
                ErrorKind::Transport,
                format!("line exceeds {limit} bytes without a newline"),
            ));
        }
        out
    }

    /// Transport closed: flush the tail and make the ending explicit.
    pub fn finish(&mut self) -> Vec<StreamEvent> {
        let mut out = Vec::new();
        if self.terminated {
            return out;
        }
        if let Some(tail) = self.lines.finish() {
            self.handle_line(&tail, &mut out);
        }
        if !self.terminated {
            self.terminated = true;
            out.push(StreamEvent::interrupted());
        }
        out
    }

    /// Force the terminal state without producing anything (cancel, transport error).
    pub fn terminate(&mut self) {
        self.terminated = true;
    }

    fn handle_line(&mut self, line: &str, out: &mut Vec<StreamEvent>) {
        match Frame::classify(line) {
            Frame::Ignored => {}
            Frame::Done => {
                self.terminated = true;
                out.push(StreamEvent::Complete);
            }
            Frame::Data(payload) => match self.payloads.decode(payload) {
                Ok(Some(ev)) => {
                    self.terminated = ev.is_terminal();
                    out.push(ev);
                }
                Ok(None) => {
                    tracing::debug!(schema = self.payloads.name(), "payload carried no event");
                }
                Err(e) => {
                    self.malformed += 1;
                    tracing::warn!(
                        schema = self.payloads.name(),
                        error = %e,
                        "skipping malformed chunk"
                    );
                }
            },
        }
    }
}
