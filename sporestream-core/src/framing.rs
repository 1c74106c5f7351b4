//! Line framing for `data:`-prefixed chunked bodies.

const DATA_PREFIX: &str = "data: ";
const DONE_SENTINEL: &str = "[DONE]";

/// One classified line of the body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Frame<'a> {
    /// `data: [DONE]`
    Done,
    /// `data: <payload>`, payload already trimmed.
    Data(&'a str),
    /// Anything else: blank keep-alives, comments, `event:` lines.
    Ignored,
}

impl<'a> Frame<'a> {
    pub fn classify(line: &'a str) -> Self {
        let Some(rest) = line.strip_prefix(DATA_PREFIX) else {
            return Frame::Ignored;
        };
        let payload = rest.trim();
        if payload == DONE_SENTINEL {
            Frame::Done
        } else {
            Frame::Data(payload)
        }
    }
}

/// Longest unterminated line kept while waiting for its `\n`.
pub const MAX_LINE_BYTES: usize = 1 << 20;

/// Byte buffer that splits on `\n` across arbitrary chunk boundaries.
///
/// Splitting happens on raw bytes, so a UTF-8 sequence cut in half by the
/// transport is only decoded once its line is complete.
#[derive(Debug)]
pub struct LineBuffer {
    buf: Vec<u8>,
    limit: usize,
}

impl Default for LineBuffer {
    fn default() -> Self {
        Self::with_limit(MAX_LINE_BYTES)
    }
}

impl LineBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_limit(limit: usize) -> Self {
        Self { buf: Vec::new(), limit }
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    /// The pending partial line has outgrown the limit.
    pub fn is_over_limit(&self) -> bool {
        self.buf.len() > self.limit
    }

    /// Drop any pending partial line.
    pub fn clear(&mut self) {
        self.buf.clear();
    }

    /// Append a chunk and return every line it completed, without terminators.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buf.extend_from_slice(chunk);
        let mut lines = Vec::new();
        let mut start = 0;
        while let Some(rel) = self.buf[start..].iter().position(|&b| b == b'\n') {
            let end = start + rel;
            lines.push(decode_line(&self.buf[start..end]));
            start = end + 1;
        }
        self.buf.drain(..start);
        lines
    }

    /// Take whatever unterminated tail is left, if any.
    pub fn finish(&mut self) -> Option<String> {
        if self.buf.is_empty() {
            return None;
        }
        let tail = std::mem::take(&mut self.buf);
        Some(decode_line(&tail))
    }

    pub fn pending(&self) -> usize {
        self.buf.len()
    }
}

fn decode_line(bytes: &[u8]) -> String {
    let bytes = bytes.strip_suffix(b"\r").unwrap_or(bytes);
    String::from_utf8_lossy(bytes).into_owned()
}
