//! SSE line framing shared by the relay re-encoder and the stream consumer.
//!
//! Both sides see the same wire rules: a line exists only once a `\n`
//! terminates it, only `data: ` lines carry anything, and the payload
//! `[DONE]` ends the stream.

use serde_json::json;

use crate::error::FramingError;
use crate::providers::{ChatChunk, DeltaEvent};

pub const DATA_PREFIX: &str = "data: ";
pub const DONE_SENTINEL: &str = "[DONE]";

/// Accumulates raw bytes and hands back complete lines.
///
/// Bytes are buffered rather than text so a multi-byte character split
/// across two reads is decoded only once it is whole.
#[derive(Debug, Default)]
pub struct LineBuffer {
    pending: Vec<u8>,
}

impl LineBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `bytes` and drain every line they complete, in order. A
    /// trailing `\r` is stripped so `\r\n` framing behaves like `\n`.
    pub fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        self.pending.extend_from_slice(bytes);

        let mut lines = Vec::new();
        let mut start = 0;
        while let Some(offset) = self.pending[start..].iter().position(|&b| b == b'\n') {
            let end = start + offset;
            let mut line = &self.pending[start..end];
            if let [rest @ .., b'\r'] = line {
                line = rest;
            }
            lines.push(String::from_utf8_lossy(line).into_owned());
            start = end + 1;
        }
        self.pending.drain(..start);
        lines
    }

    /// Bytes held back waiting for a newline.
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn clear(&mut self) {
        self.pending.clear();
    }
}

/// What a single complete line means.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SseLine<'a> {
    /// `data: [DONE]`
    Done,
    /// `data: <payload>` with the prefix removed.
    Data(&'a str),
    /// Comments, keepalives, `event:` fields, blank separators.
    Ignored,
}

pub fn classify(line: &str) -> SseLine<'_> {
    match line.strip_prefix(DATA_PREFIX) {
        Some(DONE_SENTINEL) => SseLine::Done,
        Some(payload) => SseLine::Data(payload),
        None => SseLine::Ignored,
    }
}

/// Extract the first choice's text delta from an upstream chat-completion
/// fragment. `Ok(None)` means a well-formed fragment with nothing to emit.
pub fn parse_upstream_payload(payload: &str) -> Result<Option<String>, FramingError> {
    let chunk: ChatChunk = serde_json::from_str(payload)?;
    Ok(chunk.first_delta().map(str::to_string))
}

/// Decode a relay event payload as produced by [`format_delta_event`].
pub fn parse_delta_payload(payload: &str) -> Result<DeltaEvent, FramingError> {
    Ok(serde_json::from_str(payload)?)
}

/// Encode one text delta as a relay SSE event.
pub fn format_delta_event(text: &str) -> String {
    format!("data: {}\n\n", json!({ "content": text }))
}
