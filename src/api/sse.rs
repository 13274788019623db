//! Server-sent event decoding for streamed completions

use super::models::ChatCompletionChunk;
use crate::error::{ChatError, Result};
use crate::metrics::METRICS;
use bytes::{Buf, BytesMut};
use tracing::debug;

/// Prefix of every payload line
pub const DATA_MARKER: &str = "data: ";
/// Payload that ends the stream
pub const DONE_SENTINEL: &str = "[DONE]";

/// Meaningful content of one stream line
#[derive(Debug, Clone)]
pub enum StreamEvent {
    Chunk(ChatCompletionChunk),
    Done,
}

/// Parse a single line. Blank lines, comments and other fields yield `None`.
pub fn parse_line(line: &str) -> Result<Option<StreamEvent>> {
    let line = line.trim_end_matches('\r');
    if line.trim().is_empty() {
        return Ok(None);
    }

    let payload = match line
        .strip_prefix(DATA_MARKER)
        .or_else(|| line.strip_prefix("data:"))
    {
        Some(payload) => payload.trim(),
        None => return Ok(None),
    };

    if payload == DONE_SENTINEL {
        return Ok(Some(StreamEvent::Done));
    }

    serde_json::from_str::<ChatCompletionChunk>(payload)
        .map(|chunk| Some(StreamEvent::Chunk(chunk)))
        .map_err(|e| ChatError::MalformedStreamChunk(format!("{}: {}", e, payload)))
}

/// Splits a byte stream into lines and decodes them.
///
/// Bytes are buffered until a full line is present, so multi-byte
/// characters split across network chunks decode correctly.
#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: BytesMut,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed raw bytes, returning every event completed by them
    pub fn push(&mut self, bytes: &[u8]) -> Vec<StreamEvent> {
        self.buffer.extend_from_slice(bytes);

        let mut events = Vec::new();
        while let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') {
            let line = self.buffer.split_to(pos);
            self.buffer.advance(1);
            if let Some(event) = Self::decode(&line) {
                events.push(event);
            }
        }
        events
    }

    /// Flush a trailing line that was not newline-terminated
    pub fn finish(&mut self) -> Option<StreamEvent> {
        if self.buffer.is_empty() {
            return None;
        }
        let line = self.buffer.split();
        Self::decode(&line)
    }

    fn decode(line: &[u8]) -> Option<StreamEvent> {
        let text = String::from_utf8_lossy(line);
        match parse_line(&text) {
            Ok(event) => event,
            Err(e) => {
                debug!("Skipping stream line: {}", e);
                METRICS.malformed_chunks.inc();
                None
            }
        }
    }
}
