//! Incremental decoder for OpenAI-style chat completion streams.

use bytes::BytesMut;
use serde_json::Value;

use crate::engine::{EngineError, Result};

const DONE_SENTINEL: &str = "[DONE]";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SseEvent {
    Delta(String),
    Done,
}

/// Splits raw bytes into lines and decodes `data:` payloads.
///
/// Bytes are buffered until a full line is available, so chunk boundaries
/// that fall inside a line (or inside a multi-byte character) are harmless.
#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: BytesMut,
    done: bool,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk, returning every event completed by it.
    pub fn push(&mut self, chunk: &[u8]) -> Result<Vec<SseEvent>> {
        self.buffer.extend_from_slice(chunk);

        let mut events = Vec::new();
        while !self.done {
            let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') else {
                break;
            };
            let line = self.buffer.split_to(pos + 1);
            self.decode_line(&line, &mut events)?;
        }
        Ok(events)
    }

    /// Decode whatever remains once the body has ended.
    pub fn finish(&mut self) -> Result<Vec<SseEvent>> {
        let mut events = Vec::new();
        if !self.done && !self.buffer.is_empty() {
            let line = self.buffer.split();
            self.decode_line(&line, &mut events)?;
        }
        Ok(events)
    }

    fn decode_line(&mut self, raw: &[u8], events: &mut Vec<SseEvent>) -> Result<()> {
        let line = std::str::from_utf8(raw)
            .map_err(|e| EngineError::Stream(format!("invalid UTF-8 in stream: {e}")))?;
        let line = line.trim_end_matches(['\r', '\n']);

        // Comments, `event:`/`id:` fields and blank separators carry nothing we use.
        let Some(data) = line.strip_prefix("data:") else {
            return Ok(());
        };
        let data = data.strip_prefix(' ').unwrap_or(data).trim_end();
        if data.is_empty() {
            return Ok(());
        }

        if data == DONE_SENTINEL {
            self.done = true;
            events.push(SseEvent::Done);
            return Ok(());
        }

        if let Some(delta) = decode_payload(data)? {
            events.push(SseEvent::Delta(delta));
        }
        Ok(())
    }
}

/// Extract the text delta from one JSON chunk.
fn decode_payload(data: &str) -> Result<Option<String>> {
    let value: Value = serde_json::from_str(data)
        .map_err(|e| EngineError::Stream(format!("invalid chunk {data:?}: {e}")))?;

    if let Some(error) = value.get("error").filter(|e| !e.is_null()) {
        let message = error
            .get("message")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| error.to_string());
        return Err(EngineError::Upstream(message));
    }

    let Some(choice) = value.get("choices").and_then(|c| c.get(0)) else {
        return Ok(None);
    };

    let delta = [
        choice.pointer("/delta/content"),
        choice.get("text"),
    ]
    .into_iter()
    .flatten()
    .filter_map(Value::as_str)
    .find(|s| !s.is_empty());

    Ok(delta.map(str::to_string))
}
