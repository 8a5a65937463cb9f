//! Server-sent-event decoding for streamed chat completions.
//!
//! [`SseLineBuffer`] splits the raw byte stream into lines (multibyte UTF-8
//! may straddle chunk boundaries, so the split happens on bytes).
//! [`StreamAccumulator`] folds the `data:` frames into one [`Completion`].

use std::collections::BTreeMap;

use serde::Deserialize;
use tabpilot_core::{Completion, ToolCall, Usage};
use tracing::trace;

/// Terminal sentinel frame.
pub const DONE_SENTINEL: &str = "[DONE]";

/// Byte buffer yielding complete lines.
#[derive(Debug, Default)]
pub struct SseLineBuffer {
    buf: Vec<u8>,
}

impl SseLineBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Next complete line, without its terminator.
    pub fn next_line(&mut self) -> Option<String> {
        let end = self.buf.iter().position(|b| *b == b'\n')?;
        let line: Vec<u8> = self.buf.drain(..=end).collect();
        let line = String::from_utf8_lossy(&line[..end]);
        Some(line.trim_end_matches('\r').to_string())
    }

    /// Whatever is left once the stream has ended.
    pub fn finish(&mut self) -> Option<String> {
        if self.buf.is_empty() {
            return None;
        }
        let rest = std::mem::take(&mut self.buf);
        Some(String::from_utf8_lossy(&rest).trim_end_matches('\r').to_string())
    }
}

/// The payload of a `data:` line, or `None` for comments, blank lines and
/// other SSE fields.
pub fn sse_data(line: &str) -> Option<&str> {
    let line = line.trim();
    line.strip_prefix("data:").map(str::trim)
}

/// Parse a serialized argument string. Anything that is not a JSON object
/// yields an empty object.
pub fn parse_arguments(raw: &str) -> serde_json::Map<String, serde_json::Value> {
    if raw.trim().is_empty() {
        return serde_json::Map::new();
    }
    match serde_json::from_str::<serde_json::Value>(raw) {
        Ok(serde_json::Value::Object(map)) => map,
        Ok(other) => {
            trace!(value = %other, "Tool arguments are not an object, using {{}}");
            serde_json::Map::new()
        }
        Err(e) => {
            trace!(error = %e, raw = %raw, "Unparseable tool arguments, using {{}}");
            serde_json::Map::new()
        }
    }
}

/// Arguments that may arrive as a JSON string or as an inline object.
pub fn arguments_from_value(value: Option<&serde_json::Value>) -> serde_json::Map<String, serde_json::Value> {
    match value {
        Some(serde_json::Value::String(raw)) => parse_arguments(raw),
        Some(serde_json::Value::Object(map)) => map.clone(),
        _ => serde_json::Map::new(),
    }
}

/// A tool call under construction, keyed by stream index.
#[derive(Debug, Default)]
struct PartialCall {
    id: Option<String>,
    name: String,
    arguments: String,
}

/// Folds streamed frames into a single completion.
#[derive(Debug, Default)]
pub struct StreamAccumulator {
    text: String,
    calls: BTreeMap<u32, PartialCall>,
    finish_reason: Option<String>,
    usage: Option<Usage>,
    skipped: usize,
}

impl StreamAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply one frame payload. Returns the text delta it carried, if any.
    /// Malformed frames are counted and otherwise ignored.
    pub fn push_frame(&mut self, data: &str) -> Option<String> {
        let frame: StreamResponse = match serde_json::from_str(data) {
            Ok(frame) => frame,
            Err(e) => {
                self.skipped += 1;
                trace!(data = %data, error = %e, "Ignoring unparseable SSE frame");
                return None;
            }
        };

        if let Some(usage) = frame.usage {
            self.usage = Some(usage);
        }

        let choice = frame.choices.into_iter().next()?;
        if let Some(reason) = choice.finish_reason {
            self.finish_reason = Some(reason);
        }

        for delta in choice.delta.tool_calls.unwrap_or_default() {
            let call = self.calls.entry(delta.index).or_default();
            if let Some(id) = delta.id.filter(|id| !id.is_empty()) {
                call.id.get_or_insert(id);
            }
            if let Some(function) = delta.function {
                if let Some(name) = function.name {
                    call.name.push_str(&name);
                }
                if let Some(arguments) = function.arguments {
                    call.arguments.push_str(&arguments);
                }
            }
        }

        match choice.delta.content {
            Some(content) if !content.is_empty() => {
                self.text.push_str(&content);
                Some(content)
            }
            _ => None,
        }
    }

    /// Number of frames that could not be decoded.
    pub fn skipped_frames(&self) -> usize {
        self.skipped
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    /// Finalize: parse every accumulated argument string.
    pub fn finish(self) -> Completion {
        let tool_calls = self
            .calls
            .into_iter()
            .map(|(index, call)| {
                ToolCall::new(
                    call.id.unwrap_or_else(|| format!("call_{index}")),
                    call.name,
                    parse_arguments(&call.arguments),
                )
            })
            .collect();

        Completion {
            text: self.text,
            tool_calls,
            finish_reason: self.finish_reason,
            usage: self.usage,
        }
    }
}

// --- Streaming SSE types ---

/// A single SSE `data: {...}` frame.
#[derive(Debug, Deserialize)]
struct StreamResponse {
    #[serde(default)]
    choices: Vec<StreamChoice>,
    #[serde(default)]
    usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    #[serde(default)]
    delta: StreamDelta,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct StreamDelta {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<StreamToolCallDelta>>,
}

/// A tool call delta; arrives incrementally across frames.
#[derive(Debug, Deserialize)]
struct StreamToolCallDelta {
    #[serde(default)]
    index: u32,
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    function: Option<StreamFunctionDelta>,
}

#[derive(Debug, Deserialize)]
struct StreamFunctionDelta {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    arguments: Option<String>,
}
