//! Recover tool calls a model wrote into its text instead of the native
//! tool-calling channel.
//!
//! Two passes, stopping at the first that finds anything:
//! 1. balanced `{...}` fragments whose `"name"` is a known tool;
//! 2. call syntax `tool_name(...)`.

use std::sync::LazyLock;

use regex::Regex;
use serde_json::{Map, Value};
use tabpilot_core::ToolCall;
use tracing::debug;

use crate::stream::arguments_from_value;

static NAME_FIELD: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r#""name"\s*:\s*"(\w+)""#).ok());

/// Extract tool calls from `text`, restricted to the `known` vocabulary.
pub fn extract_tool_calls(text: &str, known: &[&str]) -> Vec<ToolCall> {
    let mut calls = extract_json_fragments(text, known);
    if calls.is_empty() {
        calls = extract_call_syntax(text, known);
    }
    if !calls.is_empty() {
        debug!(
            tools = ?calls.iter().map(|c| c.name.as_str()).collect::<Vec<_>>(),
            "Recovered tool calls from text"
        );
    }
    calls
}

fn next_id(calls: &[ToolCall]) -> String {
    format!("extracted_{}", calls.len())
}

/// Pass 1: JSON objects naming a known tool.
fn extract_json_fragments(text: &str, known: &[&str]) -> Vec<ToolCall> {
    let mut calls = Vec::new();
    let mut pos = 0;

    while let Some(offset) = text[pos..].find('{') {
        let start = pos + offset;
        let Some(end) = balanced_end(text, start) else {
            pos = start + 1;
            continue;
        };
        let fragment = &text[start..end];

        match serde_json::from_str::<Value>(fragment) {
            Ok(Value::Object(obj)) => {
                if let Some(name) = obj.get("name").and_then(Value::as_str)
                    && known.contains(&name)
                {
                    let arguments = arguments_from_value(obj.get("arguments"));
                    calls.push(ToolCall::new(next_id(&calls), name, arguments));
                    pos = end;
                    continue;
                }
            }
            Ok(_) => {}
            Err(_) => {
                let named = NAME_FIELD
                    .as_ref()
                    .and_then(|re| re.captures(fragment))
                    .and_then(|caps| caps.get(1))
                    .map(|m| m.as_str())
                    .filter(|name| known.contains(name));
                if let Some(name) = named {
                    calls.push(ToolCall::new(next_id(&calls), name, Map::new()));
                    pos = end;
                    continue;
                }
            }
        }

        // Not a tool call at this level; nested objects may still be
        pos = start + 1;
    }

    calls
}

/// Byte offset just past the `}` closing the object that opens at `start`.
/// String literals are skipped so braces inside them do not count.
fn balanced_end(text: &str, start: usize) -> Option<usize> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (i, c) in text[start..].char_indices() {
        if in_string {
            match c {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth = depth.saturating_sub(1);
                if depth == 0 {
                    return Some(start + i + 1);
                }
            }
            _ => {}
        }
    }
    None
}

/// Pass 2: `tool_name(...)` call syntax, in vocabulary order.
fn extract_call_syntax(text: &str, known: &[&str]) -> Vec<ToolCall> {
    let mut calls = Vec::new();

    for tool in known {
        // Anchored at a word boundary: `preread_page()` names no tool.
        let pattern = format!(r"\b{}\s*\(([^)]*)\)", regex::escape(tool));
        let Ok(re) = Regex::new(&pattern) else {
            continue;
        };
        for caps in re.captures_iter(text) {
            let inner = caps.get(1).map(|m| m.as_str().trim()).unwrap_or_default();
            let arguments = match serde_json::from_str::<Value>(inner) {
                Ok(Value::Object(map)) => map,
                _ => Map::new(),
            };
            calls.push(ToolCall::new(next_id(&calls), *tool, arguments));
        }
    }

    calls
}
