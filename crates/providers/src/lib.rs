//! Completion client implementations for TabPilot.
//!
//! The client implements `tabpilot_core::CompletionClient` against any
//! OpenAI-compatible endpoint. Streamed responses are folded by
//! [`stream::StreamAccumulator`]; tool calls a model writes as plain text
//! are recovered by [`extract::extract_tool_calls`].

pub mod extract;
pub mod openai_compat;
pub mod stream;

pub use extract::extract_tool_calls;
pub use openai_compat::OpenAiCompatClient;
pub use stream::{StreamAccumulator, parse_arguments};
