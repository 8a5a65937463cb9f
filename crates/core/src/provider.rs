//! Completion client trait: the abstraction over the remote model endpoint.
//!
//! A client knows how to send a transcript plus the tool schemas to an
//! OpenAI-compatible endpoint and reconstruct the assistant's text and tool
//! calls, streamed or in one shot.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::ProviderError;
use crate::message::{ConversationTurn, ToolCall};

/// A tool definition sent to the model so it knows what it can call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    /// JSON Schema of the arguments object
    pub parameters: serde_json::Value,
}

/// Everything one completion call needs.
#[derive(Clone)]
pub struct CompletionRequest {
    /// Bearer credential; may be absent for locally hosted models
    pub credential: Option<String>,
    pub model: String,
    pub messages: Vec<ConversationTurn>,
    pub tools: Vec<ToolDefinition>,
    /// Prepended as a system turn
    pub system_prompt: Option<String>,
    pub max_tokens: u32,
    pub temperature: f32,
}

impl std::fmt::Debug for CompletionRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompletionRequest")
            .field("credential", &self.credential.as_ref().map(|_| "***"))
            .field("model", &self.model)
            .field("messages", &self.messages.len())
            .field("tools", &self.tools.len())
            .field("system_prompt", &self.system_prompt.is_some())
            .field("max_tokens", &self.max_tokens)
            .field("temperature", &self.temperature)
            .finish()
    }
}

/// Token usage information.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Usage {
    #[serde(default)]
    pub prompt_tokens: u32,
    #[serde(default)]
    pub completion_tokens: u32,
    #[serde(default)]
    pub total_tokens: u32,
}

/// The reconstructed assistant turn.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Completion {
    pub text: String,
    pub tool_calls: Vec<ToolCall>,
    pub finish_reason: Option<String>,
    pub usage: Option<Usage>,
}

impl Completion {
    pub fn has_tool_calls(&self) -> bool {
        !self.tool_calls.is_empty()
    }
}

/// Callback receiving each text delta as it arrives.
pub type TextSink<'a> = &'a (dyn Fn(&str) + Send + Sync);

/// The completion endpoint seam.
///
/// With `on_text` the response is streamed and every text delta is forwarded
/// as it arrives; without it a single request/response round trip is made.
#[async_trait]
pub trait CompletionClient: Send + Sync {
    /// A human-readable name for logs.
    fn name(&self) -> &str;

    async fn complete(
        &self,
        request: CompletionRequest,
        on_text: Option<TextSink<'_>>,
    ) -> Result<Completion, ProviderError>;
}
