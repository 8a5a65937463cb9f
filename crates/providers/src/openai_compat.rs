//! OpenAI-compatible completion client.
//!
//! Works with NVIDIA NIM, OpenAI, vLLM, Ollama and any endpoint exposing
//! `/chat/completions`. Models prefixed `ollama/` are routed to the local
//! endpoint and need no credential.
//!
//! Supports:
//! - Single-shot completions
//! - Streaming SSE with incremental text forwarding
//! - Tool calling, with a text fallback when the model ignores the native
//!   tool channel

use async_trait::async_trait;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use tabpilot_config::{AppConfig, LOCAL_BASE_URL, LOCAL_MODEL_PREFIX};
use tabpilot_core::error::ProviderError;
use tabpilot_core::message::{ConversationTurn, Role, ToolCall};
use tabpilot_core::provider::*;
use tracing::{debug, info, warn};

use crate::extract::extract_tool_calls;
use crate::stream::{DONE_SENTINEL, SseLineBuffer, StreamAccumulator, arguments_from_value, sse_data};

/// Bearer token sent to the local endpoint.
const LOCAL_BEARER: &str = "proxy";

/// An OpenAI-compatible completion client.
pub struct OpenAiCompatClient {
    name: String,
    base_url: String,
    local_base_url: String,
    client: reqwest::Client,
}

/// Where one request goes and how it authenticates.
#[derive(Debug, PartialEq)]
struct Endpoint {
    url: String,
    model: String,
    bearer: String,
}

impl OpenAiCompatClient {
    /// Create a client for `base_url` (without the `/chat/completions` path).
    pub fn new(name: impl Into<String>, base_url: impl Into<String>) -> Result<Self, ProviderError> {
        let client = reqwest::Client::builder()
            .connect_timeout(std::time::Duration::from_secs(30))
            .build()
            .map_err(|e| ProviderError::Network(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            name: name.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            local_base_url: LOCAL_BASE_URL.to_string(),
            client,
        })
    }

    pub fn from_config(config: &AppConfig) -> Result<Self, ProviderError> {
        Self::new("openai-compat", &config.base_url)
    }

    /// Override the endpoint used for `ollama/` models.
    pub fn with_local_base_url(mut self, url: impl Into<String>) -> Self {
        self.local_base_url = url.into().trim_end_matches('/').to_string();
        self
    }

    /// Resolve the endpoint for `model`, failing fast when a hosted model has
    /// no credential.
    fn endpoint(&self, model: &str, credential: Option<&str>) -> Result<Endpoint, ProviderError> {
        if let Some(local) = model.strip_prefix(LOCAL_MODEL_PREFIX) {
            return Ok(Endpoint {
                url: format!("{}/chat/completions", self.local_base_url),
                model: local.to_string(),
                bearer: LOCAL_BEARER.to_string(),
            });
        }

        let credential = credential
            .filter(|c| !c.trim().is_empty())
            .ok_or_else(|| ProviderError::CredentialMissing {
                model: model.to_string(),
            })?;

        Ok(Endpoint {
            url: format!("{}/chat/completions", self.base_url),
            model: model.to_string(),
            bearer: credential.to_string(),
        })
    }

    /// Convert our turns to OpenAI API format, system preamble first.
    fn to_api_messages(system_prompt: Option<&str>, messages: &[ConversationTurn]) -> Vec<ApiMessage> {
        let preamble = system_prompt.map(|p| ApiMessage {
            role: "system".into(),
            content: Some(p.to_string()),
            tool_calls: None,
            tool_call_id: None,
        });

        preamble
            .into_iter()
            .chain(messages.iter().map(|m| ApiMessage {
                role: match m.role {
                    Role::User => "user".into(),
                    Role::Assistant => "assistant".into(),
                    Role::System => "system".into(),
                    Role::Tool => "tool".into(),
                },
                content: m.content.clone(),
                tool_calls: (!m.tool_calls.is_empty()).then(|| {
                    m.tool_calls
                        .iter()
                        .map(|tc| ApiToolCall {
                            id: tc.id.clone(),
                            r#type: "function".into(),
                            function: ApiFunction {
                                name: tc.name.clone(),
                                arguments: tc.arguments_json(),
                            },
                        })
                        .collect()
                }),
                tool_call_id: m.tool_call_id.clone(),
            }))
            .collect()
    }

    /// Convert tool definitions to OpenAI API format.
    fn to_api_tools(tools: &[ToolDefinition]) -> Vec<ApiToolDefinition> {
        tools
            .iter()
            .map(|t| ApiToolDefinition {
                r#type: "function".into(),
                function: ApiToolFunction {
                    name: t.name.clone(),
                    description: t.description.clone(),
                    parameters: t.parameters.clone(),
                },
            })
            .collect()
    }

    fn request_body(request: &CompletionRequest, model: &str, stream: bool) -> serde_json::Value {
        let mut body = serde_json::json!({
            "model": model,
            "messages": Self::to_api_messages(request.system_prompt.as_deref(), &request.messages),
            "max_tokens": request.max_tokens,
            "temperature": request.temperature,
            "stream": stream,
        });

        if !request.tools.is_empty() {
            body["tools"] = serde_json::json!(Self::to_api_tools(&request.tools));
            body["tool_choice"] = serde_json::json!("auto");
        }

        body
    }

    async fn send(
        &self,
        endpoint: &Endpoint,
        body: &serde_json::Value,
        stream: bool,
    ) -> Result<reqwest::Response, ProviderError> {
        let response = self
            .client
            .post(&endpoint.url)
            .bearer_auth(&endpoint.bearer)
            .header(
                "Accept",
                if stream { "text/event-stream" } else { "application/json" },
            )
            .json(body)
            .send()
            .await
            .map_err(|e| ProviderError::Network(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let error_body = response.text().await.unwrap_or_default();
            warn!(status = status.as_u16(), body = %error_body, "Completion endpoint returned error");
            return Err(ProviderError::Transport {
                status: status.as_u16(),
                body: error_body,
            });
        }

        Ok(response)
    }

    async fn complete_single(
        &self,
        endpoint: &Endpoint,
        request: &CompletionRequest,
    ) -> Result<Completion, ProviderError> {
        let body = Self::request_body(request, &endpoint.model, false);
        let response = self.send(endpoint, &body, false).await?;

        let api_response: ApiResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::InvalidResponse(format!("Failed to parse response: {e}")))?;

        let Some(choice) = api_response.choices.into_iter().next() else {
            return Ok(Completion {
                usage: api_response.usage,
                ..Completion::default()
            });
        };

        let tool_calls = choice
            .message
            .tool_calls
            .unwrap_or_default()
            .into_iter()
            .enumerate()
            .map(|(i, tc)| {
                ToolCall::new(
                    tc.id.unwrap_or_else(|| format!("call_{i}")),
                    tc.function.name,
                    arguments_from_value(tc.function.arguments.as_ref()),
                )
            })
            .collect();

        Ok(Completion {
            text: choice.message.content.unwrap_or_default(),
            tool_calls,
            finish_reason: choice.finish_reason,
            usage: api_response.usage,
        })
    }

    async fn complete_streaming(
        &self,
        endpoint: &Endpoint,
        request: &CompletionRequest,
        on_text: TextSink<'_>,
    ) -> Result<Completion, ProviderError> {
        let body = Self::request_body(request, &endpoint.model, true);
        let response = self.send(endpoint, &body, true).await?;

        let mut byte_stream = response.bytes_stream();
        let mut lines = SseLineBuffer::new();
        let mut acc = StreamAccumulator::new();

        'read: while let Some(chunk) = byte_stream.next().await {
            let bytes = chunk.map_err(|e| ProviderError::StreamInterrupted(e.to_string()))?;
            lines.push(&bytes);

            while let Some(line) = lines.next_line() {
                let Some(data) = sse_data(&line) else {
                    continue;
                };
                if data == DONE_SENTINEL {
                    break 'read;
                }
                if let Some(delta) = acc.push_frame(data) {
                    on_text(&delta);
                }
            }
        }

        // A final frame without a trailing newline
        if let Some(line) = lines.finish()
            && let Some(data) = sse_data(&line)
            && data != DONE_SENTINEL
            && let Some(delta) = acc.push_frame(data)
        {
            on_text(&delta);
        }

        if acc.skipped_frames() > 0 {
            debug!(skipped = acc.skipped_frames(), "Skipped malformed SSE frames");
        }

        let mut completion = acc.finish();

        if completion.tool_calls.is_empty() && !completion.text.is_empty() {
            let known: Vec<&str> = request.tools.iter().map(|t| t.name.as_str()).collect();
            let extracted = extract_tool_calls(&completion.text, &known);
            if !extracted.is_empty() {
                info!(count = extracted.len(), "Using tool calls recovered from text");
                completion.tool_calls = extracted;
            }
        }

        Ok(completion)
    }
}

#[async_trait]
impl CompletionClient for OpenAiCompatClient {
    fn name(&self) -> &str {
        &self.name
    }

    async fn complete(
        &self,
        request: CompletionRequest,
        on_text: Option<TextSink<'_>>,
    ) -> Result<Completion, ProviderError> {
        let endpoint = self.endpoint(&request.model, request.credential.as_deref())?;

        debug!(
            client = %self.name,
            model = %endpoint.model,
            messages = request.messages.len(),
            streaming = on_text.is_some(),
            "Sending completion request"
        );

        match on_text {
            Some(sink) => self.complete_streaming(&endpoint, &request, sink).await,
            None => self.complete_single(&endpoint, &request).await,
        }
    }
}

// --- OpenAI API types (internal) ---

#[derive(Debug, Serialize, Deserialize)]
struct ApiMessage {
    role: String,
    content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_calls: Option<Vec<ApiToolCall>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
struct ApiToolCall {
    id: String,
    r#type: String,
    function: ApiFunction,
}

#[derive(Debug, Serialize, Deserialize)]
struct ApiFunction {
    name: String,
    arguments: String,
}

#[derive(Debug, Serialize)]
struct ApiToolDefinition {
    r#type: String,
    function: ApiToolFunction,
}

#[derive(Debug, Serialize)]
struct ApiToolFunction {
    name: String,
    description: String,
    parameters: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct ApiResponse {
    #[serde(default)]
    choices: Vec<ApiChoice>,
    #[serde(default)]
    usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
struct ApiChoice {
    message: ApiResponseMessage,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiResponseMessage {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<ApiResponseToolCall>>,
}

/// Response-side tool call; some servers omit the id or send arguments as
/// an object.
#[derive(Debug, Deserialize)]
struct ApiResponseToolCall {
    #[serde(default)]
    id: Option<String>,
    function: ApiResponseFunction,
}

#[derive(Debug, Deserialize)]
struct ApiResponseFunction {
    name: String,
    #[serde(default)]
    arguments: Option<serde_json::Value>,
}
