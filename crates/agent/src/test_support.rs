//! Scripted doubles shared by the orchestrator and coordinator tests.

use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use serde_json::{Map, Value, json};
use tabpilot_core::error::{ActionError, ProviderError};
use tabpilot_core::message::{TabId, ToolCall};
use tabpilot_core::page::{ActionRequest, ActionResult, PageModel, TabConnection};
use tabpilot_core::provider::{Completion, CompletionClient, CompletionRequest, TextSink};
use tokio_util::sync::CancellationToken;

/// Returns a scripted sequence of completions.
///
/// Panics if more calls are made than responses provided, unless built with
/// [`ScriptedClient::repeating`].
pub struct ScriptedClient {
    responses: Mutex<Vec<Result<Completion, ProviderError>>>,
    repeat_last: bool,
    requests: Mutex<Vec<CompletionRequest>>,
}

impl ScriptedClient {
    pub fn new(responses: Vec<Result<Completion, ProviderError>>) -> Self {
        Self {
            responses: Mutex::new(responses),
            repeat_last: false,
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn completions(completions: Vec<Completion>) -> Self {
        Self::new(completions.into_iter().map(Ok).collect())
    }

    /// Answers every call with `completion`.
    pub fn repeating(completion: Completion) -> Self {
        Self {
            repeat_last: true,
            ..Self::completions(vec![completion])
        }
    }

    pub fn call_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    pub fn requests(&self) -> Vec<CompletionRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl CompletionClient for ScriptedClient {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn complete(
        &self,
        request: CompletionRequest,
        on_text: Option<TextSink<'_>>,
    ) -> Result<Completion, ProviderError> {
        let call = {
            let mut requests = self.requests.lock().unwrap();
            requests.push(request);
            requests.len()
        };
        let response = {
            let mut responses = self.responses.lock().unwrap();
            if self.repeat_last && responses.len() == 1 {
                responses[0].clone()
            } else if responses.is_empty() {
                panic!("ScriptedClient: no more responses (call #{call})");
            } else {
                responses.remove(0)
            }
        };
        if let (Ok(completion), Some(sink)) = (&response, on_text)
            && !completion.text.is_empty()
        {
            sink(&completion.text);
        }
        response
    }
}

/// Never answers; for cancellation tests.
pub struct HangingClient;

#[async_trait]
impl CompletionClient for HangingClient {
    fn name(&self) -> &str {
        "hanging"
    }

    async fn complete(
        &self,
        _request: CompletionRequest,
        _on_text: Option<TextSink<'_>>,
    ) -> Result<Completion, ProviderError> {
        std::future::pending().await
    }
}

/// Cancels its token while answering, as when a newer run replaces this one
/// mid-completion.
pub struct CancellingClient {
    cancel: CancellationToken,
    completion: Completion,
}

impl CancellingClient {
    pub fn new(cancel: CancellationToken, completion: Completion) -> Self {
        Self { cancel, completion }
    }
}

#[async_trait]
impl CompletionClient for CancellingClient {
    fn name(&self) -> &str {
        "cancelling"
    }

    async fn complete(
        &self,
        _request: CompletionRequest,
        _on_text: Option<TextSink<'_>>,
    ) -> Result<Completion, ProviderError> {
        self.cancel.cancel();
        Ok(self.completion.clone())
    }
}

/// Panics on the first call.
pub struct PanickingClient;

#[async_trait]
impl CompletionClient for PanickingClient {
    fn name(&self) -> &str {
        "panicking"
    }

    async fn complete(
        &self,
        _request: CompletionRequest,
        _on_text: Option<TextSink<'_>>,
    ) -> Result<Completion, ProviderError> {
        panic!("completion client blew up")
    }
}

pub fn text(text: &str) -> Completion {
    Completion {
        text: text.to_string(),
        finish_reason: Some("stop".into()),
        ..Default::default()
    }
}

pub fn call(id: &str, name: &str, args: Value) -> ToolCall {
    let arguments = match args {
        Value::Object(map) => map,
        _ => Map::new(),
    };
    ToolCall::new(id, name, arguments)
}

pub fn tool_calls(calls: Vec<ToolCall>) -> Completion {
    Completion {
        tool_calls: calls,
        finish_reason: Some("tool_calls".into()),
        ..Default::default()
    }
}

/// A tab that counts calls and always succeeds, unless built unreachable.
pub struct CountingTab {
    pub id: TabId,
    pub reachable: bool,
    pub context_reads: AtomicUsize,
    pub executes: AtomicUsize,
    pub loads: Mutex<Vec<String>>,
}

impl CountingTab {
    pub fn new() -> Self {
        Self {
            id: TabId(1),
            reachable: true,
            context_reads: AtomicUsize::new(0),
            executes: AtomicUsize::new(0),
            loads: Mutex::new(Vec::new()),
        }
    }

    pub fn unreachable() -> Self {
        Self {
            reachable: false,
            ..Self::new()
        }
    }

    pub fn execute_count(&self) -> usize {
        self.executes.load(Ordering::SeqCst)
    }

    pub fn context_reads(&self) -> usize {
        self.context_reads.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TabConnection for CountingTab {
    fn tab_id(&self) -> TabId {
        self.id
    }

    async fn page_context(&self) -> Result<PageModel, ActionError> {
        self.context_reads.fetch_add(1, Ordering::SeqCst);
        if !self.reachable {
            return Err(ActionError::Unavailable("content script not injected".into()));
        }
        Ok(PageModel {
            url: "https://news.example/".into(),
            title: "News".into(),
            page_height: 3000,
            ..Default::default()
        })
    }

    async fn execute(&self, _action: ActionRequest) -> Result<ActionResult, ActionError> {
        self.executes.fetch_add(1, Ordering::SeqCst);
        Ok(ActionResult::ok(json!({"action": "ok"})))
    }

    async fn load_url(&self, url: &str) -> Result<(), ActionError> {
        self.loads.lock().unwrap().push(url.to_string());
        Ok(())
    }
}
