//! Tool dispatch: one [`ToolCall`] in, one structured result out.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use serde_json::{Value, json};
use tabpilot_config::AgentConfig;
use tabpilot_core::error::{ActionError, ToolError};
use tabpilot_core::memory::Preferences;
use tabpilot_core::message::{PaneId, ToolCall};
use tabpilot_core::page::{ActionRequest, ActionResult, TabConnection, Target};
use tabpilot_core::tool::{
    BrowserTool, FillFormArgs, NavigateArgs, ScrollArgs, SubmitFormArgs, TargetArgs,
    ToolInvocation, WaitArgs, WebSearchArgs,
};
use tabpilot_memory::SessionMemory;
use tabpilot_tools::SearchProvider;
use tracing::{debug, warn};

use crate::confirm::{ConfirmationGate, ConfirmationRequest};

pub const NAVIGATION_DENIED: &str = "Navigation denied by user.";
pub const SUBMISSION_DENIED: &str = "Form submission denied by user.";

/// A successful tool run.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolOutput {
    /// JSON fed back to the model in the tool turn
    pub content: Value,
    /// Short line for the presentation pane
    pub summary: String,
}

impl ToolOutput {
    fn new(content: Value, summary: impl Into<String>) -> Self {
        Self {
            content,
            summary: summary.into(),
        }
    }
}

/// The structured failure the model sees for a failed tool call.
pub fn failure_content(error: &ToolError) -> Value {
    json!({"success": false, "error": error.to_string()})
}

/// Everything a dispatch needs about the invocation it belongs to.
pub struct DispatchContext<'a> {
    pub tab: &'a Arc<dyn TabConnection>,
    pub pane: &'a PaneId,
    pub preferences: &'a Preferences,
}

pub struct ToolDispatcher {
    memory: SessionMemory,
    gate: Arc<dyn ConfirmationGate>,
    search: Option<Arc<dyn SearchProvider>>,
    config: AgentConfig,
}

impl ToolDispatcher {
    pub fn new(
        memory: SessionMemory,
        gate: Arc<dyn ConfirmationGate>,
        search: Option<Arc<dyn SearchProvider>>,
        config: AgentConfig,
    ) -> Self {
        Self {
            memory,
            gate,
            search,
            config,
        }
    }

    /// Run one call. Panics inside a tool are contained and reported as an
    /// internal fault.
    pub async fn dispatch(
        &self,
        ctx: &DispatchContext<'_>,
        call: &ToolCall,
    ) -> Result<ToolOutput, ToolError> {
        match AssertUnwindSafe(self.dispatch_inner(ctx, call))
            .catch_unwind()
            .await
        {
            Ok(result) => result,
            Err(_) => {
                warn!(tool = %call.name, "Tool panicked");
                Err(ToolError::Internal(format!("{} failed unexpectedly", call.name)))
            }
        }
    }

    async fn dispatch_inner(
        &self,
        ctx: &DispatchContext<'_>,
        call: &ToolCall,
    ) -> Result<ToolOutput, ToolError> {
        let tool = call
            .tool()
            .ok_or_else(|| ToolError::UnknownTool(call.name.clone()))?;
        let invocation = ToolInvocation::parse(tool, &call.arguments)?;
        debug!(tool = %tool, call_id = %call.id, "Dispatching tool");

        let output = match invocation {
            ToolInvocation::ReadPage => self.read_page(ctx).await,
            ToolInvocation::ClickElement(args) => self.click(ctx, &args).await,
            ToolInvocation::FillForm(args) => self.fill_form(ctx, args).await,
            ToolInvocation::Navigate(args) => self.navigate(ctx, args).await,
            ToolInvocation::Scroll(args) => self.scroll(ctx, &args).await,
            ToolInvocation::GetText(args) => self.get_text(ctx, &args).await,
            ToolInvocation::Wait(args) => self.wait(&args).await,
            ToolInvocation::SubmitForm(args) => self.submit_form(ctx, args).await,
            ToolInvocation::WebSearch(args) => self.web_search(ctx, args).await,
        };
        if changes_page(tool) {
            // A failed action may still have changed the page.
            self.memory.invalidate_context(ctx.tab.tab_id()).await;
        }
        output
    }

    async fn read_page(&self, ctx: &DispatchContext<'_>) -> Result<ToolOutput, ToolError> {
        let model = ctx.tab.page_context().await?;
        let summary = format!("Read page: {}", model.title);
        self.memory.store_context(ctx.tab.tab_id(), model.clone()).await;
        let content = serde_json::to_value(&model)
            .map_err(|e| ToolError::Internal(format!("unserializable page model: {e}")))?;
        Ok(ToolOutput::new(content, summary))
    }

    async fn click(
        &self,
        ctx: &DispatchContext<'_>,
        args: &TargetArgs,
    ) -> Result<ToolOutput, ToolError> {
        let target = require_target(BrowserTool::ClickElement, args)?;
        let result = execute(ctx, ActionRequest::Click { target }).await?;
        self.settle(self.config.click_settle_ms).await;
        Ok(ToolOutput::new(
            to_content(&result),
            format!("Clicked: {}", args.describe()),
        ))
    }

    async fn fill_form(
        &self,
        ctx: &DispatchContext<'_>,
        args: FillFormArgs,
    ) -> Result<ToolOutput, ToolError> {
        let field = args
            .field_name
            .clone()
            .or_else(|| args.selector.clone())
            .ok_or_else(|| {
                ToolError::MissingTarget("fill_form needs a field_name or a selector".into())
            })?;
        let result = execute(
            ctx,
            ActionRequest::FillForm {
                field_name: args.field_name,
                selector: args.selector,
                value: args.value,
            },
        )
        .await?;
        Ok(ToolOutput::new(to_content(&result), format!("Filled: {field}")))
    }

    async fn navigate(
        &self,
        ctx: &DispatchContext<'_>,
        args: NavigateArgs,
    ) -> Result<ToolOutput, ToolError> {
        let url = args.url.trim().to_string();
        if url.is_empty() {
            return Err(ToolError::InvalidArguments {
                tool: BrowserTool::Navigate.name().into(),
                reason: "url is empty".into(),
            });
        }
        if ctx.preferences.confirm_navigation {
            self.confirm(ctx, BrowserTool::Navigate, format!("Navigate to {url}"), NAVIGATION_DENIED)
                .await?;
        }

        ctx.tab.load_url(&url).await?;
        self.settle(self.config.navigate_settle_ms).await;
        Ok(ToolOutput::new(
            json!({"success": true, "navigated_to": url}),
            format!("Navigating to: {url}"),
        ))
    }

    async fn scroll(
        &self,
        ctx: &DispatchContext<'_>,
        args: &ScrollArgs,
    ) -> Result<ToolOutput, ToolError> {
        let delta = args.signed_delta();
        let result = execute(ctx, ActionRequest::Scroll { delta }).await?;
        let direction = if delta < 0 { "up" } else { "down" };
        Ok(ToolOutput::new(
            to_content(&result),
            format!("Scrolled {direction} {}px", delta.unsigned_abs()),
        ))
    }

    async fn get_text(
        &self,
        ctx: &DispatchContext<'_>,
        args: &TargetArgs,
    ) -> Result<ToolOutput, ToolError> {
        let target = require_target(BrowserTool::GetText, args)?;
        let result = execute(ctx, ActionRequest::GetText { target }).await?;
        Ok(ToolOutput::new(
            to_content(&result),
            format!("Got text from: {}", args.describe()),
        ))
    }

    async fn wait(&self, args: &WaitArgs) -> Result<ToolOutput, ToolError> {
        let ms = args
            .ms
            .unwrap_or(self.config.default_wait_ms)
            .min(self.config.max_wait_ms);
        self.settle(ms).await;
        Ok(ToolOutput::new(
            json!({"success": true, "waited_ms": ms}),
            format!("Waited {ms}ms"),
        ))
    }

    async fn submit_form(
        &self,
        ctx: &DispatchContext<'_>,
        args: SubmitFormArgs,
    ) -> Result<ToolOutput, ToolError> {
        if ctx.preferences.confirm_form_submission {
            let what = match &args.selector {
                Some(s) => format!("Submit form {s}"),
                None => "Submit the first form on the page".to_string(),
            };
            self.confirm(ctx, BrowserTool::SubmitForm, what, SUBMISSION_DENIED)
                .await?;
        }
        let result = execute(
            ctx,
            ActionRequest::SubmitForm {
                selector: args.selector,
            },
        )
        .await?;
        Ok(ToolOutput::new(to_content(&result), "Submitted form"))
    }

    async fn web_search(
        &self,
        ctx: &DispatchContext<'_>,
        args: WebSearchArgs,
    ) -> Result<ToolOutput, ToolError> {
        let api_key = ctx.preferences.search_api_key.as_deref().ok_or_else(|| {
            ToolError::CredentialMissing(
                "Web search is not configured. Add a search API key in preferences.".into(),
            )
        })?;
        let provider = self
            .search
            .as_ref()
            .ok_or_else(|| ToolError::Internal("no search provider available".into()))?;

        let answer = provider.search(api_key, &args.query).await?;
        Ok(ToolOutput::new(
            json!({
                "success": true,
                "query": args.query,
                "answer": answer.answer,
                "source": answer.source,
            }),
            format!("Searched: {}", args.query),
        ))
    }

    async fn confirm(
        &self,
        ctx: &DispatchContext<'_>,
        tool: BrowserTool,
        summary: String,
        denied: &str,
    ) -> Result<(), ToolError> {
        let request = ConfirmationRequest::new(ctx.tab.tab_id(), ctx.pane.clone(), tool, summary);
        if self.gate.confirm(&request).await {
            Ok(())
        } else {
            Err(ToolError::PermissionDenied(denied.to_string()))
        }
    }

    async fn settle(&self, ms: u64) {
        if ms > 0 {
            tokio::time::sleep(Duration::from_millis(ms)).await;
        }
    }
}

/// Tools whose effects make a cached page model outdated.
fn changes_page(tool: BrowserTool) -> bool {
    matches!(
        tool,
        BrowserTool::ClickElement
            | BrowserTool::FillForm
            | BrowserTool::Navigate
            | BrowserTool::Scroll
            | BrowserTool::SubmitForm
    )
}

fn require_target(tool: BrowserTool, args: &TargetArgs) -> Result<Target, ToolError> {
    let target = args.target();
    if target.is_empty() {
        return Err(ToolError::MissingTarget(format!(
            "{tool} needs one of element_index, selector, text, aria_label or x/y coordinates"
        )));
    }
    Ok(target)
}

/// Send an action and turn an in-page failure into a tool error.
async fn execute(
    ctx: &DispatchContext<'_>,
    action: ActionRequest,
) -> Result<ActionResult, ToolError> {
    let result = ctx.tab.execute(action).await?;
    if result.success {
        Ok(result)
    } else {
        let reason = result.error.unwrap_or_else(|| "action failed".into());
        Err(ToolError::Action(ActionError::Internal(reason)))
    }
}

fn to_content(result: &ActionResult) -> Value {
    serde_json::to_value(result).unwrap_or_else(|_| json!({"success": result.success}))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::confirm::AutoConfirm;
    use async_trait::async_trait;
    use serde_json::Map;
    use std::sync::Mutex;
    use tabpilot_core::message::TabId;
    use tabpilot_core::page::PageModel;
    use tabpilot_tools::SearchAnswer;

    /// Records every call and answers with success.
    #[derive(Default)]
    struct RecordingTab {
        actions: Mutex<Vec<ActionRequest>>,
        loads: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl TabConnection for RecordingTab {
        fn tab_id(&self) -> TabId {
            TabId(9)
        }

        async fn page_context(&self) -> Result<PageModel, ActionError> {
            Ok(PageModel {
                url: "https://shop.example".into(),
                title: "Shop".into(),
                ..Default::default()
            })
        }

        async fn execute(&self, action: ActionRequest) -> Result<ActionResult, ActionError> {
            let failing = matches!(&action, ActionRequest::Click { target } if target.text.as_deref() == Some("missing"));
            self.actions.lock().unwrap().push(action);
            if failing {
                Ok(ActionResult::failure("Element not found"))
            } else {
                Ok(ActionResult::ok(json!({"action": "ok"})))
            }
        }

        async fn load_url(&self, url: &str) -> Result<(), ActionError> {
            self.loads.lock().unwrap().push(url.to_string());
            Ok(())
        }
    }

    struct CannedSearch;

    #[async_trait]
    impl SearchProvider for CannedSearch {
        fn name(&self) -> &str {
            "canned"
        }

        async fn search(&self, _api_key: &str, query: &str) -> Result<SearchAnswer, ToolError> {
            Ok(SearchAnswer {
                answer: format!("answer to {query}"),
                source: None,
            })
        }
    }

    fn dispatcher(gate: AutoConfirm) -> ToolDispatcher {
        ToolDispatcher::new(
            SessionMemory::default(),
            Arc::new(gate),
            Some(Arc::new(CannedSearch)),
            AgentConfig::default(),
        )
    }

    fn call(name: &str, args: Value) -> ToolCall {
        let arguments = match args {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        ToolCall::new("call_1", name, arguments)
    }

    struct Fixture {
        tab: Arc<RecordingTab>,
        conn: Arc<dyn TabConnection>,
        pane: PaneId,
    }

    fn fixture() -> Fixture {
        let tab = Arc::new(RecordingTab::default());
        let conn: Arc<dyn TabConnection> = tab.clone();
        Fixture {
            tab,
            conn,
            pane: PaneId::from("left"),
        }
    }

    impl Fixture {
        fn ctx<'a>(&'a self, preferences: &'a Preferences) -> DispatchContext<'a> {
            DispatchContext {
                tab: &self.conn,
                pane: &self.pane,
                preferences,
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn hint_less_click_never_reaches_the_tab() {
        let f = fixture();
        let prefs = Preferences::default();
        let err = dispatcher(AutoConfirm::allow())
            .dispatch(&f.ctx(&prefs), &call("click_element", json!({"description": "the button"})))
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::MissingTarget(_)));
        assert!(f.tab.actions.lock().unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn click_settles_for_500ms() {
        let f = fixture();
        let prefs = Preferences::default();
        let start = tokio::time::Instant::now();
        let out = dispatcher(AutoConfirm::allow())
            .dispatch(&f.ctx(&prefs), &call("click_element", json!({"element_index": 3})))
            .await
            .unwrap();
        assert_eq!(start.elapsed(), Duration::from_millis(500));
        assert_eq!(out.summary, "Clicked: element #3");
        assert_eq!(f.tab.actions.lock().unwrap().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn in_page_failure_becomes_tool_error() {
        let f = fixture();
        let prefs = Preferences::default();
        let err = dispatcher(AutoConfirm::allow())
            .dispatch(&f.ctx(&prefs), &call("click_element", json!({"text": "missing"})))
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "Element not found");
        assert_eq!(failure_content(&err)["success"], false);
    }

    #[tokio::test(start_paused = true)]
    async fn denied_navigation_is_structured() {
        let f = fixture();
        let prefs = Preferences {
            confirm_navigation: true,
            ..Preferences::default()
        };
        let err = dispatcher(AutoConfirm::deny())
            .dispatch(&f.ctx(&prefs), &call("navigate", json!({"url": "https://evil.example"})))
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), NAVIGATION_DENIED);
        assert_eq!(failure_content(&err)["error"], NAVIGATION_DENIED);
        assert!(f.tab.loads.lock().unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn navigation_without_gate_loads_and_settles() {
        let f = fixture();
        let prefs = Preferences::default();
        let start = tokio::time::Instant::now();
        let out = dispatcher(AutoConfirm::deny())
            .dispatch(&f.ctx(&prefs), &call("navigate", json!({"url": "https://docs.rs"})))
            .await
            .unwrap();
        assert_eq!(start.elapsed(), Duration::from_millis(2500));
        assert_eq!(out.content["navigated_to"], "https://docs.rs");
        assert_eq!(f.tab.loads.lock().unwrap().as_slice(), ["https://docs.rs"]);
    }

    #[tokio::test(start_paused = true)]
    async fn form_submission_is_gated_by_default() {
        let f = fixture();
        let prefs = Preferences::default();
        let err = dispatcher(AutoConfirm::deny())
            .dispatch(&f.ctx(&prefs), &call("submit_form", json!({})))
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), SUBMISSION_DENIED);
        assert!(f.tab.actions.lock().unwrap().is_empty());

        let out = dispatcher(AutoConfirm::allow())
            .dispatch(&f.ctx(&prefs), &call("submit_form", json!({})))
            .await
            .unwrap();
        assert_eq!(out.summary, "Submitted form");
    }

    #[tokio::test(start_paused = true)]
    async fn wait_is_clamped() {
        let f = fixture();
        let prefs = Preferences::default();
        let d = dispatcher(AutoConfirm::allow());

        let start = tokio::time::Instant::now();
        let out = d.dispatch(&f.ctx(&prefs), &call("wait", json!({"ms": 60000}))).await.unwrap();
        assert_eq!(out.content["waited_ms"], 5000);
        assert_eq!(start.elapsed(), Duration::from_millis(5000));

        let out = d.dispatch(&f.ctx(&prefs), &call("wait", json!({}))).await.unwrap();
        assert_eq!(out.content["waited_ms"], 1000);
    }

    #[tokio::test(start_paused = true)]
    async fn scroll_up_negates() {
        let f = fixture();
        let prefs = Preferences::default();
        dispatcher(AutoConfirm::allow())
            .dispatch(&f.ctx(&prefs), &call("scroll", json!({"direction": "up"})))
            .await
            .unwrap();
        assert_eq!(
            f.tab.actions.lock().unwrap()[0],
            ActionRequest::Scroll { delta: -600 }
        );
    }

    #[tokio::test]
    async fn web_search_requires_credential() {
        let f = fixture();
        let prefs = Preferences::default();
        let d = dispatcher(AutoConfirm::allow());
        let err = d
            .dispatch(&f.ctx(&prefs), &call("web_search", json!({"query": "rust"})))
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::CredentialMissing(_)));

        let prefs = Preferences {
            search_api_key: Some("tvly-x".into()),
            ..Preferences::default()
        };
        let out = d
            .dispatch(&f.ctx(&prefs), &call("web_search", json!({"query": "rust"})))
            .await
            .unwrap();
        assert_eq!(out.content["answer"], "answer to rust");
    }

    #[tokio::test]
    async fn unknown_tool_and_bad_arguments() {
        let f = fixture();
        let prefs = Preferences::default();
        let d = dispatcher(AutoConfirm::allow());
        let err = d
            .dispatch(&f.ctx(&prefs), &call("format_disk", json!({})))
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "Unknown tool: format_disk");

        let err = d
            .dispatch(&f.ctx(&prefs), &call("navigate", json!({})))
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::InvalidArguments { .. }));
    }

    #[tokio::test]
    async fn read_page_caches_context() {
        let f = fixture();
        let prefs = Preferences::default();
        let memory = SessionMemory::default();
        let d = ToolDispatcher::new(
            memory.clone(),
            Arc::new(AutoConfirm::allow()),
            None,
            AgentConfig::default(),
        );
        let out = d.dispatch(&f.ctx(&prefs), &call("read_page", json!({}))).await.unwrap();
        assert_eq!(out.summary, "Read page: Shop");
        assert_eq!(out.content["title"], "Shop");
        assert_eq!(memory.context(TabId(9)).await.unwrap().title, "Shop");
    }

    #[tokio::test(start_paused = true)]
    async fn page_changing_tools_drop_the_cached_context() {
        let f = fixture();
        let prefs = Preferences::default();
        let memory = SessionMemory::default();
        let d = ToolDispatcher::new(
            memory.clone(),
            Arc::new(AutoConfirm::allow()),
            None,
            AgentConfig::default(),
        );

        d.dispatch(&f.ctx(&prefs), &call("read_page", json!({}))).await.unwrap();
        d.dispatch(&f.ctx(&prefs), &call("get_text", json!({"element_index": 0})))
            .await
            .unwrap();
        assert!(memory.context(TabId(9)).await.is_some());

        d.dispatch(&f.ctx(&prefs), &call("navigate", json!({"url": "https://shop.example/cart"})))
            .await
            .unwrap();
        assert!(memory.context(TabId(9)).await.is_none());

        d.dispatch(&f.ctx(&prefs), &call("read_page", json!({}))).await.unwrap();
        d.dispatch(&f.ctx(&prefs), &call("click_element", json!({"text": "missing"})))
            .await
            .unwrap_err();
        assert!(memory.context(TabId(9)).await.is_none());
    }
}
