//! The in-page actuator task and the coordinator's handle on it.
//!
//! The actuator owns its [`Document`] exclusively. The coordinator talks to
//! it only through [`PageEnvelope`]s on an mpsc channel, each carrying a
//! oneshot for the reply, so no page state is ever shared across tasks.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use tabpilot_config::PageConfig;
use tabpilot_core::error::ActionError;
use tabpilot_core::message::TabId;
use tabpilot_core::page::{
    ActionRequest, ActionResult, MAX_MAIN_TEXT, PageModel, TabConnection, Target,
};
use tabpilot_core::protocol::{PageMessage, PageReply};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::dom::{Document, DomEvent, NodeId, resolve_url};
use crate::extract::{clean_text, extract_page_model, truncate_chars};
use crate::fixture::Site;
use crate::resolve::resolve;
use crate::selector::Selector;

const CHANNEL_CAPACITY: usize = 32;

/// One request to the actuator with its reply slot.
#[derive(Debug)]
pub struct PageEnvelope {
    pub message: PageMessage,
    pub reply: oneshot::Sender<PageReply>,
}

pub struct Actuator {
    doc: Document,
    site: Option<Site>,
    config: PageConfig,
}

impl Actuator {
    pub fn new(site: Site, config: PageConfig) -> Self {
        Self {
            doc: site.start(config.viewport_height),
            site: Some(site),
            config,
        }
    }

    /// An actuator over a single prebuilt document; navigation lands on
    /// blank pages.
    pub fn from_document(doc: Document, config: PageConfig) -> Self {
        Self {
            doc,
            site: None,
            config,
        }
    }

    pub fn document(&self) -> &Document {
        &self.doc
    }

    /// Run the actuator on its own task. The task ends when every handle is
    /// dropped and yields the final document.
    pub fn spawn(self, tab: TabId) -> (PageHandle, JoinHandle<Document>) {
        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
        let task = tokio::spawn(self.run(rx));
        (PageHandle { tab, tx }, task)
    }

    async fn run(mut self, mut rx: mpsc::Receiver<PageEnvelope>) -> Document {
        while let Some(PageEnvelope { message, reply }) = rx.recv().await {
            let response = self.handle(message).await;
            if reply.send(response).is_err() {
                debug!("Page reply dropped; requester went away");
            }
        }
        self.doc
    }

    pub async fn handle(&mut self, message: PageMessage) -> PageReply {
        match message {
            PageMessage::GetPageContext => PageReply::Context {
                context: extract_page_model(&self.doc),
            },
            PageMessage::Ping => PageReply::Alive { alive: true },
            PageMessage::ExecuteAction { action } => {
                let kind = action.kind();
                let result = match self.execute(action).await {
                    Ok(result) => result,
                    Err(e) => {
                        debug!(action = kind, error = %e, "Action failed");
                        ActionResult::from(e)
                    }
                };
                PageReply::Action(result)
            }
        }
    }

    async fn execute(&mut self, action: ActionRequest) -> Result<ActionResult, ActionError> {
        match action {
            ActionRequest::Click { target } => self.click(&target).await,
            ActionRequest::FillForm {
                field_name,
                selector,
                value,
            } => self.fill_form(field_name.as_deref(), selector.as_deref(), &value),
            ActionRequest::Scroll { delta } => {
                let scroll_y = self.doc.scroll_by(delta);
                tokio::time::sleep(Duration::from_millis(self.config.scroll_settle_ms)).await;
                Ok(ActionResult::ok(json!({"action": "scroll", "scrollY": scroll_y})))
            }
            ActionRequest::Navigate { url } => {
                let url = resolve_url(&self.doc.url, &url);
                self.doc.navigate(&url);
                self.follow_navigation();
                Ok(ActionResult::ok(json!({"action": "navigate", "url": url})))
            }
            ActionRequest::GetText { target } => {
                let text = resolve(&self.doc, &target).map(|r| {
                    truncate_chars(&clean_text(&self.doc.inner_text(r.node)), MAX_MAIN_TEXT)
                });
                Ok(ActionResult::ok(json!({ "text": text })))
            }
            ActionRequest::SubmitForm { selector } => self.submit_form(selector.as_deref()),
        }
    }

    async fn click(&mut self, target: &Target) -> Result<ActionResult, ActionError> {
        let node = resolve(&self.doc, target)
            .ok_or(ActionError::ElementNotFound)?
            .node;
        let tag = self.doc.node(node).tag.to_ascii_uppercase();

        self.doc.scroll_into_view(node);
        tokio::time::sleep(Duration::from_millis(self.config.click_settle_ms)).await;
        self.doc.focus(node);
        self.doc.click(node);
        if let Some(DomEvent::Submit { form }) = self.doc.events().last() {
            let form = *form;
            self.submit_navigation(form);
        }
        self.follow_navigation();

        Ok(ActionResult::ok(json!({"action": "click", "element": tag})))
    }

    fn fill_form(
        &mut self,
        field_name: Option<&str>,
        selector: Option<&str>,
        value: &str,
    ) -> Result<ActionResult, ActionError> {
        let by_selector = selector
            .and_then(|s| Selector::parse(s).ok())
            .and_then(|s| s.query_first(&self.doc));
        let by_name = || {
            let field = field_name?;
            self.doc.all().into_iter().find(|&n| {
                let node = self.doc.node(n);
                node.is_form_control()
                    && (node.attr("name") == Some(field) || node.attr("id") == Some(field))
            })
        };
        let described = field_name.or(selector).unwrap_or_default().to_string();
        let node = by_selector
            .or_else(by_name)
            .ok_or_else(|| ActionError::FieldNotFound(described.clone()))?;

        self.doc.focus(node);
        self.doc.set_value(node, value);
        self.doc.dispatch_input_events(node);

        Ok(ActionResult::ok(
            json!({"action": "fill_form", "field": described, "value": value}),
        ))
    }

    fn submit_form(&mut self, selector: Option<&str>) -> Result<ActionResult, ActionError> {
        let form = match selector {
            Some(raw) => {
                let sel = Selector::parse(raw)
                    .map_err(|_| ActionError::InvalidSelector(raw.to_string()))?;
                sel.query_first(&self.doc)
                    .and_then(|n| self.doc.closest(n, "form").or(self.first_form_within(n)))
            }
            None => self.first_form_within(self.doc.root()),
        }
        .ok_or(ActionError::FormNotFound)?;

        self.doc.submit(form);
        self.submit_navigation(form);
        self.follow_navigation();
        Ok(ActionResult::ok(json!({"action": "submit_form"})))
    }

    /// A submitted form with an `action` loads that URL.
    fn submit_navigation(&mut self, form: NodeId) {
        if let Some(action) = self.doc.node(form).attr("action") {
            let url = resolve_url(&self.doc.url, action);
            self.doc.navigate(&url);
        }
    }

    fn first_form_within(&self, scope: NodeId) -> Option<NodeId> {
        self.doc
            .subtree(scope)
            .into_iter()
            .find(|&n| self.doc.node(n).tag == "form")
    }

    /// Replace the document if the last event was a location change.
    fn follow_navigation(&mut self) {
        let Some(url) = self.doc.pending_navigation().map(str::to_string) else {
            return;
        };
        let viewport = self.config.viewport_height;
        self.doc = match &self.site {
            Some(site) => site.open(&url, viewport),
            None => {
                let mut doc = Document::new(&url, &url);
                doc.viewport_height = viewport;
                doc.page_height = viewport;
                doc
            }
        };
        info!(url = %url, title = %self.doc.title, "Page navigated");
    }
}

/// Coordinator-side connection to one actuator task.
#[derive(Debug, Clone)]
pub struct PageHandle {
    tab: TabId,
    tx: mpsc::Sender<PageEnvelope>,
}

impl PageHandle {
    async fn request(&self, message: PageMessage) -> Result<PageReply, ActionError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(PageEnvelope { message, reply })
            .await
            .map_err(|_| ActionError::Unavailable(format!("tab {} is closed", self.tab)))?;
        rx.await
            .map_err(|_| ActionError::Unavailable(format!("tab {} did not reply", self.tab)))
    }
}

#[async_trait]
impl TabConnection for PageHandle {
    fn tab_id(&self) -> TabId {
        self.tab
    }

    async fn page_context(&self) -> Result<PageModel, ActionError> {
        match self.request(PageMessage::GetPageContext).await? {
            PageReply::Context { context } => Ok(context),
            other => Err(ActionError::Internal(format!("unexpected reply: {other:?}"))),
        }
    }

    async fn execute(&self, action: ActionRequest) -> Result<ActionResult, ActionError> {
        match self.request(PageMessage::ExecuteAction { action }).await? {
            PageReply::Action(result) => Ok(result),
            other => Err(ActionError::Internal(format!("unexpected reply: {other:?}"))),
        }
    }

    async fn load_url(&self, url: &str) -> Result<(), ActionError> {
        let result = self
            .execute(ActionRequest::Navigate {
                url: url.to_string(),
            })
            .await?;
        if result.success {
            Ok(())
        } else {
            let reason = result.error.unwrap_or_else(|| "navigation failed".into());
            warn!(tab = %self.tab, %reason, "Tab navigation failed");
            Err(ActionError::Internal(reason))
        }
    }

    async fn ping(&self) -> bool {
        matches!(
            self.request(PageMessage::Ping).await,
            Ok(PageReply::Alive { alive: true })
        )
    }
}
