//! Cross-context message kinds.
//!
//! Each boundary gets a closed enum instead of string-tagged objects. The
//! `type` tag keeps the wire shape of the browser extension so fixtures and
//! logs stay readable.

use serde::{Deserialize, Serialize};

use crate::event::AgentUpdate;
use crate::message::PaneId;
use crate::page::{ActionRequest, ActionResult, PageModel};

/// Coordinator → actuator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PageMessage {
    GetPageContext,
    ExecuteAction { action: ActionRequest },
    Ping,
}

/// Actuator → coordinator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PageReply {
    Context { context: PageModel },
    Alive { alive: bool },
    Action(ActionResult),
}

/// Presentation pane → coordinator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(
    tag = "type",
    rename_all = "SCREAMING_SNAKE_CASE",
    rename_all_fields = "camelCase"
)]
pub enum CoordinatorMessage {
    RunAgent {
        user_message: String,
        target_pane: PaneId,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        override_model: Option<String>,
    },
    StopAgent {
        target_pane: PaneId,
    },
    ClearHistory,
}

/// Immediate acknowledgement of a [`CoordinatorMessage`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CoordinatorReply {
    Started { started: bool },
    Stopped { stopped: bool },
    Cleared { cleared: bool },
}

/// Coordinator → presentation panes.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaneMessage {
    AgentUpdate(AgentUpdate),
}
