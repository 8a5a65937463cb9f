//! Agent lifecycle events and the pane-addressed router.
//!
//! Events are published as the orchestrator moves through an invocation.
//! Presentation panes subscribe and keep only the updates addressed to them.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tokio_stream::{Stream, StreamExt};
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tracing::{trace, warn};

use crate::message::PaneId;

/// Everything a pane can be told about a running invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum AgentEvent {
    /// A completion request is about to be sent
    Thinking { iteration: u32 },

    /// Incremental assistant text
    StreamChunk { text: String },

    ToolStart {
        tool: String,
        call_id: String,
        summary: String,
    },

    ToolDone {
        tool: String,
        call_id: String,
        summary: String,
    },

    ToolError {
        tool: String,
        call_id: String,
        error: String,
    },

    /// Final assistant text; the invocation is over
    Done { text: String },

    /// Terminal failure (provider error, cancellation, internal fault)
    Error { message: String },

    /// The iteration ceiling was reached
    IterationLimit { max: u32, message: String },
}

impl AgentEvent {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Done { .. } | Self::Error { .. } | Self::IterationLimit { .. }
        )
    }
}

/// An event addressed to one pane.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentUpdate {
    pub target_pane: PaneId,
    #[serde(flatten)]
    pub event: AgentEvent,
}

/// Broadcast router for [`AgentUpdate`]s.
///
/// Uses `tokio::sync::broadcast`, so any number of panes can listen and
/// publishing with no listener at all is fine.
#[derive(Clone)]
pub struct MessageRouter {
    sender: broadcast::Sender<Arc<AgentUpdate>>,
}

impl MessageRouter {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Fire-and-forget delivery to `pane`.
    pub fn emit(&self, pane: &PaneId, event: AgentEvent) {
        trace!(pane = %pane, ?event, "agent update");
        // No receivers is not an error
        let _ = self.sender.send(Arc::new(AgentUpdate {
            target_pane: pane.clone(),
            event,
        }));
    }

    /// Every update, for all panes.
    pub fn subscribe(&self) -> broadcast::Receiver<Arc<AgentUpdate>> {
        self.sender.subscribe()
    }

    /// Only the events addressed to `pane`. Lagged updates are skipped.
    pub fn subscribe_pane(&self, pane: PaneId) -> impl Stream<Item = AgentEvent> + Send + 'static {
        BroadcastStream::new(self.sender.subscribe()).filter_map(move |item| match item {
            Ok(update) if update.target_pane == pane => Some(update.event.clone()),
            Ok(_) => None,
            Err(BroadcastStreamRecvError::Lagged(n)) => {
                warn!(pane = %pane, skipped = n, "pane listener lagged");
                None
            }
        })
    }

    pub fn listener_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for MessageRouter {
    fn default() -> Self {
        Self::new(256)
    }
}
