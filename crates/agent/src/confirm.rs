//! User confirmation for destructive tool calls.
//!
//! The orchestrator asks a [`ConfirmationGate`] before navigating or
//! submitting a form (when the matching preference is on). The
//! [`ConfirmationBroker`] parks each request on a oneshot until a
//! presentation surface resolves it; a dropped or timed-out request is a
//! denial.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use tabpilot_core::error::ToolError;
use tabpilot_core::message::{PaneId, TabId};
use tabpilot_core::tool::BrowserTool;
use tokio::sync::{broadcast, oneshot};
use tokio::time::timeout;
use tracing::{debug, info};
use uuid::Uuid;

/// What the user is asked to approve.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfirmationRequest {
    pub id: String,
    pub tab: TabId,
    pub pane: PaneId,
    pub tool: BrowserTool,
    /// Human-readable description, e.g. "Navigate to https://…"
    pub summary: String,
}

impl ConfirmationRequest {
    pub fn new(tab: TabId, pane: PaneId, tool: BrowserTool, summary: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            tab,
            pane,
            tool,
            summary: summary.into(),
        }
    }
}

#[async_trait]
pub trait ConfirmationGate: Send + Sync {
    /// `true` to allow the action.
    async fn confirm(&self, request: &ConfirmationRequest) -> bool;
}

/// Answers every request the same way.
pub struct AutoConfirm {
    allow: bool,
}

impl AutoConfirm {
    pub fn allow() -> Self {
        Self { allow: true }
    }

    pub fn deny() -> Self {
        Self { allow: false }
    }
}

#[async_trait]
impl ConfirmationGate for AutoConfirm {
    async fn confirm(&self, request: &ConfirmationRequest) -> bool {
        debug!(tool = %request.tool, allow = self.allow, "Auto-confirming");
        self.allow
    }
}

type Pending = Arc<Mutex<HashMap<String, oneshot::Sender<bool>>>>;

fn lock(pending: &Pending) -> MutexGuard<'_, HashMap<String, oneshot::Sender<bool>>> {
    pending.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Removes the pending entry if the waiting future is dropped first
/// (cancellation or timeout).
struct PendingGuard {
    pending: Pending,
    id: String,
}

impl Drop for PendingGuard {
    fn drop(&mut self) {
        lock(&self.pending).remove(&self.id);
    }
}

/// Routes confirmation requests to whoever is listening and waits for the
/// answer.
pub struct ConfirmationBroker {
    pending: Pending,
    requests: broadcast::Sender<ConfirmationRequest>,
    timeout: Option<Duration>,
}

impl ConfirmationBroker {
    pub fn new(timeout: Option<Duration>) -> Arc<Self> {
        let (requests, _) = broadcast::channel(16);
        Arc::new(Self {
            pending: Arc::new(Mutex::new(HashMap::new())),
            requests,
            timeout,
        })
    }

    /// Incoming requests, for a presentation surface to prompt on.
    pub fn subscribe(&self) -> broadcast::Receiver<ConfirmationRequest> {
        self.requests.subscribe()
    }

    pub fn register(&self, id: &str) -> oneshot::Receiver<bool> {
        let (tx, rx) = oneshot::channel();
        lock(&self.pending).insert(id.to_string(), tx);
        rx
    }

    /// Deliver the user's answer.
    pub fn resolve(&self, id: &str, allow: bool) -> Result<(), ToolError> {
        let sender = lock(&self.pending)
            .remove(id)
            .ok_or_else(|| ToolError::Internal(format!("unknown confirmation request: {id}")))?;
        // The requester may already have given up
        let _ = sender.send(allow);
        Ok(())
    }

    pub fn pending_count(&self) -> usize {
        lock(&self.pending).len()
    }
}

#[async_trait]
impl ConfirmationGate for ConfirmationBroker {
    async fn confirm(&self, request: &ConfirmationRequest) -> bool {
        let receiver = self.register(&request.id);
        let _guard = PendingGuard {
            pending: self.pending.clone(),
            id: request.id.clone(),
        };

        if self.requests.send(request.clone()).is_err() {
            info!(tool = %request.tool, "No confirmation listener; denying");
            return false;
        }

        let answer = match self.timeout {
            Some(limit) => match timeout(limit, receiver).await {
                Ok(answer) => answer.unwrap_or(false),
                Err(_) => {
                    info!(tool = %request.tool, "Confirmation timed out; denying");
                    false
                }
            },
            None => receiver.await.unwrap_or(false),
        };
        debug!(tool = %request.tool, allow = answer, "Confirmation resolved");
        answer
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> ConfirmationRequest {
        ConfirmationRequest::new(
            TabId(1),
            PaneId::from("left"),
            BrowserTool::SubmitForm,
            "Submit the login form",
        )
    }

    #[tokio::test]
    async fn resolve_delivers_the_answer() {
        let broker = ConfirmationBroker::new(None);
        let mut incoming = broker.subscribe();

        let waiter = {
            let broker = broker.clone();
            tokio::spawn(async move { broker.confirm(&request()).await })
        };

        let asked = incoming.recv().await.unwrap();
        assert_eq!(asked.tool, BrowserTool::SubmitForm);
        broker.resolve(&asked.id, true).unwrap();

        assert!(waiter.await.unwrap());
        assert_eq!(broker.pending_count(), 0);
    }

    #[tokio::test]
    async fn no_listener_denies() {
        let broker = ConfirmationBroker::new(None);
        assert!(!broker.confirm(&request()).await);
        assert_eq!(broker.pending_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_denies_and_cleans_up() {
        let broker = ConfirmationBroker::new(Some(Duration::from_secs(30)));
        let _incoming = broker.subscribe();
        assert!(!broker.confirm(&request()).await);
        assert_eq!(broker.pending_count(), 0);
    }

    #[tokio::test]
    async fn dropped_waiter_removes_pending_entry() {
        let broker = ConfirmationBroker::new(None);
        let mut incoming = broker.subscribe();
        let waiter = {
            let broker = broker.clone();
            tokio::spawn(async move { broker.confirm(&request()).await })
        };
        let asked = incoming.recv().await.unwrap();
        assert_eq!(broker.pending_count(), 1);

        waiter.abort();
        let _ = waiter.await;
        assert_eq!(broker.pending_count(), 0);
        assert!(broker.resolve(&asked.id, true).is_err());
    }

    #[tokio::test]
    async fn auto_confirm() {
        assert!(AutoConfirm::allow().confirm(&request()).await);
        assert!(!AutoConfirm::deny().confirm(&request()).await);
    }
}
