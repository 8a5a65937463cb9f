//! The coordinator: owns running invocations and answers pane messages.
//!
//! Every invocation runs in its own task under a supervisor that joins it,
//! so a panic inside the loop becomes a terminal `error` event on the pane
//! instead of taking the host down.

use std::any::Any;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use tabpilot_core::error::Error;
use tabpilot_core::event::AgentEvent;
use tabpilot_core::message::PaneId;
use tabpilot_core::page::TabConnection;
use tabpilot_core::protocol::{CoordinatorMessage, CoordinatorReply};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, error, info, info_span};

use crate::orchestrator::{AgentOrchestrator, Invocation};

struct Running {
    invocation: String,
    cancel: CancellationToken,
}

type RunningMap = Arc<Mutex<HashMap<PaneId, Running>>>;

fn lock(running: &RunningMap) -> MutexGuard<'_, HashMap<PaneId, Running>> {
    running.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[derive(Clone)]
pub struct Coordinator {
    orchestrator: Arc<AgentOrchestrator>,
    tab: Arc<dyn TabConnection>,
    running: RunningMap,
}

impl Coordinator {
    pub fn new(orchestrator: Arc<AgentOrchestrator>, tab: Arc<dyn TabConnection>) -> Self {
        Self {
            orchestrator,
            tab,
            running: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn orchestrator(&self) -> &Arc<AgentOrchestrator> {
        &self.orchestrator
    }

    pub async fn handle(&self, message: CoordinatorMessage) -> CoordinatorReply {
        match message {
            CoordinatorMessage::RunAgent {
                user_message,
                target_pane,
                override_model,
            } => {
                let invocation =
                    Invocation::new(target_pane, user_message).with_model(override_model);
                self.start(invocation);
                CoordinatorReply::Started { started: true }
            }
            CoordinatorMessage::StopAgent { target_pane } => CoordinatorReply::Stopped {
                stopped: self.stop(&target_pane),
            },
            CoordinatorMessage::ClearHistory => {
                let removed = self
                    .orchestrator
                    .memory()
                    .clear_tab(self.tab.tab_id())
                    .await;
                info!(tab = %self.tab.tab_id(), removed, "History cleared");
                CoordinatorReply::Cleared { cleared: true }
            }
        }
    }

    /// Start an invocation in the background. A run already active on the
    /// same pane is cancelled first. Returns the supervisor's handle.
    pub fn start(&self, invocation: Invocation) -> JoinHandle<()> {
        let cancel = CancellationToken::new();
        let pane = invocation.pane.clone();
        let id = invocation.id.clone();

        if let Some(previous) = lock(&self.running).insert(
            pane.clone(),
            Running {
                invocation: id.clone(),
                cancel: cancel.clone(),
            },
        ) {
            info!(pane = %pane, previous = %previous.invocation, "Replacing running invocation");
            previous.cancel.cancel();
        }

        let span = info_span!("invocation", id = %id, pane = %pane);
        let worker = {
            let orchestrator = self.orchestrator.clone();
            let tab = self.tab.clone();
            tokio::spawn(async move { orchestrator.run(tab, invocation, cancel).await }.instrument(span))
        };

        let router = self.orchestrator.router().clone();
        let running = self.running.clone();
        tokio::spawn(async move {
            match worker.await {
                Ok(outcome) => {
                    debug!(invocation = %id, state = %outcome.state, "Invocation ended");
                }
                Err(e) if e.is_panic() => {
                    let message = Error::Internal(panic_message(e.into_panic())).to_string();
                    error!(invocation = %id, "Invocation panicked: {message}");
                    router.emit(&pane, AgentEvent::Error { message });
                }
                Err(e) => {
                    debug!(invocation = %id, "Invocation task cancelled: {e}");
                }
            }

            let mut running = lock(&running);
            if running.get(&pane).is_some_and(|r| r.invocation == id) {
                running.remove(&pane);
            }
        })
    }

    /// Cancel the pane's invocation. `false` when nothing was running there.
    pub fn stop(&self, pane: &PaneId) -> bool {
        match lock(&self.running).remove(pane) {
            Some(running) => {
                info!(pane = %pane, invocation = %running.invocation, "Stopping invocation");
                running.cancel.cancel();
                true
            }
            None => false,
        }
    }

    pub fn is_running(&self, pane: &PaneId) -> bool {
        lock(&self.running).contains_key(pane)
    }

    /// Serve messages from a channel until every [`CoordinatorHandle`] is
    /// dropped.
    pub fn spawn(self) -> (CoordinatorHandle, JoinHandle<()>) {
        let (tx, mut rx) = mpsc::channel::<CoordinatorEnvelope>(32);
        let task = tokio::spawn(async move {
            while let Some(envelope) = rx.recv().await {
                let reply = self.handle(envelope.message).await;
                // The sender may have stopped waiting
                let _ = envelope.reply.send(reply);
            }
            debug!("Coordinator channel closed");
        });
        (CoordinatorHandle { tx }, task)
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "agent task panicked".to_string()
    }
}

pub struct CoordinatorEnvelope {
    pub message: CoordinatorMessage,
    pub reply: oneshot::Sender<CoordinatorReply>,
}

/// Sending side of a spawned [`Coordinator`].
#[derive(Clone)]
pub struct CoordinatorHandle {
    tx: mpsc::Sender<CoordinatorEnvelope>,
}

impl CoordinatorHandle {
    pub async fn send(&self, message: CoordinatorMessage) -> Result<CoordinatorReply, Error> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(CoordinatorEnvelope { message, reply })
            .await
            .map_err(|_| Error::Internal("coordinator is gone".into()))?;
        rx.await
            .map_err(|_| Error::Internal("coordinator dropped the request".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::confirm::AutoConfirm;
    use crate::test_support::*;
    use futures::StreamExt;
    use std::pin::pin;
    use tabpilot_config::AgentConfig;
    use tabpilot_core::event::MessageRouter;
    use tabpilot_core::memory::Preferences;
    use tabpilot_core::message::TabId;
    use tabpilot_core::provider::CompletionClient;
    use tabpilot_memory::{InMemoryPreferences, SessionMemory};

    fn coordinator(client: Arc<dyn CompletionClient>) -> Coordinator {
        let prefs = Preferences {
            api_key: Some("nvapi-test".into()),
            ..Preferences::default()
        };
        let orchestrator = AgentOrchestrator::new(
            client,
            Arc::new(InMemoryPreferences::new(prefs)),
            SessionMemory::default(),
            MessageRouter::default(),
            Arc::new(AutoConfirm::allow()),
            None,
            AgentConfig::default(),
        );
        Coordinator::new(Arc::new(orchestrator), Arc::new(CountingTab::new()))
    }

    fn run_agent(pane: &str, message: &str) -> CoordinatorMessage {
        CoordinatorMessage::RunAgent {
            user_message: message.into(),
            target_pane: PaneId::from(pane),
            override_model: None,
        }
    }

    #[tokio::test]
    async fn run_replies_started_and_streams_to_pane() {
        let coordinator = coordinator(Arc::new(ScriptedClient::completions(vec![text("Hello!")])));
        let router = coordinator.orchestrator().router().clone();
        let mut events = pin!(router.subscribe_pane(PaneId::from("left")));

        let reply = coordinator.handle(run_agent("left", "hi")).await;
        assert_eq!(reply, CoordinatorReply::Started { started: true });

        assert_eq!(events.next().await, Some(AgentEvent::Thinking { iteration: 1 }));
        assert_eq!(
            events.next().await,
            Some(AgentEvent::StreamChunk {
                text: "Hello!".into()
            })
        );
        assert_eq!(
            events.next().await,
            Some(AgentEvent::Done {
                text: "Hello!".into()
            })
        );
    }

    #[tokio::test]
    async fn stop_cancels_the_running_invocation() {
        let coordinator = coordinator(Arc::new(HangingClient));
        let router = coordinator.orchestrator().router().clone();
        let pane = PaneId::from("left");
        let mut events = pin!(router.subscribe_pane(pane.clone()));

        coordinator.handle(run_agent("left", "slow")).await;
        assert_eq!(events.next().await, Some(AgentEvent::Thinking { iteration: 1 }));

        let reply = coordinator
            .handle(CoordinatorMessage::StopAgent {
                target_pane: pane.clone(),
            })
            .await;
        assert_eq!(reply, CoordinatorReply::Stopped { stopped: true });
        assert_eq!(
            events.next().await,
            Some(AgentEvent::Error {
                message: "Agent stopped by user.".into()
            })
        );
        assert!(!coordinator.is_running(&pane));

        let reply = coordinator
            .handle(CoordinatorMessage::StopAgent { target_pane: pane })
            .await;
        assert_eq!(reply, CoordinatorReply::Stopped { stopped: false });
    }

    #[tokio::test]
    async fn panes_run_independently() {
        let coordinator = coordinator(Arc::new(HangingClient));
        let router = coordinator.orchestrator().router().clone();
        let mut left = pin!(router.subscribe_pane(PaneId::from("left")));
        let mut right = pin!(router.subscribe_pane(PaneId::from("right")));

        coordinator.handle(run_agent("left", "a")).await;
        coordinator.handle(run_agent("right", "b")).await;
        assert_eq!(left.next().await, Some(AgentEvent::Thinking { iteration: 1 }));
        assert_eq!(right.next().await, Some(AgentEvent::Thinking { iteration: 1 }));

        assert!(coordinator.stop(&PaneId::from("left")));
        assert!(matches!(left.next().await, Some(AgentEvent::Error { .. })));
        assert!(coordinator.is_running(&PaneId::from("right")));
    }

    #[tokio::test]
    async fn new_run_on_busy_pane_replaces_the_old_one() {
        let coordinator = coordinator(Arc::new(HangingClient));
        let router = coordinator.orchestrator().router().clone();
        let mut events = pin!(router.subscribe_pane(PaneId::from("left")));

        coordinator.handle(run_agent("left", "first")).await;
        assert_eq!(events.next().await, Some(AgentEvent::Thinking { iteration: 1 }));

        coordinator.handle(run_agent("left", "second")).await;
        let mut seen = Vec::new();
        while seen.len() < 2 {
            seen.push(events.next().await.unwrap());
        }
        assert!(seen.contains(&AgentEvent::Error {
            message: "Agent stopped by user.".into()
        }));
        assert!(seen.contains(&AgentEvent::Thinking { iteration: 1 }));
        assert!(coordinator.is_running(&PaneId::from("left")));
    }

    #[tokio::test]
    async fn panics_become_error_events() {
        let coordinator = coordinator(Arc::new(PanickingClient));
        let router = coordinator.orchestrator().router().clone();
        let pane = PaneId::from("left");
        let mut events = pin!(router.subscribe_pane(pane.clone()));

        let supervisor = coordinator.start(Invocation::new(pane.clone(), "boom"));
        assert_eq!(events.next().await, Some(AgentEvent::Thinking { iteration: 1 }));
        match events.next().await {
            Some(AgentEvent::Error { message }) => {
                assert_eq!(message, "Internal error: completion client blew up")
            }
            other => panic!("unexpected event: {other:?}"),
        }
        supervisor.await.unwrap();
        assert!(!coordinator.is_running(&pane));

        let reply = coordinator.handle(CoordinatorMessage::ClearHistory).await;
        assert_eq!(reply, CoordinatorReply::Cleared { cleared: true });
    }

    #[tokio::test]
    async fn clear_history_over_the_channel() {
        let coordinator = coordinator(Arc::new(ScriptedClient::completions(vec![text("ok")])));
        let memory = coordinator.orchestrator().memory().clone();
        let pane = PaneId::from("left");

        coordinator
            .start(Invocation::new(pane.clone(), "remember me"))
            .await
            .unwrap();
        assert_eq!(memory.history(TabId(1), &pane).await.len(), 2);

        let (handle, task) = coordinator.spawn();
        let reply = handle.send(CoordinatorMessage::ClearHistory).await.unwrap();
        assert_eq!(reply, CoordinatorReply::Cleared { cleared: true });
        assert!(memory.history(TabId(1), &pane).await.is_empty());

        drop(handle);
        task.await.unwrap();
    }
}
