//! The agent loop.
//!
//! One [`AgentOrchestrator::run`] drives a single invocation through
//! `INIT → THINKING → (TOOL_DISPATCH → THINKING)* → DONE | ERROR | ITERATION_LIMIT`:
//!
//! 1. **Init**: load preferences, prior history for the (tab, pane) key and
//!    the current page model; persist the user utterance before any network
//!    call.
//! 2. **Thinking**: send the transcript to the completion client, streaming
//!    text deltas to the pane.
//! 3. **Tool dispatch**: run each requested tool in order and append its
//!    structured result as a tool turn.
//!
//! Tool failures re-enter the conversation; completion failures end it.
//! Every suspension point is raced against the invocation's
//! [`CancellationToken`].

use std::sync::Arc;

use tabpilot_config::{AgentConfig, is_local_model};
use tabpilot_core::error::{Error, ProviderError};
use tabpilot_core::event::{AgentEvent, MessageRouter};
use tabpilot_core::memory::{PreferenceStore, Preferences};
use tabpilot_core::message::{ConversationTurn, PaneId, TabId, ToolCall};
use tabpilot_core::page::{PageModel, TabConnection};
use tabpilot_core::provider::{CompletionClient, CompletionRequest, TextSink, ToolDefinition};
use tabpilot_core::tool::ToolInvocation;
use tabpilot_memory::SessionMemory;
use tabpilot_tools::{SearchProvider, tool_definitions};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::confirm::ConfirmationGate;
use crate::dispatch::{DispatchContext, ToolDispatcher, failure_content};
use crate::prompt::build_preamble;
use crate::state::AgentState;

/// One user request against one tab, addressed to one pane.
#[derive(Debug, Clone)]
pub struct Invocation {
    pub id: String,
    pub pane: PaneId,
    pub user_message: String,
    /// Model to use instead of the preferred one, for this invocation only
    pub override_model: Option<String>,
}

impl Invocation {
    pub fn new(pane: PaneId, user_message: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            pane,
            user_message: user_message.into(),
            override_model: None,
        }
    }

    pub fn with_model(mut self, model: Option<String>) -> Self {
        self.override_model = model;
        self
    }
}

/// How an invocation ended.
#[derive(Debug, Clone, PartialEq)]
pub struct RunOutcome {
    pub state: AgentState,
    /// THINKING iterations entered
    pub iterations: u32,
    /// Final assistant text (DONE) or the terminal message otherwise
    pub message: String,
}

pub struct AgentOrchestrator {
    client: Arc<dyn CompletionClient>,
    preferences: Arc<dyn PreferenceStore>,
    memory: SessionMemory,
    router: MessageRouter,
    dispatcher: ToolDispatcher,
    tools: Vec<ToolDefinition>,
    max_iterations: u32,
    temperature: f32,
}

/// Mutable per-run values threaded through the loop.
struct RunState<'a> {
    tab: &'a Arc<dyn TabConnection>,
    tab_id: TabId,
    invocation: &'a Invocation,
    state: AgentState,
    iterations: u32,
    transcript: Vec<ConversationTurn>,
}

impl AgentOrchestrator {
    pub fn new(
        client: Arc<dyn CompletionClient>,
        preferences: Arc<dyn PreferenceStore>,
        memory: SessionMemory,
        router: MessageRouter,
        gate: Arc<dyn ConfirmationGate>,
        search: Option<Arc<dyn SearchProvider>>,
        config: AgentConfig,
    ) -> Self {
        let max_iterations = config.max_iterations;
        Self {
            client,
            preferences,
            dispatcher: ToolDispatcher::new(memory.clone(), gate, search, config),
            memory,
            router,
            tools: tool_definitions(),
            max_iterations,
            temperature: 0.2,
        }
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn router(&self) -> &MessageRouter {
        &self.router
    }

    pub fn memory(&self) -> &SessionMemory {
        &self.memory
    }

    /// Drive one invocation to a terminal state. Every terminal state is
    /// also published to the invocation's pane.
    pub async fn run(
        &self,
        tab: Arc<dyn TabConnection>,
        invocation: Invocation,
        cancel: CancellationToken,
    ) -> RunOutcome {
        let tab_id = tab.tab_id();
        info!(
            invocation = %invocation.id,
            tab = %tab_id,
            pane = %invocation.pane,
            "Agent invocation started"
        );

        let mut run = RunState {
            tab: &tab,
            tab_id,
            invocation: &invocation,
            state: AgentState::Init,
            iterations: 0,
            transcript: Vec::new(),
        };

        let preferences = match self.preferences.load().await {
            Ok(prefs) => prefs,
            Err(e) => {
                warn!("Failed to load preferences, using defaults: {e}");
                Preferences::default()
            }
        };
        let model = invocation
            .override_model
            .clone()
            .unwrap_or_else(|| preferences.model.clone());
        if preferences.api_key.is_none() && !is_local_model(&model) {
            let err = ProviderError::CredentialMissing { model };
            return self.fail(&mut run, err.to_string());
        }

        let Some(page) = self.initial_page(&tab, &cancel).await else {
            return self.stopped(&mut run);
        };
        let preamble = build_preamble(&page);

        run.transcript = self.memory.history(tab_id, &invocation.pane).await;
        self.record(&mut run, ConversationTurn::user(invocation.user_message.clone()))
            .await;

        let ctx = DispatchContext {
            tab: &tab,
            pane: &invocation.pane,
            preferences: &preferences,
        };

        for iteration in 1..=self.max_iterations {
            if cancel.is_cancelled() {
                return self.stopped(&mut run);
            }
            self.advance(&mut run, AgentState::Thinking { iteration });
            run.iterations = iteration;
            self.emit(&run, AgentEvent::Thinking { iteration });

            let request = CompletionRequest {
                credential: preferences.api_key.clone(),
                model: model.clone(),
                messages: run.transcript.clone(),
                tools: self.tools.clone(),
                system_prompt: Some(preamble.clone()),
                max_tokens: preferences.max_tokens,
                temperature: self.temperature,
            };

            let router = &self.router;
            let pane = &invocation.pane;
            let forward = |text: &str| {
                router.emit(
                    pane,
                    AgentEvent::StreamChunk {
                        text: text.to_string(),
                    },
                )
            };
            let sink: TextSink<'_> = &forward;

            let completion = tokio::select! {
                biased;
                _ = cancel.cancelled() => return self.stopped(&mut run),
                result = self.client.complete(request, Some(sink)) => result,
            };
            let completion = match completion {
                Ok(completion) => completion,
                Err(e) => {
                    warn!(invocation = %invocation.id, iteration, "Completion failed: {e}");
                    return self.fail(&mut run, e.to_string());
                }
            };
            if let Some(usage) = completion.usage {
                debug!(
                    iteration,
                    prompt_tokens = usage.prompt_tokens,
                    completion_tokens = usage.completion_tokens,
                    "Completion usage"
                );
            }

            // A replaced run must not write into the new run's history.
            if cancel.is_cancelled() {
                return self.stopped(&mut run);
            }
            let calls = completion.tool_calls.clone();
            self.record(
                &mut run,
                ConversationTurn::assistant(completion.text.clone(), calls.clone()),
            )
            .await;

            if calls.is_empty() {
                self.advance(&mut run, AgentState::Done);
                info!(invocation = %invocation.id, iterations = iteration, "Agent finished");
                self.emit(
                    &run,
                    AgentEvent::Done {
                        text: completion.text.clone(),
                    },
                );
                return run.outcome(completion.text);
            }

            self.advance(&mut run, AgentState::ToolDispatch { iteration });
            for call in &calls {
                self.emit(
                    &run,
                    AgentEvent::ToolStart {
                        tool: call.name.clone(),
                        call_id: call.id.clone(),
                        summary: describe_call(call),
                    },
                );

                let result = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return self.stopped(&mut run),
                    result = self.dispatcher.dispatch(&ctx, call) => result,
                };

                if cancel.is_cancelled() {
                    return self.stopped(&mut run);
                }
                let content = match result {
                    Ok(output) => {
                        self.emit(
                            &run,
                            AgentEvent::ToolDone {
                                tool: call.name.clone(),
                                call_id: call.id.clone(),
                                summary: output.summary,
                            },
                        );
                        output.content
                    }
                    Err(e) => {
                        debug!(tool = %call.name, "Tool failed: {e}");
                        self.emit(
                            &run,
                            AgentEvent::ToolError {
                                tool: call.name.clone(),
                                call_id: call.id.clone(),
                                error: e.to_string(),
                            },
                        );
                        failure_content(&e)
                    }
                };
                self.record(
                    &mut run,
                    ConversationTurn::tool_result(call.id.clone(), content.to_string()),
                )
                .await;
            }
        }

        self.advance(&mut run, AgentState::IterationLimit);
        let message = Error::IterationLimitExceeded {
            max: self.max_iterations,
        }
        .to_string();
        warn!(invocation = %invocation.id, "{message}");
        self.emit(
            &run,
            AgentEvent::IterationLimit {
                max: self.max_iterations,
                message: message.clone(),
            },
        );
        run.outcome(message)
    }

    /// Cached page model if fresh, else a live read, else a placeholder.
    /// `None` when cancelled while reading.
    async fn initial_page(
        &self,
        tab: &Arc<dyn TabConnection>,
        cancel: &CancellationToken,
    ) -> Option<PageModel> {
        let tab_id = tab.tab_id();
        if let Some(model) = self.memory.context(tab_id).await {
            debug!(tab = %tab_id, "Using cached page context");
            return Some(model);
        }

        let read = tokio::select! {
            biased;
            _ = cancel.cancelled() => return None,
            read = tab.page_context() => read,
        };
        Some(match read {
            Ok(model) => {
                self.memory.store_context(tab_id, model.clone()).await;
                model
            }
            Err(e) => {
                warn!(tab = %tab_id, "Page context unavailable: {e}");
                PageModel::placeholder(e.to_string())
            }
        })
    }

    async fn record(&self, run: &mut RunState<'_>, turn: ConversationTurn) {
        self.memory
            .append(run.tab_id, &run.invocation.pane, turn.clone())
            .await;
        run.transcript.push(turn);
    }

    fn emit(&self, run: &RunState<'_>, event: AgentEvent) {
        self.router.emit(&run.invocation.pane, event);
    }

    fn advance(&self, run: &mut RunState<'_>, next: AgentState) {
        debug_assert!(
            run.state.can_transition_to(next),
            "illegal transition {} -> {next}",
            run.state
        );
        debug!(invocation = %run.invocation.id, from = %run.state, to = %next, "State transition");
        run.state = next;
    }

    fn fail(&self, run: &mut RunState<'_>, message: String) -> RunOutcome {
        self.advance(run, AgentState::Error);
        self.emit(
            run,
            AgentEvent::Error {
                message: message.clone(),
            },
        );
        run.outcome(message)
    }

    fn stopped(&self, run: &mut RunState<'_>) -> RunOutcome {
        info!(invocation = %run.invocation.id, tab = %run.tab.tab_id(), "Agent stopped");
        self.fail(run, Error::Cancelled.to_string())
    }
}

impl RunState<'_> {
    fn outcome(&self, message: String) -> RunOutcome {
        RunOutcome {
            state: self.state,
            iterations: self.iterations,
            message,
        }
    }
}

/// The `tool_start` line shown while a call runs.
fn describe_call(call: &ToolCall) -> String {
    let Some(tool) = call.tool() else {
        return call.name.clone();
    };
    match ToolInvocation::parse(tool, &call.arguments) {
        Ok(ToolInvocation::ReadPage) => "Reading page".into(),
        Ok(ToolInvocation::ClickElement(args)) => format!("Clicking {}", args.describe()),
        Ok(ToolInvocation::FillForm(args)) => format!(
            "Filling {}",
            args.field_name.or(args.selector).unwrap_or_else(|| "field".into())
        ),
        Ok(ToolInvocation::Navigate(args)) => format!("Navigating to {}", args.url),
        Ok(ToolInvocation::Scroll(args)) => {
            if args.signed_delta() < 0 {
                "Scrolling up".into()
            } else {
                "Scrolling down".into()
            }
        }
        Ok(ToolInvocation::GetText(args)) => format!("Reading text of {}", args.describe()),
        Ok(ToolInvocation::Wait(args)) => match args.ms {
            Some(ms) => format!("Waiting {ms}ms"),
            None => "Waiting".into(),
        },
        Ok(ToolInvocation::SubmitForm(_)) => "Submitting form".into(),
        Ok(ToolInvocation::WebSearch(args)) => format!("Searching: {}", args.query),
        Err(_) => call.name.clone(),
    }
}
