//! `tabpilot run`: drive a page fixture with the agent.

use std::io::Write;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, bail};
use clap::Args;
use futures::{Stream, StreamExt};
use tabpilot_agent::{
    AgentOrchestrator, AutoConfirm, ConfirmationBroker, ConfirmationGate, ConfirmationRequest,
    Coordinator,
};
use tabpilot_config::{AppConfig, is_local_model};
use tabpilot_core::event::{AgentEvent, AgentUpdate, MessageRouter};
use tabpilot_core::message::{PaneId, TabId};
use tabpilot_core::protocol::{CoordinatorMessage, PaneMessage};
use tabpilot_memory::{FilePreferenceStore, InMemoryPreferences, SessionMemory};
use tabpilot_page::{Actuator, Site};
use tabpilot_providers::OpenAiCompatClient;
use tabpilot_tools::{SearchProvider, TavilySearch};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::{broadcast, mpsc};
use tracing::warn;

use super::{effective_preferences, load_config};

#[derive(Args, Clone, Debug)]
pub struct RunArgs {
    /// Page or site fixture (JSON)
    #[arg(short, long)]
    pub page: PathBuf,

    /// Send a single message instead of entering interactive mode
    #[arg(short, long)]
    pub message: Option<String>,

    /// Pane the agent's events are addressed to
    #[arg(long, default_value = "cli")]
    pub pane: String,

    /// Model to use instead of the preferred one
    #[arg(long)]
    pub model: Option<String>,

    /// Allow navigation and form submission without asking
    #[arg(short, long)]
    pub yes: bool,

    /// Print agent events as JSON lines
    #[arg(long)]
    pub json: bool,
}

pub async fn run(args: RunArgs) -> anyhow::Result<()> {
    let config = load_config()?;
    let prefs = effective_preferences(&config, &FilePreferenceStore::default()).await?;

    let model = args.model.clone().unwrap_or_else(|| prefs.model.clone());
    if prefs.api_key.is_none() && !is_local_model(&model) {
        eprintln!();
        eprintln!("  ERROR: No API key configured for {model}");
        eprintln!();
        eprintln!("  Set TABPILOT_API_KEY (or NVIDIA_API_KEY), or run:");
        eprintln!("    tabpilot prefs set api_key <key>");
        eprintln!();
        eprintln!("  Models prefixed 'ollama/' run locally and need no key.");
        eprintln!();
        bail!("No API key found. See above for setup instructions.");
    }

    let site = Site::load(&args.page)
        .with_context(|| format!("Failed to load page fixture {}", args.page.display()))?;
    let (tab, _page_task) = Actuator::new(site, config.page.clone()).spawn(TabId(1));

    let broker = (!args.yes).then(|| {
        ConfirmationBroker::new(config.confirmations.timeout_secs.map(Duration::from_secs))
    });
    let gate: Arc<dyn ConfirmationGate> = match &broker {
        Some(broker) => broker.clone(),
        None => Arc::new(AutoConfirm::allow()),
    };

    let orchestrator = build_orchestrator(&config, InMemoryPreferences::new(prefs), gate)?;
    let router = orchestrator.router().clone();
    let coordinator = Coordinator::new(Arc::new(orchestrator), Arc::new(tab));

    let mut session = Session {
        coordinator,
        pane: PaneId::from(&args.pane),
        override_model: args.model.clone(),
        events: Box::pin(router.subscribe_pane(PaneId::from(&args.pane))),
        confirmations: broker.as_ref().map(|b| b.subscribe()),
        broker,
        lines: stdin_lines(),
        renderer: Renderer::new(args.json, PaneId::from(&args.pane)),
    };

    match args.message {
        Some(message) => session.send(message).await,
        None => session.interactive(&model).await,
    }
}

fn build_orchestrator(
    config: &AppConfig,
    preferences: InMemoryPreferences,
    gate: Arc<dyn ConfirmationGate>,
) -> anyhow::Result<AgentOrchestrator> {
    let client = OpenAiCompatClient::from_config(config)?;
    let search: Option<Arc<dyn SearchProvider>> = match TavilySearch::from_config(&config.search) {
        Ok(search) => Some(Arc::new(search)),
        Err(e) => {
            warn!("Web search unavailable: {e}");
            None
        }
    };
    let memory = SessionMemory::new(config.agent.history_capacity, config.agent.context_ttl());

    Ok(AgentOrchestrator::new(
        Arc::new(client),
        Arc::new(preferences),
        memory,
        MessageRouter::default(),
        gate,
        search,
        config.agent.clone(),
    )
    .with_temperature(config.default_temperature))
}

/// Lines from stdin, read on their own task.
fn stdin_lines() -> mpsc::Receiver<String> {
    let (tx, rx) = mpsc::channel(8);
    tokio::spawn(async move {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            if tx.send(line).await.is_err() {
                break;
            }
        }
    });
    rx
}

enum Step {
    Event(Option<AgentEvent>),
    Confirm(ConfirmationRequest),
    Interrupt,
}

struct Session {
    coordinator: Coordinator,
    pane: PaneId,
    override_model: Option<String>,
    events: Pin<Box<dyn Stream<Item = AgentEvent> + Send>>,
    broker: Option<Arc<ConfirmationBroker>>,
    confirmations: Option<broadcast::Receiver<ConfirmationRequest>>,
    lines: mpsc::Receiver<String>,
    renderer: Renderer,
}

impl Session {
    async fn interactive(&mut self, model: &str) -> anyhow::Result<()> {
        println!();
        println!("  TabPilot, interactive mode");
        println!();
        println!("  Model:     {model}");
        println!("  Pane:      {}", self.pane);
        println!();
        println!("  Type a request and press Enter.");
        println!("  '/clear' forgets this tab's history; 'exit' quits.");
        println!("  Ctrl+C stops a running request.");
        println!();

        loop {
            print!("  You > ");
            std::io::stdout().flush()?;
            let Some(line) = self.lines.recv().await else {
                break;
            };
            let line = line.trim();
            match line {
                "" => continue,
                "exit" | "quit" => break,
                "/clear" => {
                    self.coordinator
                        .handle(CoordinatorMessage::ClearHistory)
                        .await;
                    println!("  History cleared.");
                }
                message => {
                    self.send(message.to_string()).await?;
                    println!();
                }
            }
        }
        Ok(())
    }

    /// Start one invocation and render its events until it ends.
    async fn send(&mut self, message: String) -> anyhow::Result<()> {
        self.coordinator
            .handle(CoordinatorMessage::RunAgent {
                user_message: message,
                target_pane: self.pane.clone(),
                override_model: self.override_model.clone(),
            })
            .await;
        self.renderer.reset();

        let mut stdout = std::io::stdout();
        loop {
            let step = tokio::select! {
                event = self.events.next() => Step::Event(event),
                Some(request) = next_confirmation(&mut self.confirmations) => Step::Confirm(request),
                _ = tokio::signal::ctrl_c() => Step::Interrupt,
            };

            match step {
                Step::Event(None) => break,
                Step::Event(Some(event)) => {
                    self.renderer.render(&event, &mut stdout)?;
                    if event.is_terminal() {
                        break;
                    }
                }
                Step::Confirm(request) => {
                    let allow = self.ask(&request).await?;
                    if let Some(broker) = &self.broker
                        && let Err(e) = broker.resolve(&request.id, allow)
                    {
                        warn!("Confirmation could not be delivered: {e}");
                    }
                }
                Step::Interrupt => {
                    self.coordinator
                        .handle(CoordinatorMessage::StopAgent {
                            target_pane: self.pane.clone(),
                        })
                        .await;
                }
            }
        }
        Ok(())
    }

    async fn ask(&mut self, request: &ConfirmationRequest) -> anyhow::Result<bool> {
        let mut stdout = std::io::stdout();
        self.renderer.end_line(&mut stdout)?;
        print!("  Allow: {}? [y/N] ", request.summary);
        stdout.flush()?;
        Ok(self
            .lines
            .recv()
            .await
            .is_some_and(|answer| is_yes(&answer)))
    }
}

async fn next_confirmation(
    requests: &mut Option<broadcast::Receiver<ConfirmationRequest>>,
) -> Option<ConfirmationRequest> {
    let Some(requests) = requests else {
        return std::future::pending().await;
    };
    loop {
        match requests.recv().await {
            Ok(request) => return Some(request),
            Err(broadcast::error::RecvError::Lagged(_)) => continue,
            Err(broadcast::error::RecvError::Closed) => return None,
        }
    }
}

fn is_yes(answer: &str) -> bool {
    matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes")
}

/// Turns agent events into terminal output.
struct Renderer {
    json: bool,
    pane: PaneId,
    /// Streamed text left the cursor mid-line
    mid_line: bool,
    /// Some text was streamed during the current invocation
    streamed: bool,
}

impl Renderer {
    fn new(json: bool, pane: PaneId) -> Self {
        Self {
            json,
            pane,
            mid_line: false,
            streamed: false,
        }
    }

    fn reset(&mut self) {
        self.mid_line = false;
        self.streamed = false;
    }

    fn end_line(&mut self, out: &mut impl Write) -> std::io::Result<()> {
        if self.mid_line {
            writeln!(out)?;
            self.mid_line = false;
        }
        Ok(())
    }

    fn render(&mut self, event: &AgentEvent, out: &mut impl Write) -> std::io::Result<()> {
        if self.json {
            let update = PaneMessage::AgentUpdate(AgentUpdate {
                target_pane: self.pane.clone(),
                event: event.clone(),
            });
            let line = serde_json::to_string(&update).map_err(std::io::Error::other)?;
            writeln!(out, "{line}")?;
            return out.flush();
        }

        match event {
            AgentEvent::Thinking { iteration } => {
                if *iteration > 1 {
                    self.end_line(out)?;
                }
            }
            AgentEvent::StreamChunk { text } => {
                if !self.mid_line {
                    write!(out, "  Assistant > ")?;
                }
                write!(out, "{text}")?;
                self.mid_line = true;
                self.streamed = true;
            }
            AgentEvent::ToolStart { summary, .. } => {
                self.end_line(out)?;
                writeln!(out, "  -> {summary}")?;
            }
            AgentEvent::ToolDone { summary, .. } => writeln!(out, "     ok: {summary}")?,
            AgentEvent::ToolError { tool, error, .. } => {
                writeln!(out, "     failed: {tool}: {error}")?
            }
            AgentEvent::Done { text } => {
                if !self.streamed && !text.is_empty() {
                    write!(out, "  Assistant > {text}")?;
                    self.mid_line = true;
                }
                self.end_line(out)?;
            }
            AgentEvent::Error { message } => {
                self.end_line(out)?;
                writeln!(out, "  [Error] {message}")?;
            }
            AgentEvent::IterationLimit { message, .. } => {
                self.end_line(out)?;
                writeln!(out, "  [Stopped] {message}")?;
            }
        }
        out.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn render_all(json: bool, events: &[AgentEvent]) -> String {
        let mut renderer = Renderer::new(json, PaneId::from("cli"));
        let mut out = Vec::new();
        for event in events {
            renderer.render(event, &mut out).unwrap();
        }
        String::from_utf8(out).unwrap()
    }

    #[test]
    fn streamed_text_is_not_repeated_on_done() {
        let out = render_all(
            false,
            &[
                AgentEvent::Thinking { iteration: 1 },
                AgentEvent::StreamChunk { text: "Hel".into() },
                AgentEvent::StreamChunk { text: "lo".into() },
                AgentEvent::Done {
                    text: "Hello".into(),
                },
            ],
        );
        assert_eq!(out, "  Assistant > Hello\n");
    }

    #[test]
    fn tool_lines_break_streamed_text() {
        let out = render_all(
            false,
            &[
                AgentEvent::StreamChunk {
                    text: "Let me look.".into(),
                },
                AgentEvent::ToolStart {
                    tool: "read_page".into(),
                    call_id: "call_0".into(),
                    summary: "Reading page".into(),
                },
                AgentEvent::ToolError {
                    tool: "navigate".into(),
                    call_id: "call_1".into(),
                    error: "Navigation denied by user.".into(),
                },
            ],
        );
        assert_eq!(
            out,
            "  Assistant > Let me look.\n  -> Reading page\n     failed: navigate: Navigation denied by user.\n"
        );
    }

    #[test]
    fn unstreamed_answer_is_printed() {
        let out = render_all(false, &[AgentEvent::Done { text: "Done.".into() }]);
        assert_eq!(out, "  Assistant > Done.\n");
    }

    #[test]
    fn json_mode_prints_one_object_per_event() {
        let out = render_all(
            true,
            &[
                AgentEvent::Thinking { iteration: 1 },
                AgentEvent::Error {
                    message: "Agent stopped by user.".into(),
                },
            ],
        );
        let lines: Vec<serde_json::Value> = out
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0]["type"], "AGENT_UPDATE");
        assert_eq!(lines[0]["targetPane"], "cli");
        assert_eq!(lines[0]["event"], "thinking");
        assert_eq!(lines[1]["message"], "Agent stopped by user.");
    }

    #[test]
    fn yes_answers() {
        assert!(is_yes("y"));
        assert!(is_yes(" YES \n"));
        assert!(!is_yes(""));
        assert!(!is_yes("no"));
    }
}
