//! End-to-end tests: a mock OpenAI-compatible endpoint drives the agent
//! against a live fixture page through the coordinator.

use std::pin::pin;
use std::sync::{Arc, Mutex};

use axum::Router;
use axum::body::Body;
use axum::extract::State;
use axum::http::header;
use axum::response::Response;
use axum::routing::post;
use futures::StreamExt;
use serde_json::{Value, json};
use tabpilot_agent::{AgentOrchestrator, AutoConfirm, ConfirmationBroker, ConfirmationGate, Coordinator};
use tabpilot_config::{AgentConfig, PageConfig};
use tabpilot_core::event::{AgentEvent, MessageRouter};
use tabpilot_core::memory::Preferences;
use tabpilot_core::message::{PaneId, TabId};
use tabpilot_core::page::TabConnection;
use tabpilot_core::protocol::{CoordinatorMessage, CoordinatorReply};
use tabpilot_memory::{InMemoryPreferences, SessionMemory};
use tabpilot_page::{Actuator, PageHandle, Site};
use tabpilot_providers::OpenAiCompatClient;

// ── Mock endpoint ────────────────────────────────────────────────────────

/// Each request gets the next SSE body; the last one repeats.
#[derive(Clone)]
struct MockState {
    bodies: Arc<Mutex<Vec<String>>>,
    requests: Arc<Mutex<Vec<Value>>>,
}

async fn chat_completions(State(state): State<MockState>, body: String) -> Response {
    state
        .requests
        .lock()
        .unwrap()
        .push(serde_json::from_str(&body).unwrap_or(Value::Null));
    let sse = {
        let mut bodies = state.bodies.lock().unwrap();
        if bodies.len() > 1 {
            bodies.remove(0)
        } else {
            bodies[0].clone()
        }
    };
    Response::builder()
        .header(header::CONTENT_TYPE, "text/event-stream")
        .body(Body::from(sse))
        .unwrap()
}

async fn serve(bodies: Vec<String>) -> (String, Arc<Mutex<Vec<Value>>>) {
    let state = MockState {
        bodies: Arc::new(Mutex::new(bodies)),
        requests: Arc::new(Mutex::new(Vec::new())),
    };
    let requests = state.requests.clone();
    let app = Router::new()
        .route("/v1/chat/completions", post(chat_completions))
        .with_state(state);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (format!("http://{addr}/v1"), requests)
}

fn frame(v: Value) -> String {
    format!("data: {v}\n\n")
}

/// An SSE body streaming `text` in two halves.
fn text_sse(text: &str) -> String {
    let mid = text.len() / 2;
    let (a, b) = text.split_at(mid);
    [
        frame(json!({"choices": [{"delta": {"role": "assistant", "content": a}}]})),
        frame(json!({"choices": [{"delta": {"content": b}, "finish_reason": "stop"}]})),
        "data: [DONE]\n\n".to_string(),
    ]
    .concat()
}

/// An SSE body carrying one tool call, its arguments split across frames.
fn tool_sse(id: &str, name: &str, args: Value) -> String {
    let args = args.to_string();
    let mid = args.len() / 2;
    let (a, b) = args.split_at(mid);
    [
        frame(json!({"choices": [{"delta": {"tool_calls": [
            {"index": 0, "id": id, "type": "function", "function": {"name": name, "arguments": a}}
        ]}}]})),
        frame(json!({"choices": [{"delta": {"tool_calls": [
            {"index": 0, "function": {"arguments": b}}
        ]}}]})),
        frame(json!({"choices": [{"delta": {}, "finish_reason": "tool_calls"}]})),
        "data: [DONE]\n\n".to_string(),
    ]
    .concat()
}

// ── Fixture page ─────────────────────────────────────────────────────────

const SHOP: &str = r#"{
  "pages": [
    {
      "url": "https://shop.example/",
      "title": "Shop",
      "body": [
        {"tag": "h1", "text": "Welcome"},
        {"tag": "a", "text": "Cart", "attrs": {"href": "/cart"}},
        {"tag": "form", "attrs": {"id": "search", "action": "/results"}, "children": [
          {"tag": "input", "attrs": {"name": "q", "placeholder": "Search"}},
          {"tag": "button", "text": "Go", "attrs": {"type": "submit"}}
        ]}
      ]
    },
    {"url": "https://shop.example/cart", "title": "Your cart", "body": [{"tag": "h1", "text": "Cart is empty"}]},
    {"url": "https://shop.example/results", "title": "Results", "body": [{"tag": "h1", "text": "3 results"}]}
  ]
}"#;

fn no_settle_agent() -> AgentConfig {
    AgentConfig {
        click_settle_ms: 0,
        navigate_settle_ms: 0,
        ..AgentConfig::default()
    }
}

fn no_settle_page() -> PageConfig {
    PageConfig {
        click_settle_ms: 0,
        scroll_settle_ms: 0,
        ..PageConfig::default()
    }
}

struct Harness {
    coordinator: Coordinator,
    router: MessageRouter,
    page: PageHandle,
}

async fn harness(base_url: &str, prefs: Preferences, gate: Arc<dyn ConfirmationGate>) -> Harness {
    let site = Site::from_json(SHOP).unwrap();
    let (page, _task) = Actuator::new(site, no_settle_page()).spawn(TabId(7));
    let client = OpenAiCompatClient::new("mock", base_url).unwrap();
    let orchestrator = AgentOrchestrator::new(
        Arc::new(client),
        Arc::new(InMemoryPreferences::new(prefs)),
        SessionMemory::default(),
        MessageRouter::default(),
        gate,
        None,
        no_settle_agent(),
    );
    let router = orchestrator.router().clone();
    Harness {
        coordinator: Coordinator::new(Arc::new(orchestrator), Arc::new(page.clone())),
        router,
        page,
    }
}

fn prefs() -> Preferences {
    Preferences {
        api_key: Some("nvapi-test".into()),
        ..Preferences::default()
    }
}

fn run_agent(message: &str) -> CoordinatorMessage {
    CoordinatorMessage::RunAgent {
        user_message: message.into(),
        target_pane: PaneId::from("left"),
        override_model: None,
    }
}

/// Collect events for `pane` until a terminal one.
async fn until_terminal(
    events: &mut (impl futures::Stream<Item = AgentEvent> + Unpin),
) -> Vec<AgentEvent> {
    let mut seen = Vec::new();
    while let Some(event) = events.next().await {
        let terminal = event.is_terminal();
        seen.push(event);
        if terminal {
            break;
        }
    }
    seen
}

// ── Scenarios ────────────────────────────────────────────────────────────

#[tokio::test]
async fn e2e_click_by_text_navigates_the_page() {
    let (url, requests) = serve(vec![
        tool_sse("call_0", "click_element", json!({"text": "cart", "description": "Cart link"})),
        text_sse("Your cart is empty."),
    ])
    .await;
    let h = harness(&url, prefs(), Arc::new(AutoConfirm::allow())).await;
    let mut events = pin!(h.router.subscribe_pane(PaneId::from("left")));

    let reply = h.coordinator.handle(run_agent("open my cart")).await;
    assert_eq!(reply, CoordinatorReply::Started { started: true });
    let seen = until_terminal(&mut events).await;

    assert!(seen.contains(&AgentEvent::ToolDone {
        tool: "click_element".into(),
        call_id: "call_0".into(),
        summary: "Clicked: Cart link".into(),
    }));
    assert_eq!(
        seen.last(),
        Some(&AgentEvent::Done {
            text: "Your cart is empty.".into()
        })
    );
    assert_eq!(h.page.page_context().await.unwrap().title, "Your cart");

    let requests = requests.lock().unwrap();
    assert_eq!(requests.len(), 2);
    assert_eq!(requests[0]["stream"], true);
    assert_eq!(requests[0]["tools"].as_array().unwrap().len(), 9);
    assert_eq!(requests[0]["messages"][0]["role"], "system");
    let tool_turn = requests[1]["messages"].as_array().unwrap().last().unwrap().clone();
    assert_eq!(tool_turn["role"], "tool");
    assert_eq!(tool_turn["tool_call_id"], "call_0");
}

#[tokio::test]
async fn e2e_text_fallback_reads_the_page() {
    let (url, _requests) = serve(vec![
        text_sse("Calling read_page() now"),
        text_sse("This is a shop with a search form."),
    ])
    .await;
    let h = harness(&url, prefs(), Arc::new(AutoConfirm::allow())).await;
    let mut events = pin!(h.router.subscribe_pane(PaneId::from("left")));

    h.coordinator.handle(run_agent("what is this page?")).await;
    let seen = until_terminal(&mut events).await;

    assert!(seen.contains(&AgentEvent::ToolDone {
        tool: "read_page".into(),
        call_id: "extracted_0".into(),
        summary: "Read page: Shop".into(),
    }));
    assert!(matches!(seen.last(), Some(AgentEvent::Done { .. })));
}

#[tokio::test]
async fn e2e_form_submission_waits_for_approval() {
    let (url, _requests) = serve(vec![
        tool_sse("call_0", "fill_form", json!({"field_name": "q", "value": "wool socks"})),
        tool_sse("call_1", "submit_form", json!({"selector": "#search"})),
        text_sse("Searched for wool socks."),
    ])
    .await;
    let broker = ConfirmationBroker::new(None);
    let mut asks = broker.subscribe();
    let h = harness(&url, prefs(), broker.clone()).await;
    let mut events = pin!(h.router.subscribe_pane(PaneId::from("left")));

    h.coordinator.handle(run_agent("search for wool socks")).await;

    let asked = asks.recv().await.unwrap();
    assert_eq!(asked.pane, PaneId::from("left"));
    assert_eq!(asked.tab, TabId(7));
    broker.resolve(&asked.id, true).unwrap();

    let seen = until_terminal(&mut events).await;
    assert!(seen.iter().any(|e| matches!(e, AgentEvent::ToolDone { tool, .. } if tool == "submit_form")));
    assert_eq!(h.page.page_context().await.unwrap().title, "Results");
}

#[tokio::test]
async fn e2e_navigation_denial_keeps_the_page() {
    let (url, requests) = serve(vec![
        tool_sse("call_0", "navigate", json!({"url": "https://elsewhere.example"})),
        text_sse("Navigation was declined."),
    ])
    .await;
    let prefs = Preferences {
        confirm_navigation: true,
        ..prefs()
    };
    let h = harness(&url, prefs, Arc::new(AutoConfirm::deny())).await;
    let mut events = pin!(h.router.subscribe_pane(PaneId::from("left")));

    h.coordinator.handle(run_agent("go elsewhere")).await;
    let seen = until_terminal(&mut events).await;

    assert!(seen.contains(&AgentEvent::ToolError {
        tool: "navigate".into(),
        call_id: "call_0".into(),
        error: "Navigation denied by user.".into(),
    }));
    assert!(matches!(seen.last(), Some(AgentEvent::Done { .. })));
    assert_eq!(h.page.page_context().await.unwrap().title, "Shop");

    let requests = requests.lock().unwrap();
    let tool_turn = requests[1]["messages"].as_array().unwrap().last().unwrap().clone();
    let content: Value = serde_json::from_str(tool_turn["content"].as_str().unwrap()).unwrap();
    assert_eq!(content, json!({"success": false, "error": "Navigation denied by user."}));
}

#[tokio::test]
async fn e2e_iteration_ceiling() {
    let (url, requests) = serve(vec![tool_sse("call_0", "scroll", json!({"direction": "down"}))]).await;
    let h = harness(&url, prefs(), Arc::new(AutoConfirm::allow())).await;
    let mut events = pin!(h.router.subscribe_pane(PaneId::from("left")));

    h.coordinator.handle(run_agent("scroll forever")).await;
    let seen = until_terminal(&mut events).await;

    assert!(matches!(seen.last(), Some(AgentEvent::IterationLimit { max: 15, .. })));
    assert_eq!(requests.lock().unwrap().len(), 15);
}

#[tokio::test]
async fn e2e_clear_history_forgets_prior_turns() {
    let (url, requests) = serve(vec![text_sse("first"), text_sse("second"), text_sse("third")]).await;
    let h = harness(&url, prefs(), Arc::new(AutoConfirm::allow())).await;
    let mut events = pin!(h.router.subscribe_pane(PaneId::from("left")));

    h.coordinator.handle(run_agent("one")).await;
    until_terminal(&mut events).await;
    h.coordinator.handle(run_agent("two")).await;
    until_terminal(&mut events).await;

    let reply = h.coordinator.handle(CoordinatorMessage::ClearHistory).await;
    assert_eq!(reply, CoordinatorReply::Cleared { cleared: true });
    h.coordinator.handle(run_agent("three")).await;
    until_terminal(&mut events).await;

    let requests = requests.lock().unwrap();
    let turns = |i: usize| requests[i]["messages"].as_array().unwrap().len();
    // system + user
    assert_eq!(turns(0), 2);
    // system + user + assistant + user
    assert_eq!(turns(1), 4);
    assert_eq!(turns(2), 2);
}
