//! In-memory document model driven by the actuator.
//!
//! A [`Document`] is an arena of [`Node`]s in document order with just the
//! behaviour the actuator needs: text content, visibility, focus, values,
//! scrolling, hit testing and an event log of everything dispatched.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tabpilot_core::page::Point;

pub type NodeId = usize;

/// Layout box in document coordinates.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Rect {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl Rect {
    pub fn contains(&self, x: f64, y: f64) -> bool {
        x >= self.x && x < self.x + self.width && y >= self.y && y < self.y + self.height
    }

    pub fn center_y(&self) -> f64 {
        self.y + self.height / 2.0
    }

    pub fn bottom(&self) -> f64 {
        self.y + self.height
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    pub id: NodeId,
    /// Lowercase tag name
    pub tag: String,
    pub attrs: BTreeMap<String, String>,
    /// The node's own text, rendered before its children
    pub text: String,
    pub children: Vec<NodeId>,
    pub parent: Option<NodeId>,
    /// Current form-control value
    pub value: String,
    pub rect: Option<Rect>,
    pub hidden: bool,
}

impl Node {
    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attrs.get(name).map(String::as_str)
    }

    pub fn has_class(&self, class: &str) -> bool {
        self.attr("class")
            .is_some_and(|c| c.split_whitespace().any(|c| c == class))
    }

    pub fn is_form_control(&self) -> bool {
        matches!(self.tag.as_str(), "input" | "select" | "textarea")
    }

    /// `type` of an input, defaulting like the DOM does.
    pub fn input_type(&self) -> Option<String> {
        match self.tag.as_str() {
            "input" => Some(self.attr("type").unwrap_or("text").to_ascii_lowercase()),
            "button" => Some(self.attr("type").unwrap_or("submit").to_ascii_lowercase()),
            "select" => Some(if self.attrs.contains_key("multiple") {
                "select-multiple".into()
            } else {
                "select-one".into()
            }),
            "textarea" => Some("textarea".into()),
            _ => None,
        }
    }
}

/// Everything dispatched to the document, in order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum DomEvent {
    ScrollIntoView { node: NodeId },
    Focus { node: NodeId },
    Click { node: NodeId },
    Input { node: NodeId, value: String },
    Change { node: NodeId },
    Submit { form: NodeId },
    Scroll { scroll_y: i64 },
    Navigate { url: String },
}

#[derive(Debug, Clone)]
pub struct Document {
    pub url: String,
    pub title: String,
    nodes: Vec<Node>,
    pub scroll_y: i64,
    pub page_height: i64,
    pub viewport_height: i64,
    pub focused: Option<NodeId>,
    events: Vec<DomEvent>,
}

/// Events kept per document; older ones are dropped first.
pub const EVENT_LOG_CAPACITY: usize = 256;

/// Default viewport height for documents built without a config.
pub const DEFAULT_VIEWPORT_HEIGHT: i64 = 800;

impl Document {
    /// An empty document with an `<html><body>` skeleton.
    pub fn new(url: impl Into<String>, title: impl Into<String>) -> Self {
        let mut doc = Self {
            url: url.into(),
            title: title.into(),
            nodes: Vec::new(),
            scroll_y: 0,
            page_height: DEFAULT_VIEWPORT_HEIGHT,
            viewport_height: DEFAULT_VIEWPORT_HEIGHT,
            focused: None,
            events: Vec::new(),
        };
        let html = doc.push_node(None, "html");
        doc.push_node(Some(html), "body");
        doc
    }

    fn push_node(&mut self, parent: Option<NodeId>, tag: &str) -> NodeId {
        let id = self.nodes.len();
        self.nodes.push(Node {
            id,
            tag: tag.to_ascii_lowercase(),
            attrs: BTreeMap::new(),
            text: String::new(),
            children: Vec::new(),
            parent,
            value: String::new(),
            rect: None,
            hidden: false,
        });
        if let Some(p) = parent {
            self.nodes[p].children.push(id);
        }
        id
    }

    /// Append a new element under `parent`.
    pub fn append(&mut self, parent: NodeId, tag: &str) -> NodeId {
        self.push_node(Some(parent), tag)
    }

    pub fn root(&self) -> NodeId {
        0
    }

    /// The `<body>` element (created by [`Document::new`]).
    pub fn body(&self) -> NodeId {
        self.nodes[self.root()]
            .children
            .iter()
            .copied()
            .find(|&c| self.nodes[c].tag == "body")
            .unwrap_or(self.root())
    }

    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id]
    }

    pub fn node_mut(&mut self, id: NodeId) -> &mut Node {
        &mut self.nodes[id]
    }

    /// All nodes in document (pre-)order, root first.
    pub fn all(&self) -> Vec<NodeId> {
        self.subtree(self.root())
    }

    /// `id` and its descendants in document order.
    pub fn subtree(&self, id: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut stack = vec![id];
        while let Some(n) = stack.pop() {
            out.push(n);
            stack.extend(self.nodes[n].children.iter().rev().copied());
        }
        out
    }

    /// Descendants of `id` (excluding itself) in document order.
    pub fn descendants(&self, id: NodeId) -> Vec<NodeId> {
        let mut all = self.subtree(id);
        all.remove(0);
        all
    }

    pub fn ancestors(&self, id: NodeId) -> impl Iterator<Item = NodeId> + '_ {
        std::iter::successors(self.nodes[id].parent, |&p| self.nodes[p].parent)
    }

    /// Nearest inclusive ancestor with `tag`.
    pub fn closest(&self, id: NodeId, tag: &str) -> Option<NodeId> {
        std::iter::once(id)
            .chain(self.ancestors(id))
            .find(|&n| self.nodes[n].tag == tag)
    }

    pub fn is_visible(&self, id: NodeId) -> bool {
        let hidden = |n: &Node| {
            n.hidden
                || n.attrs.contains_key("hidden")
                || (n.tag == "input" && n.attr("type") == Some("hidden"))
        };
        !std::iter::once(id)
            .chain(self.ancestors(id))
            .any(|n| hidden(&self.nodes[n]))
    }

    /// Rendered text of `id`: own text and visible descendants, whitespace
    /// collapsed.
    pub fn inner_text(&self, id: NodeId) -> String {
        if !self.is_visible(id) {
            return String::new();
        }
        let mut parts: Vec<&str> = Vec::new();
        let mut stack = vec![id];
        while let Some(n) = stack.pop() {
            let node = &self.nodes[n];
            if node.hidden || node.attrs.contains_key("hidden") || matches!(node.tag.as_str(), "script" | "style") {
                continue;
            }
            if !node.text.is_empty() {
                parts.push(&node.text);
            }
            stack.extend(node.children.iter().rev().copied());
        }
        parts
            .iter()
            .flat_map(|p| p.split_whitespace())
            .collect::<Vec<_>>()
            .join(" ")
    }

    // --- Mutations (each records a DomEvent) ---

    pub fn focus(&mut self, id: NodeId) {
        self.focused = Some(id);
        self.record(DomEvent::Focus { node: id });
    }

    /// Activate `id`. Links navigate; submit buttons submit their form.
    pub fn click(&mut self, id: NodeId) {
        self.record(DomEvent::Click { node: id });
        let node = &self.nodes[id];
        if node.tag == "a"
            && let Some(href) = node.attr("href")
        {
            let url = resolve_url(&self.url, href);
            self.navigate(&url);
            return;
        }
        let submits = (node.tag == "button" && node.input_type().as_deref() == Some("submit"))
            || (node.tag == "input" && node.attr("type") == Some("submit"));
        if submits && let Some(form) = self.closest(id, "form") {
            self.submit(form);
        }
    }

    pub fn set_value(&mut self, id: NodeId, value: &str) {
        self.nodes[id].value = value.to_string();
    }

    /// Dispatch `input` then `change` for `id`.
    pub fn dispatch_input_events(&mut self, id: NodeId) {
        let value = self.nodes[id].value.clone();
        self.record(DomEvent::Input { node: id, value });
        self.record(DomEvent::Change { node: id });
    }

    pub fn submit(&mut self, form: NodeId) {
        self.record(DomEvent::Submit { form });
    }

    /// Shift the viewport by `delta`, clamped to the document. Returns the
    /// new scroll position.
    pub fn scroll_by(&mut self, delta: i64) -> i64 {
        self.scroll_to(self.scroll_y.saturating_add(delta))
    }

    fn scroll_to(&mut self, y: i64) -> i64 {
        let max = (self.page_height - self.viewport_height).max(0);
        self.scroll_y = y.clamp(0, max);
        self.record(DomEvent::Scroll {
            scroll_y: self.scroll_y,
        });
        self.scroll_y
    }

    /// Scroll so the element's box is vertically centered.
    pub fn scroll_into_view(&mut self, id: NodeId) {
        self.record(DomEvent::ScrollIntoView { node: id });
        if let Some(rect) = self.nodes[id].rect {
            let target = rect.center_y() as i64 - self.viewport_height / 2;
            self.scroll_to(target);
        }
    }

    /// Record a location change. Content replacement is up to the owner.
    pub fn navigate(&mut self, url: &str) {
        self.url = url.to_string();
        self.record(DomEvent::Navigate {
            url: url.to_string(),
        });
    }

    /// Deepest visible element whose box contains the viewport point.
    pub fn hit_test(&self, point: Point) -> Option<NodeId> {
        let doc_y = point.y + self.scroll_y as f64;
        self.all()
            .into_iter()
            .filter(|&n| {
                self.nodes[n]
                    .rect
                    .is_some_and(|r| r.contains(point.x, doc_y))
                    && self.is_visible(n)
            })
            .last()
    }

    fn record(&mut self, event: DomEvent) {
        self.events.push(event);
        if self.events.len() > EVENT_LOG_CAPACITY {
            let excess = self.events.len() - EVENT_LOG_CAPACITY;
            self.events.drain(..excess);
        }
    }

    /// The most recent events, oldest first.
    pub fn events(&self) -> &[DomEvent] {
        &self.events
    }

    /// Take the new URL if the last recorded event is a navigation.
    pub fn pending_navigation(&self) -> Option<&str> {
        match self.events.last() {
            Some(DomEvent::Navigate { url }) => Some(url),
            _ => None,
        }
    }
}

/// Resolve `href` against `base` for the common cases: absolute URLs,
/// scheme-relative, root-relative, fragments and plain relative paths.
pub fn resolve_url(base: &str, href: &str) -> String {
    let href = href.trim();
    if href.contains("://") || href.starts_with("mailto:") || href.starts_with("javascript:") {
        return href.to_string();
    }

    let (scheme, rest) = base.split_once("://").unwrap_or(("https", base));
    let (origin_host, path) = match rest.find('/') {
        Some(i) => (&rest[..i], &rest[i..]),
        None => (rest, "/"),
    };

    if let Some(stripped) = href.strip_prefix("//") {
        return format!("{scheme}://{stripped}");
    }
    if href.starts_with('/') {
        return format!("{scheme}://{origin_host}{href}");
    }
    if href.starts_with('#') {
        let without_fragment = base.split('#').next().unwrap_or(base);
        return format!("{without_fragment}{href}");
    }

    let path = path.split(['?', '#']).next().unwrap_or("/");
    let dir = match path.rfind('/') {
        Some(i) => &path[..=i],
        None => "/",
    };
    format!("{scheme}://{origin_host}{dir}{href}")
}
