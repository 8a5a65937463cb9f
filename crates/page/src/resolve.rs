//! Element resolution with a fallback chain of locator strategies.

use std::sync::LazyLock;

use tabpilot_core::page::Target;
use tracing::{debug, warn};

use crate::dom::{Document, NodeId};
use crate::extract::interactive_elements;
use crate::selector::Selector;

static CLICKABLE: LazyLock<Option<Selector>> =
    LazyLock::new(|| Selector::parse(r#"button, a, [role="button"]"#).ok());

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LocatorStrategy {
    Selector,
    Index,
    Text,
    AriaLabel,
    Point,
}

impl LocatorStrategy {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Selector => "selector",
            Self::Index => "index",
            Self::Text => "text",
            Self::AriaLabel => "aria-label",
            Self::Point => "point",
        }
    }

    /// All strategies in the order they are tried.
    pub fn fallback_chain() -> [LocatorStrategy; 5] {
        [
            Self::Selector,
            Self::Index,
            Self::Text,
            Self::AriaLabel,
            Self::Point,
        ]
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Resolution {
    pub node: NodeId,
    pub strategy: LocatorStrategy,
}

/// Resolve `target` to one element; first strategy with a match wins.
pub fn resolve(doc: &Document, target: &Target) -> Option<Resolution> {
    for strategy in LocatorStrategy::fallback_chain() {
        if let Some(node) = try_strategy(doc, target, strategy) {
            debug!(strategy = strategy.name(), node, "Resolved element");
            return Some(Resolution { node, strategy });
        }
    }
    debug!(?target, "All locator strategies exhausted");
    None
}

fn try_strategy(doc: &Document, target: &Target, strategy: LocatorStrategy) -> Option<NodeId> {
    match strategy {
        LocatorStrategy::Selector => {
            let raw = target.selector.as_deref()?;
            match Selector::parse(raw) {
                Ok(sel) => sel.query_first(doc),
                Err(e) => {
                    warn!(error = %e, "Skipping selector strategy");
                    None
                }
            }
        }
        LocatorStrategy::Index => {
            let index = target.index?;
            interactive_elements(doc).get(index).copied()
        }
        LocatorStrategy::Text => by_text(doc, target.text.as_deref()?),
        LocatorStrategy::AriaLabel => {
            let label = target.aria_label.as_deref()?;
            doc.all()
                .into_iter()
                .find(|&n| doc.node(n).attr("aria-label") == Some(label))
        }
        LocatorStrategy::Point => doc.hit_test(target.point?),
    }
}

/// Case-insensitive substring match over clickable candidates. An exact
/// (case-insensitive) match beats an earlier partial one.
fn by_text(doc: &Document, text: &str) -> Option<NodeId> {
    let needle = text.trim().to_lowercase();
    if needle.is_empty() {
        return None;
    }
    let candidates: Vec<(NodeId, String)> = CLICKABLE
        .as_ref()?
        .query_all(doc)
        .into_iter()
        .map(|n| (n, doc.inner_text(n).to_lowercase()))
        .filter(|(_, t)| t.contains(&needle))
        .collect();

    candidates
        .iter()
        .find(|(_, t)| *t == needle)
        .or_else(|| candidates.first())
        .map(|(n, _)| *n)
}
