//! Process-scoped session memory: bounded conversation history per
//! (tab, pane) and a freshness-bounded page-context cache per tab.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tabpilot_core::message::{ConversationTurn, PaneId, Role, TabId};
use tabpilot_core::page::PageModel;
use tokio::sync::RwLock;
use tokio::time::Instant;
use tracing::debug;

/// Turns kept per history key.
pub const DEFAULT_HISTORY_CAPACITY: usize = 20;

/// How long a cached page model stays usable.
pub const DEFAULT_CONTEXT_TTL: Duration = Duration::from_millis(30_000);

type HistoryKey = (TabId, PaneId);

struct CachedContext {
    model: PageModel,
    stored_at: Instant,
}

/// Shared, cloneable session store. Lifetime is the process lifetime.
#[derive(Clone)]
pub struct SessionMemory {
    capacity: usize,
    context_ttl: Duration,
    histories: Arc<RwLock<HashMap<HistoryKey, Vec<ConversationTurn>>>>,
    contexts: Arc<RwLock<HashMap<TabId, CachedContext>>>,
}

impl SessionMemory {
    pub fn new(capacity: usize, context_ttl: Duration) -> Self {
        Self {
            capacity: capacity.max(1),
            context_ttl,
            histories: Arc::new(RwLock::new(HashMap::new())),
            contexts: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// History for one (tab, pane), oldest first, reduced to complete
    /// call groups (see [`paired_turns`]).
    pub async fn history(&self, tab: TabId, pane: &PaneId) -> Vec<ConversationTurn> {
        self.histories
            .read()
            .await
            .get(&(tab, pane.clone()))
            .map(|turns| paired_turns(turns))
            .unwrap_or_default()
    }

    /// Append a turn, stamping it now and dropping the oldest turns beyond
    /// capacity. A window never starts with a tool result.
    pub async fn append(&self, tab: TabId, pane: &PaneId, mut turn: ConversationTurn) {
        turn.timestamp = Utc::now();
        let mut histories = self.histories.write().await;
        let history = histories.entry((tab, pane.clone())).or_default();
        history.push(turn);
        if history.len() > self.capacity {
            let excess = history.len() - self.capacity;
            history.drain(..excess);
            let orphans = history.iter().take_while(|t| t.role == Role::Tool).count();
            if orphans > 0 {
                history.drain(..orphans);
                debug!(%tab, %pane, orphans, "Dropped tool results cut from their call");
            }
        }
    }

    /// Clear every pane's history for `tab`. Returns how many panes had any.
    pub async fn clear_tab(&self, tab: TabId) -> usize {
        let mut histories = self.histories.write().await;
        let before = histories.len();
        histories.retain(|(t, _), _| *t != tab);
        let cleared = before - histories.len();
        debug!(%tab, panes = cleared, "Cleared tab history");
        cleared
    }

    /// Drop everything known about a closed tab.
    pub async fn forget_tab(&self, tab: TabId) {
        self.clear_tab(tab).await;
        self.invalidate_context(tab).await;
    }

    /// Forget the cached page model after the page may have changed.
    pub async fn invalidate_context(&self, tab: TabId) {
        if self.contexts.write().await.remove(&tab).is_some() {
            debug!(%tab, "Invalidated page context");
        }
    }

    pub async fn store_context(&self, tab: TabId, model: PageModel) {
        self.contexts.write().await.insert(
            tab,
            CachedContext {
                model,
                stored_at: Instant::now(),
            },
        );
    }

    /// The cached model for `tab` if still fresh. Stale entries are evicted
    /// and read as absent.
    pub async fn context(&self, tab: TabId) -> Option<PageModel> {
        {
            let contexts = self.contexts.read().await;
            match contexts.get(&tab) {
                Some(c) if c.stored_at.elapsed() < self.context_ttl => {
                    return Some(c.model.clone());
                }
                Some(_) => {}
                None => return None,
            }
        }
        self.contexts.write().await.remove(&tab);
        debug!(%tab, "Evicted stale page context");
        None
    }

    /// Every fresh cached context, ordered by tab id.
    pub async fn all_tab_contexts(&self) -> Vec<(TabId, PageModel)> {
        let contexts = self.contexts.read().await;
        let mut fresh: Vec<_> = contexts
            .iter()
            .filter(|(_, c)| c.stored_at.elapsed() < self.context_ttl)
            .map(|(tab, c)| (*tab, c.model.clone()))
            .collect();
        fresh.sort_by_key(|(tab, _)| *tab);
        fresh
    }
}

/// Keep only turns a chat endpoint accepts in order.
///
/// An assistant turn with tool calls stays only when every call is answered
/// by the tool turns right after it. Tool turns that answer no call of the
/// preceding assistant turn are dropped.
pub fn paired_turns(turns: &[ConversationTurn]) -> Vec<ConversationTurn> {
    let mut kept = Vec::with_capacity(turns.len());
    let mut i = 0;
    while i < turns.len() {
        let turn = &turns[i];
        if turn.role == Role::Tool {
            i += 1;
            continue;
        }
        if !turn.has_tool_calls() {
            kept.push(turn.clone());
            i += 1;
            continue;
        }

        let end = i + 1 + turns[i + 1..]
            .iter()
            .take_while(|t| t.role == Role::Tool)
            .count();
        let answers = |id: &str| {
            turns[i + 1..end]
                .iter()
                .any(|t| t.tool_call_id.as_deref() == Some(id))
        };
        if turn.tool_calls.iter().all(|c| answers(&c.id)) {
            kept.push(turn.clone());
            kept.extend(turns[i + 1..end].iter().filter(|t| {
                turn.tool_calls
                    .iter()
                    .any(|c| t.tool_call_id.as_deref() == Some(c.id.as_str()))
            }).cloned());
        }
        i = end;
    }
    kept
}

impl Default for SessionMemory {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_CAPACITY, DEFAULT_CONTEXT_TTL)
    }
}
