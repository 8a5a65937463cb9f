//! # TabPilot Core
//!
//! Domain types, traits, and error definitions for the TabPilot browser agent.
//! This crate has no HTTP or DOM dependencies; it defines the vocabulary that
//! the coordinator, the in-page actuator and the completion client share.
//!
//! ## Design Philosophy
//!
//! Every seam between components is a trait or a typed message here:
//! - [`provider::CompletionClient`] for the remote completion endpoint
//! - [`page::TabConnection`] for the coordinator → actuator boundary
//! - [`memory::PreferenceStore`] for durable settings
//! - [`event::MessageRouter`] for presentation panes
//!
//! Implementations live in their respective crates, so tests can swap any of
//! them for a scripted double.

pub mod error;
pub mod event;
pub mod memory;
pub mod message;
pub mod page;
pub mod protocol;
pub mod provider;
pub mod tool;

// Re-export key types at crate root for ergonomics
pub use error::{ActionError, Error, MemoryError, ProviderError, Result, ToolError};
pub use event::{AgentEvent, AgentUpdate, MessageRouter};
pub use memory::{PreferenceStore, Preferences};
pub use message::{ConversationTurn, PaneId, Role, TabId, ToolCall};
pub use page::{ActionRequest, ActionResult, PageModel, Point, TabConnection, Target};
pub use protocol::{CoordinatorMessage, CoordinatorReply, PageMessage, PageReply};
pub use provider::{
    Completion, CompletionClient, CompletionRequest, TextSink, ToolDefinition, Usage,
};
pub use tool::{BrowserTool, ToolInvocation};
