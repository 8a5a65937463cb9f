//! The agent loop: the heart of TabPilot.
//!
//! The agent follows a **Think → Act → Observe** cycle against one live tab:
//!
//! 1. **Receive** a user utterance addressed to a pane
//! 2. **Build context**: system rules plus the page model as inert data,
//!    prior history for the (tab, pane) pair
//! 3. **Send to the model** via the completion client, streaming text to the pane
//! 4. **If tool calls**: dispatch each against the tab, append the results,
//!    loop back to step 3
//! 5. **If text only**: publish it as the final answer
//!
//! The loop ends when the model answers without tool calls, a completion
//! fails, the user stops it, or the iteration ceiling is reached.

pub mod confirm;
pub mod dispatch;
pub mod orchestrator;
pub mod prompt;
pub mod service;
pub mod state;

#[cfg(test)]
mod test_support;

pub use confirm::{AutoConfirm, ConfirmationBroker, ConfirmationGate, ConfirmationRequest};
pub use dispatch::{DispatchContext, ToolDispatcher, ToolOutput};
pub use orchestrator::{AgentOrchestrator, Invocation, RunOutcome};
pub use prompt::build_preamble;
pub use service::{Coordinator, CoordinatorEnvelope, CoordinatorHandle};
pub use state::AgentState;
