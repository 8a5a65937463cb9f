//! Browser tool definitions and external tool backends for TabPilot.
//!
//! The tool vocabulary itself is the closed `BrowserTool` enum in
//! `tabpilot-core`; this crate describes it to the model ([`schema`]) and
//! provides the one tool that leaves the browser, [`web_search`].

pub mod schema;
pub mod web_search;

pub use schema::{definition, tool_definitions};
pub use web_search::{SearchAnswer, SearchProvider, TavilySearch};
