//! The in-page side of TabPilot.
//!
//! An [`Actuator`] owns a live [`Document`] on its own task and answers
//! [`PageMessage`](tabpilot_core::PageMessage)s: page-model extraction and
//! action execution with multi-strategy element resolution. The coordinator
//! reaches it only through a [`PageHandle`].

pub mod actuator;
pub mod dom;
pub mod extract;
pub mod fixture;
pub mod resolve;
pub mod selector;

pub use actuator::{Actuator, PageEnvelope, PageHandle};
pub use dom::{Document, DomEvent, NodeId, Rect};
pub use extract::{INTERACTIVE_SELECTOR, extract_page_model};
pub use fixture::{ElementSpec, FixtureError, PageSpec, Site};
pub use resolve::{LocatorStrategy, resolve};
pub use selector::{Selector, SelectorError};
