//! Session memory and preference storage for TabPilot.

pub mod preferences;
pub mod session;

pub use preferences::{FilePreferenceStore, InMemoryPreferences};
pub use session::{DEFAULT_CONTEXT_TTL, DEFAULT_HISTORY_CAPACITY, SessionMemory};
