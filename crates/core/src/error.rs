//! Error types for the TabPilot domain.
//!
//! Uses `thiserror` for ergonomic error definitions.
//! Each bounded context has its own error enum; the agent loop decides which
//! of them are terminal (provider failures) and which are fed back to the
//! model as structured tool results (everything raised by a tool).

use thiserror::Error;

/// The top-level error type for all TabPilot operations.
#[derive(Debug, Error)]
pub enum Error {
    // --- Provider errors ---
    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    // --- In-page actuator errors ---
    #[error("Action error: {0}")]
    Action(#[from] ActionError),

    // --- Memory errors ---
    #[error("Memory error: {0}")]
    Memory(#[from] MemoryError),

    // --- Tool errors ---
    #[error("Tool error: {0}")]
    Tool(#[from] ToolError),

    // --- Configuration errors ---
    #[error("Configuration error: {message}")]
    Config { message: String },

    // --- Serialization ---
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // --- Agent loop terminal conditions ---
    #[error("Maximum iterations ({max}) reached. Task may be incomplete.")]
    IterationLimitExceeded { max: u32 },

    #[error("Agent stopped by user.")]
    Cancelled,

    // --- Generic ---
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias using our Error.
pub type Result<T> = std::result::Result<T, Error>;

// --- Bounded context errors ---

/// Failures talking to the completion endpoint. All of these are terminal for
/// the current agent invocation; none are retried.
#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    #[error("API key not set for model '{model}'. Configure a credential in the settings.")]
    CredentialMissing { model: String },

    #[error("API error {status}: {body}")]
    Transport { status: u16, body: String },

    #[error("Network error: {0}")]
    Network(String),

    #[error("Stream interrupted: {0}")]
    StreamInterrupted(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Request cancelled")]
    Cancelled,
}

/// Failures raised inside the page actuator or on the channel to it.
#[derive(Debug, Clone, Error)]
pub enum ActionError {
    #[error("Element not found")]
    ElementNotFound,

    #[error("Field not found: {0}")]
    FieldNotFound(String),

    #[error("Form not found")]
    FormNotFound,

    #[error("Invalid selector: {0}")]
    InvalidSelector(String),

    #[error("Page actuator unavailable: {0}")]
    Unavailable(String),

    #[error("{0}")]
    Internal(String),
}

#[derive(Debug, Error)]
pub enum MemoryError {
    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Unknown preference key: {0}")]
    UnknownPreference(String),

    #[error("Invalid value for preference '{key}': {reason}")]
    InvalidPreference { key: String, reason: String },
}

/// Failures of a single tool dispatch. Never terminal: the dispatcher turns
/// every variant into a `{success: false, error}` result for the model.
#[derive(Debug, Error)]
pub enum ToolError {
    #[error("Unknown tool: {0}")]
    UnknownTool(String),

    #[error("{0}")]
    MissingTarget(String),

    #[error("Invalid arguments for {tool}: {reason}")]
    InvalidArguments { tool: String, reason: String },

    #[error("{0}")]
    PermissionDenied(String),

    #[error("{0}")]
    CredentialMissing(String),

    #[error("Search failed: {0}")]
    Search(String),

    #[error(transparent)]
    Action(#[from] ActionError),

    #[error("Internal tool fault: {0}")]
    Internal(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transport_error_preserves_body() {
        let err = Error::Provider(ProviderError::Transport {
            status: 401,
            body: r#"{"error":"bad key"}"#.into(),
        });
        assert!(err.to_string().contains("401"));
        assert!(err.to_string().contains(r#"{"error":"bad key"}"#));
    }

    #[test]
    fn permission_denied_is_bare_message() {
        let err = ToolError::PermissionDenied("Navigation denied by user.".into());
        assert_eq!(err.to_string(), "Navigation denied by user.");
    }

    #[test]
    fn action_error_passes_through_tool_error() {
        let err: ToolError = ActionError::ElementNotFound.into();
        assert_eq!(err.to_string(), "Element not found");
    }

    #[test]
    fn iteration_limit_mentions_ceiling() {
        let err = Error::IterationLimitExceeded { max: 15 };
        assert!(err.to_string().contains("15"));
    }
}
