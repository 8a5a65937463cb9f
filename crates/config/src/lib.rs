//! Configuration loading, validation, and management for TabPilot.
//!
//! Loads configuration from `~/.tabpilot/config.toml` with environment
//! variable overrides. Validates all settings at startup.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use tabpilot_core::Preferences;

/// Hosted OpenAI-compatible endpoint used unless overridden.
pub const DEFAULT_BASE_URL: &str = "https://integrate.api.nvidia.com/v1";

/// Local endpoint for `ollama/`-prefixed models.
pub const LOCAL_BASE_URL: &str = "http://localhost:11434/v1";

/// Prefix marking a locally hosted model that needs no credential.
pub const LOCAL_MODEL_PREFIX: &str = "ollama/";

/// The root configuration structure.
///
/// Maps directly to `~/.tabpilot/config.toml`.
#[derive(Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Completion endpoint credential
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// Web search credential
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub search_api_key: Option<String>,

    /// OpenAI-compatible base URL (without `/chat/completions`)
    #[serde(default = "default_base_url")]
    pub base_url: String,

    #[serde(default = "default_model")]
    pub default_model: String,

    #[serde(default = "default_temperature")]
    pub default_temperature: f32,

    /// Default max tokens per completion
    #[serde(default = "default_max_tokens")]
    pub default_max_tokens: u32,

    #[serde(default)]
    pub confirmations: ConfirmationConfig,

    #[serde(default)]
    pub agent: AgentConfig,

    #[serde(default)]
    pub page: PageConfig,

    #[serde(default)]
    pub search: SearchConfig,

    /// Model catalogue shown by `tabpilot models`
    #[serde(default = "default_models")]
    pub models: Vec<ModelEntry>,
}

fn default_base_url() -> String {
    DEFAULT_BASE_URL.into()
}
fn default_model() -> String {
    tabpilot_core::memory::DEFAULT_MODEL.into()
}
fn default_temperature() -> f32 {
    0.2
}
fn default_max_tokens() -> u32 {
    tabpilot_core::memory::DEFAULT_MAX_TOKENS
}
fn default_true() -> bool {
    true
}

/// Redact a secret string for Debug output.
fn redact(s: &Option<String>) -> &'static str {
    match s {
        Some(_) => "[REDACTED]",
        None => "None",
    }
}

impl std::fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppConfig")
            .field("api_key", &redact(&self.api_key))
            .field("search_api_key", &redact(&self.search_api_key))
            .field("base_url", &self.base_url)
            .field("default_model", &self.default_model)
            .field("default_temperature", &self.default_temperature)
            .field("default_max_tokens", &self.default_max_tokens)
            .field("confirmations", &self.confirmations)
            .field("agent", &self.agent)
            .field("page", &self.page)
            .field("search", &self.search)
            .field("models", &self.models.len())
            .finish()
    }
}

/// Which destructive actions need the user's approval.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfirmationConfig {
    #[serde(default)]
    pub navigation: bool,

    #[serde(default = "default_true")]
    pub form_submission: bool,

    /// Unanswered prompts resolve as deny after this many seconds.
    /// Absent means wait forever.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,
}

impl Default for ConfirmationConfig {
    fn default() -> Self {
        Self {
            navigation: false,
            form_submission: true,
            timeout_secs: None,
        }
    }
}

/// Agent loop limits and settle timings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,

    #[serde(default = "default_history_capacity")]
    pub history_capacity: usize,

    /// Page-context cache freshness window
    #[serde(default = "default_context_ttl_ms")]
    pub context_ttl_ms: u64,

    #[serde(default = "default_click_settle_ms")]
    pub click_settle_ms: u64,

    #[serde(default = "default_navigate_settle_ms")]
    pub navigate_settle_ms: u64,

    #[serde(default = "default_wait_ms")]
    pub default_wait_ms: u64,

    #[serde(default = "default_max_wait_ms")]
    pub max_wait_ms: u64,
}

fn default_max_iterations() -> u32 {
    15
}
fn default_history_capacity() -> usize {
    20
}
fn default_context_ttl_ms() -> u64 {
    30_000
}
fn default_click_settle_ms() -> u64 {
    500
}
fn default_navigate_settle_ms() -> u64 {
    2500
}
fn default_wait_ms() -> u64 {
    1000
}
fn default_max_wait_ms() -> u64 {
    5000
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_iterations: default_max_iterations(),
            history_capacity: default_history_capacity(),
            context_ttl_ms: default_context_ttl_ms(),
            click_settle_ms: default_click_settle_ms(),
            navigate_settle_ms: default_navigate_settle_ms(),
            default_wait_ms: default_wait_ms(),
            max_wait_ms: default_max_wait_ms(),
        }
    }
}

impl AgentConfig {
    pub fn context_ttl(&self) -> Duration {
        Duration::from_millis(self.context_ttl_ms)
    }
}

/// In-page actuator timings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PageConfig {
    /// Pause between scrolling a target into view and activating it
    #[serde(default = "default_page_click_settle_ms")]
    pub click_settle_ms: u64,

    #[serde(default = "default_page_scroll_settle_ms")]
    pub scroll_settle_ms: u64,

    #[serde(default = "default_viewport_height")]
    pub viewport_height: i64,
}

fn default_page_click_settle_ms() -> u64 {
    300
}
fn default_page_scroll_settle_ms() -> u64 {
    500
}
fn default_viewport_height() -> i64 {
    800
}

impl Default for PageConfig {
    fn default() -> Self {
        Self {
            click_settle_ms: default_page_click_settle_ms(),
            scroll_settle_ms: default_page_scroll_settle_ms(),
            viewport_height: default_viewport_height(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchConfig {
    #[serde(default = "default_search_url")]
    pub api_url: String,

    #[serde(default = "default_search_results")]
    pub max_results: u32,
}

fn default_search_url() -> String {
    "https://api.tavily.com/search".into()
}
fn default_search_results() -> u32 {
    5
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            api_url: default_search_url(),
            max_results: default_search_results(),
        }
    }
}

/// One selectable model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelEntry {
    pub id: String,
    pub label: String,
}

impl ModelEntry {
    fn new(id: &str, label: &str) -> Self {
        Self {
            id: id.into(),
            label: label.into(),
        }
    }

    pub fn is_local(&self) -> bool {
        is_local_model(&self.id)
    }
}

fn default_models() -> Vec<ModelEntry> {
    vec![
        ModelEntry::new("meta/llama-3.1-8b-instruct", "Fast"),
        ModelEntry::new("meta/llama-3.3-70b-instruct", "Smart (recommended)"),
        ModelEntry::new("meta/llama-4-maverick-17b-128e-instruct", "Large context"),
        ModelEntry::new("qwen/qwen2.5-coder-32b-instruct", "Coder"),
        ModelEntry::new("nvidia/llama-3.1-nemotron-70b-instruct", "Reasoning"),
        ModelEntry::new("ollama/llama3", "Local Llama 3"),
        ModelEntry::new("ollama/mistral", "Local Mistral"),
    ]
}

/// Whether `model` is served by the local endpoint.
pub fn is_local_model(model: &str) -> bool {
    model.starts_with(LOCAL_MODEL_PREFIX)
}

impl AppConfig {
    /// Load configuration from the default path (~/.tabpilot/config.toml).
    ///
    /// Also checks environment variables:
    /// - `TABPILOT_API_KEY` (highest priority), then `NVIDIA_API_KEY`
    /// - `TABPILOT_SEARCH_API_KEY`
    /// - `TABPILOT_MODEL`
    /// - `TABPILOT_BASE_URL`
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::config_dir().join("config.toml");
        let mut config = Self::load_from(&config_path)?;
        config.apply_env(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific file path.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::info!("No config file found at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Apply environment overrides through `lookup`.
    fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(key) = lookup("TABPILOT_API_KEY").or_else(|| lookup("NVIDIA_API_KEY")) {
            self.api_key = Some(key);
        }
        if let Some(key) = lookup("TABPILOT_SEARCH_API_KEY") {
            self.search_api_key = Some(key);
        }
        if let Some(model) = lookup("TABPILOT_MODEL") {
            self.default_model = model;
        }
        if let Some(url) = lookup("TABPILOT_BASE_URL") {
            self.base_url = url;
        }
    }

    /// Get the configuration directory path.
    pub fn config_dir() -> PathBuf {
        dirs_home().join(".tabpilot")
    }

    /// Validate the configuration.
    fn validate(&self) -> Result<(), ConfigError> {
        if self.default_temperature < 0.0 || self.default_temperature > 2.0 {
            return Err(ConfigError::ValidationError(
                "default_temperature must be between 0.0 and 2.0".into(),
            ));
        }

        if self.default_max_tokens == 0 {
            return Err(ConfigError::ValidationError(
                "default_max_tokens must be > 0".into(),
            ));
        }

        if self.agent.max_iterations == 0 {
            return Err(ConfigError::ValidationError(
                "agent.max_iterations must be > 0".into(),
            ));
        }

        if self.agent.history_capacity == 0 {
            return Err(ConfigError::ValidationError(
                "agent.history_capacity must be > 0".into(),
            ));
        }

        if !self.base_url.starts_with("http://") && !self.base_url.starts_with("https://") {
            return Err(ConfigError::ValidationError(format!(
                "base_url must be an http(s) URL, got '{}'",
                self.base_url
            )));
        }

        Ok(())
    }

    /// Check if a completion credential is available.
    pub fn has_api_key(&self) -> bool {
        self.api_key.is_some()
    }

    /// Preferences seeded from this configuration, used when no preference
    /// file exists yet.
    pub fn preferences(&self) -> Preferences {
        Preferences {
            api_key: self.api_key.clone(),
            search_api_key: self.search_api_key.clone(),
            model: self.default_model.clone(),
            max_tokens: self.default_max_tokens,
            confirm_navigation: self.confirmations.navigation,
            confirm_form_submission: self.confirmations.form_submission,
        }
    }

    /// Display label for a model id, if it is in the catalogue.
    pub fn model_label(&self, id: &str) -> Option<&str> {
        self.models
            .iter()
            .find(|m| m.id == id)
            .map(|m| m.label.as_str())
    }

    /// Generate a default config TOML string.
    pub fn default_toml() -> String {
        let config = Self::default();
        toml::to_string_pretty(&config).unwrap_or_default()
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            search_api_key: None,
            base_url: default_base_url(),
            default_model: default_model(),
            default_temperature: default_temperature(),
            default_max_tokens: default_max_tokens(),
            confirmations: ConfirmationConfig::default(),
            agent: AgentConfig::default(),
            page: PageConfig::default(),
            search: SearchConfig::default(),
            models: default_models(),
        }
    }
}

/// Get the user's home directory.
fn dirs_home() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        std::env::var("USERPROFILE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("C:\\Users\\Default"))
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("/tmp"))
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {path}: {reason}")]
    ReadError { path: PathBuf, reason: String },

    #[error("Failed to parse config file at {path}: {reason}")]
    ParseError { path: PathBuf, reason: String },

    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn default_config_is_valid() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.base_url, DEFAULT_BASE_URL);
        assert_eq!(config.agent.max_iterations, 15);
        assert_eq!(config.agent.history_capacity, 20);
        assert!(!config.confirmations.navigation);
        assert!(config.confirmations.form_submission);
    }

    #[test]
    fn config_roundtrip_toml() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).unwrap();
        let parsed: AppConfig = toml::from_str(&toml_str).unwrap();
        assert_eq!(parsed.default_model, config.default_model);
        assert_eq!(parsed.models, config.models);
    }

    #[test]
    fn invalid_temperature_rejected() {
        let config = AppConfig {
            default_temperature: 5.0,
            ..AppConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn non_http_base_url_rejected() {
        let config = AppConfig {
            base_url: "ftp://example.com".into(),
            ..AppConfig::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::ValidationError(_))));
    }

    #[test]
    fn missing_config_file_returns_defaults() {
        let result = AppConfig::load_from(Path::new("/nonexistent/config.toml"));
        let config = result.unwrap();
        assert_eq!(config.default_model, "meta/llama-3.3-70b-instruct");
    }

    #[test]
    fn partial_file_keeps_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            "default_model = \"ollama/llama3\"\n[confirmations]\nnavigation = true\n",
        )
        .unwrap();

        let config = AppConfig::load_from(&path).unwrap();
        assert_eq!(config.default_model, "ollama/llama3");
        assert!(config.confirmations.navigation);
        assert!(config.confirmations.form_submission);
        assert_eq!(config.agent.max_wait_ms, 5000);
    }

    #[test]
    fn malformed_file_is_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "default_model = [").unwrap();
        assert!(matches!(
            AppConfig::load_from(&path),
            Err(ConfigError::ParseError { .. })
        ));
    }

    #[test]
    fn env_overrides_apply_in_priority_order() {
        let env: HashMap<&str, &str> = [
            ("NVIDIA_API_KEY", "nvapi-fallback"),
            ("TABPILOT_API_KEY", "nvapi-primary"),
            ("TABPILOT_MODEL", "meta/llama-3.1-8b-instruct"),
        ]
        .into_iter()
        .collect();

        let mut config = AppConfig::default();
        config.apply_env(|k| env.get(k).map(|v| v.to_string()));
        assert_eq!(config.api_key.as_deref(), Some("nvapi-primary"));
        assert_eq!(config.default_model, "meta/llama-3.1-8b-instruct");
        assert!(config.search_api_key.is_none());
    }

    #[test]
    fn preferences_seeded_from_config() {
        let config = AppConfig {
            api_key: Some("nvapi-key".into()),
            default_max_tokens: 512,
            ..AppConfig::default()
        };
        let prefs = config.preferences();
        assert_eq!(prefs.api_key.as_deref(), Some("nvapi-key"));
        assert_eq!(prefs.max_tokens, 512);
        assert!(prefs.confirm_form_submission);
    }

    #[test]
    fn catalogue_labels_and_local_models() {
        let config = AppConfig::default();
        assert_eq!(
            config.model_label("meta/llama-3.3-70b-instruct"),
            Some("Smart (recommended)")
        );
        assert!(config.models.iter().any(|m| m.is_local()));
        assert!(is_local_model("ollama/mistral"));
        assert!(!is_local_model("meta/llama-3.1-8b-instruct"));
    }

    #[test]
    fn debug_redacts_keys() {
        let config = AppConfig {
            api_key: Some("nvapi-secret".into()),
            ..AppConfig::default()
        };
        assert!(!format!("{config:?}").contains("nvapi-secret"));
    }
}
