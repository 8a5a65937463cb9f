//! Durable user preferences and the store trait that persists them.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::MemoryError;

/// Model used when nothing else is selected.
pub const DEFAULT_MODEL: &str = "meta/llama-3.3-70b-instruct";

/// Default completion token budget.
pub const DEFAULT_MAX_TOKENS: u32 = 1024;

/// The durable preference set.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Preferences {
    /// Completion endpoint credential
    pub api_key: Option<String>,
    /// Web search provider credential
    pub search_api_key: Option<String>,
    pub model: String,
    pub max_tokens: u32,
    pub confirm_navigation: bool,
    pub confirm_form_submission: bool,
}

impl Default for Preferences {
    fn default() -> Self {
        Self {
            api_key: None,
            search_api_key: None,
            model: DEFAULT_MODEL.to_string(),
            max_tokens: DEFAULT_MAX_TOKENS,
            confirm_navigation: false,
            confirm_form_submission: true,
        }
    }
}

impl std::fmt::Debug for Preferences {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Preferences")
            .field("api_key", &self.api_key.as_ref().map(|_| "***"))
            .field("search_api_key", &self.search_api_key.as_ref().map(|_| "***"))
            .field("model", &self.model)
            .field("max_tokens", &self.max_tokens)
            .field("confirm_navigation", &self.confirm_navigation)
            .field("confirm_form_submission", &self.confirm_form_submission)
            .finish()
    }
}

impl Preferences {
    /// Keys accepted by [`Preferences::set`].
    pub const KEYS: [&'static str; 6] = [
        "api_key",
        "search_api_key",
        "model",
        "max_tokens",
        "confirm_navigation",
        "confirm_form_submission",
    ];

    /// Set one preference from its textual form. An empty string clears a
    /// credential.
    pub fn set(&mut self, key: &str, raw: &str) -> Result<(), MemoryError> {
        let raw = raw.trim();
        match key {
            "api_key" => self.api_key = non_empty(raw),
            "search_api_key" => self.search_api_key = non_empty(raw),
            "model" => {
                if raw.is_empty() {
                    return Err(invalid(key, "model cannot be empty"));
                }
                self.model = raw.to_string();
            }
            "max_tokens" => {
                let n: u32 = raw.parse().map_err(|_| invalid(key, "expected a positive integer"))?;
                if n == 0 {
                    return Err(invalid(key, "must be greater than zero"));
                }
                self.max_tokens = n;
            }
            "confirm_navigation" => self.confirm_navigation = parse_bool(key, raw)?,
            "confirm_form_submission" => self.confirm_form_submission = parse_bool(key, raw)?,
            other => return Err(MemoryError::UnknownPreference(other.to_string())),
        }
        Ok(())
    }

    /// Display form of one preference, credentials masked.
    pub fn display(&self, key: &str) -> Option<String> {
        let mask = |v: &Option<String>| match v {
            Some(_) => "set".to_string(),
            None => "not set".to_string(),
        };
        Some(match key {
            "api_key" => mask(&self.api_key),
            "search_api_key" => mask(&self.search_api_key),
            "model" => self.model.clone(),
            "max_tokens" => self.max_tokens.to_string(),
            "confirm_navigation" => self.confirm_navigation.to_string(),
            "confirm_form_submission" => self.confirm_form_submission.to_string(),
            _ => return None,
        })
    }
}

fn non_empty(raw: &str) -> Option<String> {
    (!raw.is_empty()).then(|| raw.to_string())
}

fn invalid(key: &str, reason: &str) -> MemoryError {
    MemoryError::InvalidPreference {
        key: key.to_string(),
        reason: reason.to_string(),
    }
}

fn parse_bool(key: &str, raw: &str) -> Result<bool, MemoryError> {
    match raw.to_ascii_lowercase().as_str() {
        "true" | "yes" | "on" | "1" => Ok(true),
        "false" | "no" | "off" | "0" => Ok(false),
        _ => Err(invalid(key, "expected true or false")),
    }
}

/// Durable cross-session preference storage.
#[async_trait]
pub trait PreferenceStore: Send + Sync {
    fn name(&self) -> &str;

    /// Load preferences; a store with nothing saved yields the defaults.
    async fn load(&self) -> Result<Preferences, MemoryError>;

    async fn save(&self, prefs: &Preferences) -> Result<(), MemoryError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_extension() {
        let p = Preferences::default();
        assert_eq!(p.model, DEFAULT_MODEL);
        assert_eq!(p.max_tokens, 1024);
        assert!(!p.confirm_navigation);
        assert!(p.confirm_form_submission);
    }

    #[test]
    fn set_parses_values() {
        let mut p = Preferences::default();
        p.set("confirm_navigation", "yes").unwrap();
        p.set("max_tokens", "2048").unwrap();
        p.set("api_key", "nvapi-xyz").unwrap();
        assert!(p.confirm_navigation);
        assert_eq!(p.max_tokens, 2048);
        assert_eq!(p.display("api_key").as_deref(), Some("set"));

        p.set("api_key", "").unwrap();
        assert!(p.api_key.is_none());
    }

    #[test]
    fn set_rejects_bad_input() {
        let mut p = Preferences::default();
        assert!(matches!(
            p.set("theme", "dark"),
            Err(MemoryError::UnknownPreference(_))
        ));
        assert!(matches!(
            p.set("max_tokens", "lots"),
            Err(MemoryError::InvalidPreference { .. })
        ));
        assert!(p.set("confirm_navigation", "maybe").is_err());
    }

    #[test]
    fn debug_redacts_credentials() {
        let p = Preferences {
            api_key: Some("nvapi-secret".into()),
            ..Default::default()
        };
        assert!(!format!("{p:?}").contains("nvapi-secret"));
    }

    #[test]
    fn partial_json_fills_defaults() {
        let p: Preferences = serde_json::from_str(r#"{"confirm_navigation": true}"#).unwrap();
        assert!(p.confirm_navigation);
        assert_eq!(p.model, DEFAULT_MODEL);
    }
}
