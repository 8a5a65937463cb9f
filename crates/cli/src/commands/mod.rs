pub mod config_cmd;
pub mod models;
pub mod prefs;
pub mod read_page;
pub mod run;

use anyhow::Context;
use tabpilot_config::AppConfig;
use tabpilot_core::memory::{PreferenceStore, Preferences};
use tabpilot_memory::FilePreferenceStore;

pub fn load_config() -> anyhow::Result<AppConfig> {
    AppConfig::load().context("Failed to load config")
}

/// Preferences in effect: the preference file when present, with
/// credentials it lacks filled from config and environment; otherwise the
/// config-seeded defaults.
pub async fn effective_preferences(
    config: &AppConfig,
    store: &FilePreferenceStore,
) -> anyhow::Result<Preferences> {
    let stored = if store.path().exists() {
        Some(store.load().await.context("Failed to load preferences")?)
    } else {
        None
    };
    Ok(merge_preferences(stored, config))
}

fn merge_preferences(stored: Option<Preferences>, config: &AppConfig) -> Preferences {
    match stored {
        Some(mut prefs) => {
            if prefs.api_key.is_none() {
                prefs.api_key = config.api_key.clone();
            }
            if prefs.search_api_key.is_none() {
                prefs.search_api_key = config.search_api_key.clone();
            }
            prefs
        }
        None => config.preferences(),
    }
}
