//! Preference stores: a JSON file for durable use and an in-memory one for
//! tests and ephemeral sessions.
//!
//! Storage location: `~/.tabpilot/preferences.json`

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use tabpilot_core::error::MemoryError;
use tabpilot_core::memory::{PreferenceStore, Preferences};
use tokio::sync::RwLock;
use tracing::{debug, warn};

/// Preferences persisted as a single pretty-printed JSON object.
pub struct FilePreferenceStore {
    path: PathBuf,
}

impl FilePreferenceStore {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    /// Default path: `~/.tabpilot/preferences.json`
    pub fn default_path() -> PathBuf {
        let home = std::env::var("HOME")
            .or_else(|_| std::env::var("USERPROFILE"))
            .unwrap_or_else(|_| ".".to_string());
        PathBuf::from(home).join(".tabpilot").join("preferences.json")
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Default for FilePreferenceStore {
    fn default() -> Self {
        Self::new(Self::default_path())
    }
}

#[async_trait]
impl PreferenceStore for FilePreferenceStore {
    fn name(&self) -> &str {
        "file"
    }

    async fn load(&self) -> Result<Preferences, MemoryError> {
        let content = match tokio::fs::read_to_string(&self.path).await {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(Preferences::default());
            }
            Err(e) => {
                return Err(MemoryError::Storage(format!(
                    "Failed to read preferences: {e}"
                )));
            }
        };

        match serde_json::from_str::<Preferences>(&content) {
            Ok(prefs) => {
                debug!(path = %self.path.display(), "Preferences loaded");
                Ok(prefs)
            }
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "Ignoring corrupted preferences file");
                Ok(Preferences::default())
            }
        }
    }

    async fn save(&self, prefs: &Preferences) -> Result<(), MemoryError> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                MemoryError::Storage(format!("Failed to create preferences directory: {e}"))
            })?;
        }
        let content = serde_json::to_string_pretty(prefs)
            .map_err(|e| MemoryError::Storage(format!("Failed to serialize preferences: {e}")))?;
        tokio::fs::write(&self.path, content)
            .await
            .map_err(|e| MemoryError::Storage(format!("Failed to write preferences: {e}")))?;
        debug!(path = %self.path.display(), "Preferences saved");
        Ok(())
    }
}

/// Non-durable store.
#[derive(Clone, Default)]
pub struct InMemoryPreferences {
    prefs: Arc<RwLock<Preferences>>,
}

impl InMemoryPreferences {
    pub fn new(prefs: Preferences) -> Self {
        Self {
            prefs: Arc::new(RwLock::new(prefs)),
        }
    }
}

#[async_trait]
impl PreferenceStore for InMemoryPreferences {
    fn name(&self) -> &str {
        "in_memory"
    }

    async fn load(&self) -> Result<Preferences, MemoryError> {
        Ok(self.prefs.read().await.clone())
    }

    async fn save(&self, prefs: &Preferences) -> Result<(), MemoryError> {
        *self.prefs.write().await = prefs.clone();
        Ok(())
    }
}
