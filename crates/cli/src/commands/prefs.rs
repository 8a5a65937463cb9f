//! `tabpilot prefs`: durable preference management.

use anyhow::Context;
use clap::Subcommand;
use tabpilot_core::memory::{PreferenceStore, Preferences};
use tabpilot_memory::FilePreferenceStore;

use super::{effective_preferences, load_config};

#[derive(Subcommand, Clone, Debug)]
pub enum PrefsAction {
    /// Show the preferences in effect (credentials masked)
    Show,

    /// Set one preference; an empty value clears a credential
    Set { key: String, value: String },

    /// Print the preference file path
    Path,
}

pub async fn run(action: PrefsAction) -> anyhow::Result<()> {
    let store = FilePreferenceStore::default();
    match action {
        PrefsAction::Show => {
            let config = load_config()?;
            let prefs = effective_preferences(&config, &store).await?;
            for line in describe(&prefs) {
                println!("{line}");
            }
        }
        PrefsAction::Set { key, value } => {
            let config = load_config()?;
            let mut prefs = if store.path().exists() {
                store.load().await.context("Failed to load preferences")?
            } else {
                config.preferences()
            };
            prefs.set(&key, &value)?;
            store.save(&prefs).await?;
            let shown = prefs.display(&key).unwrap_or_default();
            println!("  {key} = {shown}");
        }
        PrefsAction::Path => println!("{}", store.path().display()),
    }
    Ok(())
}

fn describe(prefs: &Preferences) -> Vec<String> {
    Preferences::KEYS
        .iter()
        .filter_map(|key| prefs.display(key).map(|v| format!("  {key:<24} {v}")))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn describe_masks_credentials() {
        let prefs = Preferences {
            api_key: Some("nvapi-secret".into()),
            ..Preferences::default()
        };
        let lines = describe(&prefs);
        assert_eq!(lines.len(), Preferences::KEYS.len());
        assert!(lines.iter().all(|l| !l.contains("nvapi-secret")));
        assert!(lines[0].trim_end().ends_with("set"));
    }
}
