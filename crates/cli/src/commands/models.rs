//! `tabpilot models`: list the model catalogue.

use tabpilot_memory::FilePreferenceStore;

use super::{effective_preferences, load_config};

pub async fn run() -> anyhow::Result<()> {
    let config = load_config()?;
    let prefs = effective_preferences(&config, &FilePreferenceStore::default()).await?;

    println!("  Endpoint:  {}", config.base_url);
    println!();
    for model in &config.models {
        let marker = if model.id == prefs.model { "*" } else { " " };
        let auth = if model.is_local() { "local" } else { "API key" };
        println!("  {marker} {:<42} {:<22} {auth}", model.id, model.label);
    }
    if config.model_label(&prefs.model).is_none() {
        println!("  * {:<42} (custom)", prefs.model);
    }
    Ok(())
}
