//! `tabpilot config`: configuration file management.

use anyhow::Context;
use clap::Subcommand;
use tabpilot_config::AppConfig;

use super::load_config;

#[derive(Subcommand, Clone, Debug)]
pub enum ConfigAction {
    /// Validate the config and print a summary
    Show,

    /// Print the config file path
    Path,

    /// Write a default config file if none exists
    Init,
}

pub async fn run(action: ConfigAction) -> anyhow::Result<()> {
    let path = AppConfig::config_dir().join("config.toml");
    match action {
        ConfigAction::Show => {
            let config = load_config()?;
            println!("  Config:        {}", path.display());
            println!("  Endpoint:      {}", config.base_url);
            println!("  Model:         {}", config.default_model);
            println!("  API key:       {}", if config.has_api_key() { "set" } else { "not set" });
            println!(
                "  Search key:    {}",
                if config.search_api_key.is_some() { "set" } else { "not set" }
            );
            println!("  Temperature:   {}", config.default_temperature);
            println!("  Max tokens:    {}", config.default_max_tokens);
            println!("  Iterations:    {}", config.agent.max_iterations);
            println!("  History:       {} turns", config.agent.history_capacity);
            println!(
                "  Confirm:       navigation={} form_submission={}",
                config.confirmations.navigation, config.confirmations.form_submission
            );
        }
        ConfigAction::Path => println!("{}", path.display()),
        ConfigAction::Init => {
            if path.exists() {
                println!("  Config already exists at {}", path.display());
                return Ok(());
            }
            if let Some(dir) = path.parent() {
                tokio::fs::create_dir_all(dir)
                    .await
                    .with_context(|| format!("Failed to create {}", dir.display()))?;
            }
            tokio::fs::write(&path, AppConfig::default_toml())
                .await
                .with_context(|| format!("Failed to write {}", path.display()))?;
            println!("  Wrote {}", path.display());
        }
    }
    Ok(())
}
