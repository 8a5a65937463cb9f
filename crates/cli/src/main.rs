//! TabPilot CLI: the main entry point.
//!
//! Commands:
//! - `run`        Drive a page fixture with the agent (single message or interactive)
//! - `read-page`  Print the page model extracted from a fixture
//! - `prefs`      Show or change durable preferences
//! - `models`     List the model catalogue
//! - `config`     Show, locate or initialize the config file

use clap::{Parser, Subcommand};

mod commands;

#[derive(Parser)]
#[command(
    name = "tabpilot",
    about = "TabPilot: an LLM agent that reads and drives a browser tab",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit logs as JSON
    #[arg(long, global = true)]
    log_json: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the agent against a page fixture
    Run(commands::run::RunArgs),

    /// Print the page model of a fixture
    ReadPage {
        /// Page or site fixture (JSON)
        #[arg(short, long)]
        page: std::path::PathBuf,

        /// Open this URL of the site instead of its start page
        #[arg(long)]
        url: Option<String>,
    },

    /// Show or change preferences
    Prefs {
        #[command(subcommand)]
        action: commands::prefs::PrefsAction,
    },

    /// List available models
    Models,

    /// Manage the config file
    Config {
        #[command(subcommand)]
        action: commands::config_cmd::ConfigAction,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Logs go to stderr; stdout carries agent output
    let filter = if cli.verbose { "debug" } else { "warn" };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter));
    if cli.log_json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(env_filter)
            .with_writer(std::io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(false)
            .with_writer(std::io::stderr)
            .init();
    }

    match cli.command {
        Commands::Run(args) => commands::run::run(args).await?,
        Commands::ReadPage { page, url } => commands::read_page::run(&page, url).await?,
        Commands::Prefs { action } => commands::prefs::run(action).await?,
        Commands::Models => commands::models::run().await?,
        Commands::Config { action } => commands::config_cmd::run(action).await?,
    }

    Ok(())
}
