//! `tabpilot read-page`: print the page model the agent would see.

use std::path::Path;

use anyhow::Context;
use tabpilot_core::message::TabId;
use tabpilot_core::page::TabConnection;
use tabpilot_page::{Actuator, Site};

use super::load_config;

pub async fn run(page: &Path, url: Option<String>) -> anyhow::Result<()> {
    let config = load_config()?;
    let site = Site::load(page)
        .with_context(|| format!("Failed to load page fixture {}", page.display()))?;
    let (tab, _task) = Actuator::new(site, config.page.clone()).spawn(TabId(1));

    if let Some(url) = url {
        tab.load_url(&url).await?;
    }
    let model = tab.page_context().await?;
    println!("{}", serde_json::to_string_pretty(&model)?);
    Ok(())
}
