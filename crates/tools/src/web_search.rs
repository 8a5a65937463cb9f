//! Web search backend for the `web_search` tool.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tabpilot_config::SearchConfig;
use tabpilot_core::error::ToolError;
use tracing::debug;

/// The condensed result handed back to the model.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchAnswer {
    pub answer: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
}

#[async_trait]
pub trait SearchProvider: Send + Sync {
    fn name(&self) -> &str;

    async fn search(&self, api_key: &str, query: &str) -> Result<SearchAnswer, ToolError>;
}

/// Tavily search API client.
pub struct TavilySearch {
    api_url: String,
    max_results: u32,
    client: reqwest::Client,
}

#[derive(Serialize)]
struct TavilyRequest<'a> {
    query: &'a str,
    include_answer: bool,
    max_results: u32,
}

#[derive(Deserialize)]
struct TavilyResponse {
    #[serde(default)]
    answer: Option<String>,
    #[serde(default)]
    results: Vec<TavilyResult>,
}

#[derive(Deserialize)]
struct TavilyResult {
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    content: String,
}

impl TavilySearch {
    pub fn new(api_url: impl Into<String>, max_results: u32) -> Result<Self, ToolError> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| ToolError::Internal(format!("Failed to build HTTP client: {e}")))?;
        Ok(Self {
            api_url: api_url.into(),
            max_results,
            client,
        })
    }

    pub fn from_config(config: &SearchConfig) -> Result<Self, ToolError> {
        Self::new(&config.api_url, config.max_results)
    }
}

#[async_trait]
impl SearchProvider for TavilySearch {
    fn name(&self) -> &str {
        "tavily"
    }

    async fn search(&self, api_key: &str, query: &str) -> Result<SearchAnswer, ToolError> {
        debug!(query, "Web search");
        let response = self
            .client
            .post(&self.api_url)
            .bearer_auth(api_key)
            .json(&TavilyRequest {
                query,
                include_answer: true,
                max_results: self.max_results,
            })
            .send()
            .await
            .map_err(|e| ToolError::Search(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ToolError::Search(format!("{} {body}", status.as_u16())));
        }

        let parsed: TavilyResponse = response
            .json()
            .await
            .map_err(|e| ToolError::Search(format!("invalid response: {e}")))?;

        if let Some(answer) = parsed.answer.filter(|a| !a.trim().is_empty()) {
            return Ok(SearchAnswer {
                answer,
                source: parsed.results.into_iter().find_map(|r| r.url),
            });
        }
        parsed
            .results
            .into_iter()
            .find(|r| !r.content.trim().is_empty())
            .map(|r| SearchAnswer {
                answer: r.content,
                source: r.url,
            })
            .ok_or_else(|| ToolError::Search(format!("no results for '{query}'")))
    }
}
