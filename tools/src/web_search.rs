//! Web search through the Brave Search API.

use std::time::Duration;

use serde::Deserialize;
use serde_json::{Value, json};

use super::{ToolCtx, ToolError, ToolExecutor, ToolFut, parse_args};
use crate::builtins::numbered_block;
use crate::config::{MAX_WEB_SEARCH_COUNT, WebSearchConfig};

const WEB_SEARCH_TOOL_NAME: &str = "web_search";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug)]
pub struct WebSearchTool {
    client: reqwest::Client,
    config: WebSearchConfig,
}

impl WebSearchTool {
    pub fn new(config: WebSearchConfig) -> Result<Self, ToolError> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| failed(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { client, config })
    }

    /// Effective result count: the requested value (or the configured
    /// default) clamped to `1..=MAX_WEB_SEARCH_COUNT`.
    fn effective_count(&self, requested: Option<u32>) -> u32 {
        requested
            .unwrap_or(self.config.default_count)
            .clamp(1, MAX_WEB_SEARCH_COUNT)
    }
}

fn failed(message: impl Into<String>) -> ToolError {
    ToolError::ExecutionFailed {
        tool: WEB_SEARCH_TOOL_NAME.to_string(),
        message: message.into(),
    }
}

#[derive(Debug, Deserialize)]
struct WebSearchArgs {
    query: String,
    #[serde(default)]
    count: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
struct BraveResponse {
    #[serde(default)]
    web: Option<BraveWeb>,
}

#[derive(Debug, Default, Deserialize)]
struct BraveWeb {
    #[serde(default)]
    results: Vec<BraveResult>,
}

#[derive(Debug, Deserialize)]
struct BraveResult {
    title: String,
    url: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    age: Option<String>,
}

impl ToolExecutor for WebSearchTool {
    fn name(&self) -> &'static str {
        WEB_SEARCH_TOOL_NAME
    }

    fn description(&self) -> &'static str {
        "Search the web; returns a numbered list of titles, URLs and snippets"
    }

    fn schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "query": { "type": "string", "description": "Search query" },
                "count": {
                    "type": "integer",
                    "description": format!("Number of results (default 10, at most {MAX_WEB_SEARCH_COUNT})")
                }
            },
            "required": ["query"]
        })
    }

    fn execute<'a>(&'a self, args: Value, _ctx: &'a ToolCtx) -> ToolFut<'a> {
        Box::pin(async move {
            let typed: WebSearchArgs = parse_args(&args)?;
            if typed.query.trim().is_empty() {
                return Err(ToolError::BadArgs {
                    message: "query must not be empty".to_string(),
                });
            }
            let Some(api_key) = self.config.api_key.as_deref().filter(|k| !k.is_empty()) else {
                return Err(failed(
                    "web search API key not configured; set [web_search].api_key or BRAVE_API_KEY",
                ));
            };

            let count = self.effective_count(typed.count);
            let count_param = count.to_string();
            let url = reqwest::Url::parse_with_params(
                &self.config.base_url,
                &[("q", typed.query.as_str()), ("count", count_param.as_str())],
            )
            .map_err(|e| failed(format!("invalid search URL: {e}")))?;

            tracing::debug!(query = %typed.query, count, "Web search");
            let response = self
                .client
                .get(url)
                .header("Accept", "application/json")
                .header("X-Subscription-Token", api_key)
                .send()
                .await
                .map_err(|e| failed(format!("request failed: {e}")))?;

            let status = response.status();
            if !status.is_success() {
                let body = response.text().await.unwrap_or_default();
                return Err(failed(format!(
                    "search API returned {status}: {}",
                    body.trim()
                )));
            }
            let parsed: BraveResponse = response
                .json()
                .await
                .map_err(|e| failed(format!("invalid search response: {e}")))?;

            let results = parsed.web.unwrap_or_default().results;
            if results.is_empty() {
                return Ok(format!("No results for '{}'", typed.query));
            }
            let blocks: Vec<String> = results
                .iter()
                .take(count as usize)
                .enumerate()
                .map(|(i, r)| {
                    let age = r.age.as_deref().unwrap_or_default();
                    numbered_block(i + 1, &r.title, &[r.url.as_str(), r.description.as_str(), age])
                })
                .collect();
            Ok(blocks.join("\n"))
        })
    }
}
