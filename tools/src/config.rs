//! Configuration types used by tool executors.
//!
//! These live here rather than in `steward-engine::config` so the tools crate
//! does not depend on the engine.

use std::path::PathBuf;

pub const DEFAULT_MAX_READ_BYTES: u64 = 1024 * 1024;
pub const DEFAULT_SEARCH_MAX_RESULTS: usize = 20;
pub const DEFAULT_WEB_SEARCH_URL: &str = "https://api.search.brave.com/res/v1/web/search";
pub const DEFAULT_WEB_SEARCH_COUNT: u32 = 10;
pub const MAX_WEB_SEARCH_COUNT: u32 = 20;

/// Settings shared by the built-in tools.
#[derive(Debug, Clone)]
pub struct ToolSettings {
    pub workspace: PathBuf,
    pub max_read_bytes: u64,
    pub search_max_results: usize,
    pub web_search: WebSearchConfig,
}

impl ToolSettings {
    #[must_use]
    pub fn new(workspace: impl Into<PathBuf>) -> Self {
        Self {
            workspace: workspace.into(),
            max_read_bytes: DEFAULT_MAX_READ_BYTES,
            search_max_results: DEFAULT_SEARCH_MAX_RESULTS,
            web_search: WebSearchConfig::default(),
        }
    }
}

#[derive(Clone)]
pub struct WebSearchConfig {
    pub api_key: Option<String>,
    pub base_url: String,
    pub default_count: u32,
}

impl Default for WebSearchConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: DEFAULT_WEB_SEARCH_URL.to_string(),
            default_count: DEFAULT_WEB_SEARCH_COUNT,
        }
    }
}

impl std::fmt::Debug for WebSearchConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebSearchConfig")
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("base_url", &self.base_url)
            .field("default_count", &self.default_count)
            .finish()
    }
}
