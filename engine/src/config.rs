//! `~/.steward/config.toml` loading.
//!
//! ```toml
//! [model]
//! name = "gpt-4o-mini"
//! base_url = "https://api.openai.com/v1"
//! api_key = "${OPENAI_API_KEY}"
//! temperature = 0.2
//! max_tokens = 4096
//!
//! [tools]
//! max_iterations = 10
//! max_result_chars = 500
//! default_timeout_secs = 60
//! max_read_bytes = 1048576
//! search_max_results = 20
//! workspace = "~/projects/demo"
//!
//! [web_search]
//! api_key = "${BRAVE_API_KEY}"
//! default_count = 10
//!
//! [approval]
//! poll_interval_ms = 500
//! timeout_ms = 30000
//!
//! [pricing."gpt-4o-mini"]
//! input_per_million = 0.15
//! output_per_million = 0.60
//! ```

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use std::{env, fs};

use serde::Deserialize;
use steward_providers::CompletionOptions;
use steward_tools::config::{DEFAULT_WEB_SEARCH_COUNT, DEFAULT_WEB_SEARCH_URL};
use steward_tools::{ToolSettings, WebSearchConfig};
use steward_types::ModelPrice;

use crate::approval::GateConfig;
use crate::dispatch::DispatcherConfig;
use crate::orchestrator::OrchestratorConfig;
use crate::session::StaticPricing;

const BRAVE_API_KEY_ENV: &str = "BRAVE_API_KEY";
const TOKENS_PER_MILLION: f64 = 1_000_000.0;

#[derive(Debug, Default, Deserialize)]
pub struct StewardConfig {
    pub model: Option<ModelConfig>,
    pub tools: Option<ToolsConfig>,
    pub web_search: Option<WebSearchSection>,
    pub approval: Option<ApprovalConfig>,
    #[serde(default)]
    pub pricing: HashMap<String, PricingEntry>,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config at {}: {source}", path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse config at {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
}

impl ConfigError {
    pub fn path(&self) -> &PathBuf {
        match self {
            ConfigError::Read { path, .. } | ConfigError::Parse { path, .. } => path,
        }
    }
}

#[derive(Default, Deserialize)]
pub struct ModelConfig {
    pub name: Option<String>,
    pub base_url: Option<String>,
    pub api_key: Option<String>,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
}

// Manual Debug impl to prevent leaking API keys in logs.
impl std::fmt::Debug for ModelConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelConfig")
            .field("name", &self.name)
            .field("base_url", &self.base_url)
            .field("api_key", &mask(self.api_key.as_ref()))
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .finish()
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct ToolsConfig {
    pub max_iterations: Option<u32>,
    pub max_result_chars: Option<usize>,
    pub default_timeout_secs: Option<u64>,
    pub max_read_bytes: Option<u64>,
    pub search_max_results: Option<usize>,
    /// Root for relative tool paths. Defaults to the current directory.
    pub workspace: Option<String>,
}

#[derive(Default, Deserialize)]
pub struct WebSearchSection {
    pub api_key: Option<String>,
    pub base_url: Option<String>,
    pub default_count: Option<u32>,
}

impl std::fmt::Debug for WebSearchSection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebSearchSection")
            .field("api_key", &mask(self.api_key.as_ref()))
            .field("base_url", &self.base_url)
            .field("default_count", &self.default_count)
            .finish()
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct ApprovalConfig {
    pub poll_interval_ms: Option<u64>,
    pub timeout_ms: Option<u64>,
}

/// Prices in currency units per million tokens.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct PricingEntry {
    pub input_per_million: f64,
    pub output_per_million: f64,
}

fn mask(opt: Option<&String>) -> &'static str {
    if opt.is_some() { "[REDACTED]" } else { "None" }
}

/// Replace `${VAR}` with the value of the environment variable (empty if unset).
pub fn expand_env_vars(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut i = 0;
    while i < value.len() {
        if value[i..].starts_with("${") {
            let start = i + 2;
            if let Some(end_rel) = value[start..].find('}') {
                let end = start + end_rel;
                let var = &value[start..end];
                if !var.is_empty() {
                    out.push_str(&env::var(var).unwrap_or_default());
                }
                i = end + 1;
                continue;
            }
        }
        let Some(ch) = value[i..].chars().next() else {
            break;
        };
        out.push(ch);
        i += ch.len_utf8();
    }
    out
}

/// Expanded, non-empty secret or `None`.
fn expand_secret(raw: Option<&String>) -> Option<String> {
    raw.map(|v| expand_env_vars(v)).filter(|v| !v.is_empty())
}

fn expand_home(raw: &str) -> PathBuf {
    if let Some(rest) = raw.strip_prefix("~/")
        && let Some(home) = dirs::home_dir()
    {
        return home.join(rest);
    }
    PathBuf::from(raw)
}

impl StewardConfig {
    pub fn load() -> Result<Option<Self>, ConfigError> {
        match config_path() {
            Some(path) => Self::load_from(&path),
            None => Ok(None),
        }
    }

    /// Missing file is `Ok(None)`.
    pub fn load_from(path: &Path) -> Result<Option<Self>, ConfigError> {
        if !path.exists() {
            return Ok(None);
        }

        let content = match fs::read_to_string(path) {
            Ok(content) => content,
            Err(err) => {
                tracing::warn!("Failed to read config at {:?}: {}", path, err);
                return Err(ConfigError::Read {
                    path: path.to_path_buf(),
                    source: err,
                });
            }
        };

        match toml::from_str(&content) {
            Ok(config) => Ok(Some(config)),
            Err(err) => {
                tracing::warn!("Failed to parse config at {:?}: {}", path, err);
                Err(ConfigError::Parse {
                    path: path.to_path_buf(),
                    source: err,
                })
            }
        }
    }

    #[must_use]
    pub fn path() -> Option<PathBuf> {
        config_path()
    }

    /// Model API key with `${VAR}` references expanded.
    #[must_use]
    pub fn model_api_key(&self) -> Option<String> {
        expand_secret(self.model.as_ref().and_then(|m| m.api_key.as_ref()))
    }

    #[must_use]
    pub fn model_base_url(&self) -> Option<String> {
        self.model
            .as_ref()
            .and_then(|m| m.base_url.as_deref())
            .map(expand_env_vars)
            .filter(|url| !url.is_empty())
    }

    #[must_use]
    pub fn model_name(&self) -> Option<&str> {
        self.model.as_ref().and_then(|m| m.name.as_deref())
    }

    #[must_use]
    pub fn completion_options(&self) -> CompletionOptions {
        let model = self.model.as_ref();
        CompletionOptions {
            temperature: model.and_then(|m| m.temperature),
            max_tokens: model.and_then(|m| m.max_tokens),
        }
    }

    #[must_use]
    pub fn orchestrator_config(&self) -> OrchestratorConfig {
        let defaults = OrchestratorConfig::default();
        OrchestratorConfig {
            max_iterations: self
                .tools
                .as_ref()
                .and_then(|t| t.max_iterations)
                .unwrap_or(defaults.max_iterations),
            options: self.completion_options(),
        }
    }

    #[must_use]
    pub fn dispatcher_config(&self) -> DispatcherConfig {
        let defaults = DispatcherConfig::default();
        let tools = self.tools.as_ref();
        DispatcherConfig {
            max_result_chars: tools
                .and_then(|t| t.max_result_chars)
                .unwrap_or(defaults.max_result_chars),
            default_timeout: tools
                .and_then(|t| t.default_timeout_secs)
                .map(Duration::from_secs)
                .unwrap_or(defaults.default_timeout),
        }
    }

    #[must_use]
    pub fn gate_config(&self) -> GateConfig {
        let defaults = GateConfig::default();
        let approval = self.approval.as_ref();
        GateConfig {
            poll_interval: approval
                .and_then(|a| a.poll_interval_ms)
                .map(Duration::from_millis)
                .unwrap_or(defaults.poll_interval),
            timeout: approval
                .and_then(|a| a.timeout_ms)
                .map(Duration::from_millis)
                .unwrap_or(defaults.timeout),
            max_result_chars: self
                .tools
                .as_ref()
                .and_then(|t| t.max_result_chars)
                .unwrap_or(defaults.max_result_chars),
        }
    }

    /// Tool settings rooted at `[tools].workspace`, or `fallback_workspace`.
    #[must_use]
    pub fn tool_settings(&self, fallback_workspace: &Path) -> ToolSettings {
        let tools = self.tools.as_ref();
        let workspace = tools
            .and_then(|t| t.workspace.as_deref())
            .map(|raw| expand_home(&expand_env_vars(raw)))
            .unwrap_or_else(|| fallback_workspace.to_path_buf());

        let mut settings = ToolSettings::new(workspace);
        if let Some(max) = tools.and_then(|t| t.max_read_bytes) {
            settings.max_read_bytes = max;
        }
        if let Some(max) = tools.and_then(|t| t.search_max_results) {
            settings.search_max_results = max;
        }
        settings.web_search = self.web_search_config(env::var(BRAVE_API_KEY_ENV).ok());
        settings
    }

    /// `[web_search]` settings; `env_key` is used when no key is configured.
    #[must_use]
    pub fn web_search_config(&self, env_key: Option<String>) -> WebSearchConfig {
        let section = self.web_search.as_ref();
        WebSearchConfig {
            api_key: expand_secret(section.and_then(|s| s.api_key.as_ref()))
                .or_else(|| env_key.filter(|k| !k.is_empty())),
            base_url: section
                .and_then(|s| s.base_url.clone())
                .unwrap_or_else(|| DEFAULT_WEB_SEARCH_URL.to_string()),
            default_count: section
                .and_then(|s| s.default_count)
                .unwrap_or(DEFAULT_WEB_SEARCH_COUNT),
        }
    }

    #[must_use]
    pub fn pricing_table(&self) -> StaticPricing {
        let mut pricing = StaticPricing::new();
        for (model, entry) in &self.pricing {
            pricing.insert(
                model.clone(),
                ModelPrice {
                    input_per_token: entry.input_per_million / TOKENS_PER_MILLION,
                    output_per_token: entry.output_per_million / TOKENS_PER_MILLION,
                },
            );
        }
        pricing
    }
}

pub fn config_path() -> Option<PathBuf> {
    steward_dir().map(|dir| dir.join("config.toml"))
}

/// `~/.steward`, home of the config file and logs.
pub fn steward_dir() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(".steward"))
}

#[cfg(test)]
mod tests {
    use std::path::Path;
    use std::time::Duration;

    use super::{ModelConfig, StewardConfig, WebSearchSection, expand_env_vars};
    use crate::session::PricingTable;

    #[test]
    fn expand_env_vars_no_vars() {
        assert_eq!(expand_env_vars("hello world"), "hello world");
    }

    #[test]
    fn expand_env_vars_uses_process_environment() {
        let path = std::env::var("PATH").unwrap_or_default();
        assert_eq!(expand_env_vars("x:${PATH}"), format!("x:{path}"));
    }

    #[test]
    fn expand_env_vars_missing_var_becomes_empty() {
        assert_eq!(
            expand_env_vars("before ${STEWARD_SURELY_UNSET_VAR_4711} after"),
            "before  after"
        );
    }

    #[test]
    fn expand_env_vars_unclosed_brace_preserved() {
        assert_eq!(expand_env_vars("test ${UNCLOSED"), "test ${UNCLOSED");
    }

    #[test]
    fn expand_env_vars_empty_var_name_dropped() {
        assert_eq!(expand_env_vars("test ${} more"), "test  more");
    }

    #[test]
    fn expand_env_vars_keeps_unicode() {
        assert_eq!(expand_env_vars("Hello 🦀 Rust"), "Hello 🦀 Rust");
    }

    #[test]
    fn parse_empty_config_uses_defaults() {
        let config: StewardConfig = toml::from_str("").unwrap();
        assert!(config.model.is_none());
        assert_eq!(config.orchestrator_config().max_iterations, 10);
        assert_eq!(config.dispatcher_config().max_result_chars, 500);
        let gate = config.gate_config();
        assert_eq!(gate.poll_interval, Duration::from_millis(500));
        assert_eq!(gate.timeout, Duration::from_secs(30));
        let settings = config.tool_settings(Path::new("/work"));
        assert_eq!(settings.workspace, Path::new("/work"));
        assert_eq!(settings.search_max_results, 20);
    }

    #[test]
    fn parse_full_config() {
        let toml_str = r#"
[model]
name = "local-model"
base_url = "http://localhost:8080/v1"
temperature = 0.3
max_tokens = 1024

[tools]
max_iterations = 4
max_result_chars = 120
default_timeout_secs = 7
max_read_bytes = 2048
search_max_results = 5
workspace = "/srv/project"

[web_search]
api_key = "brave-key"
default_count = 3

[approval]
poll_interval_ms = 5
timeout_ms = 250

[pricing."local-model"]
input_per_million = 2.0
output_per_million = 8.0
"#;
        let config: StewardConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.model_name(), Some("local-model"));
        assert_eq!(
            config.model_base_url().as_deref(),
            Some("http://localhost:8080/v1")
        );

        let orchestrator = config.orchestrator_config();
        assert_eq!(orchestrator.max_iterations, 4);
        assert_eq!(orchestrator.options.max_tokens, Some(1024));

        let dispatcher = config.dispatcher_config();
        assert_eq!(dispatcher.max_result_chars, 120);
        assert_eq!(dispatcher.default_timeout, Duration::from_secs(7));

        let gate = config.gate_config();
        assert_eq!(gate.poll_interval, Duration::from_millis(5));
        assert_eq!(gate.timeout, Duration::from_millis(250));
        assert_eq!(gate.max_result_chars, 120);

        let settings = config.tool_settings(Path::new("/ignored"));
        assert_eq!(settings.workspace, Path::new("/srv/project"));
        assert_eq!(settings.max_read_bytes, 2048);
        assert_eq!(settings.search_max_results, 5);
        assert_eq!(settings.web_search.api_key.as_deref(), Some("brave-key"));
        assert_eq!(settings.web_search.default_count, 3);

        let price = config.pricing_table().price_of("local-model").unwrap();
        assert!((price.input_per_token - 2.0e-6).abs() < 1e-12);
        assert!((price.output_per_token - 8.0e-6).abs() < 1e-12);
    }

    #[test]
    fn web_search_key_falls_back_to_environment_value() {
        let config: StewardConfig = toml::from_str("[web_search]\ndefault_count = 4\n").unwrap();
        let web = config.web_search_config(Some("from-env".to_string()));
        assert_eq!(web.api_key.as_deref(), Some("from-env"));

        let configured = StewardConfig {
            web_search: Some(WebSearchSection {
                api_key: Some("from-file".to_string()),
                ..WebSearchSection::default()
            }),
            ..StewardConfig::default()
        };
        let web = configured.web_search_config(Some("from-env".to_string()));
        assert_eq!(web.api_key.as_deref(), Some("from-file"));
    }

    #[test]
    fn model_config_debug_redacts_api_key() {
        let model = ModelConfig {
            api_key: Some("sk-secret456".to_string()),
            ..ModelConfig::default()
        };
        let debug_output = format!("{model:?}");
        assert!(debug_output.contains("[REDACTED]"));
        assert!(!debug_output.contains("sk-secret456"));
    }

    #[test]
    fn load_from_missing_file_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let loaded = StewardConfig::load_from(&dir.path().join("config.toml")).unwrap();
        assert!(loaded.is_none());
    }

    #[test]
    fn load_from_reports_parse_errors_with_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[tools\nmax_iterations = ").unwrap();
        let err = StewardConfig::load_from(&path).unwrap_err();
        assert_eq!(err.path(), &path);
        assert!(err.to_string().contains("failed to parse config"));
    }
}
