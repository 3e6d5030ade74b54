//! Tool Executor Framework - core types, helpers, and built-in tool implementations.

pub mod builtins;
pub mod config;
pub mod process;
pub mod search;
pub mod trash;
pub mod web_search;

use std::collections::HashMap;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use steward_types::{ApprovalRequest, Mode, ToolDefinition};

pub use builtins::register_builtins;
pub use config::{ToolSettings, WebSearchConfig};
pub use process::{
    CommandExecutor, KillOutcome, ProcFut, ProcessError, ProcessId, ProcessManager, ProcessOutput,
};
pub use trash::{Trash, TrashError, TrashMetadata};

/// Tool execution future type alias.
pub type ToolFut<'a> = Pin<Box<dyn Future<Output = Result<String, ToolError>> + Send + 'a>>;

/// Error types for tool execution.
#[derive(Debug, thiserror::Error)]
pub enum ToolError {
    #[error("Bad tool args: {message}")]
    BadArgs { message: String },
    #[error("Tool timed out: {tool} after {elapsed:?}")]
    Timeout { tool: String, elapsed: Duration },
    #[error("Tool execution failed: {tool}: {message}")]
    ExecutionFailed { tool: String, message: String },
    #[error("File not found: {path}")]
    NotFound { path: String },
    #[error("{tool} requires approval and cannot be executed directly")]
    ApprovalRequired { tool: String },
    #[error("Unknown tool: {name}")]
    UnknownTool { name: String },
    #[error("Duplicate tool registered: {name}")]
    DuplicateTool { name: String },
    #[error("Invalid schema for tool {name}: {message}")]
    InvalidSchema { name: String, message: String },
}

/// Per-call tool context.
#[derive(Debug, Clone)]
pub struct ToolCtx {
    pub tool_call_id: String,
    /// Root that relative paths resolve against.
    pub working_dir: PathBuf,
}

impl ToolCtx {
    #[must_use]
    pub fn new(tool_call_id: impl Into<String>, working_dir: impl Into<PathBuf>) -> Self {
        Self {
            tool_call_id: tool_call_id.into(),
            working_dir: working_dir.into(),
        }
    }
}

/// A tool the model can call.
///
/// Tools that require approval never run through `execute`; the dispatcher asks
/// them for an [`ApprovalRequest`] and hands that to the approval gate instead.
pub trait ToolExecutor: Send + Sync {
    fn name(&self) -> &'static str;
    fn description(&self) -> &'static str;
    fn schema(&self) -> Value;
    fn requires_approval(&self) -> bool {
        false
    }
    fn timeout(&self) -> Option<Duration> {
        None
    }
    /// Describe the command a human must consent to before anything runs.
    fn approval_request(&self, _args: &Value, _ctx: &ToolCtx) -> Result<ApprovalRequest, ToolError> {
        Err(ToolError::ExecutionFailed {
            tool: self.name().to_string(),
            message: "tool does not run through the approval gate".to_string(),
        })
    }
    fn execute<'a>(&'a self, args: Value, ctx: &'a ToolCtx) -> ToolFut<'a>;
}

pub(crate) fn parse_args<T: serde::de::DeserializeOwned>(args: &Value) -> Result<T, ToolError> {
    serde_json::from_value(args.clone()).map_err(|e| ToolError::BadArgs {
        message: e.to_string(),
    })
}

/// Tool registry. Populated once at startup and read-only afterwards.
#[derive(Default)]
pub struct ToolRegistry {
    executors: HashMap<String, Arc<dyn ToolExecutor>>,
}

impl ToolRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, executor: Arc<dyn ToolExecutor>) -> Result<(), ToolError> {
        let name = executor.name().to_string();
        if self.executors.contains_key(&name) {
            return Err(ToolError::DuplicateTool { name });
        }
        jsonschema::validator_for(&executor.schema()).map_err(|e| ToolError::InvalidSchema {
            name: name.clone(),
            message: e.to_string(),
        })?;
        self.executors.insert(name, executor);
        Ok(())
    }

    pub fn resolve(&self, name: &str) -> Result<Arc<dyn ToolExecutor>, ToolError> {
        self.executors
            .get(name)
            .cloned()
            .ok_or_else(|| ToolError::UnknownTool {
                name: name.to_string(),
            })
    }

    pub fn definition(&self, name: &str) -> Result<ToolDefinition, ToolError> {
        self.resolve(name).map(|exec| definition_of(exec.as_ref()))
    }

    /// Tools exposed to the model in `mode`, sorted by name.
    #[must_use]
    pub fn list_tools(&self, mode: Mode) -> Vec<ToolDefinition> {
        if !mode.tools_enabled() {
            return Vec::new();
        }
        self.definitions()
    }

    #[must_use]
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        let mut defs: Vec<ToolDefinition> = self
            .executors
            .values()
            .map(|exec| definition_of(exec.as_ref()))
            .collect();
        defs.sort_by(|a, b| a.name.cmp(&b.name));
        defs
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.executors.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.executors.is_empty()
    }
}

fn definition_of(exec: &dyn ToolExecutor) -> ToolDefinition {
    ToolDefinition::new(
        exec.name(),
        exec.description(),
        exec.schema(),
        exec.requires_approval(),
    )
}

/// Validate arguments against a JSON schema.
pub fn validate_args(schema: &Value, args: &Value) -> Result<(), ToolError> {
    let validator = jsonschema::validator_for(schema).map_err(|e| ToolError::BadArgs {
        message: format!("Invalid tool schema: {e}"),
    })?;
    if let Err(err) = validator.validate(args) {
        return Err(ToolError::BadArgs {
            message: err.to_string(),
        });
    }
    Ok(())
}

/// Resolve a tool-supplied path against the workspace root.
///
/// Absolute paths are kept as-is. NUL bytes and empty paths are rejected.
pub fn resolve_path(raw: &str, working_dir: &Path) -> Result<PathBuf, ToolError> {
    if raw.contains('\0') {
        return Err(ToolError::BadArgs {
            message: "path must not contain NUL bytes".to_string(),
        });
    }
    if raw.trim().is_empty() {
        return Err(ToolError::BadArgs {
            message: "path must not be empty".to_string(),
        });
    }
    let path = Path::new(raw);
    if path.is_absolute() {
        Ok(path.to_path_buf())
    } else {
        Ok(working_dir.join(path))
    }
}
