//! Tool dispatch: one model-issued call in, one bounded [`ToolResult`] out.
//!
//! Protocol problems (unknown tool, malformed or invalid arguments) and tool
//! failures all become `success: false` results. Approval-gated tools are never
//! executed here; their command is enqueued on the [`ApprovalGate`].

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use futures_util::FutureExt;
use serde_json::{Map, Value};
use steward_tools::{ToolCtx, ToolError, ToolExecutor, ToolRegistry, validate_args};
use steward_types::{PendingCommand, ToolCallRequest, ToolResult};

use crate::approval::ApprovalGate;

pub const DEFAULT_MAX_RESULT_CHARS: usize = 500;
pub const DEFAULT_TOOL_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Copy)]
pub struct DispatcherConfig {
    /// Result text beyond this many characters is cut and marked.
    pub max_result_chars: usize,
    /// Used for tools that do not declare their own timeout.
    pub default_timeout: Duration,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            max_result_chars: DEFAULT_MAX_RESULT_CHARS,
            default_timeout: DEFAULT_TOOL_TIMEOUT,
        }
    }
}

pub struct ToolDispatcher {
    registry: Arc<ToolRegistry>,
    gate: Arc<ApprovalGate>,
    workspace: PathBuf,
    config: DispatcherConfig,
}

impl ToolDispatcher {
    #[must_use]
    pub fn new(
        registry: Arc<ToolRegistry>,
        gate: Arc<ApprovalGate>,
        workspace: impl Into<PathBuf>,
        config: DispatcherConfig,
    ) -> Self {
        Self {
            registry,
            gate,
            workspace: workspace.into(),
            config,
        }
    }

    #[must_use]
    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    #[must_use]
    pub fn gate(&self) -> &Arc<ApprovalGate> {
        &self.gate
    }

    pub async fn dispatch(&self, call: &ToolCallRequest) -> ToolResult {
        self.dispatch_uncapped(call)
            .await
            .capped(self.config.max_result_chars)
    }

    async fn dispatch_uncapped(&self, call: &ToolCallRequest) -> ToolResult {
        let executor = match self.registry.resolve(&call.tool_name) {
            Ok(executor) => executor,
            Err(err) => {
                tracing::warn!(tool = %call.tool_name, call_id = %call.id, "Model requested unknown tool");
                return ToolResult::failure(call.id.clone(), err.to_string());
            }
        };

        let args = parse_arguments(call);
        if let Err(err) = validate_args(&executor.schema(), &args) {
            tracing::warn!(tool = %call.tool_name, call_id = %call.id, error = %err, "Tool arguments rejected");
            return ToolResult::failure(call.id.clone(), err.to_string());
        }

        let ctx = ToolCtx::new(call.id.clone(), self.workspace.clone());
        if executor.requires_approval() {
            return self.route_to_gate(call, executor.as_ref(), &args, &ctx);
        }

        tracing::debug!(tool = %call.tool_name, call_id = %call.id, "Executing tool");
        let timeout = executor.timeout().unwrap_or(self.config.default_timeout);
        let exec_future = std::panic::AssertUnwindSafe(executor.execute(args, &ctx)).catch_unwind();

        match tokio::time::timeout(timeout, exec_future).await {
            Err(_) => {
                let err = ToolError::Timeout {
                    tool: call.tool_name.clone(),
                    elapsed: timeout,
                };
                tracing::warn!(tool = %call.tool_name, call_id = %call.id, ?timeout, "Tool timed out");
                ToolResult::failure(call.id.clone(), err.to_string())
            }
            Ok(Err(panic_payload)) => {
                let message = format!("Tool panicked: {}", panic_payload_to_string(&panic_payload));
                tracing::warn!(tool = %call.tool_name, call_id = %call.id, "{message}");
                ToolResult::failure(call.id.clone(), message)
            }
            Ok(Ok(Ok(output))) => ToolResult::success(call.id.clone(), output),
            Ok(Ok(Err(err))) => {
                tracing::debug!(tool = %call.tool_name, call_id = %call.id, error = %err, "Tool failed");
                ToolResult::failure(call.id.clone(), err.to_string())
            }
        }
    }

    fn route_to_gate(
        &self,
        call: &ToolCallRequest,
        executor: &dyn ToolExecutor,
        args: &Value,
        ctx: &ToolCtx,
    ) -> ToolResult {
        match executor.approval_request(args, ctx) {
            Ok(request) => {
                let command = PendingCommand::new(call.id.clone(), request, SystemTime::now());
                let command_id = self.gate.enqueue(command);
                ToolResult::awaiting_approval(call.id.clone(), command_id)
            }
            Err(err) => ToolResult::failure(call.id.clone(), err.to_string()),
        }
    }
}

impl std::fmt::Debug for ToolDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolDispatcher")
            .field("tools", &self.registry.len())
            .field("workspace", &self.workspace)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

/// Arguments as a JSON object. Malformed JSON and non-objects become `{}`.
fn parse_arguments(call: &ToolCallRequest) -> Value {
    let raw = call.raw_arguments.trim();
    if raw.is_empty() {
        return Value::Object(Map::new());
    }
    match serde_json::from_str::<Value>(raw) {
        Ok(value @ Value::Object(_)) => value,
        Ok(other) => {
            tracing::warn!(
                tool = %call.tool_name,
                call_id = %call.id,
                kind = json_kind(&other),
                "Tool arguments are not an object; using empty arguments"
            );
            Value::Object(Map::new())
        }
        Err(err) => {
            tracing::warn!(
                tool = %call.tool_name,
                call_id = %call.id,
                error = %err,
                "Malformed tool arguments; using empty arguments"
            );
            Value::Object(Map::new())
        }
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn panic_payload_to_string(payload: &Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
