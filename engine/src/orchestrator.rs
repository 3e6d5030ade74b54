//! The orchestration loop.
//!
//! One run goes `model call -> dispatch batch -> model call -> ...` until the
//! model answers without tool calls, the iteration limit is hit, the model
//! client fails, or a call is parked on the approval gate. A parked run is
//! returned to the caller as a [`SuspendedRun`]; all loop state lives in that
//! value, so the orchestrator itself holds nothing per run.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use steward_providers::{CompletionOptions, ModelClient};
use steward_types::{
    CommandId, Message, Mode, PendingCommand, SessionStats, SuspendedRun, TokenUsage,
    ToolCallRequest, ToolDefinition, ToolResult,
};

use crate::approval::GateError;
use crate::dispatch::ToolDispatcher;
use crate::session::SessionAccumulator;

pub const DEFAULT_MAX_ITERATIONS: u32 = 10;

const AGENT_SYSTEM_PROMPT: &str = "You are Steward, an assistant that completes tasks in the \
user's workspace by calling tools. Read files before changing them and keep edits minimal. \
Shell commands only run after the user approves them, so say why a command is needed in its \
`reason` argument. When the task is done, reply with a short summary and no tool calls.";

const CHAT_SYSTEM_PROMPT: &str = "You are Steward, a helpful assistant. No tools are available \
in this conversation; answer directly and say so when you would need to inspect files or run \
commands to be sure.";

#[must_use]
pub const fn system_prompt(mode: Mode) -> &'static str {
    match mode {
        Mode::Chat => CHAT_SYSTEM_PROMPT,
        Mode::Agent => AGENT_SYSTEM_PROMPT,
    }
}

#[derive(Debug, Clone, Copy)]
pub struct OrchestratorConfig {
    /// Tool batches allowed per run, counted across suspensions.
    pub max_iterations: u32,
    pub options: CompletionOptions,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_iterations: DEFAULT_MAX_ITERATIONS,
            options: CompletionOptions::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum FailureReason {
    #[error("tool loop limit reached after {max_iterations} iterations")]
    ToolLoopLimit { max_iterations: u32 },
    #[error("model request failed: {0}")]
    Model(String),
}

#[derive(Debug)]
pub enum RunOutcome {
    Completed {
        message: Message,
        /// Summed over the model calls made by this `start_run`/`resume_run`.
        usage: Option<TokenUsage>,
        conversation: Vec<Message>,
    },
    Suspended {
        resume_token: SuspendedRun,
        pending_command_id: CommandId,
    },
    Failed {
        reason: FailureReason,
        conversation: Vec<Message>,
    },
}

#[derive(Debug, thiserror::Error)]
pub enum OrchestratorError {
    #[error(
        "resolution does not answer pending tool call {expected} (got {})",
        actual.as_deref().unwrap_or("a non-tool message")
    )]
    ResolutionMismatch {
        expected: String,
        actual: Option<String>,
    },
    #[error(transparent)]
    Gate(#[from] GateError),
}

pub struct Orchestrator {
    model: Arc<dyn ModelClient>,
    dispatcher: ToolDispatcher,
    session: Mutex<SessionAccumulator>,
    config: OrchestratorConfig,
}

/// Loop state carried between iterations of one run.
struct RunState {
    conversation: Vec<Message>,
    tools: Vec<ToolDefinition>,
    iterations: u32,
    mode: Mode,
    usage: Option<TokenUsage>,
}

impl Orchestrator {
    #[must_use]
    pub fn new(
        model: Arc<dyn ModelClient>,
        dispatcher: ToolDispatcher,
        session: SessionAccumulator,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            model,
            dispatcher,
            session: Mutex::new(session),
            config,
        }
    }

    fn session(&self) -> MutexGuard<'_, SessionAccumulator> {
        self.session.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Start a run for `goal` on top of `conversation` (prior turns, no system prompt).
    pub async fn start_run(
        &self,
        mut conversation: Vec<Message>,
        goal: &str,
        mode: Mode,
    ) -> RunOutcome {
        tracing::info!(mode = mode.as_str(), prior_messages = conversation.len(), "Run started");
        conversation.push(Message::user(goal));
        self.session().record_message();

        self.run(RunState {
            conversation,
            tools: self.dispatcher.registry().list_tools(mode),
            iterations: 0,
            mode,
            usage: None,
        })
        .await
    }

    /// Continue a suspended run with the tool message that resolved its pending call.
    pub async fn resume_run(
        &self,
        token: SuspendedRun,
        resolution: Message,
    ) -> Result<RunOutcome, OrchestratorError> {
        if !resolution.is_tool_result_for(&token.pending_tool_call_id) {
            return Err(OrchestratorError::ResolutionMismatch {
                expected: token.pending_tool_call_id,
                actual: resolution.tool_call_id().map(str::to_string),
            });
        }
        tracing::info!(
            tool_call_id = %token.pending_tool_call_id,
            iterations = token.iterations,
            "Run resumed"
        );

        let mut conversation = token.conversation;
        conversation.push(resolution);
        self.session().record_message();

        Ok(self
            .run(RunState {
                conversation,
                tools: token.tool_definitions,
                iterations: token.iterations,
                mode: token.mode,
                usage: None,
            })
            .await)
    }

    async fn run(&self, mut state: RunState) -> RunOutcome {
        loop {
            let request = with_system_prompt(state.mode, &state.conversation);
            let reply = match self
                .model
                .complete(&request, &state.tools, self.config.options)
                .await
            {
                Ok(reply) => reply,
                Err(err) => {
                    tracing::warn!(error = %err, iterations = state.iterations, "Model request failed");
                    return RunOutcome::Failed {
                        reason: FailureReason::Model(err.to_string()),
                        conversation: state.conversation,
                    };
                }
            };

            if let Some(usage) = reply.usage {
                self.session().record(&usage, self.model.model_name());
                state.usage = Some(add_usage(state.usage, usage));
            }
            let content = reply.content.unwrap_or_default();

            if reply.tool_calls.is_empty() {
                let message = Message::assistant(content);
                state.conversation.push(message.clone());
                self.session().record_message();
                tracing::info!(iterations = state.iterations, "Run completed");
                return RunOutcome::Completed {
                    message,
                    usage: state.usage,
                    conversation: state.conversation,
                };
            }

            if state.iterations >= self.config.max_iterations {
                tracing::warn!(
                    max_iterations = self.config.max_iterations,
                    requested_calls = reply.tool_calls.len(),
                    "Tool loop limit reached"
                );
                return RunOutcome::Failed {
                    reason: FailureReason::ToolLoopLimit {
                        max_iterations: self.config.max_iterations,
                    },
                    conversation: state.conversation,
                };
            }

            let calls = reply.tool_calls;
            state
                .conversation
                .push(Message::assistant_with_tool_calls(content, calls.clone()));
            self.session().record_message();

            for (index, call) in calls.iter().enumerate() {
                let result = self.dispatch_in_mode(call, &state.tools).await;
                if let Some(pending_command_id) = result.pending_command_id.clone() {
                    let dropped = calls.len() - index - 1;
                    if dropped > 0 {
                        tracing::debug!(dropped, "Calls after an approval-gated call are not dispatched");
                    }
                    tracing::info!(
                        tool_call_id = %call.id,
                        command_id = %pending_command_id,
                        "Run suspended awaiting approval"
                    );
                    let resume_token = SuspendedRun {
                        conversation: state.conversation,
                        pending_tool_call_id: call.id.clone(),
                        pending_command_id: pending_command_id.clone(),
                        tool_definitions: state.tools,
                        iterations: state.iterations + 1,
                        mode: state.mode,
                    };
                    return RunOutcome::Suspended {
                        resume_token,
                        pending_command_id,
                    };
                }
                state.conversation.push(result.to_message());
                self.session().record_message();
            }
            state.iterations += 1;
        }
    }

    /// Dispatch `call` unless it names a tool outside the run's tool set.
    async fn dispatch_in_mode(&self, call: &ToolCallRequest, tools: &[ToolDefinition]) -> ToolResult {
        if tools.iter().any(|t| t.name == call.tool_name) {
            return self.dispatcher.dispatch(call).await;
        }
        tracing::warn!(tool = %call.tool_name, call_id = %call.id, "Tool not offered in this run");
        ToolResult::failure(call.id.clone(), format!("Unknown tool: {}", call.tool_name))
    }

    #[must_use]
    pub fn list_pending_commands(&self) -> Vec<PendingCommand> {
        self.dispatcher.gate().list_pending()
    }

    pub async fn approve(&self, id: &CommandId) -> Result<Option<Message>, OrchestratorError> {
        Ok(self.dispatcher.gate().approve(id).await?)
    }

    pub fn reject(&self, id: &CommandId) -> Result<Option<Message>, OrchestratorError> {
        Ok(self.dispatcher.gate().reject(id)?)
    }

    #[must_use]
    pub fn session_stats(&self) -> SessionStats {
        self.session().snapshot()
    }

    pub fn reset_session(&self) {
        self.session().reset();
    }

    #[must_use]
    pub fn model_name(&self) -> &str {
        self.model.model_name()
    }
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("model", &self.model.model_name())
            .field("dispatcher", &self.dispatcher)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

fn with_system_prompt(mode: Mode, conversation: &[Message]) -> Vec<Message> {
    let mut request = Vec::with_capacity(conversation.len() + 1);
    request.push(Message::system(system_prompt(mode)));
    request.extend_from_slice(conversation);
    request
}

fn add_usage(total: Option<TokenUsage>, usage: TokenUsage) -> TokenUsage {
    match total {
        Some(t) => TokenUsage {
            prompt_tokens: t.prompt_tokens + usage.prompt_tokens,
            completion_tokens: t.completion_tokens + usage.completion_tokens,
            total_tokens: t.total_tokens + usage.total_tokens,
        },
        None => usage,
    }
}
