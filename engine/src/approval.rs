//! Approval gate for commands that need human consent.
//!
//! Commands move `pending -> executing -> completed` on approve and
//! `pending -> rejected` on reject. Each transition out of `pending` happens
//! under the table lock, so a second approve or reject is a no-op. Execution
//! runs on a task the gate spawns, so a caller that stops waiting on
//! `approve` cannot leave a command stuck in `executing`.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant, SystemTime};

use steward_tools::CommandExecutor;
use steward_types::{CommandId, CommandStatus, Message, PendingCommand, cap_result_text};

use crate::dispatch::DEFAULT_MAX_RESULT_CHARS;

pub const REJECTION_MESSAGE: &str = "User rejected the command execution.";
const NO_OUTPUT: &str = "(no output)";

#[derive(Debug, Clone, Copy)]
pub struct GateConfig {
    /// Delay between output polls while a command runs.
    pub poll_interval: Duration,
    /// How long approve waits for the command before returning partial output.
    pub timeout: Duration,
    /// Cap on the tool message text; the stored result keeps everything.
    pub max_result_chars: usize,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(500),
            timeout: Duration::from_secs(30),
            max_result_chars: DEFAULT_MAX_RESULT_CHARS,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum GateError {
    #[error("Unknown command: {0}")]
    UnknownCommand(CommandId),
}

type CommandTable = Arc<Mutex<HashMap<CommandId, PendingCommand>>>;

fn lock(commands: &CommandTable) -> MutexGuard<'_, HashMap<CommandId, PendingCommand>> {
    commands.lock().unwrap_or_else(PoisonError::into_inner)
}

pub struct ApprovalGate {
    commands: CommandTable,
    executor: Arc<dyn CommandExecutor>,
    config: GateConfig,
}

/// What approve observed while running a command.
struct Execution {
    output: String,
    exit_code: Option<i32>,
    error: Option<String>,
    timed_out: bool,
}

impl ApprovalGate {
    #[must_use]
    pub fn new(executor: Arc<dyn CommandExecutor>, config: GateConfig) -> Self {
        Self {
            commands: Arc::new(Mutex::new(HashMap::new())),
            executor,
            config,
        }
    }

    fn table(&self) -> MutexGuard<'_, HashMap<CommandId, PendingCommand>> {
        lock(&self.commands)
    }

    pub fn enqueue(&self, command: PendingCommand) -> CommandId {
        let id = command.id.clone();
        tracing::info!(
            command_id = %id,
            tool_call_id = %command.tool_call_id,
            command = %command.command,
            "Command awaiting approval"
        );
        self.table().insert(id.clone(), command);
        id
    }

    /// Run the command and produce its tool message.
    ///
    /// Returns `Ok(None)` if the command already left `pending`.
    pub async fn approve(&self, id: &CommandId) -> Result<Option<Message>, GateError> {
        let (tool_call_id, command, cwd) = {
            let mut table = self.table();
            let entry = table
                .get_mut(id)
                .ok_or_else(|| GateError::UnknownCommand(id.clone()))?;
            if entry.status != CommandStatus::Pending {
                tracing::debug!(command_id = %id, status = entry.status.as_str(), "Approve ignored");
                return Ok(None);
            }
            entry.status = CommandStatus::Executing;
            (
                entry.tool_call_id.clone(),
                entry.command.clone(),
                entry.working_directory.clone(),
            )
        };
        tracing::info!(command_id = %id, command = %command, "Command approved");

        let task = tokio::spawn(run_approved(
            Arc::clone(&self.commands),
            Arc::clone(&self.executor),
            self.config,
            id.clone(),
            command,
            cwd,
        ));
        let text = match task.await {
            Ok(text) => text,
            Err(err) => {
                tracing::warn!(command_id = %id, error = %err, "Approved command task failed");
                let text = format!("Command execution failed: {err}");
                complete(&self.commands, id, &text, Some(text.clone()));
                text
            }
        };

        Ok(Some(Message::tool(
            tool_call_id,
            cap_result_text(&text, self.config.max_result_chars),
        )))
    }

    /// Returns `Ok(None)` if the command already left `pending`.
    pub fn reject(&self, id: &CommandId) -> Result<Option<Message>, GateError> {
        let mut table = self.table();
        let entry = table
            .get_mut(id)
            .ok_or_else(|| GateError::UnknownCommand(id.clone()))?;
        if entry.status != CommandStatus::Pending {
            tracing::debug!(command_id = %id, status = entry.status.as_str(), "Reject ignored");
            return Ok(None);
        }
        entry.status = CommandStatus::Rejected;
        entry.resolved_at = Some(SystemTime::now());
        tracing::info!(command_id = %id, "Command rejected");
        Ok(Some(Message::tool(
            entry.tool_call_id.clone(),
            REJECTION_MESSAGE,
        )))
    }

    #[must_use]
    pub fn get(&self, id: &CommandId) -> Option<PendingCommand> {
        self.table().get(id).cloned()
    }

    /// Commands still awaiting a decision, oldest first.
    #[must_use]
    pub fn list_pending(&self) -> Vec<PendingCommand> {
        let mut pending: Vec<PendingCommand> = self
            .table()
            .values()
            .filter(|c| c.status == CommandStatus::Pending)
            .cloned()
            .collect();
        pending.sort_by_key(|c| c.created_at);
        pending
    }

    /// Every command the gate has seen, oldest first.
    #[must_use]
    pub fn list(&self) -> Vec<PendingCommand> {
        let mut all: Vec<PendingCommand> = self.table().values().cloned().collect();
        all.sort_by_key(|c| c.created_at);
        all
    }
}

/// Execute an approved command and record its terminal state. Returns the
/// full, uncapped result text.
async fn run_approved(
    commands: CommandTable,
    executor: Arc<dyn CommandExecutor>,
    config: GateConfig,
    id: CommandId,
    command: String,
    cwd: PathBuf,
) -> String {
    let execution = execute(executor.as_ref(), &config, &command, &cwd).await;
    let text = render(&config, &execution);
    complete(&commands, &id, &text, execution.error.clone());
    tracing::info!(
        command_id = %id,
        exit_code = ?execution.exit_code,
        timed_out = execution.timed_out,
        "Command completed"
    );
    text
}

fn complete(commands: &CommandTable, id: &CommandId, text: &str, error: Option<String>) {
    if let Some(entry) = lock(commands).get_mut(id) {
        entry.status = CommandStatus::Completed;
        entry.result = Some(text.to_string());
        entry.error = error;
        entry.resolved_at = Some(SystemTime::now());
    }
}

async fn execute(
    executor: &dyn CommandExecutor,
    config: &GateConfig,
    command: &str,
    cwd: &Path,
) -> Execution {
    let process = match executor.spawn(command, cwd).await {
        Ok(id) => id,
        Err(e) => {
            tracing::warn!(command, error = %e, "Failed to start approved command");
            return Execution {
                output: String::new(),
                exit_code: None,
                error: Some(format!("Failed to start command: {e}")),
                timed_out: false,
            };
        }
    };

    let deadline = Instant::now() + config.timeout;
    let mut last_output = String::new();
    let execution = loop {
        match executor.poll(process).await {
            Ok(snapshot) => {
                last_output = snapshot.output;
                if !snapshot.is_running {
                    break Execution {
                        output: last_output,
                        exit_code: snapshot.exit_code,
                        error: None,
                        timed_out: false,
                    };
                }
            }
            Err(e) => {
                tracing::warn!(%process, error = %e, "Failed to poll approved command");
                break Execution {
                    output: last_output,
                    exit_code: None,
                    error: Some(format!("Failed to read command output: {e}")),
                    timed_out: false,
                };
            }
        }
        if Instant::now() >= deadline {
            tracing::warn!(%process, timeout = ?config.timeout, "Approved command still running");
            break Execution {
                output: last_output,
                exit_code: None,
                error: None,
                timed_out: true,
            };
        }
        tokio::time::sleep(config.poll_interval).await;
    };

    if let Err(e) = executor.release(process).await {
        tracing::debug!(%process, error = %e, "Failed to release process");
    }
    execution
}

fn render(config: &GateConfig, execution: &Execution) -> String {
    let output = execution.output.trim_end();
    let mut text = if output.is_empty() {
        match &execution.error {
            Some(error) => return error.clone(),
            None => NO_OUTPUT.to_string(),
        }
    } else {
        output.to_string()
    };
    if let Some(error) = &execution.error {
        text.push_str(&format!("\n[{error}]"));
    }
    if let Some(code) = execution.exit_code
        && code != 0
    {
        text.push_str(&format!("\n[exit code: {code}]"));
    }
    if execution.timed_out {
        text.push_str(&format!(
            "\n[Command did not finish within {}s and may still be running]",
            config.timeout.as_secs_f64()
        ));
    }
    text
}

impl std::fmt::Debug for ApprovalGate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApprovalGate")
            .field("commands", &self.table().len())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
