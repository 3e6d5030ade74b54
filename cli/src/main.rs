//! Steward CLI - run one goal through the orchestrator.
//!
//! ```text
//! steward [--chat] <goal...>
//! ```
//!
//! Every shell command the model asks for is printed and only runs after a
//! `y` on stdin; anything else rejects it. The run then resumes until the
//! model answers or the run fails.

use std::env;
use std::fs::{self, OpenOptions};
use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result, bail};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use steward_engine::config::steward_dir;
use steward_engine::steward_providers::{OpenAiCompatibleClient, OpenAiConfig};
use steward_engine::steward_tools::{ProcessManager, register_builtins};
use steward_engine::{
    EngineParts, Mode, Orchestrator, RunOutcome, SessionStats, StewardConfig, ToolRegistry,
    build_orchestrator,
};

const USAGE: &str = "usage: steward [--chat] <goal...>";
const DEFAULT_MODEL: &str = "gpt-4o-mini";
const OPENAI_API_KEY_ENV: &str = "OPENAI_API_KEY";

fn init_tracing() {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let (log_file, init_warnings) = open_log_file();

    if let Some((log_path, file)) = log_file {
        tracing_subscriber::registry()
            .with(fmt::layer().with_ansi(false).with_writer(Mutex::new(file)))
            .with(env_filter)
            .init();

        tracing::info!(path = %log_path.display(), "Logging initialized");
        for warning in init_warnings {
            tracing::warn!("{warning}");
        }
        return;
    }

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(io::stderr))
        .with(env_filter)
        .init();
    for warning in init_warnings {
        tracing::warn!("{warning}");
    }
}

fn open_log_file() -> (Option<(PathBuf, fs::File)>, Vec<String>) {
    let mut warnings = Vec::new();

    for candidate in log_file_candidates() {
        if let Some(parent) = candidate.parent()
            && let Err(e) = fs::create_dir_all(parent)
        {
            warnings.push(format!(
                "Failed to create log dir {}: {e}",
                parent.display()
            ));
            continue;
        }

        match OpenOptions::new().create(true).append(true).open(&candidate) {
            Ok(file) => return (Some((candidate, file)), warnings),
            Err(e) => {
                warnings.push(format!(
                    "Failed to open log file {}: {e}",
                    candidate.display()
                ));
            }
        }
    }

    (None, warnings)
}

fn log_file_candidates() -> Vec<PathBuf> {
    // ~/.steward/logs/steward.log; stderr if that cannot be opened.
    steward_dir()
        .map(|dir| dir.join("logs").join("steward.log"))
        .into_iter()
        .collect()
}

#[derive(Debug, PartialEq, Eq)]
enum Command {
    Run { mode: Mode, goal: String },
    Help,
}

fn parse_args(args: impl IntoIterator<Item = String>) -> Result<Command> {
    let mut mode = Mode::Agent;
    let mut words = Vec::new();
    for arg in args {
        match arg.as_str() {
            "--chat" => mode = Mode::Chat,
            "--agent" => mode = Mode::Agent,
            "-h" | "--help" => return Ok(Command::Help),
            flag if flag.starts_with("--") => bail!("unknown option {flag}\n{USAGE}"),
            _ => words.push(arg),
        }
    }
    let goal = words.join(" ");
    if goal.trim().is_empty() {
        bail!("missing goal\n{USAGE}");
    }
    Ok(Command::Run { mode, goal })
}

fn build(config: &StewardConfig) -> Result<Orchestrator> {
    let cwd = env::current_dir().context("cannot determine current directory")?;
    let settings = config.tool_settings(&cwd);

    let mut registry = ToolRegistry::new();
    register_builtins(&mut registry, &settings).context("failed to register built-in tools")?;

    let mut model_config =
        OpenAiConfig::new(config.model_name().unwrap_or(DEFAULT_MODEL)).with_api_key(
            config
                .model_api_key()
                .or_else(|| env::var(OPENAI_API_KEY_ENV).ok()),
        );
    if let Some(base_url) = config.model_base_url() {
        model_config = model_config.with_base_url(base_url);
    }
    tracing::info!(config = ?model_config, workspace = %settings.workspace.display(), "Starting");
    let client = OpenAiCompatibleClient::new(model_config)?;
    let executor = ProcessManager::new()
        .with_output_limit(usize::try_from(settings.max_read_bytes).unwrap_or(usize::MAX));

    Ok(build_orchestrator(EngineParts {
        model: Arc::new(client),
        registry,
        executor: Arc::new(executor),
        pricing: Box::new(config.pricing_table()),
        workspace: settings.workspace,
        orchestrator: config.orchestrator_config(),
        dispatcher: config.dispatcher_config(),
        gate: config.gate_config(),
    }))
}

fn confirm(prompt: &str) -> Result<bool> {
    print!("{prompt}");
    io::stdout().flush()?;
    let mut answer = String::new();
    io::stdin().lock().read_line(&mut answer)?;
    Ok(matches!(answer.trim(), "y" | "Y" | "yes" | "Yes"))
}

fn print_stats(stats: &SessionStats) {
    println!(
        "\n[tokens: {} prompt + {} completion = {} | cost: ${:.4} | messages: {}]",
        stats.prompt_tokens,
        stats.completion_tokens,
        stats.total_tokens,
        stats.total_cost,
        stats.message_count
    );
}

async fn drive(orchestrator: &Orchestrator, mode: Mode, goal: &str) -> Result<bool> {
    let mut outcome = orchestrator.start_run(Vec::new(), goal, mode).await;
    loop {
        match outcome {
            RunOutcome::Completed { message, .. } => {
                println!("{}", message.content());
                return Ok(true);
            }
            RunOutcome::Failed { reason, .. } => {
                eprintln!("Run failed: {reason}");
                return Ok(false);
            }
            RunOutcome::Suspended {
                resume_token,
                pending_command_id,
            } => {
                if let Some(command) = orchestrator
                    .list_pending_commands()
                    .into_iter()
                    .find(|c| c.id == pending_command_id)
                {
                    println!("\nThe assistant wants to run:");
                    println!("  $ {}", command.command);
                    println!("  in {}", command.working_directory.display());
                    if let Some(reason) = &command.reason {
                        println!("  reason: {reason}");
                    }
                }

                let resolution = if confirm("Run this command? [y/N] ")? {
                    orchestrator.approve(&pending_command_id).await?
                } else {
                    orchestrator.reject(&pending_command_id)?
                };
                let Some(resolution) = resolution else {
                    bail!("command {pending_command_id} was already resolved");
                };
                outcome = orchestrator.resume_run(resume_token, resolution).await?;
            }
        }
    }
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    init_tracing();

    let (mode, goal) = match parse_args(env::args().skip(1))? {
        Command::Help => {
            println!("{USAGE}");
            return Ok(ExitCode::SUCCESS);
        }
        Command::Run { mode, goal } => (mode, goal),
    };

    let config = StewardConfig::load()?.unwrap_or_default();
    let orchestrator = build(&config)?;

    let succeeded = drive(&orchestrator, mode, &goal).await?;
    print_stats(&orchestrator.session_stats());

    Ok(if succeeded {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}
