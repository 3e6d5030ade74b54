//! Core engine for Steward: orchestration loop, tool dispatch and approval gate.
//!
//! The engine has no terminal or UI dependencies. Callers hand it a
//! [`ModelClient`], a populated [`ToolRegistry`] and a [`CommandExecutor`]
//! and drive runs through the [`Orchestrator`].

pub mod approval;
pub mod config;
pub mod dispatch;
pub mod orchestrator;
pub mod session;

use std::path::PathBuf;
use std::sync::Arc;

pub use approval::{ApprovalGate, GateConfig, GateError, REJECTION_MESSAGE};
pub use config::{ConfigError, StewardConfig};
pub use dispatch::{DispatcherConfig, ToolDispatcher};
pub use orchestrator::{
    FailureReason, Orchestrator, OrchestratorConfig, OrchestratorError, RunOutcome,
};
pub use session::{PricingTable, SessionAccumulator, StaticPricing};
pub use steward_providers::{self, CompletionOptions, ModelClient, ModelError, ModelReply};
pub use steward_tools::{self, CommandExecutor, ToolRegistry, ToolSettings};
pub use steward_types::{
    CommandId, CommandStatus, Message, Mode, PendingCommand, Role, SessionStats, SuspendedRun,
    TokenUsage, ToolCallRequest, ToolDefinition, ToolResult,
};

/// Everything needed to assemble an [`Orchestrator`].
pub struct EngineParts {
    pub model: Arc<dyn ModelClient>,
    pub registry: ToolRegistry,
    pub executor: Arc<dyn CommandExecutor>,
    pub pricing: Box<dyn PricingTable>,
    pub workspace: PathBuf,
    pub orchestrator: OrchestratorConfig,
    pub dispatcher: DispatcherConfig,
    pub gate: GateConfig,
}

/// Wire registry, gate, dispatcher and session into an orchestrator.
#[must_use]
pub fn build_orchestrator(parts: EngineParts) -> Orchestrator {
    let gate = Arc::new(ApprovalGate::new(parts.executor, parts.gate));
    let dispatcher = ToolDispatcher::new(
        Arc::new(parts.registry),
        gate,
        parts.workspace,
        parts.dispatcher,
    );
    Orchestrator::new(
        parts.model,
        dispatcher,
        SessionAccumulator::new(parts.pricing),
        parts.orchestrator,
    )
}
