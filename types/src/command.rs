//! Commands awaiting human approval.

use std::path::PathBuf;
use std::time::SystemTime;

use serde::{Deserialize, Serialize};

use crate::ids::CommandId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CommandStatus {
    Pending,
    Executing,
    Completed,
    Rejected,
}

impl CommandStatus {
    /// `Completed` and `Rejected` never transition again.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Rejected)
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Executing => "executing",
            Self::Completed => "completed",
            Self::Rejected => "rejected",
        }
    }
}

/// What a tool asks the gate to run once a human consents.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApprovalRequest {
    pub command: String,
    pub working_directory: PathBuf,
    pub reason: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingCommand {
    pub id: CommandId,
    pub tool_call_id: String,
    pub command: String,
    pub working_directory: PathBuf,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    pub status: CommandStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub created_at: SystemTime,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolved_at: Option<SystemTime>,
}

impl PendingCommand {
    #[must_use]
    pub fn new(
        tool_call_id: impl Into<String>,
        request: ApprovalRequest,
        created_at: SystemTime,
    ) -> Self {
        Self {
            id: CommandId::generate(),
            tool_call_id: tool_call_id.into(),
            command: request.command,
            working_directory: request.working_directory,
            reason: request.reason,
            status: CommandStatus::Pending,
            result: None,
            error: None,
            created_at,
            resolved_at: None,
        }
    }
}
