//! Core domain types for Steward.
//!
//! This crate contains pure domain types with no IO, no async, and minimal dependencies.
//! Everything here can be shared between the tool layer, the model clients and the engine.

// Pedantic lint configuration - these are intentional design choices
#![allow(clippy::missing_errors_doc)] // Result-returning functions are self-explanatory
#![allow(clippy::missing_panics_doc)] // Panics are documented in assertions

mod command;
mod ids;
mod message;
mod run;
mod text;
mod usage;

pub use command::{ApprovalRequest, CommandStatus, PendingCommand};
pub use ids::{CommandId, MessageId};
pub use message::{Message, Role};
pub use run::SuspendedRun;
pub use text::{TRUNCATION_MARKER, cap_result_text, truncate_with_ellipsis};
pub use usage::{ModelPrice, SessionStats, TokenUsage};

use serde::{Deserialize, Serialize};

// ============================================================================
// Conversation Mode
// ============================================================================

/// Conversation mode. Each mode owns its tool list and system prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// Plain conversation; no tools are exposed.
    Chat,
    /// Full built-in tool set.
    #[default]
    Agent,
}

impl Mode {
    #[must_use]
    pub const fn tools_enabled(self) -> bool {
        matches!(self, Self::Agent)
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Chat => "chat",
            Self::Agent => "agent",
        }
    }

    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "chat" => Some(Self::Chat),
            "agent" => Some(Self::Agent),
            _ => None,
        }
    }
}

// ============================================================================
// Tool Calling Types
// ============================================================================

/// Definition of a tool that can be called by the model.
///
/// This follows the function calling schema used by chat-completions APIs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    /// The name of the tool (function name). Unique within a registry.
    pub name: String,
    /// A description of what the tool does.
    pub description: String,
    /// JSON Schema describing the tool's parameters.
    pub parameters: serde_json::Value,
    /// Whether calls must pass through the approval gate.
    #[serde(default)]
    pub requires_approval: bool,
}

impl ToolDefinition {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        parameters: serde_json::Value,
        requires_approval: bool,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters,
            requires_approval,
        }
    }
}

/// A tool call requested by the model.
///
/// Arguments are kept as the raw string the model produced; parsing happens at
/// dispatch time so malformed payloads can be reported instead of dropped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolCallRequest {
    /// Model-issued identifier, echoed back on the tool message.
    pub id: String,
    pub tool_name: String,
    pub raw_arguments: String,
}

impl ToolCallRequest {
    pub fn new(
        id: impl Into<String>,
        tool_name: impl Into<String>,
        raw_arguments: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            tool_name: tool_name.into(),
            raw_arguments: raw_arguments.into(),
        }
    }
}

/// Normalized outcome of dispatching one tool call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolResult {
    /// The ID of the tool call this result is for.
    pub tool_call_id: String,
    pub success: bool,
    /// Size-capped result text.
    pub text: String,
    pub requires_approval: bool,
    /// Set only when the call was handed to the approval gate.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pending_command_id: Option<CommandId>,
}

impl ToolResult {
    /// Create a successful tool result.
    pub fn success(tool_call_id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            tool_call_id: tool_call_id.into(),
            success: true,
            text: text.into(),
            requires_approval: false,
            pending_command_id: None,
        }
    }

    /// Create a failed tool result.
    pub fn failure(tool_call_id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            tool_call_id: tool_call_id.into(),
            success: false,
            text: text.into(),
            requires_approval: false,
            pending_command_id: None,
        }
    }

    /// Result for a call parked in the approval gate.
    pub fn awaiting_approval(tool_call_id: impl Into<String>, command_id: CommandId) -> Self {
        Self {
            tool_call_id: tool_call_id.into(),
            success: true,
            text: "awaiting approval".to_string(),
            requires_approval: true,
            pending_command_id: Some(command_id),
        }
    }

    /// Apply the result-size cap to `text`.
    #[must_use]
    pub fn capped(mut self, max_chars: usize) -> Self {
        self.text = cap_result_text(&self.text, max_chars);
        self
    }

    /// Tool message carrying this result back into the conversation.
    #[must_use]
    pub fn to_message(&self) -> Message {
        Message::tool(self.tool_call_id.clone(), self.text.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::{CommandId, Mode, Role, ToolDefinition, ToolResult, TRUNCATION_MARKER};

    #[test]
    fn mode_parse_is_case_insensitive() {
        assert_eq!(Mode::parse("Chat"), Some(Mode::Chat));
        assert_eq!(Mode::parse(" AGENT "), Some(Mode::Agent));
        assert_eq!(Mode::parse("plan"), None);
    }

    #[test]
    fn only_agent_mode_enables_tools() {
        assert!(Mode::Agent.tools_enabled());
        assert!(!Mode::Chat.tools_enabled());
    }

    #[test]
    fn awaiting_approval_result_carries_command_id() {
        let id = CommandId::new("cmd-7");
        let result = ToolResult::awaiting_approval("call_2", id.clone());
        assert!(result.success);
        assert!(result.requires_approval);
        assert_eq!(result.pending_command_id, Some(id));
    }

    #[test]
    fn capped_result_keeps_marker() {
        let result = ToolResult::success("call_1", "x".repeat(600)).capped(500);
        assert!(result.text.ends_with(TRUNCATION_MARKER));
        assert_eq!(
            result.text.chars().count(),
            500 + TRUNCATION_MARKER.chars().count()
        );
    }

    #[test]
    fn result_becomes_tool_message() {
        let msg = ToolResult::failure("call_3", "boom").to_message();
        assert_eq!(msg.role(), Role::Tool);
        assert_eq!(msg.tool_call_id(), Some("call_3"));
        assert_eq!(msg.content(), "boom");
    }

    #[test]
    fn tool_definition_defaults_to_no_approval() {
        let def: ToolDefinition = serde_json::from_value(serde_json::json!({
            "name": "read_file",
            "description": "Read a file",
            "parameters": {"type": "object"}
        }))
        .unwrap();
        assert!(!def.requires_approval);
    }
}
