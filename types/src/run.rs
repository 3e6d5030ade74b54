//! Resume token for runs parked on an approval.

use serde::{Deserialize, Serialize};

use crate::{CommandId, Message, Mode, ToolDefinition};

/// Everything needed to continue a run after its pending command resolves.
///
/// `conversation` ends with the assistant message that requested the paused
/// call, followed by tool messages for calls in the same batch that were
/// dispatched before it. `iterations` already counts that batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SuspendedRun {
    pub conversation: Vec<Message>,
    pub pending_tool_call_id: String,
    pub pending_command_id: CommandId,
    pub tool_definitions: Vec<ToolDefinition>,
    pub iterations: u32,
    pub mode: Mode,
}

#[cfg(test)]
mod tests {
    use super::SuspendedRun;
    use crate::{CommandId, Message, Mode, ToolCallRequest};

    #[test]
    fn token_survives_json() {
        let token = SuspendedRun {
            conversation: vec![
                Message::user("list the repo"),
                Message::assistant_with_tool_calls(
                    "",
                    vec![ToolCallRequest::new(
                        "call_1",
                        "run_command",
                        r#"{"command":"ls"}"#,
                    )],
                ),
            ],
            pending_tool_call_id: "call_1".to_string(),
            pending_command_id: CommandId::new("cmd-1"),
            tool_definitions: Vec::new(),
            iterations: 1,
            mode: Mode::Agent,
        };

        let json = serde_json::to_string(&token).unwrap();
        let back: SuspendedRun = serde_json::from_str(&json).unwrap();
        assert_eq!(back, token);
    }
}
