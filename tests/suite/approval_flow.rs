//! Suspend, resolve and resume against a real shell.
#![cfg(unix)]

use serde_json::json;
use steward_engine::{CommandStatus, Mode, REJECTION_MESSAGE, RunOutcome};

use crate::common::{
    mount_replies, orchestrator, request_bodies, start_model_mock, text_reply, tool_call_reply,
};

fn touch_reply() -> serde_json::Value {
    tool_call_reply(&[
        (
            "call_cmd",
            "run_command",
            json!({"command": "touch made.txt && echo done", "reason": "create a marker"}),
        ),
        ("call_after", "list_directory", json!({})),
    ])
}

#[tokio::test]
async fn approved_command_runs_and_the_run_finishes() {
    let server = start_model_mock().await;
    let dir = tempfile::tempdir().unwrap();
    mount_replies(&server, vec![touch_reply(), text_reply("Marker created.")]).await;
    let orch = orchestrator(&server, dir.path());

    let outcome = orch.start_run(Vec::new(), "make a marker", Mode::Agent).await;
    let RunOutcome::Suspended {
        resume_token,
        pending_command_id,
    } = outcome
    else {
        panic!("expected suspension");
    };
    assert_eq!(resume_token.pending_tool_call_id, "call_cmd");
    assert!(!dir.path().join("made.txt").exists());

    let pending = orch.list_pending_commands();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].command, "touch made.txt && echo done");
    assert_eq!(pending[0].reason.as_deref(), Some("create a marker"));
    assert_eq!(pending[0].working_directory, dir.path());

    let resolution = orch.approve(&pending_command_id).await.unwrap().unwrap();
    assert!(dir.path().join("made.txt").exists());
    assert!(resolution.content().contains("done"));
    assert!(orch.list_pending_commands().is_empty());

    // A second approval finds nothing left to do.
    assert!(orch.approve(&pending_command_id).await.unwrap().is_none());

    let outcome = orch.resume_run(resume_token, resolution).await.unwrap();
    let RunOutcome::Completed { message, .. } = outcome else {
        panic!("expected completion");
    };
    assert_eq!(message.content(), "Marker created.");

    // The call queued behind the gated one was never answered.
    let bodies = request_bodies(&server).await;
    let messages = bodies[1]["messages"].as_array().unwrap();
    assert!(messages.iter().all(|m| m["tool_call_id"] != "call_after"));
    assert_eq!(messages.last().unwrap()["tool_call_id"], "call_cmd");
}

#[tokio::test]
async fn rejected_command_never_runs() {
    let server = start_model_mock().await;
    let dir = tempfile::tempdir().unwrap();
    mount_replies(&server, vec![touch_reply(), text_reply("Understood.")]).await;
    let orch = orchestrator(&server, dir.path());

    let RunOutcome::Suspended {
        resume_token,
        pending_command_id,
    } = orch.start_run(Vec::new(), "make a marker", Mode::Agent).await
    else {
        panic!("expected suspension");
    };

    let resolution = orch.reject(&pending_command_id).unwrap().unwrap();
    assert_eq!(resolution.content(), REJECTION_MESSAGE);
    assert!(orch.reject(&pending_command_id).unwrap().is_none());

    let outcome = orch.resume_run(resume_token, resolution).await.unwrap();
    assert!(matches!(outcome, RunOutcome::Completed { .. }));
    assert!(!dir.path().join("made.txt").exists());

    let bodies = request_bodies(&server).await;
    let last = bodies[1]["messages"].as_array().unwrap().last().unwrap().clone();
    assert_eq!(last["role"], "tool");
    assert_eq!(last["content"], REJECTION_MESSAGE);
}

#[tokio::test]
async fn resolved_commands_keep_their_status() {
    let server = start_model_mock().await;
    let dir = tempfile::tempdir().unwrap();
    mount_replies(&server, vec![touch_reply()]).await;
    let orch = orchestrator(&server, dir.path());

    let RunOutcome::Suspended {
        pending_command_id, ..
    } = orch.start_run(Vec::new(), "make a marker", Mode::Agent).await
    else {
        panic!("expected suspension");
    };
    orch.reject(&pending_command_id).unwrap();

    let RunOutcome::Suspended {
        pending_command_id: second,
        ..
    } = orch.start_run(Vec::new(), "try again", Mode::Agent).await
    else {
        panic!("expected suspension");
    };
    assert_ne!(pending_command_id, second);

    let pending = orch.list_pending_commands();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].id, second);
    assert_eq!(pending[0].status, CommandStatus::Pending);
}
