//! Run loop over the real OpenAI-compatible client.

use serde_json::json;
use steward_engine::{FailureReason, Mode, Role, RunOutcome};

use crate::common::{
    mount_replies, orchestrator, request_bodies, start_model_mock, text_reply, tool_call_reply,
};

#[tokio::test]
async fn write_then_answer_round_trips_through_http() {
    let server = start_model_mock().await;
    let dir = tempfile::tempdir().unwrap();
    mount_replies(
        &server,
        vec![
            tool_call_reply(&[(
                "call_1",
                "write_file",
                json!({"path": "notes.txt", "content": "hello"}),
            )]),
            text_reply("Wrote notes.txt."),
        ],
    )
    .await;

    let orch = orchestrator(&server, dir.path());
    let outcome = orch
        .start_run(Vec::new(), "create notes.txt", Mode::Agent)
        .await;

    let RunOutcome::Completed {
        message,
        usage,
        conversation,
    } = outcome
    else {
        panic!("expected completion");
    };
    assert_eq!(message.content(), "Wrote notes.txt.");
    assert_eq!(
        std::fs::read_to_string(dir.path().join("notes.txt")).unwrap(),
        "hello"
    );
    let usage = usage.unwrap();
    assert_eq!(usage.prompt_tokens, 30);
    assert_eq!(usage.completion_tokens, 13);

    let roles: Vec<Role> = conversation.iter().map(|m| m.role()).collect();
    assert_eq!(
        roles,
        vec![Role::User, Role::Assistant, Role::Tool, Role::Assistant]
    );

    let bodies = request_bodies(&server).await;
    assert_eq!(bodies.len(), 2);
    assert_eq!(bodies[0]["messages"][0]["role"], "system");
    assert_eq!(bodies[0]["messages"][1]["content"], "create notes.txt");
    assert!(
        bodies[0]["tools"]
            .as_array()
            .unwrap()
            .iter()
            .any(|t| t["function"]["name"] == "run_command")
    );

    // Second request carries the assistant tool call and its result.
    let second = bodies[1]["messages"].as_array().unwrap();
    assert_eq!(second.len(), 4);
    assert_eq!(second[2]["tool_calls"][0]["id"], "call_1");
    assert_eq!(second[3]["role"], "tool");
    assert_eq!(second[3]["tool_call_id"], "call_1");

    let stats = orch.session_stats();
    assert_eq!(stats.total_tokens, 43);
    assert_eq!(stats.message_count, 4);
}

#[tokio::test]
async fn chat_mode_sends_no_tools() {
    let server = start_model_mock().await;
    let dir = tempfile::tempdir().unwrap();
    mount_replies(&server, vec![text_reply("Hi there.")]).await;

    let orch = orchestrator(&server, dir.path());
    let outcome = orch.start_run(Vec::new(), "hello", Mode::Chat).await;
    assert!(matches!(outcome, RunOutcome::Completed { .. }));

    let bodies = request_bodies(&server).await;
    assert_eq!(bodies.len(), 1);
    assert!(bodies[0].get("tools").is_none());
    assert!(bodies[0].get("tool_choice").is_none());
}

#[tokio::test]
async fn tool_failures_are_reported_back_to_the_model() {
    let server = start_model_mock().await;
    let dir = tempfile::tempdir().unwrap();
    mount_replies(
        &server,
        vec![
            tool_call_reply(&[("call_1", "read_file", json!({"path": "missing.txt"}))]),
            text_reply("That file does not exist."),
        ],
    )
    .await;

    let orch = orchestrator(&server, dir.path());
    let outcome = orch.start_run(Vec::new(), "read it", Mode::Agent).await;
    assert!(matches!(outcome, RunOutcome::Completed { .. }));

    let bodies = request_bodies(&server).await;
    let tool_message = &bodies[1]["messages"][3];
    assert_eq!(tool_message["role"], "tool");
    assert!(
        tool_message["content"]
            .as_str()
            .unwrap()
            .contains("missing.txt")
    );
}

#[tokio::test]
async fn endless_tool_calls_hit_the_loop_limit() {
    let server = start_model_mock().await;
    let dir = tempfile::tempdir().unwrap();
    mount_replies(
        &server,
        vec![tool_call_reply(&[(
            "call_n",
            "list_directory",
            json!({}),
        )])],
    )
    .await;

    let orch = orchestrator(&server, dir.path());
    let outcome = orch.start_run(Vec::new(), "loop", Mode::Agent).await;
    let RunOutcome::Failed { reason, .. } = outcome else {
        panic!("expected failure");
    };
    assert_eq!(reason, FailureReason::ToolLoopLimit { max_iterations: 10 });
    assert_eq!(request_bodies(&server).await.len(), 11);
}

#[tokio::test]
async fn server_errors_fail_the_run() {
    let server = start_model_mock().await;
    wiremock::Mock::given(wiremock::matchers::method("POST"))
        .respond_with(wiremock::ResponseTemplate::new(401).set_body_string("bad key"))
        .mount(&server)
        .await;
    let dir = tempfile::tempdir().unwrap();

    let orch = orchestrator(&server, dir.path());
    let outcome = orch.start_run(Vec::new(), "hi", Mode::Agent).await;
    let RunOutcome::Failed {
        reason,
        conversation,
    } = outcome
    else {
        panic!("expected failure");
    };
    let FailureReason::Model(text) = reason else {
        panic!("expected model failure");
    };
    assert!(text.contains("401"));
    assert_eq!(conversation.len(), 1);
}
