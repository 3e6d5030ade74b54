//! Shared test utilities and fixtures
//!
//! A wiremock server stands in for the chat-completions API; everything else
//! (tools, approval gate, process manager) is the real stack.

#![allow(dead_code)]

use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use serde_json::{Value, json};
use steward_engine::steward_providers::retry::RetryConfig;
use steward_engine::steward_providers::{OpenAiCompatibleClient, OpenAiConfig};
use steward_engine::steward_tools::{ProcessManager, ToolSettings, register_builtins};
use steward_engine::{
    DispatcherConfig, EngineParts, GateConfig, Orchestrator, OrchestratorConfig, StaticPricing,
    ToolRegistry, build_orchestrator,
};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

pub const MODEL: &str = "gpt-test";

/// Start a mock server that simulates the chat-completions API
pub async fn start_model_mock() -> MockServer {
    MockServer::start().await
}

/// Assistant reply with plain text.
pub fn text_reply(content: &str) -> Value {
    json!({
        "id": "chatcmpl-test",
        "object": "chat.completion",
        "model": MODEL,
        "choices": [{
            "index": 0,
            "message": {"role": "assistant", "content": content},
            "finish_reason": "stop"
        }],
        "usage": {"prompt_tokens": 10, "completion_tokens": 5, "total_tokens": 15}
    })
}

/// Assistant reply requesting `(id, tool, arguments)` calls in order.
pub fn tool_call_reply(calls: &[(&str, &str, Value)]) -> Value {
    let tool_calls: Vec<Value> = calls
        .iter()
        .map(|(id, name, args)| {
            json!({
                "id": id,
                "type": "function",
                "function": {"name": name, "arguments": args.to_string()}
            })
        })
        .collect();
    json!({
        "id": "chatcmpl-test",
        "object": "chat.completion",
        "model": MODEL,
        "choices": [{
            "index": 0,
            "message": {"role": "assistant", "content": null, "tool_calls": tool_calls},
            "finish_reason": "tool_calls"
        }],
        "usage": {"prompt_tokens": 20, "completion_tokens": 8, "total_tokens": 28}
    })
}

/// Serve `bodies` in order, one per request; the last one repeats.
pub async fn mount_replies(server: &MockServer, bodies: Vec<Value>) {
    let served = AtomicUsize::new(0);
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(move |_: &wiremock::Request| {
            let n = served.fetch_add(1, Ordering::SeqCst);
            let body = bodies
                .get(n)
                .or_else(|| bodies.last())
                .cloned()
                .unwrap_or_else(|| text_reply(""));
            ResponseTemplate::new(200).set_body_json(body)
        })
        .mount(server)
        .await;
}

/// JSON bodies of every chat-completions request the server received.
pub async fn request_bodies(server: &MockServer) -> Vec<Value> {
    server
        .received_requests()
        .await
        .unwrap_or_default()
        .iter()
        .map(|r| r.body_json::<Value>().unwrap())
        .collect()
}

/// Full stack against `server`, with tools rooted at `workspace`.
pub fn orchestrator(server: &MockServer, workspace: &Path) -> Orchestrator {
    let mut config = OpenAiConfig::new(MODEL)
        .with_base_url(format!("{}/v1", server.uri()))
        .with_api_key(Some("sk-test".to_string()));
    config.retry = RetryConfig {
        max_retries: 0,
        ..RetryConfig::default()
    };
    let client = OpenAiCompatibleClient::new(config).unwrap();

    let mut registry = ToolRegistry::new();
    register_builtins(&mut registry, &ToolSettings::new(workspace)).unwrap();

    build_orchestrator(EngineParts {
        model: Arc::new(client),
        registry,
        executor: Arc::new(ProcessManager::new()),
        pricing: Box::new(StaticPricing::new()),
        workspace: workspace.to_path_buf(),
        orchestrator: OrchestratorConfig::default(),
        dispatcher: DispatcherConfig::default(),
        gate: GateConfig {
            poll_interval: Duration::from_millis(10),
            timeout: Duration::from_secs(10),
            ..GateConfig::default()
        },
    })
}
