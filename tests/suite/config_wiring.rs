//! A config file drives model endpoint, limits and pricing end to end.

use std::sync::Arc;

use serde_json::json;
use steward_engine::steward_providers::{OpenAiCompatibleClient, OpenAiConfig};
use steward_engine::steward_tools::{ProcessManager, register_builtins};
use steward_engine::{
    ConfigError, EngineParts, FailureReason, Mode, Orchestrator, RunOutcome, StewardConfig,
    ToolRegistry, build_orchestrator,
};
use wiremock::MockServer;

use crate::common::{MODEL, mount_replies, start_model_mock, tool_call_reply};

fn write_config(dir: &std::path::Path, server: &MockServer) -> std::path::PathBuf {
    let path = dir.join("config.toml");
    let workspace = dir.join("ws");
    std::fs::create_dir_all(&workspace).unwrap();
    let body = format!(
        r#"
[model]
name = "{MODEL}"
base_url = "{uri}/v1"
api_key = "sk-from-config"
temperature = 0.5
max_tokens = 256

[tools]
max_iterations = 1
workspace = '{workspace}'

[approval]
poll_interval_ms = 10

[pricing.{MODEL}]
input_per_million = 2.0
output_per_million = 8.0
"#,
        uri = server.uri(),
        workspace = workspace.display(),
    );
    std::fs::write(&path, body).unwrap();
    path
}

fn build(config: &StewardConfig, fallback: &std::path::Path) -> Orchestrator {
    let settings = config.tool_settings(fallback);
    let mut registry = ToolRegistry::new();
    register_builtins(&mut registry, &settings).unwrap();

    let mut model = OpenAiConfig::new(config.model_name().unwrap()).with_api_key(config.model_api_key());
    if let Some(url) = config.model_base_url() {
        model = model.with_base_url(url);
    }

    build_orchestrator(EngineParts {
        model: Arc::new(OpenAiCompatibleClient::new(model).unwrap()),
        registry,
        executor: Arc::new(ProcessManager::new()),
        pricing: Box::new(config.pricing_table()),
        workspace: settings.workspace,
        orchestrator: config.orchestrator_config(),
        dispatcher: config.dispatcher_config(),
        gate: config.gate_config(),
    })
}

#[tokio::test]
async fn configured_limits_and_pricing_apply_to_a_run() {
    let server = start_model_mock().await;
    mount_replies(
        &server,
        vec![tool_call_reply(&[("call_1", "list_directory", json!({}))])],
    )
    .await;
    let dir = tempfile::tempdir().unwrap();
    let path = write_config(dir.path(), &server);

    let config = StewardConfig::load_from(&path).unwrap().unwrap();
    let orch = build(&config, dir.path());
    assert_eq!(orch.model_name(), MODEL);

    let outcome = orch.start_run(Vec::new(), "look around", Mode::Agent).await;
    let RunOutcome::Failed { reason, .. } = outcome else {
        panic!("expected the loop limit");
    };
    assert_eq!(reason, FailureReason::ToolLoopLimit { max_iterations: 1 });

    let requests = server.received_requests().await.unwrap();
    assert_eq!(requests.len(), 2);
    let auth = requests[0].headers.get("authorization").unwrap();
    assert_eq!(auth.to_str().unwrap(), "Bearer sk-from-config");
    let body: serde_json::Value = requests[0].body_json().unwrap();
    assert_eq!(body["model"], MODEL);
    assert_eq!(body["max_tokens"], 256);
    assert!((body["temperature"].as_f64().unwrap() - 0.5).abs() < 1e-6);

    let stats = orch.session_stats();
    assert_eq!(stats.prompt_tokens, 40);
    assert_eq!(stats.completion_tokens, 16);
    let expected_cost = 40.0 * 2.0 / 1e6 + 16.0 * 8.0 / 1e6;
    assert!((stats.total_cost - expected_cost).abs() < 1e-12);
}

#[test]
fn missing_config_is_not_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let loaded = StewardConfig::load_from(&dir.path().join("absent.toml")).unwrap();
    assert!(loaded.is_none());
}

#[test]
fn malformed_config_reports_its_path() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.toml");
    std::fs::write(&path, "[model\nname = ").unwrap();

    let err = StewardConfig::load_from(&path).unwrap_err();
    assert!(matches!(err, ConfigError::Parse { .. }));
    assert_eq!(err.path(), &path);
}
