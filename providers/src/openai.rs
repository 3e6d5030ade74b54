//! OpenAI-compatible chat-completions client.
//!
//! Works against any server speaking the `/chat/completions` wire format with
//! function tools (OpenAI, OpenRouter, vLLM, llama.cpp, Ollama, ...).

use std::time::Duration;

use serde::Deserialize;
use serde_json::{Map, Value, json};
use steward_types::{Message, Role, TokenUsage, ToolCallRequest, ToolDefinition};

use crate::retry::{RetryConfig, RetryOutcome, send_with_retry};
use crate::{
    CompletionOptions, ModelClient, ModelError, ModelFut, ModelReply, http_client,
    read_capped_error_body,
};

pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 120;

#[derive(Clone)]
pub struct OpenAiConfig {
    pub base_url: String,
    pub api_key: Option<String>,
    pub model: String,
    pub request_timeout: Duration,
    pub retry: RetryConfig,
}

impl OpenAiConfig {
    #[must_use]
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            api_key: None,
            model: model.into(),
            request_timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
            retry: RetryConfig::default(),
        }
    }

    #[must_use]
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    #[must_use]
    pub fn with_api_key(mut self, api_key: Option<String>) -> Self {
        self.api_key = api_key.filter(|k| !k.is_empty());
        self
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.base_url.trim_end_matches('/'))
    }
}

impl std::fmt::Debug for OpenAiConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiConfig")
            .field("base_url", &self.base_url)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("model", &self.model)
            .field("request_timeout", &self.request_timeout)
            .finish_non_exhaustive()
    }
}

#[derive(Debug)]
pub struct OpenAiCompatibleClient {
    client: reqwest::Client,
    config: OpenAiConfig,
}

impl OpenAiCompatibleClient {
    pub fn new(config: OpenAiConfig) -> Result<Self, ModelError> {
        let client = http_client(config.request_timeout)?;
        Ok(Self { client, config })
    }
}

impl ModelClient for OpenAiCompatibleClient {
    fn model_name(&self) -> &str {
        &self.config.model
    }

    fn complete<'a>(
        &'a self,
        messages: &'a [Message],
        tools: &'a [ToolDefinition],
        options: CompletionOptions,
    ) -> ModelFut<'a> {
        Box::pin(async move {
            let body = build_request_body(&self.config.model, messages, tools, options);
            let url = self.config.endpoint();
            let auth_header = self
                .config
                .api_key
                .as_ref()
                .map(|key| format!("Bearer {key}"));

            tracing::debug!(
                model = %self.config.model,
                messages = messages.len(),
                tools = tools.len(),
                "Sending chat completion request"
            );

            let outcome = send_with_retry(
                || {
                    let mut request = self.client.post(&url).json(&body);
                    if let Some(auth) = &auth_header {
                        request = request.header("Authorization", auth);
                    }
                    request
                },
                &self.config.retry,
            )
            .await;

            let response = match outcome {
                RetryOutcome::Success(response) => response,
                RetryOutcome::HttpError(response) => {
                    let status = response.status().as_u16();
                    let body = read_capped_error_body(response).await;
                    return Err(ModelError::Http { status, body });
                }
                RetryOutcome::ConnectionError { attempts, source } => {
                    return Err(ModelError::Connection { attempts, source });
                }
            };

            let raw: Value = response
                .json()
                .await
                .map_err(|e| ModelError::InvalidResponse(e.to_string()))?;
            parse_response(raw)
        })
    }
}

pub(crate) fn build_request_body(
    model: &str,
    messages: &[Message],
    tools: &[ToolDefinition],
    options: CompletionOptions,
) -> Value {
    let mut body = Map::new();
    body.insert("model".into(), json!(model));
    body.insert(
        "messages".into(),
        Value::Array(messages.iter().map(message_to_wire).collect()),
    );
    if !tools.is_empty() {
        let wire_tools: Vec<Value> = tools
            .iter()
            .map(|tool| {
                json!({
                    "type": "function",
                    "function": {
                        "name": tool.name,
                        "description": tool.description,
                        "parameters": tool.parameters,
                    }
                })
            })
            .collect();
        body.insert("tools".into(), Value::Array(wire_tools));
        body.insert("tool_choice".into(), json!("auto"));
    }
    if let Some(temperature) = options.temperature {
        body.insert("temperature".into(), json!(temperature));
    }
    if let Some(max_tokens) = options.max_tokens {
        body.insert("max_tokens".into(), json!(max_tokens));
    }
    Value::Object(body)
}

fn message_to_wire(message: &Message) -> Value {
    match message.role() {
        Role::Tool => json!({
            "role": "tool",
            "tool_call_id": message.tool_call_id().unwrap_or_default(),
            "content": message.content(),
        }),
        Role::Assistant if !message.tool_calls().is_empty() => {
            let calls: Vec<Value> = message
                .tool_calls()
                .iter()
                .map(|call| {
                    json!({
                        "id": call.id,
                        "type": "function",
                        "function": {
                            "name": call.tool_name,
                            "arguments": call.raw_arguments,
                        }
                    })
                })
                .collect();
            let content = if message.content().is_empty() {
                Value::Null
            } else {
                json!(message.content())
            };
            json!({ "role": "assistant", "content": content, "tool_calls": calls })
        }
        role => json!({ "role": role.as_str(), "content": message.content() }),
    }
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
    #[serde(default)]
    usage: Option<WireUsage>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: WireMessage,
}

#[derive(Debug, Deserialize)]
struct WireMessage {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<WireToolCall>>,
}

#[derive(Debug, Deserialize)]
struct WireToolCall {
    id: String,
    function: WireFunction,
}

#[derive(Debug, Deserialize)]
struct WireFunction {
    name: String,
    /// Some compatible servers send `null` instead of `"{}"`.
    #[serde(default)]
    arguments: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WireUsage {
    #[serde(default)]
    prompt_tokens: u64,
    #[serde(default)]
    completion_tokens: u64,
    #[serde(default)]
    total_tokens: Option<u64>,
}

pub(crate) fn parse_response(raw: Value) -> Result<ModelReply, ModelError> {
    let parsed: ChatResponse =
        serde_json::from_value(raw).map_err(|e| ModelError::InvalidResponse(e.to_string()))?;
    let choice = parsed
        .choices
        .into_iter()
        .next()
        .ok_or_else(|| ModelError::InvalidResponse("response has no choices".to_string()))?;

    let tool_calls = choice
        .message
        .tool_calls
        .unwrap_or_default()
        .into_iter()
        .map(|call| {
            ToolCallRequest::new(
                call.id,
                call.function.name,
                call.function.arguments.unwrap_or_default(),
            )
        })
        .collect();
    let usage = parsed.usage.map(|u| {
        let mut usage = TokenUsage::new(u.prompt_tokens, u.completion_tokens);
        if let Some(total) = u.total_tokens {
            usage.total_tokens = total;
        }
        usage
    });

    Ok(ModelReply {
        content: choice.message.content.filter(|c| !c.is_empty()),
        tool_calls,
        usage,
    })
}
