//! Model clients for the orchestration loop.
//!
//! The engine only talks to models through [`ModelClient`]: one request with
//! the full conversation and the tool list, one reply with optional text,
//! zero or more tool calls and optional token usage. Streaming is not used;
//! a run awaits each reply to completion.
//!
//! - [`openai`] - OpenAI-compatible chat-completions client
//! - [`retry`] - exponential backoff shared by HTTP clients

pub mod openai;
pub mod retry;

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

pub use openai::{OpenAiCompatibleClient, OpenAiConfig};
pub use steward_types;
use steward_types::{Message, TokenUsage, ToolCallRequest, ToolDefinition};

const CONNECT_TIMEOUT_SECS: u64 = 30;
const POOL_IDLE_TIMEOUT_SECS: u64 = 90;
const MAX_ERROR_BODY_BYTES: usize = 32 * 1024;

pub type ModelFut<'a> = Pin<Box<dyn Future<Output = Result<ModelReply, ModelError>> + Send + 'a>>;

/// Sampling options forwarded with every request.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct CompletionOptions {
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
}

/// One model turn.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ModelReply {
    pub content: Option<String>,
    /// In the order the model issued them.
    pub tool_calls: Vec<ToolCallRequest>,
    pub usage: Option<TokenUsage>,
}

impl ModelReply {
    #[must_use]
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: Some(content.into()),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn tool_calls(tool_calls: Vec<ToolCallRequest>) -> Self {
        Self {
            tool_calls,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_usage(mut self, usage: TokenUsage) -> Self {
        self.usage = Some(usage);
        self
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ModelError {
    #[error("model API returned {status}: {body}")]
    Http { status: u16, body: String },
    #[error("connection to model API failed after {attempts} attempt(s): {source}")]
    Connection {
        attempts: u32,
        #[source]
        source: reqwest::Error,
    },
    #[error("invalid model response: {0}")]
    InvalidResponse(String),
    #[error("failed to build HTTP client: {0}")]
    Client(#[source] reqwest::Error),
}

/// A chat model that can request tool calls.
pub trait ModelClient: Send + Sync {
    /// Model identifier used for pricing lookups.
    fn model_name(&self) -> &str;

    fn complete<'a>(
        &'a self,
        messages: &'a [Message],
        tools: &'a [ToolDefinition],
        options: CompletionOptions,
    ) -> ModelFut<'a>;
}

pub(crate) fn http_client(timeout: Duration) -> Result<reqwest::Client, ModelError> {
    reqwest::Client::builder()
        .connect_timeout(Duration::from_secs(CONNECT_TIMEOUT_SECS))
        .timeout(timeout)
        .pool_idle_timeout(Some(Duration::from_secs(POOL_IDLE_TIMEOUT_SECS)))
        .build()
        .map_err(ModelError::Client)
}

/// Read an error body without trusting the server to keep it small.
pub async fn read_capped_error_body(response: reqwest::Response) -> String {
    use futures_util::StreamExt;
    let mut body = Vec::new();
    let mut stream = response.bytes_stream();
    while let Some(chunk) = stream.next().await {
        let Ok(chunk) = chunk else { break };
        body.extend_from_slice(&chunk);
        if body.len() > MAX_ERROR_BODY_BYTES {
            body.truncate(MAX_ERROR_BODY_BYTES);
            let text = String::from_utf8_lossy(&body);
            return format!("{text}...(truncated)");
        }
    }
    String::from_utf8_lossy(&body).into_owned()
}
