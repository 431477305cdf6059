//! Uniform boundary to external model backends.
//!
//! Every backend answers the same request shape,
//! `{task_class, prompt_payload, max_tokens, temperature}`, with
//! `{content, usage, finish_reason}` or a typed [`ProviderError`].
//! [`BackendRegistry`] maps configured provider ids onto concrete backends.

pub mod anthropic;
pub mod openai;
pub mod scripted;

use std::collections::HashMap;
use std::fmt;
use std::future::Future;

use serde::{Deserialize, Serialize};

use crate::error::ProviderError;
use crate::workflow::Stage;

pub use anthropic::AnthropicClient;
pub use openai::OpenAiClient;
pub use scripted::ScriptedBackend;

/// Category of model call, used as the routing key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TaskClass {
    ComplexReasoning,
    BulkClassification,
    SafetySensitive,
}

impl TaskClass {
    pub const ALL: [TaskClass; 3] = [
        TaskClass::ComplexReasoning,
        TaskClass::BulkClassification,
        TaskClass::SafetySensitive,
    ];
}

impl fmt::Display for TaskClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskClass::ComplexReasoning => write!(f, "complex-reasoning"),
            TaskClass::BulkClassification => write!(f, "bulk-classification"),
            TaskClass::SafetySensitive => write!(f, "safety-sensitive"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CostTier {
    Low,
    Standard,
    Premium,
}

impl fmt::Display for CostTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CostTier::Low => write!(f, "low"),
            CostTier::Standard => write!(f, "standard"),
            CostTier::Premium => write!(f, "premium"),
        }
    }
}

/// Wire protocol spoken by a configured provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    Anthropic,
    OpenAi,
    Scripted,
}

/// A routing decision: which provider and model serve a call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderHandle {
    pub provider: String,
    pub model: String,
    pub cost_tier: CostTier,
}

impl fmt::Display for ProviderHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.provider, self.model)
    }
}

/// Structured prompt handed to a backend. Backends render it into their
/// own message format; `context` is a JSON document built by the agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PromptPayload {
    pub job_id: String,
    pub stage: Stage,
    pub instructions: String,
    pub context: serde_json::Value,
}

impl PromptPayload {
    /// Renders the context block sent as the user turn.
    pub fn user_message(&self) -> String {
        serde_json::to_string_pretty(&self.context).unwrap_or_else(|_| self.context.to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletionRequest {
    pub task_class: TaskClass,
    pub prompt_payload: PromptPayload,
    pub max_tokens: u32,
    pub temperature: f32,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    pub input_tokens: u64,
    pub output_tokens: u64,
}

impl Usage {
    pub fn add(&mut self, other: Usage) {
        self.input_tokens += other.input_tokens;
        self.output_tokens += other.output_tokens;
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    Stop,
    MaxTokens,
    ContentFilter,
    Other(String),
}

impl FinishReason {
    /// Normalises the stop reasons reported by the different APIs.
    pub fn parse(raw: Option<&str>) -> Self {
        match raw {
            None | Some("end_turn") | Some("stop") | Some("stop_sequence") => FinishReason::Stop,
            Some("max_tokens") | Some("length") => FinishReason::MaxTokens,
            Some("content_filter") | Some("refusal") => FinishReason::ContentFilter,
            Some(other) => FinishReason::Other(other.to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletionResponse {
    pub content: String,
    pub usage: Usage,
    pub finish_reason: FinishReason,
}

/// A model backend reachable through the uniform request shape.
pub trait ModelBackend: Send + Sync {
    fn complete(
        &self,
        handle: &ProviderHandle,
        request: &CompletionRequest,
    ) -> impl Future<Output = Result<CompletionResponse, ProviderError>> + Send;
}

/// One concrete backend per configured provider.
#[derive(Clone)]
pub enum Backend {
    Anthropic(AnthropicClient),
    OpenAi(OpenAiClient),
    Scripted(ScriptedBackend),
}

impl ModelBackend for Backend {
    async fn complete(
        &self,
        handle: &ProviderHandle,
        request: &CompletionRequest,
    ) -> Result<CompletionResponse, ProviderError> {
        match self {
            Backend::Anthropic(client) => client.complete(handle, request).await,
            Backend::OpenAi(client) => client.complete(handle, request).await,
            Backend::Scripted(backend) => backend.complete(handle, request).await,
        }
    }
}

/// Maps a non-success HTTP response onto the error taxonomy.
pub(crate) async fn error_for_status(provider: &str, response: reqwest::Response) -> ProviderError {
    let status = response.status();
    if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
        let retry_after_ms = response
            .headers()
            .get("retry-after")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<u64>().ok())
            .map(|secs| secs * 1000);
        return ProviderError::RateLimited {
            provider: provider.to_string(),
            retry_after_ms,
        };
    }

    let message = response
        .text()
        .await
        .unwrap_or_else(|_| "unknown error".to_string());
    match status.as_u16() {
        408 => ProviderError::Timeout,
        code @ (500..=599) => ProviderError::Transient {
            status: code,
            message,
        },
        code => ProviderError::Rejected {
            status: code,
            message,
        },
    }
}

/// Provider id to backend lookup used by the gateway.
#[derive(Clone, Default)]
pub struct BackendRegistry {
    backends: HashMap<String, Backend>,
}

impl BackendRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, provider: impl Into<String>, backend: Backend) -> &mut Self {
        self.backends.insert(provider.into(), backend);
        self
    }

    pub fn contains(&self, provider: &str) -> bool {
        self.backends.contains_key(provider)
    }
}

impl ModelBackend for BackendRegistry {
    async fn complete(
        &self,
        handle: &ProviderHandle,
        request: &CompletionRequest,
    ) -> Result<CompletionResponse, ProviderError> {
        match self.backends.get(&handle.provider) {
            Some(backend) => backend.complete(handle, request).await,
            None => Err(ProviderError::Rejected {
                status: 0,
                message: format!("no backend registered for provider {}", handle.provider),
            }),
        }
    }
}
