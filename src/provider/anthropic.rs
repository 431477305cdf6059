//! Backend for the Anthropic Messages API.
//!
//! Request and response bodies follow the `v1/messages` JSON format. The
//! prompt payload's instructions travel as the system prompt and its context
//! document as the single user turn.

use std::time::Duration;

use reqwest::Client;
use serde::{Deserialize, Serialize};

use super::{
    CompletionRequest, CompletionResponse, FinishReason, ModelBackend, ProviderHandle, Usage,
    error_for_status,
};
use crate::error::ProviderError;

const API_URL: &str = "https://api.anthropic.com/v1/messages";
const API_VERSION: &str = "2023-06-01";

#[derive(Clone)]
pub struct AnthropicClient {
    api_key: String,
    client: Client,
    base_url: String,
}

impl AnthropicClient {
    pub fn new(api_key: String, timeout: Duration) -> Result<Self, ProviderError> {
        Self::with_base_url(api_key, API_URL.to_string(), timeout)
    }

    /// Create a client pointing at a custom base URL (useful for testing).
    pub fn with_base_url(
        api_key: String,
        base_url: String,
        timeout: Duration,
    ) -> Result<Self, ProviderError> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(timeout)
            .build()?;
        Ok(Self {
            api_key,
            client,
            base_url,
        })
    }
}

impl ModelBackend for AnthropicClient {
    async fn complete(
        &self,
        handle: &ProviderHandle,
        request: &CompletionRequest,
    ) -> Result<CompletionResponse, ProviderError> {
        let body = MessagesRequest {
            model: handle.model.clone(),
            max_tokens: request.max_tokens,
            temperature: request.temperature,
            system: request.prompt_payload.instructions.clone(),
            messages: vec![Message {
                role: "user".into(),
                content: request.prompt_payload.user_message(),
            }],
        };

        let response = self
            .client
            .post(&self.base_url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", API_VERSION)
            .header("content-type", "application/json")
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(error_for_status(&handle.provider, response).await);
        }

        let body = response.json::<MessagesResponse>().await?;
        let content = body
            .content
            .iter()
            .filter(|b| b.content_type == "text")
            .map(|b| b.text.as_str())
            .collect::<Vec<_>>()
            .join("");

        Ok(CompletionResponse {
            content,
            usage: Usage {
                input_tokens: body.usage.input_tokens,
                output_tokens: body.usage.output_tokens,
            },
            finish_reason: FinishReason::parse(body.stop_reason.as_deref()),
        })
    }
}

/// Body of a `/v1/messages` request.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct MessagesRequest {
    model: String,
    max_tokens: u32,
    temperature: f32,
    system: String,
    messages: Vec<Message>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Message {
    role: String,
    content: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct MessagesResponse {
    #[serde(default)]
    content: Vec<ContentBlock>,
    stop_reason: Option<String>,
    usage: ApiUsage,
}

/// `content_type` is serialized as `"type"` to match the API.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    content_type: String,
    #[serde(default)]
    text: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ApiUsage {
    input_tokens: u64,
    output_tokens: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::{CostTier, PromptPayload, TaskClass};
    use crate::workflow::Stage;
    use wiremock::matchers::{header, method};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn handle() -> ProviderHandle {
        ProviderHandle {
            provider: "anthropic".into(),
            model: "claude-sonnet-4-5".into(),
            cost_tier: CostTier::Standard,
        }
    }

    fn request() -> CompletionRequest {
        CompletionRequest {
            task_class: TaskClass::ComplexReasoning,
            prompt_payload: PromptPayload {
                job_id: "J1".into(),
                stage: Stage::Assessment,
                instructions: "score the candidate".into(),
                context: serde_json::json!({"candidate": "c1"}),
            },
            max_tokens: 256,
            temperature: 0.2,
        }
    }

    async fn client_for(server: &MockServer) -> AnthropicClient {
        AnthropicClient::with_base_url(
            "sk-test".into(),
            format!("{}/v1/messages", server.uri()),
            Duration::from_secs(5),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn parses_successful_response() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(header("x-api-key", "sk-test"))
            .and(header("anthropic-version", API_VERSION))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "id": "msg_1",
                "model": "claude-sonnet-4-5",
                "content": [{"type": "text", "text": "{\"score\": 80}"}],
                "stop_reason": "end_turn",
                "usage": {"input_tokens": 12, "output_tokens": 7}
            })))
            .mount(&server)
            .await;

        let resp = client_for(&server)
            .await
            .complete(&handle(), &request())
            .await
            .unwrap();
        assert_eq!(resp.content, r#"{"score": 80}"#);
        assert_eq!(resp.finish_reason, FinishReason::Stop);
        assert_eq!(resp.usage.input_tokens, 12);
        assert_eq!(resp.usage.output_tokens, 7);
    }

    #[tokio::test]
    async fn maps_429_to_rate_limited() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(429).insert_header("retry-after", "3"))
            .mount(&server)
            .await;

        let err = client_for(&server)
            .await
            .complete(&handle(), &request())
            .await
            .unwrap_err();
        assert_eq!(
            err,
            ProviderError::RateLimited {
                provider: "anthropic".into(),
                retry_after_ms: Some(3000),
            }
        );
    }

    #[tokio::test]
    async fn maps_overloaded_to_transient_and_4xx_to_rejected() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(529).set_body_string("overloaded"))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(401).set_body_string("invalid key"))
            .mount(&server)
            .await;

        let client = client_for(&server).await;
        let err = client.complete(&handle(), &request()).await.unwrap_err();
        assert!(matches!(err, ProviderError::Transient { status: 529, .. }));
        assert!(err.is_retryable());

        let err = client.complete(&handle(), &request()).await.unwrap_err();
        assert!(matches!(err, ProviderError::Rejected { status: 401, .. }));
        assert!(!err.is_retryable());
    }

    #[test]
    fn content_block_type_field_renames_correctly() {
        let block = ContentBlock {
            content_type: "text".into(),
            text: "hello".into(),
        };
        let json = serde_json::to_string(&block).unwrap();
        assert!(json.contains(r#""type""#));
        assert!(!json.contains("content_type"));
    }
}
