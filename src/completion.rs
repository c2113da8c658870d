//! Completion service: the model behind the prompts.
//!
//! [`CompletionService`] is the seam the pipeline calls through;
//! [`OpenAiCompletion`] implements it against an OpenAI-compatible
//! chat-completions endpoint.

use crate::config::Config;
use crate::retry::{with_retry_if, RetryConfig};
use anyhow::{Context, Result};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde::{Deserialize, Serialize};
use std::future::Future;
use thiserror::Error;
use tracing::debug;

pub const DEFAULT_OPENAI_API_URL: &str = "https://api.openai.com/v1/chat/completions";

/// Audio attached to a completion request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaPayload {
    pub data: Vec<u8>,
    /// Container format, e.g. "wav" or "mp3"
    pub format: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletionRequest {
    pub system_prompt: String,
    pub user_prompt: String,
    pub media: Option<MediaPayload>,
}

/// Anything that turns prompts (plus optional audio) into raw reply text.
pub trait CompletionService: Send + Sync {
    fn complete(&self, request: &CompletionRequest) -> impl Future<Output = Result<String>> + Send;
}

/// Non-success HTTP status from the completion endpoint.
#[derive(Debug, Error)]
#[error("OpenAI API error ({status}): {body}")]
pub struct ApiStatusError {
    pub status: u16,
    pub body: String,
}

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<Message>,
    max_completion_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    reasoning_effort: Option<String>,
}

#[derive(Debug, Serialize)]
struct Message {
    role: String,
    content: MessageContent,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
enum MessageContent {
    Text(String),
    Parts(Vec<ContentPart>),
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentPart {
    Text { text: String },
    InputAudio { input_audio: InputAudio },
}

#[derive(Debug, Serialize)]
struct InputAudio {
    data: String,
    format: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: Option<String>,
}

/// Check if a model is a reasoning model that doesn't support temperature
fn is_reasoning_model(model: &str) -> bool {
    model.starts_with("gpt-5")
        || model.starts_with("o1")
        || model.starts_with("o3")
        || model.starts_with("o4")
}

/// Retry 429 and 5xx responses plus network failures; fail fast on other 4xx.
fn is_retryable_error(error: &anyhow::Error) -> bool {
    match error.downcast_ref::<ApiStatusError>() {
        Some(api_error) => api_error.status == 429 || api_error.status >= 500,
        None => true,
    }
}

/// OpenAI-compatible chat-completions client.
#[derive(Debug, Clone)]
pub struct OpenAiCompletion {
    client: reqwest::Client,
    api_url: String,
    api_key: String,
    model: String,
    max_completion_tokens: u32,
    retry: RetryConfig,
}

impl OpenAiCompletion {
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_url: DEFAULT_OPENAI_API_URL.to_string(),
            api_key: api_key.into(),
            model: model.into(),
            max_completion_tokens: 4000,
            retry: RetryConfig::completion(),
        }
    }

    /// Client configured from the environment.
    ///
    /// # Errors
    /// Fails if `OPENAI_API_KEY` was not set.
    pub fn from_config(config: &Config) -> Result<Self> {
        let api_key = config
            .openai_api_key
            .clone()
            .context("OPENAI_API_KEY not set")?;
        Ok(Self::new(api_key, config.openai_model.clone()).with_api_url(config.openai_api_url.clone()))
    }

    pub fn with_api_url(mut self, api_url: impl Into<String>) -> Self {
        self.api_url = api_url.into();
        self
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_client(mut self, client: reqwest::Client) -> Self {
        self.client = client;
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    fn build_request(&self, request: &CompletionRequest) -> ChatRequest {
        let user_content = match &request.media {
            None => MessageContent::Text(request.user_prompt.clone()),
            Some(media) => MessageContent::Parts(vec![
                ContentPart::Text {
                    text: request.user_prompt.clone(),
                },
                ContentPart::InputAudio {
                    input_audio: InputAudio {
                        data: BASE64.encode(&media.data),
                        format: media.format.clone(),
                    },
                },
            ]),
        };

        // Reasoning models need higher token limits and don't support temperature
        let is_reasoning = is_reasoning_model(&self.model);
        ChatRequest {
            model: self.model.clone(),
            messages: vec![
                Message {
                    role: "system".to_string(),
                    content: MessageContent::Text(request.system_prompt.clone()),
                },
                Message {
                    role: "user".to_string(),
                    content: user_content,
                },
            ],
            max_completion_tokens: if is_reasoning {
                16000
            } else {
                self.max_completion_tokens
            },
            temperature: if is_reasoning { None } else { Some(0.2) },
            reasoning_effort: if is_reasoning {
                Some("low".to_string())
            } else {
                None
            },
        }
    }
}

impl CompletionService for OpenAiCompletion {
    async fn complete(&self, request: &CompletionRequest) -> Result<String> {
        let chat_request = self.build_request(request);
        debug!(
            "Sending completion request (model={}, audio={})",
            self.model,
            request.media.is_some()
        );

        with_retry_if(
            &self.retry,
            "Completion request",
            || async {
                let response = self
                    .client
                    .post(&self.api_url)
                    .header("Authorization", format!("Bearer {}", self.api_key))
                    .header("Content-Type", "application/json")
                    .json(&chat_request)
                    .send()
                    .await
                    .context("Failed to send request to completion API")?;

                if !response.status().is_success() {
                    let status = response.status().as_u16();
                    let body = response
                        .text()
                        .await
                        .unwrap_or_else(|e| format!("<failed to read body: {}>", e));
                    return Err(anyhow::Error::new(ApiStatusError { status, body }));
                }

                let chat_response: ChatResponse = response
                    .json()
                    .await
                    .context("Failed to parse completion response")?;

                chat_response
                    .choices
                    .into_iter()
                    .next()
                    .and_then(|choice| choice.message.content)
                    .context("Completion response contained no choices")
            },
            is_retryable_error,
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use wiremock::{
        matchers::{body_partial_json, header, method, path},
        Mock, MockServer, ResponseTemplate,
    };

    // ==================== Helper Functions ====================

    fn create_openai_response(content: &str) -> serde_json::Value {
        serde_json::json!({
            "id": "chatcmpl-123",
            "object": "chat.completion",
            "model": "gpt-4o-mini",
            "choices": [
                {
                    "index": 0,
                    "message": {"role": "assistant", "content": content},
                    "finish_reason": "stop"
                }
            ]
        })
    }

    fn client_for(server: &MockServer) -> OpenAiCompletion {
        OpenAiCompletion::new("test-openai-key", "gpt-4o-mini")
            .with_api_url(format!("{}/v1/chat/completions", server.uri()))
            .with_retry(RetryConfig::new(3, Duration::from_millis(1)))
    }

    fn text_request() -> CompletionRequest {
        CompletionRequest {
            system_prompt: "Translate.".to_string(),
            user_prompt: "Hello".to_string(),
            media: None,
        }
    }

    // ==================== Request Structure Tests ====================

    #[test]
    fn test_reasoning_model_detection() {
        assert!(is_reasoning_model("gpt-5-mini"));
        assert!(is_reasoning_model("o3-mini"));
        assert!(!is_reasoning_model("gpt-4o-mini"));
    }

    #[test]
    fn test_text_request_serialization() {
        let client = OpenAiCompletion::new("key", "gpt-4o-mini");
        let json = serde_json::to_value(client.build_request(&text_request())).unwrap();

        assert_eq!(json["messages"][0]["content"], "Translate.");
        assert_eq!(json["messages"][1]["content"], "Hello");
        assert!(json.get("reasoning_effort").is_none());
        assert!(json.get("temperature").is_some());
    }

    #[test]
    fn test_reasoning_request_omits_temperature() {
        let client = OpenAiCompletion::new("key", "o4-mini");
        let json = serde_json::to_value(client.build_request(&text_request())).unwrap();
        assert!(json.get("temperature").is_none());
        assert_eq!(json["reasoning_effort"], "low");
    }

    #[test]
    fn test_audio_request_uses_content_parts() {
        let client = OpenAiCompletion::new("key", "gpt-4o-audio-preview");
        let request = CompletionRequest {
            media: Some(MediaPayload {
                data: b"RIFF".to_vec(),
                format: "wav".to_string(),
            }),
            ..text_request()
        };
        let json = serde_json::to_value(client.build_request(&request)).unwrap();

        let parts = &json["messages"][1]["content"];
        assert_eq!(parts[0]["type"], "text");
        assert_eq!(parts[0]["text"], "Hello");
        assert_eq!(parts[1]["type"], "input_audio");
        assert_eq!(parts[1]["input_audio"]["data"], "UklGRg==");
        assert_eq!(parts[1]["input_audio"]["format"], "wav");
    }

    #[test]
    fn test_retryable_error_classification() {
        let rate_limited = anyhow::Error::new(ApiStatusError {
            status: 429,
            body: String::new(),
        });
        let bad_request = anyhow::Error::new(ApiStatusError {
            status: 400,
            body: String::new(),
        });
        let server_error = anyhow::Error::new(ApiStatusError {
            status: 503,
            body: String::new(),
        });
        assert!(is_retryable_error(&rate_limited));
        assert!(!is_retryable_error(&bad_request));
        assert!(is_retryable_error(&server_error));
        assert!(is_retryable_error(&anyhow::anyhow!("connection reset")));
    }

    // ==================== HTTP Tests ====================

    #[tokio::test]
    async fn test_complete_success() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .and(header("Authorization", "Bearer test-openai-key"))
            .respond_with(ResponseTemplate::new(200).set_body_json(create_openai_response("Hola")))
            .mount(&mock_server)
            .await;

        let reply = client_for(&mock_server)
            .complete(&text_request())
            .await
            .expect("Should succeed");
        assert_eq!(reply, "Hola");
    }

    #[tokio::test]
    async fn test_complete_sends_audio() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .and(body_partial_json(serde_json::json!({
                "messages": [
                    {"role": "system"},
                    {"role": "user", "content": [
                        {"type": "text"},
                        {"type": "input_audio", "input_audio": {"format": "mp3"}}
                    ]}
                ]
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(create_openai_response("ok")))
            .expect(1)
            .mount(&mock_server)
            .await;

        let request = CompletionRequest {
            media: Some(MediaPayload {
                data: vec![0xFF, 0xFB],
                format: "mp3".to_string(),
            }),
            ..text_request()
        };
        client_for(&mock_server)
            .complete(&request)
            .await
            .expect("Should succeed");
    }

    #[tokio::test]
    async fn test_client_error_not_retried() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .respond_with(ResponseTemplate::new(400).set_body_string("bad request"))
            .expect(1)
            .mount(&mock_server)
            .await;

        let err = client_for(&mock_server)
            .complete(&text_request())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("400"));
    }

    #[tokio::test]
    async fn test_server_error_retried_then_succeeds() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .respond_with(ResponseTemplate::new(500).set_body_string("Internal Server Error"))
            .up_to_n_times(1)
            .expect(1)
            .mount(&mock_server)
            .await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(create_openai_response("second")))
            .expect(1)
            .mount(&mock_server)
            .await;

        let reply = client_for(&mock_server)
            .complete(&text_request())
            .await
            .expect("Should succeed after retry");
        assert_eq!(reply, "second");
    }

    #[tokio::test]
    async fn test_empty_choices() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"choices": []})))
            .mount(&mock_server)
            .await;

        let err = client_for(&mock_server)
            .with_retry(RetryConfig::none())
            .complete(&text_request())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("no choices"));
    }
}
