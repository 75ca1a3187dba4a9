//! Anthropic (Claude) LLM provider.

use super::{CompletionRequest, LlmError, LlmProvider, DEFAULT_LLM_TIMEOUT};
use crate::media::REDACTED_BINARY;
use crate::request_log::RequestLogStore;
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::time::Duration;

const ANTHROPIC_API_BASE: &str = "https://api.anthropic.com/v1";
const DEFAULT_MODEL: &str = "claude-3-haiku-20240307";
const API_VERSION: &str = "2023-06-01";

/// Anthropic (Claude) LLM provider using the Messages API
pub struct AnthropicLlmProvider {
    client: Client,
    api_key: String,
    model: String,
    base_url: String,
    timeout: Option<Duration>,
    request_log_store: Option<RequestLogStore>,
}

impl AnthropicLlmProvider {
    /// Create a new Anthropic provider with the given API key
    pub fn new(api_key: String) -> Self {
        Self::with_model(api_key, DEFAULT_MODEL.to_string())
    }

    /// Create with a specific model
    pub fn with_model(api_key: String, model: String) -> Self {
        Self {
            client: Client::new(),
            api_key,
            model,
            base_url: ANTHROPIC_API_BASE.to_string(),
            timeout: Some(DEFAULT_LLM_TIMEOUT),
            request_log_store: None,
        }
    }

    pub fn with_base_url(mut self, base_url: String) -> Self {
        self.base_url = base_url.trim_end_matches('/').to_string();
        self
    }

    pub fn with_request_log_store(mut self, store: Option<RequestLogStore>) -> Self {
        self.request_log_store = store;
        self
    }

    /// Set the request timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Disable request timeouts entirely.
    pub fn without_timeout(mut self) -> Self {
        self.timeout = None;
        self
    }

    fn build_request(&self, request: &CompletionRequest<'_>) -> MessagesRequest {
        let mut messages: Vec<Message> = request
            .history
            .iter()
            .map(|turn| Message {
                role: turn.role.as_str().to_string(),
                content: vec![MessageContent::Text {
                    text: turn.content.clone(),
                }],
            })
            .collect();

        let mut user_content = Vec::with_capacity(2);
        if let Some(image) = request.image {
            // Claude reads image blocks placed before the question more reliably.
            user_content.push(MessageContent::Image {
                source: ImageSource {
                    source_type: "base64".to_string(),
                    media_type: image.mime_type.clone(),
                    data: image.base64(),
                },
            });
        }
        user_content.push(MessageContent::Text {
            text: request.user_message.to_string(),
        });
        messages.push(Message {
            role: "user".to_string(),
            content: user_content,
        });

        MessagesRequest {
            model: self.model.clone(),
            max_tokens: request.options.max_tokens,
            temperature: request.options.temperature,
            system: request.system_prompt.to_string(),
            messages,
        }
    }

    fn redacted_request_json(request: &MessagesRequest) -> serde_json::Value {
        let mut value = serde_json::to_value(request).unwrap_or_else(|_| {
            json!({
                "provider": "anthropic",
                "error": "failed to serialize request",
            })
        });
        if let Some(messages) = value.get_mut("messages").and_then(|m| m.as_array_mut()) {
            for message in messages {
                if let Some(blocks) = message.get_mut("content").and_then(|c| c.as_array_mut()) {
                    for block in blocks {
                        if let Some(data) = block.pointer_mut("/source/data") {
                            *data = json!(REDACTED_BINARY);
                        }
                    }
                }
            }
        }
        value
    }
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum MessageContent {
    Text { text: String },
    Image { source: ImageSource },
}

#[derive(Debug, Serialize)]
struct ImageSource {
    #[serde(rename = "type")]
    source_type: String,
    media_type: String,
    data: String,
}

#[derive(Debug, Serialize)]
struct Message {
    role: String,
    content: Vec<MessageContent>,
}

#[derive(Debug, Serialize)]
struct MessagesRequest {
    model: String,
    max_tokens: u32,
    temperature: f32,
    system: String,
    messages: Vec<Message>,
}

#[derive(Debug, Deserialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    content_type: String,
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    content: Vec<ContentBlock>,
}

#[derive(Debug, Deserialize)]
struct ErrorResponse {
    error: ErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ErrorDetail {
    message: String,
}

#[async_trait]
impl LlmProvider for AnthropicLlmProvider {
    async fn complete(&self, request: &CompletionRequest<'_>) -> Result<String, LlmError> {
        if self.api_key.is_empty() {
            return Err(LlmError::NoApiKey("anthropic".to_string()));
        }

        let messages_request = self.build_request(request);

        if let (Some(store), Some(id)) = (&self.request_log_store, request.request_id) {
            let request_json = Self::redacted_request_json(&messages_request);
            store.with_request(id, |log| {
                log.llm_request_json = Some(request_json);
            });
        }

        let mut req = self
            .client
            .post(format!("{}/messages", self.base_url))
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", API_VERSION)
            .header("content-type", "application/json")
            .json(&messages_request);
        if let Some(timeout) = self.timeout {
            req = req.timeout(timeout);
        }

        let response = req
            .send()
            .await
            .map_err(|e| LlmError::from_send_error(e, self.timeout))?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            let message = match serde_json::from_str::<ErrorResponse>(&error_text) {
                Ok(error_response) => error_response.error.message,
                Err(_) => error_text,
            };
            return Err(LlmError::from_status(
                status,
                format!("Anthropic API error ({}): {}", status, message),
            ));
        }

        let response_json: serde_json::Value = response.json().await.map_err(|e| {
            LlmError::InvalidResponse(format!("Failed to parse response: {}", e))
        })?;

        if let (Some(store), Some(id)) = (&self.request_log_store, request.request_id) {
            let response_for_log = response_json.clone();
            store.with_request(id, |log| {
                log.llm_response_json = Some(response_for_log);
            });
        }

        let messages_response: MessagesResponse = serde_json::from_value(response_json)
            .map_err(|e| LlmError::InvalidResponse(format!("Failed to parse response: {}", e)))?;

        // Extract text from the first text content block
        messages_response
            .content
            .into_iter()
            .find(|block| block.content_type == "text")
            .and_then(|block| block.text)
            .ok_or_else(|| LlmError::InvalidResponse("No text content in response".to_string()))
    }

    fn name(&self) -> &'static str {
        "anthropic"
    }

    fn model(&self) -> &str {
        &self.model
    }
}
