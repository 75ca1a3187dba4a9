//! Groq LLM provider.
//!
//! Groq exposes an OpenAI-compatible Chat Completions API. Vision-capable models
//! (Llama 4 Scout/Maverick) accept images as `image_url` content parts carrying a
//! base64 data URL.

use super::{ChatRole, CompletionRequest, LlmError, LlmProvider, DEFAULT_LLM_TIMEOUT};
use crate::media::REDACTED_BINARY;
use crate::request_log::RequestLogStore;
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::time::Duration;

const GROQ_API_BASE: &str = "https://api.groq.com/openai/v1";
const DEFAULT_MODEL: &str = "meta-llama/llama-4-scout-17b-16e-instruct";

/// Groq LLM provider using the OpenAI-compatible Chat Completions API.
pub struct GroqLlmProvider {
    client: Client,
    api_key: String,
    model: String,
    base_url: String,
    timeout: Option<Duration>,
    request_log_store: Option<RequestLogStore>,
}

impl GroqLlmProvider {
    /// Create a new Groq provider with the given API key.
    pub fn new(api_key: String) -> Self {
        Self::with_model(api_key, DEFAULT_MODEL.to_string())
    }

    /// Create with a specific model.
    pub fn with_model(api_key: String, model: String) -> Self {
        Self {
            client: Client::new(),
            api_key,
            model,
            base_url: GROQ_API_BASE.to_string(),
            timeout: Some(DEFAULT_LLM_TIMEOUT),
            request_log_store: None,
        }
    }

    /// Point the provider at another OpenAI-compatible endpoint root.
    pub fn with_base_url(mut self, base_url: String) -> Self {
        self.base_url = base_url.trim_end_matches('/').to_string();
        self
    }

    pub fn with_request_log_store(mut self, store: Option<RequestLogStore>) -> Self {
        self.request_log_store = store;
        self
    }

    /// Set the request timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Disable request timeouts entirely.
    pub fn without_timeout(mut self) -> Self {
        self.timeout = None;
        self
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.base_url)
    }

    fn build_request(&self, request: &CompletionRequest<'_>) -> ChatRequest {
        let mut messages = Vec::with_capacity(request.history.len() + 2);
        messages.push(ChatMessage {
            role: "system".to_string(),
            content: MessageContent::Text(request.system_prompt.to_string()),
        });
        for turn in request.history {
            messages.push(ChatMessage {
                role: turn.role.as_str().to_string(),
                content: MessageContent::Text(turn.content.clone()),
            });
        }

        let user_content = match request.image {
            Some(image) => MessageContent::Parts(vec![
                ContentPart::Text {
                    text: request.user_message.to_string(),
                },
                ContentPart::ImageUrl {
                    image_url: ImageUrl {
                        url: image.data_url(),
                    },
                },
            ]),
            None => MessageContent::Text(request.user_message.to_string()),
        };
        messages.push(ChatMessage {
            role: ChatRole::User.as_str().to_string(),
            content: user_content,
        });

        ChatRequest {
            model: self.model.clone(),
            messages,
            max_tokens: request.options.max_tokens,
            temperature: request.options.temperature,
        }
    }

    /// Serialize a request for the request log with image payloads replaced.
    fn redacted_request_json(request: &ChatRequest) -> serde_json::Value {
        let mut value = serde_json::to_value(request).unwrap_or_else(|_| {
            json!({
                "provider": "groq",
                "error": "failed to serialize request",
            })
        });
        if let Some(messages) = value.get_mut("messages").and_then(|m| m.as_array_mut()) {
            for message in messages {
                if let Some(parts) = message.get_mut("content").and_then(|c| c.as_array_mut()) {
                    for part in parts {
                        if let Some(url) = part.pointer_mut("/image_url/url") {
                            *url = json!(REDACTED_BINARY);
                        }
                    }
                }
            }
        }
        value
    }
}

#[derive(Debug, Serialize)]
struct ChatMessage {
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
    ImageUrl { image_url: ImageUrl },
}

#[derive(Debug, Serialize)]
struct ImageUrl {
    url: String,
}

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    max_tokens: u32,
    temperature: f32,
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
impl LlmProvider for GroqLlmProvider {
    async fn complete(&self, request: &CompletionRequest<'_>) -> Result<String, LlmError> {
        if self.api_key.is_empty() {
            return Err(LlmError::NoApiKey("groq".to_string()));
        }

        let chat_request = self.build_request(request);

        if let (Some(store), Some(id)) = (&self.request_log_store, request.request_id) {
            let request_json = Self::redacted_request_json(&chat_request);
            store.with_request(id, |log| {
                log.llm_request_json = Some(request_json);
            });
        }

        let mut req = self
            .client
            .post(self.endpoint())
            .bearer_auth(&self.api_key)
            .json(&chat_request);
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
                format!("Groq API error ({}): {}", status, message),
            ));
        }

        let response_json: serde_json::Value = response
            .json()
            .await
            .map_err(|e| LlmError::InvalidResponse(format!("Failed to parse response: {}", e)))?;

        if let (Some(store), Some(id)) = (&self.request_log_store, request.request_id) {
            let response_for_log = response_json.clone();
            store.with_request(id, |log| {
                log.llm_response_json = Some(response_for_log);
            });
        }

        response_json
            .get("choices")
            .and_then(|v| v.as_array())
            .and_then(|choices| choices.first())
            .and_then(|choice| choice.get("message"))
            .and_then(|msg| msg.get("content"))
            .and_then(|c| c.as_str())
            .map(|s| s.to_string())
            .ok_or_else(|| LlmError::InvalidResponse("No response choices returned".to_string()))
    }

    fn name(&self) -> &'static str {
        "groq"
    }

    fn model(&self) -> &str {
        &self.model
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{ChatTurn, CompletionOptions};
    use crate::media::ImageInput;

    #[test]
    fn test_provider_name() {
        let provider = GroqLlmProvider::new("test-key".to_string());
        assert_eq!(provider.name(), "groq");
    }

    #[test]
    fn test_default_model() {
        let provider = GroqLlmProvider::new("test-key".to_string());
        assert_eq!(provider.model(), DEFAULT_MODEL);
    }

    #[test]
    fn test_custom_model() {
        let provider = GroqLlmProvider::with_model("test-key".to_string(), "llama".to_string());
        assert_eq!(provider.model(), "llama");
    }

    #[test]
    fn test_without_timeout_disables_timeout() {
        let provider = GroqLlmProvider::new("test-key".to_string()).without_timeout();
        assert!(provider.timeout.is_none());
    }

    #[test]
    fn test_base_url_trailing_slash() {
        let provider =
            GroqLlmProvider::new("k".to_string()).with_base_url("http://localhost:9/v1/".to_string());
        assert_eq!(provider.endpoint(), "http://localhost:9/v1/chat/completions");
    }

    #[test]
    fn test_request_shape_with_history_and_options() {
        let provider = GroqLlmProvider::new("k".to_string());
        let history = vec![ChatTurn {
            role: ChatRole::Assistant,
            content: "Understood.".to_string(),
        }];
        let request = CompletionRequest::new("sys", "hi")
            .with_history(&history)
            .with_options(CompletionOptions {
                temperature: 0.6,
                max_tokens: 4096,
            });
        let value = serde_json::to_value(provider.build_request(&request)).unwrap();

        assert_eq!(value["max_tokens"], 4096);
        assert_eq!(value["messages"][0]["role"], "system");
        assert_eq!(value["messages"][1]["role"], "assistant");
        assert_eq!(value["messages"][2]["content"], "hi");
    }

    #[test]
    fn test_image_is_sent_as_content_part_and_redacted_in_log() {
        let provider = GroqLlmProvider::new("k".to_string());
        let image = ImageInput::new(b"img".to_vec(), "image/png");
        let request = CompletionRequest::new("sys", "read this").with_image(&image);
        let chat_request = provider.build_request(&request);

        let value = serde_json::to_value(&chat_request).unwrap();
        assert_eq!(value["messages"][1]["content"][1]["type"], "image_url");
        assert_eq!(
            value["messages"][1]["content"][1]["image_url"]["url"],
            "data:image/png;base64,aW1n"
        );

        let logged = GroqLlmProvider::redacted_request_json(&chat_request);
        assert_eq!(logged["messages"][1]["content"][1]["image_url"]["url"], REDACTED_BINARY);
    }
}
