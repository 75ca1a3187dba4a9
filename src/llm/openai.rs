//! OpenAI LLM provider using the Responses API.

use super::{CompletionRequest, LlmError, LlmProvider, DEFAULT_LLM_TIMEOUT};
use crate::media::REDACTED_BINARY;
use crate::request_log::RequestLogStore;
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::time::Duration;

const OPENAI_API_BASE: &str = "https://api.openai.com/v1";
const DEFAULT_MODEL: &str = "gpt-4o-mini";

/// OpenAI LLM provider using the Responses API
pub struct OpenAiLlmProvider {
    client: Client,
    api_key: String,
    model: String,
    base_url: String,
    timeout: Option<Duration>,
    request_log_store: Option<RequestLogStore>,
}

impl OpenAiLlmProvider {
    /// Create a new OpenAI provider with the given API key
    pub fn new(api_key: String) -> Self {
        Self::with_model(api_key, DEFAULT_MODEL.to_string())
    }

    /// Create with a specific model
    pub fn with_model(api_key: String, model: String) -> Self {
        Self {
            client: Client::new(),
            api_key,
            model,
            base_url: OPENAI_API_BASE.to_string(),
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

    fn supports_temperature_param(model: &str) -> bool {
        // gpt-5 and o-series reasoning models reject `temperature`.
        !(model.starts_with("gpt-5") || model.starts_with('o'))
    }

    fn build_request(&self, request: &CompletionRequest<'_>) -> ResponsesRequest {
        let mut input = Vec::with_capacity(request.history.len() + 2);
        input.push(ResponseInputMessage {
            role: "system".to_string(),
            content: InputContent::Text(request.system_prompt.to_string()),
        });
        for turn in request.history {
            input.push(ResponseInputMessage {
                role: turn.role.as_str().to_string(),
                content: InputContent::Text(turn.content.clone()),
            });
        }

        let user_content = match request.image {
            Some(image) => InputContent::Parts(vec![
                InputPart::InputText {
                    text: request.user_message.to_string(),
                },
                InputPart::InputImage {
                    image_url: image.data_url(),
                },
            ]),
            None => InputContent::Text(request.user_message.to_string()),
        };
        input.push(ResponseInputMessage {
            role: "user".to_string(),
            content: user_content,
        });

        ResponsesRequest {
            model: self.model.clone(),
            input,
            max_output_tokens: request.options.max_tokens,
            temperature: Self::supports_temperature_param(&self.model)
                .then_some(request.options.temperature),
        }
    }

    fn redacted_request_json(request: &ResponsesRequest) -> serde_json::Value {
        let mut value = serde_json::to_value(request).unwrap_or_else(|_| {
            json!({
                "provider": "openai",
                "error": "failed to serialize request",
            })
        });
        if let Some(input) = value.get_mut("input").and_then(|m| m.as_array_mut()) {
            for message in input {
                if let Some(parts) = message.get_mut("content").and_then(|c| c.as_array_mut()) {
                    for part in parts {
                        if let Some(url) = part.get_mut("image_url") {
                            *url = json!(REDACTED_BINARY);
                        }
                    }
                }
            }
        }
        value
    }

    fn extract_responses_output_text(value: &serde_json::Value) -> Result<String, LlmError> {
        // Prefer the SDK-style convenience field when present.
        if let Some(s) = value.get("output_text").and_then(|v| v.as_str()) {
            return Ok(s.to_string());
        }

        let output = value
            .get("output")
            .and_then(|v| v.as_array())
            .ok_or_else(|| {
                LlmError::InvalidResponse("Responses API returned no 'output' array".to_string())
            })?;

        for item in output {
            if item.get("type").and_then(|t| t.as_str()) != Some("message") {
                continue;
            }

            let content = match item.get("content").and_then(|c| c.as_array()) {
                Some(c) => c,
                None => continue,
            };

            for part in content {
                match part.get("type").and_then(|t| t.as_str()) {
                    Some("refusal") => {
                        let refusal = part
                            .get("refusal")
                            .and_then(|r| r.as_str())
                            .unwrap_or("");
                        return Err(LlmError::Api(format!("OpenAI refusal: {}", refusal)));
                    }
                    Some("output_text") => {
                        if let Some(text) = part.get("text").and_then(|t| t.as_str()) {
                            return Ok(text.to_string());
                        }
                    }
                    _ => {}
                }
            }
        }

        Err(LlmError::InvalidResponse(
            "Responses API returned no output_text content".to_string(),
        ))
    }
}

#[derive(Debug, Serialize)]
struct ResponsesRequest {
    model: String,
    input: Vec<ResponseInputMessage>,
    max_output_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
}

#[derive(Debug, Serialize)]
struct ResponseInputMessage {
    role: String,
    content: InputContent,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
enum InputContent {
    Text(String),
    Parts(Vec<InputPart>),
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum InputPart {
    InputText { text: String },
    InputImage { image_url: String },
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
impl LlmProvider for OpenAiLlmProvider {
    async fn complete(&self, request: &CompletionRequest<'_>) -> Result<String, LlmError> {
        if self.api_key.is_empty() {
            return Err(LlmError::NoApiKey("openai".to_string()));
        }

        let responses_request = self.build_request(request);

        if let (Some(store), Some(id)) = (&self.request_log_store, request.request_id) {
            let request_json = Self::redacted_request_json(&responses_request);
            store.with_request(id, |log| {
                log.llm_request_json = Some(request_json);
            });
        }

        let mut req = self
            .client
            .post(format!("{}/responses", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&responses_request);
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
                format!("OpenAI API error ({}): {}", status, message),
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

        Self::extract_responses_output_text(&response_json)
    }

    fn name(&self) -> &'static str {
        "openai"
    }

    fn model(&self) -> &str {
        &self.model
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::ImageInput;

    #[test]
    fn test_provider_name() {
        let provider = OpenAiLlmProvider::new("test-key".to_string());
        assert_eq!(provider.name(), "openai");
    }

    #[test]
    fn test_default_model() {
        let provider = OpenAiLlmProvider::new("test-key".to_string());
        assert_eq!(provider.model(), DEFAULT_MODEL);
    }

    #[test]
    fn test_without_timeout_disables_timeout() {
        let provider = OpenAiLlmProvider::new("test-key".to_string()).without_timeout();
        assert!(provider.timeout.is_none());
    }

    #[test]
    fn test_temperature_omitted_for_reasoning_models() {
        let request = CompletionRequest::new("sys", "hi");
        let reasoning = OpenAiLlmProvider::with_model("k".to_string(), "o3-mini".to_string());
        assert!(reasoning.build_request(&request).temperature.is_none());

        let chat = OpenAiLlmProvider::new("k".to_string());
        assert_eq!(chat.build_request(&request).temperature, Some(0.3));
    }

    #[test]
    fn test_image_part_shape_and_redaction() {
        let provider = OpenAiLlmProvider::new("k".to_string());
        let image = ImageInput::new(b"img".to_vec(), "image/jpeg");
        let request = provider.build_request(&CompletionRequest::new("sys", "read").with_image(&image));

        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(value["input"][1]["content"][0]["type"], "input_text");
        assert_eq!(value["input"][1]["content"][1]["type"], "input_image");

        let logged = OpenAiLlmProvider::redacted_request_json(&request);
        assert_eq!(logged["input"][1]["content"][1]["image_url"], REDACTED_BINARY);
    }

    #[test]
    fn test_extract_output_text_from_message_items() {
        let value = json!({
            "output": [
                {"type": "reasoning", "content": []},
                {"type": "message", "content": [{"type": "output_text", "text": "Rx"}]}
            ]
        });
        assert_eq!(OpenAiLlmProvider::extract_responses_output_text(&value).unwrap(), "Rx");
    }

    #[test]
    fn test_refusal_is_an_api_error() {
        let value = json!({
            "output": [{"type": "message", "content": [{"type": "refusal", "refusal": "no"}]}]
        });
        assert!(matches!(
            OpenAiLlmProvider::extract_responses_output_text(&value),
            Err(LlmError::Api(_))
        ));
    }
}
