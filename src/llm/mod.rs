//! LLM providers for prescription generation.
//!
//! This module provides the completion clients the pipeline invokes once per
//! request. It supports multiple providers (Groq, OpenAI, Anthropic) behind one
//! trait, including image input for vision-capable models, and hosts the prompt
//! templates for every pipeline mode.

mod anthropic;
mod defaults;
mod groq;
mod openai;
pub mod prompts;

pub use anthropic::AnthropicLlmProvider;
pub use defaults::{default_llm_model_for_provider, default_vision_model_for_provider};
pub use groq::GroqLlmProvider;
pub use openai::OpenAiLlmProvider;
pub use prompts::{render_prompt, OutputFormat, PromptContext, PromptError, PromptMode, RenderedPrompt};

use crate::media::ImageInput;
use crate::retry::Transient;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

/// Default timeout for LLM API requests
pub const DEFAULT_LLM_TIMEOUT: Duration = Duration::from_secs(30);

/// Errors that can occur during LLM operations
#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("API error: {0}")]
    Api(String),

    /// Rate limiting or a server-side failure (HTTP 429 / 5xx).
    #[error("Service unavailable ({0}): {1}")]
    Unavailable(u16, String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Request timed out after {0:?}")]
    Timeout(Duration),

    #[error("No API key configured for provider: {0}")]
    NoApiKey(String),

    #[error("Provider not available: {0}")]
    ProviderNotAvailable(String),
}

impl LlmError {
    /// Map a non-success HTTP status and message to an error.
    pub(crate) fn from_status(status: reqwest::StatusCode, message: String) -> Self {
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
            LlmError::Unavailable(status.as_u16(), message)
        } else {
            LlmError::Api(message)
        }
    }

    pub(crate) fn from_send_error(e: reqwest::Error, timeout: Option<Duration>) -> Self {
        match timeout {
            Some(timeout) if e.is_timeout() => LlmError::Timeout(timeout),
            _ => LlmError::Network(e),
        }
    }
}

impl Transient for LlmError {
    fn is_transient(&self) -> bool {
        match self {
            LlmError::Network(e) => e.is_timeout() || e.is_connect() || e.is_request(),
            LlmError::Unavailable(..) | LlmError::Timeout(_) => true,
            _ => false,
        }
    }
}

/// Sampling parameters for one completion.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CompletionOptions {
    pub temperature: f32,
    pub max_tokens: u32,
}

impl Default for CompletionOptions {
    fn default() -> Self {
        Self {
            temperature: 0.3,
            max_tokens: 512,
        }
    }
}

/// Speaker of a prior conversation turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChatRole {
    User,
    Assistant,
}

impl ChatRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChatRole::User => "user",
            ChatRole::Assistant => "assistant",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatTurn {
    pub role: ChatRole,
    pub content: String,
}

/// One request to a completion service.
#[derive(Debug, Clone)]
pub struct CompletionRequest<'a> {
    pub system_prompt: &'a str,
    /// Prior turns, oldest first. Empty for one-shot requests.
    pub history: &'a [ChatTurn],
    pub user_message: &'a str,
    /// Attached image for vision calls.
    pub image: Option<&'a ImageInput>,
    pub options: CompletionOptions,
    /// Request log record to attach the wire payloads to.
    pub request_id: Option<&'a str>,
}

impl<'a> CompletionRequest<'a> {
    pub fn new(system_prompt: &'a str, user_message: &'a str) -> Self {
        Self {
            system_prompt,
            history: &[],
            user_message,
            image: None,
            options: CompletionOptions::default(),
            request_id: None,
        }
    }

    pub fn with_history(mut self, history: &'a [ChatTurn]) -> Self {
        self.history = history;
        self
    }

    pub fn with_image(mut self, image: &'a ImageInput) -> Self {
        self.image = Some(image);
        self
    }

    pub fn with_options(mut self, options: CompletionOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_request_id(mut self, request_id: Option<&'a str>) -> Self {
        self.request_id = request_id;
        self
    }
}

/// Trait for LLM providers that complete prompts
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Complete a request and return the raw response text
    async fn complete(&self, request: &CompletionRequest<'_>) -> Result<String, LlmError>;

    /// Get the provider name
    fn name(&self) -> &'static str;

    /// Get the current model being used
    fn model(&self) -> &str;
}

/// Configuration for constructing an LLM provider
#[derive(Debug, Clone)]
pub struct LlmConfig {
    /// The provider to use (groq, openai, anthropic)
    pub provider: String,
    /// API key for the provider
    pub api_key: String,
    /// Model to use; provider default when unset
    pub model: Option<String>,
    /// Override of the provider's API base URL
    pub base_url: Option<String>,
    /// Request timeout
    pub timeout: Duration,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: "groq".to_string(),
            api_key: String::new(),
            model: None,
            base_url: None,
            timeout: DEFAULT_LLM_TIMEOUT,
        }
    }
}

/// Create an LLM provider based on configuration
pub fn create_llm_provider(
    config: &LlmConfig,
    request_log_store: Option<crate::request_log::RequestLogStore>,
) -> Result<Arc<dyn LlmProvider>, LlmError> {
    let model = config
        .model
        .clone()
        .or_else(|| default_llm_model_for_provider(&config.provider).map(str::to_string));

    let provider: Arc<dyn LlmProvider> = match config.provider.as_str() {
        "groq" => {
            let mut provider = match model {
                Some(model) => GroqLlmProvider::with_model(config.api_key.clone(), model),
                None => GroqLlmProvider::new(config.api_key.clone()),
            };
            if let Some(url) = &config.base_url {
                provider = provider.with_base_url(url.clone());
            }
            Arc::new(
                provider
                    .with_timeout(config.timeout)
                    .with_request_log_store(request_log_store),
            )
        }
        "openai" => {
            let mut provider = match model {
                Some(model) => OpenAiLlmProvider::with_model(config.api_key.clone(), model),
                None => OpenAiLlmProvider::new(config.api_key.clone()),
            };
            if let Some(url) = &config.base_url {
                provider = provider.with_base_url(url.clone());
            }
            Arc::new(
                provider
                    .with_timeout(config.timeout)
                    .with_request_log_store(request_log_store),
            )
        }
        "anthropic" => {
            let mut provider = match model {
                Some(model) => AnthropicLlmProvider::with_model(config.api_key.clone(), model),
                None => AnthropicLlmProvider::new(config.api_key.clone()),
            };
            if let Some(url) = &config.base_url {
                provider = provider.with_base_url(url.clone());
            }
            Arc::new(
                provider
                    .with_timeout(config.timeout)
                    .with_request_log_store(request_log_store),
            )
        }
        other => return Err(LlmError::ProviderNotAvailable(other.to_string())),
    };

    Ok(provider)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_llm_config_default() {
        let config = LlmConfig::default();
        assert_eq!(config.provider, "groq");
        assert_eq!(config.timeout, DEFAULT_LLM_TIMEOUT);
    }

    #[test]
    fn test_create_provider_uses_default_model() {
        let config = LlmConfig {
            api_key: "k".to_string(),
            ..LlmConfig::default()
        };
        let provider = create_llm_provider(&config, None).unwrap();
        assert_eq!(provider.name(), "groq");
        assert_eq!(provider.model(), "meta-llama/llama-4-scout-17b-16e-instruct");
    }

    #[test]
    fn test_create_unknown_provider_fails() {
        let config = LlmConfig {
            provider: "gemini".to_string(),
            ..LlmConfig::default()
        };
        assert!(matches!(
            create_llm_provider(&config, None),
            Err(LlmError::ProviderNotAvailable(_))
        ));
    }

    #[test]
    fn test_status_mapping() {
        assert!(matches!(
            LlmError::from_status(reqwest::StatusCode::TOO_MANY_REQUESTS, "slow down".into()),
            LlmError::Unavailable(429, _)
        ));
        assert!(matches!(
            LlmError::from_status(reqwest::StatusCode::UNAUTHORIZED, "bad key".into()),
            LlmError::Api(_)
        ));
        assert!(LlmError::Unavailable(503, String::new()).is_transient());
        assert!(!LlmError::Api(String::new()).is_transient());
        assert!(!LlmError::NoApiKey("groq".into()).is_transient());
    }
}
