//! Speech-to-Text (STT) provider abstraction and implementations.
//!
//! Consultation recordings are turned into transcripts here before they enter
//! the prescription pipeline.

mod groq;
mod openai;

pub use groq::GroqSttProvider;
pub use openai::OpenAiSttProvider;

use crate::media::AudioClip;
use crate::retry::Transient;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

/// Default timeout for transcription requests. Audio uploads run longer than
/// text completions.
pub const DEFAULT_STT_TIMEOUT: Duration = Duration::from_secs(60);

/// Errors that can occur during STT operations
#[derive(Debug, thiserror::Error)]
pub enum SttError {
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("API error: {0}")]
    Api(String),

    #[error("Service unavailable ({0}): {1}")]
    Unavailable(u16, String),

    #[error("Audio processing error: {0}")]
    Audio(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Timeout: transcription took too long")]
    Timeout,
}

impl SttError {
    pub(crate) fn from_status(status: reqwest::StatusCode, message: String) -> Self {
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
            SttError::Unavailable(status.as_u16(), message)
        } else {
            SttError::Api(message)
        }
    }

    pub(crate) fn from_send_error(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            SttError::Timeout
        } else {
            SttError::Network(e)
        }
    }
}

impl Transient for SttError {
    fn is_transient(&self) -> bool {
        match self {
            SttError::Network(e) => e.is_timeout() || e.is_connect() || e.is_request(),
            SttError::Unavailable(..) | SttError::Timeout => true,
            _ => false,
        }
    }
}

/// Trait for Speech-to-Text providers
#[async_trait]
pub trait SttProvider: Send + Sync {
    /// Transcribe an audio recording to text.
    ///
    /// `clip` carries the file name and MIME type sent with the upload.
    async fn transcribe(&self, audio: &[u8], clip: &AudioClip) -> Result<String, SttError>;

    /// Get the name of this provider
    fn name(&self) -> &'static str;

    fn model(&self) -> &str;
}

/// Configuration for constructing an STT provider
#[derive(Debug, Clone)]
pub struct SttConfig {
    /// groq or openai
    pub provider: String,
    pub api_key: String,
    pub model: Option<String>,
    pub base_url: Option<String>,
    /// Vocabulary hint forwarded as the transcription `prompt` field.
    pub prompt: Option<String>,
    pub timeout: Duration,
}

impl Default for SttConfig {
    fn default() -> Self {
        Self {
            provider: "groq".to_string(),
            api_key: String::new(),
            model: None,
            base_url: None,
            prompt: None,
            timeout: DEFAULT_STT_TIMEOUT,
        }
    }
}

/// Create an STT provider based on configuration
pub fn create_stt_provider(config: &SttConfig) -> Result<Arc<dyn SttProvider>, SttError> {
    if config.api_key.is_empty() {
        return Err(SttError::Config(format!(
            "No API key configured for STT provider: {}",
            config.provider
        )));
    }

    let provider: Arc<dyn SttProvider> = match config.provider.as_str() {
        "groq" => {
            let mut provider = GroqSttProvider::new(
                config.api_key.clone(),
                config.model.clone(),
                config.prompt.clone(),
            )
            .with_timeout(config.timeout);
            if let Some(url) = &config.base_url {
                provider = provider.with_base_url(url.clone());
            }
            Arc::new(provider)
        }
        "openai" => {
            let mut provider = OpenAiSttProvider::new(
                config.api_key.clone(),
                config.model.clone(),
                config.prompt.clone(),
            )
            .with_timeout(config.timeout);
            if let Some(url) = &config.base_url {
                provider = provider.with_base_url(url.clone());
            }
            Arc::new(provider)
        }
        other => {
            return Err(SttError::Config(format!(
                "Unknown STT provider: {}",
                other
            )))
        }
    };

    Ok(provider)
}

/// Trim a transcription prompt and cap it at `max_chars` characters.
pub(crate) fn clamp_prompt(prompt: &str, max_chars: usize) -> Option<String> {
    let trimmed = prompt.trim();
    if trimmed.is_empty() {
        return None;
    }

    Some(trimmed.chars().take(max_chars).collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_groq_provider() {
        let config = SttConfig {
            api_key: "k".to_string(),
            ..SttConfig::default()
        };
        let provider = create_stt_provider(&config).unwrap();
        assert_eq!(provider.name(), "groq");
        assert_eq!(provider.model(), "whisper-large-v3");
    }

    #[test]
    fn test_missing_key_is_config_error() {
        assert!(matches!(
            create_stt_provider(&SttConfig::default()),
            Err(SttError::Config(_))
        ));
    }

    #[test]
    fn test_unknown_provider() {
        let config = SttConfig {
            provider: "deepgram".to_string(),
            api_key: "k".to_string(),
            ..SttConfig::default()
        };
        assert!(matches!(create_stt_provider(&config), Err(SttError::Config(_))));
    }

    #[test]
    fn test_prompt_clamping() {
        assert_eq!(clamp_prompt("   ", 10), None);
        assert_eq!(clamp_prompt(" amoxicillin ", 5).as_deref(), Some("amoxi"));
    }

    #[test]
    fn test_transient_classification() {
        assert!(SttError::Timeout.is_transient());
        assert!(SttError::from_status(reqwest::StatusCode::BAD_GATEWAY, String::new()).is_transient());
        assert!(!SttError::Audio("bad".into()).is_transient());
    }
}
