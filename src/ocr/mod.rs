//! OCR providers that turn prescription images into markdown text.

mod mistral;

pub use mistral::MistralOcrProvider;

use crate::media::ImageInput;
use crate::retry::Transient;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

pub const DEFAULT_OCR_TIMEOUT: Duration = Duration::from_secs(60);

/// Errors that can occur during OCR
#[derive(Debug, thiserror::Error)]
pub enum OcrError {
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("API error: {0}")]
    Api(String),

    #[error("Service unavailable ({0}): {1}")]
    Unavailable(u16, String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Request timed out after {0:?}")]
    Timeout(Duration),

    #[error("No API key configured for provider: {0}")]
    NoApiKey(String),
}

impl Transient for OcrError {
    fn is_transient(&self) -> bool {
        match self {
            OcrError::Network(e) => e.is_timeout() || e.is_connect() || e.is_request(),
            OcrError::Unavailable(..) | OcrError::Timeout(_) => true,
            _ => false,
        }
    }
}

/// Trait for OCR providers
#[async_trait]
pub trait OcrProvider: Send + Sync {
    /// Extract the text of an image as markdown.
    async fn extract_markdown(&self, image: &ImageInput) -> Result<String, OcrError>;

    fn name(&self) -> &'static str;
}

#[derive(Debug, Clone)]
pub struct OcrConfig {
    pub api_key: String,
    pub model: Option<String>,
    pub base_url: Option<String>,
    pub timeout: Duration,
}

impl Default for OcrConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            model: None,
            base_url: None,
            timeout: DEFAULT_OCR_TIMEOUT,
        }
    }
}

/// Create the OCR provider. Mistral OCR is the only backend.
pub fn create_ocr_provider(config: &OcrConfig) -> Result<Arc<dyn OcrProvider>, OcrError> {
    if config.api_key.is_empty() {
        return Err(OcrError::NoApiKey("mistral".to_string()));
    }

    let mut provider = MistralOcrProvider::new(config.api_key.clone(), config.model.clone())
        .with_timeout(config.timeout);
    if let Some(url) = &config.base_url {
        provider = provider.with_base_url(url.clone());
    }
    Ok(Arc::new(provider))
}
