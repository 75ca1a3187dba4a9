//! Groq Whisper API STT provider implementation.

use super::{clamp_prompt, SttError, SttProvider, DEFAULT_STT_TIMEOUT};
use crate::media::AudioClip;
use async_trait::async_trait;
use reqwest::multipart;
use std::time::Duration;

const GROQ_API_BASE: &str = "https://api.groq.com/openai/v1";
const DEFAULT_MODEL: &str = "whisper-large-v3";

/// Groq Whisper API provider for speech-to-text
pub struct GroqSttProvider {
    client: reqwest::Client,
    api_key: String,
    model: String,
    base_url: String,
    default_prompt: Option<String>,
    timeout: Duration,
}

impl GroqSttProvider {
    const PROMPT_MAX_CHARS: usize = 224;

    /// Create a new Groq STT provider
    ///
    /// # Arguments
    /// * `api_key` - Groq API key
    /// * `model` - Model to use (defaults to "whisper-large-v3")
    /// * `default_prompt` - Optional transcription prompt (OpenAI-compatible `prompt` field)
    pub fn new(api_key: String, model: Option<String>, default_prompt: Option<String>) -> Self {
        Self::with_client(reqwest::Client::new(), api_key, model, default_prompt)
    }

    /// Create a new provider with a custom HTTP client
    pub fn with_client(
        client: reqwest::Client,
        api_key: String,
        model: Option<String>,
        default_prompt: Option<String>,
    ) -> Self {
        Self {
            client,
            api_key,
            model: model.unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            base_url: GROQ_API_BASE.to_string(),
            default_prompt,
            timeout: DEFAULT_STT_TIMEOUT,
        }
    }

    pub fn with_base_url(mut self, base_url: String) -> Self {
        self.base_url = base_url.trim_end_matches('/').to_string();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn endpoint(&self) -> String {
        format!("{}/audio/transcriptions", self.base_url)
    }
}

#[async_trait]
impl SttProvider for GroqSttProvider {
    async fn transcribe(&self, audio: &[u8], clip: &AudioClip) -> Result<String, SttError> {
        if audio.is_empty() {
            return Err(SttError::Audio("Audio recording is empty".to_string()));
        }

        let part = multipart::Part::bytes(audio.to_vec())
            .file_name(clip.file_name.clone())
            .mime_str(&clip.mime_type)
            .map_err(|e| SttError::Audio(format!("Failed to create multipart: {}", e)))?;

        let mut form = multipart::Form::new()
            .part("file", part)
            .text("model", self.model.clone())
            .text("response_format", "json");

        if let Some(prompt) = self
            .default_prompt
            .as_deref()
            .and_then(|p| clamp_prompt(p, Self::PROMPT_MAX_CHARS))
        {
            form = form.text("prompt", prompt);
        }

        log::debug!(
            "Groq STT: uploading {} bytes ({}) to {}",
            audio.len(),
            clip.mime_type,
            self.model
        );

        let response = self
            .client
            .post(self.endpoint())
            .bearer_auth(&self.api_key)
            .timeout(self.timeout)
            .multipart(form)
            .send()
            .await
            .map_err(SttError::from_send_error)?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(SttError::from_status(
                status,
                format!("Groq API error ({}): {}", status, error_text),
            ));
        }

        let result: serde_json::Value = response.json().await?;
        let text = result["text"].as_str().unwrap_or("").trim().to_string();

        Ok(text)
    }

    fn name(&self) -> &'static str {
        "groq"
    }

    fn model(&self) -> &str {
        &self.model
    }
}
