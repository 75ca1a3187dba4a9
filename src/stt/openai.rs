//! OpenAI STT provider implementation.
//!
//! Uses the dedicated `/audio/transcriptions` endpoint, which serves
//! `whisper-1` and the `*-transcribe` models.

use super::{clamp_prompt, SttError, SttProvider, DEFAULT_STT_TIMEOUT};
use crate::media::AudioClip;
use async_trait::async_trait;
use reqwest::multipart;
use std::time::Duration;

const OPENAI_API_BASE: &str = "https://api.openai.com/v1";
const DEFAULT_MODEL: &str = "whisper-1";

/// OpenAI STT provider for speech-to-text
pub struct OpenAiSttProvider {
    client: reqwest::Client,
    api_key: String,
    model: String,
    base_url: String,
    default_prompt: Option<String>,
    timeout: Duration,
}

impl OpenAiSttProvider {
    const WHISPER_PROMPT_MAX_CHARS: usize = 224;

    /// Create a new OpenAI STT provider
    ///
    /// # Arguments
    /// * `api_key` - OpenAI API key
    /// * `model` - "whisper-1" (default), "gpt-4o-transcribe" or "gpt-4o-mini-transcribe"
    pub fn new(api_key: String, model: Option<String>, default_prompt: Option<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key,
            model: model.unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            base_url: OPENAI_API_BASE.to_string(),
            default_prompt: default_prompt
                .as_deref()
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(|s| s.to_string()),
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

    fn prompt_for_model(&self) -> Option<String> {
        let prompt = self.default_prompt.as_deref()?;

        // Diarize models do not support the `prompt` parameter.
        if self.model.contains("diarize") {
            return None;
        }

        // Whisper only considers the first 224 tokens; clamp by characters.
        if self.model == "whisper-1" {
            return clamp_prompt(prompt, Self::WHISPER_PROMPT_MAX_CHARS);
        }

        Some(prompt.to_string())
    }
}

#[async_trait]
impl SttProvider for OpenAiSttProvider {
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
            .text("model", self.model.clone());

        if let Some(prompt) = self.prompt_for_model() {
            form = form.text("prompt", prompt);
        }

        let response = self
            .client
            .post(format!("{}/audio/transcriptions", self.base_url))
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
                format!("OpenAI Whisper API error ({}): {}", status, error_text),
            ));
        }

        let result: serde_json::Value = response.json().await?;
        let text = result["text"].as_str().unwrap_or("").trim().to_string();

        Ok(text)
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

    #[test]
    fn test_default_model_is_whisper() {
        let provider = OpenAiSttProvider::new("k".to_string(), None, None);
        assert_eq!(provider.model(), "whisper-1");
        assert_eq!(provider.name(), "openai");
    }

    #[test]
    fn test_blank_prompt_is_dropped() {
        let provider = OpenAiSttProvider::new("k".to_string(), None, Some("   ".to_string()));
        assert!(provider.prompt_for_model().is_none());
    }

    #[test]
    fn test_whisper_prompt_is_clamped() {
        let long = "x".repeat(300);
        let provider = OpenAiSttProvider::new("k".to_string(), None, Some(long));
        assert_eq!(
            provider.prompt_for_model().map(|p| p.len()),
            Some(OpenAiSttProvider::WHISPER_PROMPT_MAX_CHARS)
        );
    }

    #[test]
    fn test_diarize_model_ignores_prompt() {
        let provider = OpenAiSttProvider::new(
            "k".to_string(),
            Some("gpt-4o-transcribe-diarize".to_string()),
            Some("mg, bid".to_string()),
        );
        assert!(provider.prompt_for_model().is_none());
    }
}
