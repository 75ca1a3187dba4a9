//! Mistral OCR provider.

use super::{OcrError, OcrProvider, DEFAULT_OCR_TIMEOUT};
use crate::media::ImageInput;
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

const MISTRAL_API_BASE: &str = "https://api.mistral.ai/v1";
const DEFAULT_MODEL: &str = "mistral-ocr-latest";

pub struct MistralOcrProvider {
    client: Client,
    api_key: String,
    model: String,
    base_url: String,
    timeout: Duration,
}

impl MistralOcrProvider {
    pub fn new(api_key: String, model: Option<String>) -> Self {
        Self {
            client: Client::new(),
            api_key,
            model: model.unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            base_url: MISTRAL_API_BASE.to_string(),
            timeout: DEFAULT_OCR_TIMEOUT,
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

    pub fn model(&self) -> &str {
        &self.model
    }

    fn build_request(&self, image: &ImageInput) -> OcrRequest {
        OcrRequest {
            model: self.model.clone(),
            document: OcrDocument::ImageUrl {
                image_url: image.data_url(),
            },
        }
    }
}

#[derive(Debug, Serialize)]
struct OcrRequest {
    model: String,
    document: OcrDocument,
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum OcrDocument {
    ImageUrl { image_url: String },
}

#[derive(Debug, Deserialize)]
struct OcrResponse {
    pages: Vec<OcrPage>,
}

#[derive(Debug, Deserialize)]
struct OcrPage {
    #[serde(default)]
    markdown: String,
}

/// Join page markdown with blank lines, skipping empty pages.
fn join_pages(pages: &[OcrPage]) -> String {
    pages
        .iter()
        .map(|page| page.markdown.trim())
        .filter(|markdown| !markdown.is_empty())
        .collect::<Vec<_>>()
        .join("\n\n")
}

#[async_trait]
impl OcrProvider for MistralOcrProvider {
    async fn extract_markdown(&self, image: &ImageInput) -> Result<String, OcrError> {
        if self.api_key.is_empty() {
            return Err(OcrError::NoApiKey("mistral".to_string()));
        }

        let response = self
            .client
            .post(format!("{}/ocr", self.base_url))
            .bearer_auth(&self.api_key)
            .timeout(self.timeout)
            .json(&self.build_request(image))
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    OcrError::Timeout(self.timeout)
                } else {
                    OcrError::Network(e)
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            let message = format!("Mistral OCR error ({}): {}", status, error_text);
            return Err(
                if status == reqwest::StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
                    OcrError::Unavailable(status.as_u16(), message)
                } else {
                    OcrError::Api(message)
                },
            );
        }

        let ocr_response: OcrResponse = response
            .json()
            .await
            .map_err(|e| OcrError::InvalidResponse(format!("Failed to parse response: {}", e)))?;

        log::debug!("Mistral OCR returned {} page(s)", ocr_response.pages.len());

        Ok(join_pages(&ocr_response.pages))
    }

    fn name(&self) -> &'static str {
        "mistral"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_body_shape() {
        let provider = MistralOcrProvider::new("k".to_string(), None);
        let image = ImageInput::new(b"abc".to_vec(), "image/png");
        let value = serde_json::to_value(provider.build_request(&image)).unwrap();

        assert_eq!(value["model"], "mistral-ocr-latest");
        assert_eq!(value["document"]["type"], "image_url");
        assert_eq!(value["document"]["image_url"], "data:image/png;base64,YWJj");
    }

    #[test]
    fn test_pages_joined_with_blank_line() {
        let pages = vec![
            OcrPage {
                markdown: "# Rx\n".to_string(),
            },
            OcrPage {
                markdown: "   ".to_string(),
            },
            OcrPage {
                markdown: "Metformin 500 mg".to_string(),
            },
        ];
        assert_eq!(join_pages(&pages), "# Rx\n\nMetformin 500 mg");
    }
}
