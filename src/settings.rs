//! Configuration: an optional JSON settings file, overridden by environment
//! variables. API keys are only ever read from the environment.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use crate::llm::{
    create_llm_provider, default_llm_model_for_provider, default_vision_model_for_provider,
    CompletionOptions, LlmConfig, LlmProvider,
};
use crate::ocr::{create_ocr_provider, OcrConfig};
use crate::pipeline::{PipelineConfig, PrescriptionPipeline, TranscriptMode};
use crate::request_log::{RequestLogStore, RequestLogsRetentionConfig, RequestLogsRetentionMode};
use crate::retry::RetryConfig;
use crate::stt::{create_stt_provider, SttConfig};

// ============================================================================
// DEFAULTS
// ============================================================================

pub const DEFAULT_LLM_PROVIDER: &str = "groq";
pub const DEFAULT_STT_PROVIDER: &str = "groq";
pub const DEFAULT_STT_MODEL: &str = "whisper-large-v3";
pub const DEFAULT_OCR_MODEL: &str = "mistral-ocr-latest";

/// Prescription generation sampling.
pub const DEFAULT_TEMPERATURE: f32 = 0.3;
pub const DEFAULT_MAX_TOKENS: u32 = 512;

/// Chat assistant sampling.
pub const DEFAULT_CHAT_TEMPERATURE: f32 = 0.6;
pub const DEFAULT_CHAT_MAX_TOKENS: u32 = 4096;

pub const DEFAULT_LLM_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_MEDIA_TIMEOUT_SECS: u64 = 60;
pub const DEFAULT_REQUEST_LOG_AMOUNT: usize = 10;

const MAX_REQUEST_LOG_AMOUNT: usize = 1000;

const LLM_PROVIDERS: [&str; 3] = ["groq", "openai", "anthropic"];
const STT_PROVIDERS: [&str; 2] = ["groq", "openai"];

// ============================================================================
// ENVIRONMENT
// ============================================================================

pub const ENV_CONFIG_PATH: &str = "MEDSCRIBE_CONFIG";
pub const ENV_LLM_PROVIDER: &str = "MEDSCRIBE_LLM_PROVIDER";
pub const ENV_LLM_MODEL: &str = "MEDSCRIBE_LLM_MODEL";
pub const ENV_STT_PROVIDER: &str = "MEDSCRIBE_STT_PROVIDER";
pub const ENV_TEXT_MODE: &str = "MEDSCRIBE_MODE";
pub const ENV_LLM_BASE_URL: &str = "MEDSCRIBE_LLM_BASE_URL";
pub const ENV_OCR_BASE_URL: &str = "MEDSCRIBE_OCR_BASE_URL";
pub const ENV_STT_BASE_URL: &str = "MEDSCRIBE_STT_BASE_URL";

// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error("Failed to read settings file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse settings file: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Invalid setting: {0}")]
    Invalid(String),

    #[error("Missing API key: set {0}")]
    MissingApiKey(&'static str),

    #[error("Failed to create provider: {0}")]
    Provider(String),
}

/// Persistent settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Settings {
    pub llm_provider: String,
    /// Text model; provider default when unset.
    pub llm_model: Option<String>,
    /// Model for image input; provider's vision default when unset.
    pub vision_model: Option<String>,
    pub llm_base_url: Option<String>,

    pub stt_provider: String,
    pub stt_model: Option<String>,
    /// Vocabulary hint passed to the transcription service.
    pub stt_prompt: Option<String>,
    pub stt_base_url: Option<String>,

    pub ocr_model: String,
    pub ocr_base_url: Option<String>,

    pub temperature: f32,
    pub max_tokens: u32,
    pub chat_temperature: f32,
    pub chat_max_tokens: u32,

    pub llm_timeout_secs: u64,
    pub media_timeout_secs: u64,
    pub retry: RetryConfig,

    pub default_text_mode: TranscriptMode,
    pub request_log_amount: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            llm_provider: DEFAULT_LLM_PROVIDER.to_string(),
            llm_model: None,
            vision_model: None,
            llm_base_url: None,
            stt_provider: DEFAULT_STT_PROVIDER.to_string(),
            stt_model: Some(DEFAULT_STT_MODEL.to_string()),
            stt_prompt: None,
            stt_base_url: None,
            ocr_model: DEFAULT_OCR_MODEL.to_string(),
            ocr_base_url: None,
            temperature: DEFAULT_TEMPERATURE,
            max_tokens: DEFAULT_MAX_TOKENS,
            chat_temperature: DEFAULT_CHAT_TEMPERATURE,
            chat_max_tokens: DEFAULT_CHAT_MAX_TOKENS,
            llm_timeout_secs: DEFAULT_LLM_TIMEOUT_SECS,
            media_timeout_secs: DEFAULT_MEDIA_TIMEOUT_SECS,
            retry: RetryConfig::default(),
            default_text_mode: TranscriptMode::default(),
            request_log_amount: DEFAULT_REQUEST_LOG_AMOUNT,
        }
    }
}

impl Settings {
    /// Load settings from `path`, or from `MEDSCRIBE_CONFIG`, or defaults, then
    /// apply environment overrides and validate.
    pub fn load(path: Option<&Path>) -> Result<Self, SettingsError> {
        let path = path
            .map(Path::to_path_buf)
            .or_else(|| std::env::var_os(ENV_CONFIG_PATH).map(PathBuf::from));

        let mut settings = match path {
            Some(path) => {
                log::info!("Loading settings from {}", path.display());
                Self::from_file(&path)?
            }
            None => Self::default(),
        };
        settings.apply_env_overrides(|key| std::env::var(key).ok());
        settings.validate()?;
        Ok(settings)
    }

    pub fn from_file(path: &Path) -> Result<Self, SettingsError> {
        let contents = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&contents)?)
    }

    /// Apply overrides using `lookup` to read variables.
    pub fn apply_env_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let lookup = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        if let Some(provider) = lookup(ENV_LLM_PROVIDER) {
            self.llm_provider = provider.to_ascii_lowercase();
        }
        if let Some(model) = lookup(ENV_LLM_MODEL) {
            self.llm_model = Some(model);
        }
        if let Some(provider) = lookup(ENV_STT_PROVIDER) {
            self.stt_provider = provider.to_ascii_lowercase();
        }
        if let Some(mode) = lookup(ENV_TEXT_MODE) {
            match mode.parse() {
                Ok(mode) => self.default_text_mode = mode,
                Err(e) => log::warn!("Ignoring {}: {}", ENV_TEXT_MODE, e),
            }
        }
        if let Some(url) = lookup(ENV_LLM_BASE_URL) {
            self.llm_base_url = Some(url);
        }
        if let Some(url) = lookup(ENV_OCR_BASE_URL) {
            self.ocr_base_url = Some(url);
        }
        if let Some(url) = lookup(ENV_STT_BASE_URL) {
            self.stt_base_url = Some(url);
        }
    }

    pub fn validate(&self) -> Result<(), SettingsError> {
        if !LLM_PROVIDERS.contains(&self.llm_provider.as_str()) {
            return Err(SettingsError::Invalid(format!(
                "llm_provider '{}' (expected one of {})",
                self.llm_provider,
                LLM_PROVIDERS.join(", ")
            )));
        }
        if !STT_PROVIDERS.contains(&self.stt_provider.as_str()) {
            return Err(SettingsError::Invalid(format!(
                "stt_provider '{}' (expected one of {})",
                self.stt_provider,
                STT_PROVIDERS.join(", ")
            )));
        }
        for (name, value) in [
            ("temperature", self.temperature),
            ("chat_temperature", self.chat_temperature),
        ] {
            if !value.is_finite() || !(0.0..=2.0).contains(&value) {
                return Err(SettingsError::Invalid(format!(
                    "{} must be between 0 and 2, got {}",
                    name, value
                )));
            }
        }
        if self.max_tokens == 0 || self.chat_max_tokens == 0 {
            return Err(SettingsError::Invalid("max_tokens must be positive".to_string()));
        }
        if self.llm_timeout_secs == 0 || self.media_timeout_secs == 0 {
            return Err(SettingsError::Invalid("timeouts must be positive".to_string()));
        }
        if !self.retry.backoff_multiplier.is_finite() || self.retry.backoff_multiplier < 1.0 {
            return Err(SettingsError::Invalid(format!(
                "retry.backoff_multiplier must be >= 1, got {}",
                self.retry.backoff_multiplier
            )));
        }
        if !(1..=MAX_REQUEST_LOG_AMOUNT).contains(&self.request_log_amount) {
            return Err(SettingsError::Invalid(format!(
                "request_log_amount must be between 1 and {}",
                MAX_REQUEST_LOG_AMOUNT
            )));
        }
        Ok(())
    }

    pub fn llm_timeout(&self) -> Duration {
        Duration::from_secs(self.llm_timeout_secs)
    }

    pub fn media_timeout(&self) -> Duration {
        Duration::from_secs(self.media_timeout_secs)
    }

    pub fn pipeline_config(&self) -> PipelineConfig {
        PipelineConfig {
            invocation_timeout: self.llm_timeout(),
            media_timeout: self.media_timeout(),
            retry: self.retry.clone(),
            transcript_options: CompletionOptions {
                temperature: self.temperature,
                max_tokens: self.max_tokens,
            },
            chat_options: CompletionOptions {
                temperature: self.chat_temperature,
                max_tokens: self.chat_max_tokens,
            },
        }
    }

    pub fn effective_llm_model(&self) -> Option<String> {
        self.llm_model
            .clone()
            .or_else(|| default_llm_model_for_provider(&self.llm_provider).map(str::to_string))
    }

    pub fn effective_vision_model(&self) -> Option<String> {
        self.vision_model
            .clone()
            .or_else(|| default_vision_model_for_provider(&self.llm_provider).map(str::to_string))
    }
}

/// Provider API keys, read from the environment.
#[derive(Clone, Default)]
pub struct ApiKeys {
    pub groq: Option<String>,
    pub openai: Option<String>,
    pub anthropic: Option<String>,
    pub mistral: Option<String>,
}

impl std::fmt::Debug for ApiKeys {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mask = |k: &Option<String>| if k.is_some() { "set" } else { "unset" };
        f.debug_struct("ApiKeys")
            .field("groq", &mask(&self.groq))
            .field("openai", &mask(&self.openai))
            .field("anthropic", &mask(&self.anthropic))
            .field("mistral", &mask(&self.mistral))
            .finish()
    }
}

impl ApiKeys {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let read = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        Self {
            groq: read("GROQ_API_KEY"),
            openai: read("OPENAI_API_KEY"),
            anthropic: read("ANTHROPIC_API_KEY"),
            mistral: read("MISTRAL_API_KEY"),
        }
    }

    /// Key and its environment variable name for a provider id.
    fn for_provider(&self, provider: &str) -> (Option<&str>, &'static str) {
        match provider {
            "groq" => (self.groq.as_deref(), "GROQ_API_KEY"),
            "openai" => (self.openai.as_deref(), "OPENAI_API_KEY"),
            "anthropic" => (self.anthropic.as_deref(), "ANTHROPIC_API_KEY"),
            "mistral" => (self.mistral.as_deref(), "MISTRAL_API_KEY"),
            _ => (None, "API_KEY"),
        }
    }
}

fn llm_provider_for(
    settings: &Settings,
    api_key: &str,
    model: Option<String>,
    store: &RequestLogStore,
) -> Result<Arc<dyn LlmProvider>, SettingsError> {
    let config = LlmConfig {
        provider: settings.llm_provider.clone(),
        api_key: api_key.to_string(),
        model,
        base_url: settings.llm_base_url.clone(),
        timeout: settings.llm_timeout(),
    };
    create_llm_provider(&config, Some(store.clone())).map_err(|e| SettingsError::Provider(e.to_string()))
}

/// Construct the pipeline and its collaborators from settings.
///
/// The LLM key is required. Transcription and OCR are wired only when their
/// keys are present; operations needing them otherwise fail with an
/// invocation error.
pub fn build_pipeline(settings: &Settings, keys: &ApiKeys) -> Result<PrescriptionPipeline, SettingsError> {
    settings.validate()?;

    let store = RequestLogStore::new_with_retention(RequestLogsRetentionConfig {
        mode: RequestLogsRetentionMode::Amount,
        amount: settings.request_log_amount,
        ..RequestLogsRetentionConfig::default()
    });

    let (llm_key, llm_env) = keys.for_provider(&settings.llm_provider);
    let llm_key = llm_key.ok_or(SettingsError::MissingApiKey(llm_env))?;

    let text_model = settings.effective_llm_model();
    let vision_model = settings.effective_vision_model();
    let llm = llm_provider_for(settings, llm_key, text_model.clone(), &store)?;
    log::info!("LLM provider: {} ({})", llm.name(), llm.model());

    let mut pipeline = PrescriptionPipeline::new(llm)
        .with_config(settings.pipeline_config())
        .with_request_log_store(store.clone());

    if vision_model.is_some() && vision_model != text_model {
        let vision = llm_provider_for(settings, llm_key, vision_model, &store)?;
        log::info!("Vision provider: {} ({})", vision.name(), vision.model());
        pipeline = pipeline.with_vision_provider(vision);
    }

    match keys.for_provider(&settings.stt_provider) {
        (Some(key), _) => {
            let stt = create_stt_provider(&SttConfig {
                provider: settings.stt_provider.clone(),
                api_key: key.to_string(),
                model: settings.stt_model.clone(),
                base_url: settings.stt_base_url.clone(),
                prompt: settings.stt_prompt.clone(),
                timeout: settings.media_timeout(),
            })
            .map_err(|e| SettingsError::Provider(e.to_string()))?;
            log::info!("STT provider: {} ({})", stt.name(), stt.model());
            pipeline = pipeline.with_stt_provider(stt);
        }
        (None, env) => log::debug!("STT disabled: {} not set", env),
    }

    match keys.mistral.as_deref() {
        Some(key) => {
            let ocr = create_ocr_provider(&OcrConfig {
                api_key: key.to_string(),
                model: Some(settings.ocr_model.clone()),
                base_url: settings.ocr_base_url.clone(),
                timeout: settings.media_timeout(),
            })
            .map_err(|e| SettingsError::Provider(e.to_string()))?;
            pipeline = pipeline.with_ocr_provider(ocr);
        }
        None => log::debug!("OCR disabled: MISTRAL_API_KEY not set"),
    }

    Ok(pipeline)
}
