//! Prescription pipeline orchestrator.
//!
//! Every operation follows the same linear flow:
//!
//! `Validate -> (guidance) | SelectPrompt -> Invoke -> PostProcess -> Return`
//!
//! Validation failures are answered locally with guidance text and never reach
//! a model. Everything that goes wrong after validation surfaces as a
//! [`PipelineError`], which callers turn into an [`ErrorReport`] at the
//! boundary. The orchestrator holds no per-request state; chat context lives in
//! the caller-owned [`ChatSession`].

use crate::llm::prompts::{render_prompt, PromptContext, PromptError, PromptMode};
use crate::llm::{CompletionOptions, CompletionRequest, LlmError, LlmProvider};
use crate::media::{AudioClip, ImageInput};
use crate::ocr::{OcrError, OcrProvider};
use crate::postprocess::{
    annotate_incomplete, count_safety_flags, parse_medication_list, MedicationList,
    PostProcessError,
};
use crate::request_log::RequestLogStore;
use crate::retry::{with_retry, RetryConfig, Transient};
use crate::session::{ChatSession, EMPTY_MESSAGE_GUIDANCE};
use crate::stt::{SttError, SttProvider};
use crate::validation::{
    check_transcript, insufficient_content_guidance, TranscriptCheck, EMPTY_TRANSCRIPT_GUIDANCE,
};
use serde::{Deserialize, Serialize};
use std::fmt::Display;
use std::future::Future;
use std::str::FromStr;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Default per-attempt deadline for model calls.
pub const DEFAULT_INVOCATION_TIMEOUT: Duration = Duration::from_secs(30);

/// Default per-attempt deadline for transcription and OCR.
pub const DEFAULT_MEDIA_TIMEOUT: Duration = Duration::from_secs(60);

/// Longest technical detail carried by an [`ErrorReport`], in characters.
pub const MAX_ERROR_DETAIL_CHARS: usize = 300;

/// Errors that can occur in the prescription pipeline
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),

    #[error("STT error: {0}")]
    Stt(#[from] SttError),

    #[error("OCR error: {0}")]
    Ocr(#[from] OcrError),

    #[error("Prompt error: {0}")]
    Prompt(#[from] PromptError),

    #[error("Post-processing error: {0}")]
    PostProcess(#[from] PostProcessError),

    #[error("No {0} provider configured")]
    NoProvider(&'static str),

    #[error("Empty input: {0}")]
    EmptyInput(&'static str),

    #[error("Model returned an empty document")]
    EmptyCompletion,
}

/// Error and guidance kinds visible at the pipeline boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    EmptyInput,
    InsufficientContent,
    InvocationError,
    MalformedStructuredOutput,
    GenerationFailed,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::EmptyInput => "empty_input",
            ErrorKind::InsufficientContent => "insufficient_content",
            ErrorKind::InvocationError => "invocation_error",
            ErrorKind::MalformedStructuredOutput => "malformed_structured_output",
            ErrorKind::GenerationFailed => "generation_failed",
        }
    }

    /// Fixed user-facing sentence for the kind.
    pub fn message(&self) -> &'static str {
        match self {
            ErrorKind::EmptyInput => "No input was provided.",
            ErrorKind::InsufficientContent => {
                "The input is too short to generate a prescription from."
            }
            ErrorKind::InvocationError => {
                "The AI service could not be reached or rejected the request."
            }
            ErrorKind::MalformedStructuredOutput => {
                "Prescription extraction failed: the AI service returned data in an unexpected format."
            }
            ErrorKind::GenerationFailed => "🚨 Critical Error: Failed to process prescription",
        }
    }

    /// HTTP-equivalent status code.
    pub fn status_code(&self) -> u16 {
        match self {
            ErrorKind::EmptyInput | ErrorKind::InsufficientContent => 400,
            ErrorKind::MalformedStructuredOutput => 422,
            ErrorKind::InvocationError => 502,
            ErrorKind::GenerationFailed => 500,
        }
    }

    /// Whether the caller (rather than a service) is at fault.
    pub fn is_client_error(&self) -> bool {
        self.status_code() < 500
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Normalised error handed across the external interface.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorReport {
    pub kind: ErrorKind,
    pub message: String,
    /// Short technical diagnostic.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl ErrorReport {
    pub fn new(kind: ErrorKind, detail: Option<String>) -> Self {
        Self {
            kind,
            message: kind.message().to_string(),
            detail: detail.map(|d| truncate_detail(&d)),
        }
    }

    pub fn status_code(&self) -> u16 {
        self.kind.status_code()
    }
}

impl std::fmt::Display for ErrorReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.detail {
            Some(detail) => write!(f, "{} ({})", self.message, detail),
            None => f.write_str(&self.message),
        }
    }
}

impl PipelineError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            PipelineError::Llm(_)
            | PipelineError::Stt(_)
            | PipelineError::Ocr(_)
            | PipelineError::NoProvider(_) => ErrorKind::InvocationError,
            PipelineError::PostProcess(_) => ErrorKind::MalformedStructuredOutput,
            PipelineError::EmptyInput(_) => ErrorKind::EmptyInput,
            PipelineError::Prompt(_) | PipelineError::EmptyCompletion => {
                ErrorKind::GenerationFailed
            }
        }
    }
}

impl From<&PipelineError> for ErrorReport {
    fn from(error: &PipelineError) -> Self {
        ErrorReport::new(error.kind(), Some(error.to_string()))
    }
}

impl From<PipelineError> for ErrorReport {
    fn from(error: PipelineError) -> Self {
        ErrorReport::from(&error)
    }
}

fn truncate_detail(detail: &str) -> String {
    if detail.chars().count() <= MAX_ERROR_DETAIL_CHARS {
        return detail.to_string();
    }
    let mut truncated: String = detail.chars().take(MAX_ERROR_DETAIL_CHARS - 1).collect();
    truncated.push('…');
    truncated
}

/// User-facing text returned instead of a document when input is rejected.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Guidance {
    pub kind: ErrorKind,
    pub message: String,
}

/// Result of an operation that may short-circuit on validation.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Generated<T> {
    Document(T),
    Guidance(Guidance),
}

impl<T> Generated<T> {
    pub fn document(self) -> Option<T> {
        match self {
            Generated::Document(doc) => Some(doc),
            Generated::Guidance(_) => None,
        }
    }

    pub fn guidance(&self) -> Option<&Guidance> {
        match self {
            Generated::Guidance(g) => Some(g),
            Generated::Document(_) => None,
        }
    }
}

/// Transcript prompt variants selectable by callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TranscriptMode {
    /// Only explicit facts; missing fields stay blank.
    #[default]
    #[serde(alias = "strict")]
    StrictTranscript,
    /// Best effort; missing fields get placeholder text.
    #[serde(alias = "permissive")]
    PermissiveTranscript,
}

impl From<TranscriptMode> for PromptMode {
    fn from(mode: TranscriptMode) -> Self {
        match mode {
            TranscriptMode::StrictTranscript => PromptMode::StrictTranscript,
            TranscriptMode::PermissiveTranscript => PromptMode::PermissiveTranscript,
        }
    }
}

impl FromStr for TranscriptMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "strict-transcript" | "strict" => Ok(TranscriptMode::StrictTranscript),
            "permissive-transcript" | "permissive" => Ok(TranscriptMode::PermissiveTranscript),
            other => Err(format!("Unknown transcript mode: {}", other)),
        }
    }
}

/// A generated clinical document.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PrescriptionDocument {
    pub text: String,
    pub mode: PromptMode,
    /// Whether the incomplete-prescription banner was appended.
    pub banner_appended: bool,
    pub provider: String,
    pub model: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
}

/// A document produced by the narrative or audit templates.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NarrativeDocument {
    pub document: PrescriptionDocument,
    /// Lines the model flagged with the warning marker.
    pub safety_flags: usize,
}

/// Input to structured extraction.
#[derive(Debug, Clone, Copy)]
pub enum OcrInput<'a> {
    /// Text already extracted from the prescription.
    Markdown(&'a str),
    /// Image that goes through the OCR provider first.
    Image(&'a ImageInput),
}

/// Pipeline tuning.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Deadline for each model call attempt.
    pub invocation_timeout: Duration,
    /// Deadline for each transcription or OCR attempt.
    pub media_timeout: Duration,
    pub retry: RetryConfig,
    /// Sampling for the strict and permissive transcript modes.
    pub transcript_options: CompletionOptions,
    pub chat_options: CompletionOptions,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            invocation_timeout: DEFAULT_INVOCATION_TIMEOUT,
            media_timeout: DEFAULT_MEDIA_TIMEOUT,
            retry: RetryConfig::default(),
            transcript_options: PromptMode::StrictTranscript.completion_options(),
            chat_options: PromptMode::ClinicalChat.completion_options(),
        }
    }
}

/// Normalize STT output text.
///
/// Whisper-based APIs may include a leading space as a tokenization artifact.
/// Only leading whitespace is trimmed so internal formatting survives.
fn normalize_stt_text(text: String) -> String {
    match text.chars().next() {
        Some(c) if c.is_whitespace() => text.trim_start().to_string(),
        _ => text,
    }
}

/// Run `op` with a deadline on every attempt and bounded retries between them.
async fn call_with_deadline<T, E, F, Fut>(
    retry: &RetryConfig,
    deadline: Duration,
    on_timeout: fn(Duration) -> E,
    mut op: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Transient + Display,
{
    with_retry(retry, || {
        let attempt = op();
        async move {
            match tokio::time::timeout(deadline, attempt).await {
                Ok(result) => result,
                Err(_) => Err(on_timeout(deadline)),
            }
        }
    })
    .await
}

fn elapsed_ms(start: Instant) -> u64 {
    start.elapsed().as_millis() as u64
}

/// How a logged run ended.
enum RunOutcome<'a> {
    Success { output: &'a str, banner: bool },
    Guidance(ErrorKind),
    Failed(&'a PipelineError),
}

/// Stateless orchestrator over the configured collaborators.
pub struct PrescriptionPipeline {
    llm: Arc<dyn LlmProvider>,
    vision_llm: Option<Arc<dyn LlmProvider>>,
    stt: Option<Arc<dyn SttProvider>>,
    ocr: Option<Arc<dyn OcrProvider>>,
    config: PipelineConfig,
    request_log_store: Option<RequestLogStore>,
}

impl PrescriptionPipeline {
    pub fn new(llm: Arc<dyn LlmProvider>) -> Self {
        Self {
            llm,
            vision_llm: None,
            stt: None,
            ocr: None,
            config: PipelineConfig::default(),
            request_log_store: None,
        }
    }

    /// Model used for image input. Falls back to the text model when unset.
    pub fn with_vision_provider(mut self, provider: Arc<dyn LlmProvider>) -> Self {
        self.vision_llm = Some(provider);
        self
    }

    pub fn with_stt_provider(mut self, provider: Arc<dyn SttProvider>) -> Self {
        self.stt = Some(provider);
        self
    }

    pub fn with_ocr_provider(mut self, provider: Arc<dyn OcrProvider>) -> Self {
        self.ocr = Some(provider);
        self
    }

    pub fn with_config(mut self, config: PipelineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_request_log_store(mut self, store: RequestLogStore) -> Self {
        self.request_log_store = Some(store);
        self
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn request_log_store(&self) -> Option<&RequestLogStore> {
        self.request_log_store.as_ref()
    }

    fn vision_provider(&self) -> &Arc<dyn LlmProvider> {
        self.vision_llm.as_ref().unwrap_or(&self.llm)
    }

    fn options_for(&self, mode: PromptMode) -> CompletionOptions {
        match mode {
            PromptMode::StrictTranscript | PromptMode::PermissiveTranscript => {
                self.config.transcript_options
            }
            PromptMode::ClinicalChat => self.config.chat_options,
            other => other.completion_options(),
        }
    }

    // ---- request log helpers ----

    fn begin_run(&self, mode: PromptMode, provider: &dyn LlmProvider, input: Option<&str>) -> Option<String> {
        let store = self.request_log_store.as_ref()?;
        let id = store.start_request(mode.id(), provider.name(), Some(provider.model().to_string()));
        let input = input.map(str::to_string);
        store.with_request(&id, |log| {
            log.input_text = input;
            log.info(format!("Pipeline run started ({})", mode.id()));
        });
        Some(id)
    }

    fn annotate_run<F>(&self, id: Option<&str>, f: F)
    where
        F: FnOnce(&mut crate::request_log::RequestLog),
    {
        if let (Some(store), Some(id)) = (&self.request_log_store, id) {
            store.with_request(id, f);
        }
    }

    fn finish_run(&self, id: Option<&str>, outcome: RunOutcome<'_>) {
        let (Some(store), Some(id)) = (&self.request_log_store, id) else {
            return;
        };
        store.with_request(id, |log| match outcome {
            RunOutcome::Success { output, banner } => {
                log.output_text = Some(output.to_string());
                log.banner_appended = banner;
                log.complete_success();
            }
            RunOutcome::Guidance(kind) => {
                log.warn(format!("Input rejected: {}", kind));
                log.complete_guidance(kind.as_str());
            }
            RunOutcome::Failed(error) => {
                log.error(error.to_string());
                log.complete_error(error.kind().as_str(), error.to_string());
            }
        });
        store.complete_request(id);
    }

    fn guidance<T>(&self, id: Option<&str>, kind: ErrorKind, message: String) -> Generated<T> {
        log::warn!("Pipeline: input rejected ({}), no model call made", kind);
        self.finish_run(id, RunOutcome::Guidance(kind));
        Generated::Guidance(Guidance { kind, message })
    }

    // ---- collaborator calls ----

    /// Render the prompt for `mode` and invoke `provider` once (plus retries
    /// for transient failures). Returns the raw model output.
    async fn invoke(
        &self,
        provider: &dyn LlmProvider,
        mode: PromptMode,
        body: &str,
        session: Option<&ChatSession>,
        image: Option<&ImageInput>,
        request_id: Option<&str>,
    ) -> Result<String, PipelineError> {
        let ctx = PromptContext::new(body)
            .with_patient_context(session.and_then(|s| s.patient_context()));
        let prompt = render_prompt(mode, &ctx)?;

        let mut request = CompletionRequest::new(&prompt.system, &prompt.user)
            .with_options(self.options_for(mode))
            .with_request_id(request_id);
        if let Some(session) = session {
            request = request.with_history(session.history());
        }
        if let Some(image) = image {
            request = request.with_image(image);
        }

        log::info!(
            "Pipeline: invoking {} ({}) for {}",
            provider.name(),
            provider.model(),
            mode
        );

        let start = Instant::now();
        let request = &request;
        let result = call_with_deadline(
            &self.config.retry,
            self.config.invocation_timeout,
            LlmError::Timeout,
            move || provider.complete(request),
        )
        .await;
        let llm_ms = elapsed_ms(start);

        self.annotate_run(request_id, |log| log.llm_duration_ms = Some(llm_ms));

        match result {
            Ok(output) => {
                log::info!("Pipeline: model returned {} bytes in {}ms", output.len(), llm_ms);
                Ok(output)
            }
            Err(e) => {
                log::error!("Pipeline: model invocation failed after {}ms: {}", llm_ms, e);
                Err(e.into())
            }
        }
    }

    /// Text-mode post-processing: reject empty output, append the banner when
    /// the document signals missing information.
    fn finish_text(
        &self,
        raw: &str,
        mode: PromptMode,
        provider: &dyn LlmProvider,
        request_id: Option<&str>,
    ) -> Result<PrescriptionDocument, PipelineError> {
        if raw.trim().is_empty() {
            return Err(PipelineError::EmptyCompletion);
        }
        let (text, banner_appended) = annotate_incomplete(raw);
        if banner_appended {
            log::info!("Pipeline: incomplete-prescription banner appended");
        }
        Ok(PrescriptionDocument {
            text,
            mode,
            banner_appended,
            provider: provider.name().to_string(),
            model: provider.model().to_string(),
            request_id: request_id.map(str::to_string),
        })
    }

    // ---- operations ----

    /// Generate a prescription document from a consultation transcript.
    pub async fn generate(
        &self,
        transcript: &str,
        mode: TranscriptMode,
    ) -> Result<Generated<PrescriptionDocument>, PipelineError> {
        let prompt_mode = PromptMode::from(mode);
        let id = self.begin_run(prompt_mode, self.llm.as_ref(), Some(transcript));
        self.generate_logged(transcript, prompt_mode, id.as_deref()).await
    }

    async fn generate_logged(
        &self,
        transcript: &str,
        mode: PromptMode,
        id: Option<&str>,
    ) -> Result<Generated<PrescriptionDocument>, PipelineError> {
        log::info!(
            "Pipeline: generate ({}), transcript {} bytes",
            mode,
            transcript.len()
        );

        match check_transcript(Some(transcript)) {
            TranscriptCheck::Empty => {
                return Ok(self.guidance(
                    id,
                    ErrorKind::EmptyInput,
                    EMPTY_TRANSCRIPT_GUIDANCE.to_string(),
                ))
            }
            TranscriptCheck::TooShort => {
                return Ok(self.guidance(
                    id,
                    ErrorKind::InsufficientContent,
                    insufficient_content_guidance(transcript),
                ))
            }
            TranscriptCheck::Valid => {}
        }

        let provider = self.llm.as_ref();
        let result = async {
            let raw = self.invoke(provider, mode, transcript.trim(), None, None, id).await?;
            self.finish_text(&raw, mode, provider, id)
        }
        .await;

        match result {
            Ok(document) => {
                self.finish_run(
                    id,
                    RunOutcome::Success {
                        output: &document.text,
                        banner: document.banner_appended,
                    },
                );
                Ok(Generated::Document(document))
            }
            Err(e) => {
                self.finish_run(id, RunOutcome::Failed(&e));
                Err(e)
            }
        }
    }

    /// Transcribe a consultation recording.
    pub async fn transcribe(&self, audio: &[u8], clip: &AudioClip) -> Result<String, PipelineError> {
        let stt = self.stt.as_deref().ok_or(PipelineError::NoProvider("STT"))?;
        if audio.is_empty() {
            return Err(PipelineError::EmptyInput("audio recording"));
        }

        log::info!(
            "Pipeline: starting transcription with {} ({} bytes, timeout {:?})",
            stt.name(),
            audio.len(),
            self.config.media_timeout
        );

        let start = Instant::now();
        let text = call_with_deadline(
            &self.config.retry,
            self.config.media_timeout,
            |_: Duration| SttError::Timeout,
            move || stt.transcribe(audio, clip),
        )
        .await
        .map_err(|e| {
            log::error!("Pipeline: transcription failed: {}", e);
            PipelineError::from(e)
        })?;

        let text = normalize_stt_text(text);
        log::info!(
            "Pipeline: STT complete, {} bytes in {}ms",
            text.len(),
            elapsed_ms(start)
        );
        Ok(text)
    }

    /// Transcribe a recording, then generate a prescription from the transcript.
    pub async fn generate_from_audio(
        &self,
        audio: &[u8],
        clip: &AudioClip,
        mode: TranscriptMode,
    ) -> Result<Generated<PrescriptionDocument>, PipelineError> {
        let prompt_mode = PromptMode::from(mode);
        let id = self.begin_run(prompt_mode, self.llm.as_ref(), None);
        let stt_name = self.stt.as_ref().map(|s| s.name().to_string());

        let start = Instant::now();
        let transcript = match self.transcribe(audio, clip).await {
            Ok(t) => t,
            Err(e) => {
                self.annotate_run(id.as_deref(), |log| log.stt_provider = stt_name);
                self.finish_run(id.as_deref(), RunOutcome::Failed(&e));
                return Err(e);
            }
        };
        let stt_ms = elapsed_ms(start);
        let transcript_for_log = transcript.clone();
        self.annotate_run(id.as_deref(), |log| {
            log.stt_provider = stt_name;
            log.stt_duration_ms = Some(stt_ms);
            log.input_text = Some(transcript_for_log);
        });

        self.generate_logged(&transcript, prompt_mode, id.as_deref()).await
    }

    /// Extract the medication list from OCR markdown or a prescription image.
    pub async fn extract_structured(
        &self,
        input: OcrInput<'_>,
    ) -> Result<MedicationList, PipelineError> {
        let mode = PromptMode::OcrToJson;
        let provider = self.llm.as_ref();
        let id = self.begin_run(mode, provider, None);

        let result = self.extract_logged(input, provider, id.as_deref()).await;
        match &result {
            Ok(list) => {
                let json = serde_json::to_string(list).unwrap_or_default();
                self.finish_run(id.as_deref(), RunOutcome::Success { output: &json, banner: false });
            }
            Err(e) => self.finish_run(id.as_deref(), RunOutcome::Failed(e)),
        }
        result
    }

    async fn extract_logged(
        &self,
        input: OcrInput<'_>,
        provider: &dyn LlmProvider,
        id: Option<&str>,
    ) -> Result<MedicationList, PipelineError> {
        let markdown = match input {
            OcrInput::Markdown(markdown) => markdown.to_string(),
            OcrInput::Image(image) => self.ocr_markdown(image, id).await?,
        };
        let markdown_for_log = markdown.clone();
        self.annotate_run(id, |log| log.input_text = Some(markdown_for_log));

        if markdown.trim().is_empty() {
            return Err(PipelineError::EmptyInput("OCR text"));
        }

        let raw = self
            .invoke(provider, PromptMode::OcrToJson, markdown.trim(), None, None, id)
            .await?;

        match parse_medication_list(&raw) {
            Ok(list) => {
                log::info!("Pipeline: parsed {} medication record(s)", list.len());
                let records = list.len();
                self.annotate_run(id, |log| {
                    log.info_with_details("Structured output parsed", format!("{} record(s)", records))
                });
                Ok(list)
            }
            Err(e) => {
                log::error!("Pipeline: structured output rejected: {}", e);
                Err(e.into())
            }
        }
    }

    async fn ocr_markdown(&self, image: &ImageInput, id: Option<&str>) -> Result<String, PipelineError> {
        let ocr = self.ocr.as_deref().ok_or(PipelineError::NoProvider("OCR"))?;
        if image.is_empty() {
            return Err(PipelineError::EmptyInput("image"));
        }

        log::info!("Pipeline: running OCR with {} ({} bytes)", ocr.name(), image.len());
        let start = Instant::now();
        let result = call_with_deadline(
            &self.config.retry,
            self.config.media_timeout,
            OcrError::Timeout,
            move || ocr.extract_markdown(image),
        )
        .await;
        let ocr_ms = elapsed_ms(start);
        self.annotate_run(id, |log| {
            log.ocr_provider = Some(ocr.name().to_string());
            log.ocr_duration_ms = Some(ocr_ms);
        });

        let markdown = result?;
        log::info!("Pipeline: OCR complete, {} bytes in {}ms", markdown.len(), ocr_ms);
        Ok(markdown)
    }

    /// Produce an exhaustive narrative transcription of a prescription image,
    /// with inference tags and a safety-flag review.
    pub async fn describe_image(&self, image: &ImageInput) -> Result<NarrativeDocument, PipelineError> {
        let mode = PromptMode::OcrToNarrative;
        let provider = self.vision_provider().as_ref();
        let id = self.begin_run(mode, provider, None);

        let result = async {
            if image.is_empty() {
                return Err(PipelineError::EmptyInput("image"));
            }
            let raw = self
                .invoke(provider, mode, "", None, Some(image), id.as_deref())
                .await?;
            self.finish_text(&raw, mode, provider, id.as_deref())
        }
        .await;

        self.finish_narrative(id.as_deref(), result)
    }

    /// Re-validate a previously generated document and return the corrected version.
    pub async fn audit(&self, document: &str) -> Result<Generated<NarrativeDocument>, PipelineError> {
        let mode = PromptMode::AuditCorrection;
        let provider = self.llm.as_ref();
        let id = self.begin_run(mode, provider, Some(document));

        // Generated documents may legitimately be short, so only emptiness is checked.
        if check_transcript(Some(document)) == TranscriptCheck::Empty {
            return Ok(self.guidance(
                id.as_deref(),
                ErrorKind::EmptyInput,
                "⚠️ No document to audit. Paste a generated prescription and try again."
                    .to_string(),
            ));
        }

        let result = async {
            let raw = self
                .invoke(provider, mode, document.trim(), None, None, id.as_deref())
                .await?;
            self.finish_text(&raw, mode, provider, id.as_deref())
        }
        .await;

        self.finish_narrative(id.as_deref(), result)
            .map(Generated::Document)
    }

    fn finish_narrative(
        &self,
        id: Option<&str>,
        result: Result<PrescriptionDocument, PipelineError>,
    ) -> Result<NarrativeDocument, PipelineError> {
        match result {
            Ok(document) => {
                let safety_flags = count_safety_flags(&document.text);
                log::info!("Pipeline: {} safety flag(s) in document", safety_flags);
                self.finish_run(
                    id,
                    RunOutcome::Success {
                        output: &document.text,
                        banner: document.banner_appended,
                    },
                );
                Ok(NarrativeDocument {
                    document,
                    safety_flags,
                })
            }
            Err(e) => {
                self.finish_run(id, RunOutcome::Failed(&e));
                Err(e)
            }
        }
    }

    /// Answer one chat message within a session.
    ///
    /// The reply is returned without post-processing. After a successful reply
    /// the session's patient context is replaced when the message looks like it
    /// introduces a new patient, and the exchange is appended to the history.
    pub async fn chat(
        &self,
        session: &mut ChatSession,
        message: &str,
    ) -> Result<Generated<String>, PipelineError> {
        let mode = PromptMode::ClinicalChat;
        let provider = self.llm.as_ref();
        let id = self.begin_run(mode, provider, Some(message));

        if check_transcript(Some(message)) == TranscriptCheck::Empty {
            return Ok(self.guidance(
                id.as_deref(),
                ErrorKind::EmptyInput,
                EMPTY_MESSAGE_GUIDANCE.to_string(),
            ));
        }

        let result = self
            .invoke(provider, mode, message, Some(&*session), None, id.as_deref())
            .await;

        match result {
            Ok(reply) => {
                if session.observe_message(message) {
                    log::info!("Pipeline: session {} patient context updated", session.id());
                }
                session.record_exchange(message, &reply);
                self.finish_run(id.as_deref(), RunOutcome::Success { output: &reply, banner: false });
                Ok(Generated::Document(reply))
            }
            Err(e) => {
                self.finish_run(id.as_deref(), RunOutcome::Failed(&e));
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kind_mapping() {
        let invocation = PipelineError::Llm(LlmError::Api("401".into()));
        assert_eq!(invocation.kind(), ErrorKind::InvocationError);
        assert_eq!(PipelineError::Stt(SttError::Timeout).kind(), ErrorKind::InvocationError);
        assert_eq!(PipelineError::NoProvider("OCR").kind(), ErrorKind::InvocationError);
        assert_eq!(
            PipelineError::PostProcess(PostProcessError::MalformedJson("x".into())).kind(),
            ErrorKind::MalformedStructuredOutput
        );
        assert_eq!(
            PipelineError::Prompt(PromptError::Unterminated("strict-transcript")).kind(),
            ErrorKind::GenerationFailed
        );
        assert_eq!(PipelineError::EmptyCompletion.kind(), ErrorKind::GenerationFailed);
    }

    #[test]
    fn test_status_codes() {
        assert_eq!(ErrorKind::EmptyInput.status_code(), 400);
        assert_eq!(ErrorKind::InsufficientContent.status_code(), 400);
        assert_eq!(ErrorKind::MalformedStructuredOutput.status_code(), 422);
        assert_eq!(ErrorKind::InvocationError.status_code(), 502);
        assert_eq!(ErrorKind::GenerationFailed.status_code(), 500);
        assert!(ErrorKind::MalformedStructuredOutput.is_client_error());
        assert!(!ErrorKind::InvocationError.is_client_error());
    }

    #[test]
    fn test_report_keeps_fixed_message_and_short_detail() {
        let long = "x".repeat(1000);
        let report = ErrorReport::from(PipelineError::Llm(LlmError::Api(long)));
        assert_eq!(report.message, ErrorKind::InvocationError.message());
        let detail = report.detail.unwrap();
        assert_eq!(detail.chars().count(), MAX_ERROR_DETAIL_CHARS);
        assert!(detail.ends_with('…'));
    }

    #[test]
    fn test_report_serializes_kind_in_snake_case() {
        let report = ErrorReport::new(ErrorKind::MalformedStructuredOutput, None);
        let value = serde_json::to_value(&report).unwrap();
        assert_eq!(value["kind"], "malformed_structured_output");
        assert!(value.get("detail").is_none());
    }

    #[test]
    fn test_transcript_mode_parsing() {
        assert_eq!("strict".parse::<TranscriptMode>().unwrap(), TranscriptMode::StrictTranscript);
        assert_eq!(
            "permissive-transcript".parse::<TranscriptMode>().unwrap(),
            TranscriptMode::PermissiveTranscript
        );
        assert!("audit".parse::<TranscriptMode>().is_err());
        assert_eq!(TranscriptMode::default(), TranscriptMode::StrictTranscript);
        let parsed: TranscriptMode = serde_json::from_str("\"permissive\"").unwrap();
        assert_eq!(parsed, TranscriptMode::PermissiveTranscript);
    }

    #[test]
    fn test_normalize_stt_text_trims_only_leading() {
        assert_eq!(normalize_stt_text("  hello  world ".into()), "hello  world ");
        assert_eq!(normalize_stt_text("hello".into()), "hello");
    }
}
