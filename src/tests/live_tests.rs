//! Live tests against the hosted providers.
//!
//! Run with `cargo test -- --ignored` when `GROQ_API_KEY` (and optionally
//! `MISTRAL_API_KEY`) is set. Each test skips itself when its key is missing.

use crate::llm::GroqLlmProvider;
use crate::media::ImageInput;
use crate::ocr::MistralOcrProvider;
use crate::pipeline::{OcrInput, PrescriptionPipeline, TranscriptMode};
use crate::session::ChatSession;
use std::sync::Arc;

fn api_key(var: &str) -> Option<String> {
    match std::env::var(var) {
        Ok(key) if !key.is_empty() => Some(key),
        _ => {
            eprintln!("Skipping live test: {} not set", var);
            None
        }
    }
}

const CONSULTATION: &str = "Doctor: Good morning, what seems to be the problem? \
Patient: I have had a sore throat and fever for three days. \
Doctor: Any allergies? Patient: No. \
Doctor: I'll prescribe amoxicillin 500 mg three times a day for seven days, \
and paracetamol 500 mg as needed for fever.";

#[tokio::test]
#[ignore]
async fn test_groq_generates_prescription() {
    let Some(key) = api_key("GROQ_API_KEY") else {
        return;
    };
    let pipeline = PrescriptionPipeline::new(Arc::new(GroqLlmProvider::new(key)));

    let result = pipeline
        .generate(CONSULTATION, TranscriptMode::StrictTranscript)
        .await;
    let doc = result
        .expect("generation failed")
        .document()
        .expect("expected a document");
    assert!(doc.text.to_lowercase().contains("amoxicillin"));
}

#[tokio::test]
#[ignore]
async fn test_groq_extracts_structured_list() {
    let Some(key) = api_key("GROQ_API_KEY") else {
        return;
    };
    let pipeline = PrescriptionPipeline::new(Arc::new(GroqLlmProvider::new(key)));

    let list = pipeline
        .extract_structured(OcrInput::Markdown(
            "Rx\n1. Tab Metformin 500mg - 1-0-1 after food\n2. Tab Atorvastatin 10mg - 0-0-1",
        ))
        .await
        .expect("extraction failed");
    assert_eq!(list.len(), 2);
}

#[tokio::test]
#[ignore]
async fn test_groq_chat_turn() {
    let Some(key) = api_key("GROQ_API_KEY") else {
        return;
    };
    let pipeline = PrescriptionPipeline::new(Arc::new(GroqLlmProvider::new(key)));
    let mut session = ChatSession::new();

    let reply = pipeline
        .chat(&mut session, "patient: John Doe, 45M, complains of chest pain for 2 days")
        .await
        .expect("chat failed");
    assert!(reply.document().is_some());
    assert!(session.patient_context().is_some());
}

/// Needs a prescription photo at `MEDSCRIBE_SAMPLE_IMAGE` as well as the keys.
#[tokio::test]
#[ignore]
async fn test_mistral_ocr_then_extract() {
    let (Some(groq), Some(mistral)) = (api_key("GROQ_API_KEY"), api_key("MISTRAL_API_KEY")) else {
        return;
    };
    let Ok(path) = std::env::var("MEDSCRIBE_SAMPLE_IMAGE") else {
        eprintln!("Skipping live test: MEDSCRIBE_SAMPLE_IMAGE not set");
        return;
    };
    let image = ImageInput::from_path(std::path::Path::new(&path)).expect("readable image");

    let pipeline = PrescriptionPipeline::new(Arc::new(GroqLlmProvider::new(groq)))
        .with_ocr_provider(Arc::new(MistralOcrProvider::new(mistral, None)));
    let result = pipeline.extract_structured(OcrInput::Image(&image)).await;
    assert!(result.is_ok(), "OCR extraction failed: {:?}", result.err());
}
