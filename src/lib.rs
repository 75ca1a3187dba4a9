use std::process::ExitCode;

mod cli;
pub mod llm;
pub mod media;
pub mod ocr;
pub mod pipeline;
pub mod postprocess;
pub mod request_log;
pub mod retry;
pub mod session;
pub mod settings;
pub mod stt;
pub mod validation;

#[cfg(test)]
mod tests;

pub use pipeline::{
    ErrorKind, ErrorReport, Generated, Guidance, NarrativeDocument, OcrInput, PipelineConfig,
    PipelineError, PrescriptionDocument, PrescriptionPipeline, TranscriptMode,
};
pub use postprocess::{MedicationList, MedicationRecord};
pub use session::ChatSession;

pub fn run() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    log::info!("Starting medscribe {}", env!("CARGO_PKG_VERSION"));

    cli::run()
}
