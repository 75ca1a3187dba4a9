//! Command-line front end over the pipeline operations.

use clap::{Parser, Subcommand, ValueEnum};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};

use crate::media::{AudioClip, ImageInput};
use crate::pipeline::{
    ErrorReport, Generated, OcrInput, PipelineError, PrescriptionPipeline, TranscriptMode,
};
use crate::session::{ChatSession, MEDICAL_DISCLAIMER, STARTERS};
use crate::settings::{build_pipeline, ApiKeys, Settings, SettingsError};

#[derive(Parser)]
#[command(name = "medscribe")]
#[command(about = "Turn consultations and prescription images into safety-annotated prescriptions")]
#[command(version)]
pub struct Cli {
    /// Settings file (JSON)
    #[arg(long, global = true, env = "MEDSCRIBE_CONFIG")]
    config: Option<PathBuf>,

    /// Print the request log record of the run to stderr
    #[arg(long, global = true)]
    show_log: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate a prescription from a consultation transcript
    Generate {
        /// Transcript file; reads stdin when omitted
        file: Option<PathBuf>,
        #[arg(long, value_enum)]
        mode: Option<ModeArg>,
    },
    /// Transcribe a consultation recording, then generate a prescription
    Transcribe {
        /// Audio file (wav, mp3, m4a, ogg, webm, flac)
        audio: PathBuf,
        #[arg(long, value_enum)]
        mode: Option<ModeArg>,
    },
    /// Extract the medication list from a prescription image or OCR markdown
    Extract {
        #[arg(long, conflicts_with = "markdown", required_unless_present = "markdown")]
        image: Option<PathBuf>,
        #[arg(long)]
        markdown: Option<PathBuf>,
        /// Print a markdown table instead of JSON
        #[arg(long)]
        table: bool,
    },
    /// Describe a prescription image in full, with safety review
    Describe { image: PathBuf },
    /// Audit a previously generated prescription
    Audit {
        /// Document file; reads stdin when omitted
        file: Option<PathBuf>,
    },
    /// Interactive clinical assistant
    Chat,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum ModeArg {
    /// Only explicit facts; missing fields stay blank
    Strict,
    /// Best effort; missing fields get placeholder text
    Permissive,
}

impl From<ModeArg> for TranscriptMode {
    fn from(mode: ModeArg) -> Self {
        match mode {
            ModeArg::Strict => TranscriptMode::StrictTranscript,
            ModeArg::Permissive => TranscriptMode::PermissiveTranscript,
        }
    }
}

#[derive(Debug, thiserror::Error)]
enum CliError {
    #[error(transparent)]
    Settings(#[from] SettingsError),

    #[error("Failed to read {0}: {1}")]
    Input(String, std::io::Error),

    #[error(transparent)]
    Pipeline(#[from] PipelineError),
}

impl CliError {
    fn exit_code(&self) -> ExitCode {
        match self {
            CliError::Pipeline(e) if !e.kind().is_client_error() => ExitCode::from(1),
            _ => ExitCode::from(2),
        }
    }

    fn report(&self) {
        match self {
            CliError::Pipeline(e) => {
                let report = ErrorReport::from(e);
                match serde_json::to_string_pretty(&report) {
                    Ok(json) => eprintln!("{}", json),
                    Err(_) => eprintln!("{}", report),
                }
            }
            other => eprintln!("Error: {}", other),
        }
    }
}

pub fn run() -> ExitCode {
    let cli = Cli::parse();

    let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("Error: failed to start async runtime: {}", e);
            return ExitCode::from(1);
        }
    };

    match runtime.block_on(execute(cli)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            log::error!("{}", e);
            e.report();
            e.exit_code()
        }
    }
}

async fn execute(cli: Cli) -> Result<(), CliError> {
    let settings = Settings::load(cli.config.as_deref())?;
    let pipeline = build_pipeline(&settings, &ApiKeys::from_env())?;
    let default_mode = settings.default_text_mode;
    let pick_mode = |mode: Option<ModeArg>| mode.map(TranscriptMode::from).unwrap_or(default_mode);

    let result = match cli.command {
        Commands::Generate { file, mode } => {
            let transcript = read_text(file.as_deref()).await?;
            pipeline
                .generate(&transcript, pick_mode(mode))
                .await
                .map(|generated| print_generated(generated, |doc| doc.text))
                .map_err(CliError::from)
        }
        Commands::Transcribe { audio, mode } => {
            let bytes = read_bytes(&audio).await?;
            let clip = AudioClip::from_file_name(&file_name_of(&audio));
            pipeline
                .generate_from_audio(&bytes, &clip, pick_mode(mode))
                .await
                .map(|generated| print_generated(generated, |doc| doc.text))
                .map_err(CliError::from)
        }
        Commands::Extract {
            image,
            markdown,
            table,
        } => extract(&pipeline, image.as_deref(), markdown.as_deref(), table).await,
        Commands::Describe { image } => {
            let image = load_image(&image).await?;
            pipeline
                .describe_image(&image)
                .await
                .map(|narrative| {
                    println!("{}", narrative.document.text);
                    log::info!("{} safety flag(s) raised", narrative.safety_flags);
                })
                .map_err(CliError::from)
        }
        Commands::Audit { file } => {
            let document = read_text(file.as_deref()).await?;
            pipeline
                .audit(&document)
                .await
                .map(|generated| print_generated(generated, |narrative| narrative.document.text))
                .map_err(CliError::from)
        }
        Commands::Chat => chat(&pipeline).await,
    };

    if cli.show_log {
        print_last_log(&pipeline);
    }

    result
}

async fn extract(
    pipeline: &PrescriptionPipeline,
    image: Option<&Path>,
    markdown: Option<&Path>,
    table: bool,
) -> Result<(), CliError> {
    let list = match (image, markdown) {
        (Some(path), _) => {
            let image = load_image(path).await?;
            pipeline.extract_structured(OcrInput::Image(&image)).await?
        }
        (None, markdown) => {
            let text = read_text(markdown).await?;
            pipeline.extract_structured(OcrInput::Markdown(&text)).await?
        }
    };

    if table {
        print!("{}", list.to_markdown_table());
    } else {
        let json = serde_json::to_string_pretty(&list).unwrap_or_default();
        println!("{}", json);
    }
    Ok(())
}

async fn chat(pipeline: &PrescriptionPipeline) -> Result<(), CliError> {
    println!("{}\n", MEDICAL_DISCLAIMER);
    println!("Starters (type the number to send one):");
    for (i, (label, _)) in STARTERS.iter().enumerate() {
        println!("  {}. {}", i + 1, label);
    }
    println!("Commands: /new starts a new case, /quit exits.\n");

    let mut session = ChatSession::new();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        print!("> ");
        let _ = std::io::stdout().flush();

        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => return Err(CliError::Input("stdin".to_string(), e)),
        };

        let message = match line.trim() {
            "/quit" | "/exit" => break,
            "/new" => {
                session = ChatSession::new();
                println!("Started a new session.");
                continue;
            }
            other => match other.parse::<usize>() {
                Ok(n) if (1..=STARTERS.len()).contains(&n) => STARTERS[n - 1].1.to_string(),
                _ => line.clone(),
            },
        };

        match pipeline.chat(&mut session, &message).await {
            Ok(Generated::Document(reply)) => println!("\n{}\n", reply),
            Ok(Generated::Guidance(guidance)) => println!("{}", guidance.message),
            // A failed turn is reported and the session continues.
            Err(e) => CliError::Pipeline(e).report(),
        }
    }

    Ok(())
}

fn print_generated<T, F>(generated: Generated<T>, text_of: F)
where
    F: FnOnce(T) -> String,
{
    match generated {
        Generated::Document(doc) => println!("{}", text_of(doc)),
        Generated::Guidance(guidance) => println!("{}", guidance.message),
    }
}

fn print_last_log(pipeline: &PrescriptionPipeline) {
    let Some(store) = pipeline.request_log_store() else {
        return;
    };
    for log in store.get_logs(Some(1)) {
        match serde_json::to_string_pretty(&log) {
            Ok(json) => eprintln!("{}", json),
            Err(e) => log::warn!("Failed to serialize request log: {}", e),
        }
    }
}

async fn read_text(path: Option<&Path>) -> Result<String, CliError> {
    match path {
        Some(path) => tokio::fs::read_to_string(path)
            .await
            .map_err(|e| CliError::Input(path.display().to_string(), e)),
        None => {
            let mut text = String::new();
            tokio::io::stdin()
                .read_to_string(&mut text)
                .await
                .map_err(|e| CliError::Input("stdin".to_string(), e))?;
            Ok(text)
        }
    }
}

async fn read_bytes(path: &Path) -> Result<Vec<u8>, CliError> {
    tokio::fs::read(path)
        .await
        .map_err(|e| CliError::Input(path.display().to_string(), e))
}

async fn load_image(path: &Path) -> Result<ImageInput, CliError> {
    let bytes = read_bytes(path).await?;
    Ok(ImageInput::from_bytes(
        bytes,
        path.file_name().and_then(|n| n.to_str()),
    ))
}

fn file_name_of(path: &Path) -> String {
    path.file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("audio.wav")
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_extract_requires_an_input() {
        assert!(Cli::try_parse_from(["medscribe", "extract"]).is_err());
        assert!(Cli::try_parse_from(["medscribe", "extract", "--image", "a.png", "--markdown", "a.md"]).is_err());
        assert!(Cli::try_parse_from(["medscribe", "extract", "--markdown", "a.md", "--table"]).is_ok());
    }

    #[test]
    fn test_generate_mode_flag() {
        let cli = Cli::try_parse_from(["medscribe", "--show-log", "generate", "--mode", "permissive"]).unwrap();
        assert!(cli.show_log);
        match cli.command {
            Commands::Generate { mode: Some(mode), file: None } => {
                assert_eq!(TranscriptMode::from(mode), TranscriptMode::PermissiveTranscript)
            }
            _ => panic!("expected generate"),
        }
    }

    #[tokio::test]
    async fn test_input_files_are_read() {
        let dir = tempfile::tempdir().unwrap();
        let transcript = dir.path().join("visit.txt");
        std::fs::write(&transcript, "Doctor: take amoxicillin").unwrap();
        let scan = dir.path().join("scan.bin");
        std::fs::write(&scan, [0x89, b'P', b'N', b'G', 0, 0]).unwrap();

        let text = read_text(Some(&transcript)).await.unwrap();
        assert_eq!(text, "Doctor: take amoxicillin");
        let image = load_image(&scan).await.unwrap();
        assert_eq!(image.mime_type, "image/png");
        assert_eq!(image.len(), 6);

        let missing = dir.path().join("missing.wav");
        match read_bytes(&missing).await {
            Err(CliError::Input(name, _)) => assert!(name.ends_with("missing.wav")),
            other => panic!("expected an input error, got {:?}", other.map(|b| b.len())),
        }
    }

    #[test]
    fn test_exit_codes() {
        let malformed = CliError::Pipeline(PipelineError::PostProcess(
            crate::postprocess::PostProcessError::EmptyOutput,
        ));
        assert_eq!(malformed.exit_code(), ExitCode::from(2));
        let upstream = CliError::Pipeline(PipelineError::NoProvider("OCR"));
        assert_eq!(upstream.exit_code(), ExitCode::from(1));
    }
}
