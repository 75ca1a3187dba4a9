//! Binary inputs handed to external services: prescription images and audio clips.

use base64::{engine::general_purpose::STANDARD, Engine};
use std::path::Path;

/// Placeholder stored in request logs instead of base64 payloads.
pub const REDACTED_BINARY: &str = "<base64 omitted>";

/// An image of a prescription (scan or photo).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageInput {
    pub bytes: Vec<u8>,
    pub mime_type: String,
}

impl ImageInput {
    pub fn new(bytes: Vec<u8>, mime_type: impl Into<String>) -> Self {
        Self {
            bytes,
            mime_type: mime_type.into(),
        }
    }

    /// Build from raw bytes, sniffing the MIME type from the file signature and
    /// falling back to the file extension.
    pub fn from_bytes(bytes: Vec<u8>, file_name: Option<&str>) -> Self {
        let mime_type = sniff_image_mime(&bytes)
            .or_else(|| file_name.and_then(image_mime_from_extension))
            .unwrap_or("image/jpeg");
        Self::new(bytes, mime_type)
    }

    pub fn from_path(path: &Path) -> std::io::Result<Self> {
        let bytes = std::fs::read(path)?;
        Ok(Self::from_bytes(bytes, path.file_name().and_then(|n| n.to_str())))
    }

    pub fn base64(&self) -> String {
        STANDARD.encode(&self.bytes)
    }

    /// `data:<mime>;base64,<payload>` form accepted by vision and OCR endpoints.
    pub fn data_url(&self) -> String {
        format!("data:{};base64,{}", self.mime_type, self.base64())
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

fn sniff_image_mime(bytes: &[u8]) -> Option<&'static str> {
    if bytes.starts_with(&[0x89, b'P', b'N', b'G']) {
        Some("image/png")
    } else if bytes.starts_with(&[0xFF, 0xD8, 0xFF]) {
        Some("image/jpeg")
    } else if bytes.starts_with(b"GIF8") {
        Some("image/gif")
    } else if bytes.len() >= 12 && &bytes[0..4] == b"RIFF" && &bytes[8..12] == b"WEBP" {
        Some("image/webp")
    } else {
        None
    }
}

fn image_mime_from_extension(file_name: &str) -> Option<&'static str> {
    let ext = file_name.rsplit_once('.')?.1.to_ascii_lowercase();
    match ext.as_str() {
        "png" => Some("image/png"),
        "jpg" | "jpeg" => Some("image/jpeg"),
        "gif" => Some("image/gif"),
        "webp" => Some("image/webp"),
        _ => None,
    }
}

/// Metadata for an uploaded audio recording.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioClip {
    pub file_name: String,
    pub mime_type: String,
}

impl Default for AudioClip {
    fn default() -> Self {
        Self {
            file_name: "audio.wav".to_string(),
            mime_type: "audio/wav".to_string(),
        }
    }
}

impl AudioClip {
    /// Derive the clip metadata from a file name.
    pub fn from_file_name(file_name: &str) -> Self {
        let ext = file_name
            .rsplit_once('.')
            .map(|(_, ext)| ext.to_ascii_lowercase())
            .unwrap_or_default();
        let mime_type = match ext.as_str() {
            "mp3" | "mpga" | "mpeg" => "audio/mpeg",
            "m4a" | "mp4" => "audio/mp4",
            "ogg" | "oga" => "audio/ogg",
            "webm" => "audio/webm",
            "flac" => "audio/flac",
            _ => "audio/wav",
        };
        Self {
            file_name: file_name.to_string(),
            mime_type: mime_type.to_string(),
        }
    }
}
