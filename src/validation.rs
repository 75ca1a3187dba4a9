//! Transcript validation performed before any model is called.
//!
//! Empty and near-empty transcripts are answered locally with guidance text so a
//! paid model call is never spent on silence or background noise.

/// Minimum number of whitespace-separated tokens a transcript needs.
pub const MIN_TRANSCRIPT_TOKENS: usize = 10;

/// Result of checking a transcript.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TranscriptCheck {
    /// Absent, or only whitespace.
    Empty,
    /// Fewer than [`MIN_TRANSCRIPT_TOKENS`] tokens.
    TooShort,
    Valid,
}

impl TranscriptCheck {
    pub fn is_valid(&self) -> bool {
        matches!(self, TranscriptCheck::Valid)
    }
}

/// Classify a transcript.
pub fn check_transcript(transcript: Option<&str>) -> TranscriptCheck {
    let trimmed = match transcript.map(str::trim) {
        Some(t) if !t.is_empty() => t,
        _ => return TranscriptCheck::Empty,
    };

    if trimmed.split_whitespace().count() < MIN_TRANSCRIPT_TOKENS {
        TranscriptCheck::TooShort
    } else {
        TranscriptCheck::Valid
    }
}

/// Guidance returned when no conversation was detected.
pub const EMPTY_TRANSCRIPT_GUIDANCE: &str = "⚠️ No conversation detected. Please ensure:\n\
1. The audio was recorded properly\n\
2. The consultation contained clear medical discussion\n\
3. Background noise wasn't too loud\n\n\
Try recording again or upload a different file.";

/// Guidance returned when the transcript is too short to build a prescription from.
pub fn insufficient_content_guidance(transcript: &str) -> String {
    format!(
        "⚠️ Insufficient medical conversation detected. Found only:\n\n'{}'\n\n\
Please verify the audio quality and ensure it contains a complete doctor-patient consultation.",
        transcript.trim()
    )
}
