//! Conversational session state for the clinical chat assistant.

use crate::llm::{ChatRole, ChatTurn};
use uuid::Uuid;

/// Number of prior turns kept and replayed to the model.
pub const MAX_HISTORY_TURNS: usize = 20;

/// Shown once when a chat session starts.
pub const MEDICAL_DISCLAIMER: &str = "**Medical Use Disclaimer**:\n\
This AI assistant is designed to support clinical documentation only.\n\
- All outputs must be reviewed by a licensed physician\n\
- Never rely solely on AI-generated medical content\n\
- You remain responsible for all clinical decisions";

/// Reply to an empty chat message.
pub const EMPTY_MESSAGE_GUIDANCE: &str =
    "⚠️ Empty message. Describe the patient or ask a clinical question to continue.";

/// Suggested opening messages as (label, message).
pub const STARTERS: [(&str, &str); 5] = [
    (
        "New Prescription",
        "I need to create a new prescription. Please ask me for the necessary patient details.",
    ),
    (
        "Drug Interaction Check",
        "Please check for potential interactions between aspirin, ramipril, and metformin.",
    ),
    (
        "SOAP Note Generator",
        "I need a SOAP note for a patient presenting with hypertension. Ask for details.",
    ),
    (
        "Patient Education",
        "Create a patient-friendly explanation of how to use an insulin pen safely.",
    ),
    (
        "Flag Special Populations",
        "The patient is pregnant. Can you check if her medications are safe during pregnancy?",
    ),
];

/// Substrings (matched on the lower-cased message) that mark a message as
/// introducing a new patient.
const NEW_PATIENT_MARKERS: [&str; 2] = ["patient:", "new case"];

/// Whether a message looks like it introduces a new patient.
pub fn introduces_patient(message: &str) -> bool {
    let lowered = message.to_lowercase();
    NEW_PATIENT_MARKERS
        .iter()
        .any(|marker| lowered.contains(marker))
}

/// State owned by one chat conversation.
///
/// The patient context is last-write-wins: every message that matches the
/// new-patient heuristic replaces it verbatim. It is dropped with the session.
#[derive(Debug, Clone)]
pub struct ChatSession {
    id: Uuid,
    patient_context: Option<String>,
    history: Vec<ChatTurn>,
}

impl ChatSession {
    pub fn new() -> Self {
        Self {
            id: Uuid::new_v4(),
            patient_context: None,
            history: Vec::new(),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn patient_context(&self) -> Option<&str> {
        self.patient_context.as_deref()
    }

    /// Prior turns, oldest first.
    pub fn history(&self) -> &[ChatTurn] {
        &self.history
    }

    /// Apply the new-patient heuristic to a message. Returns true when the
    /// context was replaced.
    pub fn observe_message(&mut self, message: &str) -> bool {
        if introduces_patient(message) {
            self.patient_context = Some(message.to_string());
            true
        } else {
            false
        }
    }

    /// Record a completed exchange, dropping the oldest turns past the cap.
    pub fn record_exchange(&mut self, user_message: &str, reply: &str) {
        self.history.push(ChatTurn {
            role: ChatRole::User,
            content: user_message.to_string(),
        });
        self.history.push(ChatTurn {
            role: ChatRole::Assistant,
            content: reply.to_string(),
        });
        if self.history.len() > MAX_HISTORY_TURNS {
            let excess = self.history.len() - MAX_HISTORY_TURNS;
            self.history.drain(..excess);
        }
    }
}

impl Default for ChatSession {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_patient_marker_sets_context_verbatim() {
        let mut session = ChatSession::new();
        let message = "patient: John Doe, 45M, complains of chest pain for 2 days";
        assert!(session.observe_message(message));
        assert_eq!(session.patient_context(), Some(message));
    }

    #[test]
    fn test_markers_are_case_insensitive_and_last_write_wins() {
        let mut session = ChatSession::new();
        session.observe_message("Patient: Jane, 30F");
        session.observe_message("NEW CASE - child with fever");
        assert_eq!(session.patient_context(), Some("NEW CASE - child with fever"));

        assert!(!session.observe_message("what is the max dose of ibuprofen?"));
        assert_eq!(session.patient_context(), Some("NEW CASE - child with fever"));
    }

    #[test]
    fn test_history_is_bounded() {
        let mut session = ChatSession::new();
        for i in 0..15 {
            session.record_exchange(&format!("q{}", i), &format!("a{}", i));
        }
        assert_eq!(session.history().len(), MAX_HISTORY_TURNS);
        assert_eq!(session.history()[0].content, "q5");
        assert_eq!(session.history()[0].role, ChatRole::User);
        assert_eq!(session.history().last().map(|t| t.content.as_str()), Some("a14"));
    }

    #[test]
    fn test_sessions_are_independent() {
        let mut a = ChatSession::new();
        let b = ChatSession::new();
        a.observe_message("patient: A");
        assert_ne!(a.id(), b.id());
        assert!(b.patient_context().is_none());
    }
}
