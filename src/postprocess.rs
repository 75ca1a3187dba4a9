//! Deterministic post-processing of raw model output.
//!
//! Text documents get a verification banner when the model signals missing
//! information. Structured extraction output is unwrapped from a markdown code
//! fence and parsed into a [`MedicationList`].
//!
//! The incompleteness check is a plain substring heuristic over the model's
//! wording. It is not semantic verification: a placeholder such as
//! "Unknown Patient" triggers it, and phrasings like "not specified" slip past.

use serde::{Deserialize, Serialize};

/// Appended (after a blank line) to documents that mention missing information.
pub const INCOMPLETE_BANNER: &str =
    "⚠️ NOTE: Incomplete prescription - verify all blank fields with the patient";

/// U+26A0. Models emit it with or without the emoji variation selector.
const WARNING_SIGN: char = '\u{26A0}';

/// Case-insensitive phrases that mark a document as incomplete.
const INCOMPLETE_SIGNALS: [&str; 2] = ["unknown", "not mentioned"];

#[derive(Debug, thiserror::Error)]
pub enum PostProcessError {
    #[error("Model returned an empty response")]
    EmptyOutput,

    #[error("Model output is not a valid medication list: {0}")]
    MalformedJson(String),
}

/// Whether the output contains any of the incomplete-information signals.
pub fn is_incomplete(output: &str) -> bool {
    let lowered = output.to_lowercase();
    INCOMPLETE_SIGNALS
        .iter()
        .any(|signal| lowered.contains(signal))
}

/// Append [`INCOMPLETE_BANNER`] when the output looks incomplete.
///
/// Returns the document and whether the banner was added. Clean output is
/// returned unchanged.
pub fn annotate_incomplete(output: &str) -> (String, bool) {
    if is_incomplete(output) {
        (format!("{}\n\n{}", output, INCOMPLETE_BANNER), true)
    } else {
        (output.to_string(), false)
    }
}

/// Count lines flagged with the warning marker, allowing a leading list bullet.
pub fn count_safety_flags(document: &str) -> usize {
    document
        .lines()
        .map(str::trim_start)
        .map(|line| {
            line.strip_prefix("- ")
                .or_else(|| line.strip_prefix("* "))
                .unwrap_or(line)
        })
        .filter(|line| line.starts_with(WARNING_SIGN))
        .count()
}

/// Remove one surrounding markdown code fence, with or without a `json` tag.
///
/// Only a fence that wraps the whole (trimmed) text is removed; anything else
/// is returned trimmed but otherwise untouched so that stray prose fails to parse.
pub fn strip_code_fence(raw: &str) -> &str {
    let trimmed = raw.trim();
    let Some(body) = trimmed
        .strip_prefix("```")
        .and_then(|after_open| after_open.strip_suffix("```"))
    else {
        return trimmed;
    };

    // The tag may sit on its own line or directly before the payload.
    let inner = strip_json_tag(body);
    if inner.is_empty() || inner.starts_with('{') || inner.starts_with('[') {
        inner
    } else {
        trimmed
    }
}

fn strip_json_tag(body: &str) -> &str {
    let body = body.trim_start();
    match body.get(..4) {
        Some(tag) if tag.eq_ignore_ascii_case("json") => body[4..].trim(),
        _ => body.trim(),
    }
}

/// One medication line of a structured prescription.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MedicationRecord {
    pub medication: String,
    pub dosage: String,
    pub frequency: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instruction: Option<String>,
}

/// Structured extraction result: `{ "prescription": [ ... ] }`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MedicationList {
    pub prescription: Vec<MedicationRecord>,
}

impl MedicationList {
    pub fn len(&self) -> usize {
        self.prescription.len()
    }

    pub fn is_empty(&self) -> bool {
        self.prescription.is_empty()
    }

    /// Render as a markdown table, one row per medication.
    pub fn to_markdown_table(&self) -> String {
        let mut table = String::from(
            "| Medication | Dosage | Frequency | Instruction |\n|---|---|---|---|\n",
        );
        for record in &self.prescription {
            let instruction = record
                .instruction
                .as_deref()
                .filter(|s| !s.trim().is_empty())
                .unwrap_or("—");
            table.push_str(&format!(
                "| {} | {} | {} | {} |\n",
                table_cell(&record.medication),
                table_cell(&record.dosage),
                table_cell(&record.frequency),
                table_cell(instruction),
            ));
        }
        table
    }
}

fn table_cell(value: &str) -> String {
    let value = value.trim();
    if value.is_empty() {
        return "—".to_string();
    }
    value.replace('|', "\\|").replace('\n', " ")
}

/// Strip a code fence from model output and parse the medication list.
pub fn parse_medication_list(raw: &str) -> Result<MedicationList, PostProcessError> {
    let body = strip_code_fence(raw);
    if body.is_empty() {
        return Err(PostProcessError::EmptyOutput);
    }
    serde_json::from_str(body).map_err(|e| PostProcessError::MalformedJson(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    const METFORMIN: &str =
        r#"{"prescription":[{"medication":"Metformin","dosage":"500 mg","frequency":"BID"}]}"#;

    #[test]
    fn test_clean_output_is_unchanged() {
        let raw = "Patient: Jane Roe\nAmoxicillin 500 mg TID for 7 days";
        assert_eq!(annotate_incomplete(raw), (raw.to_string(), false));
    }

    #[test]
    fn test_banner_appended_case_insensitively() {
        for raw in ["Allergies: UNKNOWN", "Duration: Not Mentioned"] {
            let (doc, appended) = annotate_incomplete(raw);
            assert!(appended);
            assert!(doc.starts_with(raw));
            assert!(doc.ends_with(INCOMPLETE_BANNER));
        }
    }

    // Heuristic, not semantic: the permissive placeholder trips it even when
    // nothing clinical is missing.
    #[test]
    fn test_heuristic_false_positive_on_placeholder() {
        assert!(is_incomplete("Name: Unknown Patient\nParacetamol 500 mg PRN"));
    }

    // Heuristic, not semantic: other phrasings of missing data are not caught.
    #[test]
    fn test_heuristic_false_negative_on_other_phrasing() {
        assert!(!is_incomplete("Dosage: not specified\nFrequency: ?"));
    }

    #[test]
    fn test_strip_fence_variants() {
        let json_fenced = format!("```json\n{}\n```", METFORMIN);
        let bare_fenced = format!("```\n{}\n```", METFORMIN);
        let upper_tag = format!("  ```JSON\n{}\n```  ", METFORMIN);
        let one_line = format!("```{}```", METFORMIN);
        let one_line_tagged = format!("```json {}```", METFORMIN);
        let one_line_upper_tag = format!("```JSON{}```", METFORMIN);
        for wrapped in [
            &json_fenced,
            &bare_fenced,
            &upper_tag,
            &one_line,
            &one_line_tagged,
            &one_line_upper_tag,
        ] {
            assert_eq!(strip_code_fence(wrapped), METFORMIN);
        }
        assert_eq!(strip_code_fence(METFORMIN), METFORMIN);
    }

    #[test]
    fn test_other_language_fence_is_kept() {
        let raw = "```python\nprint('hi')\n```";
        assert_eq!(strip_code_fence(raw), raw);
        let jsonl = format!("```jsonl\n{}\n```", METFORMIN);
        assert_eq!(strip_code_fence(&jsonl), jsonl);
    }

    #[test]
    fn test_single_line_tagged_fence_parses() {
        let fenced = parse_medication_list(&format!("```json {}```", METFORMIN)).unwrap();
        assert_eq!(fenced, parse_medication_list(METFORMIN).unwrap());
    }

    #[test]
    fn test_fenced_and_unwrapped_parse_identically() {
        let fenced = parse_medication_list(&format!("```json\n{}\n```", METFORMIN)).unwrap();
        let plain = parse_medication_list(METFORMIN).unwrap();
        assert_eq!(fenced, plain);
        assert_eq!(plain.prescription[0].medication, "Metformin");
        assert_eq!(plain.prescription[0].instruction, None);
    }

    #[test]
    fn test_prose_around_fence_is_rejected() {
        let raw = format!("Here you go:\n```json\n{}\n```", METFORMIN);
        assert!(matches!(
            parse_medication_list(&raw),
            Err(PostProcessError::MalformedJson(_))
        ));
    }

    #[test]
    fn test_extra_top_level_key_is_rejected() {
        let raw = r#"{"prescription":[],"notes":"none"}"#;
        assert!(matches!(
            parse_medication_list(raw),
            Err(PostProcessError::MalformedJson(_))
        ));
    }

    #[test]
    fn test_non_json_and_empty_output() {
        assert!(matches!(
            parse_medication_list("I could not read the image."),
            Err(PostProcessError::MalformedJson(_))
        ));
        assert!(matches!(
            parse_medication_list("```json\n```"),
            Err(PostProcessError::EmptyOutput)
        ));
    }

    #[test]
    fn test_literal_empty_list_is_valid() {
        let list = parse_medication_list(r#"{"prescription": []}"#).unwrap();
        assert!(list.is_empty());
    }

    #[test]
    fn test_markdown_table() {
        let list = MedicationList {
            prescription: vec![
                MedicationRecord {
                    medication: "Metformin".into(),
                    dosage: "500 mg".into(),
                    frequency: "BID".into(),
                    instruction: None,
                },
                MedicationRecord {
                    medication: "Amoxicillin".into(),
                    dosage: "250|500 mg".into(),
                    frequency: "TID".into(),
                    instruction: Some("after food".into()),
                },
            ],
        };
        let table = list.to_markdown_table();
        let lines: Vec<&str> = table.lines().collect();
        assert_eq!(lines.len(), 4);
        assert_eq!(lines[2], "| Metformin | 500 mg | BID | — |");
        assert_eq!(lines[3], "| Amoxicillin | 250\\|500 mg | TID | after food |");
    }

    #[test]
    fn test_count_safety_flags() {
        let doc = "Review\n⚠️ Interaction: warfarin + aspirin\n- ⚠️ Missing duration\n  * ⚠️ Overdose risk\nNo ⚠️ here";
        assert_eq!(count_safety_flags(doc), 3);
        assert_eq!(count_safety_flags("No obvious errors detected"), 0);
    }

    #[test]
    fn test_bare_warning_sign_counts_as_flag() {
        assert_eq!(count_safety_flags("\u{26A0} Interaction: warfarin + aspirin"), 1);
        assert_eq!(count_safety_flags("- \u{26A0}\u{FE0F} Overdose risk\n\u{26A0} Allergy"), 2);
    }
}
