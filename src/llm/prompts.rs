//! Prompt templates for every pipeline mode.
//!
//! Each mode maps to exactly one [`PromptTemplate`]. Templates carry `{{name}}`
//! placeholders which are filled in a single pass by [`PromptTemplate::render`];
//! substituted values are never re-scanned, so transcript text containing braces
//! cannot be mistaken for a placeholder.

use serde::{Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

use super::CompletionOptions;

/// Marker placed at the start of every safety-flagged line.
pub const WARNING_MARKER: &str = "⚠️";

/// Context used when a chat session has not seen a patient yet.
pub const NO_PATIENT_CONTEXT: &str = "No patient context established yet.";

const PLACEHOLDER_DATE: &str = "current_date";
const PLACEHOLDER_TRANSCRIPT: &str = "transcript";
const PLACEHOLDER_PATIENT_CONTEXT: &str = "patient_context";

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum PromptError {
    #[error("Unresolved placeholder '{{{{{0}}}}}' in {1} template")]
    UnresolvedPlaceholder(String, &'static str),

    #[error("Unterminated placeholder in {0} template")]
    Unterminated(&'static str),
}

/// How the model's answer is expected to be shaped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Text,
    Json,
}

/// Selector for the prompt template and post-processing rules.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PromptMode {
    /// Only explicit facts from the conversation; blanks stay blank.
    StrictTranscript,
    /// Best-effort extraction with placeholder text for unknown fields.
    PermissiveTranscript,
    /// OCR markdown to a raw JSON medication list.
    OcrToJson,
    /// Exhaustive narrative transcription of a prescription image.
    OcrToNarrative,
    /// Re-validation of a previously generated document.
    AuditCorrection,
    /// Free-form clinical assistant conversation.
    ClinicalChat,
}

impl PromptMode {
    pub const ALL: [PromptMode; 6] = [
        PromptMode::StrictTranscript,
        PromptMode::PermissiveTranscript,
        PromptMode::OcrToJson,
        PromptMode::OcrToNarrative,
        PromptMode::AuditCorrection,
        PromptMode::ClinicalChat,
    ];

    pub fn id(&self) -> &'static str {
        match self {
            PromptMode::StrictTranscript => "strict-transcript",
            PromptMode::PermissiveTranscript => "permissive-transcript",
            PromptMode::OcrToJson => "ocr-to-json",
            PromptMode::OcrToNarrative => "ocr-to-narrative",
            PromptMode::AuditCorrection => "audit-correction",
            PromptMode::ClinicalChat => "clinical-chat",
        }
    }

    pub fn output_format(&self) -> OutputFormat {
        match self {
            PromptMode::OcrToJson => OutputFormat::Json,
            _ => OutputFormat::Text,
        }
    }

    /// Sampling parameters for this mode.
    pub fn completion_options(&self) -> CompletionOptions {
        match self {
            PromptMode::StrictTranscript | PromptMode::PermissiveTranscript => CompletionOptions {
                temperature: 0.3,
                max_tokens: 512,
            },
            PromptMode::OcrToJson => CompletionOptions {
                temperature: 0.0,
                max_tokens: 1024,
            },
            PromptMode::OcrToNarrative => CompletionOptions {
                temperature: 0.3,
                max_tokens: 4096,
            },
            PromptMode::AuditCorrection => CompletionOptions {
                temperature: 0.2,
                max_tokens: 2048,
            },
            PromptMode::ClinicalChat => CompletionOptions {
                temperature: 0.6,
                max_tokens: 4096,
            },
        }
    }

    /// The template for this mode.
    pub fn template(&self) -> PromptTemplate {
        match self {
            PromptMode::StrictTranscript => PromptTemplate {
                mode: *self,
                system: STRICT_TRANSCRIPT_SYSTEM,
                human: TRANSCRIPT_HUMAN,
            },
            PromptMode::PermissiveTranscript => PromptTemplate {
                mode: *self,
                system: PERMISSIVE_TRANSCRIPT_SYSTEM,
                human: TRANSCRIPT_HUMAN,
            },
            PromptMode::OcrToJson => PromptTemplate {
                mode: *self,
                system: OCR_TO_JSON_SYSTEM,
                human: OCR_TO_JSON_HUMAN,
            },
            PromptMode::OcrToNarrative => PromptTemplate {
                mode: *self,
                system: OCR_TO_NARRATIVE_SYSTEM,
                human: OCR_TO_NARRATIVE_HUMAN,
            },
            PromptMode::AuditCorrection => PromptTemplate {
                mode: *self,
                system: AUDIT_CORRECTION_SYSTEM,
                human: AUDIT_HUMAN,
            },
            PromptMode::ClinicalChat => PromptTemplate {
                mode: *self,
                system: CLINICAL_CHAT_SYSTEM,
                human: TRANSCRIPT_HUMAN,
            },
        }
    }
}

impl Serialize for PromptMode {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.id())
    }
}

impl fmt::Display for PromptMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.id())
    }
}

impl FromStr for PromptMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase().replace('_', "-");
        match normalized.as_str() {
            "strict-transcript" | "strict" => Ok(PromptMode::StrictTranscript),
            "permissive-transcript" | "permissive" => Ok(PromptMode::PermissiveTranscript),
            "ocr-to-json" | "json" => Ok(PromptMode::OcrToJson),
            "ocr-to-narrative" | "narrative" => Ok(PromptMode::OcrToNarrative),
            "audit-correction" | "audit" => Ok(PromptMode::AuditCorrection),
            "clinical-chat" | "chat" => Ok(PromptMode::ClinicalChat),
            other => Err(format!("Unknown prompt mode: {}", other)),
        }
    }
}

/// Values available to template placeholders.
#[derive(Debug, Clone)]
pub struct PromptContext<'a> {
    pub current_date: String,
    /// Transcript, OCR markdown, document under audit, or chat message.
    pub body: &'a str,
    pub patient_context: Option<&'a str>,
}

impl<'a> PromptContext<'a> {
    /// Context dated today (local time, `YYYY-MM-DD`).
    pub fn new(body: &'a str) -> Self {
        Self {
            current_date: chrono::Local::now().format("%Y-%m-%d").to_string(),
            body,
            patient_context: None,
        }
    }

    pub fn with_date(mut self, date: impl Into<String>) -> Self {
        self.current_date = date.into();
        self
    }

    pub fn with_patient_context(mut self, patient_context: Option<&'a str>) -> Self {
        self.patient_context = patient_context;
        self
    }

    fn lookup(&self, name: &str) -> Option<&str> {
        match name {
            PLACEHOLDER_DATE => Some(self.current_date.as_str()),
            PLACEHOLDER_TRANSCRIPT => Some(self.body),
            PLACEHOLDER_PATIENT_CONTEXT => Some(self.patient_context.unwrap_or(NO_PATIENT_CONTEXT)),
            _ => None,
        }
    }
}

/// A fully substituted system prompt plus the human-turn payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedPrompt {
    pub mode: PromptMode,
    pub system: String,
    pub user: String,
}

/// Parameterized system + human prompt pair.
#[derive(Debug, Clone, Copy)]
pub struct PromptTemplate {
    pub mode: PromptMode,
    pub system: &'static str,
    pub human: &'static str,
}

impl PromptTemplate {
    pub fn render(&self, ctx: &PromptContext<'_>) -> Result<RenderedPrompt, PromptError> {
        Ok(RenderedPrompt {
            mode: self.mode,
            system: substitute(self.system, self.mode.id(), ctx)?,
            user: substitute(self.human, self.mode.id(), ctx)?,
        })
    }
}

fn substitute(
    template: &str,
    template_name: &'static str,
    ctx: &PromptContext<'_>,
) -> Result<String, PromptError> {
    let mut out = String::with_capacity(template.len() + ctx.body.len());
    let mut rest = template;

    while let Some(start) = rest.find("{{") {
        out.push_str(&rest[..start]);
        let after_open = &rest[start + 2..];
        let end = after_open
            .find("}}")
            .ok_or(PromptError::Unterminated(template_name))?;
        let name = after_open[..end].trim();
        let value = ctx
            .lookup(name)
            .ok_or_else(|| PromptError::UnresolvedPlaceholder(name.to_string(), template_name))?;
        out.push_str(value);
        rest = &after_open[end + 2..];
    }
    out.push_str(rest);

    Ok(out)
}

/// Render the template for `mode`.
pub fn render_prompt(mode: PromptMode, ctx: &PromptContext<'_>) -> Result<RenderedPrompt, PromptError> {
    mode.template().render(ctx)
}

const TRANSCRIPT_HUMAN: &str = "{{transcript}}";

const STRICT_TRANSCRIPT_SYSTEM: &str = r#"You are a meticulous medical AI that generates prescriptions ONLY from explicit clinical conversations. Follow these rules:

1. NEVER invent patient details, medications, or diagnoses
2. If information is missing, leave the field blank
3. Flag inconsistencies clearly
4. Use exact terminology from the conversation

--- PRESCRIPTION TEMPLATE ---

Patient Name: [ONLY if mentioned explicitly]

UHID: ___________________
Age/Sex: [ONLY if specified]
Date: {{current_date}}
Doctor: [If mentioned]

### Chief Complaints
[Extract ONLY if the patient describes symptoms]

### Observations
[Blood pressure, temperature etc. ONLY if measured]

### Diagnosis
[ONLY if the doctor states a diagnosis]

### Medications
| Drug Name | Dose | Frequency | Duration |
|-----------|------|-----------|----------|
[List ONLY medications with complete details]

### Follow-up
[ONLY if specified]

--- RULES ---
* If the conversation doesn't contain medical information, return:
  "❌ No clinical content found. This appears to be: [brief reason]"
* If medication details are incomplete, add:
  "⚠️ Verify: [drug name] requires dosage/frequency"
* Never guess allergies or medical history

--- TRANSCRIPT ---
{{transcript}}
"#;

const PERMISSIVE_TRANSCRIPT_SYSTEM: &str = r#"You are a medical documentation assistant. Convert the doctor-patient conversation below into a complete, structured prescription. Extract as much as the conversation supports and make a best effort for everything else.

--- PRESCRIPTION TEMPLATE ---

Patient Name: [name, or "Unknown Patient"]
UHID: ___________________
Age/Sex: [age and sex, or "Adult/Unknown"]
Date: {{current_date}}
Doctor: [name, or "Attending Physician"]

### Chief Complaints
[Symptoms described by the patient, or "Not mentioned"]

### Observations
[Vitals and examination findings, or "Not mentioned"]

### Diagnosis
[Stated or most likely working diagnosis, or "Not mentioned"]

### Medications
| Drug Name | Dose | Frequency | Duration |
|-----------|------|-----------|----------|
[Every medication discussed; use "Unknown" for any missing detail]

### Advice
[Lifestyle or care instructions, or "Not mentioned"]

### Follow-up
[Follow-up plan, or "As needed"]

--- RULES ---
* Never leave a field empty; use the placeholder text shown above instead.
* Keep medication names exactly as spoken.
* If medication details are incomplete, add:
  "⚠️ Verify: [drug name] requires dosage/frequency"

--- TRANSCRIPT ---
{{transcript}}
"#;

const OCR_TO_JSON_SYSTEM: &str = r#"You are a clinical data extraction engine. You receive the OCR markdown of a scanned or handwritten prescription and return the medications it lists.

Respond with a single raw JSON object and nothing else: no prose, no explanation, no markdown, no code fence.
The object must have exactly this shape:

{"prescription": [{"medication": "<name>", "dosage": "<strength and unit>", "frequency": "<how often>", "instruction": "<optional extra instruction>"}]}

Rules:
* "prescription" is the only top-level key.
* Every entry must have "medication", "dosage" and "frequency" as strings. Use "Unclear" when a value cannot be read.
* "instruction" is optional; omit it when the prescription gives no extra instruction.
* Keep abbreviations such as BID, TDS, OD exactly as written.
* If no medication can be found, return {"prescription": []}.
"#;

const OCR_TO_JSON_HUMAN: &str = "OCR markdown of the prescription:\n\n{{transcript}}";

const OCR_TO_NARRATIVE_HUMAN: &str =
    "Transcribe the attached prescription image following the structure above.";

const OCR_TO_NARRATIVE_SYSTEM: &str = r#"You are an expert pharmacist transcribing a prescription image. Produce an exhaustive, structured transcription that a clinician can verify line by line. Date of review: {{current_date}}.

--- OUTPUT STRUCTURE ---

## Prescriber
Name, qualification, registration number, clinic, contact.

## Patient
Name, age, sex, weight, date of the prescription.

## Diagnosis / Clinical Notes
Everything written about the condition.

## Medications
For every medication give: name (as written and generic name), strength, dosage form, route, dose, frequency, timing relative to food, duration, quantity, special instructions.

## Investigations & Advice
Tests ordered, lifestyle advice, follow-up date.

## Abbreviations & Technical Terms Explained
Every abbreviation or technical term used above with its plain-language meaning (e.g. BID = twice daily).

## Safety Flags
Review the whole prescription for:
- drug-drug interactions
- drug-disease contraindications
- overdose risk or doses outside usual ranges
- duplicate therapy from the same drug class
- allergy conflicts with any allergy written on the prescription
- missing fields required for safe dispensing
Start every flagged line with "⚠️". If nothing is flagged write "No obvious errors detected".

--- FIELD RULES ---
* When a field is missing but can be inferred from context, fill it and tag it "(inferred)".
* When a field is ambiguous, give your best guess and tag it "(uncertain)" or "(possible)".
* Never leave a field blank; use "Unclear" only as a last resort.
* Do not add medications that are not on the prescription.
"#;

const AUDIT_CORRECTION_SYSTEM: &str = r#"You are a senior clinical pharmacist auditing a prescription that was generated by an AI assistant. Review date: {{current_date}}.

Re-validate the document you are given:
1. Correct medication names to their standard spelling and dosages to standard units and conventions.
2. Expand every abbreviation on first use (e.g. "BID (twice daily)").
3. Flag safety issues: drug-drug interactions, contraindications, doses outside usual ranges, duplicate therapy, and missing dose, frequency or duration. Start every flagged line with "⚠️".
4. Never invent patient details or medications that are not in the document.

Re-emit the corrected document using the same sections and layout as the input.
End with a line of the form "Summary: N flag(s) found". If there is nothing to flag, write "No obvious errors detected" before the summary line.
"#;

const AUDIT_HUMAN: &str = "Document to audit:\n\n{{transcript}}";

const CLINICAL_CHAT_SYSTEM: &str = r#"You are MediScribe AI, a specialized clinical assistant designed to help doctors with prescription documentation and patient management. Follow these guidelines:

1. **Professional Communication**:
- Use formal medical terminology appropriately
- Maintain a professional, respectful tone
- Structure information clearly for clinical documentation

2. **Clinical Responsibilities**:
- NEVER diagnose conditions or suggest treatments unprompted
- Only provide medication information when asked
- Clarify when information is outside your scope

3. **Prescription Formatting**:
- Structure prescriptions with:
  * Patient demographics
  * Vital signs (when available)
  * Diagnosis (only if provided by doctor)
  * Medications with precise:
    - Name (generic when possible)
    - Dosage
    - Frequency
    - Duration
    - Route of administration
  * Follow-up instructions

4. **Safety Protocols**:
- Flag potential drug interactions when medication lists are provided
- Note common side effects if asked
- Highlight need for dosage adjustments in special populations

5. **Workflow Integration**:
- Ask clarifying questions when information is unclear
- Summarize key points for verification
- Allow easy editing of generated content

Current patient context: {{patient_context}}"#;
