//! Prompt construction for the structured-output validation calls.
//!
//! The initial prompt restates the target schema around the raw vision
//! text. The retry prompt is stricter: it names every field with its type
//! and one exemplar value, and repeats the prior failure so the model can
//! correct itself.

pub const VALIDATION_SYSTEM_PROMPT: &str =
    "You are a medical data validator. You convert free-form radiology analysis \
     into structured JSON. Output valid JSON only.";

/// Target schema, restated verbatim in every prompt.
const VALIDATION_SCHEMA: &str = r#"{
  "type": "object",
  "properties": {
    "patient_id": {"type": "string"},
    "findings": {
      "type": "array",
      "items": {
        "type": "object",
        "properties": {
          "label": {"type": "string", "maxLength": 20},
          "location": {"type": "string"},
          "severity": {"type": "string"}
        },
        "required": ["label", "location", "severity"]
      }
    },
    "confidence_score": {"type": "number", "minimum": 0, "maximum": 1},
    "additional_notes": {"type": "string"}
  },
  "required": ["findings", "confidence_score"]
}"#;

pub fn initial_prompt(raw_analysis: &str, patient_id: Option<&str>) -> String {
    format!(
        "Convert this medical image analysis into structured JSON.

SCHEMA REQUIREMENTS:
{schema}

RAW ANALYSIS:
{raw_analysis}

PATIENT ID: {patient}

INSTRUCTIONS:
1. Extract ALL medical findings mentioned in the analysis
2. For each finding provide:
   - label: the condition or finding, at most 20 characters (e.g. \"Pneumothorax\")
   - location: anatomical location (e.g. \"Right lung apex\", \"Overall\")
   - severity: severity level (e.g. \"Severe\", \"Moderate\", \"Mild\", \"None\")
3. Estimate confidence_score (0.0-1.0) from the analysis clarity, hedging
   language and number of findings
4. Put any important context not captured by findings into additional_notes
5. If NO abnormality is described, emit ONE finding:
   label \"Normal\", location \"Overall\", severity \"None\"

CRITICAL RULES:
- confidence_score MUST be a number between 0.0 and 1.0
- every finding label MUST be 20 characters or fewer

Return ONLY valid JSON matching the schema. No markdown, no explanations.",
        schema = VALIDATION_SCHEMA,
        patient = patient_id.unwrap_or("AUTO-GENERATED"),
    )
}

pub fn retry_prompt(
    raw_analysis: &str,
    patient_id: Option<&str>,
    attempt: u32,
    last_error: &str,
) -> String {
    format!(
        "RETRY VALIDATION (attempt {attempt}): the previous attempt failed with:
{last_error}

Be EXTRA careful with types and required fields:
- confidence_score: NUMBER between 0.0 and 1.0, exemplar 0.85, NOT \"0.85\"
- findings: ARRAY of objects, exemplar [{{\"label\": \"Pneumothorax\", \"location\": \"Right lung\", \"severity\": \"Moderate\"}}]
- findings[].label: STRING of at most 20 characters, exemplar \"Pleural effusion\"
- findings[].location: STRING, exemplar \"Left lower lobe\"
- findings[].severity: STRING, exemplar \"Mild\"
- patient_id: STRING, exemplar \"42\"
- additional_notes: STRING or omitted, exemplar \"Limited by motion artifact\"

RAW ANALYSIS:
{raw_analysis}

PATIENT ID: {patient}

SCHEMA (follow exactly):
{schema}

Double-check every field type against the exemplars above.
Return ONLY valid JSON. No markdown, no explanations.",
        schema = VALIDATION_SCHEMA,
        patient = patient_id.unwrap_or("UNKNOWN"),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn initial_prompt_embeds_analysis_and_schema() {
        let p = initial_prompt("Small right pneumothorax noted.", Some("42"));
        assert!(p.contains("Small right pneumothorax noted."));
        assert!(p.contains("confidence_score"));
        assert!(p.contains("PATIENT ID: 42"));
    }

    #[test]
    fn initial_prompt_without_patient_hint() {
        let p = initial_prompt("text", None);
        assert!(p.contains("PATIENT ID: AUTO-GENERATED"));
    }

    #[test]
    fn retry_prompt_repeats_failure_and_exemplars() {
        let p = retry_prompt("text", Some("7"), 2, "confidence_score must be within [0, 1]");
        assert!(p.contains("attempt 2"));
        assert!(p.contains("confidence_score must be within [0, 1]"));
        assert!(p.contains("exemplar 0.85"));
        assert!(p.contains("\"Pleural effusion\""));
    }
}
