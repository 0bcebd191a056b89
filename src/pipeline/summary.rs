//! Clinical summary generation for the production row description.

use std::sync::Arc;

use crate::llm::{GenerationConfig, LlmClient};
use crate::models::{Annotation, ClinicalSummary, MAX_KEY_FINDINGS};

const SUMMARY_TEMPERATURE: f32 = 0.2;

const SUMMARY_SYSTEM_PROMPT: &str =
    "You are a radiologist creating concise clinical summaries for medical \
     image annotations. Output valid JSON only.";

pub struct SummaryGenerator {
    llm: Arc<dyn LlmClient>,
}

impl SummaryGenerator {
    pub fn new(llm: Arc<dyn LlmClient>) -> Self {
        Self { llm }
    }

    /// Produce a validated summary; never fails. Any model or validation
    /// problem degrades to the deterministic minimal summary.
    pub fn summarize(&self, annotation: &Annotation) -> ClinicalSummary {
        let prompt = build_summary_prompt(annotation);

        let response = match self.llm.generate(
            &prompt,
            SUMMARY_SYSTEM_PROMPT,
            &GenerationConfig::json(SUMMARY_TEMPERATURE),
        ) {
            Ok(response) => response,
            Err(e) => {
                tracing::warn!(error = %e, "Summary LLM call failed, using minimal summary");
                return minimal_summary(annotation);
            }
        };

        match serde_json::from_str::<ClinicalSummary>(response.trim()) {
            Ok(summary) if summary.validate().is_ok() => {
                tracing::info!(diagnosis = %summary.primary_diagnosis, "Clinical summary generated");
                summary
            }
            Ok(summary) => {
                tracing::warn!(
                    error = %summary.validate().unwrap_err(),
                    "Summary violated constraints, using minimal summary"
                );
                minimal_summary(annotation)
            }
            Err(e) => {
                tracing::warn!(error = %e, "Summary response was not valid JSON, using minimal summary");
                minimal_summary(annotation)
            }
        }
    }
}

fn build_summary_prompt(annotation: &Annotation) -> String {
    let findings_json = serde_json::to_string_pretty(&annotation.findings).unwrap_or_default();

    let mut prompt = format!(
        "CONTEXT:
Findings: {findings_json}
Confidence Score: {confidence:.2}
Additional Notes: {notes}
",
        confidence = annotation.confidence_score,
        notes = annotation.additional_notes.as_deref().unwrap_or("None"),
    );

    if let Some(urgency) = annotation.urgency_level {
        prompt.push_str(&format!("Urgency: {}\n", urgency.as_str()));
    }
    if let Some(significance) = annotation.clinical_significance {
        prompt.push_str(&format!("Clinical Significance: {}\n", significance.as_str()));
    }
    if let Some(ref report) = annotation.gemini_report {
        let head: String = report.chars().take(1000).collect();
        prompt.push_str(&format!("\nProfessional Report:\n{head}\n"));
    }

    prompt.push_str(
        r#"
TASK:
Generate a concise clinical summary as JSON with these fields:
- primary_diagnosis: single most important finding, at most 100 characters
  (e.g. "Right Lower Lobe Pneumonia", "Normal Study")
- summary: 2-4 sentences covering what was found and its clinical
  significance, at most 3500 characters
- key_findings: array of at most 5 specific observations, each naming
  location and severity where known
- recommendations: next steps, at most 500 characters, or null for a
  normal study
- confidence_note: at most 200 characters, only when confidence < 0.8 or
  limitations exist, else null

EXAMPLE OUTPUT:
{
  "primary_diagnosis": "Right Pneumothorax",
  "summary": "Moderate right-sided pneumothorax identified with approximately 30% lung collapse. No mediastinal shift observed. Patient requires immediate clinical correlation.",
  "key_findings": [
    "Right pneumothorax with 30% lung collapse",
    "No mediastinal shift",
    "Clear costophrenic angles bilaterally"
  ],
  "recommendations": "Immediate chest tube placement may be required.",
  "confidence_note": null
}

Return ONLY valid JSON. No markdown, no explanations.
"#,
    );
    prompt
}

/// Deterministic summary assembled straight from the annotation.
pub fn minimal_summary(annotation: &Annotation) -> ClinicalSummary {
    let primary_diagnosis = annotation
        .findings
        .first()
        .map(|f| f.label.clone())
        .unwrap_or_else(|| "No findings".to_string());

    let summary = if annotation.findings.is_empty() {
        "Automated analysis completed without structured findings.".to_string()
    } else {
        let sentences: Vec<String> = annotation
            .findings
            .iter()
            .map(|f| format!("{} in {} (severity: {}).", f.label, f.location, f.severity))
            .collect();
        format!("Automated analysis identified: {}", sentences.join(" "))
    };

    let key_findings: Vec<String> = annotation
        .findings
        .iter()
        .take(MAX_KEY_FINDINGS)
        .map(|f| format!("{} ({})", f.label, f.location))
        .collect();

    let confidence_note = (annotation.confidence_score < 0.8).then(|| {
        format!(
            "Automated confidence {:.2}; human review recommended.",
            annotation.confidence_score
        )
    });

    ClinicalSummary {
        primary_diagnosis,
        summary,
        key_findings,
        recommendations: None,
        confidence_note,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::MockLlmClient;
    use crate::models::Finding;

    fn annotation_with(findings: Vec<Finding>, confidence: f64) -> Annotation {
        Annotation {
            patient_id: None,
            findings,
            confidence_score: confidence,
            generated_by: "medgemma/gemini".into(),
            additional_notes: None,
            gemini_enhanced: false,
            gemini_report: None,
            urgency_level: None,
            clinical_significance: None,
        }
    }

    #[test]
    fn valid_model_summary_accepted() {
        let response = r#"{
            "primary_diagnosis": "Right Pneumothorax",
            "summary": "Moderate right-sided pneumothorax.",
            "key_findings": ["Right pneumothorax"],
            "recommendations": null,
            "confidence_note": null
        }"#;
        let generator = SummaryGenerator::new(Arc::new(MockLlmClient::new(response)));
        let ann = annotation_with(vec![Finding::new("Pneumothorax", "Right lung", "Moderate")], 0.9);

        let summary = generator.summarize(&ann);
        assert_eq!(summary.primary_diagnosis, "Right Pneumothorax");
    }

    #[test]
    fn six_key_findings_degrade_to_minimal() {
        let response = r#"{
            "primary_diagnosis": "Pneumonia",
            "summary": "Findings as listed.",
            "key_findings": ["a", "b", "c", "d", "e", "f"]
        }"#;
        let generator = SummaryGenerator::new(Arc::new(MockLlmClient::new(response)));
        let ann = annotation_with(vec![Finding::new("Pneumonia", "Right base", "Mild")], 0.9);

        let summary = generator.summarize(&ann);
        assert_eq!(summary.primary_diagnosis, "Pneumonia");
        assert!(summary.key_findings.len() <= 5);
        assert!(summary.validate().is_ok());
    }

    #[test]
    fn llm_failure_yields_minimal_summary() {
        let generator = SummaryGenerator::new(Arc::new(MockLlmClient::unavailable()));
        let ann = annotation_with(
            vec![
                Finding::new("Effusion", "Left base", "Mild"),
                Finding::new("Consolidation", "Right base", "Moderate"),
            ],
            0.6,
        );

        let summary = generator.summarize(&ann);
        assert_eq!(summary.primary_diagnosis, "Effusion");
        assert!(summary.summary.contains("Effusion in Left base"));
        assert_eq!(summary.key_findings.len(), 2);
        assert!(summary.confidence_note.is_some());
        assert!(summary.validate().is_ok());
    }

    #[test]
    fn minimal_summary_with_no_findings() {
        let summary = minimal_summary(&annotation_with(vec![], 0.0));
        assert_eq!(summary.primary_diagnosis, "No findings");
        assert!(summary.key_findings.is_empty());
        assert!(summary.confidence_note.is_some());
    }

    #[test]
    fn minimal_summary_caps_key_findings_at_five() {
        let findings = (0..8)
            .map(|i| Finding::new(&format!("Nodule {i}"), "Lung", "Small"))
            .collect();
        let summary = minimal_summary(&annotation_with(findings, 0.9));
        assert_eq!(summary.key_findings.len(), 5);
        assert!(summary.confidence_note.is_none());
    }

    #[test]
    fn non_json_response_degrades_to_minimal() {
        let generator = SummaryGenerator::new(Arc::new(MockLlmClient::new("not json at all")));
        let ann = annotation_with(vec![Finding::new("Fracture", "Left femur", "Severe")], 0.85);
        let summary = generator.summarize(&ann);
        assert_eq!(summary.primary_diagnosis, "Fracture");
    }
}
