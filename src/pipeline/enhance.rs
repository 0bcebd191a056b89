//! Optional enhancement stage: professional report plus urgency triage.
//!
//! Failures here are never fatal: the pipeline keeps the unenhanced
//! annotation and moves on.

use std::sync::Arc;

use serde::Deserialize;

use crate::llm::{GenerationConfig, LlmClient, LlmError};
use crate::models::{Annotation, ClinicalSignificance, UrgencyLevel};

const ENHANCE_TEMPERATURE: f32 = 0.3;

/// Enrichment produced by one enhancement pass.
#[derive(Debug, Clone)]
pub struct Enhancement {
    pub report: String,
    pub urgency_level: UrgencyLevel,
    pub clinical_significance: ClinicalSignificance,
}

pub trait Enhancer: Send + Sync {
    fn enhance(&self, annotation: &Annotation) -> Result<Enhancement, LlmError>;
}

/// Apply an enhancement to an annotation, setting the enhanced flag.
pub fn apply_enhancement(annotation: &mut Annotation, enhancement: Enhancement) {
    annotation.gemini_report = Some(enhancement.report);
    annotation.urgency_level = Some(enhancement.urgency_level);
    annotation.clinical_significance = Some(enhancement.clinical_significance);
    annotation.gemini_enhanced = true;
}

/// LLM-backed enhancer: one free-text report call, one JSON triage call.
pub struct GeminiEnhancer {
    llm: Arc<dyn LlmClient>,
}

#[derive(Deserialize)]
struct UrgencyAssessment {
    urgency: UrgencyLevel,
    significance: ClinicalSignificance,
    #[serde(default)]
    #[allow(dead_code)]
    reasoning: String,
}

impl GeminiEnhancer {
    pub fn new(llm: Arc<dyn LlmClient>) -> Self {
        Self { llm }
    }

    fn findings_block(annotation: &Annotation) -> String {
        annotation
            .findings
            .iter()
            .map(|f| format!("- {} in {} (severity: {})", f.label, f.location, f.severity))
            .collect::<Vec<_>>()
            .join("\n")
    }

    fn generate_report(&self, annotation: &Annotation) -> Result<String, LlmError> {
        let prompt = format!(
            "You are an expert radiologist. Generate a professional radiology report.

FINDINGS:
{findings}

ADDITIONAL NOTES:
{notes}

Generate a concise, professional radiology report. Include:
1. CLINICAL INDICATION (inferred from findings)
2. TECHNIQUE
3. FINDINGS (detailed description)
4. IMPRESSION (summary and clinical significance)

Use standard medical terminology.",
            findings = Self::findings_block(annotation),
            notes = annotation.additional_notes.as_deref().unwrap_or("None"),
        );
        self.llm
            .generate(&prompt, "", &GenerationConfig::text(ENHANCE_TEMPERATURE))
    }

    fn assess_urgency(&self, annotation: &Annotation) -> Result<UrgencyAssessment, LlmError> {
        let prompt = format!(
            "You are an expert radiologist. Assess the clinical urgency and significance.

FINDINGS:
{findings}

Classify:
1. urgency: critical (immediate intervention) / urgent (within 24 hours) / routine
2. significance: high / medium / low
3. reasoning: 1-2 sentences

Return ONLY valid JSON:
{{\"urgency\": \"<level>\", \"significance\": \"<level>\", \"reasoning\": \"<explanation>\"}}",
            findings = Self::findings_block(annotation),
        );
        let response = self
            .llm
            .generate(&prompt, "", &GenerationConfig::json(ENHANCE_TEMPERATURE))?;
        serde_json::from_str(response.trim()).map_err(|e| LlmError::ResponseParsing(e.to_string()))
    }
}

impl Enhancer for GeminiEnhancer {
    fn enhance(&self, annotation: &Annotation) -> Result<Enhancement, LlmError> {
        let report = self.generate_report(annotation)?;
        let assessment = self.assess_urgency(annotation)?;
        Ok(Enhancement {
            report,
            urgency_level: assessment.urgency,
            clinical_significance: assessment.significance,
        })
    }
}
