//! The agentic annotation pipeline.
//!
//! Six steps per image: vision analysis, structured validation with
//! bounded retries, optional enhancement, staging payload assembly,
//! clinical summary, primary label. Every intermediate artifact lands in
//! the returned payload so the caller can persist the full trace.

use std::sync::Arc;

use crate::models::{Annotation, RequestPayload, ValidationStatus};

use super::enhance::{apply_enhancement, Enhancer};
use super::serialize;
use super::summary::SummaryGenerator;
use super::validation::Validator;
use super::vision::{VisionAnalyzer, VisionError, VisionImage};
use super::DEFAULT_VISION_PROMPT;

/// Everything a single annotate call produces.
#[derive(Debug, Clone)]
pub struct AnnotateOutput {
    pub annotation: Annotation,
    pub payload: RequestPayload,
    pub desc_text: String,
    pub primary_label: String,
}

impl AnnotateOutput {
    pub fn failed(&self) -> bool {
        self.payload.processing_error.is_some()
    }
}

pub struct AnnotationPipeline {
    vision: Arc<dyn VisionAnalyzer>,
    validator: Validator,
    enhancer: Option<Arc<dyn Enhancer>>,
    summary: SummaryGenerator,
}

impl AnnotationPipeline {
    pub fn new(
        vision: Arc<dyn VisionAnalyzer>,
        validator: Validator,
        enhancer: Option<Arc<dyn Enhancer>>,
        summary: SummaryGenerator,
    ) -> Self {
        Self {
            vision,
            validator,
            enhancer,
            summary,
        }
    }

    pub fn vision(&self) -> &dyn VisionAnalyzer {
        self.vision.as_ref()
    }

    /// Annotate one image.
    ///
    /// Vision failures do not abort: the result carries a degraded payload
    /// with `processing_error` set so the caller can persist the row for
    /// audit. The pipeline is reentrant; the vision tool's load guard is
    /// the only shared mutable state.
    pub fn annotate(
        &self,
        image: &VisionImage,
        set_name: i64,
        path_url: &str,
        prompt: Option<&str>,
        patient_id: Option<&str>,
        enable_enhancement: bool,
    ) -> AnnotateOutput {
        let prompt = match prompt {
            Some(p) if !p.trim().is_empty() => p,
            _ => DEFAULT_VISION_PROMPT,
        };

        // Step 1: vision analysis.
        tracing::info!(set_name, path = %path_url, "[1/6] Vision analysis");
        let vision_raw = match self.vision.analyze(image, prompt) {
            Ok(text) => text,
            Err(e) => {
                tracing::error!(set_name, path = %path_url, error = %e, "Vision analysis failed");
                return self.degraded(set_name, path_url, patient_id, e);
            }
        };
        tracing::debug!(chars = vision_raw.len(), "Vision output received");

        // Step 2: structured validation with bounded retries.
        tracing::info!(set_name, path = %path_url, "[2/6] Structured validation");
        let validated = self.validator.validate(&vision_raw, patient_id);
        let mut annotation = validated.annotation;

        // Step 3: optional enhancement. Skipped for fallback output, since there
        // is nothing trustworthy to enhance. Errors are swallowed.
        if enable_enhancement && validated.status != ValidationStatus::Fallback {
            tracing::info!(set_name, path = %path_url, "[3/6] Enhancement");
            match self.enhancer.as_deref() {
                Some(enhancer) => match enhancer.enhance(&annotation) {
                    Ok(enhancement) => apply_enhancement(&mut annotation, enhancement),
                    Err(e) => {
                        tracing::warn!(error = %e, "Enhancement failed, continuing unenhanced");
                    }
                },
                None => tracing::debug!("No enhancer configured"),
            }
        } else {
            tracing::info!(set_name, path = %path_url, "[3/6] Skipping enhancement");
        }

        // Step 4: staging payload.
        tracing::info!(set_name, path = %path_url, "[4/6] Assembling staging payload");
        let payload = RequestPayload {
            set_name,
            path_url: path_url.to_string(),
            vision_raw: Some(vision_raw),
            structured_json: validated.structured_json,
            validation_attempts: validated.attempts,
            validation_status: validated.status,
            pydantic_output: serde_json::to_string(&annotation).ok(),
            confidence_score: annotation.confidence_score,
            enhanced: annotation.gemini_enhanced,
            report: annotation.gemini_report.clone(),
            urgency_level: annotation.urgency_level,
            clinical_significance: annotation.clinical_significance,
            processing_error: None,
        };

        // Step 5: clinical summary and description text.
        tracing::info!(set_name, path = %path_url, "[5/6] Clinical summary");
        let clinical_summary = self.summary.summarize(&annotation);
        let desc_text = serialize::render_desc(&clinical_summary, &annotation);

        // Step 6: primary label.
        let primary_label = serialize::primary_label(&clinical_summary, &annotation);
        tracing::info!(
            set_name,
            path = %path_url,
            findings = annotation.findings.len(),
            confidence = annotation.confidence_score,
            label = %primary_label,
            status = validated.status.as_str(),
            attempts = validated.attempts,
            "[6/6] Pipeline complete"
        );

        AnnotateOutput {
            annotation,
            payload,
            desc_text,
            primary_label,
        }
    }

    /// Failure payload: empty findings, zero confidence, the error recorded
    /// for audit. Still a complete output so the row can be persisted.
    fn degraded(
        &self,
        set_name: i64,
        path_url: &str,
        patient_id: Option<&str>,
        error: VisionError,
    ) -> AnnotateOutput {
        let annotation = Annotation::empty(patient_id, "medgemma/unavailable");
        let desc_text = format!(
            "PRIMARY DIAGNOSIS: Analysis Incomplete\n\nSUMMARY:\nAutomated analysis could not run: {error}"
        );

        let payload = RequestPayload {
            set_name,
            path_url: path_url.to_string(),
            vision_raw: None,
            structured_json: None,
            validation_attempts: 1,
            validation_status: ValidationStatus::Fallback,
            pydantic_output: serde_json::to_string(&annotation).ok(),
            confidence_score: 0.0,
            enhanced: false,
            report: None,
            urgency_level: None,
            clinical_significance: None,
            processing_error: Some(error.to_string()),
        };

        AnnotateOutput {
            annotation,
            payload,
            desc_text,
            primary_label: "Analysis Incomplete".to_string(),
        }
    }
}
