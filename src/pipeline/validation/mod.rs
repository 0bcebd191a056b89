//! Validation stage: free-form vision text to an accepted `Annotation`.
//!
//! Retries are loop-driven: each attempt builds a prompt, calls the
//! structured-output model at low temperature, parses and validates. After
//! the final failed attempt the deterministic keyword fallback runs, so
//! the stage never fails as long as vision text exists.

pub mod prompt;
pub mod fallback;

pub use fallback::{FallbackParser, DEFAULT_FALLBACK_KEYWORDS, FALLBACK_CONFIDENCE};

use std::sync::Arc;

use crate::llm::{GenerationConfig, LlmClient};
use crate::models::{Annotation, ValidationStatus};

use prompt::{initial_prompt, retry_prompt, VALIDATION_SYSTEM_PROMPT};

/// Temperature for structured validation calls.
const VALIDATION_TEMPERATURE: f32 = 0.1;

/// Outcome of the validation stage. `attempts` is always at least 1.
#[derive(Debug, Clone)]
pub struct Validated {
    pub annotation: Annotation,
    pub structured_json: Option<String>,
    pub status: ValidationStatus,
    pub attempts: u32,
}

pub struct Validator {
    llm: Arc<dyn LlmClient>,
    max_attempts: u32,
    fallback: FallbackParser,
}

impl Validator {
    pub fn new(llm: Arc<dyn LlmClient>, max_attempts: u32, keywords: &[String]) -> Self {
        Self {
            llm,
            max_attempts: max_attempts.max(1),
            fallback: FallbackParser::new(keywords),
        }
    }

    /// Convert raw vision text into an accepted annotation.
    pub fn validate(&self, vision_text: &str, patient_id: Option<&str>) -> Validated {
        if vision_text.trim().is_empty() {
            tracing::warn!("Empty vision text, skipping structured validation");
            return self.fall_back(vision_text, patient_id, 1);
        }

        let mut last_error = String::new();

        for attempt in 1..=self.max_attempts {
            let prompt = if attempt == 1 {
                initial_prompt(vision_text, patient_id)
            } else {
                retry_prompt(vision_text, patient_id, attempt, &last_error)
            };

            let response = match self.llm.generate(
                &prompt,
                VALIDATION_SYSTEM_PROMPT,
                &GenerationConfig::json(VALIDATION_TEMPERATURE),
            ) {
                Ok(response) => response,
                Err(e) => {
                    last_error = e.to_string();
                    tracing::warn!(attempt, error = %last_error, "Validation LLM call failed");
                    continue;
                }
            };

            match accept(&response, patient_id) {
                Ok(annotation) => {
                    let status = if attempt == 1 {
                        ValidationStatus::Success
                    } else {
                        ValidationStatus::Retry
                    };
                    tracing::info!(attempt, status = status.as_str(), "Validation accepted");
                    return Validated {
                        annotation,
                        structured_json: Some(response),
                        status,
                        attempts: attempt,
                    };
                }
                Err(reason) => {
                    last_error = reason;
                    tracing::warn!(attempt, error = %last_error, "Validation rejected response");
                }
            }
        }

        self.fall_back(vision_text, patient_id, self.max_attempts)
    }

    fn fall_back(&self, vision_text: &str, patient_id: Option<&str>, attempts: u32) -> Validated {
        let annotation = self.fallback.parse(vision_text, patient_id);
        let structured_json = serde_json::to_string(&annotation).ok();
        Validated {
            annotation,
            structured_json,
            status: ValidationStatus::Fallback,
            attempts,
        }
    }
}

/// Parse and accept one model response.
fn accept(response: &str, patient_id: Option<&str>) -> Result<Annotation, String> {
    let json = strip_code_fences(response);
    let mut annotation: Annotation =
        serde_json::from_str(json).map_err(|e| format!("invalid JSON: {e}"))?;

    if annotation.patient_id.is_none() {
        annotation.patient_id = patient_id.map(str::to_string);
    }

    annotation.validate().map_err(|e| e.to_string())?;
    Ok(annotation)
}

/// Models occasionally wrap JSON in markdown fences despite the JSON
/// response contract; accept that shape too.
fn strip_code_fences(response: &str) -> &str {
    let trimmed = response.trim();
    if let Some(rest) = trimmed.strip_prefix("```") {
        let rest = rest.strip_prefix("json").unwrap_or(rest);
        if let Some(end) = rest.rfind("```") {
            return rest[..end].trim();
        }
    }
    trimmed
}
