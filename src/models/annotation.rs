use serde::{Deserialize, Serialize};

use super::enums::{ClinicalSignificance, UrgencyLevel};
use super::SchemaError;

/// Maximum length of a finding label (tier-2 `label` column width).
pub const MAX_LABEL_LEN: usize = 20;

/// Individual medical finding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Finding {
    pub label: String,
    pub location: String,
    pub severity: String,
}

impl Finding {
    pub fn new(label: &str, location: &str, severity: &str) -> Self {
        Self {
            label: label.to_string(),
            location: location.to_string(),
            severity: severity.to_string(),
        }
    }

    pub fn validate(&self) -> Result<(), SchemaError> {
        if self.label.trim().is_empty() {
            return Err(SchemaError::EmptyField {
                field: "findings[].label",
            });
        }
        let len = self.label.chars().count();
        if len > MAX_LABEL_LEN {
            return Err(SchemaError::TooLong {
                field: "findings[].label",
                max: MAX_LABEL_LEN,
                len,
            });
        }
        Ok(())
    }
}

/// Structured annotation produced by the validation stage.
///
/// The enhancement fields stay `None` unless the enhancer ran; that
/// invariant is enforced by `validate`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Annotation {
    #[serde(default)]
    pub patient_id: Option<String>,
    #[serde(default)]
    pub findings: Vec<Finding>,
    pub confidence_score: f64,
    #[serde(default = "default_generated_by")]
    pub generated_by: String,
    #[serde(default)]
    pub additional_notes: Option<String>,
    #[serde(default)]
    pub gemini_enhanced: bool,
    #[serde(default)]
    pub gemini_report: Option<String>,
    #[serde(default)]
    pub urgency_level: Option<UrgencyLevel>,
    #[serde(default)]
    pub clinical_significance: Option<ClinicalSignificance>,
}

fn default_generated_by() -> String {
    "medgemma/gemini".to_string()
}

impl Annotation {
    pub fn validate(&self) -> Result<(), SchemaError> {
        if !(0.0..=1.0).contains(&self.confidence_score) {
            return Err(SchemaError::OutOfRange {
                field: "confidence_score",
                min: 0.0,
                max: 1.0,
                value: self.confidence_score,
            });
        }
        for finding in &self.findings {
            finding.validate()?;
        }
        if !self.gemini_enhanced
            && (self.gemini_report.is_some()
                || self.urgency_level.is_some()
                || self.clinical_significance.is_some())
        {
            return Err(SchemaError::InconsistentEnhancement);
        }
        Ok(())
    }

    /// An empty annotation for degraded payloads (vision failure path).
    pub fn empty(patient_id: Option<&str>, generated_by: &str) -> Self {
        Self {
            patient_id: patient_id.map(str::to_string),
            findings: Vec::new(),
            confidence_score: 0.0,
            generated_by: generated_by.to_string(),
            additional_notes: None,
            gemini_enhanced: false,
            gemini_report: None,
            urgency_level: None,
            clinical_significance: None,
        }
    }
}
