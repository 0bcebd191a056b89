use serde::{Deserialize, Serialize};

use super::SchemaError;

pub const MAX_DIAGNOSIS_LEN: usize = 100;
pub const MAX_SUMMARY_LEN: usize = 3500;
pub const MAX_KEY_FINDINGS: usize = 5;
pub const MAX_RECOMMENDATIONS_LEN: usize = 500;
pub const MAX_CONFIDENCE_NOTE_LEN: usize = 200;

/// Clinical summary rendered into the production row's description.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClinicalSummary {
    pub primary_diagnosis: String,
    pub summary: String,
    pub key_findings: Vec<String>,
    #[serde(default)]
    pub recommendations: Option<String>,
    #[serde(default)]
    pub confidence_note: Option<String>,
}

impl ClinicalSummary {
    pub fn validate(&self) -> Result<(), SchemaError> {
        if self.primary_diagnosis.trim().is_empty() {
            return Err(SchemaError::EmptyField {
                field: "primary_diagnosis",
            });
        }
        check_len("primary_diagnosis", &self.primary_diagnosis, MAX_DIAGNOSIS_LEN)?;
        check_len("summary", &self.summary, MAX_SUMMARY_LEN)?;
        if self.key_findings.len() > MAX_KEY_FINDINGS {
            return Err(SchemaError::TooMany {
                field: "key_findings",
                max: MAX_KEY_FINDINGS,
                len: self.key_findings.len(),
            });
        }
        if let Some(ref rec) = self.recommendations {
            check_len("recommendations", rec, MAX_RECOMMENDATIONS_LEN)?;
        }
        if let Some(ref note) = self.confidence_note {
            check_len("confidence_note", note, MAX_CONFIDENCE_NOTE_LEN)?;
        }
        Ok(())
    }
}

fn check_len(field: &'static str, value: &str, max: usize) -> Result<(), SchemaError> {
    let len = value.chars().count();
    if len > max {
        return Err(SchemaError::TooLong { field, max, len });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_summary() -> ClinicalSummary {
        ClinicalSummary {
            primary_diagnosis: "Right Pneumothorax".into(),
            summary: "Moderate right-sided pneumothorax with partial lung collapse.".into(),
            key_findings: vec![
                "Right pneumothorax".into(),
                "No mediastinal shift".into(),
            ],
            recommendations: Some("Immediate clinical correlation recommended.".into()),
            confidence_note: None,
        }
    }

    #[test]
    fn valid_summary_passes() {
        assert!(valid_summary().validate().is_ok());
    }

    #[test]
    fn six_key_findings_rejected() {
        let mut s = valid_summary();
        s.key_findings = (0..6).map(|i| format!("finding {i}")).collect();
        assert!(matches!(
            s.validate(),
            Err(SchemaError::TooMany { field: "key_findings", .. })
        ));
    }

    #[test]
    fn oversized_diagnosis_rejected() {
        let mut s = valid_summary();
        s.primary_diagnosis = "x".repeat(101);
        assert!(matches!(s.validate(), Err(SchemaError::TooLong { .. })));
    }

    #[test]
    fn oversized_summary_rejected() {
        let mut s = valid_summary();
        s.summary = "x".repeat(3501);
        assert!(s.validate().is_err());
    }

    #[test]
    fn empty_diagnosis_rejected() {
        let mut s = valid_summary();
        s.primary_diagnosis = "  ".into();
        assert!(matches!(s.validate(), Err(SchemaError::EmptyField { .. })));
    }

    #[test]
    fn optional_fields_default_to_none() {
        let json = r#"{
            "primary_diagnosis": "Normal Study",
            "summary": "No acute findings.",
            "key_findings": ["Clear lung fields"]
        }"#;
        let s: ClinicalSummary = serde_json::from_str(json).unwrap();
        assert!(s.recommendations.is_none());
        assert!(s.confidence_note.is_none());
        assert!(s.validate().is_ok());
    }
}
