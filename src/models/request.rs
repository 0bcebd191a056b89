use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::enums::{ClinicalSignificance, UrgencyLevel, ValidationStatus};

/// Maximum length of a staging-row image path.
pub const MAX_PATH_LEN: usize = 200;
/// Maximum length of the production-row description.
pub const MAX_DESC_LEN: usize = 4000;

/// Pipeline output destined for the staging table.
///
/// Produced exclusively by the annotation pipeline; the repository owns
/// everything else about the row (id, flagged, created_at, processed).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestPayload {
    pub set_name: i64,
    pub path_url: String,
    pub vision_raw: Option<String>,
    pub structured_json: Option<String>,
    pub validation_attempts: u32,
    pub validation_status: ValidationStatus,
    pub pydantic_output: Option<String>,
    pub confidence_score: f64,
    pub enhanced: bool,
    pub report: Option<String>,
    pub urgency_level: Option<UrgencyLevel>,
    pub clinical_significance: Option<ClinicalSignificance>,
    pub processing_error: Option<String>,
}

impl RequestPayload {
    /// Minimal placeholder used when flagging a path before any analysis.
    pub fn placeholder(set_name: i64, path_url: &str) -> Self {
        Self {
            set_name,
            path_url: path_url.to_string(),
            vision_raw: None,
            structured_json: None,
            validation_attempts: 1,
            validation_status: ValidationStatus::Fallback,
            pydantic_output: None,
            confidence_score: 0.0,
            enhanced: false,
            report: None,
            urgency_level: None,
            clinical_significance: None,
            processing_error: None,
        }
    }
}

/// Full staging row as persisted (tier 1).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnnotationRequest {
    pub id: i64,
    pub set_name: i64,
    pub path_url: String,
    pub vision_raw: Option<String>,
    pub structured_json: Option<String>,
    pub validation_attempts: u32,
    pub validation_status: ValidationStatus,
    pub pydantic_output: Option<String>,
    pub confidence_score: f64,
    pub enhanced: bool,
    pub report: Option<String>,
    pub urgency_level: Option<UrgencyLevel>,
    pub clinical_significance: Option<ClinicalSignificance>,
    pub flagged: bool,
    pub created_at: DateTime<Utc>,
    pub processed: bool,
    pub processing_error: Option<String>,
}

/// Production row (tier 2).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnnotationRecord {
    pub set_name: i64,
    pub path_url: String,
    pub label: String,
    pub patient_id: i64,
    pub desc: String,
    pub request_id: Option<i64>,
}

/// Production row joined with its staging row for audit views.
#[derive(Debug, Clone, Serialize)]
pub struct JoinedAnnotation {
    pub annotation: AnnotationRecord,
    pub request: AnnotationRequest,
}

/// Aggregate pipeline counters for one dataset.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PipelineStats {
    pub total: u32,
    pub processed: u32,
    pub unprocessed: u32,
    pub success: u32,
    pub retry: u32,
    pub fallback: u32,
    pub enhanced_count: u32,
    pub avg_confidence: Option<f64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn placeholder_is_empty_and_unscored() {
        let p = RequestPayload::placeholder(7, "/img.jpg");
        assert_eq!(p.set_name, 7);
        assert!(p.pydantic_output.is_none());
        assert_eq!(p.confidence_score, 0.0);
        assert_eq!(p.validation_status, ValidationStatus::Fallback);
        assert_eq!(p.validation_attempts, 1);
        assert!(!p.enhanced);
    }

    #[test]
    fn payload_serializes_enums_as_storage_strings() {
        let mut p = RequestPayload::placeholder(1, "/a.png");
        p.validation_status = ValidationStatus::Retry;
        p.urgency_level = Some(UrgencyLevel::Critical);
        let json = serde_json::to_string(&p).unwrap();
        assert!(json.contains("\"retry\""));
        assert!(json.contains("\"critical\""));
    }
}
