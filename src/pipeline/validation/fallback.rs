use regex::RegexBuilder;

use crate::models::{Annotation, Finding};

/// Tag recorded in `generated_by` when the deterministic parser ran.
pub const FALLBACK_GENERATED_BY: &str = "medgemma/fallback";

/// Confidence assigned to every fallback annotation.
pub const FALLBACK_CONFIDENCE: f64 = 0.30;

/// Built-in vocabulary. Deployments with different case mixes override it
/// through configuration.
pub const DEFAULT_FALLBACK_KEYWORDS: &[&str] = &[
    "pneumothorax",
    "fracture",
    "effusion",
    "consolidation",
    "opacity",
    "pneumonia",
    "cardiomegaly",
    "atelectasis",
    "edema",
    "nodule",
    "normal",
    "clear",
];

/// Deterministic keyword recognizer used when the structured-output model
/// cannot produce an acceptable annotation.
pub struct FallbackParser {
    terms: Vec<(String, regex::Regex)>,
}

impl FallbackParser {
    /// Build from a vocabulary; an empty list means the built-in one.
    pub fn new(keywords: &[String]) -> Self {
        let vocabulary: Vec<String> = if keywords.is_empty() {
            DEFAULT_FALLBACK_KEYWORDS.iter().map(|k| k.to_string()).collect()
        } else {
            keywords.to_vec()
        };

        let terms = vocabulary
            .iter()
            .filter_map(|keyword| {
                let pattern = format!(r"\b{}\b", regex::escape(keyword));
                RegexBuilder::new(&pattern)
                    .case_insensitive(true)
                    .build()
                    .ok()
                    .map(|re| (keyword.clone(), re))
            })
            .collect();

        Self { terms }
    }

    /// Scan the raw vision text and assemble a low-confidence annotation.
    pub fn parse(&self, raw_analysis: &str, patient_id: Option<&str>) -> Annotation {
        let mut findings: Vec<Finding> = self
            .terms
            .iter()
            .filter(|(_, re)| re.is_match(raw_analysis))
            .map(|(keyword, _)| Finding::new(&capitalize(keyword), "Unspecified", "Unknown"))
            .collect();

        if findings.is_empty() {
            findings.push(Finding::new("Analysis Incomplete", "Overall", "Unknown"));
        }

        let notes = if raw_analysis.trim().is_empty() {
            "Fallback parser used; no vision text was available.".to_string()
        } else {
            format!(
                "Fallback parser used. Original analysis: {}",
                truncate_chars(raw_analysis, 500)
            )
        };

        tracing::warn!(
            findings = findings.len(),
            "Structured validation exhausted, fallback parser produced annotation"
        );

        Annotation {
            patient_id: patient_id.map(str::to_string),
            findings,
            confidence_score: FALLBACK_CONFIDENCE,
            generated_by: FALLBACK_GENERATED_BY.to_string(),
            additional_notes: Some(notes),
            gemini_enhanced: false,
            gemini_report: None,
            urgency_level: None,
            clinical_significance: None,
        }
    }
}

fn capitalize(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
        None => String::new(),
    }
}

fn truncate_chars(text: &str, max: usize) -> String {
    text.chars().take(max).collect()
}
