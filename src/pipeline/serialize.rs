//! Rendering of validated output into the size-bounded production row.
//!
//! The description is a fixed block layout; when the total exceeds the
//! column width a truncation ladder shortens the least critical sections
//! first and only then hard-cuts. Truncation is observable in the log but
//! never fails.

use crate::models::{Annotation, ClinicalSummary, MAX_DESC_LEN, MAX_LABEL_LEN};

/// Hard-cut threshold, leaving room for the truncation marker.
const HARD_TRUNCATE_AT: usize = 3900;
const NOTES_BUDGET: usize = 500;
const REPORT_BUDGET: usize = 800;
const TRUNCATION_MARKER: &str = "...[truncated]";

const H_DIAGNOSIS: &str = "PRIMARY DIAGNOSIS: ";
const H_SUMMARY: &str = "SUMMARY:";
const H_KEY_FINDINGS: &str = "KEY FINDINGS:";
const H_RECOMMENDATIONS: &str = "RECOMMENDATIONS:";
const H_CONFIDENCE_NOTE: &str = "CONFIDENCE NOTE:";
const H_ADDITIONAL_NOTES: &str = "ADDITIONAL NOTES:";
const H_REPORT: &str = "REPORT:";

/// The sections of a rendered description, in render order.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct DescSections {
    pub primary_diagnosis: String,
    pub summary: String,
    pub key_findings: Vec<String>,
    pub recommendations: Option<String>,
    pub confidence_note: Option<String>,
    pub additional_notes: Option<String>,
    pub report: Option<String>,
}

impl DescSections {
    pub fn from_outputs(summary: &ClinicalSummary, annotation: &Annotation) -> Self {
        Self {
            primary_diagnosis: summary.primary_diagnosis.clone(),
            summary: summary.summary.clone(),
            key_findings: summary.key_findings.clone(),
            recommendations: summary.recommendations.clone(),
            confidence_note: summary.confidence_note.clone(),
            additional_notes: annotation.additional_notes.clone(),
            report: annotation
                .gemini_enhanced
                .then(|| annotation.gemini_report.clone())
                .flatten(),
        }
    }

    /// Canonical block rendering. `parse_desc` inverts this exactly.
    pub fn render(&self) -> String {
        let mut blocks = Vec::new();
        blocks.push(format!("{H_DIAGNOSIS}{}", self.primary_diagnosis));
        blocks.push(format!("{H_SUMMARY}\n{}", self.summary));

        if !self.key_findings.is_empty() {
            let bullets = self
                .key_findings
                .iter()
                .map(|f| format!("- {f}"))
                .collect::<Vec<_>>()
                .join("\n");
            blocks.push(format!("{H_KEY_FINDINGS}\n{bullets}"));
        }
        if let Some(ref rec) = self.recommendations {
            blocks.push(format!("{H_RECOMMENDATIONS}\n{rec}"));
        }
        if let Some(ref note) = self.confidence_note {
            blocks.push(format!("{H_CONFIDENCE_NOTE}\n{note}"));
        }
        if let Some(ref notes) = self.additional_notes {
            blocks.push(format!("{H_ADDITIONAL_NOTES}\n{notes}"));
        }
        if let Some(ref report) = self.report {
            blocks.push(format!("{H_REPORT}\n{report}"));
        }

        blocks.join("\n\n")
    }
}

/// Render the description, guaranteed to fit the tier-2 column.
pub fn render_desc(summary: &ClinicalSummary, annotation: &Annotation) -> String {
    let mut sections = DescSections::from_outputs(summary, annotation);

    let rendered = sections.render();
    if char_len(&rendered) <= MAX_DESC_LEN {
        return rendered;
    }

    tracing::warn!(
        chars = char_len(&rendered),
        "Description exceeds column width, applying truncation ladder"
    );

    // Step 1: shorten the note-like sections.
    sections.additional_notes = sections
        .additional_notes
        .map(|n| shorten(&n, NOTES_BUDGET));
    sections.confidence_note = sections
        .confidence_note
        .map(|n| shorten(&n, NOTES_BUDGET));
    let rendered = sections.render();
    if char_len(&rendered) <= MAX_DESC_LEN {
        return rendered;
    }

    // Step 2: shorten the report.
    sections.report = sections.report.map(|r| shorten(&r, REPORT_BUDGET));
    let rendered = sections.render();
    if char_len(&rendered) <= MAX_DESC_LEN {
        return rendered;
    }

    // Step 3: hard cut.
    tracing::warn!(
        chars = char_len(&rendered),
        cut_at = HARD_TRUNCATE_AT,
        "Hard truncation of description"
    );
    let mut cut: String = rendered.chars().take(HARD_TRUNCATE_AT).collect();
    cut.push_str(TRUNCATION_MARKER);
    cut
}

/// Parse a serializer-produced description back into its sections.
pub fn parse_desc(desc: &str) -> DescSections {
    let mut sections = DescSections::default();
    let mut current: Option<&str> = None;
    let mut body: Vec<String> = Vec::new();

    let mut flush = |sections: &mut DescSections, header: Option<&str>, body: &mut Vec<String>| {
        let text = body.join("\n");
        let text = text.trim_end_matches('\n').to_string();
        match header {
            Some(H_SUMMARY) => sections.summary = text,
            Some(H_RECOMMENDATIONS) => sections.recommendations = Some(text),
            Some(H_CONFIDENCE_NOTE) => sections.confidence_note = Some(text),
            Some(H_ADDITIONAL_NOTES) => sections.additional_notes = Some(text),
            Some(H_REPORT) => sections.report = Some(text),
            _ => {}
        }
        body.clear();
    };

    for line in desc.lines() {
        if let Some(diagnosis) = line.strip_prefix(H_DIAGNOSIS) {
            flush(&mut sections, current, &mut body);
            sections.primary_diagnosis = diagnosis.to_string();
            current = None;
        } else if line == H_SUMMARY
            || line == H_KEY_FINDINGS
            || line == H_RECOMMENDATIONS
            || line == H_CONFIDENCE_NOTE
            || line == H_ADDITIONAL_NOTES
            || line == H_REPORT
        {
            flush(&mut sections, current, &mut body);
            current = Some(match line {
                _ if line == H_SUMMARY => H_SUMMARY,
                _ if line == H_KEY_FINDINGS => H_KEY_FINDINGS,
                _ if line == H_RECOMMENDATIONS => H_RECOMMENDATIONS,
                _ if line == H_CONFIDENCE_NOTE => H_CONFIDENCE_NOTE,
                _ if line == H_ADDITIONAL_NOTES => H_ADDITIONAL_NOTES,
                _ => H_REPORT,
            });
        } else if current == Some(H_KEY_FINDINGS) {
            if let Some(bullet) = line.strip_prefix("- ") {
                sections.key_findings.push(bullet.to_string());
            }
        } else if current.is_some() {
            if !(line.is_empty() && body.is_empty()) {
                body.push(line.to_string());
            }
        }
    }
    flush(&mut sections, current, &mut body);

    // Blank separator lines between blocks are render artifacts.
    trim_trailing_blank(&mut sections.summary);
    for field in [
        &mut sections.recommendations,
        &mut sections.confidence_note,
        &mut sections.additional_notes,
        &mut sections.report,
    ]
    .into_iter()
    .flatten()
    {
        trim_trailing_blank(field);
    }

    sections
}

/// Primary label for the production row.
pub fn primary_label(summary: &ClinicalSummary, annotation: &Annotation) -> String {
    let diagnosis = summary.primary_diagnosis.trim();
    if !diagnosis.is_empty() {
        return truncate_chars(diagnosis, MAX_LABEL_LEN);
    }
    if let Some(finding) = annotation.findings.first() {
        return truncate_chars(finding.label.trim(), MAX_LABEL_LEN);
    }
    "No findings".to_string()
}

/// Coerce a free-form patient id to the integer column; 0 is the default
/// patient.
pub fn coerce_patient_id(patient_id: Option<&str>) -> i64 {
    patient_id
        .and_then(|p| p.trim().parse().ok())
        .unwrap_or(0)
}

fn char_len(text: &str) -> usize {
    text.chars().count()
}

fn truncate_chars(text: &str, max: usize) -> String {
    text.chars().take(max).collect::<String>().trim_end().to_string()
}

fn shorten(text: &str, budget: usize) -> String {
    if char_len(text) <= budget {
        return text.to_string();
    }
    let mut cut: String = text.chars().take(budget).collect();
    cut.push_str(TRUNCATION_MARKER);
    cut
}

fn trim_trailing_blank(text: &mut String) {
    while text.ends_with('\n') {
        text.pop();
    }
}
