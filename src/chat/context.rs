//! Context bundle assembly for dataset chat.
//!
//! General mode summarizes the dataset under fixed caps; focused mode
//! replaces the bundle with one staging row's full contents.

use std::collections::BTreeMap;

use rusqlite::Connection;

use crate::db::repository::{
    get_annotation, get_annotations, get_flagged, get_recent_with_vision, get_request,
    get_requests,
};
use crate::db::DatabaseError;

const MAX_FLAGGED_SUMMARIES: usize = 10;
const MAX_RECENT_OUTPUTS: u32 = 5;
const RAW_OUTPUT_PREVIEW_CHARS: usize = 200;

/// Build the general-mode context bundle for a dataset.
pub fn build_general_context(conn: &Connection, set_name: i64) -> Result<String, DatabaseError> {
    let requests = get_requests(conn, set_name)?;
    let annotations = get_annotations(conn, set_name)?;
    let flagged = get_flagged(conn, set_name)?;

    let mut histogram: BTreeMap<&str, u32> = BTreeMap::new();
    for annotation in &annotations {
        *histogram.entry(annotation.label.as_str()).or_insert(0) += 1;
    }

    let mut parts = Vec::new();
    parts.push(format!("Dataset {set_name} overview:"));
    parts.push(format!("- Total images: {}", requests.len()));
    parts.push(format!("- Annotated: {}", annotations.len()));
    parts.push(format!("- Flagged images: {}", flagged.len()));
    if !histogram.is_empty() {
        let labels = histogram
            .iter()
            .map(|(label, count)| format!("{label}: {count}"))
            .collect::<Vec<_>>()
            .join(", ");
        parts.push(format!("- Label distribution: {labels}"));
    }

    if !flagged.is_empty() {
        parts.push(format!("\nFlagged images ({}):", flagged.len()));
        for row in flagged.iter().take(MAX_FLAGGED_SUMMARIES) {
            parts.push(format!(
                "- {}: status={}, confidence={:.2}, processed={}",
                row.path_url,
                row.validation_status.as_str(),
                row.confidence_score,
                row.processed,
            ));
        }
    }

    let recent = get_recent_with_vision(conn, set_name, MAX_RECENT_OUTPUTS)?;
    if !recent.is_empty() {
        parts.push(format!("\nRecent vision outputs ({}):", recent.len()));
        for row in &recent {
            let raw = row.vision_raw.as_deref().unwrap_or_default();
            parts.push(format!("- {}: {}", row.path_url, preview(raw)));
        }
    }

    Ok(parts.join("\n"))
}

/// Build the focused-mode context: one staging row in full, plus its
/// production row when present.
pub fn build_focused_context(
    conn: &Connection,
    request_id: i64,
) -> Result<Option<String>, DatabaseError> {
    let Some(request) = get_request(conn, request_id)? else {
        return Ok(None);
    };

    let mut parts = Vec::new();
    parts.push(format!(
        "Annotation request {} (dataset {}, image {}):",
        request.id, request.set_name, request.path_url
    ));
    parts.push(format!(
        "- Validation: status={}, attempts={}",
        request.validation_status.as_str(),
        request.validation_attempts,
    ));
    parts.push(format!("- Confidence score: {:.2}", request.confidence_score));
    parts.push(format!("- Processed: {}", request.processed));
    parts.push(format!("- Flagged: {}", request.flagged));
    if let Some(ref error) = request.processing_error {
        parts.push(format!("- Processing error: {error}"));
    }
    if request.enhanced {
        if let Some(urgency) = request.urgency_level {
            parts.push(format!("- Urgency: {}", urgency.as_str()));
        }
        if let Some(significance) = request.clinical_significance {
            parts.push(format!("- Clinical significance: {}", significance.as_str()));
        }
        if let Some(ref report) = request.report {
            parts.push(format!("\nProfessional report:\n{report}"));
        }
    }
    if let Some(ref output) = request.pydantic_output {
        parts.push(format!("\nStructured annotation:\n{output}"));
    }
    if let Some(ref raw) = request.vision_raw {
        parts.push(format!("\nRaw vision output:\n{raw}"));
    }

    if let Some(annotation) = get_annotation(conn, request.set_name, &request.path_url)? {
        parts.push(format!(
            "\nClean summary (label {}):\n{}",
            annotation.label, annotation.desc
        ));
    }

    Ok(Some(parts.join("\n")))
}

fn preview(raw: &str) -> String {
    let flattened = raw.replace('\n', " ");
    let preview: String = flattened.chars().take(RAW_OUTPUT_PREVIEW_CHARS).collect();
    if flattened.chars().count() > RAW_OUTPUT_PREVIEW_CHARS {
        format!("{preview}...")
    } else {
        preview
    }
}
