use std::str::FromStr;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, Row};

use crate::db::DatabaseError;
use crate::models::{AnnotationRequest, RequestPayload, ValidationStatus};
use crate::models::enums::{ClinicalSignificance, UrgencyLevel};

const REQUEST_COLUMNS: &str = "id, set_name, path_url, vision_raw, structured_json, \
     validation_attempts, validation_status, pydantic_output, confidence_score, \
     enhanced, report, urgency_level, clinical_significance, flagged, created_at, \
     processed, processing_error";

/// Upsert a staging row by `(set_name, path_url)` and return its id.
///
/// An existing row keeps its `flagged` value and `created_at`; everything
/// the pipeline produced is rewritten and `processed` resets to false so
/// the row re-enters the unprocessed queue.
pub fn save_request(conn: &Connection, payload: &RequestPayload) -> Result<i64, DatabaseError> {
    conn.execute(
        "INSERT INTO annotation_request (set_name, path_url, vision_raw, structured_json,
             validation_attempts, validation_status, pydantic_output, confidence_score,
             enhanced, report, urgency_level, clinical_significance, flagged, created_at,
             processed, processing_error)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, 0, ?13, 0, ?14)
         ON CONFLICT (set_name, path_url) DO UPDATE SET
             vision_raw = excluded.vision_raw,
             structured_json = excluded.structured_json,
             validation_attempts = excluded.validation_attempts,
             validation_status = excluded.validation_status,
             pydantic_output = excluded.pydantic_output,
             confidence_score = excluded.confidence_score,
             enhanced = excluded.enhanced,
             report = excluded.report,
             urgency_level = excluded.urgency_level,
             clinical_significance = excluded.clinical_significance,
             processed = 0,
             processing_error = excluded.processing_error",
        params![
            payload.set_name,
            payload.path_url,
            payload.vision_raw,
            payload.structured_json,
            payload.validation_attempts,
            payload.validation_status.as_str(),
            payload.pydantic_output,
            payload.confidence_score,
            payload.enhanced as i32,
            payload.report,
            payload.urgency_level.map(|u| u.as_str()),
            payload.clinical_significance.map(|c| c.as_str()),
            Utc::now().to_rfc3339(),
            payload.processing_error,
        ],
    )?;

    let id = conn.query_row(
        "SELECT id FROM annotation_request WHERE set_name = ?1 AND path_url = ?2",
        params![payload.set_name, payload.path_url],
        |row| row.get(0),
    )?;
    Ok(id)
}

pub fn get_request(conn: &Connection, id: i64) -> Result<Option<AnnotationRequest>, DatabaseError> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {REQUEST_COLUMNS} FROM annotation_request WHERE id = ?1"
    ))?;
    let result = stmt.query_row(params![id], request_from_row);
    match result {
        Ok(req) => Ok(Some(req?)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

pub fn get_request_by_path(
    conn: &Connection,
    set_name: i64,
    path_url: &str,
) -> Result<Option<AnnotationRequest>, DatabaseError> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {REQUEST_COLUMNS} FROM annotation_request
         WHERE set_name = ?1 AND path_url = ?2"
    ))?;
    let result = stmt.query_row(params![set_name, path_url], request_from_row);
    match result {
        Ok(req) => Ok(Some(req?)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Unprocessed staging rows for a dataset, oldest first.
pub fn get_unprocessed(
    conn: &Connection,
    set_name: i64,
) -> Result<Vec<AnnotationRequest>, DatabaseError> {
    query_requests(
        conn,
        &format!(
            "SELECT {REQUEST_COLUMNS} FROM annotation_request
             WHERE set_name = ?1 AND processed = 0
             ORDER BY created_at, id"
        ),
        set_name,
    )
}

/// Every staging row for a dataset, oldest first.
pub fn get_requests(
    conn: &Connection,
    set_name: i64,
) -> Result<Vec<AnnotationRequest>, DatabaseError> {
    query_requests(
        conn,
        &format!(
            "SELECT {REQUEST_COLUMNS} FROM annotation_request
             WHERE set_name = ?1 ORDER BY created_at, id"
        ),
        set_name,
    )
}

/// Flagged staging rows for a dataset, oldest first.
pub fn get_flagged(
    conn: &Connection,
    set_name: i64,
) -> Result<Vec<AnnotationRequest>, DatabaseError> {
    query_requests(
        conn,
        &format!(
            "SELECT {REQUEST_COLUMNS} FROM annotation_request
             WHERE set_name = ?1 AND flagged = 1
             ORDER BY created_at, id"
        ),
        set_name,
    )
}

/// Most recent rows carrying raw vision output, newest first.
pub fn get_recent_with_vision(
    conn: &Connection,
    set_name: i64,
    limit: u32,
) -> Result<Vec<AnnotationRequest>, DatabaseError> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {REQUEST_COLUMNS} FROM annotation_request
         WHERE set_name = ?1 AND vision_raw IS NOT NULL
         ORDER BY created_at DESC, id DESC LIMIT ?2"
    ))?;
    let rows = stmt.query_map(params![set_name, limit], request_from_row)?;
    collect_requests(rows)
}

/// Toggle the review flag on a staging row.
///
/// Flagging a path with no row yet creates a minimal placeholder so the
/// flag survives until analysis fills in the real fields. Unflagging a
/// missing row is a no-op returning false. Flag state is independent of
/// the pipeline lifecycle.
pub fn set_flag(
    conn: &Connection,
    set_name: i64,
    path_url: &str,
    flagged: bool,
) -> Result<bool, DatabaseError> {
    let updated = conn.execute(
        "UPDATE annotation_request SET flagged = ?3 WHERE set_name = ?1 AND path_url = ?2",
        params![set_name, path_url, flagged as i32],
    )?;
    if updated > 0 {
        return Ok(true);
    }
    if !flagged {
        return Ok(false);
    }

    let placeholder = RequestPayload::placeholder(set_name, path_url);
    let id = save_request(conn, &placeholder)?;
    conn.execute(
        "UPDATE annotation_request SET flagged = 1 WHERE id = ?1",
        params![id],
    )?;
    tracing::debug!(set_name, path = %path_url, "Created flagged placeholder row");
    Ok(true)
}

fn query_requests(
    conn: &Connection,
    sql: &str,
    set_name: i64,
) -> Result<Vec<AnnotationRequest>, DatabaseError> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt.query_map(params![set_name], request_from_row)?;
    collect_requests(rows)
}

fn collect_requests(
    rows: impl Iterator<Item = rusqlite::Result<Result<AnnotationRequest, DatabaseError>>>,
) -> Result<Vec<AnnotationRequest>, DatabaseError> {
    let mut out = Vec::new();
    for row in rows {
        out.push(row??);
    }
    Ok(out)
}

fn request_from_row(row: &Row) -> rusqlite::Result<Result<AnnotationRequest, DatabaseError>> {
    let status_str: String = row.get(6)?;
    let urgency_str: Option<String> = row.get(11)?;
    let significance_str: Option<String> = row.get(12)?;
    let created_str: String = row.get(14)?;

    Ok(build_request(
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
        row.get(5)?,
        status_str,
        row.get(7)?,
        row.get(8)?,
        row.get::<_, i32>(9)? != 0,
        row.get(10)?,
        urgency_str,
        significance_str,
        row.get::<_, i32>(13)? != 0,
        created_str,
        row.get::<_, i32>(15)? != 0,
        row.get(16)?,
    ))
}

#[allow(clippy::too_many_arguments)]
fn build_request(
    id: i64,
    set_name: i64,
    path_url: String,
    vision_raw: Option<String>,
    structured_json: Option<String>,
    validation_attempts: u32,
    status_str: String,
    pydantic_output: Option<String>,
    confidence_score: f64,
    enhanced: bool,
    report: Option<String>,
    urgency_str: Option<String>,
    significance_str: Option<String>,
    flagged: bool,
    created_str: String,
    processed: bool,
    processing_error: Option<String>,
) -> Result<AnnotationRequest, DatabaseError> {
    let validation_status = ValidationStatus::from_str(&status_str)?;
    let urgency_level = urgency_str
        .as_deref()
        .map(UrgencyLevel::from_str)
        .transpose()?;
    let clinical_significance = significance_str
        .as_deref()
        .map(ClinicalSignificance::from_str)
        .transpose()?;
    let created_at = DateTime::parse_from_rfc3339(&created_str)
        .map_err(|_| DatabaseError::InvalidEnum {
            field: "created_at".into(),
            value: created_str.clone(),
        })?
        .with_timezone(&Utc);

    Ok(AnnotationRequest {
        id,
        set_name,
        path_url,
        vision_raw,
        structured_json,
        validation_attempts,
        validation_status,
        pydantic_output,
        confidence_score,
        enhanced,
        report,
        urgency_level,
        clinical_significance,
        flagged,
        created_at,
        processed,
        processing_error,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::open_memory_database;

    fn sample_payload(set_name: i64, path: &str) -> RequestPayload {
        RequestPayload {
            set_name,
            path_url: path.to_string(),
            vision_raw: Some("The chest radiograph shows a small pneumothorax.".into()),
            structured_json: Some(r#"{"findings":[]}"#.into()),
            validation_attempts: 1,
            validation_status: ValidationStatus::Success,
            pydantic_output: Some(r#"{"findings":[],"confidence_score":0.9}"#.into()),
            confidence_score: 0.9,
            enhanced: false,
            report: None,
            urgency_level: None,
            clinical_significance: None,
            processing_error: None,
        }
    }

    #[test]
    fn save_and_read_round_trip() {
        let conn = open_memory_database().unwrap();
        let id = save_request(&conn, &sample_payload(7, "/img.jpg")).unwrap();

        let row = get_request(&conn, id).unwrap().unwrap();
        assert_eq!(row.set_name, 7);
        assert_eq!(row.path_url, "/img.jpg");
        assert_eq!(row.validation_status, ValidationStatus::Success);
        assert_eq!(row.confidence_score, 0.9);
        assert!(!row.processed);
        assert!(!row.flagged);
    }

    #[test]
    fn upsert_keeps_id_and_created_at() {
        let conn = open_memory_database().unwrap();
        let first = save_request(&conn, &sample_payload(7, "/img.jpg")).unwrap();
        let created = get_request(&conn, first).unwrap().unwrap().created_at;

        let mut updated = sample_payload(7, "/img.jpg");
        updated.confidence_score = 0.5;
        updated.validation_status = ValidationStatus::Retry;
        let second = save_request(&conn, &updated).unwrap();

        assert_eq!(first, second);
        let row = get_request(&conn, second).unwrap().unwrap();
        assert_eq!(row.confidence_score, 0.5);
        assert_eq!(row.validation_status, ValidationStatus::Retry);
        assert_eq!(row.created_at, created);
    }

    #[test]
    fn upsert_preserves_flag() {
        let conn = open_memory_database().unwrap();
        save_request(&conn, &sample_payload(7, "/img.jpg")).unwrap();
        assert!(set_flag(&conn, 7, "/img.jpg", true).unwrap());

        save_request(&conn, &sample_payload(7, "/img.jpg")).unwrap();
        let row = get_request_by_path(&conn, 7, "/img.jpg").unwrap().unwrap();
        assert!(row.flagged, "re-analysis must not clear the flag");
    }

    #[test]
    fn flag_creates_placeholder_when_missing() {
        let conn = open_memory_database().unwrap();
        assert!(set_flag(&conn, 7, "/new.jpg", true).unwrap());

        let row = get_request_by_path(&conn, 7, "/new.jpg").unwrap().unwrap();
        assert!(row.flagged);
        assert!(!row.processed);
        assert!(row.pydantic_output.is_none());
        assert_eq!(row.confidence_score, 0.0);
        assert_eq!(row.validation_status, ValidationStatus::Fallback);
    }

    #[test]
    fn unflag_missing_row_is_noop() {
        let conn = open_memory_database().unwrap();
        assert!(!set_flag(&conn, 7, "/absent.jpg", false).unwrap());
        assert!(get_request_by_path(&conn, 7, "/absent.jpg").unwrap().is_none());
    }

    #[test]
    fn flag_toggle_is_idempotent() {
        let conn = open_memory_database().unwrap();
        set_flag(&conn, 7, "/img.jpg", true).unwrap();
        set_flag(&conn, 7, "/img.jpg", true).unwrap();

        let flagged = get_flagged(&conn, 7).unwrap();
        assert_eq!(flagged.len(), 1);

        set_flag(&conn, 7, "/img.jpg", false).unwrap();
        assert!(get_flagged(&conn, 7).unwrap().is_empty());
    }

    #[test]
    fn unprocessed_ordered_by_creation() {
        let conn = open_memory_database().unwrap();
        save_request(&conn, &sample_payload(7, "/a.jpg")).unwrap();
        save_request(&conn, &sample_payload(7, "/b.jpg")).unwrap();
        save_request(&conn, &sample_payload(7, "/c.jpg")).unwrap();

        let rows = get_unprocessed(&conn, 7).unwrap();
        let paths: Vec<&str> = rows.iter().map(|r| r.path_url.as_str()).collect();
        assert_eq!(paths, vec!["/a.jpg", "/b.jpg", "/c.jpg"]);
    }

    #[test]
    fn datasets_are_isolated() {
        let conn = open_memory_database().unwrap();
        save_request(&conn, &sample_payload(7, "/a.jpg")).unwrap();
        save_request(&conn, &sample_payload(8, "/a.jpg")).unwrap();

        assert_eq!(get_unprocessed(&conn, 7).unwrap().len(), 1);
        assert_eq!(get_unprocessed(&conn, 8).unwrap().len(), 1);
    }

    #[test]
    fn recent_with_vision_limited_and_newest_first() {
        let conn = open_memory_database().unwrap();
        for i in 0..8 {
            let mut p = sample_payload(7, &format!("/img{i}.jpg"));
            p.vision_raw = Some(format!("analysis {i}"));
            save_request(&conn, &p).unwrap();
        }
        let mut placeholder = RequestPayload::placeholder(7, "/empty.jpg");
        placeholder.vision_raw = None;
        save_request(&conn, &placeholder).unwrap();

        let recent = get_recent_with_vision(&conn, 7, 5).unwrap();
        assert_eq!(recent.len(), 5);
        assert!(recent.iter().all(|r| r.vision_raw.is_some()));
    }
}
