use rusqlite::{params, Connection};

use crate::db::DatabaseError;
use crate::models::PipelineStats;

/// Aggregate pipeline counters for one dataset.
///
/// `avg_confidence` covers rows that actually went through validation
/// (placeholder rows with no typed output would drag the average down).
pub fn pipeline_stats(conn: &Connection, set_name: i64) -> Result<PipelineStats, DatabaseError> {
    conn.query_row(
        "SELECT
             COUNT(*),
             COALESCE(SUM(processed), 0),
             COALESCE(SUM(CASE WHEN validation_status = 'success' THEN 1 ELSE 0 END), 0),
             COALESCE(SUM(CASE WHEN validation_status = 'retry' THEN 1 ELSE 0 END), 0),
             COALESCE(SUM(CASE WHEN validation_status = 'fallback' THEN 1 ELSE 0 END), 0),
             COALESCE(SUM(enhanced), 0),
             AVG(CASE WHEN pydantic_output IS NOT NULL THEN confidence_score END)
         FROM annotation_request WHERE set_name = ?1",
        params![set_name],
        |row| {
            let total: u32 = row.get(0)?;
            let processed: u32 = row.get(1)?;
            Ok(PipelineStats {
                total,
                processed,
                unprocessed: total - processed,
                success: row.get(2)?,
                retry: row.get(3)?,
                fallback: row.get(4)?,
                enhanced_count: row.get(5)?,
                avg_confidence: row.get(6)?,
            })
        },
    )
    .map_err(Into::into)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::open_memory_database;
    use crate::db::repository::annotation::process_request;
    use crate::db::repository::request::{save_request, set_flag};
    use crate::models::{RequestPayload, ValidationStatus};

    fn payload(set: i64, path: &str, status: ValidationStatus, score: f64) -> RequestPayload {
        RequestPayload {
            set_name: set,
            path_url: path.to_string(),
            vision_raw: Some("text".into()),
            structured_json: None,
            validation_attempts: 1,
            validation_status: status,
            pydantic_output: Some("{}".into()),
            confidence_score: score,
            enhanced: false,
            report: None,
            urgency_level: None,
            clinical_significance: None,
            processing_error: None,
        }
    }

    #[test]
    fn empty_dataset_yields_zeroes() {
        let conn = open_memory_database().unwrap();
        let stats = pipeline_stats(&conn, 7).unwrap();
        assert_eq!(stats.total, 0);
        assert_eq!(stats.processed, 0);
        assert!(stats.avg_confidence.is_none());
    }

    #[test]
    fn counts_by_status_and_processed() {
        let mut conn = open_memory_database().unwrap();
        let id = save_request(&conn, &payload(7, "/a.jpg", ValidationStatus::Success, 0.9)).unwrap();
        save_request(&conn, &payload(7, "/b.jpg", ValidationStatus::Retry, 0.7)).unwrap();
        save_request(&conn, &payload(7, "/c.jpg", ValidationStatus::Fallback, 0.3)).unwrap();
        process_request(&mut conn, id, "desc", "Label", 0).unwrap();

        let stats = pipeline_stats(&conn, 7).unwrap();
        assert_eq!(stats.total, 3);
        assert_eq!(stats.processed, 1);
        assert_eq!(stats.unprocessed, 2);
        assert_eq!(stats.success, 1);
        assert_eq!(stats.retry, 1);
        assert_eq!(stats.fallback, 1);
        assert_eq!(stats.enhanced_count, 0);

        let avg = stats.avg_confidence.unwrap();
        assert!((avg - (0.9 + 0.7 + 0.3) / 3.0).abs() < 1e-9);
    }

    #[test]
    fn placeholder_rows_excluded_from_average() {
        let conn = open_memory_database().unwrap();
        save_request(&conn, &payload(7, "/a.jpg", ValidationStatus::Success, 0.8)).unwrap();
        set_flag(&conn, 7, "/flagged-only.jpg", true).unwrap();

        let stats = pipeline_stats(&conn, 7).unwrap();
        assert_eq!(stats.total, 2);
        let avg = stats.avg_confidence.unwrap();
        assert!((avg - 0.8).abs() < 1e-9);
    }

    #[test]
    fn enhanced_rows_counted() {
        let conn = open_memory_database().unwrap();
        let mut p = payload(7, "/a.jpg", ValidationStatus::Success, 0.9);
        p.enhanced = true;
        save_request(&conn, &p).unwrap();

        let stats = pipeline_stats(&conn, 7).unwrap();
        assert_eq!(stats.enhanced_count, 1);
    }
}
