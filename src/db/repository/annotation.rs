use rusqlite::{params, Connection, OptionalExtension};

use crate::db::DatabaseError;
use crate::models::{AnnotationRecord, JoinedAnnotation, MAX_DESC_LEN, MAX_LABEL_LEN};

use super::request::get_request;

/// Register a label, ignoring duplicates.
pub fn add_label(conn: &Connection, name: &str) -> Result<(), DatabaseError> {
    conn.execute("INSERT OR IGNORE INTO label (name) VALUES (?1)", params![name])?;
    Ok(())
}

pub fn get_labels(conn: &Connection) -> Result<Vec<String>, DatabaseError> {
    let mut stmt = conn.prepare("SELECT name FROM label ORDER BY name")?;
    let rows = stmt.query_map([], |row| row.get(0))?;
    let mut labels = Vec::new();
    for row in rows {
        labels.push(row?);
    }
    Ok(labels)
}

/// Register a patient, ignoring duplicates.
pub fn add_patient(conn: &Connection, id: i64, name: &str) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT OR IGNORE INTO patient (id, name) VALUES (?1, ?2)",
        params![id, name],
    )?;
    Ok(())
}

pub fn get_patients(conn: &Connection) -> Result<Vec<(i64, String)>, DatabaseError> {
    let mut stmt = conn.prepare("SELECT id, name FROM patient ORDER BY id")?;
    let rows = stmt.query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?;
    let mut patients = Vec::new();
    for row in rows {
        patients.push(row?);
    }
    Ok(patients)
}

/// Promote a staging row to tier 2.
///
/// One transaction covers the label registration, the production-row
/// upsert and the processed-flag flip; all three commit or none do.
pub fn process_request(
    conn: &mut Connection,
    request_id: i64,
    desc: &str,
    label: &str,
    patient_id: i64,
) -> Result<(), DatabaseError> {
    if desc.chars().count() > MAX_DESC_LEN {
        return Err(DatabaseError::ConstraintViolation(format!(
            "desc exceeds {MAX_DESC_LEN} characters"
        )));
    }
    if label.chars().count() > MAX_LABEL_LEN {
        return Err(DatabaseError::ConstraintViolation(format!(
            "label exceeds {MAX_LABEL_LEN} characters"
        )));
    }

    let request = get_request(conn, request_id)?.ok_or_else(|| DatabaseError::NotFound {
        entity_type: "AnnotationRequest".into(),
        key: request_id.to_string(),
    })?;

    let tx = conn.transaction()?;
    tx.execute("INSERT OR IGNORE INTO label (name) VALUES (?1)", params![label])?;
    tx.execute(
        "INSERT OR IGNORE INTO patient (id, name) VALUES (?1, 'Unknown')",
        params![patient_id],
    )?;
    tx.execute(
        "INSERT INTO annotation (set_name, path_url, label, patient_id, \"desc\", request_id)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)
         ON CONFLICT (set_name, path_url) DO UPDATE SET
             label = excluded.label,
             patient_id = excluded.patient_id,
             \"desc\" = excluded.\"desc\",
             request_id = excluded.request_id",
        params![request.set_name, request.path_url, label, patient_id, desc, request_id],
    )?;
    tx.execute(
        "UPDATE annotation_request SET processed = 1 WHERE id = ?1",
        params![request_id],
    )?;
    tx.commit()?;

    tracing::info!(
        request_id,
        set_name = request.set_name,
        path = %request.path_url,
        label,
        "Staging row promoted to annotation"
    );
    Ok(())
}

pub fn get_annotations(
    conn: &Connection,
    set_name: i64,
) -> Result<Vec<AnnotationRecord>, DatabaseError> {
    let mut stmt = conn.prepare(
        "SELECT set_name, path_url, label, patient_id, \"desc\", request_id
         FROM annotation WHERE set_name = ?1 ORDER BY path_url",
    )?;
    let rows = stmt.query_map(params![set_name], annotation_from_row)?;
    let mut out = Vec::new();
    for row in rows {
        out.push(row?);
    }
    Ok(out)
}

pub fn get_annotation(
    conn: &Connection,
    set_name: i64,
    path_url: &str,
) -> Result<Option<AnnotationRecord>, DatabaseError> {
    let mut stmt = conn.prepare(
        "SELECT set_name, path_url, label, patient_id, \"desc\", request_id
         FROM annotation WHERE set_name = ?1 AND path_url = ?2",
    )?;
    let record = stmt
        .query_row(params![set_name, path_url], annotation_from_row)
        .optional()?;
    Ok(record)
}

/// Production row joined with its staging row for audit.
pub fn get_annotation_with_request(
    conn: &Connection,
    set_name: i64,
    path_url: &str,
) -> Result<Option<JoinedAnnotation>, DatabaseError> {
    let Some(annotation) = get_annotation(conn, set_name, path_url)? else {
        return Ok(None);
    };
    let Some(request_id) = annotation.request_id else {
        return Ok(None);
    };
    let Some(request) = get_request(conn, request_id)? else {
        return Ok(None);
    };
    Ok(Some(JoinedAnnotation { annotation, request }))
}

/// Manual edit of label and/or description. Never touches the staging row.
pub fn update_annotation(
    conn: &Connection,
    set_name: i64,
    path_url: &str,
    label: Option<&str>,
    desc: Option<&str>,
) -> Result<AnnotationRecord, DatabaseError> {
    if let Some(label) = label {
        if label.chars().count() > MAX_LABEL_LEN {
            return Err(DatabaseError::ConstraintViolation(format!(
                "label exceeds {MAX_LABEL_LEN} characters"
            )));
        }
        add_label(conn, label)?;
        conn.execute(
            "UPDATE annotation SET label = ?3 WHERE set_name = ?1 AND path_url = ?2",
            params![set_name, path_url, label],
        )?;
    }
    if let Some(desc) = desc {
        if desc.chars().count() > MAX_DESC_LEN {
            return Err(DatabaseError::ConstraintViolation(format!(
                "desc exceeds {MAX_DESC_LEN} characters"
            )));
        }
        conn.execute(
            "UPDATE annotation SET \"desc\" = ?3 WHERE set_name = ?1 AND path_url = ?2",
            params![set_name, path_url, desc],
        )?;
    }

    get_annotation(conn, set_name, path_url)?.ok_or_else(|| DatabaseError::NotFound {
        entity_type: "Annotation".into(),
        key: format!("{set_name}:{path_url}"),
    })
}

/// Delete a production row.
///
/// `deep` also removes the staging row; the schema-level cascade then
/// guarantees no orphaned production row survives. The default keeps the
/// audit trail so a re-analysis can rewrite fields in place.
pub fn delete_annotation(
    conn: &mut Connection,
    set_name: i64,
    path_url: &str,
    deep: bool,
) -> Result<bool, DatabaseError> {
    let Some(annotation) = get_annotation(conn, set_name, path_url)? else {
        return Ok(false);
    };

    let tx = conn.transaction()?;
    if deep {
        if let Some(request_id) = annotation.request_id {
            // Cascade removes the annotation row.
            tx.execute(
                "DELETE FROM annotation_request WHERE id = ?1",
                params![request_id],
            )?;
        }
    }
    tx.execute(
        "DELETE FROM annotation WHERE set_name = ?1 AND path_url = ?2",
        params![set_name, path_url],
    )?;
    tx.commit()?;
    Ok(true)
}

fn annotation_from_row(row: &rusqlite::Row) -> rusqlite::Result<AnnotationRecord> {
    Ok(AnnotationRecord {
        set_name: row.get(0)?,
        path_url: row.get(1)?,
        label: row.get(2)?,
        patient_id: row.get(3)?,
        desc: row.get(4)?,
        request_id: row.get(5)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::open_memory_database;
    use crate::db::repository::request::{get_request_by_path, save_request, set_flag};
    use crate::models::{RequestPayload, ValidationStatus};

    fn saved_request(conn: &Connection, set_name: i64, path: &str) -> i64 {
        let payload = RequestPayload {
            set_name,
            path_url: path.to_string(),
            vision_raw: Some("Small right pneumothorax.".into()),
            structured_json: None,
            validation_attempts: 1,
            validation_status: ValidationStatus::Success,
            pydantic_output: Some(r#"{"findings":[],"confidence_score":0.8}"#.into()),
            confidence_score: 0.8,
            enhanced: false,
            report: None,
            urgency_level: None,
            clinical_significance: None,
            processing_error: None,
        };
        save_request(conn, &payload).unwrap()
    }

    #[test]
    fn label_and_patient_registration_ignore_duplicates() {
        let conn = open_memory_database().unwrap();
        add_label(&conn, "Pneumonia").unwrap();
        add_label(&conn, "Pneumonia").unwrap();
        assert_eq!(get_labels(&conn).unwrap(), vec!["Pneumonia".to_string()]);

        add_patient(&conn, 42, "Jane Doe").unwrap();
        add_patient(&conn, 42, "Someone Else").unwrap();
        let patients = get_patients(&conn).unwrap();
        // Default patient 0 is seeded by the schema.
        assert_eq!(patients.len(), 2);
        assert_eq!(patients[1], (42, "Jane Doe".to_string()));
    }

    #[test]
    fn process_request_writes_both_tiers() {
        let mut conn = open_memory_database().unwrap();
        let id = saved_request(&conn, 7, "/img.jpg");

        process_request(&mut conn, id, "PRIMARY DIAGNOSIS: Pneumothorax", "Pneumothorax", 0)
            .unwrap();

        let annotation = get_annotation(&conn, 7, "/img.jpg").unwrap().unwrap();
        assert_eq!(annotation.label, "Pneumothorax");
        assert_eq!(annotation.request_id, Some(id));

        let request = get_request(&conn, id).unwrap().unwrap();
        assert!(request.processed);

        let labels = get_labels(&conn).unwrap();
        assert!(labels.contains(&"Pneumothorax".to_string()));
    }

    #[test]
    fn process_request_unknown_id_errors() {
        let mut conn = open_memory_database().unwrap();
        let err = process_request(&mut conn, 999, "desc", "label", 0).unwrap_err();
        assert!(matches!(err, DatabaseError::NotFound { .. }));
    }

    #[test]
    fn process_request_rejects_oversized_label() {
        let mut conn = open_memory_database().unwrap();
        let id = saved_request(&conn, 7, "/img.jpg");
        let err = process_request(&mut conn, id, "desc", &"x".repeat(21), 0).unwrap_err();
        assert!(matches!(err, DatabaseError::ConstraintViolation(_)));
        // Nothing committed: row still unprocessed, no annotation.
        assert!(!get_request(&conn, id).unwrap().unwrap().processed);
        assert!(get_annotation(&conn, 7, "/img.jpg").unwrap().is_none());
    }

    #[test]
    fn reprocessing_upserts_single_annotation() {
        let mut conn = open_memory_database().unwrap();
        let id = saved_request(&conn, 7, "/img.jpg");
        process_request(&mut conn, id, "first", "Effusion", 0).unwrap();
        process_request(&mut conn, id, "second", "Pneumonia", 0).unwrap();

        let annotations = get_annotations(&conn, 7).unwrap();
        assert_eq!(annotations.len(), 1);
        assert_eq!(annotations[0].label, "Pneumonia");
        assert_eq!(annotations[0].desc, "second");
    }

    #[test]
    fn joined_lookup_returns_both_tiers() {
        let mut conn = open_memory_database().unwrap();
        let id = saved_request(&conn, 7, "/img.jpg");
        process_request(&mut conn, id, "desc", "Effusion", 3).unwrap();

        let joined = get_annotation_with_request(&conn, 7, "/img.jpg")
            .unwrap()
            .unwrap();
        assert_eq!(joined.annotation.patient_id, 3);
        assert_eq!(joined.request.id, id);
        assert!(joined.request.processed);
    }

    #[test]
    fn update_annotation_leaves_request_untouched() {
        let mut conn = open_memory_database().unwrap();
        let id = saved_request(&conn, 7, "/img.jpg");
        process_request(&mut conn, id, "desc", "Effusion", 0).unwrap();

        let updated =
            update_annotation(&conn, 7, "/img.jpg", Some("Reviewed"), Some("manual text"))
                .unwrap();
        assert_eq!(updated.label, "Reviewed");
        assert_eq!(updated.desc, "manual text");

        let request = get_request(&conn, id).unwrap().unwrap();
        assert!(request.processed);
        assert_eq!(request.confidence_score, 0.8);
    }

    #[test]
    fn update_missing_annotation_is_not_found() {
        let conn = open_memory_database().unwrap();
        let err = update_annotation(&conn, 7, "/ghost.jpg", Some("L"), None).unwrap_err();
        assert!(matches!(err, DatabaseError::NotFound { .. }));
    }

    #[test]
    fn shallow_delete_keeps_audit_row() {
        let mut conn = open_memory_database().unwrap();
        let id = saved_request(&conn, 7, "/img.jpg");
        process_request(&mut conn, id, "desc", "Effusion", 0).unwrap();

        assert!(delete_annotation(&mut conn, 7, "/img.jpg", false).unwrap());
        assert!(get_annotation(&conn, 7, "/img.jpg").unwrap().is_none());
        assert!(get_request(&conn, id).unwrap().is_some());
    }

    #[test]
    fn deep_delete_cascades_request() {
        let mut conn = open_memory_database().unwrap();
        let id = saved_request(&conn, 7, "/img.jpg");
        process_request(&mut conn, id, "desc", "Effusion", 0).unwrap();

        assert!(delete_annotation(&mut conn, 7, "/img.jpg", true).unwrap());
        assert!(get_annotation(&conn, 7, "/img.jpg").unwrap().is_none());
        assert!(get_request(&conn, id).unwrap().is_none());
    }

    #[test]
    fn delete_missing_annotation_returns_false() {
        let mut conn = open_memory_database().unwrap();
        assert!(!delete_annotation(&mut conn, 7, "/ghost.jpg", false).unwrap());
    }

    #[test]
    fn flag_survives_processing() {
        let mut conn = open_memory_database().unwrap();
        let id = saved_request(&conn, 7, "/img.jpg");
        set_flag(&conn, 7, "/img.jpg", true).unwrap();

        process_request(&mut conn, id, "desc", "Effusion", 0).unwrap();
        let row = get_request_by_path(&conn, 7, "/img.jpg").unwrap().unwrap();
        assert!(row.flagged);
        assert!(row.processed);
    }
}
