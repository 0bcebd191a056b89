//! Caller-facing operations over the annotation core.

use serde::Serialize;

use crate::chat::ChatMessage;
use crate::db::repository::{
    delete_annotation, get_annotations, get_request_by_path, get_requests, get_unprocessed,
    pipeline_stats, save_request, set_flag, update_annotation,
};
use crate::models::{AnnotationRecord, PipelineStats, RequestPayload, MAX_PATH_LEN};
use crate::pipeline::batch::{run_batch, BatchOptions};

use super::{Context, ServiceError};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LoadReport {
    pub loaded: u32,
    pub skipped: u32,
}

#[derive(Debug, Serialize)]
pub struct AnalyzeReport {
    pub processed: u32,
    pub errors: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct ExportPayload {
    pub dataset_name: String,
    pub total_annotations: usize,
    pub annotations: Vec<ExportedAnnotation>,
}

#[derive(Debug, Serialize)]
pub struct ExportedAnnotation {
    pub path: String,
    pub label: String,
    pub patient_id: i64,
    pub description: String,
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct Health {
    pub vision: bool,
    pub structured: bool,
    pub store: bool,
}

impl Context {
    /// Register image paths as staging rows awaiting analysis.
    ///
    /// Already-known paths are skipped; an unusable path rejects the call.
    pub fn load_dataset(
        &mut self,
        set_name: i64,
        paths: &[String],
    ) -> Result<LoadReport, ServiceError> {
        for path in paths {
            validate_path(path)?;
        }

        let mut report = LoadReport {
            loaded: 0,
            skipped: 0,
        };
        for path in paths {
            if get_request_by_path(&self.conn, set_name, path)?.is_some() {
                report.skipped += 1;
                continue;
            }
            save_request(&self.conn, &RequestPayload::placeholder(set_name, path))?;
            report.loaded += 1;
        }

        tracing::info!(
            set_name,
            loaded = report.loaded,
            skipped = report.skipped,
            "Dataset loaded"
        );
        Ok(report)
    }

    /// Run the pipeline over the dataset's staged rows.
    ///
    /// `force` re-analyzes already processed rows as well. Per-row
    /// failures are recorded in the report; the batch keeps going.
    pub fn analyze_dataset(
        &mut self,
        set_name: i64,
        prompt: Option<String>,
        force: bool,
    ) -> Result<AnalyzeReport, ServiceError> {
        let rows = if force {
            get_requests(&self.conn, set_name)?
        } else {
            get_unprocessed(&self.conn, set_name)?
        };

        // Fail fast when the backend is down before anything ran; failures
        // mid-batch still persist degraded rows for audit.
        if !rows.is_empty() && !self.pipeline.vision().probe() {
            return Err(ServiceError::VisionUnavailable(
                "vision backend did not answer the readiness probe".into(),
            ));
        }

        let options = BatchOptions {
            prompt,
            enable_enhancement: self.settings.enable_enhancement,
            worker_pool_size: self.settings.worker_pool_size,
        };

        let result = run_batch(
            &mut self.conn,
            &self.pipeline,
            self.source.as_ref(),
            &rows,
            &options,
            None,
        )?;

        Ok(AnalyzeReport {
            processed: result.processed,
            errors: result.errors,
        })
    }

    pub fn get_annotations(&self, set_name: i64) -> Result<Vec<AnnotationRecord>, ServiceError> {
        self.require_dataset(set_name)?;
        Ok(get_annotations(&self.conn, set_name)?)
    }

    /// Export the production rows as the interchange JSON shape.
    pub fn export(&self, set_name: i64) -> Result<ExportPayload, ServiceError> {
        self.require_dataset(set_name)?;
        let annotations = get_annotations(&self.conn, set_name)?;
        let exported: Vec<ExportedAnnotation> = annotations
            .into_iter()
            .map(|a| ExportedAnnotation {
                path: a.path_url,
                label: a.label,
                patient_id: a.patient_id,
                description: a.desc,
            })
            .collect();

        Ok(ExportPayload {
            dataset_name: set_name.to_string(),
            total_annotations: exported.len(),
            annotations: exported,
        })
    }

    /// Manual annotation edit; never touches the staging row.
    pub fn update_annotation(
        &self,
        set_name: i64,
        path_url: &str,
        label: Option<&str>,
        desc: Option<&str>,
    ) -> Result<AnnotationRecord, ServiceError> {
        Ok(update_annotation(&self.conn, set_name, path_url, label, desc)?)
    }

    /// Remove a production row; `deep` also removes the audit row.
    pub fn delete_annotation(
        &mut self,
        set_name: i64,
        path_url: &str,
        deep: bool,
    ) -> Result<(), ServiceError> {
        if !delete_annotation(&mut self.conn, set_name, path_url, deep)? {
            return Err(ServiceError::NotFound(format!(
                "annotation {set_name}:{path_url}"
            )));
        }
        Ok(())
    }

    /// Toggle the review flag; flagging an unseen path stages a placeholder.
    pub fn flag(
        &mut self,
        set_name: i64,
        path_url: &str,
        flagged: bool,
    ) -> Result<bool, ServiceError> {
        validate_path(path_url)?;
        Ok(set_flag(&self.conn, set_name, path_url, flagged)?)
    }

    /// Dataset-aware chat; focused on one staging row iff `request_id`.
    pub fn chat(
        &mut self,
        message: &str,
        set_name: i64,
        request_id: Option<i64>,
        history: &[ChatMessage],
    ) -> Result<String, ServiceError> {
        let options = BatchOptions {
            prompt: None,
            enable_enhancement: self.settings.enable_enhancement,
            worker_pool_size: self.settings.worker_pool_size,
        };
        self.chat
            .chat(
                &mut self.conn,
                &self.pipeline,
                self.source.as_ref(),
                message,
                set_name,
                request_id,
                history,
                &options,
            )
            .map_err(Into::into)
    }

    pub fn pipeline_stats(&self, set_name: i64) -> Result<PipelineStats, ServiceError> {
        Ok(pipeline_stats(&self.conn, set_name)?)
    }

    pub fn health(&self) -> Health {
        let store = self
            .conn
            .query_row("SELECT 1", [], |row| row.get::<_, i64>(0))
            .is_ok();
        Health {
            vision: self.pipeline.vision().probe(),
            structured: self.llm.is_available(),
            store,
        }
    }

    fn require_dataset(&self, set_name: i64) -> Result<(), ServiceError> {
        let known: i64 = self
            .conn
            .query_row(
                "SELECT COUNT(*) FROM annotation_request WHERE set_name = ?1",
                [set_name],
                |row| row.get(0),
            )
            .map_err(crate::db::DatabaseError::from)?;
        if known == 0 {
            return Err(ServiceError::NotFound(format!("dataset {set_name}")));
        }
        Ok(())
    }
}

fn validate_path(path: &str) -> Result<(), ServiceError> {
    if path.trim().is_empty() {
        return Err(ServiceError::InvalidPath("empty path".into()));
    }
    if path.chars().count() > MAX_PATH_LEN {
        return Err(ServiceError::InvalidPath(format!(
            "path exceeds {MAX_PATH_LEN} characters"
        )));
    }
    Ok(())
}
