//! Batch analysis over staged rows.
//!
//! Consumes rows in creation order and fans the per-image pipeline calls
//! out over a bounded worker pool (default bound 1, since local inference is
//! effectively single-threaded). All repository writes happen on the
//! coordinating thread; workers only compute.

use std::time::Instant;

use rusqlite::Connection;
use uuid::Uuid;

use crate::db::repository::{process_request, save_request};
use crate::db::DatabaseError;
use crate::models::{AnnotationRequest, RequestPayload};

use super::annotate::{AnnotateOutput, AnnotationPipeline};
use super::serialize::coerce_patient_id;
use super::vision::{VisionError, VisionImage};

/// Source of image bytes for a staged path.
pub trait ImageSource: Send + Sync {
    fn load(&self, path_url: &str) -> Result<VisionImage, VisionError>;
}

/// Reads images from the local filesystem.
pub struct FsImageSource;

impl ImageSource for FsImageSource {
    fn load(&self, path_url: &str) -> Result<VisionImage, VisionError> {
        let bytes = std::fs::read(path_url)
            .map_err(|e| VisionError::InvalidImage(format!("cannot read {path_url}: {e}")))?;
        VisionImage::from_bytes(bytes)
    }
}

#[derive(Debug, Clone)]
pub struct BatchOptions {
    pub prompt: Option<String>,
    pub enable_enhancement: bool,
    pub worker_pool_size: usize,
}

impl Default for BatchOptions {
    fn default() -> Self {
        Self {
            prompt: None,
            enable_enhancement: false,
            worker_pool_size: 1,
        }
    }
}

#[derive(Debug)]
pub struct BatchResult {
    pub batch_id: Uuid,
    pub processed: u32,
    pub errors: Vec<String>,
    pub duration_ms: u64,
}

impl BatchResult {
    fn empty() -> Self {
        Self {
            batch_id: Uuid::new_v4(),
            processed: 0,
            errors: Vec::new(),
            duration_ms: 0,
        }
    }
}

#[derive(Debug, Clone)]
pub enum BatchStatusEvent {
    Started { total: u32 },
    Progress { completed: u32, total: u32, path: String },
    Completed { processed: u32, errors: u32 },
}

/// Run the pipeline over the given staged rows.
///
/// A failing row records its error and the batch continues; failed rows
/// are persisted with `processing_error` set and never reach tier 2.
pub fn run_batch(
    conn: &mut Connection,
    pipeline: &AnnotationPipeline,
    source: &dyn ImageSource,
    rows: &[AnnotationRequest],
    options: &BatchOptions,
    progress: Option<&dyn Fn(BatchStatusEvent)>,
) -> Result<BatchResult, DatabaseError> {
    let start = Instant::now();
    let mut result = BatchResult::empty();

    if rows.is_empty() {
        return Ok(result);
    }

    let total = rows.len() as u32;
    let pool = options.worker_pool_size.max(1);
    tracing::info!(batch_id = %result.batch_id, total, pool, "Starting batch analysis");

    if let Some(progress) = progress {
        progress(BatchStatusEvent::Started { total });
    }

    let mut completed: u32 = 0;
    for chunk in rows.chunks(pool) {
        let outputs = annotate_chunk(pipeline, source, chunk, options);

        for (row, output) in chunk.iter().zip(outputs) {
            if let Some(progress) = progress {
                progress(BatchStatusEvent::Progress {
                    completed,
                    total,
                    path: row.path_url.clone(),
                });
            }

            let request_id = save_request(conn, &output.payload)?;
            if output.failed() {
                let reason = output
                    .payload
                    .processing_error
                    .as_deref()
                    .unwrap_or("unknown error");
                result.errors.push(format!("{}: {reason}", row.path_url));
                tracing::warn!(path = %row.path_url, error = %reason, "Batch row failed");
            } else {
                let patient_id = coerce_patient_id(output.annotation.patient_id.as_deref());
                process_request(
                    conn,
                    request_id,
                    &output.desc_text,
                    &output.primary_label,
                    patient_id,
                )?;
                result.processed += 1;
            }
            completed += 1;
        }
    }

    result.duration_ms = start.elapsed().as_millis() as u64;

    if let Some(progress) = progress {
        progress(BatchStatusEvent::Completed {
            processed: result.processed,
            errors: result.errors.len() as u32,
        });
    }

    tracing::info!(
        batch_id = %result.batch_id,
        processed = result.processed,
        errors = result.errors.len(),
        duration_ms = result.duration_ms,
        "Batch analysis complete"
    );
    Ok(result)
}

/// Annotate one chunk of rows, at most one worker per row.
fn annotate_chunk(
    pipeline: &AnnotationPipeline,
    source: &dyn ImageSource,
    chunk: &[AnnotationRequest],
    options: &BatchOptions,
) -> Vec<AnnotateOutput> {
    if chunk.len() == 1 {
        return vec![annotate_row(pipeline, source, &chunk[0], options)];
    }

    std::thread::scope(|scope| {
        let handles: Vec<_> = chunk
            .iter()
            .map(|row| scope.spawn(move || annotate_row(pipeline, source, row, options)))
            .collect();
        handles
            .into_iter()
            .zip(chunk)
            .map(|(handle, row)| {
                handle.join().unwrap_or_else(|_| {
                    failed_output(row, "annotation worker panicked".to_string())
                })
            })
            .collect()
    })
}

fn annotate_row(
    pipeline: &AnnotationPipeline,
    source: &dyn ImageSource,
    row: &AnnotationRequest,
    options: &BatchOptions,
) -> AnnotateOutput {
    match source.load(&row.path_url) {
        Ok(image) => pipeline.annotate(
            &image,
            row.set_name,
            &row.path_url,
            options.prompt.as_deref(),
            None,
            options.enable_enhancement,
        ),
        Err(e) => failed_output(row, e.to_string()),
    }
}

/// Payload for a row whose image never reached the pipeline.
fn failed_output(row: &AnnotationRequest, reason: String) -> AnnotateOutput {
    let mut payload = RequestPayload::placeholder(row.set_name, &row.path_url);
    payload.processing_error = Some(reason);
    AnnotateOutput {
        annotation: crate::models::Annotation::empty(None, "medgemma/unavailable"),
        payload,
        desc_text: String::new(),
        primary_label: "Analysis Incomplete".to_string(),
    }
}
