pub mod config;
pub mod models;
pub mod db;
pub mod llm;
pub mod pipeline;
pub mod chat;
pub mod service;

use tracing_subscriber::EnvFilter;

/// Initialize tracing for binaries and integration harnesses.
///
/// Honors `RUST_LOG`; falls back to the given level for this crate only.
/// Callers embedding the crate usually install their own subscriber instead.
pub fn init_tracing(default_level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("medannotate={default_level}")));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}
