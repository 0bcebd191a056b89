pub mod context;
pub mod tool;

pub use context::*;
pub use tool::*;

use thiserror::Error;

use crate::db::DatabaseError;
use crate::llm::LlmError;

#[derive(Error, Debug)]
pub enum ChatError {
    #[error("Chat model error: {0}")]
    Llm(#[from] LlmError),

    #[error(transparent)]
    Database(#[from] DatabaseError),

    #[error("Annotation request {0} not found")]
    RequestNotFound(i64),

    #[error("Model requested unknown tool: {0}")]
    UnknownTool(String),
}
