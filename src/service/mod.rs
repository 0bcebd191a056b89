pub mod ops;

pub use ops::*;

use std::sync::Arc;

use rusqlite::Connection;
use thiserror::Error;

use crate::chat::{ChatError, ChatTool};
use crate::config::Settings;
use crate::db::{open_database, DatabaseError};
use crate::llm::{GeminiClient, LlmClient};
use crate::models::enums::VisionMode;
use crate::pipeline::batch::{FsImageSource, ImageSource};
use crate::pipeline::enhance::{Enhancer, GeminiEnhancer};
use crate::pipeline::summary::SummaryGenerator;
use crate::pipeline::validation::Validator;
use crate::pipeline::vision::{
    LocalVisionTool, MockVisionTool, OllamaVisionRuntime, RemoteVisionTool, VisionAnalyzer,
};
use crate::pipeline::AnnotationPipeline;

#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid path: {0}")]
    InvalidPath(String),

    #[error("Value too long: {0}")]
    TooLong(String),

    #[error("Vision model unavailable: {0}")]
    VisionUnavailable(String),

    #[error("Service unavailable: {0}")]
    ServiceUnavailable(String),

    #[error(transparent)]
    Database(DatabaseError),
}

impl From<DatabaseError> for ServiceError {
    fn from(e: DatabaseError) -> Self {
        match e {
            DatabaseError::NotFound { entity_type, key } => {
                ServiceError::NotFound(format!("{entity_type} {key}"))
            }
            DatabaseError::ConstraintViolation(reason) if reason.contains("exceeds") => {
                ServiceError::TooLong(reason)
            }
            other => ServiceError::Database(other),
        }
    }
}

impl From<ChatError> for ServiceError {
    fn from(e: ChatError) -> Self {
        match e {
            ChatError::RequestNotFound(id) => {
                ServiceError::NotFound(format!("annotation request {id}"))
            }
            ChatError::Database(db) => db.into(),
            other => ServiceError::ServiceUnavailable(other.to_string()),
        }
    }
}

impl ServiceError {
    /// Short user-facing message for UI layers; pairs with the error kind
    /// as a machine code.
    pub fn user_message(&self) -> String {
        match self {
            ServiceError::NotFound(what) => format!("Could not find {what}."),
            ServiceError::InvalidPath(path) => format!("The path {path} is not usable."),
            ServiceError::TooLong(reason) => format!("A field is too long: {reason}."),
            ServiceError::VisionUnavailable(_) => {
                "The vision model is currently unavailable. Please try again later.".into()
            }
            ServiceError::ServiceUnavailable(_) => {
                "I'm sorry, I could not process that request right now. Please try again.".into()
            }
            ServiceError::Database(_) => "The annotation store reported an error.".into(),
        }
    }
}

/// Everything a request handler needs, constructed once at the boundary.
///
/// There is deliberately no global state: the HTTP layer (out of scope
/// here) builds one `Context` in its startup hook and threads it through.
pub struct Context {
    pub(crate) conn: Connection,
    pub(crate) pipeline: AnnotationPipeline,
    pub(crate) chat: ChatTool,
    pub(crate) llm: Arc<dyn LlmClient>,
    pub(crate) source: Box<dyn ImageSource>,
    pub(crate) settings: Settings,
}

impl Context {
    /// Assemble a context from explicit parts (tests, embedders).
    pub fn new(
        conn: Connection,
        pipeline: AnnotationPipeline,
        chat: ChatTool,
        llm: Arc<dyn LlmClient>,
        source: Box<dyn ImageSource>,
        settings: Settings,
    ) -> Self {
        Self {
            conn,
            pipeline,
            chat,
            llm,
            source,
            settings,
        }
    }

    /// Boundary constructor: open the store and wire the production
    /// pipeline per the settings.
    pub fn from_settings(settings: Settings) -> Result<Self, ServiceError> {
        let conn = open_database(&settings.database_path)?;

        let llm: Arc<dyn LlmClient> = Arc::new(GeminiClient::new(
            &settings.google_api_key,
            &settings.gemini_model,
            settings.gemini_timeout_secs,
        ));
        let summary_llm = role_client(&llm, &settings, &settings.summary_model);
        let chat_llm = role_client(&llm, &settings, &settings.chat_model);

        let vision: Arc<dyn VisionAnalyzer> = match settings.vision_mode {
            VisionMode::Local => Arc::new(LocalVisionTool::new(
                Arc::new(OllamaVisionRuntime::default_local(
                    settings.vision_timeout_secs,
                    settings.vision_device,
                )),
                &settings.vision_model_id,
                settings.vision_device,
                &settings.vision_cache_dir,
            )),
            VisionMode::Remote => Arc::new(RemoteVisionTool::new(
                &settings.vision_endpoint_url,
                settings.vision_timeout_secs,
                settings.vision_auth_token.clone(),
            )),
            VisionMode::Mock => Arc::new(MockVisionTool::new(
                "Mock analysis: no acute cardiopulmonary findings.",
            )),
        };

        let enhancer: Option<Arc<dyn Enhancer>> = settings
            .enable_enhancement
            .then(|| Arc::new(GeminiEnhancer::new(Arc::clone(&llm))) as Arc<dyn Enhancer>);

        let pipeline = AnnotationPipeline::new(
            vision,
            Validator::new(
                Arc::clone(&llm),
                settings.validation_max_attempts,
                &settings.fallback_keywords,
            ),
            enhancer,
            SummaryGenerator::new(summary_llm),
        );

        let chat = ChatTool::new(chat_llm);

        tracing::info!(
            vision_mode = settings.vision_mode.as_str(),
            model = %settings.gemini_model,
            db = %settings.database_path.display(),
            "Service context initialized"
        );

        Ok(Self {
            conn,
            pipeline,
            chat,
            llm,
            source: Box::new(FsImageSource),
            settings,
        })
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }
}

/// Reuse the structured-output client when a role shares its model,
/// otherwise open a client for the role's model.
fn role_client(
    structured: &Arc<dyn LlmClient>,
    settings: &Settings,
    model: &str,
) -> Arc<dyn LlmClient> {
    if model == settings.gemini_model {
        Arc::clone(structured)
    } else {
        Arc::new(GeminiClient::new(
            &settings.google_api_key,
            model,
            settings.gemini_timeout_secs,
        ))
    }
}
