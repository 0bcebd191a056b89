pub mod gemini;
pub mod mock;

pub use gemini::*;
pub use mock::*;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum LlmError {
    #[error("LLM endpoint is unreachable: {0}")]
    Unreachable(String),

    #[error("LLM request timed out after {0}s")]
    Timeout(u64),

    #[error("LLM returned error (status {status}): {body}")]
    Api { status: u16, body: String },

    #[error("Failed to parse LLM response: {0}")]
    ResponseParsing(String),
}

/// Generation parameters for a single call.
///
/// Structured-output callers set `json_response` and a low temperature;
/// conversational callers leave the defaults.
#[derive(Debug, Clone)]
pub struct GenerationConfig {
    pub temperature: f32,
    pub max_output_tokens: u32,
    pub json_response: bool,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            temperature: 0.7,
            max_output_tokens: 2048,
            json_response: false,
        }
    }
}

impl GenerationConfig {
    pub fn json(temperature: f32) -> Self {
        Self {
            temperature,
            max_output_tokens: 2048,
            json_response: true,
        }
    }

    pub fn text(temperature: f32) -> Self {
        Self {
            temperature,
            max_output_tokens: 2048,
            json_response: false,
        }
    }
}

/// Structured-output LLM abstraction (allows mocking).
pub trait LlmClient: Send + Sync {
    fn generate(
        &self,
        prompt: &str,
        system: &str,
        config: &GenerationConfig,
    ) -> Result<String, LlmError>;

    /// Quick reachability probe for health reporting.
    fn is_available(&self) -> bool;
}
