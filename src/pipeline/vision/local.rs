use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use serde::{Deserialize, Serialize};

use super::{VisionAnalyzer, VisionError, VisionImage};
use crate::models::enums::DevicePreference;

/// System prompt for the local medical vision model.
const LOCAL_SYSTEM_PROMPT: &str = "You are an expert radiologist.";

/// Runtime seam for local model serving (allows mocking).
///
/// `load_model` is invoked exactly once per process under the load guard;
/// `infer` may be called concurrently afterwards; the runtime serializes
/// decoding internally if it cannot batch.
pub trait VisionRuntime: Send + Sync {
    fn load_model(
        &self,
        model_id: &str,
        device: DevicePreference,
        cache_dir: &Path,
    ) -> Result<(), VisionError>;

    fn infer(
        &self,
        model_id: &str,
        prompt: &str,
        system: &str,
        image_b64: &str,
    ) -> Result<String, VisionError>;

    fn ping(&self) -> bool;
}

/// Local vision tool with a lazily materialized model.
///
/// State machine: unloaded → loading → loaded | failed. The `OnceLock`
/// guard makes concurrent first calls block on one initialization; a
/// failed load is sticky so the pipeline never retries it per image.
pub struct LocalVisionTool {
    model_id: String,
    device: DevicePreference,
    cache_dir: PathBuf,
    runtime: std::sync::Arc<dyn VisionRuntime>,
    load_state: OnceLock<Result<(), String>>,
}

impl LocalVisionTool {
    pub fn new(
        runtime: std::sync::Arc<dyn VisionRuntime>,
        model_id: &str,
        device: DevicePreference,
        cache_dir: &Path,
    ) -> Self {
        Self {
            model_id: model_id.to_string(),
            device,
            cache_dir: cache_dir.to_path_buf(),
            runtime,
            load_state: OnceLock::new(),
        }
    }

    pub fn is_loaded(&self) -> bool {
        matches!(self.load_state.get(), Some(Ok(())))
    }

    fn ensure_loaded(&self) -> Result<(), VisionError> {
        let state = self.load_state.get_or_init(|| {
            tracing::info!(
                model_id = %self.model_id,
                device = self.device.as_str(),
                cache_dir = %self.cache_dir.display(),
                "Loading local vision model"
            );
            self.runtime
                .load_model(&self.model_id, self.device, &self.cache_dir)
                .map_err(|e| e.to_string())
        });
        match state {
            Ok(()) => Ok(()),
            Err(msg) => Err(VisionError::Unavailable(msg.clone())),
        }
    }
}

impl VisionAnalyzer for LocalVisionTool {
    fn analyze(&self, image: &VisionImage, prompt: &str) -> Result<String, VisionError> {
        self.ensure_loaded()?;

        let start = std::time::Instant::now();
        let response = self.runtime.infer(
            &self.model_id,
            prompt,
            LOCAL_SYSTEM_PROMPT,
            &image.to_base64(),
        )?;
        tracing::info!(
            model_id = %self.model_id,
            elapsed_ms = %start.elapsed().as_millis(),
            response_len = response.len(),
            "Local vision analysis complete"
        );
        Ok(response)
    }

    fn probe(&self) -> bool {
        self.runtime.ping()
    }
}

// ──────────────────────────────────────────────
// Ollama-backed runtime
// ──────────────────────────────────────────────

/// Local model serving via an Ollama-compatible daemon.
pub struct OllamaVisionRuntime {
    base_url: String,
    client: reqwest::blocking::Client,
    client_quick: reqwest::blocking::Client,
    timeout_secs: u64,
    device: DevicePreference,
}

impl OllamaVisionRuntime {
    pub fn new(base_url: &str, timeout_secs: u64, device: DevicePreference) -> Self {
        let client = reqwest::blocking::Client::builder()
            .timeout(std::time::Duration::from_secs(timeout_secs))
            .build()
            .expect("Failed to create HTTP client");
        let client_quick = reqwest::blocking::Client::builder()
            .timeout(std::time::Duration::from_secs(5))
            .build()
            .expect("Failed to create quick HTTP client");
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
            client_quick,
            timeout_secs,
            device,
        }
    }

    pub fn default_local(timeout_secs: u64, device: DevicePreference) -> Self {
        Self::new("http://localhost:11434", timeout_secs, device)
    }

    /// Pinning to CPU disables GPU offload; everything else lets the
    /// daemon pick per its own detection.
    fn inference_options(&self) -> Option<ChatOptions> {
        match self.device {
            DevicePreference::Cpu => Some(ChatOptions { num_gpu: 0 }),
            _ => None,
        }
    }
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    options: Option<ChatOptions>,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    images: Option<Vec<&'a str>>,
}

#[derive(Serialize)]
struct ChatOptions {
    num_gpu: i32,
}

#[derive(Deserialize)]
struct ChatResponse {
    message: ChatResponseMessage,
}

#[derive(Deserialize)]
struct ChatResponseMessage {
    content: String,
}

#[derive(Deserialize)]
struct TagsResponse {
    #[serde(default)]
    models: Vec<TagModel>,
}

#[derive(Deserialize)]
struct TagModel {
    name: String,
}

impl VisionRuntime for OllamaVisionRuntime {
    fn load_model(
        &self,
        model_id: &str,
        _device: DevicePreference,
        cache_dir: &Path,
    ) -> Result<(), VisionError> {
        if !cache_dir.as_os_str().is_empty() && !cache_dir.exists() {
            std::fs::create_dir_all(cache_dir)
                .map_err(|e| VisionError::Internal(format!("cannot create cache dir: {e}")))?;
        }

        let url = format!("{}/api/tags", self.base_url);
        let response = self.client_quick.get(&url).send().map_err(|e| {
            VisionError::Unavailable(format!("model daemon unreachable at {}: {e}", self.base_url))
        })?;

        let status = response.status();
        if !status.is_success() {
            return Err(VisionError::Unavailable(format!(
                "model daemon returned status {}",
                status.as_u16()
            )));
        }

        let tags: TagsResponse = response
            .json()
            .map_err(|e| VisionError::Protocol(format!("malformed tag list: {e}")))?;

        if !tags.models.iter().any(|m| m.name.starts_with(model_id)) {
            return Err(VisionError::Unavailable(format!(
                "model {model_id} is not installed"
            )));
        }
        Ok(())
    }

    fn infer(
        &self,
        model_id: &str,
        prompt: &str,
        system: &str,
        image_b64: &str,
    ) -> Result<String, VisionError> {
        let url = format!("{}/api/chat", self.base_url);
        let body = ChatRequest {
            model: model_id,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: system,
                    images: None,
                },
                ChatMessage {
                    role: "user",
                    content: prompt,
                    images: Some(vec![image_b64]),
                },
            ],
            stream: false,
            options: self.inference_options(),
        };

        let response = self.client.post(&url).json(&body).send().map_err(|e| {
            if e.is_timeout() {
                VisionError::Timeout(self.timeout_secs)
            } else {
                VisionError::Unavailable(e.to_string())
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(VisionError::Internal(format!(
                "inference failed (status {}): {body}",
                status.as_u16()
            )));
        }

        let parsed: ChatResponse = response
            .json()
            .map_err(|e| VisionError::Protocol(e.to_string()))?;
        Ok(parsed.message.content)
    }

    fn ping(&self) -> bool {
        let url = format!("{}/", self.base_url);
        matches!(self.client_quick.get(&url).send(), Ok(r) if r.status().is_success())
    }
}
