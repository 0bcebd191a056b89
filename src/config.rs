use std::env;
use std::path::PathBuf;

use crate::models::enums::{DevicePreference, VisionMode};

pub const APP_NAME: &str = "medannotate";
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Application data directory: `~/.medannotate/`
pub fn app_data_dir() -> PathBuf {
    let home = dirs::home_dir().expect("Cannot determine home directory");
    home.join(".medannotate")
}

/// Default location of the SQLite store.
pub fn default_database_path() -> PathBuf {
    app_data_dir().join("annotations.db")
}

/// Default cache directory for local vision model weights.
pub fn default_model_cache_dir() -> PathBuf {
    app_data_dir().join("models")
}

/// Runtime settings, loaded from environment variables with defaults.
///
/// Every field can also be set programmatically; `from_env` is the boundary
/// loader used by binaries and supervision scripts.
#[derive(Debug, Clone)]
pub struct Settings {
    pub google_api_key: String,
    /// Structured-output model used for validation and enhancement.
    pub gemini_model: String,
    /// Summary model; defaults to the structured-output model.
    pub summary_model: String,
    /// Chat model; defaults to the structured-output model.
    pub chat_model: String,
    pub gemini_timeout_secs: u64,

    pub vision_mode: VisionMode,
    pub vision_model_id: String,
    pub vision_device: DevicePreference,
    pub vision_cache_dir: PathBuf,
    pub vision_endpoint_url: String,
    pub vision_timeout_secs: u64,
    pub vision_auth_token: Option<String>,

    pub validation_max_attempts: u32,
    pub enable_enhancement: bool,
    pub worker_pool_size: usize,

    pub database_path: PathBuf,
    pub log_level: String,

    /// Comma-separated override for the fallback parser vocabulary.
    /// Empty means the built-in radiology keyword list.
    pub fallback_keywords: Vec<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            google_api_key: String::new(),
            gemini_model: "gemini-2.0-flash-lite".into(),
            summary_model: "gemini-2.0-flash-lite".into(),
            chat_model: "gemini-2.0-flash-lite".into(),
            gemini_timeout_secs: 60,
            vision_mode: VisionMode::Local,
            vision_model_id: "google/medgemma-4b-it".into(),
            vision_device: DevicePreference::Auto,
            vision_cache_dir: default_model_cache_dir(),
            vision_endpoint_url: String::new(),
            vision_timeout_secs: 600,
            vision_auth_token: None,
            validation_max_attempts: 2,
            enable_enhancement: false,
            worker_pool_size: 1,
            database_path: default_database_path(),
            log_level: "info".into(),
            fallback_keywords: Vec::new(),
        }
    }
}

impl Settings {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let gemini_model = env_or("GEMINI_MODEL", defaults.gemini_model);
        Self {
            google_api_key: env_or("GOOGLE_API_KEY", defaults.google_api_key),
            summary_model: env_or("GEMINI_SUMMARY_MODEL", gemini_model.clone()),
            chat_model: env_or("GEMINI_CHAT_MODEL", gemini_model.clone()),
            gemini_model,
            gemini_timeout_secs: env_parsed("GEMINI_TIMEOUT_SECS", defaults.gemini_timeout_secs),
            vision_mode: env::var("VISION_MODE")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.vision_mode),
            vision_model_id: env_or("VISION_MODEL_ID", defaults.vision_model_id),
            vision_device: env::var("VISION_DEVICE")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.vision_device),
            vision_cache_dir: env::var("VISION_CACHE_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.vision_cache_dir),
            vision_endpoint_url: env_or("VISION_ENDPOINT_URL", defaults.vision_endpoint_url),
            vision_timeout_secs: env_parsed("VISION_TIMEOUT_SECS", defaults.vision_timeout_secs),
            vision_auth_token: env::var("VISION_AUTH_TOKEN").ok().filter(|t| !t.is_empty()),
            validation_max_attempts: env_parsed(
                "VALIDATION_MAX_ATTEMPTS",
                defaults.validation_max_attempts,
            ),
            enable_enhancement: env::var("ENABLE_ENHANCEMENT")
                .map(|v| v.eq_ignore_ascii_case("true") || v == "1")
                .unwrap_or(defaults.enable_enhancement),
            worker_pool_size: env_parsed("WORKER_POOL_SIZE", defaults.worker_pool_size).max(1),
            database_path: env::var("DATABASE_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.database_path),
            log_level: env_or("LOG_LEVEL", defaults.log_level),
            fallback_keywords: env::var("FALLBACK_KEYWORDS")
                .map(|v| {
                    v.split(',')
                        .map(|k| k.trim().to_lowercase())
                        .filter(|k| !k.is_empty())
                        .collect()
                })
                .unwrap_or_default(),
        }
    }
}

fn env_or(key: &str, default: String) -> String {
    env::var(key).unwrap_or(default)
}

fn env_parsed<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn app_data_dir_under_home() {
        let dir = app_data_dir();
        let home = dirs::home_dir().unwrap();
        assert!(dir.starts_with(home));
        assert!(dir.ends_with(".medannotate"));
    }

    #[test]
    fn defaults_are_sensible() {
        let s = Settings::default();
        assert_eq!(s.validation_max_attempts, 2);
        assert_eq!(s.vision_timeout_secs, 600);
        assert_eq!(s.gemini_timeout_secs, 60);
        assert_eq!(s.worker_pool_size, 1);
        assert!(matches!(s.vision_mode, VisionMode::Local));
        assert!(s.fallback_keywords.is_empty());
        assert_eq!(s.summary_model, s.gemini_model);
        assert_eq!(s.chat_model, s.gemini_model);
    }

    #[test]
    fn database_path_under_app_data() {
        let path = default_database_path();
        assert!(path.starts_with(app_data_dir()));
        assert!(path.ends_with("annotations.db"));
    }
}
