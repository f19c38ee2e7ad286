use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Application-level constants
pub const APP_NAME: &str = "RadAssist";
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Environment variable prefix for configuration overrides.
const ENV_PREFIX: &str = "RADASSIST_";

/// Default tracing filter when `RUST_LOG` is not set.
pub fn default_log_filter() -> &'static str {
    "info,radassist=debug"
}

/// Get the application data directory
/// ~/RadAssist/ on all platforms. Falls back to the working directory
/// when no home directory can be determined (containers, service accounts).
pub fn app_data_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(APP_NAME)
}

/// Get the models directory (ONNX classifier, embedder)
pub fn models_dir() -> PathBuf {
    app_data_dir().join("models")
}

/// Get the pathology classifier model directory (densenet121-res224-all export)
pub fn classifier_model_dir() -> PathBuf {
    models_dir().join("densenet121-res224-all")
}

/// Get the embedding model directory (all-MiniLM-L6-v2)
pub fn embedding_model_dir() -> PathBuf {
    models_dir().join("all-MiniLM-L6-v2")
}

/// Sampling options forwarded to the generative model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationOptions {
    pub max_new_tokens: u32,
    pub temperature: f32,
    pub top_p: f32,
}

impl GenerationOptions {
    /// Long-form structured report.
    pub fn report() -> Self {
        Self {
            max_new_tokens: 512,
            temperature: 0.7,
            top_p: 0.9,
        }
    }

    /// Shorter conversational answer.
    pub fn chat() -> Self {
        Self {
            max_new_tokens: 256,
            temperature: 0.7,
            top_p: 0.9,
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    #[error("confidence_threshold must be within [0, 1], got {0}")]
    ThresholdOutOfRange(f32),

    #[error("{field} must be at least 1")]
    Zero { field: &'static str },

    #[error("Config parsing failed: {0}")]
    Parse(String),
}

/// Runtime configuration for the analysis core.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AssistConfig {
    /// Minimum classifier confidence for a finding to be reported.
    pub confidence_threshold: f32,
    /// Number of similar cases retrieved per analysis.
    pub top_k: usize,
    /// Trailing chat turns included in a chat prompt.
    pub history_window: usize,
    /// Report characters included in a derived case context.
    pub case_report_chars: usize,
    /// Hard cap on a caller-supplied case context.
    pub case_context_max_chars: usize,
    /// Characters of each similar case included in the report prompt.
    pub similar_case_chars: usize,
    /// Upload size limit for images.
    pub max_image_bytes: usize,
    pub ollama_url: String,
    pub llm_model: String,
    pub ollama_timeout_secs: u64,
    pub report_options: GenerationOptions,
    pub chat_options: GenerationOptions,
    pub classifier_model_dir: PathBuf,
    pub embedding_model_dir: PathBuf,
    /// When set, the retrieval index is built lazily from this file on the
    /// first analysis that finds it missing.
    pub corpus_path: Option<PathBuf>,
}

impl Default for AssistConfig {
    fn default() -> Self {
        Self {
            confidence_threshold: 0.30,
            top_k: 3,
            history_window: 6,
            case_report_chars: 500,
            case_context_max_chars: 2000,
            similar_case_chars: 500,
            max_image_bytes: 10 * 1024 * 1024,
            ollama_url: "http://localhost:11434".to_string(),
            llm_model: "medalpaca".to_string(),
            ollama_timeout_secs: 300,
            report_options: GenerationOptions::report(),
            chat_options: GenerationOptions::chat(),
            classifier_model_dir: classifier_model_dir(),
            embedding_model_dir: embedding_model_dir(),
            corpus_path: None,
        }
    }
}

impl AssistConfig {
    /// Defaults overridden by `RADASSIST_*` environment variables.
    ///
    /// Unparseable values are ignored with a warning so a typo never
    /// prevents startup.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Strict JSON loading: missing fields take their defaults, invalid
    /// values are rejected.
    pub fn from_json(raw: &str) -> Result<Self, ConfigError> {
        let config: Self =
            serde_json::from_str(raw).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Check the values every component relies on.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..=1.0).contains(&self.confidence_threshold) {
            return Err(ConfigError::ThresholdOutOfRange(self.confidence_threshold));
        }
        let counts = [
            ("top_k", self.top_k),
            ("history_window", self.history_window),
            ("max_image_bytes", self.max_image_bytes),
        ];
        match counts.iter().find(|(_, value)| *value == 0) {
            Some((field, _)) => Err(ConfigError::Zero { field: *field }),
            None => Ok(()),
        }
    }

    /// Replace every invalid value with its default, warning once per field.
    pub fn sanitized(mut self) -> Self {
        let defaults = Self::default();
        while let Err(e) = self.validate() {
            tracing::warn!(error = %e, "Invalid config value replaced with default");
            match e {
                ConfigError::ThresholdOutOfRange(_) => {
                    self.confidence_threshold = defaults.confidence_threshold
                }
                ConfigError::Zero { field: "top_k" } => self.top_k = defaults.top_k,
                ConfigError::Zero { field: "history_window" } => {
                    self.history_window = defaults.history_window
                }
                ConfigError::Zero { .. } => self.max_image_bytes = defaults.max_image_bytes,
                ConfigError::Parse(_) => break,
            }
        }
        self
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();
        let var = |name: &str| lookup(&format!("{ENV_PREFIX}{name}"));

        override_parsed(&mut config.confidence_threshold, "CONFIDENCE_THRESHOLD", var("CONFIDENCE_THRESHOLD"));
        override_parsed(&mut config.top_k, "TOP_K", var("TOP_K"));
        override_parsed(&mut config.history_window, "HISTORY_WINDOW", var("HISTORY_WINDOW"));
        override_parsed(&mut config.ollama_timeout_secs, "OLLAMA_TIMEOUT_SECS", var("OLLAMA_TIMEOUT_SECS"));
        override_parsed(&mut config.max_image_bytes, "MAX_IMAGE_BYTES", var("MAX_IMAGE_BYTES"));

        if let Some(url) = var("OLLAMA_URL") {
            config.ollama_url = url;
        }
        if let Some(model) = var("LLM_MODEL") {
            config.llm_model = model;
        }
        if let Some(dir) = var("CLASSIFIER_DIR") {
            config.classifier_model_dir = PathBuf::from(dir);
        }
        if let Some(dir) = var("EMBEDDING_DIR") {
            config.embedding_model_dir = PathBuf::from(dir);
        }
        if let Some(path) = var("CORPUS_PATH") {
            config.corpus_path = Some(PathBuf::from(path));
        }

        config.sanitized()
    }
}

fn override_parsed<T: FromStr>(slot: &mut T, name: &str, raw: Option<String>) {
    let Some(raw) = raw else { return };
    match raw.trim().parse::<T>() {
        Ok(value) => *slot = value,
        Err(_) => tracing::warn!(variable = %format!("{ENV_PREFIX}{name}"), value = %raw, "Ignoring unparseable config override"),
    }
}
