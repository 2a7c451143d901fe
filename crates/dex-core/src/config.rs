//! DEX Configuration Management
//!
//! Handles configuration from environment variables and config files
//! with sensible defaults for development.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Largest batch size accepted for one extraction call
pub const MAX_BATCH_SIZE: usize = 128;

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Extraction model connection
    pub model: ModelConfig,

    /// Batching and domain detection defaults
    pub processing: ProcessingConfig,

    /// Path to the domain preset file
    pub presets_path: PathBuf,

    /// Logging configuration
    pub logging: LoggingConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            model: ModelConfig::default(),
            processing: ProcessingConfig::default(),
            presets_path: default_presets_path(),
            logging: LoggingConfig::default(),
        }
    }
}

impl AppConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();

        // Model
        if let Ok(url) = std::env::var("DEX_MODEL_URL") {
            config.model.base_url = url;
        }
        if let Ok(name) = std::env::var("DEX_MODEL_NAME") {
            config.model.model_name = name;
        }
        if let Ok(device) = std::env::var("DEX_DEVICE") {
            config.model.device = device;
        }

        // Processing
        if let Ok(size) = std::env::var("DEX_BATCH_SIZE") {
            config.processing.batch_size =
                size.parse().map_err(|_| ConfigError::InvalidValue {
                    key: "DEX_BATCH_SIZE".to_string(),
                    value: size,
                })?;
        }

        // Presets
        if let Ok(path) = std::env::var("DEX_PRESETS_PATH") {
            config.presets_path = PathBuf::from(path);
        }

        // Logging
        if let Ok(level) = std::env::var("LOG_LEVEL") {
            config.logging.level = level;
        }

        config.validate()?;
        Ok(config)
    }

    /// Load from a TOML file
    pub fn from_file(path: impl Into<PathBuf>) -> Result<Self, ConfigError> {
        let path = path.into();
        let content = std::fs::read_to_string(&path).map_err(|e| ConfigError::FileReadError {
            path: path.clone(),
            source: e,
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path,
            message: e.to_string(),
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Merge with environment variables (env takes precedence)
    pub fn with_env_override(mut self) -> Result<Self, ConfigError> {
        let env_config = Self::from_env()?;

        // Only override if env values differ from defaults
        let model_defaults = ModelConfig::default();
        if env_config.model.base_url != model_defaults.base_url {
            self.model.base_url = env_config.model.base_url;
        }
        if env_config.model.model_name != model_defaults.model_name {
            self.model.model_name = env_config.model.model_name;
        }
        if env_config.model.device != model_defaults.device {
            self.model.device = env_config.model.device;
        }
        if env_config.processing.batch_size != ProcessingConfig::default().batch_size {
            self.processing.batch_size = env_config.processing.batch_size;
        }
        if env_config.presets_path != default_presets_path() {
            self.presets_path = env_config.presets_path;
        }
        if env_config.logging.level != LoggingConfig::default().level {
            self.logging.level = env_config.logging.level;
        }

        Ok(self)
    }

    /// Check value ranges
    pub fn validate(&self) -> Result<(), ConfigError> {
        let processing = &self.processing;

        if processing.batch_size == 0 || processing.batch_size > MAX_BATCH_SIZE {
            return Err(ConfigError::InvalidValue {
                key: "processing.batch_size".to_string(),
                value: processing.batch_size.to_string(),
            });
        }
        if processing.max_domains == 0 {
            return Err(ConfigError::InvalidValue {
                key: "processing.max_domains".to_string(),
                value: processing.max_domains.to_string(),
            });
        }
        for (key, value) in [
            ("processing.domain_threshold", processing.domain_threshold),
            ("processing.confidence_threshold", processing.confidence_threshold),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(ConfigError::InvalidValue {
                    key: key.to_string(),
                    value: value.to_string(),
                });
            }
        }

        Ok(())
    }
}

fn default_presets_path() -> PathBuf {
    PathBuf::from("entity-extraction.toml")
}

/// Extraction model connection
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    /// Base URL of the model server
    pub base_url: String,

    /// Model identifier loaded by the server
    pub model_name: String,

    /// Device the server runs inference on (cpu/cuda)
    pub device: String,

    /// Request timeout in seconds
    pub timeout_secs: u64,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:6971".to_string(),
            model_name: "fastino/gliner2-large-v1".to_string(),
            device: "cuda".to_string(),
            timeout_secs: 120,
        }
    }
}

/// Batching and domain detection defaults
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcessingConfig {
    /// Texts per extraction call
    pub batch_size: usize,

    /// Minimum confidence for a detected domain
    pub domain_threshold: f32,

    /// Domains merged per text in the auto-domain pipeline
    pub max_domains: usize,

    /// Cut-off applied when callers ask for high-confidence output only
    pub confidence_threshold: f32,
}

impl Default for ProcessingConfig {
    fn default() -> Self {
        Self {
            batch_size: 32,
            domain_threshold: 0.3,
            max_domains: 3,
            confidence_threshold: 0.85,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,

    /// JSON format for logs
    pub json_format: bool,

    /// Include file/line in logs
    pub include_location: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json_format: false,
            include_location: false,
        }
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    FileReadError {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {message}")]
    ParseError { path: PathBuf, message: String },

    #[error("Invalid value for {key}: {value}")]
    InvalidValue { key: String, value: String },
}
