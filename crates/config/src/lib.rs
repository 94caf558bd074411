//! Configuration management for the voice turn-taking engine
//!
//! Supports loading configuration from:
//! - TOML/YAML/JSON files under `config/`
//! - Environment variables (VOICE_TURN_ prefix, `__` separator)
//!
//! Every section has defaults mirroring [`constants`], so an empty
//! environment yields a runnable configuration.

pub mod constants;
pub mod settings;

pub use settings::{
    load_settings, load_settings_from, AgentDefinition, AudioConfig, ClassifierConfig,
    DetectorConfig, LlmProvider, LlmSettings, MediaConfig, ModelConfig, ObservabilityConfig,
    Settings, TranscriptionConfig, TtsConfig, WorkerConfig,
};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Configuration file not found: {0}")]
    FileNotFound(String),

    #[error("Failed to parse configuration: {0}")]
    ParseError(String),

    #[error("Invalid value for {field}: {message}")]
    InvalidValue { field: String, message: String },
}

impl ConfigError {
    pub(crate) fn invalid(field: &str, message: impl Into<String>) -> Self {
        ConfigError::InvalidValue {
            field: field.to_string(),
            message: message.into(),
        }
    }
}

impl From<config::ConfigError> for ConfigError {
    fn from(err: config::ConfigError) -> Self {
        ConfigError::ParseError(err.to_string())
    }
}
