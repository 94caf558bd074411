//! Voice Turn Server
//!
//! Wires capture, turn detection, transcription, the decision dispatcher,
//! the worker and speech output into one running engine.

pub mod engine;
pub mod metrics;

pub use engine::Engine;
pub use metrics::init_metrics;

use thiserror::Error;

/// Server errors
#[derive(Error, Debug)]
pub enum ServerError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Startup error: {0}")]
    Startup(String),

    #[error("Metrics error: {0}")]
    Metrics(String),
}

impl From<voice_turn_config::ConfigError> for ServerError {
    fn from(err: voice_turn_config::ConfigError) -> Self {
        ServerError::Config(err.to_string())
    }
}

impl From<voice_turn_pipeline::PipelineError> for ServerError {
    fn from(err: voice_turn_pipeline::PipelineError) -> Self {
        ServerError::Startup(err.to_string())
    }
}

impl From<voice_turn_llm::LlmError> for ServerError {
    fn from(err: voice_turn_llm::LlmError) -> Self {
        ServerError::Startup(err.to_string())
    }
}

impl From<voice_turn_tools::ToolError> for ServerError {
    fn from(err: voice_turn_tools::ToolError) -> Self {
        ServerError::Startup(err.to_string())
    }
}

impl From<voice_turn_agent::AgentError> for ServerError {
    fn from(err: voice_turn_agent::AgentError) -> Self {
        ServerError::Startup(err.to_string())
    }
}
