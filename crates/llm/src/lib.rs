//! Streaming token sources
//!
//! Features:
//! - Ollama `/api/chat` (NDJSON) and OpenAI-compatible `/chat/completions` (SSE)
//! - UTF-8 safe line framing of the response body
//! - Output hygiene for reasoning models (think-block stripping, `/no_think`)
//! - A scripted backend for driving the dispatcher and worker in tests

pub mod backend;
pub mod prompt;
pub mod scripted;
pub mod stream;

pub use backend::{
    create_backend, FinishReason, GenerationResult, LlmBackend, OllamaBackend, OpenAIBackend,
};
pub use prompt::{
    prepare_messages, strip_think, truncate_middle, Message, Role, ThinkFilter, NO_THINK_MARKER,
};
pub use scripted::ScriptedBackend;
pub use stream::LineBuffer;

use thiserror::Error;

/// LLM errors
#[derive(Error, Debug)]
pub enum LlmError {
    #[error("Generation error: {0}")]
    Generation(String),

    #[error("API error: {0}")]
    Api(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Timeout")]
    Timeout,

    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl From<reqwest::Error> for LlmError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            LlmError::Timeout
        } else {
            LlmError::Network(err.to_string())
        }
    }
}

impl From<LlmError> for voice_turn_core::Error {
    fn from(err: LlmError) -> Self {
        voice_turn_core::Error::Llm(err.to_string())
    }
}
