//! Error types shared across crates

use thiserror::Error;

/// Core error type
#[derive(Error, Debug)]
pub enum Error {
    #[error("Audio error: {0}")]
    Audio(String),

    #[error("Model error: {0}")]
    Model(String),

    #[error("Transcription error: {0}")]
    Transcription(String),

    #[error("Speech error: {0}")]
    Speech(String),

    #[error("Media error: {0}")]
    Media(String),

    #[error("LLM error: {0}")]
    Llm(String),

    #[error("Tool error: {0}")]
    Tool(String),

    #[error("Channel closed: {0}")]
    ChannelClosed(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result alias using the core error
pub type Result<T> = std::result::Result<T, Error>;
