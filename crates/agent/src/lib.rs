//! Turn orchestration for the voice engine
//!
//! Features:
//! - Decision prefix parsing on the partial model stream
//! - Streaming dispatcher that starts the worker as soon as a tool route is known
//! - Tool-augmented worker with a bounded loop and a spoken fallback
//! - Action loop turning tool events into speech and media playback
//! - Conversation loop gated on the speech drain barrier

pub mod actions;
pub mod conversation;
pub mod decision;
pub mod dispatcher;
pub mod prompts;
pub mod session;
pub mod worker;

pub use actions::{spawn_action_loop, ActionHandle};
pub use conversation::{Conversation, ConversationEvent, ConversationStats};
pub use decision::{DecisionFrame, FrameUpdate, Route};
pub use dispatcher::{DispatchOutcome, DispatchState, Dispatcher};
pub use prompts::{decision_prompt, worker_prompt};
pub use session::{build_sessions, ConversationHistory, WorkerSession};
pub use worker::{extract_tool_calls, Extraction, ToolCall, Worker, WorkerOutcome};

use thiserror::Error;

/// Agent errors
#[derive(Error, Debug)]
pub enum AgentError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Tool error: {0}")]
    Tool(String),

    #[error("LLM error: {0}")]
    Llm(String),

    #[error("Pipeline error: {0}")]
    Pipeline(String),
}

impl From<voice_turn_pipeline::PipelineError> for AgentError {
    fn from(err: voice_turn_pipeline::PipelineError) -> Self {
        AgentError::Pipeline(err.to_string())
    }
}

impl From<voice_turn_llm::LlmError> for AgentError {
    fn from(err: voice_turn_llm::LlmError) -> Self {
        AgentError::Llm(err.to_string())
    }
}

impl From<voice_turn_tools::ToolError> for AgentError {
    fn from(err: voice_turn_tools::ToolError) -> Self {
        AgentError::Tool(err.to_string())
    }
}

impl From<voice_turn_config::ConfigError> for AgentError {
    fn from(err: voice_turn_config::ConfigError) -> Self {
        AgentError::Config(err.to_string())
    }
}
