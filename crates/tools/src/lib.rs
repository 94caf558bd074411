//! Tools for the voice worker
//!
//! A typed registry maps each tool name to its JSON parameter schema and
//! implementation. Schemas are compiled when a tool is registered, and
//! arguments are validated against them before every call.

pub mod builtin;
pub mod registry;
pub mod tool;

pub use builtin::{
    register_builtin_tools, ActionSender, GetCurrentTimeTool, PlayAudioTool, PreReplyTool,
    StopAudioTool,
};
pub use registry::{ToolExecutor, ToolRegistry};
pub use tool::{Tool, ToolOutput, ToolSchema};

use thiserror::Error;

/// Tool errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ToolError {
    #[error("Tool not found: {0}")]
    NotFound(String),

    #[error("Tool already registered: {0}")]
    Duplicate(String),

    #[error("Invalid schema for {name}: {message}")]
    InvalidSchema { name: String, message: String },

    #[error("Invalid parameters: {0}")]
    InvalidParams(String),

    #[error("Execution failed: {0}")]
    Execution(String),

    #[error("Tool {name} timed out after {secs}s")]
    Timeout { name: String, secs: u64 },
}

impl ToolError {
    pub fn not_found(name: impl Into<String>) -> Self {
        ToolError::NotFound(name.into())
    }

    pub fn invalid_params(message: impl Into<String>) -> Self {
        ToolError::InvalidParams(message.into())
    }

    pub fn execution(message: impl Into<String>) -> Self {
        ToolError::Execution(message.into())
    }

    pub fn timeout(name: &str, secs: u64) -> Self {
        ToolError::Timeout {
            name: name.to_string(),
            secs,
        }
    }
}

impl From<ToolError> for voice_turn_core::Error {
    fn from(err: ToolError) -> Self {
        voice_turn_core::Error::Tool(err.to_string())
    }
}
