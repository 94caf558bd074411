//! Tool trait and call payloads

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use voice_turn_config::constants::worker::TOOL_TIMEOUT_SECS;

use crate::ToolError;

/// Name, description and JSON parameter schema of a tool
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolSchema {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

/// Result text handed back to the model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolOutput {
    pub content: String,
}

impl ToolOutput {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
        }
    }

    pub fn json(value: &Value) -> Self {
        Self {
            content: value.to_string(),
        }
    }
}

/// A callable tool
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    /// JSON Schema of the argument object
    fn parameters(&self) -> Value;

    fn schema(&self) -> ToolSchema {
        ToolSchema {
            name: self.name().to_string(),
            description: self.description().to_string(),
            parameters: self.parameters(),
        }
    }

    /// Run with arguments already validated against [`Tool::parameters`]
    async fn execute(&self, input: Value) -> Result<ToolOutput, ToolError>;

    fn timeout_secs(&self) -> u64 {
        TOOL_TIMEOUT_SECS
    }

    /// Queued speech must drain before this tool runs
    fn requires_audio_sync(&self) -> bool {
        false
    }
}
