//! Tool Registry
//!
//! Manages tool registration, discovery, and execution.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use jsonschema::JSONSchema;
use serde_json::Value;
use voice_turn_config::constants::worker::TOOL_TIMEOUT_SECS;

use crate::tool::{Tool, ToolOutput, ToolSchema};
use crate::ToolError;

/// Tool executor trait
#[async_trait]
pub trait ToolExecutor: Send + Sync {
    /// Execute a tool by name
    async fn execute(&self, name: &str, arguments: Value) -> Result<ToolOutput, ToolError>;

    /// List available tools in registration order
    fn list_tools(&self) -> Vec<ToolSchema>;

    /// Get tool schema by name
    fn get_tool(&self, name: &str) -> Option<ToolSchema>;

    /// Whether queued speech must drain before the named tool runs
    fn requires_audio_sync(&self, name: &str) -> bool;
}

struct RegisteredTool {
    tool: Arc<dyn Tool>,
    validator: JSONSchema,
}

/// Tool registry
pub struct ToolRegistry {
    tools: HashMap<String, RegisteredTool>,
    order: Vec<String>,
    max_timeout_secs: u64,
}

impl ToolRegistry {
    /// Create a new empty registry
    pub fn new() -> Self {
        Self {
            tools: HashMap::new(),
            order: Vec::new(),
            max_timeout_secs: TOOL_TIMEOUT_SECS,
        }
    }

    /// Cap every tool's own timeout at `secs`
    pub fn with_max_timeout(mut self, secs: u64) -> Self {
        self.max_timeout_secs = secs.max(1);
        self
    }

    /// Register a tool, compiling its parameter schema
    pub fn register<T: Tool + 'static>(&mut self, tool: T) -> Result<(), ToolError> {
        self.register_arc(Arc::new(tool))
    }

    pub fn register_arc(&mut self, tool: Arc<dyn Tool>) -> Result<(), ToolError> {
        let name = tool.name().to_string();
        if self.tools.contains_key(&name) {
            return Err(ToolError::Duplicate(name));
        }

        let parameters = tool.parameters();
        if parameters.get("type").and_then(Value::as_str) != Some("object") {
            return Err(ToolError::InvalidSchema {
                name,
                message: "parameters must be a JSON Schema of type \"object\"".to_string(),
            });
        }
        let validator = JSONSchema::compile(&parameters).map_err(|e| ToolError::InvalidSchema {
            name: name.clone(),
            message: e.to_string(),
        })?;

        tracing::debug!(tool = %name, "Registered tool");
        self.order.push(name.clone());
        self.tools.insert(name, RegisteredTool { tool, validator });
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn Tool>> {
        self.tools.get(name).map(|entry| &entry.tool)
    }

    pub fn has(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Tool names in registration order
    pub fn tool_names(&self) -> Vec<String> {
        self.order.clone()
    }

    /// Schemas for `names`, or for every tool when `names` is empty
    ///
    /// Unknown names are skipped with a warning.
    pub fn subset(&self, names: &[String]) -> Vec<ToolSchema> {
        if names.is_empty() {
            return self.list_tools();
        }
        names
            .iter()
            .filter_map(|name| {
                let schema = self.get_tool(name);
                if schema.is_none() {
                    tracing::warn!(tool = %name, "Agent references an unregistered tool");
                }
                schema
            })
            .collect()
    }

    fn validate(&self, entry: &RegisteredTool, arguments: &Value) -> Result<(), ToolError> {
        entry.validator.validate(arguments).map_err(|errors| {
            let details: Vec<String> = errors.map(|e| e.to_string()).collect();
            ToolError::invalid_params(details.join("; "))
        })
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ToolExecutor for ToolRegistry {
    /// Validate, then execute with timeout protection
    async fn execute(&self, name: &str, arguments: Value) -> Result<ToolOutput, ToolError> {
        let entry = self
            .tools
            .get(name)
            .ok_or_else(|| ToolError::not_found(name))?;

        // A model that calls a no-argument tool often sends null
        let arguments = if arguments.is_null() {
            Value::Object(Default::default())
        } else {
            arguments
        };
        self.validate(entry, &arguments)?;

        let timeout_secs = entry.tool.timeout_secs().min(self.max_timeout_secs);
        let start = Instant::now();
        let result = match tokio::time::timeout(
            Duration::from_secs(timeout_secs),
            entry.tool.execute(arguments),
        )
        .await
        {
            Ok(result) => result,
            Err(_elapsed) => Err(ToolError::timeout(name, timeout_secs)),
        };

        tracing::info!(
            tool = name,
            ok = result.is_ok(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Tool call finished"
        );
        result
    }

    fn list_tools(&self) -> Vec<ToolSchema> {
        self.order
            .iter()
            .filter_map(|name| self.tools.get(name))
            .map(|entry| entry.tool.schema())
            .collect()
    }

    fn get_tool(&self, name: &str) -> Option<ToolSchema> {
        self.tools.get(name).map(|entry| entry.tool.schema())
    }

    fn requires_audio_sync(&self, name: &str) -> bool {
        self.tools
            .get(name)
            .map(|entry| entry.tool.requires_audio_sync())
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct EchoTool;

    #[async_trait]
    impl Tool for EchoTool {
        fn name(&self) -> &str {
            "echo"
        }

        fn description(&self) -> &str {
            "Repeat the given text"
        }

        fn parameters(&self) -> Value {
            json!({
                "type": "object",
                "properties": {"text": {"type": "string"}},
                "required": ["text"]
            })
        }

        async fn execute(&self, input: Value) -> Result<ToolOutput, ToolError> {
            let text = input["text"].as_str().unwrap_or_default();
            Ok(ToolOutput::text(text))
        }
    }

    struct SlowTool;

    #[async_trait]
    impl Tool for SlowTool {
        fn name(&self) -> &str {
            "slow"
        }

        fn description(&self) -> &str {
            "Never finishes in time"
        }

        fn parameters(&self) -> Value {
            json!({"type": "object"})
        }

        async fn execute(&self, _input: Value) -> Result<ToolOutput, ToolError> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(ToolOutput::text("late"))
        }

        fn timeout_secs(&self) -> u64 {
            1
        }
    }

    struct BadSchemaTool;

    #[async_trait]
    impl Tool for BadSchemaTool {
        fn name(&self) -> &str {
            "bad"
        }

        fn description(&self) -> &str {
            ""
        }

        fn parameters(&self) -> Value {
            json!({"type": "object", "properties": {"x": {"type": 5}}})
        }

        async fn execute(&self, _input: Value) -> Result<ToolOutput, ToolError> {
            Ok(ToolOutput::text(""))
        }
    }

    #[tokio::test]
    async fn test_execute_validates_arguments() {
        let mut registry = ToolRegistry::new();
        registry.register(EchoTool).unwrap();

        let out = registry.execute("echo", json!({"text": "hi"})).await.unwrap();
        assert_eq!(out.content, "hi");

        let err = registry.execute("echo", json!({"text": 3})).await.unwrap_err();
        assert!(matches!(err, ToolError::InvalidParams(_)));

        let err = registry.execute("echo", json!({})).await.unwrap_err();
        assert!(matches!(err, ToolError::InvalidParams(_)));
    }

    #[tokio::test]
    async fn test_unknown_tool() {
        let registry = ToolRegistry::new();
        let err = registry.execute("missing", json!({})).await.unwrap_err();
        assert_eq!(err, ToolError::NotFound("missing".to_string()));
    }

    #[test]
    fn test_registration_rejects_bad_schema_and_duplicates() {
        let mut registry = ToolRegistry::new();
        assert!(matches!(
            registry.register(BadSchemaTool),
            Err(ToolError::InvalidSchema { .. })
        ));
        registry.register(EchoTool).unwrap();
        assert_eq!(
            registry.register(EchoTool),
            Err(ToolError::Duplicate("echo".to_string()))
        );
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout() {
        let mut registry = ToolRegistry::new();
        registry.register(SlowTool).unwrap();
        let err = registry.execute("slow", Value::Null).await.unwrap_err();
        assert_eq!(err, ToolError::timeout("slow", 1));
    }

    #[test]
    fn test_subset_and_order() {
        let mut registry = ToolRegistry::new();
        registry.register(SlowTool).unwrap();
        registry.register(EchoTool).unwrap();

        let names: Vec<_> = registry.list_tools().into_iter().map(|s| s.name).collect();
        assert_eq!(names, vec!["slow", "echo"]);

        let subset = registry.subset(&["echo".to_string(), "nope".to_string()]);
        assert_eq!(subset.len(), 1);
        assert_eq!(subset[0].name, "echo");
        assert_eq!(registry.subset(&[]).len(), 2);
    }
}
