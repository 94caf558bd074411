//! Built-in tools
//!
//! None of these touch speech or media directly. The interactive ones emit
//! an [`ActionEvent`] on the channel consumed by the action loop.

use async_trait::async_trait;
use chrono::Local;
use serde_json::{json, Value};
use tokio::sync::mpsc;
use voice_turn_core::ActionEvent;

use crate::registry::ToolRegistry;
use crate::tool::{Tool, ToolOutput};
use crate::ToolError;

/// Sender side of the action channel
pub type ActionSender = mpsc::UnboundedSender<ActionEvent>;

fn emit(events: &ActionSender, event: ActionEvent) -> Result<(), ToolError> {
    events
        .send(event)
        .map_err(|_| ToolError::execution("action channel closed"))
}

fn required_str<'a>(input: &'a Value, key: &str) -> Result<&'a str, ToolError> {
    input
        .get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| ToolError::invalid_params(format!("{key} is required")))
}

/// Local wall-clock time
pub struct GetCurrentTimeTool;

#[async_trait]
impl Tool for GetCurrentTimeTool {
    fn name(&self) -> &str {
        "get_current_time"
    }

    fn description(&self) -> &str {
        "Get the current local date and time"
    }

    fn parameters(&self) -> Value {
        json!({"type": "object", "properties": {}})
    }

    async fn execute(&self, _input: Value) -> Result<ToolOutput, ToolError> {
        let now = Local::now();
        Ok(ToolOutput::json(&json!({
            "datetime": now.format("%Y-%m-%d %H:%M:%S").to_string(),
            "weekday": now.format("%A").to_string(),
        })))
    }
}

/// Speaks an interim message while the worker keeps going
pub struct PreReplyTool {
    events: ActionSender,
}

impl PreReplyTool {
    pub fn new(events: ActionSender) -> Self {
        Self { events }
    }
}

#[async_trait]
impl Tool for PreReplyTool {
    fn name(&self) -> &str {
        "pre_reply"
    }

    fn description(&self) -> &str {
        "Say a short interim message to the user before a slow step, e.g. \"let me look that up\""
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "text": {"type": "string", "description": "What to say now"}
            },
            "required": ["text"]
        })
    }

    async fn execute(&self, input: Value) -> Result<ToolOutput, ToolError> {
        let text = required_str(&input, "text")?;
        emit(&self.events, ActionEvent::PreAnswer(text.to_string()))?;
        Ok(ToolOutput::text("Interim message queued for speech"))
    }
}

/// Starts media playback for a URL or local path
pub struct PlayAudioTool {
    events: ActionSender,
}

impl PlayAudioTool {
    pub fn new(events: ActionSender) -> Self {
        Self { events }
    }
}

#[async_trait]
impl Tool for PlayAudioTool {
    fn name(&self) -> &str {
        "play_audio"
    }

    fn description(&self) -> &str {
        "Play a song, story or other audio from a URL or local file path"
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "source": {"type": "string", "description": "HTTP(S) URL or local file path"},
                "mode": {
                    "type": "string",
                    "enum": ["immediate", "when_final"],
                    "description": "immediate starts now; when_final waits for pending speech"
                }
            },
            "required": ["source"]
        })
    }

    async fn execute(&self, input: Value) -> Result<ToolOutput, ToolError> {
        let source = required_str(&input, "source")?.to_string();
        let event = match input.get("mode").and_then(Value::as_str) {
            Some("immediate") => ActionEvent::PlayAudioImmediate(source.clone()),
            _ => ActionEvent::PlayAudioWhenFinal(source.clone()),
        };
        emit(&self.events, event)?;
        Ok(ToolOutput::text(format!("Playback scheduled: {source}")))
    }

    fn requires_audio_sync(&self) -> bool {
        true
    }
}

/// Stops any media playback at once
pub struct StopAudioTool {
    events: ActionSender,
}

impl StopAudioTool {
    pub fn new(events: ActionSender) -> Self {
        Self { events }
    }
}

#[async_trait]
impl Tool for StopAudioTool {
    fn name(&self) -> &str {
        "stop_audio"
    }

    fn description(&self) -> &str {
        "Stop the song or audio that is currently playing"
    }

    fn parameters(&self) -> Value {
        json!({"type": "object", "properties": {}})
    }

    async fn execute(&self, _input: Value) -> Result<ToolOutput, ToolError> {
        emit(&self.events, ActionEvent::StopAudio)?;
        Ok(ToolOutput::text("Playback stopped"))
    }
}

/// Register every built-in tool, wiring the interactive ones to `events`
pub fn register_builtin_tools(
    registry: &mut ToolRegistry,
    events: ActionSender,
) -> Result<(), ToolError> {
    registry.register(GetCurrentTimeTool)?;
    registry.register(PreReplyTool::new(events.clone()))?;
    registry.register(PlayAudioTool::new(events.clone()))?;
    registry.register(StopAudioTool::new(events))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::ToolExecutor;

    fn registry() -> (ToolRegistry, mpsc::UnboundedReceiver<ActionEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut registry = ToolRegistry::new();
        register_builtin_tools(&mut registry, tx).unwrap();
        (registry, rx)
    }

    #[tokio::test]
    async fn test_play_audio_modes() {
        let (registry, mut rx) = registry();

        registry
            .execute("play_audio", json!({"source": "http://x/song.mp3"}))
            .await
            .unwrap();
        assert_eq!(
            rx.recv().await,
            Some(ActionEvent::PlayAudioWhenFinal("http://x/song.mp3".to_string()))
        );

        registry
            .execute("play_audio", json!({"source": "/tmp/a.wav", "mode": "immediate"}))
            .await
            .unwrap();
        assert_eq!(
            rx.recv().await,
            Some(ActionEvent::PlayAudioImmediate("/tmp/a.wav".to_string()))
        );

        let err = registry
            .execute("play_audio", json!({"source": "x", "mode": "later"}))
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::InvalidParams(_)));
    }

    #[tokio::test]
    async fn test_stop_and_pre_reply_emit_events() {
        let (registry, mut rx) = registry();
        registry.execute("stop_audio", Value::Null).await.unwrap();
        assert_eq!(rx.recv().await, Some(ActionEvent::StopAudio));

        registry
            .execute("pre_reply", json!({"text": "稍等，我查一下"}))
            .await
            .unwrap();
        assert_eq!(
            rx.recv().await,
            Some(ActionEvent::PreAnswer("稍等，我查一下".to_string()))
        );

        let err = registry.execute("pre_reply", json!({"text": "  "})).await.unwrap_err();
        assert!(matches!(err, ToolError::InvalidParams(_)));
    }

    #[tokio::test]
    async fn test_closed_channel_is_execution_error() {
        let (registry, rx) = registry();
        drop(rx);
        let err = registry.execute("stop_audio", json!({})).await.unwrap_err();
        assert!(matches!(err, ToolError::Execution(_)));
    }

    #[tokio::test]
    async fn test_current_time_and_sync_flags() {
        let (registry, _rx) = registry();
        let out = registry.execute("get_current_time", json!({})).await.unwrap();
        assert!(out.content.contains("datetime"));

        assert!(registry.requires_audio_sync("play_audio"));
        assert!(!registry.requires_audio_sync("stop_audio"));
        assert!(!registry.requires_audio_sync("get_current_time"));
        assert_eq!(
            registry.tool_names(),
            vec!["get_current_time", "pre_reply", "play_audio", "stop_audio"]
        );
    }
}
