//! Tool-augmented worker
//!
//! Runs the bound model in a loop of at most `max_turns` calls. Each reply is
//! scanned for tool calls; replies without one are the final answer. Tool
//! results and failures go back into the session history so the model can
//! retry or explain. Running out of turns speaks a fallback answer.

use std::sync::Arc;
use std::time::Instant;

use serde_json::Value;
use tokio::sync::watch;
use voice_turn_config::WorkerConfig;
use voice_turn_core::ActionEvent;
use voice_turn_llm::{strip_think, Message};
use voice_turn_tools::{ActionSender, ToolExecutor};

use crate::actions::ActionHandle;
use crate::session::WorkerSession;

/// Keys that may carry the argument object of a call
const ARGUMENT_KEYS: &[&str] = &["params", "arguments", "parameters"];

/// One requested tool invocation
#[derive(Debug, Clone, PartialEq)]
pub struct ToolCall {
    pub name: String,
    pub arguments: Value,
}

/// Tool calls found in a model reply
#[derive(Debug, Default, PartialEq)]
pub struct Extraction {
    pub calls: Vec<ToolCall>,
    /// Brace-delimited text that looked like a call but was not valid JSON
    pub malformed: Vec<String>,
}

impl Extraction {
    pub fn is_empty(&self) -> bool {
        self.calls.is_empty() && self.malformed.is_empty()
    }
}

/// Scan free text for JSON tool calls
///
/// Accepts `{"action": "call_tool", "name": ..., "params": {...}}` and the
/// looser `{"name": ..., "arguments": {...}}`, anywhere in the text,
/// including inside wrapper objects and arrays.
pub fn extract_tool_calls(text: &str) -> Extraction {
    let mut extraction = Extraction::default();
    let (objects, unterminated) = brace_objects(text);

    for raw in objects {
        match serde_json::from_str::<Value>(raw) {
            Ok(value) => collect_calls(&value, &mut extraction.calls),
            Err(_) if looks_like_call(raw) => extraction.malformed.push(raw.to_string()),
            Err(_) => {}
        }
    }
    if let Some(raw) = unterminated {
        if looks_like_call(raw) {
            extraction.malformed.push(raw.to_string());
        }
    }
    extraction
}

/// Top-level balanced `{...}` spans, plus an unclosed trailing one
fn brace_objects(text: &str) -> (Vec<&str>, Option<&str>) {
    let mut objects = Vec::new();
    let mut depth = 0usize;
    let mut start = None;
    let mut in_string = false;
    let mut escaped = false;

    for (i, c) in text.char_indices() {
        if in_string {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_string = false;
            }
            continue;
        }
        match c {
            '"' if depth > 0 => in_string = true,
            '{' => {
                if depth == 0 {
                    start = Some(i);
                }
                depth += 1;
            }
            '}' if depth > 0 => {
                depth -= 1;
                if depth == 0 {
                    if let Some(s) = start.take() {
                        objects.push(&text[s..=i]);
                    }
                }
            }
            _ => {}
        }
    }

    let unterminated = if depth > 0 { start.map(|s| &text[s..]) } else { None };
    (objects, unterminated)
}

fn looks_like_call(raw: &str) -> bool {
    raw.contains("call_tool") || raw.contains("\"name\"")
}

fn collect_calls(value: &Value, calls: &mut Vec<ToolCall>) {
    match value {
        Value::Object(map) => {
            if let Some(call) = as_call(map) {
                calls.push(call);
                return;
            }
            for nested in map.values() {
                collect_calls(nested, calls);
            }
        }
        Value::Array(items) => {
            for item in items {
                collect_calls(item, calls);
            }
        }
        _ => {}
    }
}

fn as_call(map: &serde_json::Map<String, Value>) -> Option<ToolCall> {
    let name = map.get("name")?.as_str()?.trim();
    if name.is_empty() {
        return None;
    }
    let is_call = map.get("action").and_then(Value::as_str) == Some("call_tool");
    let arguments = ARGUMENT_KEYS.iter().find_map(|k| map.get(*k));
    if !is_call && arguments.is_none() {
        return None;
    }

    let arguments = match arguments {
        // OpenAI style: arguments as a JSON string
        Some(Value::String(s)) => serde_json::from_str(s).unwrap_or_else(|_| Value::String(s.clone())),
        Some(v) => v.clone(),
        None => Value::Null,
    };
    Some(ToolCall {
        name: name.to_string(),
        arguments,
    })
}

/// Summary of one worker run
#[derive(Debug, Clone, PartialEq)]
pub struct WorkerOutcome {
    pub agent_id: u32,
    pub answer: String,
    pub turns: usize,
    pub tool_calls: usize,
    /// The fallback answer was used
    pub fell_back: bool,
}

/// Drives a [`WorkerSession`] to a spoken answer
#[derive(Clone)]
pub struct Worker {
    tools: Arc<dyn ToolExecutor>,
    events: ActionSender,
    actions: ActionHandle,
    max_turns: usize,
    fallback_answer: String,
}

impl Worker {
    pub fn new(
        config: &WorkerConfig,
        tools: Arc<dyn ToolExecutor>,
        events: ActionSender,
        actions: ActionHandle,
    ) -> Self {
        Self {
            tools,
            events,
            actions,
            max_turns: config.max_turns.max(1),
            fallback_answer: config.fallback_answer.clone(),
        }
    }

    pub fn max_turns(&self) -> usize {
        self.max_turns
    }

    /// Answer `query` within the session, emitting the answer as an action
    pub async fn run(&self, session: &mut WorkerSession, query: &str) -> WorkerOutcome {
        self.run_after(session, query, None).await
    }

    /// Like [`Worker::run`], but holds the spoken answer until `speak_after`
    /// turns true or its sender is dropped
    ///
    /// The dispatcher uses this so the answer never cuts into transition
    /// text that is still streaming.
    pub async fn run_after(
        &self,
        session: &mut WorkerSession,
        query: &str,
        mut speak_after: Option<watch::Receiver<bool>>,
    ) -> WorkerOutcome {
        let started = Instant::now();
        session.history.push(Message::user(query));
        let mut tool_calls = 0usize;

        tracing::info!(agent_id = session.agent_id, agent = %session.name, "Worker started");

        for turn in 1..=self.max_turns {
            let reply = match session.llm.generate(&session.history.messages()).await {
                Ok(result) => result.text,
                Err(e) => {
                    tracing::warn!(agent_id = session.agent_id, turn, error = %e, "Worker model failed");
                    return self.fall_back(session, turn, tool_calls, &mut speak_after).await;
                }
            };
            let text = strip_think(&reply).trim().to_string();
            let extraction = extract_tool_calls(&text);

            if extraction.is_empty() {
                if text.is_empty() {
                    tracing::debug!(turn, "Empty worker reply");
                    session.history.push(Message::tool(
                        "Your reply was empty. Call a tool or answer the user.",
                    ));
                    continue;
                }

                session.history.push(Message::assistant(text.clone()));
                self.emit(ActionEvent::RegularAnswer(text.clone()), &mut speak_after)
                    .await;
                tracing::info!(
                    agent_id = session.agent_id,
                    turns = turn,
                    tool_calls,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "Worker answered"
                );
                return WorkerOutcome {
                    agent_id: session.agent_id,
                    answer: text,
                    turns: turn,
                    tool_calls,
                    fell_back: false,
                };
            }

            session.history.push(Message::assistant(text));

            for raw in extraction.malformed {
                tracing::warn!(turn, raw = %raw, "Malformed tool call");
                session.history.push(Message::tool(format!(
                    "Could not parse the tool call {raw}. Reply with one valid JSON object."
                )));
            }

            for call in extraction.calls {
                tool_calls += 1;
                let result = self.call_tool(session, &call, &mut speak_after).await;
                session.history.push(Message::tool(result));
            }
        }

        tracing::warn!(
            agent_id = session.agent_id,
            max_turns = self.max_turns,
            "Worker ran out of turns"
        );
        self.fall_back(session, self.max_turns, tool_calls, &mut speak_after)
            .await
    }

    async fn call_tool(
        &self,
        session: &WorkerSession,
        call: &ToolCall,
        speak_after: &mut Option<watch::Receiver<bool>>,
    ) -> String {
        let name = call.name.as_str();
        if !session.has_tool(name) {
            metrics::counter!("worker_tool_calls_total", "outcome" => "unavailable").increment(1);
            tracing::warn!(agent_id = session.agent_id, tool = %name, "Tool not bound to agent");
            return format!("Tool `{name}` failed: not available to this agent");
        }

        // Transition text is only fully queued once the gate opens
        if self.tools.requires_audio_sync(name) {
            tracing::debug!(tool = %name, "Waiting for speech before tool");
            wait_gate(speak_after).await;
            self.actions.wait_for_speech().await;
        }

        tracing::info!(agent_id = session.agent_id, tool = %name, "Calling tool");
        match self.tools.execute(name, call.arguments.clone()).await {
            Ok(output) => {
                metrics::counter!("worker_tool_calls_total", "outcome" => "ok").increment(1);
                format!("Tool `{name}` result: {}", output.content)
            }
            Err(e) => {
                metrics::counter!("worker_tool_calls_total", "outcome" => "error").increment(1);
                tracing::warn!(tool = %name, error = %e, "Tool failed");
                format!("Tool `{name}` failed: {e}")
            }
        }
    }

    async fn fall_back(
        &self,
        session: &mut WorkerSession,
        turns: usize,
        tool_calls: usize,
        speak_after: &mut Option<watch::Receiver<bool>>,
    ) -> WorkerOutcome {
        metrics::counter!("worker_fallbacks_total").increment(1);
        let answer = self.fallback_answer.clone();
        session.history.push(Message::assistant(answer.clone()));
        self.emit(ActionEvent::RegularAnswer(answer.clone()), speak_after)
            .await;
        WorkerOutcome {
            agent_id: session.agent_id,
            answer,
            turns,
            tool_calls,
            fell_back: true,
        }
    }

    async fn emit(&self, event: ActionEvent, speak_after: &mut Option<watch::Receiver<bool>>) {
        wait_gate(speak_after).await;
        if self.events.send(event).is_err() {
            tracing::warn!("Action loop gone, dropping worker answer");
        }
    }
}

/// Resolves once the gate turns true or its sender is dropped
async fn wait_gate(speak_after: &mut Option<watch::Receiver<bool>>) {
    if let Some(gate) = speak_after.as_mut() {
        let _ = gate.wait_for(|ready| *ready).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actions::spawn_action_loop;
    use async_trait::async_trait;
    use serde_json::json;
    use tokio::sync::mpsc;
    use voice_turn_core::{MediaPlayer, SpeechSynthesizer};
    use voice_turn_llm::{Role, ScriptedBackend};
    use voice_turn_pipeline::SpeechQueue;
    use voice_turn_tools::{GetCurrentTimeTool, ToolRegistry};

    struct Mute;

    #[async_trait]
    impl SpeechSynthesizer for Mute {
        async fn speak(&self, _text: &str) -> voice_turn_core::Result<()> {
            Ok(())
        }

        fn name(&self) -> &str {
            "mute"
        }
    }

    struct NoPlayer;

    #[async_trait]
    impl MediaPlayer for NoPlayer {
        async fn play(&self, _source: &str) -> voice_turn_core::Result<()> {
            Ok(())
        }

        async fn stop(&self) -> voice_turn_core::Result<()> {
            Ok(())
        }

        fn is_playing(&self) -> bool {
            false
        }
    }

    struct Harness {
        worker: Worker,
        answers: mpsc::UnboundedReceiver<ActionEvent>,
        _loop_events: mpsc::UnboundedSender<ActionEvent>,
    }

    fn harness(max_turns: usize) -> Harness {
        let speech = Arc::new(SpeechQueue::spawn(Arc::new(Mute)));
        let (loop_tx, loop_rx) = mpsc::unbounded_channel();
        let (actions, _task) = spawn_action_loop(loop_rx, speech, Arc::new(NoPlayer));

        let mut registry = ToolRegistry::new();
        registry.register(GetCurrentTimeTool).unwrap();

        let (tx, rx) = mpsc::unbounded_channel();
        let config = WorkerConfig {
            max_turns,
            ..WorkerConfig::default()
        };
        Harness {
            worker: Worker::new(&config, Arc::new(registry), tx, actions),
            answers: rx,
            _loop_events: loop_tx,
        }
    }

    fn session(llm: Arc<ScriptedBackend>, tools: &[&str]) -> WorkerSession {
        let schemas = tools
            .iter()
            .map(|name| voice_turn_tools::ToolSchema {
                name: name.to_string(),
                description: String::new(),
                parameters: json!({"type": "object"}),
            })
            .collect();
        WorkerSession::new(1, "assistant", "sys", 20, schemas, llm)
    }

    #[test]
    fn test_extract_call_wrapped_in_prose() {
        let text = r#"Let me check. {"action": "call_tool", "name": "get_weather", "params": {"city": "Paris {centre}"}} ok"#;
        let extraction = extract_tool_calls(text);
        assert_eq!(extraction.calls, vec![ToolCall {
            name: "get_weather".to_string(),
            arguments: json!({"city": "Paris {centre}"}),
        }]);
        assert!(extraction.malformed.is_empty());
    }

    #[test]
    fn test_extract_multiple_and_nested_calls() {
        let text = r#"[{"name": "a", "arguments": "{\"x\": 1}"}, {"name": "b", "params": {}}]
            {"tool_calls": [{"action": "call_tool", "name": "c"}]}"#;
        let names: Vec<_> = extract_tool_calls(text).calls.into_iter().map(|c| c.name).collect();
        assert_eq!(names, vec!["a", "b", "c"]);
        assert_eq!(extract_tool_calls(text).calls[0].arguments, json!({"x": 1}));
    }

    #[test]
    fn test_extract_ignores_plain_text_and_flags_malformed() {
        assert!(extract_tool_calls("It is 3 pm {roughly}.").is_empty());
        assert!(extract_tool_calls(r#"{"city": "Paris"}"#).is_empty());

        let broken = extract_tool_calls(r#"{"action": "call_tool", "name": "x", "params": {"#);
        assert!(broken.calls.is_empty());
        assert_eq!(broken.malformed.len(), 1);
    }

    #[tokio::test]
    async fn test_direct_answer_without_tools() {
        let mut h = harness(5);
        let llm = Arc::new(ScriptedBackend::new("worker"));
        llm.push_deltas(["<think>hm</think>", "It is sunny."]);
        let mut session = session(llm, &[]);

        let outcome = h.worker.run(&mut session, "weather?").await;
        assert_eq!(outcome.answer, "It is sunny.");
        assert_eq!(outcome.turns, 1);
        assert!(!outcome.fell_back);
        assert_eq!(
            h.answers.recv().await,
            Some(ActionEvent::RegularAnswer("It is sunny.".to_string()))
        );
        assert_eq!(session.history.last().map(|m| m.role), Some(Role::Assistant));
    }

    #[tokio::test]
    async fn test_tool_result_fed_back() {
        let mut h = harness(5);
        let llm = Arc::new(ScriptedBackend::new("worker"));
        llm.push_deltas([r#"{"action": "call_tool", "name": "get_current_time", "params": {}}"#])
            .push_deltas(["It is noon."]);
        let mut session = session(llm.clone(), &["get_current_time"]);

        let outcome = h.worker.run(&mut session, "what time is it").await;
        assert_eq!(outcome.tool_calls, 1);
        assert_eq!(outcome.turns, 2);

        let second = &llm.requests()[1];
        let tool_msg = second.iter().find(|m| m.role == Role::Tool).unwrap();
        assert!(tool_msg.content.starts_with("Tool `get_current_time` result: "));
        assert_eq!(
            h.answers.recv().await,
            Some(ActionEvent::RegularAnswer("It is noon.".to_string()))
        );
    }

    #[tokio::test]
    async fn test_failures_are_narrated() {
        let h = harness(5);
        let llm = Arc::new(ScriptedBackend::new("worker"));
        llm.push_deltas([r#"{"action": "call_tool", "name": "get_weather", "params": {}}"#])
            .push_deltas([r#"{"action": "call_tool", "name": "get_current_time", "params": {"#])
            .push_deltas(["Sorry, I can't check that."]);
        let mut session = session(llm.clone(), &["get_weather", "get_current_time"]);

        let outcome = h.worker.run(&mut session, "weather?").await;
        assert_eq!(outcome.turns, 3);
        let requests = llm.requests();
        let last_tool = |i: usize| {
            requests[i]
                .iter()
                .rev()
                .find(|m| m.role == Role::Tool)
                .map(|m| m.content.clone())
                .unwrap()
        };
        assert!(last_tool(1).starts_with("Tool `get_weather` failed: "));
        assert!(last_tool(2).starts_with("Could not parse the tool call"));
    }

    #[tokio::test]
    async fn test_unbound_tool_is_refused() {
        let h = harness(5);
        let llm = Arc::new(ScriptedBackend::new("worker"));
        llm.push_deltas([r#"{"action": "call_tool", "name": "get_current_time"}"#])
            .push_deltas(["I can't tell the time."]);
        let mut session = session(llm.clone(), &["play_audio"]);

        h.worker.run(&mut session, "time?").await;
        let tool_msg = llm.requests()[1]
            .iter()
            .find(|m| m.role == Role::Tool)
            .map(|m| m.content.clone())
            .unwrap();
        assert_eq!(tool_msg, "Tool `get_current_time` failed: not available to this agent");
    }

    #[tokio::test]
    async fn test_exhaustion_speaks_fallback() {
        let mut h = harness(2);
        let llm = Arc::new(ScriptedBackend::new("worker"));
        let call = r#"{"action": "call_tool", "name": "get_current_time", "params": {}}"#;
        llm.push_deltas([call]).push_deltas([call]).push_deltas(["never reached"]);
        let mut session = session(llm.clone(), &["get_current_time"]);

        let outcome = h.worker.run(&mut session, "loop").await;
        assert!(outcome.fell_back);
        assert_eq!(outcome.turns, 2);
        assert_eq!(llm.remaining(), 1);
        assert_eq!(
            h.answers.recv().await,
            Some(ActionEvent::RegularAnswer(WorkerConfig::default().fallback_answer))
        );
    }

    #[tokio::test]
    async fn test_answer_waits_for_gate() {
        let mut h = harness(5);
        let llm = Arc::new(ScriptedBackend::new("worker"));
        llm.push_deltas(["ready"]);
        let mut session = session(llm, &[]);
        let (open, gate) = watch::channel(false);

        let worker = h.worker.clone();
        let task = tokio::spawn(async move { worker.run_after(&mut session, "go", Some(gate)).await });

        let early = tokio::time::timeout(std::time::Duration::from_millis(50), h.answers.recv()).await;
        assert!(early.is_err());

        open.send(true).unwrap();
        assert_eq!(task.await.unwrap().answer, "ready");
        assert_eq!(h.answers.recv().await, Some(ActionEvent::RegularAnswer("ready".to_string())));
    }

    #[tokio::test]
    async fn test_model_error_speaks_fallback() {
        let mut h = harness(5);
        let llm = Arc::new(ScriptedBackend::new("worker"));
        llm.push_failure("connection refused");
        let mut session = session(llm, &[]);

        let outcome = h.worker.run(&mut session, "hi").await;
        assert!(outcome.fell_back);
        assert!(matches!(h.answers.recv().await, Some(ActionEvent::RegularAnswer(_))));
    }
}
