//! Streaming decision dispatcher
//!
//! Per utterance:
//!
//! ```text
//! AwaitingPrefix -> ResolvedDirect | ResolvedTool -> Draining -> Done
//! ```
//!
//! The decision model streams its reply; the routing prefix is parsed from
//! the first few characters. A tool route spawns the worker right away,
//! while the transition text keeps flowing into the speech queue. The turn
//! ends only after the worker has joined and all speech has drained.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use voice_turn_config::constants::decision::{MAX_PREFIX_CHARS, PARSE_AFTER_CHARS};
use voice_turn_config::constants::worker::FALLBACK_ANSWER;
use voice_turn_core::Utterance;
use voice_turn_llm::{LlmBackend, Message, ThinkFilter};
use voice_turn_pipeline::{SpeechQueue, TextSegmenter};

use crate::actions::ActionHandle;
use crate::decision::{DecisionFrame, FrameUpdate, Route};
use crate::session::{ConversationHistory, WorkerSession};
use crate::worker::{Worker, WorkerOutcome};

/// Deltas buffered between the model stream and the dispatcher
const DELTA_BUFFER: usize = 64;

/// Dispatch progress of one utterance
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchState {
    AwaitingPrefix,
    ResolvedDirect,
    ResolvedTool,
    Draining,
    Done,
}

impl fmt::Display for DispatchState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DispatchState::AwaitingPrefix => "awaiting_prefix",
            DispatchState::ResolvedDirect => "resolved_direct",
            DispatchState::ResolvedTool => "resolved_tool",
            DispatchState::Draining => "draining",
            DispatchState::Done => "done",
        };
        f.write_str(name)
    }
}

/// What happened during one dispatch
#[derive(Debug, Clone)]
pub struct DispatchOutcome {
    pub route: Route,
    /// Text spoken from the decision stream, prefix removed
    pub transition: String,
    /// Raw decision output, prefix included
    pub raw: String,
    pub worker: Option<WorkerOutcome>,
    /// Decision model failure, if any
    pub error: Option<String>,
    pub segments: usize,
    pub elapsed_ms: u64,
}

type SharedSession = Arc<Mutex<WorkerSession>>;

/// Routes each utterance to a direct answer or a worker
pub struct Dispatcher {
    llm: Arc<dyn LlmBackend>,
    history: ConversationHistory,
    sessions: HashMap<u32, SharedSession>,
    default_agent: Option<u32>,
    worker: Worker,
    actions: ActionHandle,
    fallback_answer: String,
    parse_after: usize,
    max_prefix: usize,
}

impl Dispatcher {
    pub fn new(
        llm: Arc<dyn LlmBackend>,
        system_prompt: impl Into<String>,
        history_window: usize,
        worker: Worker,
        actions: ActionHandle,
    ) -> Self {
        Self {
            llm,
            history: ConversationHistory::new(system_prompt, history_window),
            sessions: HashMap::new(),
            default_agent: None,
            worker,
            actions,
            fallback_answer: FALLBACK_ANSWER.to_string(),
            parse_after: PARSE_AFTER_CHARS,
            max_prefix: MAX_PREFIX_CHARS,
        }
    }

    /// Register a worker session; the first one is the default agent
    pub fn with_session(mut self, session: WorkerSession) -> Self {
        let id = session.agent_id;
        if self.default_agent.is_none() {
            self.default_agent = Some(id);
        }
        if self.sessions.insert(id, Arc::new(Mutex::new(session))).is_some() {
            tracing::warn!(agent_id = id, "Replacing worker session with the same id");
        }
        self
    }

    pub fn with_fallback_answer(mut self, text: impl Into<String>) -> Self {
        self.fallback_answer = text.into();
        self
    }

    pub fn with_prefix_limits(mut self, parse_after: usize, max_prefix: usize) -> Self {
        self.parse_after = parse_after;
        self.max_prefix = max_prefix;
        self
    }

    pub fn history(&self) -> &ConversationHistory {
        &self.history
    }

    pub fn agent_ids(&self) -> Vec<u32> {
        let mut ids: Vec<u32> = self.sessions.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    fn speech(&self) -> &Arc<SpeechQueue> {
        self.actions.speech()
    }

    /// Handle one utterance end to end
    ///
    /// Returns once the worker (if any) has finished and every queued
    /// segment has been spoken. Failures are spoken, never returned.
    pub async fn dispatch(&mut self, utterance: &Utterance) -> DispatchOutcome {
        let started = Instant::now();
        self.history.push(Message::user(utterance.text.clone()));
        let messages = self.history.messages();

        let (tx, mut rx) = mpsc::channel::<String>(DELTA_BUFFER);
        let llm = self.llm.clone();
        let generation = tokio::spawn(async move { llm.generate_stream(&messages, tx).await });

        let (stream_done, speak_after) = watch::channel(false);
        let mut run = DispatchRun::new(self.parse_after, self.max_prefix, speak_after);
        while let Some(delta) = rx.recv().await {
            let visible = run.think.push(&delta);
            if visible.is_empty() {
                continue;
            }
            let update = run.frame.push(&visible);
            self.apply(&mut run, update, &utterance.text);
        }

        let held = run.think.finish();
        if !held.is_empty() {
            let update = run.frame.push(&held);
            self.apply(&mut run, update, &utterance.text);
        }
        let update = run.frame.finish();
        self.apply(&mut run, update, &utterance.text);
        if let Some(rest) = run.segmenter.finish() {
            run.speak_segment(self.speech(), rest);
        }
        let _ = stream_done.send(true);
        run.set_state(DispatchState::Draining);

        let error = match generation.await {
            Ok(Ok(result)) => {
                tracing::debug!(
                    tokens = result.tokens,
                    ttft_ms = result.time_to_first_token_ms,
                    finish = ?result.finish_reason,
                    "Decision stream finished"
                );
                None
            }
            Ok(Err(e)) => Some(e.to_string()),
            Err(e) => Some(format!("decision task failed: {e}")),
        };
        if let Some(error) = &error {
            tracing::warn!(error = %error, "Decision model failed");
            if run.segments == 0 && run.worker.is_none() {
                run.speak_segment(self.speech(), self.fallback_answer.clone());
            }
        }

        let worker = match run.worker.take() {
            Some(task) => match task.await {
                Ok(outcome) => Some(outcome),
                Err(e) => {
                    tracing::error!(error = %e, "Worker task failed");
                    run.speak_segment(self.speech(), self.fallback_answer.clone());
                    None
                }
            },
            None => None,
        };

        self.actions.finish_turn().await;
        self.actions.wait_for_speech().await;
        run.set_state(DispatchState::Done);

        let raw = run.frame.raw().to_string();
        if !raw.trim().is_empty() {
            self.history.push(Message::assistant(raw.clone()));
        }

        let route = run.frame.route().unwrap_or(Route::Direct);
        let elapsed_ms = started.elapsed().as_millis() as u64;
        metrics::counter!(
            "dispatch_total",
            "route" => if route.uses_tool() { "tool" } else { "direct" }
        )
        .increment(1);
        tracing::info!(
            route = ?route,
            segments = run.segments,
            worker_turns = worker.as_ref().map(|w| w.turns),
            elapsed_ms,
            "Turn dispatched"
        );

        DispatchOutcome {
            route,
            transition: run.frame.transition_text().to_string(),
            raw,
            worker,
            error,
            segments: run.segments,
            elapsed_ms,
        }
    }

    fn apply(&self, run: &mut DispatchRun, update: FrameUpdate, query: &str) {
        let text = match update {
            FrameUpdate::Pending => return,
            FrameUpdate::Text(text) => text,
            FrameUpdate::Resolved { route, text } => {
                match route {
                    Route::Direct => run.set_state(DispatchState::ResolvedDirect),
                    Route::Tool { agent_id } => {
                        run.set_state(DispatchState::ResolvedTool);
                        run.worker = self.spawn_worker(agent_id, query, run.speak_after.clone());
                    }
                }
                tracing::info!(route = ?route, "Decision resolved");
                text
            }
        };

        for segment in run.segmenter.push(&text) {
            run.speak_segment(self.speech(), segment);
        }
    }

    fn session_for(&self, agent_id: Option<u32>) -> Option<(u32, SharedSession)> {
        if let Some(id) = agent_id {
            if let Some(session) = self.sessions.get(&id) {
                return Some((id, session.clone()));
            }
            tracing::warn!(agent_id = id, "Unknown agent, using the default");
        }
        let id = self.default_agent?;
        self.sessions.get(&id).map(|s| (id, s.clone()))
    }

    fn spawn_worker(
        &self,
        agent_id: Option<u32>,
        query: &str,
        speak_after: watch::Receiver<bool>,
    ) -> Option<JoinHandle<WorkerOutcome>> {
        let Some((id, session)) = self.session_for(agent_id) else {
            tracing::error!("No worker session configured, answering with fallback");
            self.speech().enqueue(self.fallback_answer.clone());
            return None;
        };

        tracing::info!(agent_id = id, "Spawning worker");
        let worker = self.worker.clone();
        let query = query.to_string();
        Some(tokio::spawn(async move {
            let mut session = session.lock().await;
            worker.run_after(&mut session, &query, Some(speak_after)).await
        }))
    }
}

/// Per-dispatch parse and speech state
struct DispatchRun {
    state: DispatchState,
    think: ThinkFilter,
    frame: DecisionFrame,
    segmenter: TextSegmenter,
    worker: Option<JoinHandle<WorkerOutcome>>,
    /// Turns true once the decision stream is fully queued for speech
    speak_after: watch::Receiver<bool>,
    segments: usize,
}

impl DispatchRun {
    fn new(parse_after: usize, max_prefix: usize, speak_after: watch::Receiver<bool>) -> Self {
        Self {
            state: DispatchState::AwaitingPrefix,
            think: ThinkFilter::new(),
            frame: DecisionFrame::new(parse_after, max_prefix),
            segmenter: TextSegmenter::default(),
            worker: None,
            speak_after,
            segments: 0,
        }
    }

    fn set_state(&mut self, state: DispatchState) {
        tracing::debug!(from = %self.state, to = %state, "Dispatch state");
        self.state = state;
    }

    fn speak_segment(&mut self, speech: &SpeechQueue, text: String) {
        if speech.enqueue(text) {
            self.segments += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actions::spawn_action_loop;
    use async_trait::async_trait;
    use parking_lot::Mutex as SyncMutex;
    use serde_json::json;
    use std::time::Duration;
    use voice_turn_config::WorkerConfig;
    use voice_turn_core::{ActionEvent, MediaPlayer, SpeechSynthesizer};
    use voice_turn_llm::{GenerationResult, LlmError, ScriptedBackend};
    use voice_turn_tools::{ToolRegistry, ToolSchema};

    #[derive(Default)]
    struct Recording {
        spoken: SyncMutex<Vec<String>>,
    }

    #[async_trait]
    impl SpeechSynthesizer for Recording {
        async fn speak(&self, text: &str) -> voice_turn_core::Result<()> {
            tokio::time::sleep(Duration::from_millis(5)).await;
            self.spoken.lock().push(text.to_string());
            Ok(())
        }

        fn name(&self) -> &str {
            "recording"
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
        dispatcher: Dispatcher,
        synth: Arc<Recording>,
        decision: Arc<ScriptedBackend>,
        worker_llm: Arc<ScriptedBackend>,
        _events: mpsc::UnboundedSender<ActionEvent>,
    }

    fn harness(agent_ids: &[u32]) -> Harness {
        let synth = Arc::new(Recording::default());
        let speech = Arc::new(SpeechQueue::spawn(synth.clone()));
        let (events, rx) = mpsc::unbounded_channel();
        let (actions, _task) = spawn_action_loop(rx, speech, Arc::new(NoPlayer));

        let decision = Arc::new(ScriptedBackend::new("decision"));
        let worker_llm = Arc::new(ScriptedBackend::new("worker"));
        let worker = Worker::new(
            &WorkerConfig::default(),
            Arc::new(ToolRegistry::new()),
            events.clone(),
            actions.clone(),
        );

        let mut dispatcher = Dispatcher::new(decision.clone(), "route", 20, worker, actions);
        for id in agent_ids {
            let tools = vec![ToolSchema {
                name: "get_current_time".to_string(),
                description: String::new(),
                parameters: json!({"type": "object"}),
            }];
            dispatcher = dispatcher.with_session(WorkerSession::new(
                *id,
                format!("agent{id}"),
                "work",
                20,
                tools,
                worker_llm.clone(),
            ));
        }

        Harness {
            dispatcher,
            synth,
            decision,
            worker_llm,
            _events: events,
        }
    }

    #[tokio::test]
    async fn test_direct_answer_is_spoken() {
        let mut h = harness(&[1]);
        h.decision.push_chars("0:你好呀！今天过得怎么样？");

        let outcome = h.dispatcher.dispatch(&Utterance::new("你好")).await;
        assert_eq!(outcome.route, Route::Direct);
        assert!(outcome.worker.is_none());
        assert_eq!(h.synth.spoken.lock().concat(), "你好呀！今天过得怎么样？");
        assert_eq!(h.worker_llm.requests().len(), 0);

        let messages = h.dispatcher.history().messages();
        assert_eq!(messages.len(), 3);
        assert_eq!(messages[2].content, "0:你好呀！今天过得怎么样？");
    }

    #[tokio::test]
    async fn test_tool_route_joins_worker_before_returning() {
        let mut h = harness(&[1, 2]);
        h.decision.push_chars("1:2:好的，我帮您查一下时间。");
        h.worker_llm.push_deltas(["现在是中午十二点。"]);

        let outcome = h.dispatcher.dispatch(&Utterance::new("几点了")).await;
        assert_eq!(outcome.route, Route::Tool { agent_id: Some(2) });
        assert_eq!(outcome.transition, "好的，我帮您查一下时间。");
        let worker = outcome.worker.unwrap();
        assert_eq!(worker.agent_id, 2);
        assert_eq!(worker.answer, "现在是中午十二点。");

        // Both the transition and the worker answer were spoken before return
        let spoken = h.synth.spoken.lock().concat();
        assert!(spoken.contains("好的，我帮您查一下时间。"));
        assert!(spoken.ends_with("现在是中午十二点。"));
        assert!(h.dispatcher.actions.speech().is_idle());
    }

    /// Worker backend that notes when it was first called
    struct Timed {
        inner: ScriptedBackend,
        called_at: SyncMutex<Option<Instant>>,
    }

    #[async_trait]
    impl LlmBackend for Timed {
        async fn generate(&self, messages: &[Message]) -> Result<GenerationResult, LlmError> {
            self.called_at.lock().get_or_insert_with(Instant::now);
            self.inner.generate(messages).await
        }

        async fn generate_stream(
            &self,
            messages: &[Message],
            tx: mpsc::Sender<String>,
        ) -> Result<GenerationResult, LlmError> {
            self.inner.generate_stream(messages, tx).await
        }

        async fn is_available(&self) -> bool {
            true
        }

        fn model_name(&self) -> &str {
            "timed"
        }
    }

    #[tokio::test]
    async fn test_worker_starts_before_decision_stream_ends() {
        let mut h = harness(&[]);
        let slow = Arc::new(
            ScriptedBackend::new("decision").with_delta_delay(Duration::from_millis(20)),
        );
        h.dispatcher.llm = slow.clone();
        // 30 chars at 20ms each: the stream lasts about 600ms
        slow.push_chars("1:5:稍等，我正在为您查询相关的信息，请您稍候片刻，马上就好。");

        let timed = Arc::new(Timed {
            inner: ScriptedBackend::new("worker"),
            called_at: SyncMutex::new(None),
        });
        timed.inner.push_deltas(["查到了。"]);
        h.dispatcher = h.dispatcher.with_session(WorkerSession::new(
            5,
            "timed",
            "work",
            20,
            Vec::new(),
            timed.clone(),
        ));

        let started = Instant::now();
        let outcome = h.dispatcher.dispatch(&Utterance::new("查一下")).await;
        let stream_ms = started.elapsed().as_millis();
        let worker_ms = timed
            .called_at
            .lock()
            .map(|at| at.duration_since(started).as_millis())
            .unwrap();

        assert_eq!(outcome.worker.map(|w| w.agent_id), Some(5));
        assert!(worker_ms < 300, "worker started after {worker_ms}ms");
        assert!(stream_ms >= 500);

        // Transition text was queued before the worker answer
        let spoken = h.synth.spoken.lock().concat();
        assert!(spoken.ends_with("查到了。"));
    }

    #[tokio::test]
    async fn test_unknown_agent_uses_default() {
        let mut h = harness(&[7]);
        h.decision.push_chars("1:9:let me check, one moment please");
        h.worker_llm.push_deltas(["done"]);

        let outcome = h.dispatcher.dispatch(&Utterance::new("check")).await;
        assert_eq!(outcome.worker.map(|w| w.agent_id), Some(7));
    }

    #[tokio::test]
    async fn test_decision_failure_speaks_fallback() {
        let mut h = harness(&[1]);
        h.decision.push_failure("connection refused");

        let outcome = h.dispatcher.dispatch(&Utterance::new("hello")).await;
        assert!(outcome.error.is_some());
        assert_eq!(*h.synth.spoken.lock(), vec![FALLBACK_ANSWER.to_string()]);
    }

    #[tokio::test]
    async fn test_think_block_is_not_spoken() {
        let mut h = harness(&[1]);
        h.decision
            .push_deltas(["<think>", "the user greets", "</think>\n\n", "0:", "Hi there!"]);

        let outcome = h.dispatcher.dispatch(&Utterance::new("hi")).await;
        assert_eq!(outcome.route, Route::Direct);
        assert_eq!(h.synth.spoken.lock().concat(), "Hi there!");
    }
}
