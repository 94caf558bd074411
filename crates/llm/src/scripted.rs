//! Scripted token source
//!
//! Replays canned responses delta by delta. Used to drive the dispatcher
//! and worker without a model server.

use std::collections::VecDeque;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;

use crate::backend::{FinishReason, GenerationResult, LlmBackend};
use crate::prompt::Message;
use crate::LlmError;

enum Script {
    Deltas(Vec<String>),
    Fail(String),
}

/// Backend that answers each call with the next queued script
pub struct ScriptedBackend {
    name: String,
    scripts: Mutex<VecDeque<Script>>,
    delta_delay: Duration,
    requests: Mutex<Vec<Vec<Message>>>,
}

impl ScriptedBackend {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            scripts: Mutex::new(VecDeque::new()),
            delta_delay: Duration::ZERO,
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Pause between deltas
    pub fn with_delta_delay(mut self, delay: Duration) -> Self {
        self.delta_delay = delay;
        self
    }

    /// Queue a response streamed as the given deltas
    pub fn push_deltas<I, S>(&self, deltas: I) -> &Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.scripts
            .lock()
            .push_back(Script::Deltas(deltas.into_iter().map(Into::into).collect()));
        self
    }

    /// Queue a response streamed one char at a time
    pub fn push_chars(&self, text: &str) -> &Self {
        self.push_deltas(text.chars().map(String::from))
    }

    /// Queue a failing call
    pub fn push_failure(&self, message: impl Into<String>) -> &Self {
        self.scripts.lock().push_back(Script::Fail(message.into()));
        self
    }

    /// Message lists received so far, one per call
    pub fn requests(&self) -> Vec<Vec<Message>> {
        self.requests.lock().clone()
    }

    pub fn remaining(&self) -> usize {
        self.scripts.lock().len()
    }

    fn next_script(&self, messages: &[Message]) -> Result<Vec<String>, LlmError> {
        self.requests.lock().push(messages.to_vec());
        match self.scripts.lock().pop_front() {
            Some(Script::Deltas(deltas)) => Ok(deltas),
            Some(Script::Fail(message)) => Err(LlmError::Generation(message)),
            None => Err(LlmError::Generation("no scripted response left".to_string())),
        }
    }
}

#[async_trait]
impl LlmBackend for ScriptedBackend {
    async fn generate(&self, messages: &[Message]) -> Result<GenerationResult, LlmError> {
        let deltas = self.next_script(messages)?;
        Ok(GenerationResult {
            tokens: deltas.len(),
            text: deltas.concat(),
            time_to_first_token_ms: 0,
            total_time_ms: 0,
            finish_reason: FinishReason::Stop,
        })
    }

    async fn generate_stream(
        &self,
        messages: &[Message],
        tx: mpsc::Sender<String>,
    ) -> Result<GenerationResult, LlmError> {
        let deltas = self.next_script(messages)?;
        let mut text = String::new();
        for (i, delta) in deltas.iter().enumerate() {
            if !self.delta_delay.is_zero() {
                tokio::time::sleep(self.delta_delay).await;
            }
            text.push_str(delta);
            if tx.send(delta.clone()).await.is_err() {
                return Ok(GenerationResult {
                    text,
                    tokens: i + 1,
                    time_to_first_token_ms: 0,
                    total_time_ms: 0,
                    finish_reason: FinishReason::Cancelled,
                });
            }
        }
        Ok(GenerationResult {
            text,
            tokens: deltas.len(),
            time_to_first_token_ms: 0,
            total_time_ms: 0,
            finish_reason: FinishReason::Stop,
        })
    }

    async fn is_available(&self) -> bool {
        true
    }

    fn model_name(&self) -> &str {
        &self.name
    }
}
