//! Chat messages and request hygiene
//!
//! Reasoning models (qwen3, deepseek-r1) may open with a `<think>` block and
//! tend to echo long earlier answers back. The helpers here keep both out of
//! what the rest of the engine sees.

use std::fmt;

use serde::{Deserialize, Serialize};
use voice_turn_config::constants::llm::HISTORY_TRUNCATE_CHARS;

/// Appended to the latest user message to skip the thinking phase
pub const NO_THINK_MARKER: &str = "/no_think";

const THINK_OPEN: &str = "<think>";
const THINK_CLOSE: &str = "</think>";

/// Message role
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    /// Tool result fed back to the model
    Tool,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::System => write!(f, "system"),
            Role::User => write!(f, "user"),
            Role::Assistant => write!(f, "assistant"),
            Role::Tool => write!(f, "tool"),
        }
    }
}

/// Chat message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }

    pub fn tool(content: impl Into<String>) -> Self {
        Self::new(Role::Tool, content)
    }
}

/// Drop everything up to and including the last `</think>`
pub fn strip_think(text: &str) -> &str {
    match text.rfind(THINK_CLOSE) {
        Some(pos) => text[pos + THINK_CLOSE.len()..].trim_start(),
        None => text,
    }
}

/// Streaming counterpart of [`strip_think`]
///
/// Holds deltas back while the response could still open with `<think>`,
/// swallows the block if it does, and passes everything else through.
#[derive(Debug, Default)]
pub struct ThinkFilter {
    state: ThinkState,
    buffer: String,
}

#[derive(Debug, Default, PartialEq, Eq)]
enum ThinkState {
    #[default]
    Detecting,
    Inside,
    Passthrough,
}

impl ThinkFilter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one delta, returning the text that may be shown
    pub fn push(&mut self, delta: &str) -> String {
        match self.state {
            ThinkState::Passthrough => delta.to_string(),
            ThinkState::Detecting => {
                self.buffer.push_str(delta);
                let head = self.buffer.trim_start();
                if let Some(rest) = head.strip_prefix(THINK_OPEN) {
                    self.buffer = rest.to_string();
                    self.state = ThinkState::Inside;
                    self.close_block()
                } else if THINK_OPEN.starts_with(head) {
                    String::new()
                } else {
                    self.state = ThinkState::Passthrough;
                    std::mem::take(&mut self.buffer)
                }
            }
            ThinkState::Inside => {
                self.buffer.push_str(delta);
                self.close_block()
            }
        }
    }

    /// Text still held back when the stream ends
    pub fn finish(&mut self) -> String {
        let held = std::mem::take(&mut self.buffer);
        match std::mem::replace(&mut self.state, ThinkState::Passthrough) {
            ThinkState::Detecting => held,
            _ => String::new(),
        }
    }

    fn close_block(&mut self) -> String {
        match self.buffer.find(THINK_CLOSE) {
            Some(pos) => {
                let rest = self.buffer[pos + THINK_CLOSE.len()..].trim_start().to_string();
                self.buffer.clear();
                self.state = ThinkState::Passthrough;
                rest
            }
            None => String::new(),
        }
    }
}

/// Keep the first and last `keep` chars of long text, joined by `...`
pub fn truncate_middle(text: &str, keep: usize) -> String {
    let count = text.chars().count();
    if count <= keep * 2 {
        return text.to_string();
    }
    let head: String = text.chars().take(keep).collect();
    let tail: String = text.chars().skip(count - keep).collect();
    format!("{head}...{tail}")
}

/// Build the message list actually sent to a model
///
/// Assistant turns over the truncation limit are shortened, and when
/// `no_think` is set the latest user message gets [`NO_THINK_MARKER`].
pub fn prepare_messages(messages: &[Message], no_think: bool) -> Vec<Message> {
    let mut prepared: Vec<Message> = messages
        .iter()
        .map(|m| match m.role {
            Role::Assistant if m.content.chars().count() > HISTORY_TRUNCATE_CHARS => {
                Message::assistant(truncate_middle(&m.content, HISTORY_TRUNCATE_CHARS / 2))
            }
            _ => m.clone(),
        })
        .collect();

    if no_think {
        if let Some(last_user) = prepared.iter_mut().rev().find(|m| m.role == Role::User) {
            if !last_user.content.trim_end().ends_with(NO_THINK_MARKER) {
                last_user.content.push(' ');
                last_user.content.push_str(NO_THINK_MARKER);
            }
        }
    }

    prepared
}
