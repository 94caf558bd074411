//! Bounded conversation history and worker sessions

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;

use voice_turn_config::WorkerConfig;
use voice_turn_llm::{LlmBackend, Message};
use voice_turn_tools::{ToolRegistry, ToolSchema};

use crate::prompts::worker_prompt;
use crate::AgentError;

/// System prompt plus a sliding window of recent messages
///
/// `window` counts the system prompt, which is never trimmed.
#[derive(Debug, Clone)]
pub struct ConversationHistory {
    system: Message,
    turns: VecDeque<Message>,
    window: usize,
}

impl ConversationHistory {
    pub fn new(system_prompt: impl Into<String>, window: usize) -> Self {
        Self {
            system: Message::system(system_prompt),
            turns: VecDeque::new(),
            window: window.max(2),
        }
    }

    pub fn push(&mut self, message: Message) {
        self.turns.push_back(message);
        while self.turns.len() + 1 > self.window {
            self.turns.pop_front();
        }
    }

    pub fn system_prompt(&self) -> &str {
        &self.system.content
    }

    /// Messages to send, system prompt first
    pub fn messages(&self) -> Vec<Message> {
        std::iter::once(self.system.clone())
            .chain(self.turns.iter().cloned())
            .collect()
    }

    /// Messages held, system prompt included
    pub fn message_count(&self) -> usize {
        self.turns.len() + 1
    }

    pub fn last(&self) -> Option<&Message> {
        self.turns.back()
    }
}

/// State of one logical sub-agent
///
/// Persists across turns; only the worker loop bound to it mutates the
/// history.
pub struct WorkerSession {
    pub agent_id: u32,
    pub name: String,
    pub history: ConversationHistory,
    pub tools: Vec<ToolSchema>,
    pub llm: Arc<dyn LlmBackend>,
}

impl WorkerSession {
    pub fn new(
        agent_id: u32,
        name: impl Into<String>,
        system_prompt: impl Into<String>,
        history_window: usize,
        tools: Vec<ToolSchema>,
        llm: Arc<dyn LlmBackend>,
    ) -> Self {
        Self {
            agent_id,
            name: name.into(),
            history: ConversationHistory::new(system_prompt, history_window),
            tools,
            llm,
        }
    }

    /// Whether `name` is in this agent's tool subset
    pub fn has_tool(&self, name: &str) -> bool {
        self.tools.iter().any(|t| t.name == name)
    }
}

/// One session per configured agent, in configuration order
///
/// Each agent gets the registry subset it names and a prompt embedding
/// those schemas.
pub fn build_sessions(
    config: &WorkerConfig,
    registry: &ToolRegistry,
    llm: Arc<dyn LlmBackend>,
) -> Result<Vec<WorkerSession>, AgentError> {
    if config.agents.is_empty() {
        return Err(AgentError::Config("no worker agents configured".to_string()));
    }

    let mut seen = HashSet::new();
    let mut sessions = Vec::with_capacity(config.agents.len());
    for agent in &config.agents {
        if !seen.insert(agent.id) {
            return Err(AgentError::Config(format!("duplicate agent id {}", agent.id)));
        }
        let tools = registry.subset(&agent.tools);
        if tools.is_empty() {
            tracing::warn!(agent_id = agent.id, agent = %agent.name, "Agent has no usable tools");
        }
        tracing::debug!(agent_id = agent.id, tools = tools.len(), "Worker session ready");
        sessions.push(WorkerSession::new(
            agent.id,
            agent.name.clone(),
            worker_prompt(agent, &tools),
            config.history_window,
            tools,
            llm.clone(),
        ));
    }
    Ok(sessions)
}
