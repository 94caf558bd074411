//! System prompts for the decision and worker models

use voice_turn_config::AgentDefinition;
use voice_turn_tools::ToolSchema;

/// Prompt for the fast routing model
///
/// Lists every tool by `name: description` and every agent by id, then
/// fixes the `0:` / `1:<agentId>:` reply format.
pub fn decision_prompt(tools: &[ToolSchema], agents: &[AgentDefinition]) -> String {
    let tool_lines: Vec<String> = tools
        .iter()
        .map(|t| format!("- {}: {}", t.name, t.description))
        .collect();
    let agent_lines: Vec<String> = agents
        .iter()
        .map(|a| {
            let tools = if a.tools.is_empty() {
                "all tools".to_string()
            } else {
                a.tools.join(", ")
            };
            format!("- {} ({}): {} [{}]", a.id, a.name, a.description, tools)
        })
        .collect();
    let default_agent = agents.first().map(|a| a.id).unwrap_or(1);

    format!(
        "You are the fast decision center of a voice assistant. Decide whether the \
user's request needs an external tool.

Available tools:
{tools}

Agents that can run tools:
{agents}

Reply in plain text, never JSON, in exactly one of these forms:

Case 1: the request can be answered directly (small talk, common knowledge).
Start with \"0:\" followed by the answer.
Example: 0:Hi there! What would you like to talk about?

Case 2: the request needs a tool (time, weather, search, playing audio).
Start with \"1:<agentId>:\" followed by one natural, polite sentence telling the \
user you are working on it. Do not invent facts and do not answer the question yet.
Example: 1:{default}:Sure, let me check the latest information for you, this will \
only take a moment.

The reply must start with \"0:\" or \"1:<agentId>:\".",
        tools = tool_lines.join("\n"),
        agents = agent_lines.join("\n"),
        default = default_agent,
    )
}

/// Prompt for a worker bound to `tools`
pub fn worker_prompt(agent: &AgentDefinition, tools: &[ToolSchema]) -> String {
    let schemas = serde_json::to_string_pretty(tools).unwrap_or_else(|_| "[]".to_string());

    format!(
        "You are {name}, a tool scheduling expert. {description}

Tools available to you, as JSON schemas:
{schemas}

Answer the user's request by calling tools or by answering directly.

Mode A, when you need a tool, output only this JSON:
{{\"action\": \"call_tool\", \"name\": \"<tool name>\", \"params\": {{\"<param>\": \"<value>\"}}}}

Mode B, once you have the tool results or can answer directly:
Do not use JSON. Reply with the natural sentence to speak to the user, \
without any prefix.",
        name = agent.name,
        description = agent.description,
        schemas = schemas,
    )
}
