//! Decision prefix parsing
//!
//! The decision model opens every reply with a routing prefix:
//!
//! ```text
//! 0:<answer>                 direct answer
//! 1:<agentId>:<transition>   tool branch, spoken transition text
//! ```
//!
//! The prefix is parsed from the partial stream so the worker can start
//! before the model has finished talking. Once resolved the frame never
//! re-parses; later deltas are plain transition text.

use voice_turn_config::constants::decision::{MAX_PREFIX_CHARS, PARSE_AFTER_CHARS};

/// Keywords accepted in place of the digit `1`
const TOOL_KEYWORDS: &[&str] = &["usetool", "tool"];

/// Where a turn goes once the prefix is known
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    Direct,
    /// `agent_id` is `None` when the model skipped the field
    Tool { agent_id: Option<u32> },
}

impl Route {
    pub fn uses_tool(&self) -> bool {
        matches!(self, Route::Tool { .. })
    }
}

/// Result of feeding the frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameUpdate {
    /// Prefix not decided yet
    Pending,
    /// The prefix just resolved; `text` is the transition text seen so far
    Resolved { route: Route, text: String },
    /// Continuation after resolution
    Text(String),
}

/// Accumulating routing parse state for one dispatch
#[derive(Debug)]
pub struct DecisionFrame {
    raw: String,
    route: Option<Route>,
    transition: String,
    parse_after: usize,
    max_prefix: usize,
}

impl Default for DecisionFrame {
    fn default() -> Self {
        Self::new(PARSE_AFTER_CHARS, MAX_PREFIX_CHARS)
    }
}

impl DecisionFrame {
    pub fn new(parse_after: usize, max_prefix: usize) -> Self {
        Self {
            raw: String::new(),
            route: None,
            transition: String::new(),
            parse_after,
            max_prefix,
        }
    }

    pub fn is_resolved(&self) -> bool {
        self.route.is_some()
    }

    pub fn route(&self) -> Option<Route> {
        self.route
    }

    /// Everything received, prefix included
    pub fn raw(&self) -> &str {
        &self.raw
    }

    /// Text after the prefix
    pub fn transition_text(&self) -> &str {
        &self.transition
    }

    pub fn push(&mut self, delta: &str) -> FrameUpdate {
        self.raw.push_str(delta);
        if self.route.is_some() {
            self.transition.push_str(delta);
            return FrameUpdate::Text(delta.to_string());
        }

        if self.raw.chars().count() <= self.parse_after {
            return FrameUpdate::Pending;
        }

        if let Some((route, offset)) = parse_prefix(&self.raw, false) {
            return self.resolve(route, offset);
        }
        if could_be_prefix(&self.raw, self.max_prefix) {
            return FrameUpdate::Pending;
        }

        tracing::debug!(raw = %self.raw, "No routing prefix, answering directly");
        self.resolve(Route::Direct, 0)
    }

    /// End of stream; resolves a frame that is still pending
    pub fn finish(&mut self) -> FrameUpdate {
        if self.route.is_some() {
            return FrameUpdate::Text(String::new());
        }
        match parse_prefix(&self.raw, true) {
            Some((route, offset)) => self.resolve(route, offset),
            None => self.resolve(Route::Direct, 0),
        }
    }

    fn resolve(&mut self, route: Route, offset: usize) -> FrameUpdate {
        let text = self.raw[offset..].trim_start().to_string();
        self.route = Some(route);
        self.transition = text.clone();
        FrameUpdate::Resolved { route, text }
    }
}

fn is_colon(c: char) -> bool {
    c == ':' || c == '：'
}

/// `0`/`1`, or a tool keyword meaning `1`
fn parse_flag(field: &str) -> Option<bool> {
    let field = field.trim();
    match field {
        "0" => Some(false),
        "1" => Some(true),
        _ if TOOL_KEYWORDS.iter().any(|k| field.eq_ignore_ascii_case(k)) => Some(true),
        _ => None,
    }
}

fn parse_agent_id(field: &str) -> Option<u32> {
    let field = field.trim();
    if field.is_empty() || !field.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    field.parse().ok()
}

/// Byte offsets just past each colon
fn colon_ends(text: &str) -> Vec<(usize, usize)> {
    text.char_indices()
        .filter(|(_, c)| is_colon(*c))
        .map(|(i, c)| (i, i + c.len_utf8()))
        .collect()
}

/// Parse `flag:agent:text` starting at field `skip`
///
/// Returns the route and the byte offset where the text begins.
fn parse_from(text: &str, skip: usize, at_end: bool) -> Option<(Route, usize)> {
    let colons = colon_ends(text);
    let start = if skip == 0 { 0 } else { colons.get(skip - 1)?.1 };
    let (flag_end, after_flag) = *colons.get(skip)?;
    let use_tool = parse_flag(&text[start..flag_end])?;

    let next = colons.get(skip + 1).copied();
    let field = match next {
        Some((end, _)) => &text[after_flag..end],
        None => &text[after_flag..],
    };

    if !use_tool {
        // `0:<id>:` is tolerated, the id is ignored
        return match next {
            Some((_, after_id)) if parse_agent_id(field).is_some() => Some((Route::Direct, after_id)),
            _ => Some((Route::Direct, after_flag)),
        };
    }

    match (next, parse_agent_id(field)) {
        (Some((_, after_id)), Some(id)) => Some((Route::Tool { agent_id: Some(id) }, after_id)),
        // Digits so far, the second colon may still come
        (None, Some(_)) if !at_end => None,
        (None, None) if !at_end && field.trim().is_empty() => None,
        _ => Some((Route::Tool { agent_id: None }, after_flag)),
    }
}

fn parse_prefix(text: &str, at_end: bool) -> Option<(Route, usize)> {
    if let Some(parsed) = parse_from(text, 0, at_end) {
        return Some(parsed);
    }

    // Shifted by one field: junk before the flag
    let colons = colon_ends(text);
    let (first_colon, _) = *colons.first()?;
    if parse_flag(&text[..first_colon]).is_some() {
        return None;
    }
    parse_from(text, 1, at_end)
}

fn looks_like_prefix(text: &str) -> bool {
    let letters: String = text
        .chars()
        .filter(|c| !(c.is_ascii_digit() || is_colon(*c) || c.is_whitespace()))
        .collect::<String>()
        .to_ascii_lowercase();
    letters.is_empty() || TOOL_KEYWORDS.iter().any(|k| k.starts_with(&letters))
}

/// Whether an unresolved buffer may still become a valid prefix
fn could_be_prefix(text: &str, max_chars: usize) -> bool {
    if text.chars().count() > max_chars {
        return false;
    }
    if looks_like_prefix(text) {
        return true;
    }
    match text.char_indices().find(|(_, c)| is_colon(*c)) {
        Some((i, c)) => looks_like_prefix(&text[i + c.len_utf8()..]),
        None => false,
    }
}
