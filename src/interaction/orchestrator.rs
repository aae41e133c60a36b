//! Composes conversational replies from the completion model, session history, and tools.

use std::sync::OnceLock;

use regex::Regex;
use serde_json::{Value, json};
use tracing::{info, instrument, warn};

use crate::{
    base::{
        config::Config,
        prompts::TOOL_RESULTS_HEADING,
        types::{ChatMessage, ConversationKey, Res},
    },
    service::{
        directive::DirectiveStore,
        llm::LlmClient,
        mcp::manager::{ToolCallResult, ToolManager},
        session::SessionStore,
    },
};

/// Keywords that make a message worth a look for tool calls.
const TOOL_KEYWORDS: [&str; 6] = ["天气", "搜索", "查询", "计算", "查找", "获取"];

/// Phrases stripped from the front of a guessed city name.
const CITY_FILLERS: [&str; 7] = ["请问", "请", "帮我", "查询", "查一下", "看看", "今天"];

const DEFAULT_CITY: &str = "北京";
const DEFAULT_EXPRESSION: &str = "1+1";

// Types.

/// A tool call chosen by the keyword heuristic.
#[derive(Debug, Clone, PartialEq)]
pub struct PlannedToolCall {
    pub name: String,
    pub arguments: Value,
}

/// Response orchestrator.
///
/// It is designed to be trivially cloneable, allowing it to be passed around
/// without the need for `Arc` or `Mutex`.
#[derive(Clone)]
pub struct Orchestrator {
    llm: LlmClient,
    sessions: SessionStore,
    directives: DirectiveStore,
    tools: ToolManager,
    config: Config,
}

impl Orchestrator {
    pub fn new(llm: LlmClient, sessions: SessionStore, directives: DirectiveStore, tools: ToolManager, config: Config) -> Self {
        Self {
            llm,
            sessions,
            directives,
            tools,
            config,
        }
    }

    pub fn sessions(&self) -> &SessionStore {
        &self.sessions
    }

    pub fn directives(&self) -> &DirectiveStore {
        &self.directives
    }

    pub fn tools(&self) -> &ToolManager {
        &self.tools
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// One-shot completion with the configured system directive, and no history.
    pub async fn chat(&self, prompt: &str) -> Res<String> {
        self.chat_as(&self.config.system_directive, prompt).await
    }

    /// One-shot completion with an explicit system directive, and no history.
    #[instrument(skip_all)]
    pub async fn chat_as(&self, directive: &str, prompt: &str) -> Res<String> {
        let mut messages = vec![ChatMessage::system(directive), ChatMessage::user(prompt)];

        if let Some(tool_context) = self.gather_tool_context(prompt).await {
            messages.push(tool_context);
        }

        self.llm.complete(&messages).await
    }

    /// Completion within a stored session, under the configured system directive.
    pub async fn chat_with_session(&self, session_id: &str, message: &str) -> Res<String> {
        self.chat_with_session_as(session_id, &self.config.system_directive, message).await
    }

    /// Completion within a stored session.
    ///
    /// `directive` becomes the session's leading system message, and the user and
    /// assistant turns are persisted only once the completion succeeded.  Tool results
    /// are sent along with this turn but never stored.
    #[instrument(skip(self, directive, message))]
    pub async fn chat_with_session_as(&self, session_id: &str, directive: &str, message: &str) -> Res<String> {
        let mut history = self.sessions.ensure_directive(session_id, directive).await?;

        let user_message = ChatMessage::user(message);
        history.push(user_message.clone());

        if let Some(tool_context) = self.gather_tool_context(message).await {
            history.push(tool_context);
        }

        let reply = self.llm.complete(&history).await?;

        self.sessions.append_many(session_id, vec![user_message, ChatMessage::assistant(reply.clone())]).await?;

        Ok(reply)
    }

    /// The system directive for `sender` in `conversation`, with any group and member
    /// directives layered on top of the configured one.
    pub async fn directive_for(&self, conversation: &ConversationKey, sender: i64) -> Res<String> {
        self.directives.compose(&self.config.system_directive, conversation, sender).await
    }

    /// Run the heuristic tool calls for a message and fold their results into a system
    /// message.  `None` when no tool applies or none are available.
    ///
    /// Failed calls are reported in the message rather than aborting the turn.
    #[instrument(skip_all)]
    pub async fn gather_tool_context(&self, message: &str) -> Option<ChatMessage> {
        if self.tools.tools().is_empty() || !should_use_tools(message) {
            return None;
        }

        let planned = plan_tool_calls(message);
        if planned.is_empty() {
            return None;
        }

        info!("Calling {} tools for the current message.", planned.len());

        let mut results = Vec::with_capacity(planned.len());
        for call in planned {
            let result = self.tools.call_tool(&call.name, call.arguments.clone()).await;

            if !result.success {
                warn!("Tool `{}` failed; continuing without it.", call.name);
            }

            results.push((call, result));
        }

        Some(ChatMessage::system(format_tool_results(&results)))
    }
}

// Helpers.

/// Whether any tool keyword appears in the message.
pub fn should_use_tools(message: &str) -> bool {
    TOOL_KEYWORDS.iter().any(|k| message.contains(k))
}

/// Decide which tools to call, and with what, from the message text alone.
pub fn plan_tool_calls(message: &str) -> Vec<PlannedToolCall> {
    let mut calls = Vec::new();

    if message.contains("天气") {
        calls.push(PlannedToolCall {
            name: "get_weather".to_string(),
            arguments: json!({ "city": guess_city(message), "unit": "celsius" }),
        });
    }

    if message.contains("搜索") || message.contains("查找") {
        calls.push(PlannedToolCall {
            name: "search_web".to_string(),
            arguments: json!({ "query": message, "limit": 3 }),
        });
    }

    if message.contains("计算") {
        let expression = expression_regex()
            .captures(message)
            .and_then(|c| c.get(1))
            .map(|m| m.as_str().trim().to_string())
            .filter(|e| !e.is_empty())
            .unwrap_or_else(|| DEFAULT_EXPRESSION.to_string());

        calls.push(PlannedToolCall {
            name: "calculate".to_string(),
            arguments: json!({ "expression": expression }),
        });
    }

    calls
}

/// The text in front of `(的)天气`, without filler words; `北京` when nothing is left.
pub fn guess_city(message: &str) -> String {
    let Some(captured) = weather_regex().captures(message).and_then(|c| c.get(1)) else {
        return DEFAULT_CITY.to_string();
    };

    let mut city = captured.as_str().trim();

    loop {
        let stripped = CITY_FILLERS.iter().find_map(|filler| city.strip_prefix(filler)).map(str::trim);

        match stripped {
            Some(rest) => city = rest,
            None => break,
        }
    }

    if city.is_empty() { DEFAULT_CITY.to_string() } else { city.to_string() }
}

/// Render tool results as the body of a system message.
pub fn format_tool_results(results: &[(PlannedToolCall, ToolCallResult)]) -> String {
    let mut text = String::from(TOOL_RESULTS_HEADING);

    for (call, result) in results {
        if result.success {
            text.push_str(&format!("\n\n- `{}` returned:\n{}", call.name, result.content));
        } else {
            text.push_str(&format!("\n\n- `{}` failed: {}", call.name, result.error.as_deref().unwrap_or("unknown error")));
        }
    }

    text
}

static WEATHER_REGEX: OnceLock<Regex> = OnceLock::new();
static EXPRESSION_REGEX: OnceLock<Regex> = OnceLock::new();

fn weather_regex() -> &'static Regex {
    WEATHER_REGEX.get_or_init(|| Regex::new(r"([^的]*?)(?:的)?天气").unwrap())
}

fn expression_regex() -> &'static Regex {
    EXPRESSION_REGEX.get_or_init(|| Regex::new(r"计算\s*(.+)").unwrap())
}

// Tests.
