//! Tab model: one chat session (messages, server thread id, last turn's tool calls and diagnostics).
//!
//! Persisted as camelCase JSON so the stored shape matches what earlier clients wrote.

use chrono::{DateTime, Local, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Id of the greeting message every tab starts with.
pub const INITIAL_MESSAGE_ID: &str = "initial";

/// Character budget for a tab label derived from its first user message.
pub const TAB_LABEL_MAX_CHARS: usize = 25;

/// Greeting shown in a fresh tab when config does not override it.
pub const DEFAULT_GREETING: &str = "Hallo! Ich bin Herman AI, dein intelligenter Assistent. Wie kann ich dir heute helfen? Frag mich alles über Projekte, Erfahrungen, Skills oder IT-Themen!";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Model,
    Tool,
}

/// Parameter description inside a tool schema.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ParamSpec {
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub typ: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ToolSchema {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parameters: Option<BTreeMap<String, ParamSpec>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub required: Option<Vec<String>>,
}

/// One tool invocation the backend agent performed while answering.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub name: String,
    #[serde(default)]
    pub args: serde_json::Map<String, serde_json::Value>,
    /// Set by the backend for MCP-compatible tools.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mcp: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schema: Option<ToolSchema>,
}

/// One traced tool execution from a debug-enabled turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolExecution {
    pub tool_name: String,
    #[serde(default)]
    pub args: serde_json::Map<String, serde_json::Value>,
    #[serde(default)]
    pub result: String,
    #[serde(default)]
    pub execution_time_ms: f64,
    #[serde(default)]
    pub timestamp: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Diagnostics returned by the chat endpoint when debug mode is on. Kept in the wire's snake_case.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DebugInfo {
    #[serde(default)]
    pub tool_executions: Vec<ToolExecution>,
    #[serde(default)]
    pub model_responses: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_response: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_tool_calls: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_model_responses: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: String,
    pub role: Role,
    #[serde(default)]
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub is_streaming: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCall>>,
}

impl Message {
    /// The greeting every tab starts with (id `initial`, never streaming).
    pub fn initial(greeting: &str) -> Self {
        Self {
            id: INITIAL_MESSAGE_ID.to_string(),
            role: Role::Model,
            text: greeting.to_string(),
            timestamp: Some(Utc::now()),
            is_streaming: false,
            tool_calls: None,
        }
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self {
            id: generate_id("user"),
            role: Role::User,
            text: text.into(),
            timestamp: Some(Utc::now()),
            is_streaming: false,
            tool_calls: None,
        }
    }

    /// Empty assistant message shown while a turn is outstanding.
    pub fn placeholder() -> Self {
        Self {
            id: generate_id("bot"),
            role: Role::Model,
            text: String::new(),
            timestamp: Some(Utc::now()),
            is_streaming: true,
            tool_calls: None,
        }
    }
}

/// Greeting message with the built-in text.
pub fn create_initial_message() -> Message {
    Message::initial(DEFAULT_GREETING)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Tab {
    pub id: String,
    pub name: String,
    pub messages: Vec<Message>,
    #[serde(default)]
    pub thread_id: Option<String>,
    #[serde(default)]
    pub tool_calls: Vec<ToolCall>,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub debug_info: Option<DebugInfo>,
}

impl Tab {
    /// Fresh tab holding only the greeting. Generates an id when none is given.
    pub fn new(id: Option<String>, greeting: &str) -> Self {
        Self {
            id: id.unwrap_or_else(|| generate_id("tab")),
            name: format!("Chat {}", Local::now().format("%H:%M")),
            messages: vec![Message::initial(greeting)],
            thread_id: None,
            tool_calls: Vec::new(),
            created_at: Utc::now(),
            debug_info: None,
        }
    }

    /// Label for lists: the first user message (truncated) or the stored name.
    pub fn display_name(&self) -> String {
        match self.messages.get(1) {
            Some(m) if !m.text.is_empty() => truncate_label(&m.text),
            _ => self.name.clone(),
        }
    }

    /// True while the tab holds nothing but the greeting.
    pub fn is_fresh(&self) -> bool {
        self.messages.len() == 1 && self.messages[0].id == INITIAL_MESSAGE_ID
    }

    /// Number of messages after the greeting.
    pub fn user_message_count(&self) -> usize {
        self.messages.len().saturating_sub(1)
    }

    pub fn message(&self, id: &str) -> Option<&Message> {
        self.messages.iter().find(|m| m.id == id)
    }
}

fn truncate_label(text: &str) -> String {
    if text.chars().count() > TAB_LABEL_MAX_CHARS {
        let head: String = text.chars().take(TAB_LABEL_MAX_CHARS).collect();
        format!("{}...", head)
    } else {
        text.to_string()
    }
}

/// `<prefix>-<unix ms>-<9 random chars>`.
pub fn generate_id(prefix: &str) -> String {
    let millis = Utc::now().timestamp_millis();
    let random = uuid::Uuid::new_v4().simple().to_string();
    format!("{}-{}-{}", prefix, millis, &random[..9])
}
