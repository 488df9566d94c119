//! Core data models for the trading agent

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashSet;
use std::fmt;

/// Tool arguments as sent by the model: parameter name → value.
pub type ToolArguments = Map<String, Value>;

//
// ================= Enums =================
//

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    Tool,
}

/// Where a thread stands between invocations.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ThreadStatus {
    AwaitingInput,
    Suspended,
}

/// States of the execution graph while a run is in flight.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GraphState {
    AwaitingInput,
    ModelTurn,
    ToolTurn,
    Suspended,
    Done,
}

//
// ================= Messages =================
//

/// Message payload: free text or a structured tool result.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Structured(Value),
}

impl MessageContent {
    /// Plain strings stay text, everything else is kept structured.
    pub fn from_value(value: Value) -> Self {
        match value {
            Value::String(text) => MessageContent::Text(text),
            other => MessageContent::Structured(other),
        }
    }

    pub fn to_value(&self) -> Value {
        match self {
            MessageContent::Text(text) => Value::String(text.clone()),
            MessageContent::Structured(value) => value.clone(),
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            MessageContent::Text(text) => Some(text),
            MessageContent::Structured(_) => None,
        }
    }
}

impl fmt::Display for MessageContent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MessageContent::Text(text) => write!(f, "{}", text),
            MessageContent::Structured(value) => write!(f, "{}", value),
        }
    }
}

/// A structured request, emitted by the model, to invoke a named tool.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolCallRequest {
    pub call_id: String,
    pub tool_name: String,
    #[serde(default)]
    pub arguments: ToolArguments,
}

impl ToolCallRequest {
    pub fn new(call_id: impl Into<String>, tool_name: impl Into<String>, arguments: Value) -> Self {
        let arguments = match arguments {
            Value::Object(map) => map,
            _ => Map::new(),
        };

        Self {
            call_id: call_id.into(),
            tool_name: tool_name.into(),
            arguments,
        }
    }
}

/// One turn in a conversation. Never modified after being appended.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Message {
    pub role: Role,
    pub content: MessageContent,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    /// Requests carried by an assistant message that asked for tools
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCallRequest>,
    pub created_at: DateTime<Utc>,
}

impl Message {
    pub fn user(content: impl Into<String>) -> Self {
        Self::text(Role::User, content.into())
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::text(Role::Assistant, content.into())
    }

    pub fn assistant_with_tool_calls(tool_calls: Vec<ToolCallRequest>) -> Self {
        Self {
            role: Role::Assistant,
            content: MessageContent::Text(String::new()),
            tool_call_id: None,
            tool_calls,
            created_at: Utc::now(),
        }
    }

    pub fn tool_result(call_id: impl Into<String>, result: Value) -> Self {
        Self {
            role: Role::Tool,
            content: MessageContent::from_value(result),
            tool_call_id: Some(call_id.into()),
            tool_calls: Vec::new(),
            created_at: Utc::now(),
        }
    }

    fn text(role: Role, content: String) -> Self {
        Self {
            role,
            content: MessageContent::Text(content),
            tool_call_id: None,
            tool_calls: Vec::new(),
            created_at: Utc::now(),
        }
    }
}

//
// ================= Conversation State =================
//

/// The tool call a thread is suspended on, with everything needed to
/// re-enter it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PendingInterrupt {
    pub call_id: String,
    pub tool_name: String,
    pub arguments: ToolArguments,
    pub prompt: String,
    /// Set once a decision has been handed to the tool.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub decision: Option<String>,
}

/// Everything persisted for one thread.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConversationState {
    pub thread_id: String,
    #[serde(default)]
    pub history: Vec<Message>,
    #[serde(default)]
    pub pending_interrupt: Option<PendingInterrupt>,
    /// Revision of the stored snapshot this state was read from, 0 if the
    /// thread has never been saved. Kept by the store, not in the snapshot.
    #[serde(skip)]
    pub version: u64,
}

impl ConversationState {
    pub fn new(thread_id: impl Into<String>) -> Self {
        Self {
            thread_id: thread_id.into(),
            history: Vec::new(),
            pending_interrupt: None,
            version: 0,
        }
    }

    pub fn status(&self) -> ThreadStatus {
        if self.pending_interrupt.is_some() {
            ThreadStatus::Suspended
        } else {
            ThreadStatus::AwaitingInput
        }
    }

    /// History only ever grows at the tail.
    pub fn append(&mut self, message: Message) {
        self.history.push(message);
    }

    pub fn last_message(&self) -> Option<&Message> {
        self.history.last()
    }

    /// Calls of the latest tool-call batch that have no result in the history.
    pub fn unanswered_calls(&self) -> Vec<ToolCallRequest> {
        let Some(idx) = self
            .history
            .iter()
            .rposition(|m| m.role == Role::Assistant && !m.tool_calls.is_empty())
        else {
            return Vec::new();
        };

        let answered: HashSet<&str> = self.history[idx + 1..]
            .iter()
            .filter_map(|m| m.tool_call_id.as_deref())
            .collect();

        self.history[idx]
            .tool_calls
            .iter()
            .filter(|c| !answered.contains(c.call_id.as_str()))
            .cloned()
            .collect()
    }

    /// Requests from the same batch that come after `call_id`, in order.
    ///
    /// Returns `None` if no assistant message in the history carries the call.
    pub fn requests_after(&self, call_id: &str) -> Option<Vec<ToolCallRequest>> {
        self.history
            .iter()
            .rev()
            .filter(|m| m.role == Role::Assistant)
            .find_map(|m| {
                m.tool_calls
                    .iter()
                    .position(|c| c.call_id == call_id)
                    .map(|idx| m.tool_calls[idx + 1..].to_vec())
            })
    }
}

//
// ================= Run Result =================
//

/// What a submit or resume hands back to the shell.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RunResult {
    Completed { final_text: String },
    Suspended { prompt: String, call_id: String },
}

impl RunResult {
    pub fn is_suspended(&self) -> bool {
        matches!(self, RunResult::Suspended { .. })
    }
}

impl fmt::Display for GraphState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            GraphState::AwaitingInput => "AWAITING_INPUT",
            GraphState::ModelTurn => "MODEL_TURN",
            GraphState::ToolTurn => "TOOL_TURN",
            GraphState::Suspended => "SUSPENDED",
            GraphState::Done => "DONE",
        };
        write!(f, "{}", s)
    }
}
