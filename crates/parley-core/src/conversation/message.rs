use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ToolError;

/// A tool invocation requested by the model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallRequest {
    /// Provider-assigned id, echoed back by the matching result
    pub id: String,
    pub tool_name: String,
    /// Raw arguments; validated by the tool, never before
    pub arguments: Value,
}

impl ToolCallRequest {
    pub fn new(id: impl Into<String>, tool_name: impl Into<String>, arguments: Value) -> Self {
        Self {
            id: id.into(),
            tool_name: tool_name.into(),
            arguments,
        }
    }
}

/// One entry of the conversation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "role", rename_all = "snake_case")]
pub enum Message {
    User {
        text: String,
    },
    System {
        text: String,
    },
    Assistant {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        text: Option<String>,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        tool_calls: Vec<ToolCallRequest>,
    },
    ToolResult {
        tool_call_id: String,
        tool_name: String,
        payload: Value,
        #[serde(default)]
        is_error: bool,
    },
}

impl Message {
    pub fn user(text: impl Into<String>) -> Self {
        Message::User { text: text.into() }
    }

    pub fn system(text: impl Into<String>) -> Self {
        Message::System { text: text.into() }
    }

    /// Plain assistant answer with no tool calls
    pub fn assistant(text: impl Into<String>) -> Self {
        Message::Assistant {
            text: Some(text.into()),
            tool_calls: Vec::new(),
        }
    }

    pub fn assistant_with_calls(text: Option<String>, tool_calls: Vec<ToolCallRequest>) -> Self {
        Message::Assistant { text, tool_calls }
    }

    /// Materialize the outcome of a tool call as a result message.
    ///
    /// Failures become `{"error": "..."}` payloads flagged with `is_error`.
    pub fn tool_result(call: &ToolCallRequest, outcome: Result<Value, ToolError>) -> Self {
        match outcome {
            Ok(payload) => Message::ToolResult {
                tool_call_id: call.id.clone(),
                tool_name: call.tool_name.clone(),
                payload,
                is_error: false,
            },
            Err(e) => Self::tool_error(call, e.to_string()),
        }
    }

    pub fn tool_error(call: &ToolCallRequest, reason: impl Into<String>) -> Self {
        Message::ToolResult {
            tool_call_id: call.id.clone(),
            tool_name: call.tool_name.clone(),
            payload: serde_json::json!({ "error": reason.into() }),
            is_error: true,
        }
    }

    pub fn role(&self) -> &'static str {
        match self {
            Message::User { .. } => "user",
            Message::System { .. } => "system",
            Message::Assistant { .. } => "assistant",
            Message::ToolResult { .. } => "tool",
        }
    }

    /// Text content, if the message carries any
    pub fn text(&self) -> Option<&str> {
        match self {
            Message::User { text } | Message::System { text } => Some(text),
            Message::Assistant { text, .. } => text.as_deref(),
            Message::ToolResult { .. } => None,
        }
    }

    /// Tool calls issued by this message (empty unless assistant)
    pub fn tool_calls(&self) -> &[ToolCallRequest] {
        match self {
            Message::Assistant { tool_calls, .. } => tool_calls,
            _ => &[],
        }
    }

    /// Payload rendered as the text sent upstream; strings are not quoted
    pub fn payload_text(&self) -> Option<String> {
        match self {
            Message::ToolResult { payload, .. } => Some(match payload {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            }),
            _ => None,
        }
    }
}
