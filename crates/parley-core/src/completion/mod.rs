//! Completion service clients
//!
//! A completion client turns a history snapshot plus the offered tool
//! schemas into either a final answer or a batch of tool calls.

mod genai_client;
pub mod logging;
mod scripted;

pub use genai_client::GenAiClient;
pub use scripted::{RecordedRequest, ScriptedClient};

use async_trait::async_trait;

use crate::conversation::{Message, Snapshot, ToolCallRequest};
use crate::error::CompletionError;
use crate::tools::ToolSchema;

/// What the model returned for one round
#[derive(Debug, Clone, PartialEq)]
pub enum CompletionOutcome {
    Answer {
        text: String,
    },
    ToolCallBatch {
        /// Text the model sent alongside its calls, if any
        text: Option<String>,
        calls: Vec<ToolCallRequest>,
    },
}

impl CompletionOutcome {
    pub fn answer(text: impl Into<String>) -> Self {
        CompletionOutcome::Answer { text: text.into() }
    }

    pub fn tool_calls(calls: Vec<ToolCallRequest>) -> Self {
        CompletionOutcome::ToolCallBatch { text: None, calls }
    }

    pub fn text(&self) -> Option<&str> {
        match self {
            CompletionOutcome::Answer { text } => Some(text),
            CompletionOutcome::ToolCallBatch { text, .. } => text.as_deref(),
        }
    }
}

#[async_trait]
pub trait CompletionClient: Send + Sync {
    /// Request one completion. Failures are terminal for the turn.
    async fn request(
        &self,
        snapshot: &Snapshot,
        tools: &[ToolSchema],
    ) -> Result<CompletionOutcome, CompletionError>;

    /// Model identifier, for display and logs
    fn model(&self) -> &str;
}

/// Rough size of a request in characters: message text, tool payloads,
/// call arguments and tool schemas.
pub fn estimate_request_chars(messages: &[Message], tools: &[ToolSchema]) -> usize {
    let message_chars: usize = messages
        .iter()
        .map(|message| {
            let text = message.text().map_or(0, str::len);
            let payload = message.payload_text().map_or(0, |p| p.len());
            let calls: usize = message
                .tool_calls()
                .iter()
                .map(|call| call.tool_name.len() + call.arguments.to_string().len())
                .sum();
            text + payload + calls
        })
        .sum();

    let tool_chars: usize = tools
        .iter()
        .map(|tool| tool.name.len() + tool.description.len() + tool.parameters.to_string().len())
        .sum();

    message_chars + tool_chars
}

/// Refuse a request locally when it exceeds `limit`
pub fn check_budget(
    messages: &[Message],
    tools: &[ToolSchema],
    limit: usize,
) -> Result<(), CompletionError> {
    let size = estimate_request_chars(messages, tools);
    if size > limit {
        return Err(CompletionError::BudgetExceeded { size, limit });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_estimate_counts_text_payloads_and_schemas() {
        let call = ToolCallRequest::new("c1", "get_alerts", json!({ "state": "CA" }));
        let messages = vec![
            Message::user("hello"),
            Message::assistant_with_calls(None, vec![call.clone()]),
            Message::tool_result(&call, Ok(json!("none"))),
        ];
        let tools = vec![ToolSchema {
            name: "get_alerts".to_string(),
            description: "Alerts".to_string(),
            parameters: json!({}),
        }];

        let expected = 5 + ("get_alerts".len() + r#"{"state":"CA"}"#.len()) + 4 + (10 + 6 + 2);
        assert_eq!(estimate_request_chars(&messages, &tools), expected);
    }

    #[test]
    fn test_budget_exceeded_reports_size_and_limit() {
        let messages = vec![Message::user("x".repeat(20))];
        assert!(check_budget(&messages, &[], 20).is_ok());
        assert_eq!(
            check_budget(&messages, &[], 19),
            Err(CompletionError::BudgetExceeded { size: 20, limit: 19 })
        );
    }
}
