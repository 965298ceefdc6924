//! Completion client backed by the genai framework
//!
//! genai speaks to many providers behind one API; the adapter is chosen
//! from the model name.

use std::collections::HashSet;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use genai::chat::{
    ChatMessage, ChatOptions, ChatRequest, ChatStreamEvent, ContentPart, MessageContent, Tool, ToolCall, ToolResponse,
};
use genai::resolver::{AuthData, AuthResolver};
use genai::{Client, WebConfig};
use tracing::{debug, error};

use super::logging::{log_interaction, LogEntry};
use super::{check_budget, CompletionClient, CompletionOutcome};
use crate::config::ProviderConfig;
use crate::conversation::{Message, Snapshot, ToolCallRequest};
use crate::error::CompletionError;
use crate::tools::ToolSchema;

/// Timeout for one completion request
const REQUEST_TIMEOUT: Duration = Duration::from_secs(300);

pub struct GenAiClient {
    client: Client,
    provider_type: String,
    model: String,
    max_tokens: u32,
    max_request_chars: usize,
}

impl GenAiClient {
    fn web_config() -> WebConfig {
        WebConfig::default()
            .with_timeout(REQUEST_TIMEOUT)
            .with_connect_timeout(Duration::from_secs(30))
    }

    /// Build a client from provider settings. Without an explicit key genai
    /// falls back to its own environment lookup.
    pub fn new(provider: &ProviderConfig) -> Self {
        let mut builder = Client::builder().with_web_config(Self::web_config());

        if let Some(api_key) = provider.get_api_key() {
            let auth_resolver = AuthResolver::from_resolver_fn(
                move |_model_iden| -> std::result::Result<Option<AuthData>, genai::resolver::Error> {
                    Ok(Some(AuthData::from_single(api_key.clone())))
                },
            );
            builder = builder.with_auth_resolver(auth_resolver);
        }

        Self {
            client: builder.build(),
            provider_type: provider.provider_type.clone(),
            model: provider.model.clone(),
            max_tokens: provider.max_tokens,
            max_request_chars: provider.max_request_chars,
        }
    }

    fn build_request(messages: &[Message], tools: &[ToolSchema]) -> ChatRequest {
        let mut chat_req = ChatRequest::default();

        for message in messages {
            chat_req = match message {
                Message::System { text } => chat_req.append_message(ChatMessage::system(text)),
                Message::User { text } => chat_req.append_message(ChatMessage::user(text)),
                Message::Assistant { text, tool_calls } if tool_calls.is_empty() => {
                    chat_req.append_message(ChatMessage::assistant(text.as_deref().unwrap_or("")))
                }
                // Text and tool calls must travel as a single assistant message
                Message::Assistant { text, tool_calls } => {
                    let mut parts: Vec<ContentPart> = Vec::with_capacity(tool_calls.len() + 1);
                    if let Some(text) = text.as_deref().filter(|t| !t.is_empty()) {
                        parts.push(ContentPart::Text(text.to_string()));
                    }
                    parts.extend(tool_calls.iter().map(|call| {
                        ContentPart::ToolCall(ToolCall {
                            call_id: call.id.clone(),
                            fn_name: call.tool_name.clone(),
                            fn_arguments: call.arguments.clone(),
                            thought_signatures: None,
                        })
                    }));
                    chat_req.append_message(ChatMessage::assistant(MessageContent::from_parts(parts)))
                }
                Message::ToolResult { tool_call_id, .. } => {
                    let content = message.payload_text().unwrap_or_default();
                    chat_req.append_message(ToolResponse::new(tool_call_id.clone(), content))
                }
            };
        }

        if !tools.is_empty() {
            let genai_tools: Vec<Tool> = tools
                .iter()
                .map(|t| {
                    Tool::new(&t.name)
                        .with_description(&t.description)
                        .with_schema(t.parameters.clone())
                })
                .collect();
            chat_req = chat_req.with_tools(genai_tools);
        }

        chat_req
    }

    async fn exchange(
        &self,
        messages: &[Message],
        tools: &[ToolSchema],
    ) -> Result<CompletionOutcome, CompletionError> {
        let chat_req = Self::build_request(messages, tools);
        let options = ChatOptions::default().with_max_tokens(self.max_tokens);

        let stream_response = self
            .client
            .exec_chat_stream(&self.model, chat_req, Some(&options))
            .await
            .map_err(|e| CompletionError::Unreachable(format!("{}", e)))?;

        let mut content = String::new();
        let mut tool_calls: Vec<ToolCall> = Vec::new();
        let mut stream = stream_response.stream;

        while let Some(event) = stream.next().await {
            match event {
                Ok(ChatStreamEvent::Chunk(chunk)) => content.push_str(&chunk.content),
                Ok(ChatStreamEvent::ToolCallChunk(chunk)) => tool_calls.push(chunk.tool_call),
                Ok(ChatStreamEvent::End(_)) => break,
                Ok(_) => {}
                Err(e) => return Err(CompletionError::Unreachable(format!("stream error: {}", e))),
            }
        }

        into_outcome(content, tool_calls)
    }
}

/// Map accumulated stream output onto an outcome
fn into_outcome(content: String, tool_calls: Vec<ToolCall>) -> Result<CompletionOutcome, CompletionError> {
    let text = Some(content).filter(|c| !c.trim().is_empty());

    if tool_calls.is_empty() {
        return text
            .map(|text| CompletionOutcome::Answer { text })
            .ok_or_else(|| CompletionError::Malformed("response had neither text nor tool calls".into()));
    }

    let mut seen: HashSet<String> = HashSet::new();
    let calls = tool_calls
        .into_iter()
        .map(|call| {
            if call.fn_name.is_empty() {
                return Err(CompletionError::Malformed("tool call without a function name".into()));
            }
            let id = if call.call_id.is_empty() || seen.contains(&call.call_id) {
                format!("call_{}", uuid::Uuid::new_v4().simple())
            } else {
                call.call_id
            };
            seen.insert(id.clone());
            Ok(ToolCallRequest::new(id, call.fn_name, call.fn_arguments))
        })
        .collect::<Result<Vec<_>, _>>()?;

    Ok(CompletionOutcome::ToolCallBatch { text, calls })
}

#[async_trait]
impl CompletionClient for GenAiClient {
    async fn request(
        &self,
        snapshot: &Snapshot,
        tools: &[ToolSchema],
    ) -> Result<CompletionOutcome, CompletionError> {
        check_budget(&snapshot.messages, tools, self.max_request_chars)?;

        debug!(
            model = %self.model,
            messages = snapshot.messages.len(),
            tools = tools.len(),
            "Requesting completion"
        );

        let result = self.exchange(&snapshot.messages, tools).await;

        let error_text = result.as_ref().err().map(|e| e.to_string());
        if let Some(e) = &error_text {
            error!(error = %e, model = %self.model, "Completion request failed");
        }
        log_interaction(LogEntry {
            model: &self.model,
            provider: Some(&self.provider_type),
            messages: &snapshot.messages,
            tools,
            outcome: result.as_ref().ok(),
            error: error_text.as_deref(),
        });

        result
    }

    fn model(&self) -> &str {
        &self.model
    }
}
