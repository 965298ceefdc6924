use std::collections::{HashMap, HashSet};
use std::fmt::Write;

use tracing::{debug, warn};

use super::message::{Message, ToolCallRequest};
use crate::error::ToolError;

/// Characters of a tool payload shown in the summary view
const SUMMARY_PAYLOAD_CHARS: usize = 50;

/// Messages selected for one completion request
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Snapshot {
    pub messages: Vec<Message>,
    /// Ids of issued calls whose assistant message was left out for lack of a result
    pub missing_call_ids: Vec<String>,
}

/// Ordered, append-only log of a conversation
///
/// Appends are never validated. Structural integrity is enforced when a
/// request is built: only assistant messages whose every tool call has a
/// later result are sent upstream.
#[derive(Debug, Clone, Default)]
pub struct ConversationHistory {
    messages: Vec<Message>,
}

impl ConversationHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&mut self, message: Message) {
        self.messages.push(message);
    }

    pub fn clear(&mut self) {
        self.messages.clear();
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn last(&self) -> Option<&Message> {
        self.messages.last()
    }

    /// Build the structurally valid subsequence sent to the completion service.
    ///
    /// User and system messages pass through. An assistant message is kept
    /// only if every call it issued is answered by a later result; otherwise
    /// it is dropped together with the results that did answer it. Results
    /// for ids that were never issued earlier are dropped as well.
    pub fn snapshot_for_request(&self) -> Snapshot {
        let (issuers, answers) = self.index_calls();

        let mut messages = Vec::with_capacity(self.messages.len());
        let mut missing_call_ids = Vec::new();
        let mut closed: HashSet<usize> = HashSet::new();

        for (idx, message) in self.messages.iter().enumerate() {
            match message {
                Message::Assistant { tool_calls, .. } => {
                    // A batch reusing one id can never be matched result for result
                    let mut seen: HashSet<&str> = HashSet::new();
                    let unanswered: Vec<&str> = tool_calls
                        .iter()
                        .filter(|call| {
                            !seen.insert(call.id.as_str())
                                || issuers.get(call.id.as_str()) != Some(&idx)
                                || !answers.contains_key(call.id.as_str())
                        })
                        .map(|call| call.id.as_str())
                        .collect();

                    if unanswered.is_empty() {
                        closed.insert(idx);
                        messages.push(message.clone());
                    } else {
                        missing_call_ids.extend(unanswered.into_iter().map(String::from));
                    }
                }
                Message::ToolResult { tool_call_id, .. } => {
                    let id = tool_call_id.as_str();
                    let issuer_closed = issuers.get(id).is_some_and(|issuer| closed.contains(issuer));
                    if answers.get(id) == Some(&idx) && issuer_closed {
                        messages.push(message.clone());
                    } else {
                        debug!(tool_call_id = id, "Excluding tool result with no open call");
                    }
                }
                Message::User { .. } | Message::System { .. } => messages.push(message.clone()),
            }
        }

        if !missing_call_ids.is_empty() {
            warn!(
                missing_call_ids = ?missing_call_ids,
                "Missing tool responses, dropping their assistant messages from the request"
            );
        }

        Snapshot {
            messages,
            missing_call_ids,
        }
    }

    /// Calls that have been issued but not yet answered, in issue order
    pub fn unanswered_calls(&self) -> Vec<ToolCallRequest> {
        let (issuers, answers) = self.index_calls();
        let mut listed: HashSet<&str> = HashSet::new();

        self.messages
            .iter()
            .enumerate()
            .flat_map(|(idx, message)| message.tool_calls().iter().map(move |call| (idx, call)))
            .filter(|(idx, call)| {
                let id = call.id.as_str();
                issuers.get(id) == Some(idx) && !answers.contains_key(id) && listed.insert(id)
            })
            .map(|(_, call)| call.clone())
            .collect()
    }

    /// Whether any assistant message has issued a call with this id
    pub fn contains_call_id(&self, id: &str) -> bool {
        self.messages
            .iter()
            .any(|message| message.tool_calls().iter().any(|call| call.id == id))
    }

    /// Answer every unanswered call with an error result for `error`.
    ///
    /// Returns how many results were appended.
    pub fn close_unanswered(&mut self, error: &ToolError) -> usize {
        let pending = self.unanswered_calls();
        for call in &pending {
            self.messages.push(Message::tool_result(call, Err(error.clone())));
        }
        pending.len()
    }

    /// Human-readable listing of the history
    pub fn render_summary(&self) -> String {
        let mut out = String::new();

        for (i, message) in self.messages.iter().enumerate() {
            match message {
                Message::User { text } => {
                    let _ = writeln!(out, "[User {}]: {}", i, text);
                }
                Message::System { text } => {
                    let _ = writeln!(out, "[System {}]: {}", i, text);
                }
                Message::Assistant { text, tool_calls } => {
                    let _ = writeln!(out, "[Assistant {}]: {}", i, text.as_deref().unwrap_or(""));
                    if !tool_calls.is_empty() {
                        let _ = writeln!(out, "  [Tool Calls]: {} calls", tool_calls.len());
                        for call in tool_calls {
                            let _ = writeln!(out, "    - {} (ID: {})", call.tool_name, call.id);
                        }
                    }
                }
                Message::ToolResult { tool_name, .. } => {
                    let payload = message.payload_text().unwrap_or_default();
                    let shown: String = payload.chars().take(SUMMARY_PAYLOAD_CHARS).collect();
                    let ellipsis = if payload.chars().count() > SUMMARY_PAYLOAD_CHARS { "..." } else { "" };
                    let _ = writeln!(out, "[Tool {}]: {} -> {}{}", i, tool_name, shown, ellipsis);
                }
            }
        }

        out
    }

    /// Raw message structure as pretty-printed JSON
    pub fn to_debug_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(&self.messages)
    }

    /// Map each call id to the index of the message that first issued it,
    /// and each answered id to the index of its first valid result.
    fn index_calls(&self) -> (HashMap<&str, usize>, HashMap<&str, usize>) {
        let mut issuers: HashMap<&str, usize> = HashMap::new();
        let mut answers: HashMap<&str, usize> = HashMap::new();

        for (idx, message) in self.messages.iter().enumerate() {
            match message {
                Message::Assistant { tool_calls, .. } => {
                    for call in tool_calls {
                        issuers.entry(call.id.as_str()).or_insert(idx);
                    }
                }
                Message::ToolResult { tool_call_id, .. } => {
                    if issuers.contains_key(tool_call_id.as_str()) {
                        answers.entry(tool_call_id.as_str()).or_insert(idx);
                    }
                }
                _ => {}
            }
        }

        (issuers, answers)
    }
}

impl From<Vec<Message>> for ConversationHistory {
    fn from(messages: Vec<Message>) -> Self {
        Self { messages }
    }
}
