//! Completion client that replays prepared outcomes
//!
//! Used by tests and by the CLI's offline mode. Every request is recorded so
//! callers can inspect exactly what would have been sent upstream.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;

use super::{CompletionClient, CompletionOutcome};
use crate::conversation::{Message, Snapshot};
use crate::error::CompletionError;
use crate::tools::ToolSchema;

/// One request as the client received it
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedRequest {
    pub messages: Vec<Message>,
    /// Names of the offered tools
    pub tools: Vec<String>,
}

/// Behaviour once the script runs out
#[derive(Debug, Clone, Copy)]
enum WhenExhausted {
    Fail,
    Echo,
}

pub struct ScriptedClient {
    script: Mutex<VecDeque<Result<CompletionOutcome, CompletionError>>>,
    requests: Mutex<Vec<RecordedRequest>>,
    when_exhausted: WhenExhausted,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl ScriptedClient {
    /// Replay `outcomes` in order; further requests fail as malformed
    pub fn new(outcomes: impl IntoIterator<Item = Result<CompletionOutcome, CompletionError>>) -> Self {
        Self {
            script: Mutex::new(outcomes.into_iter().collect()),
            requests: Mutex::new(Vec::new()),
            when_exhausted: WhenExhausted::Fail,
        }
    }

    /// Client that answers every request by echoing the conversation
    pub fn echo() -> Self {
        Self {
            when_exhausted: WhenExhausted::Echo,
            ..Self::new(Vec::new())
        }
    }

    /// Queue another outcome
    pub fn push(&self, outcome: Result<CompletionOutcome, CompletionError>) {
        lock(&self.script).push_back(outcome);
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        lock(&self.requests).clone()
    }

    pub fn remaining(&self) -> usize {
        lock(&self.script).len()
    }
}

/// Echo the latest user text, or the tool payloads that answered it
fn echo(messages: &[Message]) -> CompletionOutcome {
    let mut payloads = Vec::new();
    for message in messages.iter().rev() {
        match message {
            Message::ToolResult { tool_name, .. } => {
                payloads.push(format!("{}: {}", tool_name, message.payload_text().unwrap_or_default()));
            }
            Message::User { text } if payloads.is_empty() => {
                return CompletionOutcome::answer(format!("You said: {}", text));
            }
            Message::User { .. } => break,
            _ => {}
        }
    }

    if payloads.is_empty() {
        return CompletionOutcome::answer("Nothing to echo yet.");
    }
    payloads.reverse();
    CompletionOutcome::answer(payloads.join("\n"))
}

#[async_trait]
impl CompletionClient for ScriptedClient {
    async fn request(
        &self,
        snapshot: &Snapshot,
        tools: &[ToolSchema],
    ) -> Result<CompletionOutcome, CompletionError> {
        lock(&self.requests).push(RecordedRequest {
            messages: snapshot.messages.clone(),
            tools: tools.iter().map(|t| t.name.clone()).collect(),
        });

        let next = lock(&self.script).pop_front();
        match (next, self.when_exhausted) {
            (Some(outcome), _) => outcome,
            (None, WhenExhausted::Echo) => Ok(echo(&snapshot.messages)),
            (None, WhenExhausted::Fail) => {
                Err(CompletionError::Malformed("scripted client has no more outcomes".into()))
            }
        }
    }

    fn model(&self) -> &str {
        "scripted"
    }
}
