//! Completion request/response logging
//!
//! Set the `LLM_LOG_FILE` environment variable to append one JSON line per
//! completion round: the messages sent, the tools offered and the parsed
//! outcome or error.
//!
//! Example: `LLM_LOG_FILE=/tmp/llm.log parley`

use std::io::Write;
use std::path::Path;

use serde_json::{json, Value};
use tracing::{debug, warn};

use super::CompletionOutcome;
use crate::conversation::Message;
use crate::tools::ToolSchema;

pub const LOG_FILE_ENV: &str = "LLM_LOG_FILE";

/// What to include in one log entry
#[derive(Default)]
pub struct LogEntry<'a> {
    pub model: &'a str,
    pub provider: Option<&'a str>,
    pub messages: &'a [Message],
    pub tools: &'a [ToolSchema],
    pub outcome: Option<&'a CompletionOutcome>,
    pub error: Option<&'a str>,
}

impl LogEntry<'_> {
    pub fn to_json(&self) -> Value {
        json!({
            "timestamp": chrono::Utc::now().to_rfc3339(),
            "model": self.model,
            "provider": self.provider,
            "request": {
                "messages": self.messages,
                "message_count": self.messages.len(),
                "tools": self.tools.iter().map(|t| &t.name).collect::<Vec<_>>(),
                "tool_count": self.tools.len(),
            },
            "response": self.outcome.map(outcome_to_json),
            "error": self.error,
        })
    }
}

fn outcome_to_json(outcome: &CompletionOutcome) -> Value {
    match outcome {
        CompletionOutcome::Answer { text } => json!({ "type": "message", "content": text }),
        CompletionOutcome::ToolCallBatch { text, calls } => json!({
            "type": "tool_calls",
            "content": text,
            "tool_calls": calls,
        }),
    }
}

/// Log an interaction if `LLM_LOG_FILE` is set
pub fn log_interaction(entry: LogEntry<'_>) {
    let Ok(log_file) = std::env::var(LOG_FILE_ENV) else {
        return;
    };
    append_entry(Path::new(&log_file), &entry);
}

/// Append one entry as a single JSON line; failures are only warned about
pub fn append_entry(path: &Path, entry: &LogEntry<'_>) {
    let line = match serde_json::to_string(&entry.to_json()) {
        Ok(line) => line,
        Err(e) => {
            warn!("Failed to serialize LLM log entry: {}", e);
            return;
        }
    };

    match std::fs::OpenOptions::new().create(true).append(true).open(path) {
        Ok(mut file) => {
            if let Err(e) = writeln!(file, "{}", line) {
                warn!("Failed to write to LLM log file: {}", e);
            }
        }
        Err(e) => {
            warn!("Failed to open LLM log file {}: {}", path.display(), e);
        }
    }

    debug!("Logged LLM interaction to {}", path.display());
}
