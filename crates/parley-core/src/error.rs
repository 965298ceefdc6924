//! Error types for Parley Core

use thiserror::Error;

/// Result type alias using Parley Error
pub type Result<T> = std::result::Result<T, Error>;

/// Turn-level errors. Any of these ends the current user turn.
#[derive(Error, Debug)]
pub enum Error {
    #[error("Completion error: {0}")]
    Completion(#[from] CompletionError),

    #[error("Tool protocol error: {0}")]
    Protocol(String),

    #[error("Round limit exceeded: tools still requested after {rounds} completion rounds")]
    RoundLimitExceeded { rounds: usize },

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Tool-specific errors
///
/// Apart from `Protocol`, these never end a turn: the orchestrator turns them
/// into tool result messages.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ToolError {
    #[error("Tool not found: {0}")]
    NotFound(String),

    #[error("Invalid parameters: {0}")]
    InvalidParams(String),

    #[error("Execution failed: {0}")]
    ExecutionFailed(String),

    #[error("Tool timed out after {0} seconds")]
    Timeout(u64),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Cancelled by user")]
    Cancelled,
}

impl ToolError {
    /// Whether this failure means the tool session itself is unusable
    pub fn is_session_fatal(&self) -> bool {
        matches!(self, ToolError::Protocol(_))
    }
}

/// Completion service errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CompletionError {
    #[error("Completion service unreachable: {0}")]
    Unreachable(String),

    #[error("Malformed completion response: {0}")]
    Malformed(String),

    #[error("Request exceeds budget: {size} chars (limit {limit})")]
    BudgetExceeded { size: usize, limit: usize },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_completion_error_converts_into_turn_error() {
        let err: Error = CompletionError::Unreachable("connection refused".to_string()).into();
        assert!(matches!(err, Error::Completion(CompletionError::Unreachable(_))));
        assert_eq!(
            err.to_string(),
            "Completion error: Completion service unreachable: connection refused"
        );
    }

    #[test]
    fn test_only_protocol_errors_are_session_fatal() {
        assert!(ToolError::Protocol("desync".to_string()).is_session_fatal());
        assert!(!ToolError::NotFound("x".to_string()).is_session_fatal());
        assert!(!ToolError::Timeout(30).is_session_fatal());
    }
}
