use std::fmt;

/// Where the loop is within a turn
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    AwaitingInput,
    RequestingCompletion { round: usize },
    ExecutingTools { round: usize, calls: usize },
    Answered,
}

impl fmt::Display for LoopState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LoopState::AwaitingInput => f.write_str("awaiting input"),
            LoopState::RequestingCompletion { round } => write!(f, "requesting completion (round {})", round),
            LoopState::ExecutingTools { round, calls } => {
                write!(f, "executing {} tool call(s) (round {})", calls, round)
            }
            LoopState::Answered => f.write_str("answered"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        assert_eq!(LoopState::RequestingCompletion { round: 2 }.to_string(), "requesting completion (round 2)");
        assert_eq!(
            LoopState::ExecutingTools { round: 1, calls: 2 }.to_string(),
            "executing 2 tool call(s) (round 1)"
        );
    }
}
