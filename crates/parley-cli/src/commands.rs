//! REPL input classification

/// What a line typed at the prompt asks for
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplCommand {
    Quit,
    /// Reset the conversation
    Clear,
    /// Print the summary view of the history
    History,
    /// Print the raw message structure
    Debug,
    /// List the tools offered to the model
    Tools,
    Empty,
    /// Anything else is a user turn
    Prompt(String),
}

impl ReplCommand {
    pub fn parse(line: &str) -> Self {
        let trimmed = line.trim();
        match trimmed.to_lowercase().as_str() {
            "" => Self::Empty,
            "quit" | "exit" | "bye" => Self::Quit,
            "clear" => Self::Clear,
            "history" => Self::History,
            "debug" => Self::Debug,
            "tools" => Self::Tools,
            _ => Self::Prompt(trimmed.to_string()),
        }
    }
}
