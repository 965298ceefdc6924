//! Parley Core Library
//!
//! Tool-augmented chat orchestration: a conversation with a completion
//! service that may call tools, either in-process or hosted by an MCP
//! server, until it produces a plain answer.

pub mod completion;
pub mod config;
pub mod conversation;
pub mod error;
pub mod orchestration;
pub mod tools;
pub mod transport;

pub use completion::{CompletionClient, CompletionOutcome, GenAiClient, ScriptedClient};
pub use config::{Config, ConfigManager, McpConfig, OrchestrationConfig, ProviderConfig, RoundLimitPolicy};
pub use conversation::{ConversationHistory, Message, Snapshot, ToolCallRequest};
pub use error::{CompletionError, Error, Result, ToolError};
pub use orchestration::{LoopState, OrchestrationLoop};
pub use tools::{Tool, ToolRegistry, ToolSchema};
pub use transport::{InProcessTransport, ToolTransport};
#[cfg(feature = "mcp")]
pub use transport::McpTransport;
