//! Tool transports
//!
//! A transport resolves a named tool call to a payload. The orchestration
//! loop only sees this trait, so in-process tools and tools served by a
//! subprocess are interchangeable.

mod in_process;
#[cfg(feature = "mcp")]
mod mcp;

pub use in_process::InProcessTransport;
#[cfg(feature = "mcp")]
pub use mcp::McpTransport;

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::ToolError;
use crate::tools::ToolSchema;

/// Default bound on a single tool invocation
pub const DEFAULT_TOOL_TIMEOUT: Duration = Duration::from_secs(30);

#[async_trait]
pub trait ToolTransport: Send + Sync {
    /// Schemas of every tool reachable through this transport
    fn list_schemas(&self) -> Vec<ToolSchema>;

    /// Execute one tool call
    async fn invoke(&self, name: &str, arguments: Value) -> Result<Value, ToolError>;

    /// Release any resources held by the transport. Safe to call twice.
    async fn shutdown(&self) -> Result<(), ToolError>;
}
