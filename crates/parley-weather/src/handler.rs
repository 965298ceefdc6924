//! Exposes a tool transport to MCP clients

use async_trait::async_trait;
use parley_core::error::ToolError;
use parley_core::transport::{InProcessTransport, ToolTransport};
use parley_mcp::{McpHandler, McpTool};
use serde_json::Value;
use tracing::{info, warn};

pub struct RegistryHandler {
    tools: InProcessTransport,
}

impl RegistryHandler {
    pub fn new(tools: InProcessTransport) -> Self {
        Self { tools }
    }
}

#[async_trait]
impl McpHandler for RegistryHandler {
    async fn list_tools(&self) -> Vec<McpTool> {
        self.tools
            .list_schemas()
            .into_iter()
            .map(|schema| McpTool {
                name: schema.name,
                description: schema.description,
                input_schema: schema.parameters,
            })
            .collect()
    }

    async fn call_tool(&self, name: &str, arguments: Value) -> Result<Value, String> {
        info!(tool = name, "Tool call");
        self.tools.invoke(name, arguments).await.map_err(|e| {
            warn!(tool = name, error = %e, "Tool call failed");
            match e {
                // The tool's own message is what the model should see
                ToolError::ExecutionFailed(message) => message,
                other => other.to_string(),
            }
        })
    }
}
