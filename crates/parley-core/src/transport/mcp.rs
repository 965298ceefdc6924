use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parley_mcp::{ClientInfo, McpClient, McpError, McpTool, StdioTransport, Transport};
use serde_json::Value;
use tracing::{debug, error, info};

use super::ToolTransport;
use crate::config::McpConfig;
use crate::error::{Error, Result, ToolError};
use crate::tools::ToolSchema;

/// Executes tools hosted by an MCP server
///
/// The schema list is whatever the server announced during discovery. The
/// server process is shut down by `shutdown()`, and killed if the transport
/// is dropped without it.
pub struct McpTransport {
    client: McpClient<Box<dyn Transport>>,
    server_name: String,
    schemas: Vec<ToolSchema>,
    call_timeout: Duration,
    closed: AtomicBool,
    /// Set once a call fails in a way that leaves the session unusable
    broken: AtomicBool,
}

impl McpTransport {
    /// Launch the configured server and connect to it
    pub async fn spawn(config: &McpConfig, call_timeout: Duration) -> Result<Self> {
        info!(command = %config.command, args = ?config.args, "Starting MCP server");
        let stdio = StdioTransport::spawn(&config.command, &config.args, &config.env).await?;
        Self::connect(Box::new(stdio), call_timeout).await
    }

    /// Handshake and discover tools over an already-open transport
    pub async fn connect(transport: Box<dyn Transport>, call_timeout: Duration) -> Result<Self> {
        let mut client = McpClient::new(transport).with_request_timeout(call_timeout);

        let discovered = match Self::handshake(&mut client).await {
            Ok(discovered) => discovered,
            Err(e) => {
                if let Err(close_err) = client.shutdown().await {
                    error!(error = %close_err, "Failed to stop MCP server after handshake error");
                }
                return Err(Error::Protocol(e.to_string()));
            }
        };

        let (server_name, tools) = discovered;
        let schemas: Vec<ToolSchema> = tools.into_iter().map(schema_from_mcp).collect();
        info!(
            server = %server_name,
            tools = ?schemas.iter().map(|s| s.name.as_str()).collect::<Vec<_>>(),
            "Connected to MCP server"
        );

        Ok(Self {
            client,
            server_name,
            schemas,
            call_timeout,
            closed: AtomicBool::new(false),
            broken: AtomicBool::new(false),
        })
    }

    async fn handshake(
        client: &mut McpClient<Box<dyn Transport>>,
    ) -> std::result::Result<(String, Vec<McpTool>), McpError> {
        let info = client
            .initialize(ClientInfo::new("parley", env!("CARGO_PKG_VERSION")))
            .await?;
        let tools = client.list_tools().await?;
        Ok((info.name, tools))
    }

    pub fn server_name(&self) -> &str {
        &self.server_name
    }
}

fn schema_from_mcp(tool: McpTool) -> ToolSchema {
    ToolSchema {
        name: tool.name,
        description: tool.description,
        parameters: tool.input_schema,
    }
}

fn map_call_error(error: McpError) -> ToolError {
    match error {
        McpError::Timeout { timeout, .. } => ToolError::Timeout(timeout.as_secs()),
        McpError::Server { code: -32602, message } => ToolError::InvalidParams(message),
        McpError::Server { code, message } => {
            ToolError::ExecutionFailed(format!("Server error ({}): {}", code, message))
        }
        McpError::Transport(message) | McpError::Protocol(message) => ToolError::Protocol(message),
    }
}

#[async_trait]
impl ToolTransport for McpTransport {
    fn list_schemas(&self) -> Vec<ToolSchema> {
        self.schemas.clone()
    }

    async fn invoke(&self, name: &str, arguments: Value) -> std::result::Result<Value, ToolError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(ToolError::Protocol("MCP session is closed".to_string()));
        }
        if self.broken.load(Ordering::SeqCst) {
            return Err(ToolError::Protocol("MCP session failed earlier".to_string()));
        }
        if !self.schemas.iter().any(|s| s.name == name) {
            return Err(ToolError::NotFound(name.to_string()));
        }

        info!(tool = name, server = %self.server_name, "Executing tool over MCP");
        let result = self.client.call_tool(name, arguments).await.map_err(|e| {
            error!(tool = name, error = %e, "MCP tool call failed");
            let mapped = map_call_error(e);
            if mapped.is_session_fatal() {
                self.broken.store(true, Ordering::SeqCst);
            }
            mapped
        })?;

        if result.is_error {
            return Err(ToolError::ExecutionFailed(result.text()));
        }
        Ok(Value::String(result.text()))
    }

    async fn shutdown(&self) -> std::result::Result<(), ToolError> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        debug!(server = %self.server_name, "Shutting down MCP server");
        self.client
            .shutdown()
            .await
            .map_err(|e| ToolError::Protocol(e.to_string()))
    }
}

impl std::fmt::Debug for McpTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("McpTransport")
            .field("server_name", &self.server_name)
            .field("tools", &self.schemas.len())
            .field("call_timeout", &self.call_timeout)
            .field("broken", &self.broken.load(Ordering::SeqCst))
            .finish()
    }
}
