//! MCP Server implementation

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tracing::{debug, warn};

use crate::client::ContentItem;
use crate::protocol::{methods, IncomingMessage, JsonRpcError, JsonRpcRequest, JsonRpcResponse, RequestId};
use crate::{McpTool, ServerCapabilities, ToolsCapability, PROTOCOL_VERSION};

/// Handler for MCP requests
#[async_trait]
pub trait McpHandler: Send + Sync {
    /// List available tools
    async fn list_tools(&self) -> Vec<McpTool>;

    /// Call a tool; `Err` becomes an `isError` result, not a JSON-RPC error
    async fn call_tool(&self, name: &str, arguments: Value) -> Result<Value, String>;
}

/// MCP Server
pub struct McpServer<H: McpHandler> {
    handler: Arc<H>,
    capabilities: ServerCapabilities,
    server_name: String,
    server_version: String,
}

impl<H: McpHandler> McpServer<H> {
    pub fn new(handler: Arc<H>) -> Self {
        Self {
            handler,
            capabilities: ServerCapabilities {
                tools: Some(ToolsCapability { list_changed: false }),
            },
            server_name: "parley-mcp".to_string(),
            server_version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.server_name = name.into();
        self
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.server_version = version.into();
        self
    }

    /// Handle one raw frame; notifications produce no response
    pub async fn handle_frame(&self, frame: Value) -> Option<JsonRpcResponse> {
        match IncomingMessage::classify(frame) {
            Ok(IncomingMessage::Request(request)) => Some(self.handle_request(request).await),
            Ok(IncomingMessage::Notification(notification)) => {
                debug!(method = %notification.method, "Received notification");
                None
            }
            Ok(IncomingMessage::Response(_)) => {
                debug!("Ignoring response frame sent to server");
                None
            }
            Err(_) => Some(JsonRpcResponse::error(None, JsonRpcError::invalid_request())),
        }
    }

    /// Handle a JSON-RPC request
    pub async fn handle_request(&self, request: JsonRpcRequest) -> JsonRpcResponse {
        match request.method.as_str() {
            methods::INITIALIZE => self.handle_initialize(request.id),
            methods::PING => JsonRpcResponse::success(request.id, serde_json::json!({})),
            methods::TOOLS_LIST => self.handle_tools_list(request.id).await,
            methods::TOOLS_CALL => self.handle_tools_call(request.id, request.params).await,
            _ => JsonRpcResponse::error(request.id, JsonRpcError::method_not_found()),
        }
    }

    /// Serve newline-delimited frames until the reader reaches end of input
    pub async fn serve<R, W>(&self, reader: R, mut writer: W) -> std::io::Result<()>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let mut lines = BufReader::new(reader).lines();

        while let Some(line) = lines.next_line().await? {
            if line.trim().is_empty() {
                continue;
            }

            let response = match serde_json::from_str::<Value>(&line) {
                Ok(frame) => self.handle_frame(frame).await,
                Err(e) => {
                    warn!(error = %e, "Unparseable frame");
                    Some(JsonRpcResponse::error(None, JsonRpcError::parse_error()))
                }
            };

            if let Some(response) = response {
                let json = serde_json::to_string(&response)?;
                writer.write_all(json.as_bytes()).await?;
                writer.write_all(b"\n").await?;
                writer.flush().await?;
            }
        }

        debug!("Client closed the connection");
        Ok(())
    }

    fn handle_initialize(&self, id: RequestId) -> JsonRpcResponse {
        let result = serde_json::json!({
            "protocolVersion": PROTOCOL_VERSION,
            "capabilities": self.capabilities,
            "serverInfo": {
                "name": self.server_name,
                "version": self.server_version
            }
        });

        JsonRpcResponse::success(id, result)
    }

    async fn handle_tools_list(&self, id: RequestId) -> JsonRpcResponse {
        let tools = self.handler.list_tools().await;
        JsonRpcResponse::success(id, serde_json::json!({ "tools": tools }))
    }

    async fn handle_tools_call(&self, id: RequestId, params: Option<Value>) -> JsonRpcResponse {
        let params = match params {
            Some(p) => p,
            None => return JsonRpcResponse::error(id, JsonRpcError::invalid_params()),
        };

        let name = match params.get("name").and_then(|v| v.as_str()) {
            Some(n) => n,
            None => return JsonRpcResponse::error(id, JsonRpcError::invalid_params()),
        };

        let arguments = params
            .get("arguments")
            .cloned()
            .unwrap_or(Value::Object(Default::default()));

        let (text, is_error) = match self.handler.call_tool(name, arguments).await {
            Ok(Value::String(s)) => (s, false),
            Ok(other) => (other.to_string(), false),
            Err(e) => (e, true),
        };

        JsonRpcResponse::success(
            id,
            serde_json::json!({
                "content": [ContentItem::text(text)],
                "isError": is_error
            }),
        )
    }
}
