//! MCP Client implementation

use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::protocol::{
    methods, IncomingMessage, JsonRpcError, JsonRpcNotification, JsonRpcRequest, JsonRpcResponse,
    RequestId,
};
use crate::transport::Transport;
use crate::{McpTool, ServerCapabilities, PROTOCOL_VERSION};

/// Default time a single request may wait for its response
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// MCP Client for connecting to MCP servers
///
/// Requests are strictly one at a time: the transport lock is held from the
/// moment a request is written until its response has been read. A write
/// abandoned part way (timeout or a dropped future) leaves the stream
/// unusable, and every later request fails with `McpError::Transport`.
pub struct McpClient<T: Transport> {
    transport: Mutex<T>,
    /// Set while a frame is being written, and left set if the write never finished
    write_in_progress: AtomicBool,
    request_id: AtomicI64,
    request_timeout: Duration,
    server_capabilities: Option<ServerCapabilities>,
}

impl<T: Transport> McpClient<T> {
    pub fn new(transport: T) -> Self {
        Self {
            transport: Mutex::new(transport),
            write_in_progress: AtomicBool::new(false),
            request_id: AtomicI64::new(1),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            server_capabilities: None,
        }
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    fn next_id(&self) -> RequestId {
        RequestId::Number(self.request_id.fetch_add(1, Ordering::SeqCst))
    }

    /// Capabilities announced by the server during `initialize`
    pub fn server_capabilities(&self) -> Option<&ServerCapabilities> {
        self.server_capabilities.as_ref()
    }

    /// Initialize the connection
    pub async fn initialize(&mut self, client_info: ClientInfo) -> Result<ServerInfo, McpError> {
        let params = serde_json::json!({
            "protocolVersion": PROTOCOL_VERSION,
            "capabilities": {},
            "clientInfo": {
                "name": client_info.name,
                "version": client_info.version
            }
        });

        let request = JsonRpcRequest::new(self.next_id(), methods::INITIALIZE).with_params(params);
        let result = self.send_request(request).await?;

        let init: InitializeResult =
            serde_json::from_value(result).map_err(|e| McpError::Protocol(e.to_string()))?;

        if init.protocol_version != PROTOCOL_VERSION {
            warn!(
                server_version = %init.protocol_version,
                client_version = PROTOCOL_VERSION,
                "MCP protocol version mismatch, continuing"
            );
        }

        self.server_capabilities = Some(init.capabilities.clone());

        self.send_notification(JsonRpcNotification::new(methods::INITIALIZED))
            .await?;

        Ok(ServerInfo {
            name: init.server_info.name,
            version: init.server_info.version,
        })
    }

    /// List available tools, following pagination cursors
    pub async fn list_tools(&self) -> Result<Vec<McpTool>, McpError> {
        let mut tools = Vec::new();
        let mut cursor: Option<String> = None;

        loop {
            let mut request = JsonRpcRequest::new(self.next_id(), methods::TOOLS_LIST);
            if let Some(c) = cursor.take() {
                request = request.with_params(serde_json::json!({ "cursor": c }));
            }

            let result = self.send_request(request).await?;
            let page: ToolsListResult =
                serde_json::from_value(result).map_err(|e| McpError::Protocol(e.to_string()))?;

            tools.extend(page.tools);

            match page.next_cursor {
                Some(next) if !next.is_empty() => cursor = Some(next),
                _ => break,
            }
        }

        Ok(tools)
    }

    /// Call a tool
    pub async fn call_tool(
        &self,
        name: &str,
        arguments: serde_json::Value,
    ) -> Result<ToolCallResult, McpError> {
        let params = serde_json::json!({
            "name": name,
            "arguments": arguments
        });

        let request = JsonRpcRequest::new(self.next_id(), methods::TOOLS_CALL).with_params(params);
        let result = self.send_request(request).await?;

        serde_json::from_value(result).map_err(|e| McpError::Protocol(e.to_string()))
    }

    /// Liveness check
    pub async fn ping(&self) -> Result<(), McpError> {
        let request = JsonRpcRequest::new(self.next_id(), methods::PING);
        self.send_request(request).await.map(|_| ())
    }

    /// Close the transport, releasing the server process
    pub async fn shutdown(&self) -> Result<(), McpError> {
        let mut transport = self.transport.lock().await;
        transport
            .close()
            .await
            .map_err(|e| McpError::Transport(e.to_string()))
    }

    async fn send_notification(&self, notification: JsonRpcNotification) -> Result<(), McpError> {
        let value =
            serde_json::to_value(&notification).map_err(|e| McpError::Protocol(e.to_string()))?;

        let mut transport = self.transport.lock().await;
        self.write_frame(&mut transport, value).await
    }

    /// Write one whole frame, refusing to write after an interrupted one
    async fn write_frame(&self, transport: &mut T, frame: serde_json::Value) -> Result<(), McpError> {
        if self.write_in_progress.swap(true, Ordering::SeqCst) {
            return Err(McpError::Transport(
                "Stream left mid-frame by an interrupted request".to_string(),
            ));
        }
        transport
            .send(frame)
            .await
            .map_err(|e| McpError::Transport(e.to_string()))?;
        self.write_in_progress.store(false, Ordering::SeqCst);
        Ok(())
    }

    /// Send a request and wait for the response carrying the same id
    async fn send_request(&self, request: JsonRpcRequest) -> Result<serde_json::Value, McpError> {
        let method = request.method.clone();
        let timeout = self.request_timeout;

        let response = tokio::time::timeout(timeout, self.exchange(request))
            .await
            .map_err(|_| McpError::Timeout { method, timeout })??;

        match (response.result, response.error) {
            (_, Some(error)) => Err(McpError::Server {
                code: error.code,
                message: error.message,
            }),
            (Some(result), None) => Ok(result),
            (None, None) => Err(McpError::Protocol("Empty response".to_string())),
        }
    }

    async fn exchange(&self, request: JsonRpcRequest) -> Result<JsonRpcResponse, McpError> {
        let mut transport = self.transport.lock().await;

        let expected = request.id.clone();
        let request_value =
            serde_json::to_value(&request).map_err(|e| McpError::Protocol(e.to_string()))?;

        self.write_frame(&mut transport, request_value).await?;

        loop {
            let frame = transport
                .receive()
                .await
                .map_err(|e| McpError::Transport(e.to_string()))?
                .ok_or_else(|| McpError::Transport("Connection closed".to_string()))?;

            match IncomingMessage::classify(frame).map_err(|e| McpError::Protocol(e.to_string()))? {
                IncomingMessage::Response(response) if response.id.as_ref() == Some(&expected) => {
                    return Ok(response);
                }
                IncomingMessage::Response(response) => {
                    // Late answer to a request that already timed out
                    warn!(id = ?response.id, expected = %expected, "Discarding unmatched MCP response");
                }
                IncomingMessage::Notification(notification) => {
                    debug!(method = %notification.method, "Ignoring MCP server notification");
                }
                IncomingMessage::Request(server_request) => {
                    debug!(method = %server_request.method, "Rejecting server-initiated request");
                    let reply = JsonRpcResponse::error(server_request.id, JsonRpcError::method_not_found());
                    let reply =
                        serde_json::to_value(&reply).map_err(|e| McpError::Protocol(e.to_string()))?;
                    self.write_frame(&mut transport, reply).await?;
                }
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct ClientInfo {
    pub name: String,
    pub version: String,
}

impl ClientInfo {
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ServerInfo {
    pub name: String,
    pub version: String,
}

#[derive(Debug, Deserialize)]
struct InitializeResult {
    #[serde(rename = "protocolVersion")]
    protocol_version: String,
    #[serde(default)]
    capabilities: ServerCapabilities,
    #[serde(rename = "serverInfo")]
    server_info: ServerInfoInner,
}

#[derive(Debug, Deserialize)]
struct ServerInfoInner {
    name: String,
    #[serde(default)]
    version: String,
}

#[derive(Debug, Deserialize)]
struct ToolsListResult {
    tools: Vec<McpTool>,
    #[serde(rename = "nextCursor", default)]
    next_cursor: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCallResult {
    #[serde(default)]
    pub content: Vec<ContentItem>,
    #[serde(rename = "isError", default)]
    pub is_error: bool,
}

impl ToolCallResult {
    /// All text content items joined by newlines
    pub fn text(&self) -> String {
        self.content
            .iter()
            .filter(|item| item.content_type == "text")
            .filter_map(|item| item.text.as_deref())
            .collect::<Vec<_>>()
            .join("\n")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContentItem {
    #[serde(rename = "type")]
    pub content_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
}

impl ContentItem {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            content_type: "text".to_string(),
            text: Some(text.into()),
        }
    }
}

/// MCP errors
#[derive(Debug, thiserror::Error)]
pub enum McpError {
    #[error("Transport error: {0}")]
    Transport(String),
    #[error("Protocol error: {0}")]
    Protocol(String),
    #[error("Server error ({code}): {message}")]
    Server { code: i32, message: String },
    #[error("Request '{method}' timed out after {timeout:?}")]
    Timeout { method: String, timeout: Duration },
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_tool_call_result_text_joins_text_items() {
        let result: ToolCallResult = serde_json::from_value(json!({
            "content": [
                { "type": "text", "text": "line one" },
                { "type": "image", "data": "..." },
                { "type": "text", "text": "line two" }
            ]
        }))
        .unwrap();

        assert!(!result.is_error);
        assert_eq!(result.text(), "line one\nline two");
    }

    #[test]
    fn test_tools_list_without_cursor() {
        let page: ToolsListResult = serde_json::from_value(json!({
            "tools": [{ "name": "get_forecast", "description": "Forecast", "inputSchema": {} }]
        }))
        .unwrap();
        assert_eq!(page.tools.len(), 1);
        assert!(page.next_cursor.is_none());
    }
}
