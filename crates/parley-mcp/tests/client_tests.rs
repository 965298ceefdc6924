//! MCP client integration tests
//!
//! Drives a real `McpServer` through an in-memory transport so the full
//! request/response path is exercised without spawning a process.

use std::collections::VecDeque;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parley_mcp::protocol::{JsonRpcError, JsonRpcResponse, RequestId};
use parley_mcp::{ClientInfo, McpClient, McpError, McpHandler, McpServer, McpTool, Transport};
use serde_json::{json, Value};

struct WeatherStub;

#[async_trait]
impl McpHandler for WeatherStub {
    async fn list_tools(&self) -> Vec<McpTool> {
        vec![
            McpTool {
                name: "get_forecast".to_string(),
                description: "Get weather forecast for a location".to_string(),
                input_schema: json!({
                    "type": "object",
                    "properties": {
                        "latitude": { "type": "number" },
                        "longitude": { "type": "number" }
                    },
                    "required": ["latitude", "longitude"]
                }),
            },
            McpTool {
                name: "get_alerts".to_string(),
                description: "Get weather alerts for a US state".to_string(),
                input_schema: json!({ "type": "object" }),
            },
        ]
    }

    async fn call_tool(&self, name: &str, arguments: Value) -> Result<Value, String> {
        match name {
            "get_forecast" => Ok(Value::String(format!(
                "Sunny at {},{}",
                arguments["latitude"], arguments["longitude"]
            ))),
            "get_alerts" => Err("Unable to fetch alerts or no alerts found.".to_string()),
            other => Err(format!("Unknown tool: {}", other)),
        }
    }
}

/// Transport that hands every frame straight to an in-process server
struct Loopback {
    server: Arc<McpServer<WeatherStub>>,
    inbox: VecDeque<Value>,
    /// Frames delivered before each response, e.g. server notifications
    preamble: Vec<Value>,
    silent: bool,
    reject_with: Option<JsonRpcError>,
    /// While set, writes never complete
    stall_writes: Arc<AtomicBool>,
    closed: bool,
}

impl Loopback {
    fn new() -> Self {
        Self {
            server: Arc::new(McpServer::new(Arc::new(WeatherStub)).with_name("weather")),
            inbox: VecDeque::new(),
            preamble: Vec::new(),
            silent: false,
            reject_with: None,
            stall_writes: Arc::new(AtomicBool::new(false)),
            closed: false,
        }
    }
}

#[async_trait]
impl Transport for Loopback {
    async fn send(&mut self, message: Value) -> io::Result<()> {
        if self.closed {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "closed"));
        }
        if self.stall_writes.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        if self.silent {
            return Ok(());
        }
        if let Some(error) = self.reject_with.clone() {
            let id: RequestId = serde_json::from_value(message["id"].clone())?;
            self.inbox.push_back(serde_json::to_value(JsonRpcResponse::error(id, error))?);
            return Ok(());
        }
        if let Some(response) = self.server.handle_frame(message).await {
            self.inbox.extend(self.preamble.drain(..));
            self.inbox.push_back(serde_json::to_value(response)?);
        }
        Ok(())
    }

    async fn receive(&mut self) -> io::Result<Option<Value>> {
        if self.silent {
            std::future::pending::<()>().await;
        }
        Ok(self.inbox.pop_front())
    }

    async fn close(&mut self) -> io::Result<()> {
        self.closed = true;
        Ok(())
    }
}

async fn connected(transport: Loopback) -> McpClient<Loopback> {
    let mut client = McpClient::new(transport);
    client
        .initialize(ClientInfo::new("parley-test", "0.0.0"))
        .await
        .expect("initialize");
    client
}

#[tokio::test]
async fn test_initialize_and_discover_tools() {
    let mut client = McpClient::new(Loopback::new());
    let info = client
        .initialize(ClientInfo::new("parley-test", "0.0.0"))
        .await
        .unwrap();

    assert_eq!(info.name, "weather");
    assert!(client.server_capabilities().unwrap().tools.is_some());

    let tools = client.list_tools().await.unwrap();
    let names: Vec<_> = tools.iter().map(|t| t.name.as_str()).collect();
    assert_eq!(names, vec!["get_forecast", "get_alerts"]);
    assert_eq!(tools[0].input_schema["required"], json!(["latitude", "longitude"]));
}

#[tokio::test]
async fn test_call_tool_success_and_error_payloads() {
    let client = connected(Loopback::new()).await;

    let ok = client
        .call_tool("get_forecast", json!({ "latitude": 40.0, "longitude": -75.0 }))
        .await
        .unwrap();
    assert!(!ok.is_error);
    assert_eq!(ok.text(), "Sunny at 40.0,-75.0");

    let failed = client.call_tool("get_alerts", json!({ "state": "CA" })).await.unwrap();
    assert!(failed.is_error);
    assert_eq!(failed.text(), "Unable to fetch alerts or no alerts found.");
}

#[tokio::test]
async fn test_notifications_before_response_are_skipped() {
    let mut transport = Loopback::new();
    transport.preamble.push(json!({
        "jsonrpc": "2.0",
        "method": "notifications/message",
        "params": { "level": "info", "data": "warming up" }
    }));

    let mut client = McpClient::new(transport);
    let info = client
        .initialize(ClientInfo::new("parley-test", "0.0.0"))
        .await
        .unwrap();
    assert_eq!(info.name, "weather");
}

#[tokio::test]
async fn test_unknown_tool_is_error_result() {
    let client = connected(Loopback::new()).await;

    let result = client.call_tool("get_tides", json!({})).await.unwrap();
    assert!(result.is_error);
    assert_eq!(result.text(), "Unknown tool: get_tides");
}

#[tokio::test]
async fn test_rpc_error_maps_to_server_error() {
    let mut transport = Loopback::new();
    transport.reject_with = Some(JsonRpcError::new(-32000, "server overloaded"));

    let client = McpClient::new(transport);
    let err = client.ping().await.unwrap_err();
    assert!(matches!(err, McpError::Server { code: -32000, ref message } if message == "server overloaded"));
}

#[tokio::test(start_paused = true)]
async fn test_silent_server_times_out() {
    let mut transport = Loopback::new();
    transport.silent = true;

    let client = McpClient::new(transport).with_request_timeout(Duration::from_secs(5));
    let err = client.ping().await.unwrap_err();
    assert!(matches!(err, McpError::Timeout { ref method, .. } if method == "ping"));
}

#[tokio::test(start_paused = true)]
async fn test_interrupted_write_poisons_the_session() {
    let transport = Loopback::new();
    let stall = transport.stall_writes.clone();
    let client = connected(transport).await;

    stall.store(true, Ordering::SeqCst);
    let abandoned = tokio::time::timeout(
        Duration::from_secs(1),
        client.call_tool("get_forecast", json!({ "latitude": 40.0, "longitude": -75.0 })),
    )
    .await;
    assert!(abandoned.is_err());

    // The peer may hold half a frame, so nothing more is written
    stall.store(false, Ordering::SeqCst);
    let err = client.ping().await.unwrap_err();
    assert!(matches!(err, McpError::Transport(ref message) if message.contains("interrupted")));
}

#[tokio::test]
async fn test_shutdown_closes_transport() {
    let client = connected(Loopback::new()).await;
    client.shutdown().await.unwrap();

    let err = client.ping().await.unwrap_err();
    assert!(matches!(err, McpError::Transport(_)));
}
