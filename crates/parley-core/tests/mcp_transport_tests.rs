//! MCP tool transport tests
//!
//! Connects `McpTransport` to a real `McpServer` through an in-memory
//! transport, then drives the orchestration loop over it.

#![cfg(feature = "mcp")]

use std::collections::VecDeque;
use std::io;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parley_core::completion::{CompletionOutcome, ScriptedClient};
use parley_core::config::OrchestrationConfig;
use parley_core::conversation::{Message, ToolCallRequest};
use parley_core::error::{Error, ToolError};
use parley_core::orchestration::OrchestrationLoop;
use parley_core::transport::{McpTransport, ToolTransport};
use parley_mcp::{McpHandler, McpServer, McpTool, Transport};
use serde_json::{json, Value};

struct ForecastServer;

#[async_trait]
impl McpHandler for ForecastServer {
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
            "get_forecast" => Ok(json!(format!(
                "Tonight: clear, low of 58°F at {},{}",
                arguments["latitude"], arguments["longitude"]
            ))),
            _ => Err("Unable to fetch alerts or no alerts found.".to_string()),
        }
    }
}

/// In-memory transport answering through an `McpServer`
struct Loopback {
    server: McpServer<ForecastServer>,
    inbox: VecDeque<Value>,
    closed: Arc<AtomicBool>,
    /// Frames the client attempted to send
    sent: Arc<AtomicUsize>,
    /// Answer `initialize` with an RPC error
    refuse_initialize: bool,
}

impl Loopback {
    fn new(closed: Arc<AtomicBool>) -> Self {
        Self {
            server: McpServer::new(Arc::new(ForecastServer)).with_name("weather"),
            inbox: VecDeque::new(),
            closed,
            sent: Arc::new(AtomicUsize::new(0)),
            refuse_initialize: false,
        }
    }
}

#[async_trait]
impl Transport for Loopback {
    async fn send(&mut self, message: Value) -> io::Result<()> {
        self.sent.fetch_add(1, Ordering::SeqCst);
        if self.closed.load(Ordering::SeqCst) {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "closed"));
        }
        if self.refuse_initialize && message["method"] == "initialize" {
            self.inbox.push_back(json!({
                "jsonrpc": "2.0",
                "id": message["id"],
                "error": { "code": -32603, "message": "not ready" }
            }));
            return Ok(());
        }
        if let Some(response) = self.server.handle_frame(message).await {
            self.inbox.push_back(serde_json::to_value(response)?);
        }
        Ok(())
    }

    async fn receive(&mut self) -> io::Result<Option<Value>> {
        Ok(self.inbox.pop_front())
    }

    async fn close(&mut self) -> io::Result<()> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

async fn connect() -> (Arc<AtomicBool>, McpTransport) {
    let closed = Arc::new(AtomicBool::new(false));
    let transport = McpTransport::connect(Box::new(Loopback::new(closed.clone())), Duration::from_secs(5))
        .await
        .expect("connect");
    (closed, transport)
}

mod discovery_tests {
    use super::*;

    #[tokio::test]
    async fn test_schemas_come_from_discovery() {
        let (_, transport) = connect().await;

        assert_eq!(transport.server_name(), "weather");
        let schemas = transport.list_schemas();
        assert_eq!(schemas.len(), 2);
        assert_eq!(schemas[0].name, "get_forecast");
        assert_eq!(schemas[0].parameters["required"], json!(["latitude", "longitude"]));
    }

    #[tokio::test]
    async fn test_failed_handshake_closes_the_server() {
        let closed = Arc::new(AtomicBool::new(false));
        let mut loopback = Loopback::new(closed.clone());
        loopback.refuse_initialize = true;

        let err = McpTransport::connect(Box::new(loopback), Duration::from_secs(5))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Protocol(ref msg) if msg.contains("not ready")));
        assert!(closed.load(Ordering::SeqCst));
    }
}

mod invocation_tests {
    use super::*;

    #[tokio::test]
    async fn test_successful_call_returns_text_payload() {
        let (_, transport) = connect().await;
        let payload = transport
            .invoke("get_forecast", json!({ "latitude": 37.8, "longitude": -122.4 }))
            .await
            .unwrap();
        assert_eq!(payload, json!("Tonight: clear, low of 58°F at 37.8,-122.4"));
    }

    #[tokio::test]
    async fn test_error_result_maps_to_execution_failure() {
        let (_, transport) = connect().await;
        let err = transport.invoke("get_alerts", json!({ "state": "CA" })).await.unwrap_err();
        assert_eq!(
            err,
            ToolError::ExecutionFailed("Unable to fetch alerts or no alerts found.".to_string())
        );
    }

    #[tokio::test]
    async fn test_undiscovered_tool_is_not_found() {
        let (_, transport) = connect().await;
        let err = transport.invoke("get_tides", json!({})).await.unwrap_err();
        assert_eq!(err, ToolError::NotFound("get_tides".to_string()));
    }

    #[tokio::test]
    async fn test_shutdown_is_idempotent_and_final() {
        let (closed, transport) = connect().await;

        transport.shutdown().await.unwrap();
        transport.shutdown().await.unwrap();
        assert!(closed.load(Ordering::SeqCst));

        let err = transport.invoke("get_forecast", json!({})).await.unwrap_err();
        assert!(err.is_session_fatal());
    }
}

mod loop_over_mcp_tests {
    use super::*;

    #[tokio::test]
    async fn test_dead_server_ends_the_session() {
        let closed = Arc::new(AtomicBool::new(false));
        let loopback = Loopback::new(closed.clone());
        let sent = loopback.sent.clone();
        let transport = McpTransport::connect(Box::new(loopback), Duration::from_secs(5))
            .await
            .unwrap();

        let forecast = || {
            Ok(CompletionOutcome::tool_calls(vec![ToolCallRequest::new(
                "call_1",
                "get_forecast",
                json!({ "latitude": 37.8, "longitude": -122.4 }),
            )]))
        };
        let client = Arc::new(ScriptedClient::new(vec![forecast(), forecast()]));
        let mut lp = OrchestrationLoop::new(client, Arc::new(transport), OrchestrationConfig::default())
            .unwrap();

        // The server process goes away mid-session
        closed.store(true, Ordering::SeqCst);
        let err = lp.run_turn("Weather in San Francisco?").await.unwrap_err();
        assert!(matches!(err, Error::Protocol(_)));
        let sent_before = sent.load(Ordering::SeqCst);

        // Even if the pipe came back, the session stays failed
        closed.store(false, Ordering::SeqCst);
        let err = lp.run_turn("And now?").await.unwrap_err();
        assert!(matches!(err, Error::Protocol(_)));
        assert_eq!(sent.load(Ordering::SeqCst), sent_before);
        assert!(lp.history().unanswered_calls().is_empty());
    }

    #[tokio::test]
    async fn test_weather_turn_over_mcp() {
        let (closed, transport) = connect().await;
        let client = Arc::new(ScriptedClient::new(vec![
            Ok(CompletionOutcome::tool_calls(vec![ToolCallRequest::new(
                "call_1",
                "get_forecast",
                json!({ "latitude": 37.8, "longitude": -122.4 }),
            )])),
            Ok(CompletionOutcome::answer("Clear tonight, around 58°F.")),
        ]));

        let mut lp = OrchestrationLoop::new(client.clone(), Arc::new(transport), OrchestrationConfig::default())
            .unwrap();
        assert_eq!(lp.tool_schemas().len(), 2);

        let reply = lp.run_turn("What's the weather in San Francisco tonight?").await.unwrap();
        assert_eq!(reply, "Clear tonight, around 58°F.");
        assert_eq!(lp.history().len(), 4);
        assert!(matches!(
            &lp.history().messages()[2],
            Message::ToolResult { is_error: false, .. }
        ));
        assert_eq!(
            client.requests()[0].tools,
            vec!["get_forecast".to_string(), "get_alerts".to_string()]
        );

        lp.shutdown().await.unwrap();
        assert!(closed.load(Ordering::SeqCst));
    }
}
