//! Parley weather server
//!
//! Serves the built-in weather and crypto-price tools over MCP on
//! stdin/stdout. Logs go to stderr since stdout carries the protocol.

mod handler;

use std::sync::Arc;

use parley_core::tools::builtin_registry;
use parley_core::transport::InProcessTransport;
use parley_mcp::McpServer;
use tracing::info;
use tracing_subscriber::EnvFilter;

use handler::RegistryHandler;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .init();

    let registry = builtin_registry()?;
    info!(tools = ?registry.names(), "Starting weather server");

    let handler = RegistryHandler::new(InProcessTransport::new(registry));
    McpServer::new(Arc::new(handler))
        .with_name("weather")
        .with_version(env!("CARGO_PKG_VERSION"))
        .serve(tokio::io::stdin(), tokio::io::stdout())
        .await?;

    info!("Client disconnected, shutting down");
    Ok(())
}
