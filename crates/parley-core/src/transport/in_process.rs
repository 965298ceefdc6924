use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tracing::info;

use super::{ToolTransport, DEFAULT_TOOL_TIMEOUT};
use crate::error::ToolError;
use crate::tools::{ToolRegistry, ToolSchema};

/// Executes tools from a local registry
pub struct InProcessTransport {
    registry: ToolRegistry,
    timeout: Duration,
}

impl InProcessTransport {
    pub fn new(registry: ToolRegistry) -> Self {
        Self {
            registry,
            timeout: DEFAULT_TOOL_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }
}

#[async_trait]
impl ToolTransport for InProcessTransport {
    fn list_schemas(&self) -> Vec<ToolSchema> {
        self.registry.schemas()
    }

    async fn invoke(&self, name: &str, arguments: Value) -> Result<Value, ToolError> {
        let tool = self
            .registry
            .get(name)
            .ok_or_else(|| ToolError::NotFound(name.to_string()))?;

        info!(tool = name, "Executing tool in-process");
        tokio::time::timeout(self.timeout, tool.execute(arguments))
            .await
            .map_err(|_| ToolError::Timeout(self.timeout.as_secs()))?
    }

    async fn shutdown(&self) -> Result<(), ToolError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::Tool;
    use serde_json::json;
    use std::sync::Arc;

    struct Sleepy;

    #[async_trait]
    impl Tool for Sleepy {
        fn name(&self) -> &str {
            "sleepy"
        }

        fn description(&self) -> &str {
            "Never finishes in time"
        }

        fn parameters_schema(&self) -> Value {
            json!({ "type": "object" })
        }

        async fn execute(&self, _params: Value) -> Result<Value, ToolError> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(json!("done"))
        }
    }

    fn transport() -> InProcessTransport {
        let registry = ToolRegistry::new().with_tool(Arc::new(Sleepy)).unwrap();
        InProcessTransport::new(registry).with_timeout(Duration::from_secs(2))
    }

    #[tokio::test]
    async fn test_unknown_tool_is_not_found() {
        let err = transport().invoke("get_tides", json!({})).await.unwrap_err();
        assert_eq!(err, ToolError::NotFound("get_tides".to_string()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_tool_times_out() {
        let err = transport().invoke("sleepy", json!({})).await.unwrap_err();
        assert_eq!(err, ToolError::Timeout(2));
    }

    #[test]
    fn test_schemas_come_from_registry() {
        let schemas = transport().list_schemas();
        assert_eq!(schemas.len(), 1);
        assert_eq!(schemas[0].name, "sleepy");
    }
}
