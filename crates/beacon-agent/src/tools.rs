//! Tool registry and dispatch.
//!
//! The registry maps tool names to client-registered [`ToolHandler`]
//! implementations. The orchestrator dispatches the backend's tool calls
//! here; every outcome, including a missing tool or a panicking handler,
//! settles into a [`ToolResult`] rather than failing the turn.

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use beacon_core::{AgentError, ToolCall, ToolResult};
use futures::FutureExt;
use serde_json::{Map, Value};
use tracing::debug;

/// A client-registered function the backend can invoke mid-turn.
#[async_trait]
pub trait ToolHandler: Send + Sync {
    /// Name the backend uses to address this tool.
    fn name(&self) -> &str;

    /// Execute the tool with the backend-supplied arguments.
    async fn execute(&self, arguments: &Map<String, Value>) -> Result<Value, AgentError>;
}

/// Central registry mapping tool names to their handlers.
#[derive(Default)]
pub struct ToolRegistry {
    tools: parking_lot::RwLock<HashMap<String, Arc<dyn ToolHandler>>>,
}

impl ToolRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler. Overwrites any existing tool with the same name.
    pub fn register(&self, handler: Arc<dyn ToolHandler>) {
        debug!(tool_name = handler.name(), "tool registered");
        let _ = self
            .tools
            .write()
            .insert(handler.name().to_owned(), handler);
    }

    /// Look up a handler by name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<Arc<dyn ToolHandler>> {
        self.tools.read().get(name).cloned()
    }

    /// Whether a tool with the given name is registered.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.tools.read().contains_key(name)
    }

    /// All registered names, sorted.
    #[must_use]
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tools.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// Number of registered tools.
    #[must_use]
    pub fn len(&self) -> usize {
        self.tools.read().len()
    }

    /// Whether the registry is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tools.read().is_empty()
    }

    /// Remove a tool by name, returning it if it existed.
    pub fn remove(&self, name: &str) -> Option<Arc<dyn ToolHandler>> {
        self.tools.write().remove(name)
    }

    /// Execute one tool call and settle its outcome.
    ///
    /// A registry miss yields `error = "Tool not found"` with zero duration.
    /// A handler failure (or panic) is captured into `ToolResult::error`
    /// with the measured duration. Neither propagates.
    pub async fn dispatch(&self, call: &ToolCall) -> ToolResult {
        let Some(handler) = self.get(&call.name) else {
            debug!(tool_name = %call.name, "tool call for unregistered tool");
            return ToolResult::failed(call.id.clone(), call.name.clone(), "Tool not found", 0);
        };

        let start = Instant::now();
        let outcome = AssertUnwindSafe(handler.execute(&call.arguments))
            .catch_unwind()
            .await;
        let duration_ms = u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX);

        match outcome {
            Ok(Ok(value)) => ToolResult::ok(call.id.clone(), call.name.clone(), value, duration_ms),
            Ok(Err(e)) => {
                ToolResult::failed(call.id.clone(), call.name.clone(), e.to_string(), duration_ms)
            }
            Err(_) => ToolResult::failed(
                call.id.clone(),
                call.name.clone(),
                "tool handler panicked",
                duration_ms,
            ),
        }
    }
}

impl std::fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolRegistry")
            .field("tools", &self.names())
            .finish()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use beacon_core::ToolCallId;
    use serde_json::json;

    struct StubTool {
        tool_name: String,
    }

    #[async_trait]
    impl ToolHandler for StubTool {
        fn name(&self) -> &str {
            &self.tool_name
        }

        async fn execute(&self, arguments: &Map<String, Value>) -> Result<Value, AgentError> {
            Ok(json!({ "echo": arguments }))
        }
    }

    struct FailingTool;

    #[async_trait]
    impl ToolHandler for FailingTool {
        fn name(&self) -> &str {
            "failing"
        }

        async fn execute(&self, _arguments: &Map<String, Value>) -> Result<Value, AgentError> {
            Err(AgentError::tool("backend rejected the lookup"))
        }
    }

    struct PanickingTool;

    #[async_trait]
    impl ToolHandler for PanickingTool {
        fn name(&self) -> &str {
            "panicking"
        }

        async fn execute(&self, _arguments: &Map<String, Value>) -> Result<Value, AgentError> {
            panic!("handler bug");
        }
    }

    fn call(name: &str) -> ToolCall {
        ToolCall {
            id: ToolCallId::new(),
            name: name.into(),
            arguments: serde_json::from_value(json!({"orderId": "o-1"})).unwrap(),
            requested_at: chrono::Utc::now(),
        }
    }

    #[test]
    fn register_and_lookup() {
        let registry = ToolRegistry::new();
        assert!(registry.is_empty());
        registry.register(Arc::new(StubTool {
            tool_name: "lookup_order".into(),
        }));
        assert!(registry.contains("lookup_order"));
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.names(), vec!["lookup_order"]);
        assert!(registry.remove("lookup_order").is_some());
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn dispatch_hit_measures_duration() {
        let registry = ToolRegistry::new();
        registry.register(Arc::new(StubTool {
            tool_name: "lookup_order".into(),
        }));
        let result = registry.dispatch(&call("lookup_order")).await;
        assert!(!result.is_error());
        assert_eq!(result.result.unwrap()["echo"]["orderId"], "o-1");
    }

    #[tokio::test]
    async fn dispatch_miss_is_tool_not_found_with_zero_duration() {
        let registry = ToolRegistry::new();
        let result = registry.dispatch(&call("nope")).await;
        assert_eq!(result.error.as_deref(), Some("Tool not found"));
        assert_eq!(result.duration_ms, 0);
        assert!(result.result.is_none());
    }

    #[tokio::test]
    async fn dispatch_handler_failure_is_captured() {
        let registry = ToolRegistry::new();
        registry.register(Arc::new(FailingTool));
        let result = registry.dispatch(&call("failing")).await;
        assert!(result.is_error());
        assert!(result.error.unwrap().contains("backend rejected"));
    }

    #[tokio::test]
    async fn dispatch_handler_panic_is_captured() {
        let registry = ToolRegistry::new();
        registry.register(Arc::new(PanickingTool));
        let result = registry.dispatch(&call("panicking")).await;
        assert_eq!(result.error.as_deref(), Some("tool handler panicked"));
    }

    #[tokio::test]
    async fn register_overwrites_same_name() {
        let registry = ToolRegistry::new();
        registry.register(Arc::new(StubTool {
            tool_name: "dup".into(),
        }));
        registry.register(Arc::new(StubTool {
            tool_name: "dup".into(),
        }));
        assert_eq!(registry.len(), 1);
    }
}
