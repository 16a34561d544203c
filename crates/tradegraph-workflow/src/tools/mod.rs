pub mod web_fetch;

use std::collections::HashMap;
use std::sync::Arc;

use tradegraph_core::error::{Result, TradegraphError};
use tradegraph_core::traits::Tool;
use tradegraph_core::types::{ToolCall, ToolContext, ToolDefinition, ToolResult};
use tracing::warn;

pub use web_fetch::WebFetchTool;

/// Registry of retrieval tools available to analyst nodes.
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: HashMap::new(),
        }
    }

    /// Register a tool.
    pub fn register(&mut self, tool: impl Tool) {
        let name = tool.name().to_string();
        self.tools.insert(name, Arc::new(tool));
    }

    /// Get a tool by name.
    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    /// List all registered tools.
    pub fn list(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.tools.keys().map(|s| s.as_str()).collect();
        names.sort_unstable();
        names
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Get tool definitions for sending to the model, sorted by name.
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        let mut defs: Vec<ToolDefinition> = self
            .tools
            .values()
            .map(|t| ToolDefinition {
                name: t.name().to_string(),
                description: t.description().to_string(),
                input_schema: t.input_schema(),
            })
            .collect();
        defs.sort_by(|a, b| a.name.cmp(&b.name));
        defs
    }

    /// Execute a tool by name.
    pub async fn execute(
        &self,
        name: &str,
        input: serde_json::Value,
        ctx: ToolContext,
    ) -> Result<ToolResult> {
        let tool = self
            .get(name)
            .ok_or_else(|| TradegraphError::ToolNotFound(name.to_string()))?;

        let timeout = std::time::Duration::from_secs(tool.timeout_secs());

        match tokio::time::timeout(timeout, tool.execute(input, ctx)).await {
            Ok(result) => result,
            Err(_) => Err(TradegraphError::ToolTimeout {
                tool: name.to_string(),
                timeout_secs: tool.timeout_secs(),
            }),
        }
    }

    /// Execute a model-requested call, turning every failure into an error
    /// result the model can read.
    pub async fn dispatch(&self, call: &ToolCall, ctx: ToolContext) -> ToolResult {
        match self.execute(&call.name, call.input(), ctx).await {
            Ok(result) => result,
            Err(e) => {
                warn!(tool = %call.name, id = %call.id, error = %e, "Tool call failed");
                ToolResult::error(e.to_string())
            }
        }
    }

    /// Create a registry with the built-in retrieval tools registered.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register(WebFetchTool::default());
        registry
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}
