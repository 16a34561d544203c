use thiserror::Error;

#[derive(Debug, Error)]
pub enum TradegraphError {
    // Graph construction errors
    #[error("Duplicate node: {0}")]
    DuplicateNode(String),

    #[error("Graph validation failed: {0}")]
    GraphValidation(String),

    // Run errors
    #[error("Iteration limit exceeded at node {node} after {iterations} iterations")]
    IterationLimitExceeded { node: String, iterations: usize },

    #[error("Tool loop exceeded {steps} steps in node {node}")]
    ToolLoopExceeded { node: String, steps: usize },

    #[error("Node {node} wrote its route {writes} times (expected exactly once)")]
    RouteNotWritten { node: String, writes: u64 },

    #[error("Run cancelled")]
    Cancelled,

    // Model invocation errors
    #[error("LLM request failed: {0}")]
    LlmRequest(String),

    #[error("LLM streaming error: {0}")]
    LlmStream(String),

    #[error("LLM response parse error: {0}")]
    LlmParse(String),

    #[error("LLM provider not supported: {0}")]
    UnsupportedProvider(String),

    // Tool errors
    #[error("Tool not found: {0}")]
    ToolNotFound(String),

    #[error("Tool execution failed: {tool}: {message}")]
    ToolExecution { tool: String, message: String },

    #[error("Tool timeout after {timeout_secs}s: {tool}")]
    ToolTimeout { tool: String, timeout_secs: u64 },

    // Config errors
    #[error("Config error: {0}")]
    Config(String),

    #[error("Config file not found: {0}")]
    ConfigNotFound(String),

    // Storage errors
    #[error("Database error: {0}")]
    Database(String),

    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // JSON errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl TradegraphError {
    /// Whether the error came from the model layer rather than the runtime.
    pub fn is_invocation(&self) -> bool {
        matches!(
            self,
            Self::LlmRequest(_) | Self::LlmStream(_) | Self::LlmParse(_) | Self::UnsupportedProvider(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, TradegraphError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_iteration_limit_display() {
        let err = TradegraphError::IterationLimitExceeded {
            node: "bull_researcher".into(),
            iterations: 100,
        };
        let s = err.to_string();
        assert!(s.contains("bull_researcher"));
        assert!(s.contains("100"));
    }

    #[test]
    fn test_is_invocation() {
        assert!(TradegraphError::LlmRequest("HTTP 500".into()).is_invocation());
        assert!(TradegraphError::LlmStream("reset".into()).is_invocation());
        assert!(!TradegraphError::Cancelled.is_invocation());
        assert!(!TradegraphError::Database("locked".into()).is_invocation());
    }
}
