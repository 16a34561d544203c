use futures::future::BoxFuture;
use futures::stream::BoxStream;

use crate::error::Result;
use crate::types::*;

/// Model/tool invocation: streaming, opaque to the runtime.
pub trait ModelClient: Send + Sync + 'static {
    /// Send a request and receive a stream of deltas.
    fn invoke(
        &self,
        messages: Vec<ChatMessage>,
        tools: &[ToolDefinition],
    ) -> BoxFuture<'_, Result<BoxStream<'_, Result<Delta>>>>;
}

/// Tool: market data, news, social retrieval.
pub trait Tool: Send + Sync + 'static {
    /// Tool name (used in LLM tool calls).
    fn name(&self) -> &str;

    /// Human-readable description.
    fn description(&self) -> &str;

    /// JSON Schema for tool input.
    fn input_schema(&self) -> serde_json::Value;

    /// Execute the tool with given input and context.
    fn execute(
        &self,
        input: serde_json::Value,
        ctx: ToolContext,
    ) -> BoxFuture<'_, Result<ToolResult>>;

    /// Timeout in seconds for this tool.
    fn timeout_secs(&self) -> u64 {
        30
    }
}

/// Session store: persistence backend.
///
/// Implementations must be safe for concurrent use by several runs.
pub trait SessionStore: Send + Sync + 'static {
    /// Open a new session for one analysis run.
    fn create_session(
        &self,
        subject_id: &str,
        as_of: &str,
        prompt: &str,
    ) -> BoxFuture<'_, Result<SessionId>>;

    /// Append one turn; returns the per-session sequence number assigned.
    fn save_message(&self, sid: &SessionId, record: MessageRecord) -> BoxFuture<'_, Result<u64>>;

    /// Update the session's lifecycle status.
    fn update_session_status(
        &self,
        sid: &SessionId,
        status: SessionStatus,
    ) -> BoxFuture<'_, Result<()>>;

    /// Load all turns of a session in sequence order.
    fn load_messages(&self, sid: &SessionId) -> BoxFuture<'_, Result<Vec<StoredMessage>>>;
}

/// Notification bridge: best-effort, must never block the caller.
pub trait Notifier: Send + Sync + 'static {
    fn notify(&self, topic: &str, payload: serde_json::Value);
}
