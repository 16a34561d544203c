use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique session identifier.
#[derive(Debug, Clone, Hash, Eq, PartialEq, Serialize, Deserialize)]
pub struct SessionId(pub String);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn from_str(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Role in a conversation.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::System => "system",
            Self::User => "user",
            Self::Assistant => "assistant",
            Self::Tool => "tool",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "system" => Self::System,
            "assistant" => Self::Assistant,
            "tool" => Self::Tool,
            _ => Self::User,
        }
    }
}

/// A fully reassembled tool call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    /// Raw JSON argument string, exactly as streamed.
    pub arguments: String,
}

impl ToolCall {
    pub fn new(id: impl Into<String>, name: impl Into<String>, arguments: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            arguments: arguments.into(),
        }
    }

    /// Parse the argument string; malformed JSON becomes `Null`.
    pub fn input(&self) -> serde_json::Value {
        serde_json::from_str(&self.arguments).unwrap_or(serde_json::Value::Null)
    }
}

/// A message in the conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
    /// Agent that produced the message, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
}

impl ChatMessage {
    fn with_role(role: Role, text: impl Into<String>) -> Self {
        Self {
            role,
            content: text.into(),
            name: None,
            tool_calls: vec![],
            tool_call_id: None,
            timestamp: Some(Utc::now()),
        }
    }

    pub fn system(text: impl Into<String>) -> Self {
        Self::with_role(Role::System, text)
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self::with_role(Role::User, text)
    }

    pub fn assistant_text(text: impl Into<String>) -> Self {
        Self::with_role(Role::Assistant, text)
    }

    pub fn assistant_with_tools(text: impl Into<String>, tool_calls: Vec<ToolCall>) -> Self {
        Self {
            tool_calls,
            ..Self::with_role(Role::Assistant, text)
        }
    }

    pub fn tool_result(tool_call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            tool_call_id: Some(tool_call_id.into()),
            ..Self::with_role(Role::Tool, content)
        }
    }

    /// Tag the message with the agent that produced it.
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }
}

/// Why the model ended a turn.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    Stop,
    ToolCalls,
    Length,
    Other(String),
}

impl FinishReason {
    pub fn from_provider(reason: &str) -> Self {
        match reason {
            "stop" | "end_turn" | "stop_sequence" => Self::Stop,
            "tool_calls" | "tool_use" | "tool-calls" => Self::ToolCalls,
            "length" | "max_tokens" => Self::Length,
            other => Self::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Stop => "stop",
            Self::ToolCalls => "tool_calls",
            Self::Length => "length",
            Self::Other(s) => s.as_str(),
        }
    }
}

/// One streamed fragment of a tool call.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ToolCallFragment {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default)]
    pub arguments: String,
}

/// A streaming delta from the model/tool layer.
///
/// Model deltas carry `Role::Assistant`; a delta with `Role::Tool` is a
/// complete tool result produced by a tool-augmented collaborator.
#[derive(Debug, Clone, PartialEq)]
pub struct Delta {
    pub role: Role,
    pub content: Option<String>,
    pub tool_calls: Vec<ToolCallFragment>,
    pub tool_call_id: Option<String>,
    pub finish_reason: Option<FinishReason>,
}

impl Delta {
    fn empty(role: Role) -> Self {
        Self {
            role,
            content: None,
            tool_calls: vec![],
            tool_call_id: None,
            finish_reason: None,
        }
    }

    pub fn text(text: impl Into<String>) -> Self {
        Self {
            content: Some(text.into()),
            ..Self::empty(Role::Assistant)
        }
    }

    pub fn tool_call(id: Option<&str>, name: Option<&str>, arguments: impl Into<String>) -> Self {
        Self {
            tool_calls: vec![ToolCallFragment {
                id: id.map(str::to_string),
                name: name.map(str::to_string),
                arguments: arguments.into(),
            }],
            ..Self::empty(Role::Assistant)
        }
    }

    pub fn finish(reason: FinishReason) -> Self {
        Self {
            finish_reason: Some(reason),
            ..Self::empty(Role::Assistant)
        }
    }

    pub fn tool_result(tool_call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            content: Some(content.into()),
            tool_call_id: Some(tool_call_id.into()),
            ..Self::empty(Role::Tool)
        }
    }

    pub fn is_tool_result(&self) -> bool {
        self.role == Role::Tool
    }
}

/// Result of a tool execution.
#[derive(Debug, Clone)]
pub struct ToolResult {
    pub content: String,
    pub is_error: bool,
}

impl ToolResult {
    pub fn success(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            is_error: false,
        }
    }

    pub fn error(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            is_error: true,
        }
    }
}

/// Tool definition for sending to the LLM.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub input_schema: serde_json::Value,
}

/// Context passed to tools during execution.
#[derive(Debug, Clone)]
pub struct ToolContext {
    pub subject_id: String,
    pub as_of: String,
}

/// Raw tool-call argument chunk carried by a `MessageChunk` event.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolCallChunk {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub arguments: String,
}

/// Lifecycle event emitted while a workflow runs.
#[derive(Debug, Clone, PartialEq)]
pub enum WorkflowEvent {
    /// Run started at the given node.
    RunStarted { start: String },
    /// Incremental model output for the executing node.
    MessageChunk {
        node: String,
        content: Option<String>,
        tool_calls: Vec<ToolCallChunk>,
    },
    /// A reconstructed model turn.
    TextFinal {
        node: String,
        content: String,
        tool_calls: Vec<ToolCall>,
        finish_reason: Option<FinishReason>,
    },
    /// A complete tool result turn.
    ToolResultFinal {
        node: String,
        tool_call_id: String,
        content: String,
    },
    /// A store write failed; the run continues.
    PersistenceWarning { message: String },
    /// The run failed. No `Finished` follows.
    RunError {
        node: Option<String>,
        message: String,
    },
    /// The run reached the terminal node.
    Finished { iterations: usize },
}

impl WorkflowEvent {
    /// Notification topic for the event.
    pub fn topic(&self) -> &'static str {
        match self {
            Self::RunStarted { .. } => "run_start",
            Self::MessageChunk { .. } => "message_chunk",
            Self::TextFinal { .. } => "text_final",
            Self::ToolResultFinal { .. } => "tool_call_result_final",
            Self::PersistenceWarning { .. } => "persistence_warning",
            Self::RunError { .. } => "error",
            Self::Finished { .. } => "finished",
        }
    }

    /// JSON payload for the notification bridge.
    pub fn payload(&self) -> serde_json::Value {
        use serde_json::json;
        match self {
            Self::RunStarted { start } => json!({ "start": start }),
            Self::MessageChunk {
                node,
                content,
                tool_calls,
            } => json!({ "node": node, "content": content, "tool_calls": tool_calls }),
            Self::TextFinal {
                node,
                content,
                tool_calls,
                finish_reason,
            } => json!({
                "node": node,
                "content": content,
                "tool_calls": tool_calls,
                "finish_reason": finish_reason.as_ref().map(|r| r.as_str().to_string()),
            }),
            Self::ToolResultFinal {
                node,
                tool_call_id,
                content,
            } => json!({ "node": node, "tool_call_id": tool_call_id, "content": content }),
            Self::PersistenceWarning { message } => json!({ "message": message }),
            Self::RunError { node, message } => json!({ "node": node, "message": message }),
            Self::Finished { iterations } => json!({ "iterations": iterations }),
        }
    }
}

/// Session lifecycle status in the durable store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "running" => Some(Self::Running),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            "cancelled" => Some(Self::Cancelled),
            _ => None,
        }
    }
}

/// One persisted turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageRecord {
    pub role: Role,
    pub agent: String,
    pub content: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finish_reason: Option<String>,
}

impl MessageRecord {
    /// Build the record for a final event; `None` for non-final events.
    pub fn from_event(event: &WorkflowEvent) -> Option<Self> {
        match event {
            WorkflowEvent::TextFinal {
                node,
                content,
                tool_calls,
                finish_reason,
            } => Some(Self {
                role: Role::Assistant,
                agent: node.clone(),
                content: content.clone(),
                tool_calls: tool_calls.clone(),
                tool_call_id: None,
                finish_reason: finish_reason.as_ref().map(|r| r.as_str().to_string()),
            }),
            WorkflowEvent::ToolResultFinal {
                node,
                tool_call_id,
                content,
            } => Some(Self {
                role: Role::Tool,
                agent: node.clone(),
                content: content.clone(),
                tool_calls: vec![],
                tool_call_id: Some(tool_call_id.clone()),
                finish_reason: None,
            }),
            _ => None,
        }
    }
}

/// A record read back from the store with its sequence number.
#[derive(Debug, Clone)]
pub struct StoredMessage {
    pub seq: u64,
    pub record: MessageRecord,
    pub timestamp: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_finish_reason_from_provider() {
        assert_eq!(FinishReason::from_provider("stop"), FinishReason::Stop);
        assert_eq!(FinishReason::from_provider("tool_calls"), FinishReason::ToolCalls);
        assert_eq!(FinishReason::from_provider("tool-calls"), FinishReason::ToolCalls);
        assert_eq!(FinishReason::from_provider("length"), FinishReason::Length);
        assert_eq!(
            FinishReason::from_provider("content_filter"),
            FinishReason::Other("content_filter".into())
        );
    }

    #[test]
    fn test_event_topics() {
        let ev = WorkflowEvent::ToolResultFinal {
            node: "market_analyst".into(),
            tool_call_id: "tc1".into(),
            content: "{}".into(),
        };
        assert_eq!(ev.topic(), "tool_call_result_final");
        assert!(MessageRecord::from_event(&ev).is_some());
        assert_eq!(ev.payload()["tool_call_id"], "tc1");

        let ev = WorkflowEvent::RunError {
            node: None,
            message: "boom".into(),
        };
        assert_eq!(ev.topic(), "error");
        assert!(MessageRecord::from_event(&ev).is_none());
    }

    #[test]
    fn test_text_final_payload() {
        let ev = WorkflowEvent::TextFinal {
            node: "trader".into(),
            content: "BUY".into(),
            tool_calls: vec![ToolCall::new("tc1", "get_market_data", r#"{"symbol":"AAPL"}"#)],
            finish_reason: Some(FinishReason::ToolCalls),
        };
        let payload = ev.payload();
        assert_eq!(payload["content"], "BUY");
        assert_eq!(payload["tool_calls"][0]["name"], "get_market_data");
        assert_eq!(payload["finish_reason"], "tool_calls");
    }

    #[test]
    fn test_message_record_from_event() {
        let ev = WorkflowEvent::ToolResultFinal {
            node: "news_analyst".into(),
            tool_call_id: "tc9".into(),
            content: "headlines".into(),
        };
        let record = MessageRecord::from_event(&ev).unwrap();
        assert_eq!(record.role, Role::Tool);
        assert_eq!(record.tool_call_id.as_deref(), Some("tc9"));

        assert!(MessageRecord::from_event(&WorkflowEvent::Finished { iterations: 3 }).is_none());
    }

    #[test]
    fn test_tool_call_input_malformed() {
        let tc = ToolCall::new("a", "b", "{not json");
        assert_eq!(tc.input(), serde_json::Value::Null);
    }
}
