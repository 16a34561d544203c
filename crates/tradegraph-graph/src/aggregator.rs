use futures::stream::BoxStream;
use futures::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use tradegraph_core::config::OrphanFragmentPolicy;
use tradegraph_core::error::{Result, TradegraphError};
use tradegraph_core::types::{
    Delta, FinishReason, ToolCall, ToolCallChunk, ToolCallFragment, WorkflowEvent,
};

use crate::context::Emitter;

/// One reconstructed model turn.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Turn {
    pub content: String,
    pub tool_calls: Vec<ToolCall>,
    pub finish_reason: Option<FinishReason>,
}

impl Turn {
    pub fn is_empty(&self) -> bool {
        self.content.is_empty() && self.tool_calls.is_empty()
    }

    pub fn wants_tools(&self) -> bool {
        !self.tool_calls.is_empty()
    }
}

#[derive(Debug, Default)]
struct ToolCallBuffer {
    id: String,
    name: String,
    arguments: String,
}

/// Reassembles streamed deltas into complete turns and emits lifecycle events.
///
/// Tool-call buffers are keyed by call id and kept in first-seen order.
pub struct Aggregator<'a> {
    node: String,
    emitter: &'a Emitter,
    policy: OrphanFragmentPolicy,
    text: String,
    calls: Vec<ToolCallBuffer>,
    last_turn: Option<Turn>,
}

impl<'a> Aggregator<'a> {
    pub fn new(node: impl Into<String>, emitter: &'a Emitter, policy: OrphanFragmentPolicy) -> Self {
        Self {
            node: node.into(),
            emitter,
            policy,
            text: String::new(),
            calls: Vec::new(),
            last_turn: None,
        }
    }

    /// Drain a delta stream until it ends, fails, or `cancel` fires.
    ///
    /// Returns the last non-empty model turn, or an empty turn if the stream
    /// carried none. Partial output is flushed before any error is returned.
    pub async fn consume(
        &mut self,
        mut stream: BoxStream<'_, Result<Delta>>,
        cancel: &CancellationToken,
    ) -> Result<Turn> {
        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    debug!(node = %self.node, "Stream cancelled, flushing partial turn");
                    self.force_flush();
                    return Err(TradegraphError::Cancelled);
                }
                item = stream.next() => item,
            };

            match next {
                Some(Ok(delta)) => self.push(delta),
                Some(Err(e)) => {
                    warn!(node = %self.node, error = %e, "Delta stream failed");
                    self.force_flush();
                    return Err(e);
                }
                None => {
                    self.force_flush();
                    break;
                }
            }
        }
        Ok(self.take_turn())
    }

    /// Apply one delta.
    pub fn push(&mut self, delta: Delta) {
        if delta.is_tool_result() {
            self.force_flush();
            self.emitter.emit(WorkflowEvent::ToolResultFinal {
                node: self.node.clone(),
                tool_call_id: delta.tool_call_id.unwrap_or_default(),
                content: delta.content.unwrap_or_default(),
            });
            return;
        }

        let chunks: Vec<ToolCallChunk> = delta
            .tool_calls
            .into_iter()
            .filter_map(|f| self.accept_fragment(f))
            .collect();

        let content = delta.content.filter(|c| !c.is_empty());
        if let Some(text) = &content {
            self.text.push_str(text);
        }
        if content.is_some() || !chunks.is_empty() {
            self.emitter.emit(WorkflowEvent::MessageChunk {
                node: self.node.clone(),
                content,
                tool_calls: chunks,
            });
        }

        if let Some(reason) = delta.finish_reason {
            self.flush(Some(reason));
        }
    }

    /// Flush whatever is buffered without a finish reason.
    pub fn force_flush(&mut self) {
        self.flush(None);
    }

    /// Most recent non-empty turn, leaving an empty one in its place.
    pub fn take_turn(&mut self) -> Turn {
        self.last_turn.take().unwrap_or_default()
    }

    fn open_calls(&self) -> usize {
        self.calls.len()
    }

    fn accept_fragment(&mut self, frag: ToolCallFragment) -> Option<ToolCallChunk> {
        let idx = match frag.id.as_deref() {
            Some(id) => match self.calls.iter().position(|c| c.id == id) {
                Some(i) => i,
                None => {
                    self.calls.push(ToolCallBuffer {
                        id: id.to_string(),
                        ..Default::default()
                    });
                    self.calls.len() - 1
                }
            },
            None => match (self.policy, self.open_calls()) {
                (OrphanFragmentPolicy::AttachSingleOpen, 1) => 0,
                (policy, open) => {
                    warn!(
                        node = %self.node,
                        ?policy,
                        open,
                        "Dropping tool-call fragment without id"
                    );
                    return None;
                }
            },
        };

        let buf = &mut self.calls[idx];
        if let Some(name) = &frag.name {
            if buf.name.is_empty() {
                buf.name.push_str(name);
            }
        }
        buf.arguments.push_str(&frag.arguments);

        Some(ToolCallChunk {
            id: Some(buf.id.clone()),
            name: frag.name,
            arguments: frag.arguments,
        })
    }

    fn flush(&mut self, finish_reason: Option<FinishReason>) {
        let content = std::mem::take(&mut self.text);
        let tool_calls: Vec<ToolCall> = std::mem::take(&mut self.calls)
            .into_iter()
            .map(|b| ToolCall::new(b.id, b.name, b.arguments))
            .collect();

        let turn = Turn {
            content,
            tool_calls,
            finish_reason,
        };
        if turn.is_empty() {
            return;
        }

        self.emitter.emit(WorkflowEvent::TextFinal {
            node: self.node.clone(),
            content: turn.content.clone(),
            tool_calls: turn.tool_calls.clone(),
            finish_reason: turn.finish_reason.clone(),
        });
        self.last_turn = Some(turn);
    }
}
