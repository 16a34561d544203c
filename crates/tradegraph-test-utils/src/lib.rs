//! Mocks and fixtures shared by the tradegraph test suites.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use futures::future::BoxFuture;
use futures::stream::{self, BoxStream, StreamExt};

use tradegraph_core::error::{Result, TradegraphError};
use tradegraph_core::traits::{ModelClient, Notifier, SessionStore, Tool};
use tradegraph_core::types::*;

type Responder = Box<dyn Fn(&[ChatMessage]) -> Vec<Delta> + Send + Sync>;

/// Model client that replays canned delta sequences, one per invocation.
///
/// Once the scripts run out the responder is used; without one the call
/// fails with `LlmRequest`.
pub struct ScriptedModel {
    scripts: Mutex<VecDeque<Vec<Delta>>>,
    responder: Option<Responder>,
    requests: Arc<Mutex<Vec<Vec<ChatMessage>>>>,
}

impl ScriptedModel {
    pub fn new(scripts: Vec<Vec<Delta>>) -> Self {
        Self {
            scripts: Mutex::new(scripts.into()),
            responder: None,
            requests: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Answer every call by computing deltas from the request.
    pub fn replying(f: impl Fn(&[ChatMessage]) -> Vec<Delta> + Send + Sync + 'static) -> Self {
        Self {
            responder: Some(Box::new(f)),
            ..Self::new(vec![])
        }
    }

    /// Handle to every request received, in call order.
    pub fn requests(&self) -> Arc<Mutex<Vec<Vec<ChatMessage>>>> {
        self.requests.clone()
    }

    /// A complete text turn ending in `stop`.
    pub fn text_turn(text: &str) -> Vec<Delta> {
        vec![Delta::text(text), Delta::finish(FinishReason::Stop)]
    }
}

impl ModelClient for ScriptedModel {
    fn invoke(
        &self,
        messages: Vec<ChatMessage>,
        _tools: &[ToolDefinition],
    ) -> BoxFuture<'_, Result<BoxStream<'_, Result<Delta>>>> {
        let next = self
            .scripts
            .lock()
            .map_err(|_| TradegraphError::LlmRequest("script lock poisoned".into()))
            .map(|mut s| s.pop_front());
        let deltas = match next {
            Ok(Some(d)) => Ok(d),
            Ok(None) => match &self.responder {
                Some(f) => Ok(f(&messages)),
                None => Err(TradegraphError::LlmRequest("no scripted response left".into())),
            },
            Err(e) => Err(e),
        };
        if let Ok(mut reqs) = self.requests.lock() {
            reqs.push(messages);
        }

        Box::pin(async move {
            let deltas = deltas?;
            Ok(stream::iter(deltas.into_iter().map(Ok)).boxed())
        })
    }
}

/// Model client whose every call fails.
pub struct FailingModel {
    message: String,
}

impl FailingModel {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl ModelClient for FailingModel {
    fn invoke(
        &self,
        _messages: Vec<ChatMessage>,
        _tools: &[ToolDefinition],
    ) -> BoxFuture<'_, Result<BoxStream<'_, Result<Delta>>>> {
        let message = self.message.clone();
        Box::pin(async move { Err(TradegraphError::LlmRequest(message)) })
    }
}

#[derive(Debug, Clone)]
pub struct SessionRecord {
    pub subject_id: String,
    pub as_of: String,
    pub prompt: String,
    pub status: SessionStatus,
    pub messages: Vec<StoredMessage>,
}

/// In-memory session store.
#[derive(Default)]
pub struct MemoryStore {
    sessions: Mutex<HashMap<SessionId, SessionRecord>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn session(&self, sid: &SessionId) -> Option<SessionRecord> {
        self.sessions.lock().ok()?.get(sid).cloned()
    }

    pub fn session_ids(&self) -> Vec<SessionId> {
        self.sessions
            .lock()
            .map(|s| s.keys().cloned().collect())
            .unwrap_or_default()
    }
}

fn poisoned<T>(_: T) -> TradegraphError {
    TradegraphError::Database("store lock poisoned".into())
}

impl SessionStore for MemoryStore {
    fn create_session(
        &self,
        subject_id: &str,
        as_of: &str,
        prompt: &str,
    ) -> BoxFuture<'_, Result<SessionId>> {
        let record = SessionRecord {
            subject_id: subject_id.to_string(),
            as_of: as_of.to_string(),
            prompt: prompt.to_string(),
            status: SessionStatus::Running,
            messages: vec![],
        };
        Box::pin(async move {
            let sid = SessionId::new();
            self.sessions
                .lock()
                .map_err(poisoned)?
                .insert(sid.clone(), record);
            Ok(sid)
        })
    }

    fn save_message(&self, sid: &SessionId, record: MessageRecord) -> BoxFuture<'_, Result<u64>> {
        let sid = sid.clone();
        Box::pin(async move {
            let mut sessions = self.sessions.lock().map_err(poisoned)?;
            let session = sessions
                .get_mut(&sid)
                .ok_or_else(|| TradegraphError::Database(format!("unknown session {}", sid)))?;
            let seq = session.messages.len() as u64 + 1;
            session.messages.push(StoredMessage {
                seq,
                record,
                timestamp: chrono::Utc::now(),
            });
            Ok(seq)
        })
    }

    fn update_session_status(
        &self,
        sid: &SessionId,
        status: SessionStatus,
    ) -> BoxFuture<'_, Result<()>> {
        let sid = sid.clone();
        Box::pin(async move {
            let mut sessions = self.sessions.lock().map_err(poisoned)?;
            let session = sessions
                .get_mut(&sid)
                .ok_or_else(|| TradegraphError::Database(format!("unknown session {}", sid)))?;
            session.status = status;
            Ok(())
        })
    }

    fn load_messages(&self, sid: &SessionId) -> BoxFuture<'_, Result<Vec<StoredMessage>>> {
        let sid = sid.clone();
        Box::pin(async move {
            let sessions = self.sessions.lock().map_err(poisoned)?;
            Ok(sessions
                .get(&sid)
                .map(|s| s.messages.clone())
                .unwrap_or_default())
        })
    }
}

/// Store that accepts sessions but fails every write after that.
pub struct FailingStore {
    fail_create: bool,
}

impl FailingStore {
    /// `create_session` succeeds; message and status writes fail.
    pub fn writes() -> Self {
        Self { fail_create: false }
    }

    /// Every call fails.
    pub fn unavailable() -> Self {
        Self { fail_create: true }
    }
}

impl SessionStore for FailingStore {
    fn create_session(
        &self,
        _subject_id: &str,
        _as_of: &str,
        _prompt: &str,
    ) -> BoxFuture<'_, Result<SessionId>> {
        let fail = self.fail_create;
        Box::pin(async move {
            if fail {
                Err(TradegraphError::Database("database is locked".into()))
            } else {
                Ok(SessionId::new())
            }
        })
    }

    fn save_message(&self, _sid: &SessionId, _record: MessageRecord) -> BoxFuture<'_, Result<u64>> {
        Box::pin(async { Err(TradegraphError::Database("disk I/O error".into())) })
    }

    fn update_session_status(
        &self,
        _sid: &SessionId,
        _status: SessionStatus,
    ) -> BoxFuture<'_, Result<()>> {
        Box::pin(async { Err(TradegraphError::Database("disk I/O error".into())) })
    }

    fn load_messages(&self, _sid: &SessionId) -> BoxFuture<'_, Result<Vec<StoredMessage>>> {
        Box::pin(async { Err(TradegraphError::Database("disk I/O error".into())) })
    }
}

/// Notifier that records every notification.
#[derive(Default)]
pub struct RecordingNotifier {
    events: Mutex<Vec<(String, serde_json::Value)>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<(String, serde_json::Value)> {
        self.events.lock().map(|e| e.clone()).unwrap_or_default()
    }

    pub fn topics(&self) -> Vec<String> {
        self.events().into_iter().map(|(t, _)| t).collect()
    }
}

impl Notifier for RecordingNotifier {
    fn notify(&self, topic: &str, payload: serde_json::Value) {
        if let Ok(mut events) = self.events.lock() {
            events.push((topic.to_string(), payload));
        }
    }
}

/// Tool that always answers with the same text.
pub struct StaticTool {
    name: String,
    content: String,
}

impl StaticTool {
    pub fn new(name: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            content: content.into(),
        }
    }
}

impl Tool for StaticTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        "Returns a fixed response"
    }

    fn input_schema(&self) -> serde_json::Value {
        serde_json::json!({ "type": "object", "properties": {} })
    }

    fn execute(
        &self,
        _input: serde_json::Value,
        _ctx: ToolContext,
    ) -> BoxFuture<'_, Result<ToolResult>> {
        let content = self.content.clone();
        Box::pin(async move { Ok(ToolResult::success(content)) })
    }
}
