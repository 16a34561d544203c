use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use rusqlite::{params, Connection, ErrorCode, OptionalExtension, TransactionBehavior};
use tracing::{debug, warn};

use tradegraph_core::error::{Result, TradegraphError};
use tradegraph_core::traits::SessionStore;
use tradegraph_core::types::{MessageRecord, Role, SessionId, SessionStatus, StoredMessage};

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS sessions (
        id TEXT PRIMARY KEY,
        subject_id TEXT NOT NULL,
        as_of TEXT NOT NULL,
        prompt TEXT NOT NULL,
        status TEXT NOT NULL,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL
    );

    CREATE TABLE IF NOT EXISTS messages (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        session_id TEXT NOT NULL REFERENCES sessions(id),
        seq INTEGER NOT NULL,
        role TEXT NOT NULL,
        agent TEXT NOT NULL,
        content TEXT NOT NULL,
        tool_calls TEXT NOT NULL DEFAULT '[]',
        tool_call_id TEXT,
        finish_reason TEXT,
        timestamp TEXT NOT NULL,
        UNIQUE(session_id, seq)
    );

    CREATE INDEX IF NOT EXISTS idx_sessions_created ON sessions(created_at);";

/// Attempts per message write before giving up on busy or conflicting writers.
const MAX_WRITE_ATTEMPTS: u32 = 4;
const RETRY_BASE_MS: u64 = 25;

/// Session header as stored.
#[derive(Debug, Clone)]
pub struct SessionSummary {
    pub id: SessionId,
    pub subject_id: String,
    pub as_of: String,
    pub prompt: String,
    pub status: SessionStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// SQLite-backed session store.
///
/// Each message gets the next per-session sequence number inside an
/// immediate transaction; `UNIQUE(session_id, seq)` catches writers from
/// other processes, and those conflicts are retried.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

fn db_err(e: impl std::fmt::Display) -> TradegraphError {
    TradegraphError::Database(e.to_string())
}

impl SqliteStore {
    /// Open or create a SQLite database at the given path.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| db_err(format!("Failed to create db directory: {}", e)))?;
        }

        let conn = Connection::open(path).map_err(db_err)?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")
            .map_err(db_err)?;
        conn.busy_timeout(Duration::from_secs(5)).map_err(db_err)?;
        conn.execute_batch(SCHEMA).map_err(db_err)?;

        debug!(path = %path.display(), "SQLite store opened");
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Open an in-memory database (for testing).
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(db_err)?;
        conn.execute_batch(SCHEMA).map_err(db_err)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Look up one session header.
    pub fn session(&self, sid: &SessionId) -> Result<Option<SessionSummary>> {
        let conn = self.conn.lock().map_err(db_err)?;
        conn.query_row(
            "SELECT id, subject_id, as_of, prompt, status, created_at, updated_at
             FROM sessions WHERE id = ?1",
            params![sid.0],
            read_summary,
        )
        .optional()
        .map_err(db_err)
    }

    /// Most recent sessions first.
    pub fn recent_sessions(&self, limit: usize) -> Result<Vec<SessionSummary>> {
        let conn = self.conn.lock().map_err(db_err)?;
        let mut stmt = conn
            .prepare(
                "SELECT id, subject_id, as_of, prompt, status, created_at, updated_at
                 FROM sessions ORDER BY created_at DESC LIMIT ?1",
            )
            .map_err(db_err)?;
        let rows = stmt
            .query_map(params![limit as i64], read_summary)
            .map_err(db_err)?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(db_err)
    }

    fn try_insert(
        &self,
        sid: &str,
        record: &MessageRecord,
        tool_calls: &str,
        timestamp: &str,
    ) -> Result<rusqlite::Result<u64>> {
        let mut conn = self.conn.lock().map_err(db_err)?;
        Ok(insert_message(&mut conn, sid, record, tool_calls, timestamp))
    }
}

fn insert_message(
    conn: &mut Connection,
    sid: &str,
    record: &MessageRecord,
    tool_calls: &str,
    timestamp: &str,
) -> rusqlite::Result<u64> {
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
    // Unknown sessions surface as QueryReturnedNoRows, which is not retried.
    tx.query_row("SELECT 1 FROM sessions WHERE id = ?1", params![sid], |_| Ok(()))?;
    let seq: i64 = tx.query_row(
        "SELECT COALESCE(MAX(seq), 0) + 1 FROM messages WHERE session_id = ?1",
        params![sid],
        |row| row.get(0),
    )?;
    tx.execute(
        "INSERT INTO messages
            (session_id, seq, role, agent, content, tool_calls, tool_call_id, finish_reason, timestamp)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        params![
            sid,
            seq,
            record.role.as_str(),
            record.agent,
            record.content,
            tool_calls,
            record.tool_call_id,
            record.finish_reason,
            timestamp,
        ],
    )?;
    tx.execute(
        "UPDATE sessions SET updated_at = ?2 WHERE id = ?1",
        params![sid, timestamp],
    )?;
    tx.commit()?;
    Ok(seq as u64)
}

fn is_retryable(e: &rusqlite::Error) -> bool {
    matches!(
        e,
        rusqlite::Error::SqliteFailure(err, _)
            if matches!(
                err.code,
                ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked | ErrorCode::ConstraintViolation
            )
    )
}

fn parse_ts(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

fn read_summary(row: &rusqlite::Row<'_>) -> rusqlite::Result<SessionSummary> {
    let id: String = row.get(0)?;
    let status: String = row.get(4)?;
    let created: String = row.get(5)?;
    let updated: String = row.get(6)?;
    Ok(SessionSummary {
        id: SessionId::from_str(&id),
        subject_id: row.get(1)?,
        as_of: row.get(2)?,
        prompt: row.get(3)?,
        status: SessionStatus::parse(&status).unwrap_or(SessionStatus::Failed),
        created_at: parse_ts(&created),
        updated_at: parse_ts(&updated),
    })
}

impl SessionStore for SqliteStore {
    fn create_session(
        &self,
        subject_id: &str,
        as_of: &str,
        prompt: &str,
    ) -> BoxFuture<'_, Result<SessionId>> {
        let subject_id = subject_id.to_string();
        let as_of = as_of.to_string();
        let prompt = prompt.to_string();

        Box::pin(async move {
            let sid = SessionId::new();
            let now = Utc::now().to_rfc3339();
            let conn = self.conn.lock().map_err(db_err)?;
            conn.execute(
                "INSERT INTO sessions (id, subject_id, as_of, prompt, status, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)",
                params![
                    sid.0,
                    subject_id,
                    as_of,
                    prompt,
                    SessionStatus::Running.as_str(),
                    now
                ],
            )
            .map_err(db_err)?;
            debug!(session_id = %sid, subject = %subject_id, "Session created");
            Ok(sid)
        })
    }

    fn save_message(&self, sid: &SessionId, record: MessageRecord) -> BoxFuture<'_, Result<u64>> {
        let sid = sid.0.clone();

        Box::pin(async move {
            let tool_calls = serde_json::to_string(&record.tool_calls)?;
            let timestamp = Utc::now().to_rfc3339();

            let mut attempt = 0;
            loop {
                attempt += 1;
                match self.try_insert(&sid, &record, &tool_calls, &timestamp)? {
                    Ok(seq) => return Ok(seq),
                    Err(e) if is_retryable(&e) && attempt < MAX_WRITE_ATTEMPTS => {
                        let delay = RETRY_BASE_MS << (attempt - 1);
                        warn!(session_id = %sid, attempt, delay_ms = delay, error = %e, "Message write conflict, retrying");
                        tokio::time::sleep(Duration::from_millis(delay)).await;
                    }
                    Err(e) => return Err(db_err(e)),
                }
            }
        })
    }

    fn update_session_status(
        &self,
        sid: &SessionId,
        status: SessionStatus,
    ) -> BoxFuture<'_, Result<()>> {
        let sid = sid.0.clone();

        Box::pin(async move {
            let conn = self.conn.lock().map_err(db_err)?;
            let updated = conn
                .execute(
                    "UPDATE sessions SET status = ?2, updated_at = ?3 WHERE id = ?1",
                    params![sid, status.as_str(), Utc::now().to_rfc3339()],
                )
                .map_err(db_err)?;
            if updated == 0 {
                return Err(db_err(format!("unknown session {}", sid)));
            }
            Ok(())
        })
    }

    fn load_messages(&self, sid: &SessionId) -> BoxFuture<'_, Result<Vec<StoredMessage>>> {
        let sid = sid.0.clone();

        Box::pin(async move {
            let conn = self.conn.lock().map_err(db_err)?;
            let mut stmt = conn
                .prepare(
                    "SELECT seq, role, agent, content, tool_calls, tool_call_id, finish_reason, timestamp
                     FROM messages
                     WHERE session_id = ?1
                     ORDER BY seq ASC",
                )
                .map_err(db_err)?;

            let rows = stmt
                .query_map(params![sid], |row| {
                    let seq: i64 = row.get(0)?;
                    let role: String = row.get(1)?;
                    let tool_calls: String = row.get(4)?;
                    let ts: String = row.get(7)?;
                    Ok((
                        seq,
                        role,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                        tool_calls,
                        row.get::<_, Option<String>>(5)?,
                        row.get::<_, Option<String>>(6)?,
                        ts,
                    ))
                })
                .map_err(db_err)?;

            let mut messages = Vec::new();
            for row in rows {
                let (seq, role, agent, content, tool_calls, tool_call_id, finish_reason, ts) =
                    row.map_err(db_err)?;
                messages.push(StoredMessage {
                    seq: seq as u64,
                    record: MessageRecord {
                        role: Role::parse(&role),
                        agent,
                        content,
                        tool_calls: serde_json::from_str(&tool_calls).unwrap_or_default(),
                        tool_call_id,
                        finish_reason,
                    },
                    timestamp: parse_ts(&ts),
                });
            }

            Ok(messages)
        })
    }
}
