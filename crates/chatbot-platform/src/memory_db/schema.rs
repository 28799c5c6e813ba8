//! Database schema definitions for sessions and messages
use serde::{Deserialize, Serialize};
use chrono::{DateTime, SecondsFormat, Utc};

use crate::memory::Role;

/// Title given to sessions created without one.
pub const DEFAULT_SESSION_TITLE: &str = "New Chat";

/// Durable session metadata row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionRecord {
    pub id: String,
    pub user_id: String,
    pub project_id: String,
    pub created_at: DateTime<Utc>,
    pub title: String,
    pub model: String,
}

impl SessionRecord {
    pub fn new(id: &str, user_id: &str, project_id: &str, model: &str, title: Option<&str>) -> Self {
        Self {
            id: id.to_string(),
            user_id: user_id.to_string(),
            project_id: project_id.to_string(),
            created_at: Utc::now(),
            title: title.unwrap_or(DEFAULT_SESSION_TITLE).to_string(),
            model: model.to_string(),
        }
    }
}

/// Partial update applied to a session row. `None` fields are left untouched.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionUpdate {
    pub title: Option<String>,
    pub model: Option<String>,
}

impl SessionUpdate {
    pub fn is_empty(&self) -> bool {
        self.title.is_none() && self.model.is_none()
    }
}

/// A message row as written by the persistence workers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewMessage {
    pub session_id: String,
    pub role: Role,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

impl NewMessage {
    /// Stamps the message with the current time. Callers create it at submission
    /// time so the durable order follows the order turns were produced in.
    pub fn now(session_id: &str, role: Role, content: &str) -> Self {
        Self {
            session_id: session_id.to_string(),
            role,
            content: content.to_string(),
            timestamp: Utc::now(),
        }
    }
}

/// A message row read back from the store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredMessage {
    pub id: i64,
    pub session_id: String,
    pub role: Role,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

/// Row counts and file size, used by diagnostics.
#[derive(Debug, Clone, Default)]
pub struct DatabaseStats {
    pub total_sessions: i64,
    pub total_messages: i64,
    pub database_size_bytes: i64,
}

/// Fixed-width RFC 3339 so that lexical order in SQLite matches chronological order.
pub fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub const SCHEMA_SQL: &str = "
-- Sessions table
CREATE TABLE IF NOT EXISTS sessions (
    id TEXT PRIMARY KEY,
    user_id TEXT NOT NULL,
    project_id TEXT NOT NULL,
    created_at TEXT NOT NULL,
    title TEXT NOT NULL DEFAULT 'New Chat',
    model TEXT NOT NULL
);
-- Messages table. No foreign key: message writes are best-effort and may land
-- before (or without) the session row.
CREATE TABLE IF NOT EXISTS messages (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    session_id TEXT NOT NULL,
    role TEXT NOT NULL CHECK (role IN ('user', 'assistant', 'system')),
    content TEXT NOT NULL,
    timestamp TEXT NOT NULL
);
-- Indexes for performance
CREATE INDEX IF NOT EXISTS idx_sessions_user ON sessions (user_id, project_id);
CREATE INDEX IF NOT EXISTS idx_messages_session_ts ON messages (session_id, timestamp);
";
