use crate::memory::{Role, SUMMARY_MARKER};
use crate::memory_db::schema::*;
use rusqlite::{params, Row};
use chrono::{DateTime, NaiveDateTime, Utc};
use tracing::{debug, info, warn};
use std::sync::Arc;
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;

const MESSAGE_COLUMNS: &str = "id, session_id, role, content, timestamp";

/// Message history storage
pub struct ConversationStore {
    pool: Arc<Pool<SqliteConnectionManager>>,
}

impl ConversationStore {
    pub fn new(pool: Arc<Pool<SqliteConnectionManager>>) -> Self {
        Self { pool }
    }

    fn get_conn(&self) -> anyhow::Result<r2d2::PooledConnection<SqliteConnectionManager>> {
        self.pool.get().map_err(|e| anyhow::anyhow!("Failed to get connection from pool: {}", e))
    }

    pub fn store_message(&self, message: &NewMessage) -> anyhow::Result<i64> {
        let conn = self.get_conn()?;
        conn.execute(
            "INSERT INTO messages (session_id, role, content, timestamp) VALUES (?1, ?2, ?3, ?4)",
            params![
                &message.session_id,
                message.role.as_str(),
                &message.content,
                format_timestamp(&message.timestamp),
            ],
        )?;

        let id = conn.last_insert_rowid();
        debug!("Stored {} message {} for session {}", message.role, id, message.session_id);
        Ok(id)
    }

    pub fn get_latest_summary(&self, session_id: &str) -> anyhow::Result<Option<StoredMessage>> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {MESSAGE_COLUMNS} FROM messages
             WHERE session_id = ?1 AND role = 'system' AND substr(content, 1, length(?2)) = ?2
             ORDER BY timestamp DESC, id DESC LIMIT 1"
        ))?;
        let mut rows = stmt.query(params![session_id, SUMMARY_MARKER])?;

        if let Some(row) = rows.next()? {
            Ok(Some(Self::row_to_stored_message(row)?))
        } else {
            Ok(None)
        }
    }

    pub fn get_recent_conversation(&self, session_id: &str, limit: usize) -> anyhow::Result<Vec<StoredMessage>> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {MESSAGE_COLUMNS} FROM messages
             WHERE session_id = ?1 AND role IN ('user', 'assistant')
             ORDER BY timestamp DESC, id DESC LIMIT ?2"
        ))?;
        let mut rows = stmt.query(params![session_id, limit as i64])?;
        let mut messages = Vec::new();
        while let Some(row) = rows.next()? { messages.push(Self::row_to_stored_message(row)?); }
        Ok(messages)
    }

    pub fn get_session_messages(&self, session_id: &str) -> anyhow::Result<Vec<StoredMessage>> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {MESSAGE_COLUMNS} FROM messages WHERE session_id = ?1 ORDER BY timestamp ASC, id ASC"
        ))?;
        let mut rows = stmt.query([session_id])?;
        let mut messages = Vec::new();
        while let Some(row) = rows.next()? { messages.push(Self::row_to_stored_message(row)?); }
        Ok(messages)
    }

    pub fn get_session_message_count(&self, session_id: &str) -> anyhow::Result<usize> {
        let conn = self.get_conn()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM messages WHERE session_id = ?1",
            [session_id],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    pub fn delete_session_messages(&self, session_id: &str) -> anyhow::Result<usize> {
        let conn = self.get_conn()?;
        let deleted = conn.execute("DELETE FROM messages WHERE session_id = ?1", [session_id])?;
        info!("Deleted {} messages for session {}", deleted, session_id);
        Ok(deleted)
    }

    pub(crate) fn parse_datetime_safe(datetime_str: &str) -> Option<DateTime<Utc>> {
        if let Ok(dt) = DateTime::parse_from_rfc3339(datetime_str) {
            return Some(dt.with_timezone(&Utc));
        }
        if let Ok(dt) = NaiveDateTime::parse_from_str(datetime_str, "%Y-%m-%d %H:%M:%S%.f") {
            return Some(DateTime::from_naive_utc_and_offset(dt, Utc));
        }
        if let Ok(dt) = NaiveDateTime::parse_from_str(datetime_str, "%Y-%m-%d %H:%M:%S") {
            return Some(DateTime::from_naive_utc_and_offset(dt, Utc));
        }
        None
    }

    fn row_to_stored_message(row: &Row) -> anyhow::Result<StoredMessage> {
        let role_str: String = row.get(2)?;
        let role: Role = role_str.parse()?;

        let timestamp = Self::parse_datetime_safe(&row.get::<_, String>(4)?)
            .unwrap_or_else(|| { warn!("Failed parse message timestamp"); Utc::now() });

        Ok(StoredMessage {
            id: row.get(0)?,
            session_id: row.get(1)?,
            role,
            content: row.get(3)?,
            timestamp,
        })
    }
}
