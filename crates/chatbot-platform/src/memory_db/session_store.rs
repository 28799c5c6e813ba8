//! Session metadata storage
use crate::memory_db::conversation_store::ConversationStore;
use crate::memory_db::schema::*;
use rusqlite::{params, Row, ToSql};
use chrono::Utc;
use tracing::{info, warn};
use std::sync::Arc;
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;

const SESSION_COLUMNS: &str = "id, user_id, project_id, created_at, title, model";

pub struct SessionStore {
    pool: Arc<Pool<SqliteConnectionManager>>,
}

impl SessionStore {
    pub fn new(pool: Arc<Pool<SqliteConnectionManager>>) -> Self {
        Self { pool }
    }

    fn get_conn(&self) -> anyhow::Result<r2d2::PooledConnection<SqliteConnectionManager>> {
        self.pool.get().map_err(|e| anyhow::anyhow!("Failed to get connection from pool: {}", e))
    }

    pub fn create_session(&self, session: &SessionRecord) -> anyhow::Result<()> {
        let conn = self.get_conn()?;
        conn.execute(
            "INSERT INTO sessions (id, user_id, project_id, created_at, title, model)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                &session.id,
                &session.user_id,
                &session.project_id,
                format_timestamp(&session.created_at),
                &session.title,
                &session.model,
            ],
        )?;

        info!("Created session with ID: {}", session.id);
        Ok(())
    }

    pub fn get_session(&self, session_id: &str) -> anyhow::Result<Option<SessionRecord>> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(&format!("SELECT {SESSION_COLUMNS} FROM sessions WHERE id = ?1"))?;
        let mut rows = stmt.query([session_id])?;

        if let Some(row) = rows.next()? {
            Ok(Some(Self::row_to_session(row)?))
        } else {
            Ok(None)
        }
    }

    pub fn get_user_sessions(&self, user_id: &str, project_id: Option<&str>) -> anyhow::Result<Vec<SessionRecord>> {
        let conn = self.get_conn()?;

        let mut query = format!("SELECT {SESSION_COLUMNS} FROM sessions WHERE user_id = ?1");
        let mut params: Vec<&dyn ToSql> = vec![&user_id];
        if let Some(ref project_id) = project_id {
            query.push_str(" AND project_id = ?2");
            params.push(project_id);
        }
        query.push_str(" ORDER BY created_at DESC");

        let mut stmt = conn.prepare(&query)?;
        let mut rows = stmt.query(rusqlite::params_from_iter(params))?;
        let mut sessions = Vec::new();
        while let Some(row) = rows.next()? {
            sessions.push(Self::row_to_session(row)?);
        }
        Ok(sessions)
    }

    pub fn update_session(&self, session_id: &str, update: &SessionUpdate) -> anyhow::Result<Option<SessionRecord>> {
        if !update.is_empty() {
            let conn = self.get_conn()?;
            let changed = conn.execute(
                "UPDATE sessions SET
                 title = COALESCE(?2, title),
                 model = COALESCE(?3, model)
                 WHERE id = ?1",
                params![session_id, update.title.as_deref(), update.model.as_deref()],
            )?;
            if changed == 0 {
                return Ok(None);
            }
            info!("Updated session {}", session_id);
        }
        self.get_session(session_id)
    }

    pub fn delete_session(&self, session_id: &str) -> anyhow::Result<usize> {
        let conn = self.get_conn()?;
        let deleted = conn.execute("DELETE FROM sessions WHERE id = ?1", [session_id])?;
        info!("Deleted session {} ({} rows)", session_id, deleted);
        Ok(deleted)
    }

    fn row_to_session(row: &Row) -> anyhow::Result<SessionRecord> {
        let created_at = ConversationStore::parse_datetime_safe(&row.get::<_, String>(3)?)
            .unwrap_or_else(|| { warn!("Failed parse created_at"); Utc::now() });

        Ok(SessionRecord {
            id: row.get(0)?,
            user_id: row.get(1)?,
            project_id: row.get(2)?,
            created_at,
            title: row.get(4)?,
            model: row.get(5)?,
        })
    }
}
