//! Memory database module - SQLite-based durable storage for sessions and messages
pub mod schema;
pub mod migration;
pub mod conversation_store;
pub mod session_store;
pub mod traits;

pub use schema::*;
pub use migration::MigrationManager;
pub use conversation_store::ConversationStore;
pub use session_store::SessionStore;
pub use traits::ChatStore;

use std::path::Path;
use std::sync::Arc;
use async_trait::async_trait;
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use tracing::info;

/// Pooled SQLite database backing the `ChatStore` capability
pub struct MemoryDatabase {
    pub conversations: ConversationStore,
    pub sessions: SessionStore,
    pool: Arc<Pool<SqliteConnectionManager>>,
}

impl MemoryDatabase {
    pub fn new(db_path: &Path) -> anyhow::Result<Self> {
        info!("Opening chat database at: {}", db_path.display());
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let manager = SqliteConnectionManager::file(db_path)
            .with_flags(
                rusqlite::OpenFlags::SQLITE_OPEN_READ_WRITE
                | rusqlite::OpenFlags::SQLITE_OPEN_CREATE
                | rusqlite::OpenFlags::SQLITE_OPEN_FULL_MUTEX,
            )
            .with_init(|conn| {
                conn.execute_batch(
                    "PRAGMA synchronous = NORMAL;
                     PRAGMA busy_timeout = 5000;",
                )
            });
        let pool = Pool::builder()
            .max_size(10)
            .build(manager)
            .map_err(|e| anyhow::anyhow!("Failed to create connection pool: {}", e))?;

        {
            let mut conn = pool.get()?;
            conn.execute_batch("PRAGMA journal_mode = WAL;")?;
            let mut migrator = MigrationManager::new(&mut conn);
            migrator.initialize_database()?;
        }
        info!("Chat database initialized successfully");
        Ok(Self::from_pool(Arc::new(pool)))
    }

    /// Single-connection in-memory database. Every pooled connection to
    /// `:memory:` would otherwise open its own empty database.
    pub fn new_in_memory() -> anyhow::Result<Self> {
        let manager = SqliteConnectionManager::memory();
        let pool = Pool::builder()
            .max_size(1)
            .build(manager)?;
        {
            let mut conn = pool.get()?;
            MigrationManager::new(&mut conn).initialize_database()?;
        }
        Ok(Self::from_pool(Arc::new(pool)))
    }

    fn from_pool(pool: Arc<Pool<SqliteConnectionManager>>) -> Self {
        Self {
            conversations: ConversationStore::new(Arc::clone(&pool)),
            sessions: SessionStore::new(Arc::clone(&pool)),
            pool,
        }
    }

    pub fn pool(&self) -> &Pool<SqliteConnectionManager> {
        &self.pool
    }

    pub fn get_stats(&self) -> anyhow::Result<DatabaseStats> {
        let conn = self.pool.get()?;
        Ok(migration::get_database_stats(&conn)?)
    }
}

#[async_trait]
impl ChatStore for MemoryDatabase {
    async fn insert_session(&self, session: &SessionRecord) -> anyhow::Result<()> {
        self.sessions.create_session(session)
    }

    async fn get_session(&self, session_id: &str) -> anyhow::Result<Option<SessionRecord>> {
        self.sessions.get_session(session_id)
    }

    async fn list_user_sessions(
        &self,
        user_id: &str,
        project_id: Option<&str>,
    ) -> anyhow::Result<Vec<SessionRecord>> {
        self.sessions.get_user_sessions(user_id, project_id)
    }

    async fn update_session(
        &self,
        session_id: &str,
        update: &SessionUpdate,
    ) -> anyhow::Result<Option<SessionRecord>> {
        self.sessions.update_session(session_id, update)
    }

    async fn delete_session(&self, session_id: &str) -> anyhow::Result<usize> {
        self.sessions.delete_session(session_id)
    }

    async fn insert_message(&self, message: &NewMessage) -> anyhow::Result<i64> {
        self.conversations.store_message(message)
    }

    async fn latest_summary(&self, session_id: &str) -> anyhow::Result<Option<StoredMessage>> {
        self.conversations.get_latest_summary(session_id)
    }

    async fn recent_conversation_messages(
        &self,
        session_id: &str,
        limit: usize,
    ) -> anyhow::Result<Vec<StoredMessage>> {
        self.conversations.get_recent_conversation(session_id, limit)
    }

    async fn session_messages(&self, session_id: &str) -> anyhow::Result<Vec<StoredMessage>> {
        self.conversations.get_session_messages(session_id)
    }

    async fn delete_session_messages(&self, session_id: &str) -> anyhow::Result<usize> {
        self.conversations.delete_session_messages(session_id)
    }
}

impl Drop for MemoryDatabase {
    fn drop(&mut self) {
        if let Ok(conn) = self.pool.get() {
            let _ = conn.execute_batch("PRAGMA wal_checkpoint(TRUNCATE);");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{mark_summary, Role};
    use chrono::{Duration, Utc};

    fn message_at(session_id: &str, role: Role, content: &str, offset_ms: i64) -> NewMessage {
        NewMessage {
            session_id: session_id.to_string(),
            role,
            content: content.to_string(),
            timestamp: Utc::now() + Duration::milliseconds(offset_ms),
        }
    }

    #[tokio::test]
    async fn test_session_round_trip_and_update() {
        let db = MemoryDatabase::new_in_memory().unwrap();
        let record = SessionRecord::new("s1", "u1", "p1", "model-a", None);
        db.insert_session(&record).await.unwrap();

        let loaded = db.get_session("s1").await.unwrap().unwrap();
        assert_eq!(loaded.title, DEFAULT_SESSION_TITLE);
        assert_eq!(loaded.model, "model-a");
        assert_eq!(loaded.project_id, "p1");

        let update = SessionUpdate { title: Some("Renamed".into()), model: None };
        let updated = db.update_session("s1", &update).await.unwrap().unwrap();
        assert_eq!(updated.title, "Renamed");
        assert_eq!(updated.model, "model-a");

        assert!(db.update_session("missing", &update).await.unwrap().is_none());
        assert!(db.get_session("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_duplicate_session_insert_fails() {
        let db = MemoryDatabase::new_in_memory().unwrap();
        let record = SessionRecord::new("s1", "u1", "p1", "m", None);
        db.insert_session(&record).await.unwrap();
        assert!(db.insert_session(&record).await.is_err());
    }

    #[tokio::test]
    async fn test_user_sessions_filtered_by_project() {
        let db = MemoryDatabase::new_in_memory().unwrap();
        db.insert_session(&SessionRecord::new("a", "u1", "p1", "m", None)).await.unwrap();
        db.insert_session(&SessionRecord::new("b", "u1", "p2", "m", None)).await.unwrap();
        db.insert_session(&SessionRecord::new("c", "u2", "p1", "m", None)).await.unwrap();

        assert_eq!(db.list_user_sessions("u1", None).await.unwrap().len(), 2);
        let p2 = db.list_user_sessions("u1", Some("p2")).await.unwrap();
        assert_eq!(p2.len(), 1);
        assert_eq!(p2[0].id, "b");
        assert!(db.list_user_sessions("nobody", None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_latest_summary_ignores_plain_system_rows() {
        let db = MemoryDatabase::new_in_memory().unwrap();
        db.insert_message(&message_at("s1", Role::System, &mark_summary("old"), 0)).await.unwrap();
        db.insert_message(&message_at("s1", Role::System, &mark_summary("new"), 10)).await.unwrap();
        db.insert_message(&message_at("s1", Role::System, "You are helpful", 20)).await.unwrap();
        db.insert_message(&message_at("s2", Role::System, &mark_summary("other"), 30)).await.unwrap();

        let summary = db.latest_summary("s1").await.unwrap().unwrap();
        assert_eq!(summary.content, mark_summary("new"));
        assert!(db.latest_summary("s3").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_summary_marker_match_is_case_sensitive() {
        let db = MemoryDatabase::new_in_memory().unwrap();
        let in_memory = crate::memory::InMemoryChatStore::new();
        let rows = [
            message_at("s1", Role::System, &mark_summary("real"), 0),
            message_at("s1", Role::System, "[summary] lowercase lookalike", 10),
        ];
        for row in &rows {
            db.insert_message(row).await.unwrap();
            in_memory.insert_message(row).await.unwrap();
        }

        let from_db = db.latest_summary("s1").await.unwrap().unwrap();
        let from_memory = in_memory.latest_summary("s1").await.unwrap().unwrap();
        assert_eq!(from_db.content, mark_summary("real"));
        assert_eq!(from_memory.content, from_db.content);
    }

    #[tokio::test]
    async fn test_recent_window_is_newest_first_and_skips_system() {
        let db = MemoryDatabase::new_in_memory().unwrap();
        for i in 0..6 {
            let role = if i % 2 == 0 { Role::User } else { Role::Assistant };
            db.insert_message(&message_at("s1", role, &format!("m{}", i), i * 10)).await.unwrap();
        }
        db.insert_message(&message_at("s1", Role::System, &mark_summary("sum"), 100)).await.unwrap();

        let recent = db.recent_conversation_messages("s1", 4).await.unwrap();
        let contents: Vec<_> = recent.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["m5", "m4", "m3", "m2"]);

        let history = db.session_messages("s1").await.unwrap();
        assert_eq!(history.len(), 7);
        assert_eq!(history[0].content, "m0");
        assert_eq!(history[6].role, Role::System);
    }

    #[tokio::test]
    async fn test_delete_only_touches_target_session() {
        let db = MemoryDatabase::new_in_memory().unwrap();
        db.insert_session(&SessionRecord::new("s1", "u", "p", "m", None)).await.unwrap();
        db.insert_session(&SessionRecord::new("s2", "u", "p", "m", None)).await.unwrap();
        db.insert_message(&message_at("s1", Role::User, "hi", 0)).await.unwrap();
        db.insert_message(&message_at("s2", Role::User, "hey", 0)).await.unwrap();

        assert_eq!(db.delete_session_messages("s1").await.unwrap(), 1);
        assert_eq!(db.delete_session("s1").await.unwrap(), 1);
        assert_eq!(db.delete_session("s1").await.unwrap(), 0);

        assert_eq!(db.session_messages("s2").await.unwrap().len(), 1);
        assert!(db.get_session("s2").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_file_database_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data").join("chat.db");
        {
            let db = MemoryDatabase::new(&path).unwrap();
            db.insert_session(&SessionRecord::new("s1", "u", "p", "m", Some("Kept"))).await.unwrap();
            db.insert_message(&message_at("s1", Role::User, "persisted", 0)).await.unwrap();
        }

        let db = MemoryDatabase::new(&path).unwrap();
        assert_eq!(db.get_session("s1").await.unwrap().unwrap().title, "Kept");
        assert_eq!(db.conversations.get_session_message_count("s1").unwrap(), 1);
        let stats = db.get_stats().unwrap();
        assert_eq!(stats.total_sessions, 1);
        assert_eq!(stats.total_messages, 1);
    }
}
