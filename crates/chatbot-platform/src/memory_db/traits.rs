use async_trait::async_trait;

use crate::memory_db::schema::{NewMessage, SessionRecord, SessionUpdate, StoredMessage};

/// Durable storage for session metadata and message history.
///
/// The store is shared by every session engine in the process and by any other
/// process holding the same session identifiers, so callers treat it as the
/// authority and their own in-memory state as a cache.
#[async_trait]
pub trait ChatStore: Send + Sync {
    async fn insert_session(&self, session: &SessionRecord) -> anyhow::Result<()>;

    async fn get_session(&self, session_id: &str) -> anyhow::Result<Option<SessionRecord>>;

    /// Sessions owned by `user_id`, newest first, optionally narrowed to one project.
    async fn list_user_sessions(
        &self,
        user_id: &str,
        project_id: Option<&str>,
    ) -> anyhow::Result<Vec<SessionRecord>>;

    /// Returns the updated row, or `None` when the session does not exist.
    async fn update_session(
        &self,
        session_id: &str,
        update: &SessionUpdate,
    ) -> anyhow::Result<Option<SessionRecord>>;

    /// Returns the number of session rows removed.
    async fn delete_session(&self, session_id: &str) -> anyhow::Result<usize>;

    async fn insert_message(&self, message: &NewMessage) -> anyhow::Result<i64>;

    /// Most recent summary-marked system row for the session.
    async fn latest_summary(&self, session_id: &str) -> anyhow::Result<Option<StoredMessage>>;

    /// Up to `limit` of the newest user/assistant rows, newest first.
    async fn recent_conversation_messages(
        &self,
        session_id: &str,
        limit: usize,
    ) -> anyhow::Result<Vec<StoredMessage>>;

    /// Full history of the session, oldest first.
    async fn session_messages(&self, session_id: &str) -> anyhow::Result<Vec<StoredMessage>>;

    /// Returns the number of message rows removed.
    async fn delete_session_messages(&self, session_id: &str) -> anyhow::Result<usize>;
}
