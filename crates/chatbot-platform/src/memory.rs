use serde::{Deserialize, Serialize};
use async_trait::async_trait;
use dashmap::DashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};

use crate::memory_db::{ChatStore, NewMessage, SessionRecord, SessionUpdate, StoredMessage};

/// Content prefix that marks a system row as a running-summary snapshot.
pub const SUMMARY_MARKER: &str = "[SUMMARY]";
pub const SUMMARY_PREFIX: &str = "[SUMMARY] ";

pub fn mark_summary(summary: &str) -> String {
    format!("{}{}", SUMMARY_PREFIX, summary)
}

pub fn is_summary(content: &str) -> bool {
    content.starts_with(SUMMARY_MARKER)
}

/// Strips the summary marker; content without it is returned unchanged.
pub fn strip_summary_marker(content: &str) -> &str {
    content
        .strip_prefix(SUMMARY_MARKER)
        .map(str::trim_start)
        .unwrap_or(content)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::System => "system",
        }
    }

    /// Capitalized label used when rendering transcripts.
    pub fn label(&self) -> &'static str {
        match self {
            Role::User => "User",
            Role::Assistant => "Assistant",
            Role::System => "System",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(Role::User),
            "assistant" => Ok(Role::Assistant),
            "system" => Ok(Role::System),
            other => Err(anyhow::anyhow!("Unknown message role: {}", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self { role, content: content.into() }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }

    /// `Role: content`, the line format used in context blocks and summarizer prompts.
    pub fn render_line(&self) -> String {
        format!("{}: {}", self.role.label(), self.content)
    }
}

/// Process-local `ChatStore` for runs without a database file.
#[derive(Clone, Default)]
pub struct InMemoryChatStore {
    sessions: Arc<DashMap<String, SessionRecord>>,
    messages: Arc<DashMap<String, Vec<StoredMessage>>>,
    next_id: Arc<AtomicI64>,
}

impl InMemoryChatStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn sorted_history(&self, session_id: &str) -> Vec<StoredMessage> {
        let mut history = match self.messages.get(session_id) {
            Some(history) => history.clone(),
            None => Vec::new(),
        };
        history.sort_by(|a, b| a.timestamp.cmp(&b.timestamp).then(a.id.cmp(&b.id)));
        history
    }
}

#[async_trait]
impl ChatStore for InMemoryChatStore {
    async fn insert_session(&self, session: &SessionRecord) -> anyhow::Result<()> {
        match self.sessions.entry(session.id.clone()) {
            dashmap::mapref::entry::Entry::Occupied(_) => {
                Err(anyhow::anyhow!("Session {} already exists", session.id))
            }
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(session.clone());
                Ok(())
            }
        }
    }

    async fn get_session(&self, session_id: &str) -> anyhow::Result<Option<SessionRecord>> {
        Ok(self.sessions.get(session_id).map(|s| s.clone()))
    }

    async fn list_user_sessions(
        &self,
        user_id: &str,
        project_id: Option<&str>,
    ) -> anyhow::Result<Vec<SessionRecord>> {
        let mut sessions: Vec<SessionRecord> = self
            .sessions
            .iter()
            .filter(|s| s.user_id == user_id && project_id.map_or(true, |p| s.project_id == p))
            .map(|s| s.clone())
            .collect();
        sessions.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(sessions)
    }

    async fn update_session(
        &self,
        session_id: &str,
        update: &SessionUpdate,
    ) -> anyhow::Result<Option<SessionRecord>> {
        Ok(self.sessions.get_mut(session_id).map(|mut session| {
            if let Some(ref title) = update.title {
                session.title = title.clone();
            }
            if let Some(ref model) = update.model {
                session.model = model.clone();
            }
            session.clone()
        }))
    }

    async fn delete_session(&self, session_id: &str) -> anyhow::Result<usize> {
        Ok(self.sessions.remove(session_id).map_or(0, |_| 1))
    }

    async fn insert_message(&self, message: &NewMessage) -> anyhow::Result<i64> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        let stored = StoredMessage {
            id,
            session_id: message.session_id.clone(),
            role: message.role,
            content: message.content.clone(),
            timestamp: message.timestamp,
        };
        self.messages.entry(message.session_id.clone()).or_default().push(stored);
        Ok(id)
    }

    async fn latest_summary(&self, session_id: &str) -> anyhow::Result<Option<StoredMessage>> {
        Ok(self
            .sorted_history(session_id)
            .into_iter()
            .rev()
            .find(|m| m.role == Role::System && is_summary(&m.content)))
    }

    async fn recent_conversation_messages(
        &self,
        session_id: &str,
        limit: usize,
    ) -> anyhow::Result<Vec<StoredMessage>> {
        Ok(self
            .sorted_history(session_id)
            .into_iter()
            .rev()
            .filter(|m| m.role != Role::System)
            .take(limit)
            .collect())
    }

    async fn session_messages(&self, session_id: &str) -> anyhow::Result<Vec<StoredMessage>> {
        Ok(self.sorted_history(session_id))
    }

    async fn delete_session_messages(&self, session_id: &str) -> anyhow::Result<usize> {
        Ok(self.messages.remove(session_id).map_or(0, |(_, history)| history.len()))
    }
}
