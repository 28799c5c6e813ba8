//! Process-wide cache of live chat engines
//!
//! Reads go straight to the `DashMap`. Inserts, evictions and cold loads from
//! the store are serialized by one async lock, so an engine for a given id is
//! built at most once even when many requests race for it.
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::memory_db::{SessionRecord, SessionUpdate, StoredMessage};
use crate::metrics;
use crate::providers::{create_provider, normalize_model, ChatEngine, ProviderParams};
use crate::shared_state::SharedState;

#[derive(Debug, Clone, Default)]
pub struct CreateSessionParams {
    pub user_id: String,
    pub project_id: String,
    /// Generated (UUID v4) when absent or blank.
    pub session_id: Option<String>,
    /// Blank takes the configured default chat model.
    pub chat_model: String,
    /// Blank takes the configured default summary model.
    pub summary_model: String,
    pub enable_db: bool,
    pub title: Option<String>,
}

pub struct SessionManager {
    state: Arc<SharedState>,
    sessions: DashMap<String, Arc<dyn ChatEngine>>,
    cache_lock: Mutex<()>,
}

impl SessionManager {
    pub fn new(state: Arc<SharedState>) -> Self {
        info!("Session manager initialized");
        Self {
            state,
            sessions: DashMap::new(),
            cache_lock: Mutex::new(()),
        }
    }

    fn cached(&self, session_id: &str) -> Option<Arc<dyn ChatEngine>> {
        self.sessions.get(session_id).map(|engine| Arc::clone(engine.value()))
    }

    /// Returns the engine for an existing id (cached or stored), otherwise
    /// builds, records and caches a new one. An existing session keeps its
    /// owner, so callers must compare `user_id` before handing it out.
    pub async fn create_session(&self, params: CreateSessionParams) -> (String, Arc<dyn ChatEngine>) {
        let requested = params
            .session_id
            .map(|id| id.trim().to_string())
            .filter(|id| !id.is_empty());
        let explicit = requested.is_some();
        let session_id = requested.unwrap_or_else(|| Uuid::new_v4().to_string());

        if let Some(engine) = self.cached(&session_id) {
            debug!("Reusing cached session {}", session_id);
            return (session_id, engine);
        }

        let _guard = self.cache_lock.lock().await;
        if let Some(existing) = self.cached(&session_id) {
            debug!("Session {} was created concurrently; using the cached engine", session_id);
            return (session_id, existing);
        }

        if explicit {
            match self.restore_locked(&session_id).await {
                Ok(Some(engine)) => return (session_id, engine),
                Ok(None) => {}
                Err(e) => error!("Failed to check for existing session {}: {}", session_id, e),
            }
        }

        let config = &self.state.config;
        let chat_model = normalize_model(&params.chat_model, &config.default_chat_model);
        let summary_model = normalize_model(&params.summary_model, &config.default_summary_model);

        let engine = create_provider(
            ProviderParams {
                session_id: session_id.clone(),
                user_id: params.user_id.clone(),
                project_id: params.project_id.clone(),
                chat_model: chat_model.clone(),
                summary_model,
                enable_db: params.enable_db,
            },
            &self.state,
        )
        .await;

        if params.enable_db {
            let record = SessionRecord::new(
                &session_id,
                &params.user_id,
                &params.project_id,
                &chat_model,
                params.title.as_deref().filter(|t| !t.trim().is_empty()),
            );
            if let Err(e) = self.state.store.insert_session(&record).await {
                error!("Failed to persist session {}: {}", session_id, e);
            }
        }

        self.sessions.insert(session_id.clone(), Arc::clone(&engine));
        metrics::inc_sessions();
        info!("Created session {} for user {} with {}", session_id, params.user_id, chat_model);
        (session_id, engine)
    }

    /// Cache hit, or a single durable lookup followed by a rebuild.
    pub async fn get_session(&self, session_id: &str) -> Option<Arc<dyn ChatEngine>> {
        if let Some(engine) = self.cached(session_id) {
            return Some(engine);
        }

        let _guard = self.cache_lock.lock().await;
        if let Some(engine) = self.cached(session_id) {
            return Some(engine);
        }

        match self.restore_locked(session_id).await {
            Ok(Some(engine)) => Some(engine),
            Ok(None) => {
                debug!("Session {} not found", session_id);
                None
            }
            Err(e) => {
                error!("Failed to load session {}: {}", session_id, e);
                None
            }
        }
    }

    /// Rebuilds a stored session and caches it. Caller holds `cache_lock`.
    async fn restore_locked(&self, session_id: &str) -> anyhow::Result<Option<Arc<dyn ChatEngine>>> {
        let Some(record) = self.state.store.get_session(session_id).await? else {
            return Ok(None);
        };

        let engine = create_provider(
            ProviderParams {
                session_id: record.id.clone(),
                user_id: record.user_id.clone(),
                project_id: record.project_id.clone(),
                chat_model: record.model.clone(),
                summary_model: record.model.clone(),
                enable_db: true,
            },
            &self.state,
        )
        .await;

        self.sessions.insert(session_id.to_string(), Arc::clone(&engine));
        metrics::inc_sessions();
        info!("Restored session {} from storage", session_id);
        Ok(Some(engine))
    }

    /// Evicts the engine (if cached) and deletes the session's durable rows.
    /// Returns whether both deletes succeeded, including for ids that never
    /// existed. The cache lock is held throughout so a concurrent lookup
    /// cannot restore the session between eviction and deletion.
    pub async fn end_session(&self, session_id: &str) -> bool {
        let _guard = self.cache_lock.lock().await;
        if let Some((_, engine)) = self.sessions.remove(session_id) {
            engine.reset_conversation();
            metrics::dec_sessions();
        }

        // Queued writes would otherwise land after the delete.
        self.state.persistence.flush().await;

        let messages = self.state.store.delete_session_messages(session_id).await;
        let sessions = self.state.store.delete_session(session_id).await;
        match (messages, sessions) {
            (Ok(message_rows), Ok(session_rows)) => {
                if session_rows == 0 {
                    warn!("Ended session {} which had no stored record", session_id);
                }
                info!(
                    "Ended session {} ({} messages, {} session rows deleted)",
                    session_id, message_rows, session_rows
                );
                true
            }
            (messages, sessions) => {
                if let Err(e) = messages {
                    error!("Failed to delete messages for session {}: {}", session_id, e);
                }
                if let Err(e) = sessions {
                    error!("Failed to delete session {}: {}", session_id, e);
                }
                false
            }
        }
    }

    /// Newest first. Empty on store errors.
    pub async fn get_user_sessions(&self, user_id: &str, project_id: Option<&str>) -> Vec<SessionRecord> {
        match self.state.store.list_user_sessions(user_id, project_id).await {
            Ok(sessions) => sessions,
            Err(e) => {
                error!("Failed to list sessions for user {}: {}", user_id, e);
                Vec::new()
            }
        }
    }

    /// Oldest first. Empty on store errors.
    pub async fn get_session_history(&self, session_id: &str) -> Vec<StoredMessage> {
        match self.state.store.session_messages(session_id).await {
            Ok(messages) => messages,
            Err(e) => {
                error!("Failed to load history for session {}: {}", session_id, e);
                Vec::new()
            }
        }
    }

    /// Updates the stored record only; a cached engine keeps its model until
    /// it is evicted.
    pub async fn update_session(&self, session_id: &str, update: SessionUpdate) -> Option<SessionRecord> {
        let result = if update.is_empty() {
            self.state.store.get_session(session_id).await
        } else {
            self.state.store.update_session(session_id, &update).await
        };
        match result {
            Ok(record) => record,
            Err(e) => {
                error!("Failed to update session {}: {}", session_id, e);
                None
            }
        }
    }

    pub fn get_active_sessions(&self) -> Vec<String> {
        self.sessions.iter().map(|entry| entry.key().clone()).collect()
    }

    pub fn get_session_count(&self) -> usize {
        self.sessions.len()
    }

    pub fn shared_state(&self) -> &Arc<SharedState> {
        &self.state
    }
}
