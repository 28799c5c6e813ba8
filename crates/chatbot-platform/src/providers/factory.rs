use std::sync::Arc;
use tracing::debug;

use super::openai::{OpenAiProvider, SessionIdentity};
use super::traits::ChatEngine;
use crate::context_engine::{MemoryPersistence, Summarizer, SummarizationMemory};
use crate::shared_state::SharedState;

pub use crate::config::DEFAULT_MODEL;

/// Backend family a model identifier is served by.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderKind {
    OpenAiCompatible,
}

impl ProviderKind {
    /// Every identifier is currently routed through the OpenAI-compatible
    /// endpoint, which fronts all hosted vendors.
    pub fn for_model(_model: &str) -> Self {
        ProviderKind::OpenAiCompatible
    }
}

/// Trims `model`; blank names take `fallback`, and a blank fallback takes
/// [`DEFAULT_MODEL`].
pub fn normalize_model(model: &str, fallback: &str) -> String {
    [model, fallback]
        .iter()
        .map(|m| m.trim())
        .find(|m| !m.is_empty())
        .unwrap_or(DEFAULT_MODEL)
        .to_string()
}

#[derive(Debug, Clone)]
pub struct ProviderParams {
    pub session_id: String,
    pub user_id: String,
    pub project_id: String,
    pub chat_model: String,
    pub summary_model: String,
    /// Attach the session's memory to the durable store.
    pub enable_db: bool,
}

/// Builds an engine with a fresh memory. Blank model names take the
/// configured defaults. With `enable_db` the memory is rehydrated from the
/// store before this returns.
pub async fn create_provider(params: ProviderParams, state: &SharedState) -> Arc<dyn ChatEngine> {
    let chat_model = normalize_model(&params.chat_model, &state.config.default_chat_model);
    let summary_model = normalize_model(&params.summary_model, &state.config.default_summary_model);

    let persistence = params.enable_db.then(|| MemoryPersistence {
        store: Arc::clone(&state.store),
        pool: Arc::clone(&state.persistence),
    });
    let memory = SummarizationMemory::new(
        &params.session_id,
        state.memory_config.clone(),
        Summarizer::new(&summary_model, Arc::clone(&state.llm)),
        persistence,
    )
    .await;

    let identity = SessionIdentity {
        session_id: params.session_id,
        user_id: params.user_id,
        project_id: params.project_id,
    };

    match ProviderKind::for_model(&chat_model) {
        ProviderKind::OpenAiCompatible => {
            debug!("Creating OpenAI-compatible engine for {} with {}", identity.session_id, chat_model);
            Arc::new(OpenAiProvider::new(identity, &chat_model, Arc::clone(&state.llm), memory))
        }
    }
}
