//! Process-wide context handed to the session manager and provider factory
//!
//! Built once by the entry point and passed down explicitly; nothing in the
//! crate reaches for a global client or cache.

use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::{
    config::Config,
    context_engine::MemoryConfig,
    memory_db::{ChatStore, MemoryDatabase},
    providers::traits::LanguageModel,
    thread_pool::{PersistencePool, ThreadPoolConfig},
    worker_threads::LLMWorker,
};

pub struct SharedState {
    /// Configuration (read-only after initialization)
    pub config: Arc<Config>,

    pub memory_config: MemoryConfig,

    /// Durable store shared by every session
    pub store: Arc<dyn ChatStore>,

    /// Language-model client used for chat and summarization
    pub llm: Arc<dyn LanguageModel>,

    /// Background writers for message and summary rows
    pub persistence: Arc<PersistencePool>,
}

impl SharedState {
    /// Opens the configured database (falling back to an in-memory one when
    /// the file cannot be opened) and connects the OpenAI-compatible client.
    pub fn new(config: Config) -> anyhow::Result<Self> {
        info!("Initializing shared state");

        let database = match config.database_file() {
            Some(path) => MemoryDatabase::new(&path).or_else(|e| {
                warn!("Failed to open database at {}: {}. Falling back to in-memory storage.", path.display(), e);
                MemoryDatabase::new_in_memory()
            })?,
            None => MemoryDatabase::new_in_memory()?,
        };

        let llm = LLMWorker::new(
            &config.openrouter_url,
            config.openrouter_api_key.clone(),
            Duration::from_secs(config.llm_timeout_seconds),
        );

        Self::with_components(config, Arc::new(database), Arc::new(llm))
    }

    /// Wires explicit store and model implementations together.
    pub fn with_components(
        config: Config,
        store: Arc<dyn ChatStore>,
        llm: Arc<dyn LanguageModel>,
    ) -> anyhow::Result<Self> {
        let memory_config = MemoryConfig::from_config(&config);
        let persistence = PersistencePool::start(ThreadPoolConfig::new(&config), Arc::clone(&store))?;

        Ok(Self {
            config: Arc::new(config),
            memory_config,
            store,
            llm,
            persistence: Arc::new(persistence),
        })
    }

    /// Waits for outstanding writes and stops the persistence workers.
    pub async fn shutdown(&self) {
        self.persistence.shutdown().await;
    }
}
