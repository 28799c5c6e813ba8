pub mod config;
pub mod context_engine;
pub mod memory;
pub mod memory_db;
pub mod messages;
pub mod metrics;
pub mod providers;
pub mod session_manager;
pub mod shared_state;
pub mod telemetry;
pub mod thread_pool;
pub mod worker_threads;

#[cfg(feature = "cli")]
pub mod api;
#[cfg(feature = "cli")]
pub mod thread_server;

#[cfg(test)]
mod test_support;

// Public API exports
pub use config::Config;
pub use context_engine::{MemoryConfig, MemoryStats, SummarizationMemory, Summarizer};
pub use memory::{InMemoryChatStore, Message, Role};
pub use memory_db::{ChatStore, MemoryDatabase, SessionRecord, StoredMessage};
pub use providers::{create_provider, ChatEngine, LanguageModel, ProviderParams};
pub use session_manager::{CreateSessionParams, SessionManager};
pub use shared_state::SharedState;

#[cfg(feature = "cli")]
pub use thread_server::run_thread_server;
