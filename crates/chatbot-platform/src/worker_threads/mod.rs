pub mod llm_worker;
pub mod persistence_worker;

pub use llm_worker::LLMWorker;
pub use persistence_worker::{PersistCommand, PersistenceWorker};
