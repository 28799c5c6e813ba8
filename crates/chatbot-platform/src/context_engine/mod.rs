//! Context engine module - summarizing conversation memory

pub mod summarizer;
pub mod summarization_memory;

pub use summarizer::{build_summary_prompts, Summarizer};
pub use summarization_memory::{MemoryConfig, MemoryPersistence, MemoryStats, SummarizationMemory};
