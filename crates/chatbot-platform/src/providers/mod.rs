//! Chat engines and the language-model capability they drive

pub mod factory;
pub mod openai;
pub mod traits;

pub use factory::{create_provider, normalize_model, ProviderKind, ProviderParams, DEFAULT_MODEL};
pub use openai::{OpenAiProvider, SessionIdentity};
pub use traits::{ChatEngine, CompletionRequest, FragmentStream, LanguageModel};
