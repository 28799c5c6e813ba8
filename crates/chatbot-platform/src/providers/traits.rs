use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::Serialize;

use crate::context_engine::MemoryStats;
use crate::memory::Message;

/// A single request to a chat-completion endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct CompletionRequest {
    pub model: String,
    pub messages: Vec<Message>,
    pub temperature: f32,
    pub max_tokens: u32,
}

/// Text fragments of a streamed completion. Finite and single-pass.
pub type FragmentStream = BoxStream<'static, anyhow::Result<String>>;

/// Hosted language-model capability.
#[async_trait]
pub trait LanguageModel: Send + Sync {
    async fn complete(&self, request: CompletionRequest) -> anyhow::Result<String>;

    async fn stream(&self, request: CompletionRequest) -> anyhow::Result<FragmentStream>;
}

/// One session bound to one backend and one conversation memory.
///
/// Chat operations never fail: upstream problems come back as a reply (or a
/// single fragment) starting with [`ERROR_PREFIX`](crate::messages::ERROR_PREFIX).
#[async_trait]
pub trait ChatEngine: Send + Sync {
    async fn chat(&self, message: &str, system_prompt: Option<&str>) -> String;

    async fn chat_stream(&self, message: &str, system_prompt: Option<&str>) -> BoxStream<'static, String>;

    fn get_provider_name(&self) -> String;

    fn reset_conversation(&self);

    fn session_id(&self) -> &str;

    fn user_id(&self) -> &str;

    fn project_id(&self) -> &str;

    fn chat_model(&self) -> &str;

    fn memory_stats(&self) -> MemoryStats;
}
