//! Chat engine for OpenAI-compatible endpoints (OpenRouter and friends)
use async_trait::async_trait;
use futures::stream::{self, BoxStream};
use futures::StreamExt;
use std::sync::Arc;
use tracing::{debug, error, warn};

use crate::config::MAX_MESSAGE_LENGTH;
use crate::context_engine::{MemoryStats, SummarizationMemory};
use crate::memory::Message;
use crate::messages::{error_reply, ErrorMessages, NO_HISTORY_SENTINEL};
use crate::providers::traits::{ChatEngine, CompletionRequest, LanguageModel};

pub const CHAT_TEMPERATURE: f32 = 0.7;
pub const CHAT_MAX_TOKENS: u32 = 1000;

/// Who a session belongs to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionIdentity {
    pub session_id: String,
    pub user_id: String,
    pub project_id: String,
}

pub(crate) fn validate_message(message: &str) -> Result<(), String> {
    if message.trim().is_empty() {
        return Err(ErrorMessages::LLM_INVALID_MESSAGE_FORMAT.to_string());
    }
    let length = message.chars().count();
    if length > MAX_MESSAGE_LENGTH {
        return Err(format!(
            "Message is {} characters long; the limit is {}",
            length, MAX_MESSAGE_LENGTH
        ));
    }
    Ok(())
}

pub struct OpenAiProvider {
    identity: SessionIdentity,
    chat_model: String,
    llm: Arc<dyn LanguageModel>,
    memory: SummarizationMemory,
}

impl OpenAiProvider {
    pub fn new(
        identity: SessionIdentity,
        chat_model: &str,
        llm: Arc<dyn LanguageModel>,
        memory: SummarizationMemory,
    ) -> Self {
        Self {
            identity,
            chat_model: chat_model.to_string(),
            llm,
            memory,
        }
    }

    pub fn memory(&self) -> &SummarizationMemory {
        &self.memory
    }

    /// Optional system prompt, then the memory context when there is any,
    /// then the user turn.
    fn build_request(&self, message: &str, system_prompt: Option<&str>) -> CompletionRequest {
        let mut messages = Vec::with_capacity(3);
        if let Some(system) = system_prompt.filter(|s| !s.trim().is_empty()) {
            messages.push(Message::system(system));
        }

        let context = self.memory.get_context();
        if context != NO_HISTORY_SENTINEL {
            messages.push(Message::system(format!(
                "Context from previous conversation:\n{}",
                context
            )));
        }
        messages.push(Message::user(message));

        CompletionRequest {
            model: self.chat_model.clone(),
            messages,
            temperature: CHAT_TEMPERATURE,
            max_tokens: CHAT_MAX_TOKENS,
        }
    }
}

#[async_trait]
impl ChatEngine for OpenAiProvider {
    async fn chat(&self, message: &str, system_prompt: Option<&str>) -> String {
        if let Err(reason) = validate_message(message) {
            warn!("Rejected message for session {}: {}", self.identity.session_id, reason);
            return error_reply(reason);
        }

        let request = self.build_request(message, system_prompt);
        match self.llm.complete(request).await {
            Ok(reply) if reply.trim().is_empty() => {
                warn!("Empty completion for session {}", self.identity.session_id);
                error_reply(ErrorMessages::LLM_EMPTY_RESPONSE)
            }
            Ok(reply) => {
                self.memory.add_message(message, &reply);
                reply
            }
            Err(e) => {
                error!("{} for session {}: {}", ErrorMessages::LLM_RESPONSE_FAILED, self.identity.session_id, e);
                error_reply(e)
            }
        }
    }

    async fn chat_stream(&self, message: &str, system_prompt: Option<&str>) -> BoxStream<'static, String> {
        if let Err(reason) = validate_message(message) {
            warn!("Rejected message for session {}: {}", self.identity.session_id, reason);
            return stream::once(futures::future::ready(error_reply(reason))).boxed();
        }

        let request = self.build_request(message, system_prompt);
        let llm = Arc::clone(&self.llm);
        let memory = self.memory.clone();
        let message = message.to_string();

        let replies = async_stream::stream! {
            let mut fragments = match llm.stream(request).await {
                Ok(fragments) => fragments,
                Err(e) => {
                    error!("{} for session {}: {}", ErrorMessages::LLM_RESPONSE_FAILED, memory.session_id(), e);
                    yield error_reply(e);
                    return;
                }
            };

            let mut reply = String::new();
            while let Some(fragment) = fragments.next().await {
                match fragment {
                    Ok(text) => {
                        reply.push_str(&text);
                        yield text;
                    }
                    Err(e) => {
                        error!("Stream for session {} broke off: {}", memory.session_id(), e);
                        yield error_reply(e);
                        return;
                    }
                }
            }

            if reply.trim().is_empty() {
                debug!("Stream for session {} produced no text", memory.session_id());
            } else {
                memory.add_message(&message, &reply);
            }
        };
        replies.boxed()
    }

    fn get_provider_name(&self) -> String {
        format!("OpenAI,{}", self.chat_model)
    }

    fn reset_conversation(&self) {
        self.memory.clear();
    }

    fn session_id(&self) -> &str {
        &self.identity.session_id
    }

    fn user_id(&self) -> &str {
        &self.identity.user_id
    }

    fn project_id(&self) -> &str {
        &self.identity.project_id
    }

    fn chat_model(&self) -> &str {
        &self.chat_model
    }

    fn memory_stats(&self) -> MemoryStats {
        self.memory.stats()
    }
}
