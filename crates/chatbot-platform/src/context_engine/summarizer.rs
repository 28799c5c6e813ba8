//! Stateless conversation summarizer backed by a language model
use std::sync::Arc;
use tracing::debug;

use crate::config::DEFAULT_MODEL;
use crate::memory::Message;
use crate::providers::traits::{CompletionRequest, LanguageModel};

pub const SUMMARY_TEMPERATURE: f32 = 0.3;
pub const SUMMARY_MAX_TOKENS: u32 = 500;

const MERGE_SYSTEM_PROMPT: &str = "You are a conversation summarizer. Create a concise, factual summary \
that preserves key information: names, dates, decisions, preferences, and context. \
Merge the previous summary with new messages into one coherent summary.";

const FRESH_SYSTEM_PROMPT: &str = "You are a conversation summarizer. Create a concise, factual summary \
that captures key information: names, dates, decisions, preferences, and context.";

/// Builds the `(system, user)` prompt pair for one summarization pass.
pub fn build_summary_prompts(previous_summary: Option<&str>, transcript: &str) -> (String, String) {
    match previous_summary.filter(|s| !s.trim().is_empty()) {
        Some(previous) => (
            MERGE_SYSTEM_PROMPT.to_string(),
            format!(
                "Previous Summary:\n{}\n\nNew Messages:\n{}\n\nProvide an updated summary that combines both:",
                previous, transcript
            ),
        ),
        None => (
            FRESH_SYSTEM_PROMPT.to_string(),
            format!("Conversation:\n{}\n\nProvide a summary:", transcript),
        ),
    }
}

pub struct Summarizer {
    model: String,
    llm: Arc<dyn LanguageModel>,
    temperature: f32,
    max_tokens: u32,
}

impl Summarizer {
    pub fn new(model: &str, llm: Arc<dyn LanguageModel>) -> Self {
        let model = if model.trim().is_empty() { DEFAULT_MODEL } else { model };
        Self {
            model: model.to_string(),
            llm,
            temperature: SUMMARY_TEMPERATURE,
            max_tokens: SUMMARY_MAX_TOKENS,
        }
    }

    pub fn with_sampling(mut self, temperature: f32, max_tokens: u32) -> Self {
        self.temperature = temperature;
        self.max_tokens = max_tokens;
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// Returns the trimmed completion. A blank completion is an error.
    pub async fn summarize(&self, prompt: &str, system_prompt: Option<&str>) -> anyhow::Result<String> {
        let mut messages = Vec::with_capacity(2);
        if let Some(system) = system_prompt {
            messages.push(Message::system(system));
        }
        messages.push(Message::user(prompt));

        debug!("Summarizing {} prompt chars with {}", prompt.len(), self.model);
        let summary = self.llm.complete(CompletionRequest {
            model: self.model.clone(),
            messages,
            temperature: self.temperature,
            max_tokens: self.max_tokens,
        }).await?;

        let summary = summary.trim();
        if summary.is_empty() {
            return Err(anyhow::anyhow!("Summarizer returned an empty summary"));
        }
        Ok(summary.to_string())
    }
}
