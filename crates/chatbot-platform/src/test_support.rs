//! Scripted language-model double shared by the unit tests.
use async_trait::async_trait;
use futures::StreamExt;
use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use crate::providers::traits::{CompletionRequest, FragmentStream, LanguageModel};

enum StreamScript {
    Fragments(Vec<anyhow::Result<String>>),
    Refused(String),
}

/// Plays back queued replies in order. Once the queue is empty it answers
/// with the fallback reply, or fails when none is set.
#[derive(Default)]
pub struct ScriptedModel {
    replies: Mutex<VecDeque<anyhow::Result<String>>>,
    streams: Mutex<VecDeque<StreamScript>>,
    requests: Mutex<Vec<CompletionRequest>>,
    fallback: Option<String>,
    delay: Option<Duration>,
}

impl ScriptedModel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn always(reply: &str) -> Self {
        Self { fallback: Some(reply.to_string()), ..Self::default() }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn reply(&self, text: &str) {
        self.replies.lock().unwrap().push_back(Ok(text.to_string()));
    }

    pub fn fail(&self, reason: &str) {
        self.replies.lock().unwrap().push_back(Err(anyhow::anyhow!(reason.to_string())));
    }

    pub fn stream_reply(&self, fragments: &[&str]) {
        let fragments = fragments.iter().map(|f| Ok(f.to_string())).collect();
        self.streams.lock().unwrap().push_back(StreamScript::Fragments(fragments));
    }

    pub fn stream_broken_after(&self, fragments: &[&str], reason: &str) {
        let mut script: Vec<anyhow::Result<String>> =
            fragments.iter().map(|f| Ok(f.to_string())).collect();
        script.push(Err(anyhow::anyhow!(reason.to_string())));
        self.streams.lock().unwrap().push_back(StreamScript::Fragments(script));
    }

    pub fn stream_refused(&self, reason: &str) {
        self.streams.lock().unwrap().push_back(StreamScript::Refused(reason.to_string()));
    }

    pub fn requests(&self) -> Vec<CompletionRequest> {
        self.requests.lock().unwrap().clone()
    }

    fn record(&self, request: CompletionRequest) {
        self.requests.lock().unwrap().push(request);
    }
}

#[async_trait]
impl LanguageModel for ScriptedModel {
    async fn complete(&self, request: CompletionRequest) -> anyhow::Result<String> {
        self.record(request);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let next = self.replies.lock().unwrap().pop_front();
        match next {
            Some(reply) => reply,
            None => self
                .fallback
                .clone()
                .ok_or_else(|| anyhow::anyhow!("no scripted reply left")),
        }
    }

    async fn stream(&self, request: CompletionRequest) -> anyhow::Result<FragmentStream> {
        self.record(request);
        let next = self.streams.lock().unwrap().pop_front();
        match next {
            Some(StreamScript::Fragments(fragments)) => Ok(futures::stream::iter(fragments).boxed()),
            Some(StreamScript::Refused(reason)) => Err(anyhow::anyhow!(reason)),
            None => match self.fallback.clone() {
                Some(reply) => Ok(futures::stream::iter(vec![Ok(reply)]).boxed()),
                None => Err(anyhow::anyhow!("no scripted stream left")),
            },
        }
    }
}
