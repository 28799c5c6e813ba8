//! OpenAI-compatible chat-completion client.
//!
//! Talks to any endpoint speaking the `/chat/completions` protocol (OpenRouter
//! by default), either as a single request/response or as a server-sent event
//! stream of text deltas.
use async_trait::async_trait;
use futures_util::StreamExt;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::memory::Message;
use crate::providers::traits::{CompletionRequest, FragmentStream, LanguageModel};

#[derive(Debug, Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: &'a [Message],
    max_tokens: u32,
    temperature: f32,
    stream: bool,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: Option<ChoiceMessage>,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StreamChunk {
    choices: Vec<StreamChoice>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    delta: Option<ChatDelta>,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
struct ChatDelta {
    content: Option<String>,
}

const DONE_SENTINEL: &str = "[DONE]";

pub struct LLMWorker {
    backend_url: String,
    api_key: Option<String>,
    http_client: reqwest::Client,
    /// Whole-request limit for completions; idle limit between stream chunks.
    timeout: Duration,
}

impl LLMWorker {
    pub fn new(backend_url: &str, api_key: Option<String>, timeout: Duration) -> Self {
        let backend_url = backend_url.trim_end_matches('/').to_string();
        info!("LLM worker initialized with backend: {}", backend_url);
        let http_client = match reqwest::Client::builder().connect_timeout(timeout).build() {
            Ok(client) => client,
            Err(e) => {
                warn!("Failed to build HTTP client ({}), using defaults without connect timeout", e);
                reqwest::Client::new()
            }
        };
        Self {
            backend_url,
            api_key: api_key.filter(|k| !k.is_empty()),
            http_client,
            timeout,
        }
    }

    fn completions_url(&self) -> String {
        format!("{}/chat/completions", self.backend_url)
    }

    async fn send(&self, request: &CompletionRequest, stream: bool) -> anyhow::Result<reqwest::Response> {
        let body = ChatCompletionRequest {
            model: &request.model,
            messages: &request.messages,
            max_tokens: request.max_tokens,
            temperature: request.temperature,
            stream,
        };

        let mut builder = self.http_client.post(self.completions_url()).json(&body);
        if let Some(ref key) = self.api_key {
            builder = builder.bearer_auth(key);
        }

        // Streams are bounded per chunk instead; only the headers wait here.
        let response = if stream {
            tokio::time::timeout(self.timeout, builder.send())
                .await
                .map_err(|_| anyhow::anyhow!("LLM backend did not respond within {:?}", self.timeout))?
        } else {
            builder.timeout(self.timeout).send().await
        }
        .map_err(|e| anyhow::anyhow!("LLM backend request failed: {}", e))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(anyhow::anyhow!("LLM backend returned {}: {}", status, body));
        }
        Ok(response)
    }
}

/// Splits a byte stream into complete lines. Bytes are only decoded once a
/// whole line is buffered, so multi-byte characters split across network
/// chunks survive intact.
#[derive(Debug, Default)]
struct LineBuffer {
    pending: Vec<u8>,
}

impl LineBuffer {
    fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.pending.extend_from_slice(chunk);
        let mut lines = Vec::new();
        while let Some(newline_pos) = self.pending.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.pending.drain(..=newline_pos).collect();
            lines.push(String::from_utf8_lossy(&line).trim().to_string());
        }
        lines
    }

    fn finish(self) -> String {
        String::from_utf8_lossy(&self.pending).trim().to_string()
    }
}

/// Pulls the text delta out of one SSE line. `Ok(None)` means "nothing to emit",
/// `Err(())` means the stream is finished.
fn parse_sse_line(line: &str) -> Result<Option<String>, ()> {
    let Some(data) = line.strip_prefix("data:") else {
        return Ok(None);
    };
    let data = data.trim();
    if data == DONE_SENTINEL {
        return Err(());
    }
    match serde_json::from_str::<StreamChunk>(data) {
        Ok(chunk) => {
            let text: String = chunk.choices.iter()
                .filter_map(|c| c.delta.as_ref().and_then(|d| d.content.clone()))
                .collect();
            let finished = chunk.choices.iter().any(|c| c.finish_reason.is_some());
            if finished && text.is_empty() {
                return Err(());
            }
            Ok(Some(text).filter(|t| !t.is_empty()))
        }
        Err(e) => {
            debug!("Skipping unparseable stream chunk: {}", e);
            Ok(None)
        }
    }
}

#[async_trait]
impl LanguageModel for LLMWorker {
    async fn complete(&self, request: CompletionRequest) -> anyhow::Result<String> {
        debug!("LLM worker generating response (non-streaming) with {}", request.model);
        let response = self.send(&request, false).await?;

        let completion: ChatCompletionResponse = response.json().await
            .map_err(|e| anyhow::anyhow!("Failed to parse LLM response: {}", e))?;

        Ok(completion.choices
            .into_iter()
            .next()
            .and_then(|c| c.message)
            .and_then(|m| m.content)
            .unwrap_or_default())
    }

    async fn stream(&self, request: CompletionRequest) -> anyhow::Result<FragmentStream> {
        debug!("LLM worker starting streaming response with {}", request.model);
        let response = self.send(&request, true).await?;

        let idle_timeout = self.timeout;
        let byte_stream = response.bytes_stream();
        let fragments = async_stream::try_stream! {
            let mut lines = LineBuffer::default();
            futures_util::pin_mut!(byte_stream);
            loop {
                let next = tokio::time::timeout(idle_timeout, byte_stream.next())
                    .await
                    .map_err(|_| anyhow::anyhow!("Stream stalled for {:?}", idle_timeout))?;
                let Some(chunk_result) = next else {
                    break;
                };
                let chunk = chunk_result
                    .map_err(|e| anyhow::anyhow!("Stream read error: {}", e))?;

                for line in lines.push(&chunk) {
                    match parse_sse_line(&line) {
                        Ok(Some(text)) => yield text,
                        Ok(None) => {}
                        Err(()) => return,
                    }
                }
            }
            if let Ok(Some(text)) = parse_sse_line(&lines.finish()) {
                yield text;
            }
        };
        Ok(fragments.boxed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    fn request() -> CompletionRequest {
        CompletionRequest {
            model: "test-model".to_string(),
            messages: vec![Message::user("hello")],
            temperature: 0.7,
            max_tokens: 100,
        }
    }

    #[test]
    fn test_parse_sse_line_variants() {
        let delta = r#"data: {"choices":[{"delta":{"content":"Hi"},"finish_reason":null}]}"#;
        assert_eq!(parse_sse_line(delta), Ok(Some("Hi".to_string())));
        assert_eq!(parse_sse_line("data: [DONE]"), Err(()));
        assert_eq!(parse_sse_line(": keep-alive"), Ok(None));
        assert_eq!(parse_sse_line("data: not-json"), Ok(None));
        let finished = r#"data: {"choices":[{"delta":{},"finish_reason":"stop"}]}"#;
        assert_eq!(parse_sse_line(finished), Err(()));
    }

    #[test]
    fn test_line_buffer_keeps_split_multibyte_chars() {
        let line = "data: {\"choices\":[{\"delta\":{\"content\":\"café\"},\"finish_reason\":null}]}\n";
        let bytes = line.as_bytes();
        // Cut between the two bytes of 'é' (0xC3 0xA9).
        let split = bytes.iter().position(|b| *b == 0xC3).unwrap() + 1;

        let mut lines = LineBuffer::default();
        assert!(lines.push(&bytes[..split]).is_empty());
        let complete = lines.push(&bytes[split..]);

        assert_eq!(complete.len(), 1);
        assert_eq!(parse_sse_line(&complete[0]), Ok(Some("café".to_string())));
        assert_eq!(lines.finish(), "");
    }

    #[test]
    fn test_line_buffer_returns_trailing_partial_line_on_finish() {
        let mut lines = LineBuffer::default();
        assert_eq!(lines.push(b"data: one\r\ndata: tw"), vec!["data: one".to_string()]);
        assert_eq!(lines.finish(), "data: tw");
    }

    #[tokio::test]
    async fn test_complete_parses_first_choice() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/chat/completions")
            .match_header("authorization", "Bearer secret")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"choices":[{"message":{"role":"assistant","content":"Hello there"}}]}"#)
            .create_async()
            .await;

        let worker = LLMWorker::new(&server.url(), Some("secret".into()), Duration::from_secs(5));
        let reply = worker.complete(request()).await.unwrap();

        assert_eq!(reply, "Hello there");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_complete_surfaces_http_errors() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/chat/completions")
            .with_status(429)
            .with_body("rate limited")
            .create_async()
            .await;

        let worker = LLMWorker::new(&server.url(), None, Duration::from_secs(5));
        let err = worker.complete(request()).await.unwrap_err();

        assert!(err.to_string().contains("429"));
    }

    #[tokio::test]
    async fn test_stream_yields_deltas_until_done() {
        let mut server = mockito::Server::new_async().await;
        let body = concat!(
            "data: {\"choices\":[{\"delta\":{\"content\":\"Hel\"},\"finish_reason\":null}]}\n\n",
            "data: {\"choices\":[{\"delta\":{\"content\":\"lo\"},\"finish_reason\":null}]}\n\n",
            "data: [DONE]\n\n",
            "data: {\"choices\":[{\"delta\":{\"content\":\"ignored\"},\"finish_reason\":null}]}\n\n",
        );
        server
            .mock("POST", "/chat/completions")
            .with_status(200)
            .with_header("content-type", "text/event-stream")
            .with_body(body)
            .create_async()
            .await;

        let worker = LLMWorker::new(&server.url(), None, Duration::from_secs(5));
        let fragments: Vec<String> = worker
            .stream(request())
            .await
            .unwrap()
            .map(|f| f.unwrap())
            .collect()
            .await;

        assert_eq!(fragments, vec!["Hel".to_string(), "lo".to_string()]);
    }
}
