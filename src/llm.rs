//! OpenAI-compatible chat completion client
//!
//! Talks to a self-hosted endpoint (vLLM, DashScope compatible mode, ...)
//! with a fixed model name, bearer token and base URL. Supports one-shot
//! completions and SSE streaming.

use std::collections::VecDeque;
use std::pin::Pin;
use std::task::{Context, Poll};

use futures::{Stream, StreamExt};
use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::config::EndpointConfig;
use crate::{Error, Result};

/// One message of a chat conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: "assistant".to_string(),
            content: content.into(),
        }
    }
}

/// Chat completion client for one OpenAI-compatible endpoint.
#[derive(Debug, Clone)]
pub struct LlmClient {
    http: Client,
    base_url: String,
    api_key: String,
    model: String,
}

impl LlmClient {
    /// Create a client with an explicit base URL, token and model.
    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        model: impl Into<String>,
    ) -> Result<Self> {
        let api_key = api_key.into();
        if api_key.trim().is_empty() {
            return Err(Error::Config("LLM API key is empty".to_string()));
        }

        let http = Client::builder()
            .user_agent("pgrag/0.1.0")
            .build()
            .map_err(|e| Error::Http(format!("HTTP client error: {}", e)))?;

        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
            model: model.into(),
        })
    }

    pub fn from_config(config: &EndpointConfig) -> Result<Self> {
        Self::new(&config.base_url, &config.api_key, &config.model)
    }

    /// Model name this client sends.
    pub fn model(&self) -> &str {
        &self.model
    }

    fn build_messages(
        &self,
        prompt: &str,
        system_prompt: Option<&str>,
        history: &[ChatMessage],
    ) -> Vec<ChatMessage> {
        let mut messages = Vec::with_capacity(history.len() + 2);
        if let Some(system) = system_prompt {
            messages.push(ChatMessage::system(system));
        }
        messages.extend_from_slice(history);
        messages.push(ChatMessage::user(prompt));
        messages
    }

    async fn post_completions(&self, request: &ChatRequest) -> Result<reqwest::Response> {
        let response = self
            .http
            .post(format!("{}/chat/completions", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(request)
            .send()
            .await
            .map_err(|e| Error::Http(format!("completion request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(Error::Api {
                status: status.as_u16(),
                message,
            });
        }
        Ok(response)
    }

    /// One-shot completion: returns the first choice's content.
    pub async fn complete(
        &self,
        prompt: &str,
        system_prompt: Option<&str>,
        history: &[ChatMessage],
    ) -> Result<String> {
        let request = ChatRequest {
            model: self.model.clone(),
            messages: self.build_messages(prompt, system_prompt, history),
            stream: false,
        };

        let response = self.post_completions(&request).await?;
        let chat_response: ChatResponse = response
            .json()
            .await
            .map_err(|e| Error::Serialization(format!("invalid completion response: {}", e)))?;

        chat_response
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| Error::EmptyResponse("completion".to_string()))
    }

    /// Streaming completion: yields content fragments as they arrive.
    pub async fn complete_stream(
        &self,
        prompt: &str,
        system_prompt: Option<&str>,
        history: &[ChatMessage],
    ) -> Result<CompletionStream> {
        let request = ChatRequest {
            model: self.model.clone(),
            messages: self.build_messages(prompt, system_prompt, history),
            stream: true,
        };

        let response = self.post_completions(&request).await?;
        let bytes = response
            .bytes_stream()
            .map(|chunk| chunk.map(|b| b.to_vec()))
            .boxed();

        Ok(CompletionStream {
            inner: bytes,
            buffer: SseBuffer::default(),
            pending: VecDeque::new(),
            done: false,
        })
    }
}

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    stream: bool,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StreamResponse {
    choices: Vec<StreamChoice>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    delta: StreamDelta,
}

#[derive(Debug, Default, Deserialize)]
struct StreamDelta {
    content: Option<String>,
}

#[derive(Debug, PartialEq)]
enum SseEvent {
    Delta(String),
    Done,
}

/// Reassembles SSE `data:` lines from arbitrarily split byte chunks.
#[derive(Debug, Default)]
struct SseBuffer {
    buf: Vec<u8>,
}

impl SseBuffer {
    fn feed(&mut self, chunk: &[u8]) -> Vec<SseEvent> {
        self.buf.extend_from_slice(chunk);
        let mut events = Vec::new();

        while let Some(pos) = self.buf.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.buf.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&line[..line.len() - 1]);
            if let Some(event) = parse_sse_line(line.trim_end_matches('\r')) {
                events.push(event);
            }
        }
        events
    }

    fn finish(&mut self) -> Vec<SseEvent> {
        if self.buf.is_empty() {
            return Vec::new();
        }
        let line = String::from_utf8_lossy(&std::mem::take(&mut self.buf)).to_string();
        parse_sse_line(line.trim_end_matches('\r'))
            .into_iter()
            .collect()
    }
}

fn parse_sse_line(line: &str) -> Option<SseEvent> {
    let payload = line.strip_prefix("data:")?.trim();
    if payload == "[DONE]" {
        return Some(SseEvent::Done);
    }

    let response: StreamResponse = serde_json::from_str(payload).ok()?;
    let content = response.choices.into_iter().next()?.delta.content?;
    if content.is_empty() {
        None
    } else {
        Some(SseEvent::Delta(content))
    }
}

type ByteStream = Pin<Box<dyn Stream<Item = std::result::Result<Vec<u8>, reqwest::Error>> + Send>>;

/// Stream of completion text fragments.
pub struct CompletionStream {
    inner: ByteStream,
    buffer: SseBuffer,
    pending: VecDeque<String>,
    done: bool,
}

impl CompletionStream {
    fn absorb(&mut self, events: Vec<SseEvent>) {
        for event in events {
            match event {
                SseEvent::Delta(text) => self.pending.push_back(text),
                SseEvent::Done => self.done = true,
            }
        }
    }
}

impl Stream for CompletionStream {
    type Item = Result<String>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        loop {
            if let Some(delta) = this.pending.pop_front() {
                return Poll::Ready(Some(Ok(delta)));
            }
            if this.done {
                return Poll::Ready(None);
            }

            match this.inner.as_mut().poll_next(cx) {
                Poll::Ready(Some(Ok(chunk))) => {
                    let events = this.buffer.feed(&chunk);
                    this.absorb(events);
                }
                Poll::Ready(Some(Err(e))) => {
                    this.done = true;
                    return Poll::Ready(Some(Err(Error::Http(format!("stream error: {}", e)))));
                }
                Poll::Ready(None) => {
                    let events = this.buffer.finish();
                    this.absorb(events);
                    this.done = true;
                }
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;
    use serde_json::json;

    fn client(server: &MockServer) -> LlmClient {
        LlmClient::new(server.base_url(), "test_key", "test-model").expect("client")
    }

    #[test]
    fn new_rejects_empty_key() {
        let err = LlmClient::new("http://localhost", "   ", "m").unwrap_err();
        assert!(err.to_string().contains("empty"));
    }

    #[test]
    fn new_trims_trailing_slash() {
        let client = LlmClient::new("http://host/v1/", "key", "m").unwrap();
        assert_eq!(client.base_url, "http://host/v1");
    }

    #[test]
    fn build_messages_orders_system_history_prompt() {
        let client = LlmClient::new("http://host", "key", "m").unwrap();
        let history = vec![ChatMessage::user("earlier"), ChatMessage::assistant("reply")];

        let messages = client.build_messages("now", Some("be brief"), &history);

        let roles: Vec<&str> = messages.iter().map(|m| m.role.as_str()).collect();
        assert_eq!(roles, ["system", "user", "assistant", "user"]);
        assert_eq!(messages.last().unwrap().content, "now");
    }

    #[test]
    fn build_messages_without_system_prompt() {
        let client = LlmClient::new("http://host", "key", "m").unwrap();
        let messages = client.build_messages("hi", None, &[]);
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].role, "user");
    }

    #[tokio::test]
    async fn complete_returns_first_choice_content() {
        let server = MockServer::start_async().await;

        let completion_mock = server.mock(|when, then| {
            when.method(POST)
                .path("/chat/completions")
                .header("Authorization", "Bearer test_key")
                .json_body_includes(r#"{"model": "test-model", "stream": false}"#);
            then.status(200).json_body(json!({
                "choices": [
                    { "message": { "role": "assistant", "content": "Hello!" } }
                ]
            }));
        });

        let reply = client(&server).complete("Hi", None, &[]).await.unwrap();

        assert_eq!(reply, "Hello!");
        completion_mock.assert_calls(1);
    }

    #[tokio::test]
    async fn complete_forwards_system_prompt_and_history() {
        let server = MockServer::start_async().await;

        let completion_mock = server.mock(|when, then| {
            when.method(POST).path("/chat/completions").is_true(|req| {
                let body = String::from_utf8_lossy(req.body().as_ref());
                body.contains("you are a helper") && body.contains("earlier turn")
            });
            then.status(200).json_body(json!({
                "choices": [
                    { "message": { "role": "assistant", "content": "ok" } }
                ]
            }));
        });

        let history = vec![ChatMessage::user("earlier turn")];
        let reply = client(&server)
            .complete("now", Some("you are a helper"), &history)
            .await
            .unwrap();

        assert_eq!(reply, "ok");
        completion_mock.assert_calls(1);
    }

    #[tokio::test]
    async fn complete_returns_api_error_on_non_success() {
        let server = MockServer::start_async().await;

        server.mock(|when, then| {
            when.method(POST).path("/chat/completions");
            then.status(429).body("rate limited");
        });

        let err = client(&server).complete("Hi", None, &[]).await.unwrap_err();

        let msg = err.to_string();
        assert!(msg.contains("429"));
        assert!(msg.contains("rate limited"));
    }

    #[tokio::test]
    async fn complete_returns_error_on_empty_choices() {
        let server = MockServer::start_async().await;

        server.mock(|when, then| {
            when.method(POST).path("/chat/completions");
            then.status(200).json_body(json!({ "choices": [] }));
        });

        let err = client(&server).complete("Hi", None, &[]).await.unwrap_err();
        assert!(matches!(err, Error::EmptyResponse(_)));
    }

    #[tokio::test]
    async fn complete_stream_yields_deltas_in_order() {
        let server = MockServer::start_async().await;

        let body = concat!(
            "data: {\"choices\":[{\"delta\":{\"content\":\"Hel\"}}]}\n\n",
            "data: {\"choices\":[{\"delta\":{\"content\":\"lo\"}}]}\n\n",
            "data: {\"choices\":[{\"delta\":{}}]}\n\n",
            "data: [DONE]\n\n",
        );
        server.mock(|when, then| {
            when.method(POST)
                .path("/chat/completions")
                .json_body_includes(r#"{"stream": true}"#);
            then.status(200)
                .header("Content-Type", "text/event-stream")
                .body(body);
        });

        let stream = client(&server)
            .complete_stream("Hi", None, &[])
            .await
            .unwrap();
        let fragments: Vec<String> = stream.map(|f| f.unwrap()).collect().await;

        assert_eq!(fragments, ["Hel", "lo"]);
    }

    #[test]
    fn sse_buffer_reassembles_split_frames() {
        let mut buffer = SseBuffer::default();

        let first = buffer.feed(b"data: {\"choices\":[{\"delta\":{\"con");
        assert!(first.is_empty());

        let second = buffer.feed(b"tent\":\"chunk\"}}]}\n\ndata: [DONE]\n");
        assert_eq!(
            second,
            vec![SseEvent::Delta("chunk".to_string()), SseEvent::Done]
        );
    }

    #[test]
    fn sse_buffer_finish_flushes_trailing_line() {
        let mut buffer = SseBuffer::default();
        buffer.feed(b"data: {\"choices\":[{\"delta\":{\"content\":\"tail\"}}]}");

        let events = buffer.finish();
        assert_eq!(events, vec![SseEvent::Delta("tail".to_string())]);
        assert!(buffer.finish().is_empty());
    }

    #[test]
    fn parse_sse_line_ignores_noise() {
        assert_eq!(parse_sse_line(""), None);
        assert_eq!(parse_sse_line(": keep-alive"), None);
        assert_eq!(parse_sse_line("event: ping"), None);
        assert_eq!(parse_sse_line("data: not json"), None);
        assert_eq!(parse_sse_line("data: [DONE]"), Some(SseEvent::Done));
    }
}
