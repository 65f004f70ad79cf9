//! DashScope backend implementation.
//!
//! Talks to the OpenAI-compatible chat completions endpoint, either in one
//! shot or as a server-sent event stream.

use super::{ChunkStream, GenerationParams};
use crate::config::API_KEY_ENV;
use crate::protocol::ChatMessage;
use anyhow::{anyhow, Context, Result};
use futures::{Stream, StreamExt};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::time::Duration;
use tracing::{debug, warn};

/// DashScope backend for Qwen models.
pub struct DashScopeBackend {
    pub model: String,
    base_url: String,
    api_key: Option<String>,
    max_retries: u32,
    client: Client,
}

impl DashScopeBackend {
    /// Create a new DashScope backend.
    pub fn new(
        base_url: String,
        model: String,
        api_key: Option<String>,
        timeout: Duration,
        max_retries: u32,
    ) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            model,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            max_retries,
            client,
        })
    }

    /// Get the API key from the environment or config.
    fn get_api_key(&self) -> Result<String> {
        std::env::var(API_KEY_ENV)
            .ok()
            .or_else(|| self.api_key.clone())
            .filter(|key| !key.trim().is_empty())
            .ok_or_else(|| {
                anyhow!(
                    "DashScope API key not found. Set {} environment variable \
                     or add api_key to the [backend] section of the config file.",
                    API_KEY_ENV
                )
            })
    }

    fn completions_url(&self) -> String {
        format!("{}/chat/completions", self.base_url)
    }

    /// Generate a complete answer.
    pub async fn complete(&self, messages: &[ChatMessage], params: GenerationParams) -> Result<String> {
        let request = self.request(messages, params, false);
        let response = self.send_with_retry(&request).await?;

        let completion: CompletionResponse = response
            .json()
            .await
            .context("Failed to parse DashScope response")?;

        // A choice with no content is an empty answer, not an error.
        let content = completion
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| anyhow!("Empty response from DashScope"))?
            .message
            .content
            .unwrap_or_default();

        Ok(content)
    }

    /// Generate an answer as a stream of fragments.
    pub async fn stream(&self, messages: &[ChatMessage], params: GenerationParams) -> Result<ChunkStream> {
        let request = self.request(messages, params, true);
        let response = self.send_with_retry(&request).await?;
        Ok(sse_chunks(response.bytes_stream().boxed()))
    }

    /// Check if the backend is usable.
    pub fn health_check(&self) -> Result<()> {
        // Just verify we have an API key
        self.get_api_key()?;
        Ok(())
    }

    fn request(&self, messages: &[ChatMessage], params: GenerationParams, stream: bool) -> CompletionRequest {
        CompletionRequest {
            model: self.model.clone(),
            messages: messages.to_vec(),
            stream,
            temperature: params.temperature,
            max_tokens: params.max_tokens,
        }
    }

    /// POST the request, retrying connect failures, timeouts, 429 and 5xx.
    async fn send_with_retry(&self, request: &CompletionRequest) -> Result<reqwest::Response> {
        let api_key = self.get_api_key()?;
        let url = self.completions_url();
        let mut attempt = 0;

        loop {
            let result = self
                .client
                .post(&url)
                .bearer_auth(&api_key)
                .json(request)
                .send()
                .await;

            match result {
                Ok(response) if response.status().is_success() => return Ok(response),
                Ok(response) if is_retryable(response.status()) && attempt < self.max_retries => {
                    warn!(
                        "DashScope returned {}, retrying ({}/{})",
                        response.status(),
                        attempt + 1,
                        self.max_retries
                    );
                }
                Ok(response) => return Err(api_error(response).await),
                Err(e) if (e.is_connect() || e.is_timeout()) && attempt < self.max_retries => {
                    warn!(
                        "DashScope request failed: {}, retrying ({}/{})",
                        e,
                        attempt + 1,
                        self.max_retries
                    );
                }
                Err(e) => return Err(anyhow!(e).context("Failed to connect to DashScope API")),
            }

            attempt += 1;
            tokio::time::sleep(backoff(attempt)).await;
        }
    }
}

fn is_retryable(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
}

fn backoff(attempt: u32) -> Duration {
    Duration::from_millis(500 * u64::from(attempt))
}

async fn api_error(response: reqwest::Response) -> anyhow::Error {
    let status = response.status();
    let body: Result<ApiError, _> = response.json().await;
    let message = body
        .map(|e| e.error.message)
        .unwrap_or_else(|_| "Unknown error".to_string());
    anyhow!("DashScope API request failed with status {}: {}", status, message)
}

/// One parsed line of a server-sent event stream.
#[derive(Debug, PartialEq)]
pub(crate) enum SseEvent {
    Content(String),
    Done,
    Skip,
}

pub(crate) fn parse_sse_line(line: &str) -> SseEvent {
    let Some(data) = line.strip_prefix("data:") else {
        return SseEvent::Skip;
    };
    let data = data.trim();
    if data == "[DONE]" {
        return SseEvent::Done;
    }
    match serde_json::from_str::<StreamChunk>(data) {
        Ok(chunk) => chunk
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.delta.content)
            .filter(|c| !c.is_empty())
            .map(SseEvent::Content)
            .unwrap_or(SseEvent::Skip),
        Err(e) => {
            debug!("Ignoring unparseable stream line: {}", e);
            SseEvent::Skip
        }
    }
}

struct SseState<S> {
    body: S,
    buf: Vec<u8>,
    pending: VecDeque<String>,
    done: bool,
}

impl<S> SseState<S> {
    /// Move every complete line in the buffer into `pending`.
    fn drain_lines(&mut self) {
        while let Some(pos) = self.buf.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.buf.drain(..=pos).collect();
            self.handle_line(&line);
            if self.done {
                self.buf.clear();
                return;
            }
        }
    }

    fn handle_line(&mut self, line: &[u8]) {
        let line = String::from_utf8_lossy(line);
        match parse_sse_line(line.trim_end_matches(['\r', '\n'])) {
            SseEvent::Content(content) => self.pending.push_back(content),
            SseEvent::Done => self.done = true,
            SseEvent::Skip => {}
        }
    }
}

/// Turn a raw SSE body into answer fragments.
pub(crate) fn sse_chunks<S, B, E>(body: S) -> ChunkStream
where
    S: Stream<Item = std::result::Result<B, E>> + Unpin + Send + 'static,
    B: AsRef<[u8]> + Send + 'static,
    E: std::error::Error + Send + Sync + 'static,
{
    let state = SseState {
        body,
        buf: Vec::new(),
        pending: VecDeque::new(),
        done: false,
    };

    futures::stream::unfold(state, |mut st| async move {
        loop {
            if let Some(content) = st.pending.pop_front() {
                return Some((Ok(content), st));
            }
            if st.done {
                return None;
            }
            match st.body.next().await {
                Some(Ok(bytes)) => {
                    st.buf.extend_from_slice(bytes.as_ref());
                    st.drain_lines();
                }
                Some(Err(e)) => {
                    st.done = true;
                    return Some((Err(anyhow!(e).context("DashScope stream interrupted")), st));
                }
                None => {
                    st.done = true;
                    let rest = std::mem::take(&mut st.buf);
                    if !rest.is_empty() {
                        st.handle_line(&rest);
                    }
                }
            }
        }
    })
    .boxed()
}

#[derive(Debug, Serialize)]
struct CompletionRequest {
    model: String,
    messages: Vec<ChatMessage>,
    stream: bool,
    temperature: f32,
    max_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct CompletionResponse {
    choices: Vec<CompletionChoice>,
}

#[derive(Debug, Deserialize)]
struct CompletionChoice {
    message: CompletionMessage,
}

#[derive(Debug, Deserialize)]
struct CompletionMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StreamChunk {
    choices: Vec<StreamChoice>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    delta: StreamDelta,
}

#[derive(Debug, Deserialize)]
struct StreamDelta {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    error: ApiErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ApiErrorDetail {
    message: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn data(content: &str) -> String {
        format!(
            "data: {{\"choices\":[{{\"delta\":{{\"content\":\"{}\"}}}}]}}\n\n",
            content
        )
    }

    #[test]
    fn test_parse_sse_line() {
        assert_eq!(
            parse_sse_line(data("hi").trim_end()),
            SseEvent::Content("hi".to_string())
        );
        assert_eq!(parse_sse_line("data: [DONE]"), SseEvent::Done);
        assert_eq!(parse_sse_line(": keep-alive"), SseEvent::Skip);
        assert_eq!(parse_sse_line(""), SseEvent::Skip);
        // Role-only deltas carry no content.
        assert_eq!(
            parse_sse_line(r#"data: {"choices":[{"delta":{"role":"assistant"}}]}"#),
            SseEvent::Skip
        );
    }

    #[tokio::test]
    async fn test_sse_chunks_across_split_frames() {
        let first = data("你好");
        let second = data("world");
        let body = format!("{}{}data: [DONE]\n\n{}", first, second, data("ignored"));
        let (a, b) = body.as_bytes().split_at(first.len() + 7);
        let parts: Vec<std::result::Result<Vec<u8>, std::io::Error>> =
            vec![Ok(a.to_vec()), Ok(b.to_vec())];

        let chunks: Vec<String> = sse_chunks(futures::stream::iter(parts))
            .map(|c| c.unwrap())
            .collect()
            .await;
        assert_eq!(chunks, vec!["你好", "world"]);
    }

    #[tokio::test]
    async fn test_sse_chunks_without_trailing_newline() {
        let body = data("tail");
        let parts: Vec<std::result::Result<Vec<u8>, std::io::Error>> =
            vec![Ok(body.trim_end().as_bytes().to_vec())];
        let chunks: Vec<String> = sse_chunks(futures::stream::iter(parts))
            .map(|c| c.unwrap())
            .collect()
            .await;
        assert_eq!(chunks, vec!["tail"]);
    }

    #[tokio::test]
    async fn test_sse_chunks_surface_body_errors() {
        let parts: Vec<std::result::Result<Vec<u8>, std::io::Error>> = vec![
            Ok(data("partial").into_bytes()),
            Err(std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset")),
        ];
        let results: Vec<Result<String>> = sse_chunks(futures::stream::iter(parts)).collect().await;
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].as_ref().unwrap(), "partial");
        assert!(results[1].is_err());
    }

    #[test]
    fn test_retryable_statuses() {
        assert!(is_retryable(StatusCode::TOO_MANY_REQUESTS));
        assert!(is_retryable(StatusCode::BAD_GATEWAY));
        assert!(!is_retryable(StatusCode::UNAUTHORIZED));
    }

    #[test]
    fn test_completions_url_trims_slash() {
        let backend = DashScopeBackend::new(
            "http://localhost:8080/v1/".into(),
            "qwen-turbo".into(),
            None,
            Duration::from_secs(1),
            0,
        )
        .unwrap();
        assert_eq!(backend.completions_url(), "http://localhost:8080/v1/chat/completions");
    }
}
