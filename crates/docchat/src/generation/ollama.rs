//! Ollama HTTP client: embeddings with retry, streaming chat over NDJSON

use bytes::Bytes;
use futures::stream::{self, BoxStream, Stream, StreamExt};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::time::Duration;
use tokio::time::sleep;

use crate::config::LlmConfig;
use crate::error::{Error, Result};
use crate::providers::TokenStream;
use crate::types::ChatMessage;

/// Ollama API client with automatic retry for embeddings
pub struct OllamaClient {
    /// HTTP client
    client: Client,
    /// Configuration
    config: LlmConfig,
}

/// Failure of one request attempt inside [`OllamaClient::retry_request`]
enum Attempt {
    /// Connection failures and 5xx responses
    Transient(Error),
    /// 4xx responses and malformed bodies
    Permanent(Error),
}

#[derive(Serialize)]
struct EmbedRequest<'a> {
    model: &'a str,
    prompt: &'a str,
}

#[derive(Deserialize)]
struct EmbedResponse {
    embedding: Vec<f32>,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    stream: bool,
    options: ChatOptions,
}

#[derive(Serialize)]
struct ChatOptions {
    temperature: f32,
}

/// One NDJSON line of a streaming `/api/chat` response
#[derive(Debug, Deserialize)]
struct ChatStreamLine {
    #[serde(default)]
    message: Option<ChatStreamMessage>,
    #[serde(default)]
    done: bool,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatStreamMessage {
    #[serde(default)]
    content: String,
}

impl OllamaClient {
    /// Create a new Ollama client
    pub fn new(config: &LlmConfig) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(config.timeout_secs))
            .pool_max_idle_per_host(5)
            .build()
            .map_err(|e| Error::config(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            config: config.clone(),
        })
    }

    pub fn embed_model(&self) -> &str {
        &self.config.embed_model
    }

    pub fn generate_model(&self) -> &str {
        &self.config.generate_model
    }

    /// Retry a request with exponential backoff
    ///
    /// Only [`Attempt::Transient`] failures are retried; a permanent failure
    /// is returned at once.
    async fn retry_request<F, Fut, T>(&self, operation: F) -> Result<T>
    where
        F: Fn() -> Fut,
        Fut: std::future::Future<Output = std::result::Result<T, Attempt>>,
    {
        let max_retries = self.config.max_retries;
        let mut attempt = 0;

        loop {
            match operation().await {
                Ok(result) => return Ok(result),
                Err(Attempt::Permanent(e)) => return Err(e),
                Err(Attempt::Transient(e)) if attempt >= max_retries => return Err(e),
                Err(Attempt::Transient(e)) => {
                    let delay = Duration::from_secs(2u64.pow(attempt));
                    tracing::warn!(
                        "Request failed (attempt {}/{}): {}; retrying in {:?}",
                        attempt + 1,
                        max_retries + 1,
                        e,
                        delay
                    );
                    sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }

    /// Check if Ollama is available
    pub async fn health_check(&self) -> Result<bool> {
        let url = format!("{}/api/tags", self.config.base_url);

        match self.client.get(&url).send().await {
            Ok(response) => Ok(response.status().is_success()),
            Err(_) => Ok(false),
        }
    }

    /// Generate an embedding using Ollama with retry
    pub async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let url = format!("{}/api/embeddings", self.config.base_url);
        let url = url.as_str();
        let client = &self.client;
        let model = self.config.embed_model.as_str();
        let timeout = Duration::from_secs(self.config.timeout_secs);

        self.retry_request(|| async move {
            let request = EmbedRequest {
                model,
                prompt: text,
            };

            let response = client
                .post(url)
                .timeout(timeout)
                .json(&request)
                .send()
                .await
                .map_err(|e| {
                    Attempt::Transient(Error::embedding(format!("Embedding request failed: {}", e)))
                })?;

            let status = response.status();
            if !status.is_success() {
                let body = response.text().await.unwrap_or_default();
                let error = Error::embedding(format!("Embedding failed: HTTP {} - {}", status, body));
                return Err(if status.is_server_error() {
                    Attempt::Transient(error)
                } else {
                    Attempt::Permanent(error)
                });
            }

            let embed_response: EmbedResponse = response.json().await.map_err(|e| {
                Attempt::Permanent(Error::embedding(format!(
                    "Failed to parse embedding response: {}",
                    e
                )))
            })?;

            if embed_response.embedding.is_empty() {
                return Err(Attempt::Permanent(Error::embedding(format!(
                    "Model '{}' returned an empty embedding",
                    model
                ))));
            }

            Ok(embed_response.embedding)
        })
        .await
    }

    /// Start a streaming chat completion (never retried)
    pub async fn chat_stream(&self, messages: &[ChatMessage]) -> Result<TokenStream> {
        let url = format!("{}/api/chat", self.config.base_url);
        let request = ChatRequest {
            model: &self.config.generate_model,
            messages,
            stream: true,
            options: ChatOptions {
                temperature: self.config.temperature,
            },
        };

        tracing::debug!(
            "Streaming chat with model {} ({} messages)",
            self.config.generate_model,
            messages.len()
        );

        let response = self
            .client
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(|e| Error::generation(format!("Chat request failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::generation(format!(
                "Chat failed: HTTP {} - {}",
                status, body
            )));
        }

        Ok(ndjson_tokens(response.bytes_stream()))
    }
}

/// Decoder state for [`ndjson_tokens`]
struct NdjsonDecoder {
    bytes: BoxStream<'static, std::result::Result<Bytes, String>>,
    buffer: Vec<u8>,
    pending: VecDeque<String>,
    saw_done: bool,
    eof: bool,
    finished: bool,
}

impl NdjsonDecoder {
    fn consume_line(&mut self, line: &[u8]) -> Result<()> {
        let line = String::from_utf8_lossy(line);
        let line = line.trim();
        if line.is_empty() {
            return Ok(());
        }

        let parsed = parse_chat_line(line)?;
        if let Some(token) = parsed.token {
            self.pending.push_back(token);
        }
        if parsed.done {
            self.saw_done = true;
            self.finished = true;
        }
        Ok(())
    }
}

/// Result of parsing one NDJSON line
#[derive(Debug, PartialEq)]
struct ParsedLine {
    token: Option<String>,
    done: bool,
}

fn parse_chat_line(line: &str) -> Result<ParsedLine> {
    let parsed: ChatStreamLine = serde_json::from_str(line)
        .map_err(|e| Error::generation(format!("Malformed stream line: {}", e)))?;

    if let Some(error) = parsed.error {
        return Err(Error::generation(format!("Model reported an error: {}", error)));
    }

    let token = parsed
        .message
        .map(|m| m.content)
        .filter(|content| !content.is_empty());

    Ok(ParsedLine {
        token,
        done: parsed.done,
    })
}

/// Turn a raw NDJSON byte stream into a token stream
///
/// Lines may be split across network chunks. The first error ends the stream,
/// and a body that ends without a `done` line is reported as truncated.
fn ndjson_tokens<S, E>(bytes: S) -> TokenStream
where
    S: Stream<Item = std::result::Result<Bytes, E>> + Send + 'static,
    E: std::fmt::Display,
{
    let decoder = NdjsonDecoder {
        bytes: bytes.map(|chunk| chunk.map_err(|e| e.to_string())).boxed(),
        buffer: Vec::new(),
        pending: VecDeque::new(),
        saw_done: false,
        eof: false,
        finished: false,
    };

    stream::unfold(decoder, |mut state| async move {
        loop {
            if let Some(token) = state.pending.pop_front() {
                return Some((Ok(token), state));
            }
            if state.finished {
                return None;
            }

            if let Some(pos) = state.buffer.iter().position(|&b| b == b'\n') {
                let line: Vec<u8> = state.buffer.drain(..=pos).collect();
                if let Err(e) = state.consume_line(&line) {
                    state.finished = true;
                    return Some((Err(e), state));
                }
                continue;
            }

            if state.eof {
                if !state.buffer.is_empty() {
                    let line = std::mem::take(&mut state.buffer);
                    if let Err(e) = state.consume_line(&line) {
                        state.finished = true;
                        return Some((Err(e), state));
                    }
                    continue;
                }
                state.finished = true;
                if !state.saw_done {
                    return Some((
                        Err(Error::generation("Stream ended before the model finished")),
                        state,
                    ));
                }
                continue;
            }

            match state.bytes.next().await {
                Some(Ok(chunk)) => state.buffer.extend_from_slice(&chunk),
                Some(Err(e)) => {
                    state.finished = true;
                    return Some((
                        Err(Error::generation(format!("Stream interrupted: {}", e))),
                        state,
                    ));
                }
                None => state.eof = true,
            }
        }
    })
    .boxed()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn chunks(parts: &[&str]) -> impl Stream<Item = std::result::Result<Bytes, std::io::Error>> {
        let owned: Vec<_> = parts
            .iter()
            .map(|p| Ok(Bytes::from(p.to_string())))
            .collect();
        stream::iter(owned)
    }

    async fn collect(stream: TokenStream) -> Vec<Result<String>> {
        stream.collect().await
    }

    #[test]
    fn test_parse_chat_line() {
        let line = r#"{"model":"m","message":{"role":"assistant","content":"Hel"},"done":false}"#;
        assert_eq!(
            parse_chat_line(line).unwrap(),
            ParsedLine {
                token: Some("Hel".to_string()),
                done: false
            }
        );

        let last = r#"{"model":"m","message":{"role":"assistant","content":""},"done":true}"#;
        assert_eq!(
            parse_chat_line(last).unwrap(),
            ParsedLine {
                token: None,
                done: true
            }
        );

        assert!(matches!(
            parse_chat_line(r#"{"error":"model not found"}"#),
            Err(Error::Generation(_))
        ));
        assert!(matches!(parse_chat_line("not json"), Err(Error::Generation(_))));
    }

    #[tokio::test]
    async fn test_lines_split_across_chunks() {
        let stream = ndjson_tokens(chunks(&[
            r#"{"message":{"content":"Dock "},"done":false}"#,
            "\n{\"message\":{\"con",
            r#"tent":"4"},"done":false}"#,
            "\n{\"done\":true}\n",
        ]));

        let tokens: Vec<String> = collect(stream)
            .await
            .into_iter()
            .map(|t| t.unwrap())
            .collect();
        assert_eq!(tokens, vec!["Dock ", "4"]);
    }

    #[tokio::test]
    async fn test_final_line_without_newline() {
        let stream = ndjson_tokens(chunks(&[
            "{\"message\":{\"content\":\"ok\"}}\n",
            r#"{"done":true}"#,
        ]));

        let items = collect(stream).await;
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].as_ref().unwrap(), "ok");
    }

    #[tokio::test]
    async fn test_truncated_stream_is_error() {
        let stream = ndjson_tokens(chunks(&["{\"message\":{\"content\":\"par\"}}\n"]));

        let items = collect(stream).await;
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].as_ref().unwrap(), "par");
        assert!(matches!(items[1], Err(Error::Generation(_))));
    }

    #[tokio::test]
    async fn test_error_line_ends_stream() {
        let stream = ndjson_tokens(chunks(&[
            "{\"message\":{\"content\":\"a\"}}\n{\"error\":\"out of memory\"}\n",
            "{\"message\":{\"content\":\"b\"}}\n{\"done\":true}\n",
        ]));

        let items = collect(stream).await;
        assert_eq!(items.len(), 2);
        assert!(items[0].is_ok());
        assert!(matches!(&items[1], Err(Error::Generation(msg)) if msg.contains("out of memory")));
    }

    #[tokio::test]
    async fn test_transport_error_ends_stream() {
        let parts: Vec<std::result::Result<Bytes, std::io::Error>> = vec![
            Ok(Bytes::from("{\"message\":{\"content\":\"a\"}}\n")),
            Err(std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset")),
        ];

        let items = collect(ndjson_tokens(stream::iter(parts))).await;
        assert_eq!(items.len(), 2);
        assert!(matches!(items[1], Err(Error::Generation(_))));
    }

    fn client_with_retries(max_retries: u32) -> OllamaClient {
        OllamaClient::new(&LlmConfig {
            max_retries,
            ..LlmConfig::default()
        })
        .unwrap()
    }

    #[tokio::test]
    async fn test_permanent_failure_is_not_retried() {
        let client = client_with_retries(2);
        let calls = &AtomicUsize::new(0);

        let result: Result<()> = client
            .retry_request(|| async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(Attempt::Permanent(Error::embedding(
                    "HTTP 404 - model \"nomic\" not found",
                )))
            })
            .await;

        assert!(matches!(result, Err(Error::Embedding(msg)) if msg.contains("404")));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_transient_failure_is_retried() {
        let client = client_with_retries(1);
        let calls = &AtomicUsize::new(0);

        let result = client
            .retry_request(|| async move {
                if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                    Err(Attempt::Transient(Error::embedding("HTTP 503")))
                } else {
                    Ok(vec![0.5f32])
                }
            })
            .await;

        assert_eq!(result.unwrap(), vec![0.5]);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_unreachable_server_is_generation_error() {
        let config = LlmConfig {
            base_url: "http://127.0.0.1:9".to_string(),
            timeout_secs: 1,
            ..LlmConfig::default()
        };
        let client = OllamaClient::new(&config).unwrap();

        let result = client.chat_stream(&[ChatMessage::user("hi")]).await;
        assert!(matches!(result, Err(Error::Generation(_))));
    }
}
