//! Ollama Backend Implementation
//!
//! Chat backend for Ollama (local LLM server).
//!
//! # Ollama API
//!
//! - `/api/chat` - Chat completions, streamed as newline-delimited JSON
//! - `/api/tags` - List available models
//!
//! Each streamed line carries `message.content` and a `done` flag. The final
//! line has `done: true` and usually empty content. Failures after the stream
//! has started arrive as a line with an `error` field.

use std::ops::ControlFlow;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use serde::Deserialize;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use super::traits::{BackendConfig, ChatBackend, ChatRequest, ModelInfo, StreamingToken};

/// Capacity of the per-request token channel
const TOKEN_CHANNEL_CAPACITY: usize = 100;

/// Ollama backend client
#[derive(Clone)]
pub struct OllamaBackend {
    /// Host address
    host: String,
    /// Port number
    port: u16,
    /// HTTP client
    http_client: reqwest::Client,
}

impl OllamaBackend {
    /// Create a new Ollama backend
    ///
    /// Only the connect phase has a timeout. Generations can legitimately run
    /// for minutes, so the response body is never cut off by the client.
    #[must_use]
    pub fn new(config: &BackendConfig) -> Self {
        let http_client = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout)
            .build()
            .unwrap_or_default();

        Self {
            host: config.host.clone(),
            port: config.port,
            http_client,
        }
    }

    /// Create from environment variables
    #[must_use]
    pub fn from_env() -> Self {
        Self::new(&BackendConfig::from_env())
    }

    /// Get the base URL
    #[must_use]
    pub fn base_url(&self) -> String {
        format!("http://{}:{}", self.host, self.port)
    }

    /// Get chat endpoint URL
    fn chat_url(&self) -> String {
        format!("{}/api/chat", self.base_url())
    }

    /// Get tags endpoint URL
    fn tags_url(&self) -> String {
        format!("{}/api/tags", self.base_url())
    }

    /// Build the JSON body for a streaming chat call
    fn chat_body(request: &ChatRequest) -> serde_json::Value {
        serde_json::json!({
            "model": request.model,
            "messages": [{ "role": "user", "content": request.prompt }],
            "stream": true,
        })
    }
}

impl Default for OllamaBackend {
    fn default() -> Self {
        Self::new(&BackendConfig::default())
    }
}

#[async_trait]
impl ChatBackend for OllamaBackend {
    fn name(&self) -> &'static str {
        "Ollama"
    }

    async fn health_check(&self) -> bool {
        match self
            .http_client
            .get(self.tags_url())
            .timeout(Duration::from_secs(5))
            .send()
            .await
        {
            Ok(response) => response.status().is_success(),
            Err(e) => {
                debug!(error = %e, url = %self.tags_url(), "Ollama health check failed");
                false
            }
        }
    }

    async fn open_stream(
        &self,
        request: &ChatRequest,
    ) -> anyhow::Result<mpsc::Receiver<StreamingToken>> {
        let response = self
            .http_client
            .post(self.chat_url())
            .json(&Self::chat_body(request))
            .send()
            .await?;

        // Check for HTTP errors
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("Ollama returned {status}: {}", error_message(&body));
        }

        let (tx, rx) = mpsc::channel(TOKEN_CHANNEL_CAPACITY);
        let mut stream = response.bytes_stream();
        let model = request.model.clone();

        // Spawn task to process stream
        tokio::spawn(async move {
            let mut lines = LineBuffer::default();

            loop {
                let chunk = tokio::select! {
                    () = tx.closed() => {
                        debug!(model = %model, "Token receiver dropped, closing Ollama stream");
                        return;
                    }
                    chunk = stream.next() => chunk,
                };

                match chunk {
                    Some(Ok(bytes)) => {
                        for line in lines.push(&bytes) {
                            if forward_line(&tx, &line).await.is_break() {
                                return;
                            }
                        }
                    }
                    Some(Err(e)) => {
                        let _ = tx.send(StreamingToken::Error(e.to_string())).await;
                        return;
                    }
                    None => break,
                }
            }

            // A final line without a trailing newline is still a valid chunk
            if let Some(line) = lines.finish() {
                if forward_line(&tx, &line).await.is_break() {
                    return;
                }
            }

            warn!(model = %model, "Ollama stream ended without a done marker");
            let _ = tx
                .send(StreamingToken::Error(
                    "stream ended before completion".to_string(),
                ))
                .await;
        });

        Ok(rx)
    }

    async fn list_models(&self) -> anyhow::Result<Vec<ModelInfo>> {
        let response = self
            .http_client
            .get(self.tags_url())
            .timeout(Duration::from_secs(10))
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("Ollama returned {status}: {}", error_message(&body));
        }

        let tags: TagsResponse = response.json().await?;

        Ok(tags
            .models
            .into_iter()
            .filter_map(|m| {
                let name = m.name.or(m.model)?;
                Some(ModelInfo {
                    name,
                    size: m.size,
                    parameters: m.details.and_then(|d| d.parameter_size),
                })
            })
            .collect())
    }
}

// ============================================================================
// Wire format
// ============================================================================

#[derive(Debug, Deserialize)]
struct ChatChunk {
    #[serde(default)]
    message: Option<ChatMessage>,
    #[serde(default)]
    done: bool,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TagsResponse {
    #[serde(default)]
    models: Vec<TagEntry>,
}

#[derive(Debug, Deserialize)]
struct TagEntry {
    name: Option<String>,
    model: Option<String>,
    size: Option<u64>,
    details: Option<TagDetails>,
}

#[derive(Debug, Deserialize)]
struct TagDetails {
    parameter_size: Option<String>,
}

/// Translate one NDJSON line into the tokens it carries
///
/// Unparseable lines yield nothing. A `done` line yields its trailing content
/// (when non-empty) followed by `Complete`.
fn parse_chat_line(line: &str) -> Vec<StreamingToken> {
    let chunk: ChatChunk = match serde_json::from_str(line) {
        Ok(chunk) => chunk,
        Err(e) => {
            warn!(error = %e, "Skipping malformed Ollama stream line");
            return Vec::new();
        }
    };

    if let Some(error) = chunk.error {
        return vec![StreamingToken::Error(error)];
    }

    let content = chunk
        .message
        .and_then(|m| m.content)
        .unwrap_or_default();

    if chunk.done {
        if content.is_empty() {
            vec![StreamingToken::Complete]
        } else {
            vec![StreamingToken::Token(content), StreamingToken::Complete]
        }
    } else {
        vec![StreamingToken::Token(content)]
    }
}

/// Send every token of a line; breaks once a terminal token went out or the
/// receiver is gone
async fn forward_line(tx: &mpsc::Sender<StreamingToken>, line: &str) -> ControlFlow<()> {
    for token in parse_chat_line(line) {
        let terminal = !matches!(token, StreamingToken::Token(_));
        if tx.send(token).await.is_err() || terminal {
            return ControlFlow::Break(());
        }
    }
    ControlFlow::Continue(())
}

/// Pull the `error` field out of an Ollama error body, falling back to the raw text
fn error_message(body: &str) -> String {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|v| v.get("error").and_then(|e| e.as_str()).map(String::from))
        .unwrap_or_else(|| body.trim().to_string())
}

/// Splits a byte stream into lines without breaking multi-byte characters
/// that straddle chunk boundaries
#[derive(Default)]
struct LineBuffer {
    pending: Vec<u8>,
}

impl LineBuffer {
    fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        self.pending.extend_from_slice(bytes);

        let mut lines = Vec::new();
        while let Some(pos) = self.pending.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.pending.drain(..=pos).collect();
            let text = String::from_utf8_lossy(&line);
            let text = text.trim();
            if !text.is_empty() {
                lines.push(text.to_string());
            }
        }
        lines
    }

    fn finish(&mut self) -> Option<String> {
        let rest = std::mem::take(&mut self.pending);
        let text = String::from_utf8_lossy(&rest).trim().to_string();
        (!text.is_empty()).then_some(text)
    }
}
