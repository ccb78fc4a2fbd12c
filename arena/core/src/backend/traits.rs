//! Chat Backend Traits
//!
//! Trait definitions for the model-serving backends the arena fans out to.
//! The fan-in engine treats a backend as an opaque capability: "open a chat
//! stream for model M with prompt P". Everything provider-specific (wire
//! format, endpoints, connection handling) stays behind [`ChatBackend`].
//!
//! # Design Philosophy
//!
//! The trait provides a common interface for:
//! - Opening a streaming chat completion for one model
//! - Health checking the backend
//! - Listing the models the backend can serve

use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;

/// Token stream items produced by a backend for one chat request
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StreamingToken {
    /// A fragment of the response (may be empty)
    Token(String),
    /// The backend signalled the end of the response
    Complete,
    /// The backend failed after the stream was opened
    Error(String),
}

/// A single-turn chat request for one model
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChatRequest {
    /// Model identifier (backend-specific)
    pub model: String,
    /// The user prompt
    pub prompt: String,
}

impl ChatRequest {
    /// Create a new request with model and prompt
    pub fn new(model: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            prompt: prompt.into(),
        }
    }
}

/// Information about an available model
#[derive(Clone, Debug, PartialEq)]
pub struct ModelInfo {
    /// Model identifier, as accepted by [`ChatRequest::model`]
    pub name: String,
    /// Model size in bytes (if known)
    pub size: Option<u64>,
    /// Parameter count label, e.g. "7B" (if known)
    pub parameters: Option<String>,
}

/// Chat backend trait
///
/// Implement this trait to plug a different model server into the arena.
#[async_trait]
pub trait ChatBackend: Send + Sync {
    /// Get the backend name (e.g., "Ollama")
    fn name(&self) -> &str;

    /// Check if the backend is healthy and reachable
    async fn health_check(&self) -> bool;

    /// Open a streaming chat response
    ///
    /// Returns a channel receiver that yields tokens as they arrive and ends
    /// with exactly one [`StreamingToken::Complete`] or [`StreamingToken::Error`].
    /// Failing to open the stream at all is reported through the `Err` variant.
    /// Dropping the receiver must release the underlying connection.
    async fn open_stream(
        &self,
        request: &ChatRequest,
    ) -> anyhow::Result<mpsc::Receiver<StreamingToken>>;

    /// List available models
    async fn list_models(&self) -> anyhow::Result<Vec<ModelInfo>>;
}

/// Backend connection configuration
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BackendConfig {
    /// Ollama host address
    pub host: String,
    /// Ollama port number
    pub port: u16,
    /// TCP connect timeout for every backend call
    pub connect_timeout: Duration,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 11434,
            connect_timeout: Duration::from_secs(5),
        }
    }
}

impl BackendConfig {
    /// Create Ollama configuration
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            ..Default::default()
        }
    }

    /// Create configuration from `OLLAMA_HOST` / `OLLAMA_PORT`
    ///
    /// `OLLAMA_HOST` follows the Ollama CLI convention and may be a bare host,
    /// `host:port`, or a full `http://host:port` URL. An explicit
    /// `OLLAMA_PORT` wins over a port embedded in the host.
    #[must_use]
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_env_with(|key| std::env::var(key).ok());
        config
    }

    /// Apply `OLLAMA_HOST` / `OLLAMA_PORT` values from a variable lookup
    pub(crate) fn apply_env_with(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(raw) = lookup("OLLAMA_HOST") {
            let (host, port) = split_host_port(&raw);
            if !host.is_empty() {
                self.host = host;
            }
            if let Some(port) = port {
                self.port = port;
            }
        }

        if let Some(port) = lookup("OLLAMA_PORT").and_then(|p| p.parse().ok()) {
            self.port = port;
        }
    }
}

/// Split `http://host:port`, `host:port`, or `host` into its parts
pub(crate) fn split_host_port(raw: &str) -> (String, Option<u16>) {
    let trimmed = raw
        .trim()
        .trim_start_matches("http://")
        .trim_start_matches("https://")
        .trim_end_matches('/');

    match trimmed.rsplit_once(':') {
        Some((host, port)) => match port.parse() {
            Ok(port) => (host.to_string(), Some(port)),
            Err(_) => (trimmed.to_string(), None),
        },
        None => (trimmed.to_string(), None),
    }
}
