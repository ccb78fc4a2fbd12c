//! Chat Backend Integration
//!
//! This module provides abstracted access to model-serving backends through a
//! common trait interface. The fan-in engine only ever talks to
//! [`ChatBackend`]; tests substitute scripted backends.
//!
//! # Available Backends
//!
//! - **Ollama**: Local LLM server (default)
//!
//! # Usage
//!
//! ```ignore
//! use arena_core::backend::{ChatBackend, ChatRequest, OllamaBackend};
//!
//! let backend = OllamaBackend::from_env();
//! let request = ChatRequest::new("llama3", "Hello!");
//! let mut rx = backend.open_stream(&request).await?;
//! while let Some(token) = rx.recv().await {
//!     println!("{token:?}");
//! }
//! ```

mod ollama;
mod traits;

pub use ollama::OllamaBackend;
pub use traits::{BackendConfig, ChatBackend, ChatRequest, ModelInfo, StreamingToken};
pub(crate) use traits::split_host_port;
