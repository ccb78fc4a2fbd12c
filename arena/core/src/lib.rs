//! Arena Core - Concurrent Multi-Model Streaming Fan-In
//!
//! This crate sends one prompt to several language models at once and merges
//! their token streams into a single stream in which every fragment is tagged
//! with the model that produced it. Clients watch all models answer side by
//! side, in real time.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                         HTTP Surface (axum)                      │
//! │   GET /api/v1/models     POST /api/v1/generate     GET /health   │
//! └───────────────────────────────┬──────────────────────────────────┘
//!                                 │ GenerateRequest { prompt, models }
//! ┌───────────────────────────────┼──────────────────────────────────┐
//! │                          FAN-IN CORE                             │
//! │  ┌──────────────┐  ┌──────────────┐  ┌──────────────┐            │
//! │  │BranchAdapter │  │BranchAdapter │  │BranchAdapter │  per model │
//! │  └──────┬───────┘  └──────┬───────┘  └──────┬───────┘            │
//! │         └─────────────────┼─────────────────┘                    │
//! │                           ▼                                      │
//! │              MergedStream ◄──► CompletionTracker                 │
//! │                           │                                      │
//! │                     sse::encode                                  │
//! └───────────────────────────┼──────────────────────────────────────┘
//!                             ▼
//!             data: {"model":"a","token":"H","done":false}
//! ```
//!
//! # Key Types
//!
//! - [`FanIn`]: Spawns one producer per model and returns the merged stream
//! - [`MergedStream`]: The consumer-facing stream of [`BranchEvent`]s
//! - [`BranchAdapter`]: Normalizes one backend stream into branch events
//! - [`CompletionTracker`]: Counts branches that reached their terminal event
//! - [`ChatBackend`]: Abstract model server; [`OllamaBackend`] is the default
//!
//! # Quick Start
//!
//! ```ignore
//! use std::sync::Arc;
//!
//! use arena_core::{FanIn, GenerateRequest, MergeConfig, OllamaBackend};
//! use futures::StreamExt;
//!
//! #[tokio::main]
//! async fn main() {
//!     let fan_in = FanIn::new(Arc::new(OllamaBackend::from_env()), MergeConfig::default());
//!     let request = GenerateRequest::new("Why is the sky blue?", ["llama3", "mistral"]);
//!
//!     let mut stream = fan_in.merge(&request).unwrap();
//!     while let Some(event) = stream.next().await {
//!         println!("{}: {:?}", event.model, event.kind);
//!     }
//! }
//! ```
//!
//! # Module Overview
//!
//! - [`backend`]: Chat backend abstraction (Ollama, etc.)
//! - [`events`]: Branch identifiers, states and events
//! - [`branch`]: Branch stream adapter
//! - [`tracker`]: Completion tracker
//! - [`request`]: Generate request and validation
//! - [`merge`]: Fan-in merger
//! - [`sse`]: Outbound stream encoder
//! - [`http`]: axum router and server
//! - [`config`]: TOML / environment configuration
//! - [`testing`]: Scripted backend for tests

#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod backend;
pub mod branch;
pub mod config;
pub mod events;
pub mod http;
pub mod merge;
pub mod request;
pub mod sse;
pub mod testing;
pub mod tracker;

// Re-exports for convenience
pub use backend::{
    BackendConfig, ChatBackend, ChatRequest, ModelInfo, OllamaBackend, StreamingToken,
};
pub use branch::BranchAdapter;
pub use events::{BranchEvent, BranchEventKind, BranchId, BranchState};
pub use http::{router, serve, ApiError, AppState};
pub use merge::{FanIn, MergeConfig, MergedStream};
pub use request::{GenerateRequest, RequestError};
pub use tracker::CompletionTracker;

// Config exports
pub use config::{
    default_config_path, load_config, load_config_from_path, read_config_file, ArenaConfig,
    ConfigError, ConfigOverrides,
};
