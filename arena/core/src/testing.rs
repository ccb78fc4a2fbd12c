//! Scripted Test Backend
//!
//! Mock infrastructure for exercising the fan-in engine without a model
//! server. [`ScriptedBackend`] plays back a per-model script of tokens,
//! delays and failures, records every request it receives, and counts the
//! streams that are still alive so tests can assert prompt teardown.
//!
//! # Usage
//!
//! ```ignore
//! use arena_core::testing::{BranchScript, ScriptedBackend};
//!
//! let backend = ScriptedBackend::new()
//!     .with_script("a", BranchScript::tokens(["H", "i"]))
//!     .with_script("b", BranchScript::open_error("unreachable"));
//! ```

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;

use crate::backend::{ChatBackend, ChatRequest, ModelInfo, StreamingToken};

/// One step of a scripted stream
#[derive(Clone, Debug)]
pub enum ScriptStep {
    /// Send a token
    Token(String),
    /// Wait before the next step
    Delay(Duration),
    /// Send the completion marker and end
    Complete,
    /// Send an error and end
    Error(String),
    /// Close the channel without a terminal token
    Close,
    /// Keep the stream open until the receiver goes away
    Hang,
}

/// Script for every stream opened for one model
#[derive(Clone, Debug, Default)]
pub struct BranchScript {
    /// Delay before `open_stream` returns
    pub open_delay: Option<Duration>,
    /// Make `open_stream` itself fail with this message
    pub open_error: Option<String>,
    /// Panic inside `open_stream`, killing the caller's task
    pub open_panic: bool,
    /// Steps played after a successful open
    pub steps: Vec<ScriptStep>,
}

impl BranchScript {
    /// Tokens followed by completion
    pub fn tokens<I, S>(tokens: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut steps: Vec<ScriptStep> = tokens
            .into_iter()
            .map(|t| ScriptStep::Token(t.into()))
            .collect();
        steps.push(ScriptStep::Complete);
        Self {
            steps,
            ..Default::default()
        }
    }

    /// Opening the stream fails
    pub fn open_error(message: impl Into<String>) -> Self {
        Self {
            open_error: Some(message.into()),
            ..Default::default()
        }
    }

    /// Opening the stream panics
    #[must_use]
    pub fn panics() -> Self {
        Self {
            open_panic: true,
            ..Default::default()
        }
    }

    /// Explicit step list
    #[must_use]
    pub fn steps(steps: Vec<ScriptStep>) -> Self {
        Self {
            steps,
            ..Default::default()
        }
    }

    /// Delay the open call
    #[must_use]
    pub fn with_open_delay(mut self, delay: Duration) -> Self {
        self.open_delay = Some(delay);
        self
    }
}

/// Decrements the live-stream counter when a scripted stream task ends
struct LiveGuard(Arc<AtomicUsize>);

impl Drop for LiveGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Chat backend that plays back scripts
#[derive(Clone, Default)]
pub struct ScriptedBackend {
    scripts: Arc<Mutex<HashMap<String, BranchScript>>>,
    models: Arc<Mutex<Option<Result<Vec<String>, String>>>>,
    requests: Arc<Mutex<Vec<ChatRequest>>>,
    live_streams: Arc<AtomicUsize>,
}

impl ScriptedBackend {
    /// Create an empty backend; unknown models fail to open
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the script for a model
    #[must_use]
    pub fn with_script(self, model: impl Into<String>, script: BranchScript) -> Self {
        self.scripts.lock().insert(model.into(), script);
        self
    }

    /// Set the result of `list_models`; defaults to the scripted model names
    #[must_use]
    pub fn with_model_list(self, models: Result<Vec<String>, String>) -> Self {
        *self.models.lock() = Some(models);
        self
    }

    /// Requests received so far, in arrival order
    #[must_use]
    pub fn requests(&self) -> Vec<ChatRequest> {
        self.requests.lock().clone()
    }

    /// Number of scripted streams whose playback task is still running
    #[must_use]
    pub fn live_streams(&self) -> usize {
        self.live_streams.load(Ordering::SeqCst)
    }

    async fn play(steps: Vec<ScriptStep>, tx: mpsc::Sender<StreamingToken>, _guard: LiveGuard) {
        for step in steps {
            let token = match step {
                ScriptStep::Token(text) => StreamingToken::Token(text),
                ScriptStep::Complete => StreamingToken::Complete,
                ScriptStep::Error(message) => StreamingToken::Error(message),
                ScriptStep::Close => return,
                ScriptStep::Hang => {
                    tx.closed().await;
                    return;
                }
                ScriptStep::Delay(delay) => {
                    tokio::select! {
                        () = tx.closed() => return,
                        () = tokio::time::sleep(delay) => continue,
                    }
                }
            };

            let terminal = !matches!(token, StreamingToken::Token(_));
            if tx.send(token).await.is_err() || terminal {
                return;
            }
        }
    }
}

#[async_trait]
impl ChatBackend for ScriptedBackend {
    fn name(&self) -> &'static str {
        "Scripted"
    }

    async fn health_check(&self) -> bool {
        true
    }

    async fn open_stream(
        &self,
        request: &ChatRequest,
    ) -> anyhow::Result<mpsc::Receiver<StreamingToken>> {
        self.requests.lock().push(request.clone());

        let script = self
            .scripts
            .lock()
            .get(&request.model)
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("model '{}' not found", request.model))?;

        if let Some(delay) = script.open_delay {
            tokio::time::sleep(delay).await;
        }
        assert!(
            !script.open_panic,
            "scripted panic opening model '{}'",
            request.model
        );
        if let Some(message) = script.open_error {
            anyhow::bail!(message);
        }

        let (tx, rx) = mpsc::channel(16);
        self.live_streams.fetch_add(1, Ordering::SeqCst);
        let guard = LiveGuard(Arc::clone(&self.live_streams));
        tokio::spawn(Self::play(script.steps, tx, guard));

        Ok(rx)
    }

    async fn list_models(&self) -> anyhow::Result<Vec<ModelInfo>> {
        let configured = self.models.lock().clone();
        let names = match configured {
            Some(Ok(names)) => names,
            Some(Err(message)) => anyhow::bail!(message),
            None => {
                let mut names: Vec<String> = self.scripts.lock().keys().cloned().collect();
                names.sort();
                names
            }
        };

        Ok(names
            .into_iter()
            .map(|name| ModelInfo {
                name,
                size: None,
                parameters: None,
            })
            .collect())
    }
}
