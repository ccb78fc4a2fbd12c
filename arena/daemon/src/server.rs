//! Daemon Server Implementation
//!
//! Owns the server lifecycle for `arena-daemon serve`:
//! - builds the backend and fan-in engine from the resolved configuration
//! - optionally verifies the model backend before binding
//! - binds the HTTP listener and serves until the shutdown future resolves
//!
//! ```text
//!        ArenaConfig ──► ArenaServer ──► TcpListener (server.host:server.port)
//!                            │
//!                 OllamaBackend + FanIn
//!                            │
//!                  arena_core::http::serve
//! ```

use std::future::Future;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::net::TcpListener;
use tracing::{info, warn};

use arena_core::{ArenaConfig, AppState, ChatBackend, FanIn, OllamaBackend};

use crate::CheckError;

/// The arena HTTP server
pub struct ArenaServer {
    config: ArenaConfig,
    backend: Arc<dyn ChatBackend>,
}

impl ArenaServer {
    /// Create a server talking to the configured Ollama instance
    pub fn new(config: ArenaConfig) -> Self {
        let backend = Arc::new(OllamaBackend::new(&config.backend_config()));
        Self::with_backend(config, backend)
    }

    /// Create a server over an arbitrary backend
    pub fn with_backend(config: ArenaConfig, backend: Arc<dyn ChatBackend>) -> Self {
        Self { config, backend }
    }

    /// Fail unless the model backend answers
    pub async fn preflight(&self) -> Result<(), CheckError> {
        let backend = self.config.backend_config();
        let url = format!("http://{}:{}", backend.host, backend.port);

        if !self.backend.health_check().await {
            return Err(CheckError::BackendUnreachable { url });
        }

        match self.backend.list_models().await {
            Ok(models) if models.is_empty() => {
                warn!(%url, "Backend is up but has no models installed");
            }
            Ok(models) => info!(%url, models = models.len(), "Backend reachable"),
            Err(e) => warn!(%url, error = %e, "Backend is up but model listing failed"),
        }
        Ok(())
    }

    /// Bind the configured address
    pub async fn bind(&self) -> Result<TcpListener> {
        let addr = self.config.bind_addr();
        TcpListener::bind(&addr)
            .await
            .with_context(|| format!("Failed to bind {addr}. Is another arena server running?"))
    }

    /// Serve on `listener` until `shutdown` resolves
    pub async fn run<F>(self, listener: TcpListener, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let local = listener.local_addr()?;
        let merge = self.config.merge_config();
        info!(
            addr = %local,
            poll_interval_ms = merge.poll_interval.as_millis() as u64,
            channel_capacity = merge.channel_capacity,
            max_models = ?merge.max_models,
            "Starting arena server"
        );

        let fan_in = FanIn::new(Arc::clone(&self.backend), merge);
        let state = AppState::new(self.backend, fan_in);

        arena_core::serve(listener, state, shutdown)
            .await
            .context("HTTP server failed")
    }
}
