//! HTTP Surface
//!
//! axum router exposing the arena to browser clients.
//!
//! | Route | Method | Response |
//! |-------|--------|----------|
//! | `/api/v1/models` | GET | `{"models": [..]}`, or `{"error": ..}` when the backend fails |
//! | `/api/v1/generate` | POST | `text/event-stream` of encoded branch events, or 400 `{"error": ..}` |
//! | `/health` | GET | `{"status": "healthy", ..}` |
//!
//! A client that disconnects mid-stream drops the response body, which drops
//! the merged stream and aborts every producer still running for it. Server
//! shutdown ends every open stream the same way.

mod error;
mod handlers;

use std::future::Future;
use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::backend::ChatBackend;
use crate::merge::FanIn;

pub use error::ApiError;

/// Shared handler state
#[derive(Clone)]
pub struct AppState {
    /// Backend used for model listing
    pub backend: Arc<dyn ChatBackend>,
    /// Fan-in engine for generate requests
    pub fan_in: Arc<FanIn>,
}

impl AppState {
    /// Build state around one backend
    pub fn new(backend: Arc<dyn ChatBackend>, fan_in: FanIn) -> Self {
        Self {
            backend,
            fan_in: Arc::new(fan_in),
        }
    }
}

/// Build the application router
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/v1/models", get(handlers::list_models))
        .route("/api/v1/generate", post(handlers::generate))
        .route("/health", get(handlers::health))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Serve the router on a bound listener until `shutdown` resolves
///
/// Once `shutdown` resolves no new connections are accepted and every open
/// generate stream is ended, so slow or hung models cannot hold the server.
pub async fn serve<F>(listener: TcpListener, state: AppState, shutdown: F) -> std::io::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let addr = listener.local_addr()?;
    info!(%addr, backend = state.backend.name(), "Arena HTTP server listening");

    let fan_in = Arc::clone(&state.fan_in);
    let shutdown = async move {
        shutdown.await;
        info!(%addr, "Shutdown requested, ending open streams");
        fan_in.shutdown();
    };

    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown)
        .await?;

    info!(%addr, "Arena HTTP server stopped");
    Ok(())
}
