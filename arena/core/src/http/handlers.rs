use axum::body::Body;
use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::http::header;
use axum::response::{IntoResponse, Response};
use axum::Json;
use futures::StreamExt;
use serde_json::{json, Value};
use tracing::{debug, warn};

use super::error::ApiError;
use super::AppState;
use crate::request::GenerateRequest;
use crate::sse;

pub(super) async fn health() -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "service": "model-arena",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

pub(super) async fn list_models(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    let models = state.backend.list_models().await.map_err(|e| {
        warn!(backend = state.backend.name(), error = %e, "Model listing failed");
        ApiError::ModelList(format!("{e:#}"))
    })?;

    let names: Vec<String> = models.into_iter().map(|m| m.name).collect();
    debug!(count = names.len(), "Listed models");
    Ok(Json(json!({ "models": names })))
}

pub(super) async fn generate(
    State(state): State<AppState>,
    payload: Result<Json<GenerateRequest>, JsonRejection>,
) -> Result<Response, ApiError> {
    let Json(request) = payload.map_err(|rejection| ApiError::Malformed(rejection.body_text()))?;

    let merged = state.fan_in.merge(&request).map_err(|e| {
        debug!(error = %e, "Rejected generate request");
        ApiError::from(e)
    })?;
    debug!(request_id = %merged.request_id(), branches = merged.total(), "Streaming response");

    let body = Body::from_stream(merged.map(|event| sse::encode(&event)));

    Ok((
        [
            (header::CONTENT_TYPE, sse::CONTENT_TYPE),
            (header::CACHE_CONTROL, "no-cache"),
        ],
        body,
    )
        .into_response())
}
