use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

use crate::request::RequestError;

/// Errors returned to HTTP clients as `{"error": message}`
#[derive(Debug, Error)]
pub enum ApiError {
    /// Body was not a well-formed generate request
    #[error("{0}")]
    Malformed(String),

    /// Request parsed but failed validation
    #[error(transparent)]
    Invalid(#[from] RequestError),

    /// The model backend failed
    ///
    /// Reported with status 200 so the page can show the message in place of
    /// the model list.
    #[error("Failed to get models: {0}")]
    ModelList(String),
}

impl ApiError {
    /// Status code for this error
    #[must_use]
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Malformed(_) | Self::Invalid(_) => StatusCode::BAD_REQUEST,
            Self::ModelList(_) => StatusCode::OK,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}
