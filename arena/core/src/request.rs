//! Generate Requests
//!
//! The client-facing request body and its validation. A request is checked
//! completely before any branch is spawned; once accepted it is never mutated.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Body of `POST /api/v1/generate`
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenerateRequest {
    /// Prompt sent unchanged to every model
    pub prompt: String,
    /// Models to query; duplicates each get their own branch
    pub models: Vec<String>,
}

/// Why a request was rejected
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RequestError {
    /// Prompt is the empty string
    #[error("prompt must not be empty")]
    EmptyPrompt,

    /// No models were requested
    #[error("at least one model is required")]
    NoModels,

    /// A model identifier is empty or whitespace
    #[error("model identifier at position {0} is empty")]
    BlankModel(usize),

    /// More models than the server allows per request
    #[error("too many models: {requested} requested, at most {max} allowed")]
    TooManyModels {
        /// Number of models in the request
        requested: usize,
        /// Configured limit
        max: usize,
    },
}

impl GenerateRequest {
    /// Create a request
    pub fn new<I, S>(prompt: impl Into<String>, models: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            prompt: prompt.into(),
            models: models.into_iter().map(Into::into).collect(),
        }
    }

    /// Number of branches this request fans out to
    #[must_use]
    pub fn branch_count(&self) -> usize {
        self.models.len()
    }

    /// Validate the request, optionally against a per-request model limit
    ///
    /// Whitespace is a legitimate prompt and is passed through unchanged.
    pub fn validate(&self, max_models: Option<usize>) -> Result<(), RequestError> {
        if self.prompt.is_empty() {
            return Err(RequestError::EmptyPrompt);
        }

        if self.models.is_empty() {
            return Err(RequestError::NoModels);
        }

        if let Some(position) = self.models.iter().position(|m| m.trim().is_empty()) {
            return Err(RequestError::BlankModel(position));
        }

        if let Some(max) = max_models.filter(|&max| self.models.len() > max) {
            return Err(RequestError::TooManyModels {
                requested: self.models.len(),
                max,
            });
        }

        Ok(())
    }
}
