//! Error types surfaced to gateway callers
//!
//! Every failure that reaches a caller goes through [`ApiError`], which maps
//! it to a status code and a `{"error": message}` JSON body.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

use crate::data::{GenerationError, NewsError};
use crate::upstream::UpstreamFailure;

/// API error type
#[derive(Debug, Error)]
pub enum ApiError {
    /// Invalid request (400)
    #[error("Invalid request: {0}")]
    BadRequest(String),

    /// The upstream for this route has no API key configured (500)
    #[error("{0} upstream is not configured: missing API key")]
    NotConfigured(&'static str),

    /// Upstream retries exhausted; reported with the upstream's status when it had one
    #[error(transparent)]
    Upstream(#[from] UpstreamFailure),

    /// The upstream answered but its body was unusable (502)
    #[error("{0}")]
    BadUpstreamResponse(String),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::NotConfigured(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::Upstream(failure) => failure
                .status
                .filter(|s| s.is_client_error() || s.is_server_error())
                .unwrap_or(StatusCode::BAD_GATEWAY),
            ApiError::BadUpstreamResponse(_) => StatusCode::BAD_GATEWAY,
        }
    }
}

impl From<GenerationError> for ApiError {
    fn from(error: GenerationError) -> Self {
        match error {
            GenerationError::Upstream(failure) => ApiError::Upstream(failure),
            other => ApiError::BadUpstreamResponse(other.to_string()),
        }
    }
}

impl From<NewsError> for ApiError {
    fn from(error: NewsError) -> Self {
        match error {
            NewsError::Upstream(failure) => ApiError::Upstream(failure),
            other => ApiError::BadUpstreamResponse(other.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(json!({ "error": self.to_string() }));
        (self.status(), body).into_response()
    }
}

/// Result type for API handlers
pub type ApiResult<T> = Result<T, ApiError>;
