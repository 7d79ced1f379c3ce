//! Error types for the video analysis service

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

/// API error type
#[derive(Debug, Error)]
pub enum ApiError {
    /// Resource not found (404)
    #[error("Resource not found: {0}")]
    NotFound(String),

    /// Invalid request (400)
    #[error("Invalid request: {0}")]
    BadRequest(String),

    /// Conflict (409) - e.g., a session is already processing
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Internal server error (500)
    #[error("Internal server error: {0}")]
    Internal(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic error
    #[error(transparent)]
    Other(#[from] anyhow::Error),

    /// sv-common error
    #[error("Common error: {0}")]
    Common(#[from] sv_common::Error),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_code, message) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, "NOT_FOUND", msg),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "BAD_REQUEST", msg),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, "CONFLICT", msg),
            ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR", msg),
            ApiError::Io(ref err) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "IO_ERROR",
                err.to_string(),
            ),
            ApiError::Other(ref err) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "INTERNAL_ERROR",
                err.to_string(),
            ),
            ApiError::Common(ref err) => match err {
                sv_common::Error::NotFound(msg) => {
                    (StatusCode::NOT_FOUND, "NOT_FOUND", msg.clone())
                }
                sv_common::Error::InvalidInput(msg) => {
                    (StatusCode::BAD_REQUEST, "BAD_REQUEST", msg.clone())
                }
                _ => (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "COMMON_ERROR",
                    err.to_string(),
                ),
            },
        };

        let body = Json(json!({
            "error": {
                "code": error_code,
                "message": message,
            }
        }));

        (status, body).into_response()
    }
}

/// Result type for API handlers
pub type ApiResult<T> = Result<T, ApiError>;

impl From<crate::services::inference::InferenceError> for ApiError {
    fn from(err: crate::services::inference::InferenceError) -> Self {
        ApiError::Internal(err.to_string())
    }
}

/// Pipeline stage errors
///
/// The orchestrator maps these onto session failure semantics: source
/// and persistence problems kill the run, inference problems are
/// absorbed per frame by the analyzer, export problems are logged and
/// the session completes anyway.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Source video missing, unreadable, or not probeable (fatal,
    /// raised before any frame is persisted)
    #[error("Source unreadable: {0}")]
    SourceUnreadable(String),

    /// Model call failed or timed out for a single frame
    #[error("Inference failed: {0}")]
    Inference(String),

    /// Database write failed mid-stage (fatal)
    #[error("Persistence failed: {0}")]
    Persistence(#[from] sv_common::Error),

    /// Export bundle could not be written (non-fatal)
    #[error("Export failed: {0}")]
    Export(String),

    /// Frame store I/O failed
    #[error("Storage error: {0}")]
    Storage(#[from] std::io::Error),
}
