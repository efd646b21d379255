use crate::errors::DispatcherError;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

/// API error types
#[derive(Error, Debug)]
pub enum ApiError {
    #[error("Invalid request: {0}")]
    BadRequest(String),

    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("no eligible worker")]
    NoEligibleWorker,

    #[error("Worker failure: {0}")]
    WorkerFailure(String),

    #[error("Request timed out")]
    Timeout,

    #[error("Internal server error: {0}")]
    Internal(String),
}

impl From<DispatcherError> for ApiError {
    fn from(e: DispatcherError) -> Self {
        match e {
            DispatcherError::NoEligibleWorker => ApiError::NoEligibleWorker,
            DispatcherError::WorkerReported(reason) => ApiError::WorkerFailure(reason),
            DispatcherError::WorkerUnavailable(node) => {
                ApiError::WorkerFailure(format!("worker {} disconnected", node))
            }
            DispatcherError::Timeout => ApiError::Timeout,
            other => ApiError::Internal(other.to_string()),
        }
    }
}

/// Convert ApiError into the OpenAI-style error envelope.
impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, kind, message) = match self {
            ApiError::BadRequest(msg) => {
                (StatusCode::BAD_REQUEST, "invalid_request_error", msg)
            }
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, "not_found_error", msg),
            ApiError::NoEligibleWorker => (
                StatusCode::SERVICE_UNAVAILABLE,
                "service_unavailable_error",
                "no eligible worker".to_string(),
            ),
            ApiError::WorkerFailure(msg) => (StatusCode::BAD_GATEWAY, "worker_error", msg),
            ApiError::Timeout => (
                StatusCode::GATEWAY_TIMEOUT,
                "timeout_error",
                "inference request timed out".to_string(),
            ),
            ApiError::Internal(msg) => {
                tracing::error!(error = %msg, "Internal error");
                (StatusCode::INTERNAL_SERVER_ERROR, "internal_error", msg)
            }
        };

        let body = Json(json!({
            "error": {
                "message": message,
                "type": kind,
            }
        }));

        (status, body).into_response()
    }
}

/// Result type for API handlers
pub type ApiResult<T> = Result<T, ApiError>;
