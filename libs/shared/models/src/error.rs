use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

/// Top-level error surface for handlers. Each variant maps to one of the
/// user-visible failure categories: validation (400), conflict (409),
/// policy (403), transient (503), auth (401), plus the usual not-found and
/// internal buckets.
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Authentication error: {0}")]
    Auth(String),

    #[error("Not Found: {0}")]
    NotFound(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Policy: {0}")]
    Policy(String),

    #[error("Service temporarily unavailable: {0}")]
    Transient(String),

    #[error("Internal Server Error: {0}")]
    Internal(String),

    #[error("Database error: {0}")]
    Database(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, retryable, message) = match &self {
            AppError::Auth(msg) => (StatusCode::UNAUTHORIZED, false, msg),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, false, msg),
            AppError::Validation(msg) => (StatusCode::BAD_REQUEST, false, msg),
            AppError::Conflict(msg) => (StatusCode::CONFLICT, false, msg),
            AppError::Policy(msg) => (StatusCode::FORBIDDEN, false, msg),
            AppError::Transient(msg) => (StatusCode::SERVICE_UNAVAILABLE, true, msg),
            AppError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, false, msg),
            AppError::Database(msg) => (StatusCode::INTERNAL_SERVER_ERROR, false, msg),
        };

        tracing::error!("Error: {}: {}", status, message);

        let body = Json(json!({
            "error": message,
            "retryable": retryable
        }));

        (status, body).into_response()
    }
}
