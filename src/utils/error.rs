use axum::{http::StatusCode, response::{IntoResponse, Response}, Json};
use serde::Serialize;
use thiserror::Error;

/// One closed error type for every row of the error-handling table: malformed input,
/// auth failure, access-control denial, rate limiting, not-found, session-lock
/// contention, and unexpected internal failure.
#[derive(Error, Debug)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    Unauthorized(String),

    #[error("access denied to section '{section}'")]
    Forbidden { section: String },

    #[error("{0}")]
    NotFound(String),

    #[error("rate limit exceeded, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("session is busy, retry")]
    SessionBusy,

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),

    #[error("language model error: {0}")]
    LlmError(String),
}

#[derive(Serialize)]
struct ErrorEnvelope {
    detail: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, detail) = match self {
            ApiError::BadRequest(msg) => {
                tracing::warn!(%msg, "bad request");
                (StatusCode::BAD_REQUEST, msg)
            }
            ApiError::Unauthorized(msg) => {
                tracing::warn!(%msg, "unauthenticated");
                (StatusCode::UNAUTHORIZED, msg)
            }
            ApiError::Forbidden { section } => {
                tracing::warn!(%section, "access denied");
                (
                    StatusCode::FORBIDDEN,
                    format!("access denied to section '{section}'"),
                )
            }
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::RateLimited { retry_after_secs } => {
                let mut response = (
                    StatusCode::TOO_MANY_REQUESTS,
                    Json(ErrorEnvelope {
                        detail: format!("rate limit exceeded, retry after {retry_after_secs}s"),
                    }),
                )
                    .into_response();
                response.headers_mut().insert(
                    "Retry-After",
                    retry_after_secs.to_string().parse().unwrap(),
                );
                return response;
            }
            ApiError::SessionBusy => (StatusCode::CONFLICT, "session is busy, retry".to_string()),
            ApiError::Database(e) => {
                tracing::error!(error = %e, "database error");
                (StatusCode::INTERNAL_SERVER_ERROR, "internal error".to_string())
            }
            ApiError::Internal(e) => {
                tracing::error!(error = %e, "internal error");
                (StatusCode::INTERNAL_SERVER_ERROR, "internal error".to_string())
            }
            ApiError::LlmError(msg) => {
                tracing::error!(%msg, "language model error");
                (StatusCode::SERVICE_UNAVAILABLE, msg)
            }
        };

        (status, Json(ErrorEnvelope { detail })).into_response()
    }
}
