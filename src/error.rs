//! API error type shared by every handler and middleware.
//!
//! Bodies are `{"error": <code>, "message": <text>}`; rate-limit rejections add
//! `retry_after` (seconds) and a `Retry-After` header.

use axum::{
    extract::rejection::{JsonRejection, PathRejection, QueryRejection},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use std::time::Duration;

/// Retry hint given when a rejection has no window to point at (misconfiguration, store timeout).
pub const GENERIC_RETRY_AFTER: Duration = Duration::from_secs(60);

#[derive(Debug)]
pub enum ApiError {
    Unauthorized(&'static str),
    Forbidden,
    RateLimited { retry_after: Duration },
    Validation(String),
    NotFound(String),
    Conflict(String),
    Internal(anyhow::Error),
}

impl ApiError {
    pub fn code(&self) -> &'static str {
        match self {
            ApiError::Unauthorized(_) => "unauthorized",
            ApiError::Forbidden => "forbidden",
            ApiError::RateLimited { .. } => "rate_limited",
            ApiError::Validation(_) => "validation_error",
            ApiError::NotFound(_) => "not_found",
            ApiError::Conflict(_) => "conflict",
            ApiError::Internal(_) => "internal_error",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ApiError::Forbidden => StatusCode::FORBIDDEN,
            ApiError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            ApiError::Validation(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        ApiError::Internal(err)
    }
}

// Extractor rejections carry serde detail (field names, parse positions); it stays in the logs.
impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        tracing::debug!(
            status = %rejection.status(),
            "Rejected request body: {}",
            rejection.body_text()
        );
        ApiError::Validation(
            "Request body must be a valid JSON object with the expected fields".to_string(),
        )
    }
}

impl From<PathRejection> for ApiError {
    fn from(rejection: PathRejection) -> Self {
        tracing::debug!("Rejected path parameters: {}", rejection.body_text());
        ApiError::Validation("Invalid path parameter".to_string())
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        tracing::debug!("Rejected query string: {}", rejection.body_text());
        ApiError::Validation("Invalid query parameters".to_string())
    }
}

/// Whole seconds, rounded up so a sub-second wait never reads as "retry now".
pub fn retry_after_secs(retry_after: Duration) -> u64 {
    let secs = retry_after.as_secs();
    if retry_after.subsec_nanos() > 0 {
        secs + 1
    } else {
        secs
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let code = self.code();

        match self {
            ApiError::RateLimited { retry_after } => {
                let secs = retry_after_secs(retry_after);
                let body = Json(json!({
                    "error": code,
                    "message": "Too many requests. Please slow down.",
                    "retry_after": secs,
                }));
                (status, [(header::RETRY_AFTER, secs.to_string())], body).into_response()
            }
            ApiError::Internal(err) => {
                tracing::error!("Internal error: {:#}", err);
                let body = Json(json!({
                    "error": code,
                    "message": "Internal server error",
                }));
                (status, body).into_response()
            }
            ApiError::Forbidden => {
                let body = Json(json!({
                    "error": code,
                    "message": "Insufficient permissions",
                }));
                (status, body).into_response()
            }
            ApiError::Unauthorized(msg) => {
                let body = Json(json!({ "error": code, "message": msg }));
                (status, body).into_response()
            }
            ApiError::Validation(msg) | ApiError::NotFound(msg) | ApiError::Conflict(msg) => {
                let body = Json(json!({ "error": code, "message": msg }));
                (status, body).into_response()
            }
        }
    }
}
