//! Error types for tastesync-collector

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use std::time::Duration;
use thiserror::Error;

use crate::store::StoreError;

/// Failure of one sync, or of one of its stages
///
/// A descriptor lookup miss is not represented here; it is recorded on the
/// track as an unresolved resolution.
#[derive(Debug, Error)]
pub enum SyncError {
    /// Upstream kept throttling until the retry budget ran out
    #[error("Upstream rate limit exhausted after {attempts} attempts")]
    RateLimited { attempts: u32 },

    /// Credential expired and a single refresh did not fix it
    #[error("Credential expired: {0}")]
    AuthExpired(String),

    #[error("Upstream unavailable: {0}")]
    UpstreamUnavailable(String),

    /// Current snapshot could not be replaced; the previous one is intact
    #[error("Write conflict: {0}")]
    WriteConflict(String),

    #[error("Sync timed out after {0:?}")]
    Timeout(Duration),

    #[error("Sync already in progress for user {0}")]
    SyncInProgress(String),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl SyncError {
    /// Stable machine-readable reason code
    pub fn code(&self) -> &'static str {
        match self {
            SyncError::RateLimited { .. } => "RATE_LIMITED",
            SyncError::AuthExpired(_) => "AUTH_EXPIRED",
            SyncError::UpstreamUnavailable(_) => "UPSTREAM_UNAVAILABLE",
            SyncError::WriteConflict(_) => "WRITE_CONFLICT",
            SyncError::Timeout(_) => "TIMEOUT",
            SyncError::SyncInProgress(_) => "SYNC_IN_PROGRESS",
            SyncError::Store(_) => "STORE_ERROR",
            SyncError::Serialization(_) => "SERIALIZATION_ERROR",
            SyncError::Config(_) => "CONFIG_ERROR",
            SyncError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// HTTP status used when a sync failure is reported over the API
    pub fn status_code(&self) -> StatusCode {
        status_for_code(self.code())
    }
}

/// HTTP status for a sync failure code
pub fn status_for_code(code: &str) -> StatusCode {
    match code {
        "RATE_LIMITED" => StatusCode::TOO_MANY_REQUESTS,
        "AUTH_EXPIRED" => StatusCode::UNAUTHORIZED,
        "UPSTREAM_UNAVAILABLE" => StatusCode::BAD_GATEWAY,
        "TIMEOUT" => StatusCode::GATEWAY_TIMEOUT,
        "SYNC_IN_PROGRESS" => StatusCode::CONFLICT,
        "CONFIG_ERROR" => StatusCode::BAD_REQUEST,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// API error type
#[derive(Debug, Error)]
pub enum ApiError {
    /// Resource not found (404)
    #[error("Resource not found: {0}")]
    NotFound(String),

    /// Invalid request (400)
    #[error("Invalid request: {0}")]
    BadRequest(String),

    /// Internal server error (500)
    #[error("Internal server error: {0}")]
    Internal(String),

    #[error(transparent)]
    Sync(#[from] SyncError),

    #[error("Common error: {0}")]
    Common(#[from] tastesync_common::Error),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_code, message) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, "NOT_FOUND", msg),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "BAD_REQUEST", msg),
            ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR", msg),
            ApiError::Sync(ref err) => (err.status_code(), err.code(), err.to_string()),
            ApiError::Common(ref err) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "COMMON_ERROR",
                err.to_string(),
            ),
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
