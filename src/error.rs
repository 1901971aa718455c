//! Error types for Archway
//!
//! Critical-path failures (auth, admission, upstream dispatch) map onto the
//! client-visible status codes below. Auxiliary-path failures (context,
//! ingestion, usage accounting) are recovered where they occur and never
//! reach this mapping.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use thiserror::Error;

/// Main error type for Archway
#[derive(Debug, Error)]
pub enum Error {
    /// Missing or invalid bearer credentials
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// Tenant exceeded a rate-limit window
    #[error("Rate limited: {reason}")]
    RateLimited { reason: String, retry_after_secs: u64 },

    /// Malformed client request
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// Upstream LLM or embedding provider failure
    #[error("Upstream failure: {0}")]
    Upstream(String),

    /// Overall request deadline exceeded
    #[error("Request deadline exceeded")]
    Timeout,

    /// Database-related errors
    #[error("Database error: {0}")]
    Database(String),

    /// Blob storage errors
    #[error("Storage error: {0}")]
    Storage(String),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// SQL errors
    #[error("SQL error: {0}")]
    Sql(#[from] sqlx::Error),

    /// Reqwest HTTP client errors
    #[error("HTTP client error: {0}")]
    Reqwest(#[from] reqwest::Error),

    /// Generic errors
    #[error("{0}")]
    Other(String),
}

/// Result type alias for Archway operations
pub type Result<T> = std::result::Result<T, Error>;

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let (status, body) = match &self {
            Error::Unauthorized(_) => (
                StatusCode::UNAUTHORIZED,
                serde_json::json!({ "error": "unauthorized" }),
            ),
            Error::RateLimited { reason, retry_after_secs } => (
                StatusCode::TOO_MANY_REQUESTS,
                serde_json::json!({
                    "error": "rate_limited",
                    "message": reason,
                    "retry_after": retry_after_secs,
                }),
            ),
            Error::BadRequest(message) => (
                StatusCode::BAD_REQUEST,
                serde_json::json!({ "error": "bad_request", "message": message }),
            ),
            Error::Upstream(_) => (
                // Upstream detail is logged server-side; clients get a
                // sanitized message only.
                StatusCode::BAD_GATEWAY,
                serde_json::json!({
                    "error": "upstream_failure",
                    "message": "upstream model provider returned an error",
                }),
            ),
            Error::Timeout => (
                StatusCode::GATEWAY_TIMEOUT,
                serde_json::json!({ "error": "timeout" }),
            ),
            _ => (
                StatusCode::INTERNAL_SERVER_ERROR,
                serde_json::json!({ "error": "internal_error" }),
            ),
        };

        (status, axum::Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn upstream_detail_is_not_client_visible() {
        let err = Error::Upstream("api key sk-secret rejected".to_string());
        let response = err.into_response();
        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    }

    #[test]
    fn rate_limited_maps_to_429() {
        let err = Error::RateLimited {
            reason: "minute window exhausted".to_string(),
            retry_after_secs: 60,
        };
        assert_eq!(err.into_response().status(), StatusCode::TOO_MANY_REQUESTS);
    }
}
