//! Common error types for the Annatar addon.
//!
//! One application-wide error enum with automatic conversion to HTTP
//! responses for use with Axum.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

/// Result type alias using AppError
pub type AppResult<T> = Result<T, AppError>;

/// Application-wide error type.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    /// Bad request (invalid config, unknown provider, malformed id)
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// Resource not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Validation failure on stored or inbound data
    #[error("Validation error: {0}")]
    Validation(String),

    /// Internal server error
    #[error("Internal error: {0}")]
    Internal(String),

    /// The shared store is unreachable or misbehaving
    #[error("Service unavailable: {0}")]
    ServiceUnavailable(String),

    /// Upstream (Jackett, Cinemeta, debrid) failure
    #[error("External service error: {0}")]
    ExternalService(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_message) = match &self {
            Self::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg.as_str()),
            Self::NotFound(msg) => (StatusCode::NOT_FOUND, msg.as_str()),
            Self::Validation(msg) => (StatusCode::BAD_REQUEST, msg.as_str()),
            Self::Internal(msg) => {
                tracing::error!("Internal error: {}", msg);
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error")
            }
            Self::ServiceUnavailable(msg) => {
                tracing::error!("Service unavailable: {}", msg);
                (StatusCode::SERVICE_UNAVAILABLE, "Service unavailable")
            }
            Self::ExternalService(msg) => {
                tracing::error!("External service error: {}", msg);
                (StatusCode::BAD_GATEWAY, "External service error")
            }
        };

        let body = Json(json!({
            "error": error_message,
        }));

        (status, body).into_response()
    }
}

// Conversions from common error types

impl From<redis::RedisError> for AppError {
    fn from(err: redis::RedisError) -> Self {
        tracing::error!("Redis error: {:?}", err);
        Self::ServiceUnavailable(format!("Store error: {}", err))
    }
}

impl From<reqwest::Error> for AppError {
    fn from(err: reqwest::Error) -> Self {
        Self::ExternalService(err.to_string())
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        Self::Validation(format!("Invalid JSON: {}", err))
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        Self::Internal(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = AppError::NotFound("stream".to_string());
        assert_eq!(err.to_string(), "Not found: stream");

        let err = AppError::BadRequest("invalid configuration".to_string());
        assert_eq!(err.to_string(), "Bad request: invalid configuration");
    }

    #[test]
    fn test_into_response_status() {
        let response = AppError::BadRequest("nope".into()).into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let response = AppError::ExternalService("jackett".into()).into_response();
        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    }
}
