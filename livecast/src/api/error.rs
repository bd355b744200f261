//! API error handling.
//!
//! Provides consistent error responses for the API.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;

use crate::error::Error;

/// API error response body.
#[derive(Debug, Serialize)]
pub struct ApiErrorResponse {
    /// Always false; mirrors the `success` field of the success envelopes.
    pub success: bool,
    /// Error code for programmatic handling
    pub code: String,
    /// Human-readable error message
    pub error: String,
}

/// API error type that can be converted to HTTP responses.
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub code: String,
    pub message: String,
}

impl ApiError {
    /// Create a new API error.
    pub fn new(status: StatusCode, code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            status,
            code: code.into(),
            message: message.into(),
        }
    }

    /// Create a 400 Bad Request error.
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "BAD_REQUEST", message)
    }

    /// Create a 403 Forbidden error.
    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::new(StatusCode::FORBIDDEN, "FORBIDDEN", message)
    }

    /// Create a 404 Not Found error.
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, "NOT_FOUND", message)
    }

    /// Create a 409 Conflict error.
    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(StatusCode::CONFLICT, "CONFLICT", message)
    }

    /// Create a 500 Internal Server Error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR", message)
    }

    /// Create a 503 Service Unavailable error.
    pub fn service_unavailable(message: impl Into<String>) -> Self {
        Self::new(StatusCode::SERVICE_UNAVAILABLE, "SERVICE_UNAVAILABLE", message)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ApiErrorResponse {
            success: false,
            code: self.code,
            error: self.message,
        };
        (self.status, Json(body)).into_response()
    }
}

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        match err {
            Error::NotFound { entity_type, id } => {
                ApiError::not_found(format!("{} with id '{}' not found", entity_type, id))
            }
            Error::InvalidArgument(msg) => ApiError::bad_request(msg),
            Error::IllegalState { state, action } => {
                ApiError::conflict(format!("Cannot {} while {}", action, state))
            }
            Error::AlreadyRunning => {
                ApiError::new(StatusCode::CONFLICT, "ALREADY_RUNNING", "Already running")
            }
            Error::Timeout(msg) => ApiError::new(StatusCode::GATEWAY_TIMEOUT, "TIMEOUT", msg),
            Error::Configuration(msg) => ApiError::bad_request(msg),
            Error::Storage(e) => match e {
                media_store::StoreError::NotFound(key) => {
                    ApiError::not_found(format!("Object '{}' not found", key))
                }
                media_store::StoreError::PermissionDenied(msg) => ApiError::forbidden(msg),
                media_store::StoreError::Unavailable(msg) => ApiError::service_unavailable(msg),
                other => {
                    tracing::error!("Storage error: {}", other);
                    ApiError::internal("Storage error occurred")
                }
            },
            Error::WebRtc(e) => {
                tracing::error!("Media session error: {}", e);
                ApiError::internal("Media session error occurred")
            }
            Error::Io(e) => {
                tracing::error!("IO error: {}", e);
                ApiError::internal("IO error occurred")
            }
            _ => {
                tracing::error!("Unexpected error: {}", err);
                ApiError::internal("An unexpected error occurred")
            }
        }
    }
}

/// Result type for API handlers.
pub type ApiResult<T> = Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_api_error_creation() {
        let err = ApiError::not_found("Stream not found");
        assert_eq!(err.status, StatusCode::NOT_FOUND);
        assert_eq!(err.code, "NOT_FOUND");
        assert_eq!(err.message, "Stream not found");
    }

    #[test]
    fn test_from_domain_error() {
        let api_err: ApiError = Error::not_found("Stream", "abc").into();
        assert_eq!(api_err.status, StatusCode::NOT_FOUND);
        assert!(api_err.message.contains("abc"));

        let api_err: ApiError = Error::AlreadyRunning.into();
        assert_eq!(api_err.status, StatusCode::CONFLICT);
        assert_eq!(api_err.code, "ALREADY_RUNNING");

        let api_err: ApiError = Error::invalid_argument("bad sdp").into();
        assert_eq!(api_err.status, StatusCode::BAD_REQUEST);
    }

    #[test]
    fn test_storage_error_mapping() {
        let api_err: ApiError =
            Error::Storage(media_store::StoreError::Unavailable("down".into())).into();
        assert_eq!(api_err.status, StatusCode::SERVICE_UNAVAILABLE);

        let api_err: ApiError =
            Error::Storage(media_store::StoreError::NotFound("k".into())).into();
        assert_eq!(api_err.status, StatusCode::NOT_FOUND);
    }
}
