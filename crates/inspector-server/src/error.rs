//! Error types for the server.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use inspector_proxy::ProxyError;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use utoipa::ToSchema;

/// Server error type.
#[derive(Debug, Error)]
pub enum ServerError {
    /// Resource not found.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Bad request.
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// The request conflicts with current state.
    #[error("Conflict: {0}")]
    Conflict(String),

    /// A session-level proxy operation failed.
    #[error(transparent)]
    Proxy(#[from] ProxyError),

    /// Internal server error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<inspector_proxy::ConfigError> for ServerError {
    fn from(e: inspector_proxy::ConfigError) -> Self {
        ServerError::Proxy(e.into())
    }
}

/// Result type for server operations.
pub type Result<T> = std::result::Result<T, ServerError>;

/// Error response body.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ErrorResponse {
    /// Error code for programmatic handling.
    pub code: String,
    /// Human-readable error message.
    pub message: String,
    /// Raw underlying cause, when available.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl ServerError {
    fn status_and_code(&self) -> (StatusCode, &'static str) {
        match self {
            ServerError::NotFound(_) => (StatusCode::NOT_FOUND, "not_found"),
            ServerError::BadRequest(_) => (StatusCode::BAD_REQUEST, "bad_request"),
            ServerError::Conflict(_) => (StatusCode::CONFLICT, "conflict"),
            ServerError::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "internal_error"),
            ServerError::Proxy(e) => {
                let status = match e {
                    ProxyError::Config(_) => StatusCode::BAD_REQUEST,
                    ProxyError::Admission { .. } => StatusCode::TOO_MANY_REQUESTS,
                    ProxyError::TransportCreation { .. } => StatusCode::BAD_GATEWAY,
                    ProxyError::Relay(_) => StatusCode::BAD_GATEWAY,
                    ProxyError::SessionNotFound(_) => StatusCode::NOT_FOUND,
                    ProxyError::AlreadyPaired(_) => StatusCode::CONFLICT,
                    ProxyError::Cancelled(_) => StatusCode::GONE,
                };
                (status, e.category())
            }
        }
    }
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let (status, code) = self.status_and_code();
        let message = self.to_string();
        let detail = match &self {
            ServerError::Proxy(e) => e.detail(),
            _ => None,
        };

        if status.is_server_error() {
            tracing::error!(status = %status, code, error = %message, "Server error");
        } else {
            tracing::warn!(status = %status, code, error = %message, "Client error");
        }

        let body = ErrorResponse {
            code: code.to_string(),
            message,
            detail,
        };

        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use inspector_proxy::{ConfigError, TransportError};

    async fn body_of(err: ServerError) -> (StatusCode, ErrorResponse) {
        let response = err.into_response();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn test_config_error_is_bad_request() {
        let (status, body) = body_of(ConfigError::MissingField("command").into()).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body.code, "config_error");
        assert!(body.message.contains("command"));
        assert!(body.detail.is_none());
    }

    #[tokio::test]
    async fn test_admission_is_too_many_requests() {
        let (status, body) = body_of(ProxyError::Admission { limit: 2 }.into()).await;
        assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(body.code, "admission_error");
    }

    #[tokio::test]
    async fn test_creation_error_carries_detail() {
        let err = ProxyError::transport_creation(
            "http://127.0.0.1:1/sse",
            TransportError::ConnectionRefused("tcp connect error".into()),
        );
        let (status, body) = body_of(err.into()).await;
        assert_eq!(status, StatusCode::BAD_GATEWAY);
        assert_eq!(body.code, "transport_creation_error");
        assert!(body.message.contains("Connection refused"));
        assert!(body.detail.unwrap().contains("tcp connect error"));
    }

    #[tokio::test]
    async fn test_not_found() {
        let (status, body) = body_of(ServerError::NotFound("session x".into())).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body.code, "not_found");
    }
}
