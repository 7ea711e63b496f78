//! HTTP-facing errors.
//!
//! Every error response carries `{"message": ..., "details": [...]}`.
//! Internal failures are logged in full and reported with a generic message.

use std::fmt;

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::{Deserialize, Serialize};

/// Message returned for every rejected login, whatever the cause.
pub const BAD_CREDENTIALS_MESSAGE: &str = "Bad credentials";

/// Error body returned to clients.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiCallError {
    pub message: String,
    #[serde(default)]
    pub details: Vec<String>,
}

impl ApiCallError {
    pub fn new(message: impl Into<String>, details: Vec<String>) -> Self {
        Self {
            message: message.into(),
            details,
        }
    }
}

/// Errors surfaced by HTTP handlers and middleware.
#[derive(Debug, Clone)]
pub enum ApiError {
    /// Request body could not be parsed
    MalformedRequest(String),
    /// Login rejected; never says why
    AuthenticationFailed,
    /// Route requires an identity and none was established
    Unauthenticated,
    /// Identity lacks the authority the route requires
    AccessDenied(String),
    /// No such route
    NotFound(String),
    /// Anything else; the detail is only logged
    Internal(String),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::MalformedRequest(_) => StatusCode::BAD_REQUEST,
            Self::AuthenticationFailed | Self::Unauthenticated => StatusCode::UNAUTHORIZED,
            Self::AccessDenied(_) => StatusCode::FORBIDDEN,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Body sent to the client.
    pub fn body(&self) -> ApiCallError {
        match self {
            Self::MalformedRequest(msg) => ApiCallError::new("Malformed request", vec![msg.clone()]),
            Self::AuthenticationFailed => ApiCallError::new(BAD_CREDENTIALS_MESSAGE, vec![]),
            Self::Unauthenticated => ApiCallError::new("Full authentication is required", vec![]),
            Self::AccessDenied(msg) => ApiCallError::new("Access denied!", vec![msg.clone()]),
            Self::NotFound(path) => ApiCallError::new("Not found", vec![path.clone()]),
            Self::Internal(_) => ApiCallError::new("Internal server error", vec![]),
        }
    }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MalformedRequest(msg) => write!(f, "Malformed request: {}", msg),
            Self::AuthenticationFailed => write!(f, "Authentication failed"),
            Self::Unauthenticated => write!(f, "Authentication required"),
            Self::AccessDenied(msg) => write!(f, "Access denied: {}", msg),
            Self::NotFound(path) => write!(f, "Not found: {}", path),
            Self::Internal(msg) => write!(f, "Internal error: {}", msg),
        }
    }
}

impl std::error::Error for ApiError {}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        Self::Internal(format!("{:#}", err))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match &self {
            Self::Internal(detail) => tracing::error!("Unhandled error: {}", detail),
            Self::AccessDenied(msg) => tracing::warn!("Access denied: {}", msg),
            other => tracing::debug!("Request rejected: {}", other),
        }
        (self.status(), Json(self.body())).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            ApiError::MalformedRequest("x".into()).status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(ApiError::AuthenticationFailed.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(ApiError::Unauthenticated.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(ApiError::AccessDenied("x".into()).status(), StatusCode::FORBIDDEN);
        assert_eq!(ApiError::NotFound("/x".into()).status(), StatusCode::NOT_FOUND);
        assert_eq!(
            ApiError::Internal("x".into()).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_internal_detail_is_not_exposed() {
        let body = ApiError::Internal("db password=hunter2".into()).body();
        assert_eq!(body.message, "Internal server error");
        assert!(body.details.is_empty());
    }

    #[test]
    fn test_authentication_failed_is_generic() {
        let body = ApiError::AuthenticationFailed.body();
        assert_eq!(body.message, BAD_CREDENTIALS_MESSAGE);
        assert!(body.details.is_empty());
    }

    #[test]
    fn test_from_anyhow() {
        let err: ApiError = anyhow::anyhow!("boom").into();
        assert!(matches!(err, ApiError::Internal(msg) if msg == "boom"));
    }
}
