use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

use palaver_store::StoreError;

#[derive(Debug, Error)]
pub enum ApiError {
    /// A rejected mutation with a field-level reason. Never retried
    /// automatically by clients.
    #[error("Validation failed on '{field}': {message}")]
    Validation {
        field: &'static str,
        message: String,
    },

    #[error("Not found: {0}")]
    NotFound(String),

    /// Acting on someone else's message. Terminal, never silently ignored.
    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Missing or invalid user identity")]
    Unauthorized,

    #[error("Payload too large: {size} bytes (max {max})")]
    PayloadTooLarge { size: usize, max: usize },

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<StoreError> for ApiError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound => ApiError::NotFound("message not found".to_string()),
            StoreError::Forbidden(reason) => ApiError::Forbidden(reason.to_string()),
            other => ApiError::Internal(other.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            ApiError::Validation { .. } => (StatusCode::BAD_REQUEST, self.to_string()),
            ApiError::NotFound(_) => (StatusCode::NOT_FOUND, self.to_string()),
            ApiError::Forbidden(_) => (StatusCode::FORBIDDEN, self.to_string()),
            ApiError::Unauthorized => (StatusCode::UNAUTHORIZED, self.to_string()),
            ApiError::PayloadTooLarge { .. } => (StatusCode::PAYLOAD_TOO_LARGE, self.to_string()),
            ApiError::Internal(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Internal server error".to_string(),
            ),
        };

        let field = match &self {
            ApiError::Validation { field, .. } => Some(*field),
            _ => None,
        };

        let body = serde_json::json!({
            "success": false,
            "error": message,
            "field": field,
        });

        (status, axum::Json(body)).into_response()
    }
}
