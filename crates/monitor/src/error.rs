//! HTTP error type for the status API.

use adwatch_core::error::CoreError;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

/// Errors returned by handlers.
///
/// Domain failures arrive as [`CoreError`]; malformed path or query input is
/// [`AppError::BadRequest`].
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error(transparent)]
    Core(#[from] CoreError),

    #[error("Bad request: {0}")]
    BadRequest(String),
}

pub type AppResult<T> = Result<T, AppError>;

/// Wire shape of every error response.
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: String,
    pub code: &'static str,
}

impl AppError {
    /// Status and machine-readable code for this error.
    pub fn status_code(&self) -> (StatusCode, &'static str) {
        match self {
            AppError::Core(CoreError::NotFound { .. }) => (StatusCode::NOT_FOUND, "NOT_FOUND"),
            AppError::Core(CoreError::Validation(_)) => (StatusCode::BAD_REQUEST, "VALIDATION_ERROR"),
            AppError::Core(CoreError::Conflict(_)) => (StatusCode::CONFLICT, "CONFLICT"),
            AppError::Core(CoreError::Internal(_)) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR")
            }
            AppError::BadRequest(_) => (StatusCode::BAD_REQUEST, "BAD_REQUEST"),
        }
    }

    /// Client-facing message. Internal details stay in the log.
    fn public_message(&self) -> String {
        match self {
            AppError::Core(CoreError::NotFound { entity, id }) => {
                format!("{entity} with id {id} not found")
            }
            AppError::Core(CoreError::Validation(msg) | CoreError::Conflict(msg))
            | AppError::BadRequest(msg) => msg.clone(),
            AppError::Core(CoreError::Internal(msg)) => {
                tracing::error!(error = %msg, "Internal error while serving request");
                "An internal error occurred".to_string()
            }
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code) = self.status_code();
        let body = ErrorBody {
            error: self.public_message(),
            code,
        };
        (status, Json(body)).into_response()
    }
}
