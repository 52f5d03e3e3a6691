//! Application error types.

use axum::{
    Json,
    http::{HeaderValue, StatusCode, header::WWW_AUTHENTICATE},
    response::{IntoResponse, Response},
};
use serde::Serialize;
use thiserror::Error;
use tracing::{error, warn};
use warden_core::AuthError;

/// Convenience alias for handler return types.
pub type AppResult<T> = Result<T, AppError>;

/// Error body returned by every failing endpoint.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
}

/// Application-level errors with HTTP status mapping.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Invalid or missing authentication token")]
    InvalidToken,

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Service unavailable: {0}")]
    Unavailable(String),

    #[error("Internal server error")]
    Internal(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error, message) = match &self {
            AppError::Validation(m) => {
                (StatusCode::UNPROCESSABLE_ENTITY, "validation_error", m.as_str())
            }
            AppError::InvalidToken => (
                StatusCode::UNAUTHORIZED,
                "invalid_token",
                "invalid or missing authentication token",
            ),
            AppError::Unauthorized(m) => (StatusCode::UNAUTHORIZED, "unauthorized", m.as_str()),
            AppError::Forbidden(m) => (StatusCode::FORBIDDEN, "forbidden", m.as_str()),
            AppError::NotFound(m) => (StatusCode::NOT_FOUND, "not_found", m.as_str()),
            AppError::Conflict(m) => (StatusCode::CONFLICT, "conflict", m.as_str()),
            AppError::Unavailable(detail) => {
                warn!(%detail, "request failed: service unavailable");
                (
                    StatusCode::SERVICE_UNAVAILABLE,
                    "unavailable",
                    "the server is temporarily unable to handle the request",
                )
            }
            AppError::Internal(detail) => {
                error!(%detail, "request failed: internal error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal_error",
                    "the server encountered a problem and could not process the request",
                )
            }
        };
        let body = Json(ErrorResponse {
            error: error.to_string(),
            message: message.to_string(),
        });
        let mut response = (status, body).into_response();
        if matches!(self, AppError::InvalidToken) {
            response
                .headers_mut()
                .insert(WWW_AUTHENTICATE, HeaderValue::from_static("Bearer"));
        }
        response
    }
}

impl From<AuthError> for AppError {
    fn from(e: AuthError) -> Self {
        match e {
            AuthError::CredentialMismatch => {
                AppError::Unauthorized("invalid authentication credentials".into())
            }
            AuthError::TokenExpiredOrUnknown => AppError::InvalidToken,
            AuthError::AuthenticationRequired => {
                AppError::Unauthorized("you must be authenticated to access this resource".into())
            }
            AuthError::AccountInactive => AppError::Forbidden(
                "your user account must be activated to access this resource".into(),
            ),
            AuthError::NotPermitted(_) => AppError::Forbidden(
                "your user account doesn't have the necessary permissions to access this resource"
                    .into(),
            ),
            AuthError::Invalid(msg) => AppError::Validation(msg),
            AuthError::NotFound(_) => {
                AppError::NotFound("the requested resource could not be found".into())
            }
            AuthError::Conflict(_) => {
                AppError::Conflict("the resource conflicts with an existing one".into())
            }
            AuthError::StoreUnavailable(msg) => AppError::Unavailable(msg),
            AuthError::Cancelled => AppError::Unavailable("request cancelled".into()),
            e @ (AuthError::HashingFailure(_)
            | AuthError::RandomSourceFailure(_)
            | AuthError::IdentityNotAttached
            | AuthError::IdentityAlreadyAttached) => AppError::Internal(e.to_string()),
        }
    }
}
