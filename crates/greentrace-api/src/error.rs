//! # API Error Types
//!
//! Structured error type implementing `axum::response::IntoResponse`.
//! Maps domain errors from greentrace-core and greentrace-state to HTTP
//! status codes. Internal error details are logged, never returned.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use utoipa::ToSchema;

use greentrace_core::{CoreError, RegistryError};
use greentrace_state::CreditError;

/// JSON error response body.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ErrorBody {
    /// Human-readable error message.
    pub error: String,
    /// Machine-readable error code (e.g. "NOT_FOUND", "VALIDATION_ERROR").
    pub code: String,
}

/// Application-level error type that implements [`IntoResponse`] for Axum.
#[derive(Error, Debug)]
pub enum AppError {
    /// Request field failed validation (400).
    #[error("{0}")]
    Validation(String),

    /// Request body could not be parsed (400).
    #[error("bad request: {0}")]
    BadRequest(String),

    /// No resolvable caller, or bad bearer token (401).
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// Caller lacks permission (403).
    #[error("forbidden: {0}")]
    Forbidden(String),

    /// Resource not found or not visible to the caller (404).
    #[error("not found: {0}")]
    NotFound(String),

    /// Conflict with current resource state (409).
    #[error("conflict: {0}")]
    Conflict(String),

    /// Internal server error (500). Message is logged but not returned to client.
    #[error("internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// Return the HTTP status code and machine-readable error code for this error.
    pub(crate) fn status_and_code(&self) -> (StatusCode, &'static str) {
        match self {
            Self::Validation(_) => (StatusCode::BAD_REQUEST, "VALIDATION_ERROR"),
            Self::BadRequest(_) => (StatusCode::BAD_REQUEST, "BAD_REQUEST"),
            Self::Unauthorized(_) => (StatusCode::UNAUTHORIZED, "UNAUTHORIZED"),
            Self::Forbidden(_) => (StatusCode::FORBIDDEN, "FORBIDDEN"),
            Self::NotFound(_) => (StatusCode::NOT_FOUND, "NOT_FOUND"),
            Self::Conflict(_) => (StatusCode::CONFLICT, "CONFLICT"),
            Self::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR"),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code) = self.status_and_code();

        let message = match &self {
            Self::Internal(_) => {
                tracing::error!(error = %self, "internal server error");
                "An internal error occurred".to_string()
            }
            other => other.to_string(),
        };

        let body = ErrorBody {
            error: message,
            code: code.to_string(),
        };

        (status, Json(body)).into_response()
    }
}

impl From<CoreError> for AppError {
    fn from(err: CoreError) -> Self {
        Self::Validation(err.to_string())
    }
}

impl From<CreditError> for AppError {
    fn from(err: CreditError) -> Self {
        match &err {
            CreditError::InvalidTransition { .. }
            | CreditError::TerminalState { .. }
            | CreditError::AlreadyDecided { .. } => Self::Conflict(err.to_string()),
            CreditError::InvalidDecision
            | CreditError::InvalidAmount { .. }
            | CreditError::AmountMismatch { .. }
            | CreditError::Validation(_) => Self::Validation(err.to_string()),
            CreditError::UnknownStatus(_) => Self::Internal(err.to_string()),
        }
    }
}

impl From<RegistryError> for AppError {
    fn from(err: RegistryError) -> Self {
        Self::Internal(err.to_string())
    }
}

impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        Self::Internal(format!("database error: {err}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use greentrace_state::{CreditStatus, VerificationStatus};
    use http_body_util::BodyExt;

    async fn response_parts(err: AppError) -> (StatusCode, ErrorBody) {
        let response = err.into_response();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let body: ErrorBody = serde_json::from_slice(&bytes).unwrap();
        (status, body)
    }

    #[test]
    fn status_codes() {
        let cases = [
            (AppError::Validation("x".into()), StatusCode::BAD_REQUEST, "VALIDATION_ERROR"),
            (AppError::BadRequest("x".into()), StatusCode::BAD_REQUEST, "BAD_REQUEST"),
            (AppError::Unauthorized("x".into()), StatusCode::UNAUTHORIZED, "UNAUTHORIZED"),
            (AppError::Forbidden("x".into()), StatusCode::FORBIDDEN, "FORBIDDEN"),
            (AppError::NotFound("x".into()), StatusCode::NOT_FOUND, "NOT_FOUND"),
            (AppError::Conflict("x".into()), StatusCode::CONFLICT, "CONFLICT"),
            (
                AppError::Internal("x".into()),
                StatusCode::INTERNAL_SERVER_ERROR,
                "INTERNAL_ERROR",
            ),
        ];
        for (err, status, code) in cases {
            assert_eq!(err.status_and_code(), (status, code), "{err:?}");
        }
    }

    #[tokio::test]
    async fn into_response_not_found() {
        let (status, body) = response_parts(AppError::NotFound("product 123".into())).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body.code, "NOT_FOUND");
        assert!(body.error.contains("product 123"));
    }

    #[tokio::test]
    async fn into_response_validation_is_bare_message() {
        let (status, body) =
            response_parts(AppError::Validation("wallet_address is required".into())).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body.error, "wallet_address is required");
    }

    #[tokio::test]
    async fn into_response_internal_hides_details() {
        let (status, body) =
            response_parts(AppError::Internal("db connection failed".into())).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body.code, "INTERNAL_ERROR");
        assert!(
            !body.error.contains("db connection"),
            "internal error details must not leak: {}",
            body.error
        );
    }

    #[test]
    fn core_error_converts_to_validation() {
        let app_err = AppError::from(CoreError::MissingField { field: "name" });
        assert!(matches!(app_err, AppError::Validation(ref m) if m.contains("name")));
    }

    #[test]
    fn credit_state_errors_convert_to_conflict() {
        let terminal = AppError::from(CreditError::TerminalState {
            state: CreditStatus::Retired,
        });
        assert_eq!(terminal.status_and_code().0, StatusCode::CONFLICT);
        let decided = AppError::from(CreditError::AlreadyDecided {
            status: VerificationStatus::Verified,
        });
        assert_eq!(decided.status_and_code().0, StatusCode::CONFLICT);
    }

    #[test]
    fn credit_input_errors_convert_to_validation() {
        let err = AppError::from(CreditError::InvalidDecision);
        assert_eq!(err.status_and_code().1, "VALIDATION_ERROR");
    }
}
