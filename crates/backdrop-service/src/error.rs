//! API error types and responses.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use backdrop_core::JobId;
use backdrop_store::StoreError;

use crate::intake::IntakeError;
use crate::ledger::LedgerError;

/// API error type.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// Unauthorized - missing or invalid credentials.
    #[error("unauthorized")]
    Unauthorized,

    /// Resource not found.
    #[error("not found: {0}")]
    NotFound(String),

    /// Bad request - invalid input.
    #[error("bad request: {0}")]
    BadRequest(String),

    /// Conflict - resource already exists or invalid state transition.
    #[error("conflict: {0}")]
    Conflict(String),

    /// Insufficient credits.
    #[error("insufficient credits: required={required}, available={available}")]
    InsufficientCredits {
        /// Price of the request.
        required: i64,
        /// Current balance.
        available: i64,
    },

    /// An image could not be uploaded; nothing was charged.
    #[error("upload failed: {0}")]
    Upload(String),

    /// The job could not be queued; its credits were refunded.
    #[error("dispatch failed: {message}")]
    Dispatch {
        /// The failed job.
        job_id: JobId,
        /// Why dispatch failed.
        message: String,
    },

    /// Internal server error.
    #[error("internal error: {0}")]
    Internal(String),
}

/// JSON error response body.
#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: ErrorBody,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    code: String,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<serde_json::Value>,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code, message, details) = match &self {
            Self::Unauthorized => (
                StatusCode::UNAUTHORIZED,
                "unauthorized",
                self.to_string(),
                None,
            ),
            Self::NotFound(msg) => (StatusCode::NOT_FOUND, "not_found", msg.clone(), None),
            Self::BadRequest(msg) => (StatusCode::BAD_REQUEST, "bad_request", msg.clone(), None),
            Self::Conflict(msg) => (StatusCode::CONFLICT, "conflict", msg.clone(), None),
            Self::InsufficientCredits {
                required,
                available,
            } => (
                StatusCode::PAYMENT_REQUIRED,
                "insufficient_credits",
                self.to_string(),
                Some(serde_json::json!({
                    "required": required,
                    "available": available
                })),
            ),
            Self::Upload(msg) => {
                tracing::error!(error = %msg, "Image upload failed");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "upload_failed",
                    "Failed to upload images".to_string(),
                    None,
                )
            }
            Self::Dispatch { job_id, message } => {
                tracing::error!(job_id = %job_id, error = %message, "Job dispatch failed");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "dispatch_failed",
                    "Failed to queue job; reserved credits were refunded".to_string(),
                    Some(serde_json::json!({ "jobId": job_id })),
                )
            }
            Self::Internal(msg) => {
                tracing::error!(error = %msg, "Internal server error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal_error",
                    "An internal error occurred".to_string(),
                    None,
                )
            }
        };

        let body = ErrorResponse {
            error: ErrorBody {
                code: code.to_string(),
                message,
                details,
            },
        };

        (status, Json(body)).into_response()
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound { entity, id } => Self::NotFound(format!("{entity} not found: {id}")),
            StoreError::AlreadyExists { entity, id } => {
                Self::Conflict(format!("{entity} already exists: {id}"))
            }
            StoreError::Conflict(msg) => Self::Conflict(msg),
            StoreError::Database(msg) | StoreError::Serialization(msg) => Self::Internal(msg),
        }
    }
}

impl From<LedgerError> for ApiError {
    fn from(err: LedgerError) -> Self {
        match err {
            LedgerError::InvalidAmount(msg) => Self::BadRequest(msg),
            LedgerError::AccountNotFound(_) => Self::NotFound("Account not found".into()),
            LedgerError::AccountExists(_) => Self::Conflict("Account already exists".into()),
            LedgerError::Store(e) => e.into(),
        }
    }
}

impl From<IntakeError> for ApiError {
    fn from(err: IntakeError) -> Self {
        match err {
            IntakeError::Validation(msg) => Self::BadRequest(msg),
            IntakeError::AccountNotFound(_) => Self::NotFound("Account not found".into()),
            IntakeError::InsufficientCredits {
                required,
                available,
            } => Self::InsufficientCredits {
                required,
                available,
            },
            IntakeError::Upload(msg) => Self::Upload(msg),
            IntakeError::Dispatch { job_id, reason } => Self::Dispatch {
                job_id,
                message: reason,
            },
            IntakeError::Internal(msg) => Self::Internal(msg),
        }
    }
}
