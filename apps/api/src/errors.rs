use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use chrono::NaiveDate;
use serde_json::json;
use thiserror::Error;

/// Application-level error type.
/// Implements `IntoResponse` so Axum handlers can return `Result<T, AppError>`.
///
/// `NotFound` deliberately carries no detail: a job or result that is absent,
/// expired, or owned by someone else must all read the same way to callers.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Not found")]
    NotFound,

    #[error("Result not ready")]
    NotReady,

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Monthly quota exceeded ({current_usage}/{limit})")]
    QuotaExceeded {
        current_usage: i64,
        limit: i64,
        reset_date: NaiveDate,
    },

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("LLM error: {0}")]
    Llm(String),

    #[error("Internal server error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, body) = match &self {
            AppError::NotFound => (
                StatusCode::NOT_FOUND,
                error_body("NOT_FOUND", "Resource not found"),
            ),
            AppError::NotReady => (
                StatusCode::CONFLICT,
                error_body("NOT_READY", "Generation has not completed yet"),
            ),
            AppError::Validation(msg) => {
                (StatusCode::BAD_REQUEST, error_body("VALIDATION_ERROR", msg))
            }
            AppError::QuotaExceeded {
                current_usage,
                limit,
                reset_date,
            } => (
                StatusCode::TOO_MANY_REQUESTS,
                json!({
                    "error": {
                        "code": "QUOTA_EXCEEDED",
                        "message": "Monthly quota exceeded for this feature",
                        "usage": {
                            "current_usage": current_usage,
                            "limit": limit,
                            "reset_date": reset_date,
                        }
                    }
                }),
            ),
            AppError::Configuration(msg) => {
                // Operator-visible, not user-actionable: log the detail,
                // return a generic internal error.
                tracing::error!("Configuration error: {msg}");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    error_body("INTERNAL_ERROR", "An internal server error occurred"),
                )
            }
            AppError::Database(e) => {
                tracing::error!("Database error: {e}");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    error_body("DATABASE_ERROR", "A database error occurred"),
                )
            }
            AppError::Storage(msg) => {
                tracing::error!("Storage error: {msg}");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    error_body("STORAGE_ERROR", "A storage error occurred"),
                )
            }
            AppError::Llm(msg) => {
                tracing::error!("LLM error: {msg}");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    error_body("LLM_ERROR", "An AI processing error occurred"),
                )
            }
            AppError::Internal(e) => {
                tracing::error!("Internal error: {e:?}");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    error_body("INTERNAL_ERROR", "An internal server error occurred"),
                )
            }
        };

        (status, Json(body)).into_response()
    }
}

fn error_body(code: &str, message: &str) -> serde_json::Value {
    json!({
        "error": {
            "code": code,
            "message": message
        }
    })
}
