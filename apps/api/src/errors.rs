use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

/// Application-level error type.
/// Implements `IntoResponse` so Axum handlers can return `Result<T, AppError>`.
///
/// Only input-validation and storage-availability problems surface here;
/// processing failures live on the pipeline record and are visible through
/// the status endpoint instead.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Authentication required")]
    Unauthorized,

    #[error("Invalid tenant: {0}")]
    BadTenant(String),

    #[error("No file was uploaded")]
    MissingFile,

    #[error("Unsupported file type: {0}")]
    UnsupportedType(String),

    #[error("File exceeds the {max_bytes} byte limit")]
    TooLarge { max_bytes: usize },

    #[error("CV storage unavailable: {0}")]
    StorageUnavailable(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Internal server error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, message) = match &self {
            AppError::Unauthorized => (
                StatusCode::UNAUTHORIZED,
                "unauth",
                "Authentication required".to_string(),
            ),
            AppError::BadTenant(msg) => (StatusCode::FORBIDDEN, "bad_tenant", msg.clone()),
            AppError::MissingFile => (
                StatusCode::BAD_REQUEST,
                "missing_file",
                "No file was uploaded".to_string(),
            ),
            AppError::UnsupportedType(msg) => (
                StatusCode::UNSUPPORTED_MEDIA_TYPE,
                "unsupported_type",
                msg.clone(),
            ),
            AppError::TooLarge { max_bytes } => (
                StatusCode::PAYLOAD_TOO_LARGE,
                "too_large",
                format!("File exceeds the {max_bytes} byte limit"),
            ),
            AppError::StorageUnavailable(msg) => {
                tracing::error!("storage unavailable: {msg}");
                (
                    StatusCode::SERVICE_UNAVAILABLE,
                    "storage_unavailable",
                    "CV storage is unavailable".to_string(),
                )
            }
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, "not_found", msg.clone()),
            AppError::Validation(msg) => (StatusCode::BAD_REQUEST, "validation_error", msg.clone()),
            AppError::Database(e) => {
                tracing::error!("database error: {e}");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "database_error",
                    "A database error occurred".to_string(),
                )
            }
            AppError::Internal(e) => {
                tracing::error!("internal error: {e:?}");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal_error",
                    "An internal server error occurred".to_string(),
                )
            }
        };

        let body = Json(json!({
            "error": {
                "code": code,
                "message": message
            }
        }));

        (status, body).into_response()
    }
}
