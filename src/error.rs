use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

/// Error taxonomy for the ingestion pipeline.
///
/// Variants map onto the kinds from the error-handling design: transient I/O
/// retries at the job-queue level, integrity failures discard a derivative
/// without touching the committed original, conflicts are dedup hits (not
/// failures), policy violations reject at the coordinator boundary, and fatal
/// errors keep the worker pools from starting at all.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("not found")]
    NotFound,
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("policy violation: {0}")]
    Policy(String),
    #[error("integrity error: {0}")]
    Integrity(String),
    #[error("transient error: {0}")]
    Transient(String),
    #[error("fatal error: {0}")]
    Fatal(String),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("internal error: {0}")]
    Internal(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            AppError::NotFound => (StatusCode::NOT_FOUND, self.to_string()),
            AppError::Conflict(msg) => (StatusCode::CONFLICT, msg.clone()),
            AppError::Policy(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            AppError::Integrity(msg) => (StatusCode::UNPROCESSABLE_ENTITY, msg.clone()),
            AppError::Transient(msg) => (StatusCode::SERVICE_UNAVAILABLE, msg.clone()),
            AppError::Fatal(msg) => {
                tracing::error!("fatal error: {msg}");
                (StatusCode::INTERNAL_SERVER_ERROR, "internal server error".into())
            }
            AppError::Database(e) => {
                tracing::error!("database error: {e:?}");
                (StatusCode::INTERNAL_SERVER_ERROR, "internal server error".into())
            }
            AppError::Io(e) => {
                tracing::error!("io error: {e:?}");
                (StatusCode::INTERNAL_SERVER_ERROR, "internal server error".into())
            }
            AppError::Internal(msg) => {
                tracing::error!("internal error: {msg}");
                (StatusCode::INTERNAL_SERVER_ERROR, "internal server error".into())
            }
        };
        let body = Json(json!({ "error": message }));
        (status, body).into_response()
    }
}

impl AppError {
    /// Maps this error onto the CLI's exit-code contract: `0` success (not
    /// representable here), `1` generic failure, `2` configuration error,
    /// `3` repository not found.
    pub fn exit_code(&self) -> i32 {
        match self {
            AppError::Fatal(_) => 2,
            AppError::NotFound => 3,
            _ => 1,
        }
    }
}

pub type AppResult<T> = Result<T, AppError>;
