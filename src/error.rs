use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

/// Errors that stop the service from proceeding at all. Domain-level failures
/// during ingestion, clustering, and organizing are not modeled here — §7's
/// taxonomy handles those with retry/skip/log, never by surfacing a `SefsError`.
/// This enum covers the remainder: malformed requests, a Store that can't open,
/// a path that escapes the monitored root.
#[derive(Error, Debug)]
pub enum SefsError {
    #[error("file not found: {0}")]
    FileNotFound(String),

    #[error("path not allowed: {0}")]
    PathNotAllowed(String),

    #[error("store error: {0}")]
    Store(String),

    #[error("chunk index error: {0}")]
    ChunkIndex(String),

    #[error("embedding error: {0}")]
    Embedding(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),

    #[error("bad request: {0}")]
    BadRequest(String),
}

impl IntoResponse for SefsError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            SefsError::FileNotFound(_) => (StatusCode::NOT_FOUND, self.to_string()),
            SefsError::PathNotAllowed(_) => (StatusCode::FORBIDDEN, self.to_string()),
            SefsError::Store(_) => (StatusCode::INTERNAL_SERVER_ERROR, self.to_string()),
            SefsError::ChunkIndex(_) => (StatusCode::INTERNAL_SERVER_ERROR, self.to_string()),
            SefsError::Embedding(_) => (StatusCode::INTERNAL_SERVER_ERROR, self.to_string()),
            SefsError::Io(_) => (StatusCode::INTERNAL_SERVER_ERROR, self.to_string()),
            SefsError::Serde(_) => (StatusCode::BAD_REQUEST, self.to_string()),
            SefsError::Internal(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "internal server error".to_string(),
            ),
            SefsError::BadRequest(_) => (StatusCode::BAD_REQUEST, self.to_string()),
        };

        let body = json!({
            "error": message,
            "status": status.as_u16(),
        });

        (status, Json(body)).into_response()
    }
}

pub type SefsResult<T> = Result<T, SefsError>;
