use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

use crate::ports::RepositoryError;
use crate::validation::ValidationError;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("request with idempotency key {0:?} was already received")]
    DuplicateRequest(String),

    #[error("validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("{0}")]
    Storage(#[from] RepositoryError),

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("bad request: {0}")]
    BadRequest(String),
}

impl AppError {
    fn status_code(&self) -> StatusCode {
        match self {
            AppError::DuplicateRequest(_) => StatusCode::PRECONDITION_FAILED,
            AppError::Validation(_) | AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::Storage(RepositoryError::OverdraftNotAllowed { .. }) => {
                StatusCode::BAD_REQUEST
            }
            AppError::Storage(RepositoryError::Unavailable(_)) => StatusCode::SERVICE_UNAVAILABLE,
            AppError::Storage(RepositoryError::Conflict(_)) => StatusCode::CONFLICT,
            AppError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::Forbidden(_) => StatusCode::FORBIDDEN,
        }
    }

    /// Stable machine-readable error name for clients.
    pub fn kind(&self) -> &'static str {
        match self {
            AppError::DuplicateRequest(_) => "duplicate_request",
            AppError::Validation(e) => e.kind(),
            AppError::Storage(RepositoryError::OverdraftNotAllowed { .. }) => {
                "overdraft_not_allowed"
            }
            AppError::Storage(RepositoryError::Unavailable(_)) => "storage_unavailable",
            AppError::Storage(RepositoryError::Conflict(_)) => "conflict",
            AppError::Storage(_) => "storage_error",
            AppError::Forbidden(_) => "forbidden",
            AppError::BadRequest(_) => "bad_request",
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(kind = self.kind(), "request failed: {}", self);
        }

        let mut body = json!({
            "error": self.to_string(),
            "kind": self.kind(),
            "status": status.as_u16(),
        });
        if let AppError::Validation(e) = &self {
            if let Some(field) = e.field() {
                body["field"] = json!(field);
            }
        }

        (status, Json(body)).into_response()
    }
}
