//! Coordinator error types.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

/// Failures in the coordination core.
#[derive(thiserror::Error, Debug)]
pub enum CoordinationError {
    #[error("duplicate unit: {0}")]
    DuplicateUnit(String),

    #[error("unknown unit: {0}")]
    UnknownUnit(String),

    #[error("unknown agent: {0}")]
    UnknownAgent(String),

    #[error("agent {0} is out of capacity bounds")]
    CapacityExceeded(String),

    #[error("agent {agent} unreachable: {detail}")]
    AgentUnreachable { agent: String, detail: String },

    #[error("failed to measure {0}")]
    MeasurementFailure(String),

    #[error("sync tool failure: {0}")]
    SyncToolFailure(String),

    #[error("backup destination unavailable: {0}")]
    DestinationUnavailable(String),

    #[error("insufficient space on destination: need {required} bytes, {available} available")]
    InsufficientDestinationSpace { required: u64, available: u64 },
}

/// HTTP-facing error wrapper.
#[derive(thiserror::Error, Debug)]
pub enum AppError {
    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    Conflict(String),

    #[error("{0}")]
    Unprocessable(String),

    #[error("{0}")]
    ServiceUnavailable(String),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl From<CoordinationError> for AppError {
    fn from(e: CoordinationError) -> Self {
        match e {
            CoordinationError::DuplicateUnit(_) => AppError::Conflict(e.to_string()),
            CoordinationError::UnknownUnit(_) | CoordinationError::UnknownAgent(_) => {
                AppError::NotFound(e.to_string())
            }
            CoordinationError::CapacityExceeded(_) => AppError::ServiceUnavailable(e.to_string()),
            CoordinationError::DestinationUnavailable(_)
            | CoordinationError::InsufficientDestinationSpace { .. } => {
                AppError::Unprocessable(e.to_string())
            }
            other => AppError::Internal(other.into()),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, msg) = match &self {
            AppError::NotFound(m) => (StatusCode::NOT_FOUND, m.clone()),
            AppError::BadRequest(m) => (StatusCode::BAD_REQUEST, m.clone()),
            AppError::Conflict(m) => (StatusCode::CONFLICT, m.clone()),
            AppError::Unprocessable(m) => (StatusCode::UNPROCESSABLE_ENTITY, m.clone()),
            AppError::ServiceUnavailable(m) => (StatusCode::SERVICE_UNAVAILABLE, m.clone()),
            AppError::Internal(e) => {
                tracing::error!("internal error: {e:#}");
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error".into())
            }
        };
        (status, Json(json!({ "error": msg }))).into_response()
    }
}
