//! API Error Handling
//!
//! Unified error types and conversion for API responses.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};

use crate::engine::OrchestratorError;
use crate::service::pipeline_service::PipelineError;
use crate::store::StoreError;

/// API error type
#[derive(Debug)]
pub enum ApiError {
    NotFound(String),
    BadRequest(String),
    Conflict(String),
    Unavailable(String),
    InternalError(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, msg),
            ApiError::Unavailable(msg) => {
                tracing::warn!("Store unavailable: {}", msg);
                (
                    StatusCode::SERVICE_UNAVAILABLE,
                    "State store unavailable, retry later".to_string(),
                )
            }
            ApiError::InternalError(msg) => {
                tracing::error!("Internal error: {}", msg);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error".to_string(),
                )
            }
        };

        (status, Json(serde_json::json!({ "error": message }))).into_response()
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Unavailable(msg) => ApiError::Unavailable(msg),
            StoreError::NotFound(what) => ApiError::NotFound(format!("{} not found", what)),
            StoreError::Corrupt(msg) => ApiError::InternalError(msg),
            conflict => ApiError::Conflict(conflict.to_string()),
        }
    }
}

impl From<PipelineError> for ApiError {
    fn from(err: PipelineError) -> Self {
        match err {
            PipelineError::NotFound(name) => {
                ApiError::NotFound(format!("Pipeline {} not found", name))
            }
            PipelineError::AlreadyExists(name) => {
                ApiError::Conflict(format!("Pipeline {} already exists", name))
            }
            PipelineError::ValidationError(msg) => ApiError::BadRequest(msg),
            PipelineError::Store(err) => err.into(),
        }
    }
}

impl From<OrchestratorError> for ApiError {
    fn from(err: OrchestratorError) -> Self {
        match err {
            OrchestratorError::PipelineNotFound(name) => {
                ApiError::NotFound(format!("Pipeline {} not found", name))
            }
            OrchestratorError::RunNotFound(id) => ApiError::NotFound(format!("Run {} not found", id)),
            err @ OrchestratorError::AlreadyRunning(_) => ApiError::Conflict(err.to_string()),
            OrchestratorError::Store(err) => err.into(),
        }
    }
}

pub type ApiResult<T> = Result<T, ApiError>;
