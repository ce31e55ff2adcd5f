//! Schema API Handlers
//!
//! HTTP endpoints over the schema registry.

use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};
use tributary_core::domain::schema::{DatasetSchema, Registration};
use tributary_core::dto::schema::RegisterSchema;

use crate::api::AppState;
use crate::api::error::{ApiError, ApiResult};

/// GET /schema/{dataset}
pub async fn get_latest_schema(
    State(state): State<AppState>,
    Path(dataset): Path<String>,
) -> ApiResult<Json<DatasetSchema>> {
    tracing::debug!("Getting latest schema of dataset: {}", dataset);

    state
        .registry
        .get_latest(&dataset)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("No schema registered for {}", dataset)))
}

/// GET /schema/{dataset}/history
pub async fn get_schema_history(
    State(state): State<AppState>,
    Path(dataset): Path<String>,
) -> ApiResult<Json<Vec<DatasetSchema>>> {
    tracing::debug!("Getting schema history of dataset: {}", dataset);

    Ok(Json(state.registry.history(&dataset).await?))
}

/// POST /schema/{dataset}/register
///
/// Breaking drift without an override answers 409 with the diff.
pub async fn register_schema(
    State(state): State<AppState>,
    Path(dataset): Path<String>,
    Json(req): Json<RegisterSchema>,
) -> ApiResult<(StatusCode, Json<Registration>)> {
    if req.columns.is_empty() {
        return Err(ApiError::BadRequest("columns cannot be empty".to_string()));
    }
    tracing::info!("Registering schema for dataset: {}", dataset);

    let registration = state
        .registry
        .register(&dataset, &req.columns, req.allow_override)
        .await?;
    let status = match &registration {
        Registration::Accepted { changed: true, .. } => StatusCode::CREATED,
        Registration::Accepted { changed: false, .. } => StatusCode::OK,
        Registration::Drift { .. } => StatusCode::CONFLICT,
    };
    Ok((status, Json(registration)))
}
