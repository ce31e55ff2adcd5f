//! Pipeline API Handlers
//!
//! HTTP endpoints for pipeline management.

use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};
use tributary_core::domain::pipeline::PipelineDefinition;
use tributary_core::dto::pipeline::{CreatePipeline, PipelineSummary};

use crate::api::AppState;
use crate::api::error::ApiResult;
use crate::service::pipeline_service;

/// POST /pipeline/create
pub async fn create_pipeline(
    State(state): State<AppState>,
    Json(req): Json<CreatePipeline>,
) -> ApiResult<(StatusCode, Json<PipelineDefinition>)> {
    tracing::info!("Creating pipeline: {}", req.name);

    let pipeline = pipeline_service::create_pipeline(state.pipelines().as_ref(), req).await?;
    Ok((StatusCode::CREATED, Json(pipeline)))
}

/// GET /pipeline/list
pub async fn list_pipelines(
    State(state): State<AppState>,
) -> ApiResult<Json<Vec<PipelineSummary>>> {
    tracing::debug!("Listing all pipelines");

    let pipelines = pipeline_service::list_pipelines(state.pipelines().as_ref()).await?;
    Ok(Json(pipelines.into_iter().map(PipelineSummary::from).collect()))
}

/// GET /pipeline/{name}
pub async fn get_pipeline(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> ApiResult<Json<PipelineDefinition>> {
    tracing::debug!("Getting pipeline: {}", name);

    let pipeline = pipeline_service::get_pipeline(state.pipelines().as_ref(), &name).await?;
    Ok(Json(pipeline))
}

/// DELETE /pipeline/{name}
pub async fn delete_pipeline(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> ApiResult<StatusCode> {
    tracing::info!("Deleting pipeline: {}", name);

    pipeline_service::delete_pipeline(state.pipelines().as_ref(), &name).await?;
    Ok(StatusCode::NO_CONTENT)
}
