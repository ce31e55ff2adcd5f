//! Run API Handlers
//!
//! HTTP endpoints for triggering, inspecting and cancelling runs.

use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
};
use tributary_core::domain::run::RunRecord;
use tributary_core::dto::run::{RunListQuery, RunSummary, TriggerResponse, TriggerRun};
use uuid::Uuid;

use crate::api::AppState;
use crate::api::error::ApiResult;

/// POST /run/trigger
///
/// Returns as soon as the run is recorded; a 409 means the pipeline already
/// has an active run.
pub async fn trigger_run(
    State(state): State<AppState>,
    Json(req): Json<TriggerRun>,
) -> ApiResult<(StatusCode, Json<TriggerResponse>)> {
    tracing::info!("Triggering run of pipeline: {}", req.pipeline_name);

    let run_id = state
        .orchestrator
        .trigger_run(&req.pipeline_name, req.parameters)
        .await?;
    Ok((StatusCode::ACCEPTED, Json(TriggerResponse { run_id })))
}

/// GET /run/{id}
pub async fn get_run(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<RunRecord>> {
    tracing::debug!("Getting run: {}", id);

    Ok(Json(state.orchestrator.get_run(id).await?))
}

/// POST /run/{id}/cancel
pub async fn cancel_run(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<(StatusCode, Json<RunSummary>)> {
    tracing::info!("Cancelling run: {}", id);

    let run = state.orchestrator.cancel_run(id).await?;
    Ok((StatusCode::ACCEPTED, Json(run.into())))
}

/// GET /run/pipeline/{name}?limit=N
pub async fn list_runs_by_pipeline(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Query(query): Query<RunListQuery>,
) -> ApiResult<Json<Vec<RunSummary>>> {
    tracing::debug!("Listing runs of pipeline: {}", name);

    let runs = state.orchestrator.list_runs(&name, query.limit).await?;
    Ok(Json(runs.into_iter().map(RunSummary::from).collect()))
}
