//! Run Repository
//!
//! Handles all database operations related to pipeline runs.

use sqlx::{PgConnection, PgPool};
use tributary_core::domain::run::{PipelineRun, RunState};
use tributary_core::domain::stage::StageKind;
use uuid::Uuid;

use crate::store::StoreError;

const ONE_ACTIVE_INDEX: &str = "idx_pipeline_runs_one_active";

const RUN_COLUMNS: &str = r#"
    id, pipeline_name, dataset, state, current_stage, parameters, config,
    last_error, cancel_requested, fencing_token, triggered_at, updated_at, completed_at
"#;

/// Insert a new run
pub async fn insert(conn: &mut PgConnection, run: &PipelineRun) -> Result<(), StoreError> {
    let result = sqlx::query(
        r#"
        INSERT INTO pipeline_runs (
            id, pipeline_name, dataset, state, current_stage, parameters, config,
            last_error, cancel_requested, fencing_token, triggered_at, updated_at, completed_at
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
        "#,
    )
    .bind(run.id)
    .bind(&run.pipeline_name)
    .bind(&run.dataset)
    .bind(run.state.as_str())
    .bind(run.current_stage.map(|s| s.as_str()))
    .bind(serde_json::to_value(&run.parameters)?)
    .bind(serde_json::to_value(&run.config)?)
    .bind(run.last_error.as_ref().map(serde_json::to_value).transpose()?)
    .bind(run.cancel_requested)
    .bind(run.fencing_token as i64)
    .bind(run.triggered_at)
    .bind(run.updated_at)
    .bind(run.completed_at)
    .execute(&mut *conn)
    .await;

    match result {
        Ok(_) => Ok(()),
        Err(sqlx::Error::Database(db))
            if db.is_unique_violation() && db.constraint() == Some(ONE_ACTIVE_INDEX) =>
        {
            Err(StoreError::ActiveRunExists(run.pipeline_name.clone()))
        }
        Err(err) => Err(err.into()),
    }
}

/// Update a run's mutable fields
///
/// The stored cancel flag is sticky: a concurrent cancel request is never
/// overwritten by a writer that has not seen it yet.
pub async fn update(conn: &mut PgConnection, run: &PipelineRun) -> Result<bool, StoreError> {
    let result = sqlx::query(
        r#"
        UPDATE pipeline_runs
        SET state = $2, current_stage = $3, last_error = $4,
            cancel_requested = cancel_requested OR $5,
            fencing_token = $6, updated_at = $7, completed_at = $8
        WHERE id = $1
        "#,
    )
    .bind(run.id)
    .bind(run.state.as_str())
    .bind(run.current_stage.map(|s| s.as_str()))
    .bind(run.last_error.as_ref().map(serde_json::to_value).transpose()?)
    .bind(run.cancel_requested)
    .bind(run.fencing_token as i64)
    .bind(run.updated_at)
    .bind(run.completed_at)
    .execute(&mut *conn)
    .await?;

    Ok(result.rows_affected() > 0)
}

/// Find a run by ID
pub async fn find_by_id(pool: &PgPool, id: Uuid) -> Result<Option<PipelineRun>, StoreError> {
    let row = sqlx::query_as::<_, RunRow>(&format!(
        "SELECT {RUN_COLUMNS} FROM pipeline_runs WHERE id = $1"
    ))
    .bind(id)
    .fetch_optional(pool)
    .await?;

    row.map(TryInto::try_into).transpose()
}

/// Find the non-terminal run of a pipeline
pub async fn find_active(pool: &PgPool, pipeline: &str) -> Result<Option<PipelineRun>, StoreError> {
    let row = sqlx::query_as::<_, RunRow>(&format!(
        r#"
        SELECT {RUN_COLUMNS}
        FROM pipeline_runs
        WHERE pipeline_name = $1 AND state NOT IN ('succeeded', 'failed', 'cancelled')
        "#
    ))
    .bind(pipeline)
    .fetch_optional(pool)
    .await?;

    row.map(TryInto::try_into).transpose()
}

/// List every non-terminal run, oldest first
pub async fn list_active(pool: &PgPool) -> Result<Vec<PipelineRun>, StoreError> {
    let rows = sqlx::query_as::<_, RunRow>(&format!(
        r#"
        SELECT {RUN_COLUMNS}
        FROM pipeline_runs
        WHERE state NOT IN ('succeeded', 'failed', 'cancelled')
        ORDER BY triggered_at ASC
        "#
    ))
    .fetch_all(pool)
    .await?;

    rows.into_iter().map(TryInto::try_into).collect()
}

/// List the most recent terminal runs of a pipeline
pub async fn list_terminal(
    pool: &PgPool,
    pipeline: &str,
    limit: u32,
) -> Result<Vec<PipelineRun>, StoreError> {
    let rows = sqlx::query_as::<_, RunRow>(&format!(
        r#"
        SELECT {RUN_COLUMNS}
        FROM pipeline_runs
        WHERE pipeline_name = $1 AND state IN ('succeeded', 'failed', 'cancelled')
        ORDER BY triggered_at DESC
        LIMIT $2
        "#
    ))
    .bind(pipeline)
    .bind(limit as i64)
    .fetch_all(pool)
    .await?;

    rows.into_iter().map(TryInto::try_into).collect()
}

/// Most recently triggered run of a pipeline
pub async fn find_latest(pool: &PgPool, pipeline: &str) -> Result<Option<PipelineRun>, StoreError> {
    let row = sqlx::query_as::<_, RunRow>(&format!(
        r#"
        SELECT {RUN_COLUMNS}
        FROM pipeline_runs
        WHERE pipeline_name = $1
        ORDER BY triggered_at DESC
        LIMIT 1
        "#
    ))
    .bind(pipeline)
    .fetch_optional(pool)
    .await?;

    row.map(TryInto::try_into).transpose()
}

/// Set the cancel flag on a non-terminal run and return the run
pub async fn request_cancel(pool: &PgPool, id: Uuid) -> Result<Option<PipelineRun>, StoreError> {
    sqlx::query(
        r#"
        UPDATE pipeline_runs
        SET cancel_requested = TRUE, updated_at = $2
        WHERE id = $1 AND state NOT IN ('succeeded', 'failed', 'cancelled')
        "#,
    )
    .bind(id)
    .bind(chrono::Utc::now())
    .execute(pool)
    .await?;

    find_by_id(pool, id).await
}

pub async fn cancel_requested(pool: &PgPool, id: Uuid) -> Result<bool, StoreError> {
    let flag: Option<bool> =
        sqlx::query_scalar("SELECT cancel_requested FROM pipeline_runs WHERE id = $1")
            .bind(id)
            .fetch_optional(pool)
            .await?;

    Ok(flag.unwrap_or(false))
}

// =============================================================================
// Database Row Types
// =============================================================================

#[derive(sqlx::FromRow)]
struct RunRow {
    id: Uuid,
    pipeline_name: String,
    dataset: String,
    state: String,
    current_stage: Option<String>,
    parameters: serde_json::Value,
    config: serde_json::Value,
    last_error: Option<serde_json::Value>,
    cancel_requested: bool,
    fencing_token: i64,
    triggered_at: chrono::DateTime<chrono::Utc>,
    updated_at: chrono::DateTime<chrono::Utc>,
    completed_at: Option<chrono::DateTime<chrono::Utc>>,
}

impl TryFrom<RunRow> for PipelineRun {
    type Error = StoreError;

    fn try_from(row: RunRow) -> Result<Self, Self::Error> {
        let state = RunState::parse(&row.state)
            .ok_or_else(|| StoreError::Corrupt(format!("unknown run state '{}'", row.state)))?;
        let current_stage = row
            .current_stage
            .map(|s| {
                StageKind::parse(&s)
                    .ok_or_else(|| StoreError::Corrupt(format!("unknown stage '{s}'")))
            })
            .transpose()?;

        Ok(PipelineRun {
            id: row.id,
            pipeline_name: row.pipeline_name,
            dataset: row.dataset,
            state,
            current_stage,
            parameters: serde_json::from_value(row.parameters)?,
            config: serde_json::from_value(row.config)?,
            last_error: row.last_error.map(serde_json::from_value).transpose()?,
            cancel_requested: row.cancel_requested,
            fencing_token: row.fencing_token as u64,
            triggered_at: row.triggered_at,
            updated_at: row.updated_at,
            completed_at: row.completed_at,
        })
    }
}
