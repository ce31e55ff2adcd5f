//! Stage Execution Repository
//!
//! One row per stage attempt, keyed by (run, stage, attempt).

use sqlx::{PgConnection, PgPool};
use tributary_core::domain::stage::{StageExecution, StageKind, StageStatus};
use uuid::Uuid;

use crate::store::StoreError;

/// Insert or update a stage attempt
pub async fn upsert(conn: &mut PgConnection, exec: &StageExecution) -> Result<(), StoreError> {
    sqlx::query(
        r#"
        INSERT INTO stage_executions (
            run_id, stage, attempt, idempotency_key, handle, status,
            started_at, finished_at, poll_count, error, violations, output
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
        ON CONFLICT (run_id, stage, attempt) DO UPDATE
        SET handle = EXCLUDED.handle,
            status = EXCLUDED.status,
            finished_at = EXCLUDED.finished_at,
            poll_count = EXCLUDED.poll_count,
            error = EXCLUDED.error,
            violations = EXCLUDED.violations,
            output = EXCLUDED.output
        "#,
    )
    .bind(exec.run_id)
    .bind(exec.stage.as_str())
    .bind(exec.attempt as i32)
    .bind(exec.idempotency_key)
    .bind(&exec.handle)
    .bind(exec.status.as_str())
    .bind(exec.started_at)
    .bind(exec.finished_at)
    .bind(exec.poll_count as i64)
    .bind(exec.error.as_ref().map(serde_json::to_value).transpose()?)
    .bind(serde_json::to_value(&exec.violations)?)
    .bind(exec.output.as_ref().map(serde_json::to_value).transpose()?)
    .execute(&mut *conn)
    .await?;

    Ok(())
}

/// All attempts of a run, in execution order
pub async fn find_by_run(pool: &PgPool, run_id: Uuid) -> Result<Vec<StageExecution>, StoreError> {
    let rows = sqlx::query_as::<_, StageRow>(
        r#"
        SELECT run_id, stage, attempt, idempotency_key, handle, status,
               started_at, finished_at, poll_count, error, violations, output
        FROM stage_executions
        WHERE run_id = $1
        ORDER BY started_at ASC, attempt ASC
        "#,
    )
    .bind(run_id)
    .fetch_all(pool)
    .await?;

    rows.into_iter().map(TryInto::try_into).collect()
}

// =============================================================================
// Database Row Types
// =============================================================================

#[derive(sqlx::FromRow)]
struct StageRow {
    run_id: Uuid,
    stage: String,
    attempt: i32,
    idempotency_key: Uuid,
    handle: Option<String>,
    status: String,
    started_at: chrono::DateTime<chrono::Utc>,
    finished_at: Option<chrono::DateTime<chrono::Utc>>,
    poll_count: i64,
    error: Option<serde_json::Value>,
    violations: serde_json::Value,
    output: Option<serde_json::Value>,
}

impl TryFrom<StageRow> for StageExecution {
    type Error = StoreError;

    fn try_from(row: StageRow) -> Result<Self, Self::Error> {
        let stage = StageKind::parse(&row.stage)
            .ok_or_else(|| StoreError::Corrupt(format!("unknown stage '{}'", row.stage)))?;
        let status = StageStatus::parse(&row.status)
            .ok_or_else(|| StoreError::Corrupt(format!("unknown stage status '{}'", row.status)))?;

        Ok(StageExecution {
            run_id: row.run_id,
            stage,
            attempt: row.attempt as u32,
            idempotency_key: row.idempotency_key,
            handle: row.handle,
            status,
            started_at: row.started_at,
            finished_at: row.finished_at,
            poll_count: row.poll_count as u64,
            error: row.error.map(serde_json::from_value).transpose()?,
            violations: serde_json::from_value(row.violations)?,
            output: row.output.map(serde_json::from_value).transpose()?,
        })
    }
}
