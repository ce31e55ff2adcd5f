//! Pipeline Repository
//!
//! Handles all database operations related to pipeline definitions.

use sqlx::PgPool;
use tributary_core::domain::pipeline::PipelineDefinition;
use uuid::Uuid;

use crate::store::StoreError;

/// Insert a new pipeline definition
pub async fn create(pool: &PgPool, pipeline: &PipelineDefinition) -> Result<(), StoreError> {
    let result = sqlx::query(
        r#"
        INSERT INTO pipelines (id, name, description, dataset, config, created_at, updated_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7)
        "#,
    )
    .bind(pipeline.id)
    .bind(&pipeline.name)
    .bind(&pipeline.description)
    .bind(&pipeline.dataset)
    .bind(serde_json::to_value(&pipeline.config)?)
    .bind(pipeline.created_at)
    .bind(pipeline.updated_at)
    .execute(pool)
    .await;

    match result {
        Ok(_) => Ok(()),
        Err(sqlx::Error::Database(db)) if db.is_unique_violation() => {
            Err(StoreError::Duplicate(pipeline.name.clone()))
        }
        Err(err) => Err(err.into()),
    }
}

/// Find a pipeline by name
pub async fn find_by_name(
    pool: &PgPool,
    name: &str,
) -> Result<Option<PipelineDefinition>, StoreError> {
    let row = sqlx::query_as::<_, PipelineRow>(
        r#"
        SELECT id, name, description, dataset, config, created_at, updated_at
        FROM pipelines
        WHERE name = $1
        "#,
    )
    .bind(name)
    .fetch_optional(pool)
    .await?;

    row.map(TryInto::try_into).transpose()
}

/// List all pipelines
pub async fn list_all(pool: &PgPool) -> Result<Vec<PipelineDefinition>, StoreError> {
    let rows = sqlx::query_as::<_, PipelineRow>(
        r#"
        SELECT id, name, description, dataset, config, created_at, updated_at
        FROM pipelines
        ORDER BY name ASC
        "#,
    )
    .fetch_all(pool)
    .await?;

    rows.into_iter().map(TryInto::try_into).collect()
}

/// Delete a pipeline by name
pub async fn delete(pool: &PgPool, name: &str) -> Result<bool, StoreError> {
    let result = sqlx::query("DELETE FROM pipelines WHERE name = $1")
        .bind(name)
        .execute(pool)
        .await?;

    Ok(result.rows_affected() > 0)
}

// =============================================================================
// Database Row Types
// =============================================================================

#[derive(sqlx::FromRow)]
struct PipelineRow {
    id: Uuid,
    name: String,
    description: Option<String>,
    dataset: String,
    config: serde_json::Value,
    created_at: chrono::DateTime<chrono::Utc>,
    updated_at: chrono::DateTime<chrono::Utc>,
}

impl TryFrom<PipelineRow> for PipelineDefinition {
    type Error = StoreError;

    fn try_from(row: PipelineRow) -> Result<Self, Self::Error> {
        Ok(PipelineDefinition {
            id: row.id,
            name: row.name,
            description: row.description,
            dataset: row.dataset,
            config: serde_json::from_value(row.config)?,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}
