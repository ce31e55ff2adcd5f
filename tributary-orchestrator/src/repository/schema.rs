//! Dataset Schema Repository

use sqlx::PgPool;
use tributary_core::domain::schema::DatasetSchema;

use crate::store::StoreError;

/// Latest registered version of a dataset
pub async fn find_latest(pool: &PgPool, dataset: &str) -> Result<Option<DatasetSchema>, StoreError> {
    let row = sqlx::query_as::<_, SchemaRow>(
        r#"
        SELECT dataset, version, columns, registered_at
        FROM dataset_schemas
        WHERE dataset = $1
        ORDER BY version DESC
        LIMIT 1
        "#,
    )
    .bind(dataset)
    .fetch_optional(pool)
    .await?;

    row.map(TryInto::try_into).transpose()
}

/// Every version of a dataset, oldest first
pub async fn find_history(pool: &PgPool, dataset: &str) -> Result<Vec<DatasetSchema>, StoreError> {
    let rows = sqlx::query_as::<_, SchemaRow>(
        r#"
        SELECT dataset, version, columns, registered_at
        FROM dataset_schemas
        WHERE dataset = $1
        ORDER BY version ASC
        "#,
    )
    .bind(dataset)
    .fetch_all(pool)
    .await?;

    rows.into_iter().map(TryInto::try_into).collect()
}

/// Insert a version only if it directly follows the latest one
pub async fn insert_next(pool: &PgPool, schema: &DatasetSchema) -> Result<(), StoreError> {
    let result = sqlx::query(
        r#"
        INSERT INTO dataset_schemas (dataset, version, columns, registered_at)
        SELECT $1, $2, $3, $4
        WHERE COALESCE(
            (SELECT MAX(version) FROM dataset_schemas WHERE dataset = $1), 0
        ) = $2 - 1
        "#,
    )
    .bind(&schema.dataset)
    .bind(schema.version as i32)
    .bind(serde_json::to_value(&schema.columns)?)
    .bind(schema.registered_at)
    .execute(pool)
    .await;

    let conflict = || StoreError::VersionConflict {
        dataset: schema.dataset.clone(),
        expected: schema.version,
    };

    match result {
        Ok(done) if done.rows_affected() == 1 => Ok(()),
        Ok(_) => Err(conflict()),
        Err(sqlx::Error::Database(db)) if db.is_unique_violation() => Err(conflict()),
        Err(err) => Err(err.into()),
    }
}

// =============================================================================
// Database Row Types
// =============================================================================

#[derive(sqlx::FromRow)]
struct SchemaRow {
    dataset: String,
    version: i32,
    columns: serde_json::Value,
    registered_at: chrono::DateTime<chrono::Utc>,
}

impl TryFrom<SchemaRow> for DatasetSchema {
    type Error = StoreError;

    fn try_from(row: SchemaRow) -> Result<Self, Self::Error> {
        Ok(DatasetSchema {
            dataset: row.dataset,
            version: row.version as u32,
            columns: serde_json::from_value(row.columns)?,
            registered_at: row.registered_at,
        })
    }
}
