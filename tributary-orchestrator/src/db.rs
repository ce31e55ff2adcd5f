use sqlx::{PgPool, postgres::PgPoolOptions};
use std::time::Duration;

pub async fn create_pool(database_url: &str) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(10)
        .acquire_timeout(Duration::from_secs(5))
        .connect(database_url)
        .await
}

pub async fn run_migrations(pool: &PgPool) -> Result<(), sqlx::Error> {
    // Create pipelines table
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS pipelines (
            id UUID PRIMARY KEY,
            name VARCHAR(255) NOT NULL UNIQUE,
            description TEXT,
            dataset VARCHAR(255) NOT NULL,
            config JSONB NOT NULL,
            created_at TIMESTAMPTZ NOT NULL,
            updated_at TIMESTAMPTZ NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Create pipeline runs table
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS pipeline_runs (
            id UUID PRIMARY KEY,
            pipeline_name VARCHAR(255) NOT NULL,
            dataset VARCHAR(255) NOT NULL,
            state VARCHAR(50) NOT NULL,
            current_stage VARCHAR(50),
            parameters JSONB NOT NULL DEFAULT '{}',
            config JSONB NOT NULL,
            last_error JSONB,
            cancel_requested BOOLEAN NOT NULL DEFAULT FALSE,
            fencing_token BIGINT NOT NULL,
            triggered_at TIMESTAMPTZ NOT NULL,
            updated_at TIMESTAMPTZ NOT NULL,
            completed_at TIMESTAMPTZ
        )
        "#,
    )
    .execute(pool)
    .await?;

    // At most one non-terminal run per pipeline
    sqlx::query(
        r#"
        CREATE UNIQUE INDEX IF NOT EXISTS idx_pipeline_runs_one_active
        ON pipeline_runs(pipeline_name)
        WHERE state NOT IN ('succeeded', 'failed', 'cancelled')
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_pipeline_runs_pipeline ON pipeline_runs(pipeline_name, triggered_at DESC)",
    )
    .execute(pool)
    .await?;

    // Create stage executions table
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS stage_executions (
            run_id UUID NOT NULL REFERENCES pipeline_runs(id) ON DELETE CASCADE,
            stage VARCHAR(50) NOT NULL,
            attempt INTEGER NOT NULL,
            idempotency_key UUID NOT NULL UNIQUE,
            handle TEXT,
            status VARCHAR(50) NOT NULL,
            started_at TIMESTAMPTZ NOT NULL,
            finished_at TIMESTAMPTZ,
            poll_count BIGINT NOT NULL DEFAULT 0,
            error JSONB,
            violations JSONB NOT NULL DEFAULT '[]',
            output JSONB,
            PRIMARY KEY (run_id, stage, attempt)
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Create leases table; rows are never deleted so tokens stay monotonic
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS pipeline_leases (
            pipeline_name VARCHAR(255) PRIMARY KEY,
            owner VARCHAR(255),
            token BIGINT NOT NULL,
            expires_at TIMESTAMPTZ NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Create dataset schemas table
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS dataset_schemas (
            dataset VARCHAR(255) NOT NULL,
            version INTEGER NOT NULL,
            columns JSONB NOT NULL,
            registered_at TIMESTAMPTZ NOT NULL,
            PRIMARY KEY (dataset, version)
        )
        "#,
    )
    .execute(pool)
    .await?;

    tracing::info!("Database migrations completed successfully");
    Ok(())
}
