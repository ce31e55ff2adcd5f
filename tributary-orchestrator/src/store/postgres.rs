//! Postgres store
//!
//! Delegates to the repository functions. Fenced writes run in one
//! transaction that first locks the pipeline's lease row.

use async_trait::async_trait;
use chrono::Utc;
use sqlx::PgPool;
use std::time::Duration;
use tributary_core::domain::pipeline::PipelineDefinition;
use tributary_core::domain::run::{PipelineRun, RunRecord};
use tributary_core::domain::schema::DatasetSchema;
use tributary_core::domain::stage::StageExecution;
use uuid::Uuid;

use super::{
    Lease, PipelineStore, Result, RunStateStore, SchemaStore, StoreError, lease_deadline,
};
use crate::repository::{
    lease_repository, pipeline_repository, run_repository, schema_repository, stage_repository,
};

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn record(&self, run: PipelineRun) -> Result<RunRecord> {
        let stages = stage_repository::find_by_run(&self.pool, run.id).await?;
        Ok(RunRecord { run, stages })
    }

    fn fenced(lease: &Lease) -> StoreError {
        StoreError::Fenced {
            pipeline: lease.pipeline_name.clone(),
            token: lease.token,
        }
    }
}

#[async_trait]
impl RunStateStore for PgStore {
    async fn acquire_lease(&self, pipeline: &str, owner: &str, ttl: Duration) -> Result<Lease> {
        let now = Utc::now();
        let acquired =
            lease_repository::acquire(&self.pool, pipeline, owner, lease_deadline(now, ttl), now)
                .await?;

        if let Some(lease) = acquired {
            return Ok(lease);
        }

        match lease_repository::find_held(&self.pool, pipeline).await? {
            Some(held) => Err(StoreError::LeaseHeld {
                pipeline: pipeline.to_string(),
                owner: held.owner,
                expires_at: held.expires_at,
            }),
            // Released between the two statements
            None => Err(StoreError::Unavailable(format!(
                "lease on '{pipeline}' changed hands during acquire"
            ))),
        }
    }

    async fn renew_lease(&self, lease: &Lease, ttl: Duration) -> Result<Lease> {
        lease_repository::renew(&self.pool, lease, lease_deadline(Utc::now(), ttl))
            .await?
            .ok_or_else(|| Self::fenced(lease))
    }

    async fn rotate_lease(&self, lease: &Lease, ttl: Duration) -> Result<Lease> {
        lease_repository::rotate(&self.pool, lease, lease_deadline(Utc::now(), ttl))
            .await?
            .ok_or_else(|| Self::fenced(lease))
    }

    async fn release_lease(&self, lease: &Lease) -> Result<()> {
        lease_repository::release(&self.pool, lease, Utc::now()).await
    }

    async fn create_run(&self, run: &PipelineRun, fence: &Lease) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        lease_repository::check_fence(&mut tx, fence).await?;
        run_repository::insert(&mut tx, run).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn save(
        &self,
        run: &PipelineRun,
        stages: &[StageExecution],
        fence: &Lease,
    ) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        lease_repository::check_fence(&mut tx, fence).await?;

        if !run_repository::update(&mut tx, run).await? {
            return Err(StoreError::NotFound(run.id.to_string()));
        }
        for exec in stages {
            stage_repository::upsert(&mut tx, exec).await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn load_run(&self, run_id: Uuid) -> Result<Option<RunRecord>> {
        match run_repository::find_by_id(&self.pool, run_id).await? {
            Some(run) => Ok(Some(self.record(run).await?)),
            None => Ok(None),
        }
    }

    async fn load_active(&self, pipeline: &str) -> Result<Option<RunRecord>> {
        match run_repository::find_active(&self.pool, pipeline).await? {
            Some(run) => Ok(Some(self.record(run).await?)),
            None => Ok(None),
        }
    }

    async fn list_active(&self) -> Result<Vec<RunRecord>> {
        let runs = run_repository::list_active(&self.pool).await?;
        let mut records = Vec::with_capacity(runs.len());
        for run in runs {
            records.push(self.record(run).await?);
        }
        Ok(records)
    }

    async fn list_terminal(&self, pipeline: &str, limit: u32) -> Result<Vec<PipelineRun>> {
        run_repository::list_terminal(&self.pool, pipeline, limit).await
    }

    async fn latest_run(&self, pipeline: &str) -> Result<Option<PipelineRun>> {
        run_repository::find_latest(&self.pool, pipeline).await
    }

    async fn request_cancel(&self, run_id: Uuid) -> Result<Option<PipelineRun>> {
        run_repository::request_cancel(&self.pool, run_id).await
    }

    async fn cancel_requested(&self, run_id: Uuid) -> Result<bool> {
        run_repository::cancel_requested(&self.pool, run_id).await
    }
}

#[async_trait]
impl PipelineStore for PgStore {
    async fn create_pipeline(&self, pipeline: &PipelineDefinition) -> Result<()> {
        pipeline_repository::create(&self.pool, pipeline).await
    }

    async fn get_pipeline(&self, name: &str) -> Result<Option<PipelineDefinition>> {
        pipeline_repository::find_by_name(&self.pool, name).await
    }

    async fn list_pipelines(&self) -> Result<Vec<PipelineDefinition>> {
        pipeline_repository::list_all(&self.pool).await
    }

    async fn delete_pipeline(&self, name: &str) -> Result<bool> {
        pipeline_repository::delete(&self.pool, name).await
    }
}

#[async_trait]
impl SchemaStore for PgStore {
    async fn latest_schema(&self, dataset: &str) -> Result<Option<DatasetSchema>> {
        schema_repository::find_latest(&self.pool, dataset).await
    }

    async fn schema_history(&self, dataset: &str) -> Result<Vec<DatasetSchema>> {
        schema_repository::find_history(&self.pool, dataset).await
    }

    async fn insert_schema(&self, schema: &DatasetSchema) -> Result<()> {
        schema_repository::insert_next(&self.pool, schema).await
    }
}
