//! Store Module
//!
//! Durable state behind the orchestrator: pipeline runs and their stage
//! attempts, per-pipeline leases, pipeline definitions and dataset schemas.
//!
//! Every store is a trait so the engine can run against Postgres in
//! production and against [`MemoryStore`] in tests or development.

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tributary_core::domain::pipeline::PipelineDefinition;
use tributary_core::domain::run::{PipelineRun, RunRecord};
use tributary_core::domain::schema::DatasetSchema;
use tributary_core::domain::stage::StageExecution;
use uuid::Uuid;

pub use memory::MemoryStore;
pub use postgres::PgStore;

/// Store error type
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Backend could not be reached or failed mid-operation
    #[error("state store unavailable: {0}")]
    Unavailable(String),

    /// Another owner holds an unexpired lease on the pipeline
    #[error("lease on pipeline '{pipeline}' is held by {owner} until {expires_at}")]
    LeaseHeld {
        pipeline: String,
        owner: String,
        expires_at: DateTime<Utc>,
    },

    /// The caller's fencing token is no longer the current one
    #[error("fencing token {token} for pipeline '{pipeline}' is stale")]
    Fenced { pipeline: String, token: u64 },

    /// A non-terminal run already exists for the pipeline
    #[error("pipeline '{0}' already has an active run")]
    ActiveRunExists(String),

    /// Schema version compare-and-set lost
    #[error("dataset '{dataset}' expected next version {expected}")]
    VersionConflict { dataset: String, expected: u32 },

    #[error("'{0}' already exists")]
    Duplicate(String),

    #[error("'{0}' not found")]
    NotFound(String),

    #[error("failed to decode stored value: {0}")]
    Corrupt(String),
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        StoreError::Unavailable(err.to_string())
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        StoreError::Corrupt(err.to_string())
    }
}

impl StoreError {
    /// Whether retrying the same operation later can succeed
    pub fn is_unavailable(&self) -> bool {
        matches!(self, StoreError::Unavailable(_))
    }
}

pub type Result<T> = std::result::Result<T, StoreError>;

/// Time-bound exclusive right to drive a pipeline's active run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lease {
    pub pipeline_name: String,
    pub owner: String,
    /// Strictly increases every time the lease changes hands or rotates
    pub token: u64,
    pub expires_at: DateTime<Utc>,
}

impl Lease {
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}

/// Expiry for a lease granted now with `ttl`
pub(crate) fn lease_deadline(now: DateTime<Utc>, ttl: Duration) -> DateTime<Utc> {
    now + chrono::Duration::from_std(ttl).unwrap_or(chrono::Duration::MAX)
}

/// Durable record of pipeline-run progress
///
/// Writes that mutate a run carry the writer's lease; the store rejects them
/// with [`StoreError::Fenced`] unless that lease is still the current one.
#[async_trait]
pub trait RunStateStore: Send + Sync {
    /// Take the pipeline's lease if it is free or expired
    async fn acquire_lease(&self, pipeline: &str, owner: &str, ttl: Duration) -> Result<Lease>;

    /// Extend a lease that is still current
    async fn renew_lease(&self, lease: &Lease, ttl: Duration) -> Result<Lease>;

    /// Release and re-acquire in one step, yielding a new fencing token
    async fn rotate_lease(&self, lease: &Lease, ttl: Duration) -> Result<Lease>;

    /// Give the lease up; a stale lease is ignored
    async fn release_lease(&self, lease: &Lease) -> Result<()>;

    /// Persist a new run; fails if the pipeline already has an active run
    async fn create_run(&self, run: &PipelineRun, fence: &Lease) -> Result<()>;

    /// Persist a run together with its stage attempts
    async fn save(&self, run: &PipelineRun, stages: &[StageExecution], fence: &Lease)
    -> Result<()>;

    async fn load_run(&self, run_id: Uuid) -> Result<Option<RunRecord>>;

    /// The pipeline's non-terminal run, if any
    async fn load_active(&self, pipeline: &str) -> Result<Option<RunRecord>>;

    /// Every non-terminal run, across pipelines
    async fn list_active(&self) -> Result<Vec<RunRecord>>;

    /// Most recent terminal runs of a pipeline, newest first
    async fn list_terminal(&self, pipeline: &str, limit: u32) -> Result<Vec<PipelineRun>>;

    /// Most recent run of a pipeline regardless of state
    async fn latest_run(&self, pipeline: &str) -> Result<Option<PipelineRun>>;

    /// Set the durable cancel flag on a non-terminal run
    async fn request_cancel(&self, run_id: Uuid) -> Result<Option<PipelineRun>>;

    async fn cancel_requested(&self, run_id: Uuid) -> Result<bool>;
}

/// Pipeline definitions
#[async_trait]
pub trait PipelineStore: Send + Sync {
    async fn create_pipeline(&self, pipeline: &PipelineDefinition) -> Result<()>;
    async fn get_pipeline(&self, name: &str) -> Result<Option<PipelineDefinition>>;
    async fn list_pipelines(&self) -> Result<Vec<PipelineDefinition>>;
    async fn delete_pipeline(&self, name: &str) -> Result<bool>;
}

/// Versioned dataset schemas
#[async_trait]
pub trait SchemaStore: Send + Sync {
    async fn latest_schema(&self, dataset: &str) -> Result<Option<DatasetSchema>>;
    async fn schema_history(&self, dataset: &str) -> Result<Vec<DatasetSchema>>;

    /// Insert `schema`, whose version must be exactly one past the latest
    async fn insert_schema(&self, schema: &DatasetSchema) -> Result<()>;
}
