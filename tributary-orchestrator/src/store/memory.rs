//! In-memory store
//!
//! Implements every store trait over a single mutex-guarded state. Used by
//! tests and by `STATE_BACKEND=memory` development setups; nothing survives
//! a restart.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tributary_core::domain::pipeline::PipelineDefinition;
use tributary_core::domain::run::{PipelineRun, RunRecord};
use tributary_core::domain::schema::DatasetSchema;
use tributary_core::domain::stage::StageExecution;
use uuid::Uuid;

use super::{
    Lease, PipelineStore, Result, RunStateStore, SchemaStore, StoreError, lease_deadline,
};

#[derive(Default)]
struct State {
    leases: HashMap<String, Lease>,
    /// Last token issued per pipeline; survives release so tokens never repeat
    last_tokens: HashMap<String, u64>,
    runs: HashMap<Uuid, PipelineRun>,
    stages: HashMap<Uuid, Vec<StageExecution>>,
    pipelines: BTreeMap<String, PipelineDefinition>,
    schemas: HashMap<String, Vec<DatasetSchema>>,
}

impl State {
    fn next_token(&mut self, pipeline: &str) -> u64 {
        let token = self.last_tokens.entry(pipeline.to_string()).or_insert(0);
        *token += 1;
        *token
    }

    fn check_fence(&self, fence: &Lease) -> Result<()> {
        match self.leases.get(&fence.pipeline_name) {
            Some(current) if current.token == fence.token => Ok(()),
            _ => Err(StoreError::Fenced {
                pipeline: fence.pipeline_name.clone(),
                token: fence.token,
            }),
        }
    }

    fn record(&self, run: &PipelineRun) -> RunRecord {
        RunRecord {
            run: run.clone(),
            stages: self.stages.get(&run.id).cloned().unwrap_or_default(),
        }
    }
}

#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<State>,
    failing_writes: AtomicU32,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `count` run writes fail as if the backend were down
    pub fn fail_next_writes(&self, count: u32) {
        self.failing_writes.store(count, Ordering::SeqCst);
    }

    fn lock(&self) -> Result<MutexGuard<'_, State>> {
        self.state
            .lock()
            .map_err(|_| StoreError::Unavailable("memory store lock poisoned".to_string()))
    }

    fn simulate_outage(&self) -> Result<()> {
        let injected = self
            .failing_writes
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        match injected {
            Ok(_) => Err(StoreError::Unavailable("injected outage".to_string())),
            Err(_) => Ok(()),
        }
    }
}

#[async_trait]
impl RunStateStore for MemoryStore {
    async fn acquire_lease(&self, pipeline: &str, owner: &str, ttl: Duration) -> Result<Lease> {
        let mut state = self.lock()?;
        let now = Utc::now();

        if let Some(held) = state.leases.get(pipeline)
            && !held.is_expired_at(now)
        {
            return Err(StoreError::LeaseHeld {
                pipeline: pipeline.to_string(),
                owner: held.owner.clone(),
                expires_at: held.expires_at,
            });
        }

        let lease = Lease {
            pipeline_name: pipeline.to_string(),
            owner: owner.to_string(),
            token: state.next_token(pipeline),
            expires_at: lease_deadline(now, ttl),
        };
        state.leases.insert(pipeline.to_string(), lease.clone());
        Ok(lease)
    }

    async fn renew_lease(&self, lease: &Lease, ttl: Duration) -> Result<Lease> {
        let mut state = self.lock()?;
        state.check_fence(lease)?;

        let renewed = Lease {
            expires_at: lease_deadline(Utc::now(), ttl),
            ..lease.clone()
        };
        state
            .leases
            .insert(lease.pipeline_name.clone(), renewed.clone());
        Ok(renewed)
    }

    async fn rotate_lease(&self, lease: &Lease, ttl: Duration) -> Result<Lease> {
        let mut state = self.lock()?;
        state.check_fence(lease)?;

        let rotated = Lease {
            token: state.next_token(&lease.pipeline_name),
            expires_at: lease_deadline(Utc::now(), ttl),
            ..lease.clone()
        };
        state
            .leases
            .insert(lease.pipeline_name.clone(), rotated.clone());
        Ok(rotated)
    }

    async fn release_lease(&self, lease: &Lease) -> Result<()> {
        let mut state = self.lock()?;
        if state.check_fence(lease).is_ok() {
            state.leases.remove(&lease.pipeline_name);
        }
        Ok(())
    }

    async fn create_run(&self, run: &PipelineRun, fence: &Lease) -> Result<()> {
        self.simulate_outage()?;
        let mut state = self.lock()?;
        state.check_fence(fence)?;

        let active = state
            .runs
            .values()
            .any(|r| r.pipeline_name == run.pipeline_name && !r.is_terminal());
        if active {
            return Err(StoreError::ActiveRunExists(run.pipeline_name.clone()));
        }

        state.runs.insert(run.id, run.clone());
        state.stages.insert(run.id, Vec::new());
        Ok(())
    }

    async fn save(
        &self,
        run: &PipelineRun,
        stages: &[StageExecution],
        fence: &Lease,
    ) -> Result<()> {
        self.simulate_outage()?;
        let mut state = self.lock()?;
        state.check_fence(fence)?;

        let stored = state
            .runs
            .get(&run.id)
            .ok_or_else(|| StoreError::NotFound(run.id.to_string()))?;

        let mut updated = run.clone();
        updated.cancel_requested |= stored.cancel_requested;
        state.runs.insert(run.id, updated);
        state.stages.insert(run.id, stages.to_vec());
        Ok(())
    }

    async fn load_run(&self, run_id: Uuid) -> Result<Option<RunRecord>> {
        let state = self.lock()?;
        Ok(state.runs.get(&run_id).map(|run| state.record(run)))
    }

    async fn load_active(&self, pipeline: &str) -> Result<Option<RunRecord>> {
        let state = self.lock()?;
        Ok(state
            .runs
            .values()
            .find(|r| r.pipeline_name == pipeline && !r.is_terminal())
            .map(|run| state.record(run)))
    }

    async fn list_active(&self) -> Result<Vec<RunRecord>> {
        let state = self.lock()?;
        let mut active: Vec<RunRecord> = state
            .runs
            .values()
            .filter(|r| !r.is_terminal())
            .map(|run| state.record(run))
            .collect();
        active.sort_by_key(|r| r.run.triggered_at);
        Ok(active)
    }

    async fn list_terminal(&self, pipeline: &str, limit: u32) -> Result<Vec<PipelineRun>> {
        let state = self.lock()?;
        let mut runs: Vec<PipelineRun> = state
            .runs
            .values()
            .filter(|r| r.pipeline_name == pipeline && r.is_terminal())
            .cloned()
            .collect();
        runs.sort_by(|a, b| b.triggered_at.cmp(&a.triggered_at));
        runs.truncate(limit as usize);
        Ok(runs)
    }

    async fn latest_run(&self, pipeline: &str) -> Result<Option<PipelineRun>> {
        let state = self.lock()?;
        Ok(state
            .runs
            .values()
            .filter(|r| r.pipeline_name == pipeline)
            .max_by_key(|r| r.triggered_at)
            .cloned())
    }

    async fn request_cancel(&self, run_id: Uuid) -> Result<Option<PipelineRun>> {
        let mut state = self.lock()?;
        let Some(run) = state.runs.get_mut(&run_id) else {
            return Ok(None);
        };
        if !run.is_terminal() {
            run.cancel_requested = true;
            run.updated_at = Utc::now();
        }
        Ok(Some(run.clone()))
    }

    async fn cancel_requested(&self, run_id: Uuid) -> Result<bool> {
        let state = self.lock()?;
        Ok(state
            .runs
            .get(&run_id)
            .is_some_and(|r| r.cancel_requested))
    }
}

#[async_trait]
impl PipelineStore for MemoryStore {
    async fn create_pipeline(&self, pipeline: &PipelineDefinition) -> Result<()> {
        let mut state = self.lock()?;
        if state.pipelines.contains_key(&pipeline.name) {
            return Err(StoreError::Duplicate(pipeline.name.clone()));
        }
        state
            .pipelines
            .insert(pipeline.name.clone(), pipeline.clone());
        Ok(())
    }

    async fn get_pipeline(&self, name: &str) -> Result<Option<PipelineDefinition>> {
        Ok(self.lock()?.pipelines.get(name).cloned())
    }

    async fn list_pipelines(&self) -> Result<Vec<PipelineDefinition>> {
        Ok(self.lock()?.pipelines.values().cloned().collect())
    }

    async fn delete_pipeline(&self, name: &str) -> Result<bool> {
        Ok(self.lock()?.pipelines.remove(name).is_some())
    }
}

#[async_trait]
impl SchemaStore for MemoryStore {
    async fn latest_schema(&self, dataset: &str) -> Result<Option<DatasetSchema>> {
        Ok(self
            .lock()?
            .schemas
            .get(dataset)
            .and_then(|versions| versions.last())
            .cloned())
    }

    async fn schema_history(&self, dataset: &str) -> Result<Vec<DatasetSchema>> {
        Ok(self
            .lock()?
            .schemas
            .get(dataset)
            .cloned()
            .unwrap_or_default())
    }

    async fn insert_schema(&self, schema: &DatasetSchema) -> Result<()> {
        let mut state = self.lock()?;
        let versions = state.schemas.entry(schema.dataset.clone()).or_default();
        let expected = versions.last().map_or(1, |s| s.version + 1);
        if schema.version != expected {
            return Err(StoreError::VersionConflict {
                dataset: schema.dataset.clone(),
                expected,
            });
        }
        versions.push(schema.clone());
        Ok(())
    }
}
