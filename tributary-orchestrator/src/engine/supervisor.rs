//! Orchestrator
//!
//! Entry point for run lifecycle operations. Triggering a run takes the
//! pipeline's lease, records the run and hands it to a driver task; a
//! semaphore bounds how many drivers execute at once. Recovery adopts
//! active runs whose lease has expired.

use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::time::sleep;
use tributary_core::domain::run::{PipelineRun, RunRecord};
use uuid::Uuid;

use super::{Engine, OrchestratorError, RunDriver};
use crate::store::{Lease, PipelineStore, StoreError};

#[derive(Clone)]
pub struct Orchestrator {
    engine: Arc<Engine>,
    pipelines: Arc<dyn PipelineStore>,
    slots: Arc<Semaphore>,
    /// Runs with a driver task in this process
    driving: Arc<Mutex<HashSet<Uuid>>>,
}

impl Orchestrator {
    pub fn new(engine: Engine, pipelines: Arc<dyn PipelineStore>) -> Self {
        let slots = Arc::new(Semaphore::new(engine.settings.max_concurrent_runs.max(1)));
        Self {
            engine: Arc::new(engine),
            pipelines,
            slots,
            driving: Arc::default(),
        }
    }

    pub fn engine(&self) -> &Arc<Engine> {
        &self.engine
    }

    pub fn pipelines(&self) -> &Arc<dyn PipelineStore> {
        &self.pipelines
    }

    /// Start a new run of `pipeline_name`
    ///
    /// Fails with [`OrchestratorError::AlreadyRunning`] while the pipeline
    /// has an active run; concurrent triggers race on the lease and exactly
    /// one of them wins.
    pub async fn trigger_run(
        &self,
        pipeline_name: &str,
        parameters: HashMap<String, Value>,
    ) -> Result<Uuid, OrchestratorError> {
        let store = &self.engine.store;
        let pipeline = self
            .pipelines
            .get_pipeline(pipeline_name)
            .await?
            .ok_or_else(|| OrchestratorError::PipelineNotFound(pipeline_name.to_string()))?;

        if store.load_active(pipeline_name).await?.is_some() {
            return Err(OrchestratorError::AlreadyRunning(pipeline_name.to_string()));
        }

        let lease = match store
            .acquire_lease(pipeline_name, &self.engine.settings.owner, self.engine.settings.lease_ttl)
            .await
        {
            Ok(lease) => lease,
            Err(StoreError::LeaseHeld { owner, .. }) => {
                tracing::debug!(pipeline = pipeline_name, %owner, "Lease held, trigger refused");
                return Err(OrchestratorError::AlreadyRunning(pipeline_name.to_string()));
            }
            Err(err) => return Err(err.into()),
        };

        // An active run under an expired lease is an orphan; drive it instead
        if let Some(record) = store.load_active(pipeline_name).await? {
            if self.is_driving(record.run.id) {
                self.release(&lease).await;
            } else {
                tracing::info!(
                    run_id = %record.run.id,
                    pipeline = pipeline_name,
                    "Adopting orphaned run found at trigger"
                );
                self.spawn(record, lease);
            }
            return Err(OrchestratorError::AlreadyRunning(pipeline_name.to_string()));
        }

        let run = PipelineRun::new(
            &pipeline.name,
            &pipeline.dataset,
            pipeline.config.clone(),
            parameters,
        );
        let run = PipelineRun {
            fencing_token: lease.token,
            ..run
        };

        if let Err(err) = store.create_run(&run, &lease).await {
            self.release(&lease).await;
            return Err(match err {
                StoreError::ActiveRunExists(name) => OrchestratorError::AlreadyRunning(name),
                other => other.into(),
            });
        }

        tracing::info!(
            run_id = %run.id,
            pipeline = %run.pipeline_name,
            dataset = %run.dataset,
            token = lease.token,
            "Run triggered"
        );

        let run_id = run.id;
        self.spawn(
            RunRecord {
                run,
                stages: Vec::new(),
            },
            lease,
        );
        Ok(run_id)
    }

    /// Request cancellation; idempotent, and a no-op on terminal runs
    pub async fn cancel_run(&self, run_id: Uuid) -> Result<PipelineRun, OrchestratorError> {
        let run = self
            .engine
            .store
            .request_cancel(run_id)
            .await?
            .ok_or(OrchestratorError::RunNotFound(run_id))?;

        if run.is_terminal() {
            tracing::debug!(%run_id, state = %run.state, "Cancel ignored, run already finished");
        } else {
            tracing::info!(%run_id, state = %run.state, "Cancellation requested");
        }
        Ok(run)
    }

    pub async fn get_run(&self, run_id: Uuid) -> Result<RunRecord, OrchestratorError> {
        self.engine
            .store
            .load_run(run_id)
            .await?
            .ok_or(OrchestratorError::RunNotFound(run_id))
    }

    /// Most recent runs of a pipeline, the active one first
    pub async fn list_runs(
        &self,
        pipeline_name: &str,
        limit: u32,
    ) -> Result<Vec<PipelineRun>, OrchestratorError> {
        let store = &self.engine.store;
        let mut runs: Vec<PipelineRun> = store
            .load_active(pipeline_name)
            .await?
            .map(|record| record.run)
            .into_iter()
            .collect();
        runs.extend(store.list_terminal(pipeline_name, limit).await?);
        runs.truncate(limit as usize);
        Ok(runs)
    }

    /// Adopt every active run that no live lease protects
    ///
    /// Returns how many runs were handed to new drivers.
    pub async fn recover(&self) -> Result<usize, OrchestratorError> {
        let store = &self.engine.store;
        let mut adopted = 0;

        for record in store.list_active().await? {
            let run_id = record.run.id;
            if self.is_driving(run_id) {
                continue;
            }
            let pipeline = record.run.pipeline_name.as_str();

            let lease = match store
                .acquire_lease(pipeline, &self.engine.settings.owner, self.engine.settings.lease_ttl)
                .await
            {
                Ok(lease) => lease,
                Err(StoreError::LeaseHeld { owner, .. }) => {
                    tracing::debug!(%run_id, %owner, "Run still leased, not recovering");
                    continue;
                }
                Err(err) => {
                    tracing::warn!(%run_id, error = %err, "Could not take lease for recovery");
                    continue;
                }
            };

            // Re-read under the lease; the previous holder may have written since
            let record = match store.load_run(run_id).await {
                Ok(Some(record)) if !record.run.is_terminal() => record,
                Ok(_) => {
                    self.release(&lease).await;
                    continue;
                }
                Err(err) => {
                    tracing::warn!(%run_id, error = %err, "Could not reload run for recovery");
                    self.release(&lease).await;
                    continue;
                }
            };

            tracing::info!(
                %run_id,
                pipeline = %record.run.pipeline_name,
                state = %record.run.state,
                token = lease.token,
                "Recovering run"
            );
            self.spawn(record, lease);
            adopted += 1;
        }

        Ok(adopted)
    }

    /// Periodically look for orphaned runs
    pub async fn run_recovery_loop(&self, every: Duration) {
        loop {
            sleep(every).await;
            match self.recover().await {
                Ok(0) => {}
                Ok(adopted) => tracing::info!(adopted, "Recovered orphaned runs"),
                Err(err) => tracing::warn!(error = %err, "Recovery sweep failed"),
            }
        }
    }

    /// Hand a leased run to a driver task
    ///
    /// The task keeps renewing the lease while it waits for a free slot.
    fn spawn(&self, record: RunRecord, lease: Lease) {
        let run_id = record.run.id;
        if !self.mark_driving(run_id) {
            return;
        }

        let engine = self.engine.clone();
        let slots = self.slots.clone();
        let driving = self.driving.clone();

        tokio::spawn(async move {
            let mut driver = RunDriver::new(engine.clone(), record, lease);

            let acquire = slots.acquire_owned();
            tokio::pin!(acquire);
            let permit = loop {
                tokio::select! {
                    permit = &mut acquire => break permit,
                    _ = sleep(engine.settings.renewal_slice()) => {
                        if let Err(halt) = driver.keep_alive().await {
                            tracing::warn!(%run_id, error = %halt, "Lost lease while queued");
                            unmark(&driving, run_id);
                            return;
                        }
                    }
                }
            };
            let Ok(permit) = permit else {
                unmark(&driving, run_id);
                return;
            };

            match driver.drive().await {
                Ok(state) => tracing::debug!(%run_id, %state, "Driver finished"),
                Err(halt) => tracing::warn!(
                    %run_id,
                    error = %halt,
                    "Driver halted, run left for recovery"
                ),
            }
            drop(permit);
            unmark(&driving, run_id);
        });
    }

    /// Whether a driver task in this process owns the run
    pub fn is_driving(&self, run_id: Uuid) -> bool {
        self.driving
            .lock()
            .map(|set| set.contains(&run_id))
            .unwrap_or(false)
    }

    fn mark_driving(&self, run_id: Uuid) -> bool {
        self.driving
            .lock()
            .map(|mut set| set.insert(run_id))
            .unwrap_or(false)
    }

    async fn release(&self, lease: &Lease) {
        if let Err(err) = self.engine.store.release_lease(lease).await {
            tracing::warn!(pipeline = %lease.pipeline_name, error = %err, "Failed to release lease");
        }
    }
}

fn unmark(driving: &Mutex<HashSet<Uuid>>, run_id: Uuid) {
    if let Ok(mut set) = driving.lock() {
        set.remove(&run_id);
    }
}
