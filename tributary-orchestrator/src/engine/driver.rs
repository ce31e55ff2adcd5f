//! Run driver
//!
//! Moves one run through its stages while holding the pipeline's lease.
//! Every state change is persisted under the current fencing token before it
//! is acted on, so a driver resumed from the store (after a crash or a lease
//! takeover) continues exactly where the previous one stopped.

use chrono::Utc;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{Instant, sleep, timeout};
use tributary_core::domain::event::TransitionEvent;
use tributary_core::domain::run::{PipelineRun, RunRecord, RunState};
use tributary_core::domain::schema::Registration;
use tributary_core::domain::stage::{
    StageExecution, StageKind, StageOutput, StageStatus, latest_attempt,
};
use tributary_core::error::StageError;
use tributary_core::quality;
use uuid::Uuid;

use super::Engine;
use crate::stage::{StageClient, StageRequest, StageStatusReport, StartOutcome};
use crate::store::{Lease, StoreError};

/// Why a driver stopped before its run reached a terminal state
#[derive(Debug, thiserror::Error)]
pub enum Halt {
    /// Another driver holds the lease now; nothing more may be written
    #[error("lease on pipeline '{pipeline}' moved past token {token}")]
    Fenced { pipeline: String, token: u64 },

    #[error("illegal transition {from} -> {to}")]
    IllegalTransition { from: RunState, to: RunState },

    #[error("state store rejected a write: {0}")]
    Store(StoreError),
}

impl From<StoreError> for Halt {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Fenced { pipeline, token } => Halt::Fenced { pipeline, token },
            other => Halt::Store(other),
        }
    }
}

/// How a single stage (across its attempts) ended
#[derive(Debug)]
enum StageEnd {
    Succeeded,
    Failed(StageError),
    Cancelled,
}

pub struct RunDriver {
    engine: Arc<Engine>,
    run: PipelineRun,
    stages: Vec<StageExecution>,
    lease: Lease,
}

impl RunDriver {
    pub fn new(engine: Arc<Engine>, record: RunRecord, lease: Lease) -> Self {
        Self {
            engine,
            run: record.run,
            stages: record.stages,
            lease,
        }
    }

    pub fn run_id(&self) -> Uuid {
        self.run.id
    }

    /// Drive the run until it is terminal, then release the lease
    pub async fn drive(mut self) -> Result<RunState, Halt> {
        tracing::info!(
            run_id = %self.run.id,
            pipeline = %self.run.pipeline_name,
            state = %self.run.state,
            token = self.lease.token,
            "Driving run"
        );

        let state = self.drive_to_terminal().await?;

        if let Err(err) = self.engine.store.release_lease(&self.lease).await {
            tracing::warn!(
                pipeline = %self.run.pipeline_name,
                error = %err,
                "Failed to release lease; it will expire"
            );
        }
        Ok(state)
    }

    /// Keep the lease alive while the run waits for a driver slot
    pub async fn keep_alive(&mut self) -> Result<(), Halt> {
        self.renew_lease().await
    }

    async fn drive_to_terminal(&mut self) -> Result<RunState, Halt> {
        while !self.run.is_terminal() {
            if self.cancel_observed().await {
                self.transition(RunState::Cancelled, None).await?;
                break;
            }

            let Some(stage) = self.run.state.stage() else {
                self.transition(RunState::Transforming, None).await?;
                continue;
            };

            match self.execute_stage(stage).await? {
                StageEnd::Succeeded => {
                    let Some(next) = self.run.state.next() else {
                        break;
                    };
                    self.rotate_lease().await?;
                    self.transition(next, None).await?;
                }
                StageEnd::Failed(err) => self.transition(RunState::Failed, Some(err)).await?,
                StageEnd::Cancelled => self.transition(RunState::Cancelled, None).await?,
            }
        }
        Ok(self.run.state)
    }

    // =========================================================================
    // Stages
    // =========================================================================

    /// Run a stage to completion, retrying transient failures
    ///
    /// Picks up from the latest recorded attempt, so a resumed driver never
    /// resubmits a job that is already running.
    async fn execute_stage(&mut self, stage: StageKind) -> Result<StageEnd, Halt> {
        loop {
            let idx = match self.latest_index(stage) {
                Some(idx) => idx,
                None => self.begin_attempt(stage, 1).await?,
            };

            let end = match self.stages[idx].status {
                StageStatus::Succeeded => StageEnd::Succeeded,
                StageStatus::Cancelled => StageEnd::Cancelled,
                StageStatus::Failed | StageStatus::TimedOut => {
                    StageEnd::Failed(self.stages[idx].error.clone().unwrap_or_else(|| {
                        StageError::transient("UNRECORDED", "attempt failed without an error")
                    }))
                }
                StageStatus::Pending | StageStatus::Running => self.run_attempt(idx).await?,
            };

            let err = match end {
                StageEnd::Failed(err) => err,
                other => return Ok(other),
            };

            let attempt = self.stages[idx].attempt;
            let max_attempts = self.run.config.max_attempts;
            if !err.is_retryable() {
                return Ok(StageEnd::Failed(err));
            }
            if attempt >= max_attempts {
                tracing::warn!(
                    run_id = %self.run.id,
                    %stage,
                    attempts = attempt,
                    error = %err,
                    "Stage retries exhausted"
                );
                return Ok(StageEnd::Failed(err));
            }

            let delay = self.engine.settings.retry.delay_for(&err, attempt);
            tracing::warn!(
                run_id = %self.run.id,
                %stage,
                attempt,
                max_attempts,
                ?delay,
                error = %err,
                "Stage attempt failed, retrying"
            );
            if self.wait(delay, true).await? {
                return Ok(StageEnd::Cancelled);
            }
            self.begin_attempt(stage, attempt + 1).await?;
        }
    }

    fn latest_index(&self, stage: StageKind) -> Option<usize> {
        self.stages
            .iter()
            .enumerate()
            .filter(|(_, exec)| exec.stage == stage)
            .max_by_key(|(_, exec)| exec.attempt)
            .map(|(idx, _)| idx)
    }

    async fn begin_attempt(&mut self, stage: StageKind, attempt: u32) -> Result<usize, Halt> {
        self.stages
            .push(StageExecution::pending(self.run.id, stage, attempt));
        self.persist().await?;
        Ok(self.stages.len() - 1)
    }

    /// Submit (or re-attach to) the attempt's job and poll it to an end
    async fn run_attempt(&mut self, idx: usize) -> Result<StageEnd, Halt> {
        let stage = self.stages[idx].stage;
        let client = self.engine.clients.get(stage).clone();

        let deadline = self.stage_deadline(idx);
        let handle = match self.stages[idx].handle.clone() {
            Some(handle) => {
                tracing::info!(run_id = %self.run.id, %stage, %handle, "Resuming stage job");
                handle
            }
            None => {
                let key = self.stages[idx].idempotency_key;
                let request = self.request_for(stage);
                match self.bounded(None, client.start(key, &request)).await {
                    Ok(outcome) => {
                        if let StartOutcome::Duplicate(handle) = &outcome {
                            tracing::info!(
                                run_id = %self.run.id,
                                %stage,
                                %handle,
                                "Job already submitted under this key, attaching"
                            );
                        }
                        let handle = outcome.into_handle();
                        let exec = &mut self.stages[idx];
                        exec.handle = Some(handle.clone());
                        exec.status = StageStatus::Running;
                        self.persist().await?;
                        handle
                    }
                    Err(err) => return self.fail_attempt(idx, StageStatus::Failed, err).await,
                }
            }
        };

        let mut waits = 0;
        loop {
            if self.cancel_observed().await {
                return self.cancel_attempt(idx, &client).await;
            }

            let report = self.bounded(deadline, client.poll(&handle)).await;
            self.stages[idx].poll_count += 1;
            self.renew_lease().await?;

            match report {
                Ok(StageStatusReport::Running) => {
                    tracing::debug!(
                        run_id = %self.run.id,
                        %stage,
                        %handle,
                        polls = self.stages[idx].poll_count,
                        "Stage still running"
                    );
                }
                Ok(StageStatusReport::Succeeded(output)) => {
                    return self.complete_attempt(idx, output).await;
                }
                Ok(StageStatusReport::Failed(err)) => {
                    return self.fail_attempt(idx, StageStatus::Failed, err).await;
                }
                Err(err) if err.is_retryable() => {
                    tracing::warn!(run_id = %self.run.id, %stage, error = %err, "Poll failed");
                }
                Err(err) => return self.fail_attempt(idx, StageStatus::Failed, err).await,
            }

            if let Some(deadline) = deadline
                && Instant::now() >= deadline
            {
                return self.time_out_attempt(idx, &client, &handle).await;
            }

            waits += 1;
            let mut delay = self.engine.settings.poll.delay(waits);
            if let Some(deadline) = deadline {
                delay = delay.min(deadline.saturating_duration_since(Instant::now()));
            }
            if self.wait(delay, true).await? {
                return self.cancel_attempt(idx, &client).await;
            }
        }
    }

    /// Wall-clock timeout of the attempt, measured from when it began
    fn stage_deadline(&self, idx: usize) -> Option<Instant> {
        let exec = &self.stages[idx];
        let limit = self.run.config.stage_timeouts.for_stage(exec.stage)?;
        let elapsed = (Utc::now() - exec.started_at).to_std().unwrap_or_default();
        Some(Instant::now() + limit.saturating_sub(elapsed))
    }

    /// Apply the post-stage gates, then record the attempt's outcome
    async fn complete_attempt(
        &mut self,
        idx: usize,
        output: StageOutput,
    ) -> Result<StageEnd, Halt> {
        let stage = self.stages[idx].stage;
        let rejection = match stage {
            StageKind::Transform => self.check_quality(idx, &output),
            StageKind::CatalogRegister => self.register_schema(&output).await?,
            StageKind::Query | StageKind::Load => None,
        };
        self.stages[idx].output = Some(output);

        if let Some(err) = rejection {
            return self.fail_attempt(idx, StageStatus::Failed, err).await;
        }

        self.stages[idx].finish(StageStatus::Succeeded, None);
        self.persist().await?;
        tracing::info!(
            run_id = %self.run.id,
            %stage,
            attempt = self.stages[idx].attempt,
            "Stage succeeded"
        );
        Ok(StageEnd::Succeeded)
    }

    async fn fail_attempt(
        &mut self,
        idx: usize,
        status: StageStatus,
        err: StageError,
    ) -> Result<StageEnd, Halt> {
        self.stages[idx].finish(status, Some(err.clone()));
        self.persist().await?;
        Ok(StageEnd::Failed(err))
    }

    async fn time_out_attempt(
        &mut self,
        idx: usize,
        client: &Arc<dyn StageClient>,
        handle: &str,
    ) -> Result<StageEnd, Halt> {
        let stage = self.stages[idx].stage;
        let err = StageError::timed_out(format!(
            "{stage} did not finish within its timeout (job {handle})"
        ));
        tracing::warn!(run_id = %self.run.id, %stage, %handle, "Stage timed out, cancelling job");

        // The job must be stopped before any retry submits a new one
        self.cancel_job(client, handle).await?;
        self.fail_attempt(idx, StageStatus::TimedOut, err).await
    }

    async fn cancel_attempt(
        &mut self,
        idx: usize,
        client: &Arc<dyn StageClient>,
    ) -> Result<StageEnd, Halt> {
        let stage = self.stages[idx].stage;
        tracing::info!(run_id = %self.run.id, %stage, "Cancelling in-flight stage");

        if let Some(handle) = self.stages[idx].handle.clone() {
            self.cancel_job(client, &handle).await?;
        }
        self.stages[idx].finish(StageStatus::Cancelled, None);
        self.persist().await?;
        Ok(StageEnd::Cancelled)
    }

    /// Ask the job to stop until it acknowledges or the grace period ends
    async fn cancel_job(&mut self, client: &Arc<dyn StageClient>, handle: &str) -> Result<bool, Halt> {
        let deadline = Instant::now() + self.engine.settings.cancel_grace;
        let mut failures = 0;
        loop {
            match self.bounded(Some(deadline), client.cancel(handle)).await {
                Ok(()) => return Ok(true),
                Err(err) => {
                    failures += 1;
                    let now = Instant::now();
                    if now >= deadline {
                        tracing::warn!(
                            run_id = %self.run.id,
                            %handle,
                            error = %err,
                            "Cancel not acknowledged within grace period"
                        );
                        return Ok(false);
                    }
                    let delay = self.engine.settings.poll.delay(failures).min(deadline - now);
                    tracing::debug!(%handle, error = %err, ?delay, "Cancel failed, retrying");
                    self.wait(delay, false).await?;
                }
            }
        }
    }

    /// Await one call to a stage service for at most a renewal slice
    ///
    /// The limit shrinks to what is left before `deadline`, so a service that
    /// never answers cannot hold the driver past its deadline or its next
    /// lease renewal.
    async fn bounded<T>(
        &self,
        deadline: Option<Instant>,
        call: impl Future<Output = Result<T, StageError>>,
    ) -> Result<T, StageError> {
        let mut limit = self.engine.settings.renewal_slice();
        if let Some(deadline) = deadline {
            limit = limit.min(deadline.saturating_duration_since(Instant::now()));
        }
        match timeout(limit, call).await {
            Ok(result) => result,
            Err(_) => Err(StageError::call_timed_out(format!(
                "stage service did not answer within {limit:?}"
            ))),
        }
    }

    // =========================================================================
    // Post-stage gates
    // =========================================================================

    fn check_quality(&mut self, idx: usize, output: &StageOutput) -> Option<StageError> {
        let report = quality::evaluate(&self.run.config.quality, &output.records);
        self.stages[idx].violations = report.violations.clone();

        if report.passed() {
            if !report.violations.is_empty() {
                tracing::info!(
                    run_id = %self.run.id,
                    violations = report.violations.len(),
                    records = report.records_evaluated,
                    "Quality violations below threshold"
                );
            }
            return None;
        }

        let summary = report.breach_summary();
        tracing::error!(run_id = %self.run.id, %summary, "Quality gate failed");
        Some(StageError::quality_gate(summary))
    }

    async fn register_schema(&mut self, output: &StageOutput) -> Result<Option<StageError>, Halt> {
        let Some(columns) = &output.schema else {
            tracing::warn!(
                run_id = %self.run.id,
                dataset = %self.run.dataset,
                "Catalog stage reported no schema, skipping registration"
            );
            return Ok(None);
        };

        let allow_override = self.run.allows_schema_override();
        let mut failures = 0;
        loop {
            let registered = self
                .engine
                .registry
                .register(&self.run.dataset, columns, allow_override)
                .await;

            match registered {
                Ok(Registration::Accepted { version, changed }) => {
                    tracing::info!(
                        run_id = %self.run.id,
                        dataset = %self.run.dataset,
                        version,
                        changed,
                        "Schema registered"
                    );
                    return Ok(None);
                }
                Ok(Registration::Drift { latest_version, diff }) => {
                    return Ok(Some(StageError::schema_drift(format!(
                        "dataset '{}' version {}: {}",
                        self.run.dataset,
                        latest_version,
                        diff.describe()
                    ))));
                }
                Err(err) if err.is_unavailable() => {
                    failures += 1;
                    let delay = self.engine.settings.store_retry.delay(failures);
                    tracing::warn!(error = %err, ?delay, "Schema store unavailable, retrying");
                    self.wait(delay, false).await?;
                }
                Err(err) => {
                    return Ok(Some(StageError::transient(
                        "SCHEMA_REGISTRY",
                        err.to_string(),
                    )));
                }
            }
        }
    }

    /// Request for `stage`, carrying the previous stage's output
    fn request_for(&self, stage: StageKind) -> StageRequest {
        let input = StageKind::ALL
            .iter()
            .position(|s| *s == stage)
            .and_then(|i| i.checked_sub(1))
            .and_then(|i| latest_attempt(&self.stages, StageKind::ALL[i]))
            .filter(|exec| exec.status == StageStatus::Succeeded)
            .and_then(|exec| exec.output.clone());

        StageRequest {
            run_id: self.run.id,
            pipeline_name: self.run.pipeline_name.clone(),
            dataset: self.run.dataset.clone(),
            stage,
            parameters: self.run.parameters.clone(),
            input,
            destination: self.run.config.destination.clone(),
        }
    }

    // =========================================================================
    // State, lease and cancellation
    // =========================================================================

    async fn transition(&mut self, to: RunState, error: Option<StageError>) -> Result<(), Halt> {
        let from = self.run.state;
        if !from.can_transition_to(to) {
            return Err(Halt::IllegalTransition { from, to });
        }

        let now = Utc::now();
        self.run.state = to;
        if let Some(stage) = to.stage() {
            self.run.current_stage = Some(stage);
        }
        if error.is_some() {
            self.run.last_error = error.clone();
        }
        if to.is_terminal() {
            self.run.completed_at = Some(now);
        }
        self.run.updated_at = now;
        self.run.fencing_token = self.lease.token;
        self.persist().await?;

        let event = TransitionEvent {
            run_id: self.run.id,
            pipeline_name: self.run.pipeline_name.clone(),
            stage: self.run.current_stage,
            from,
            to,
            at: now,
            error,
        };
        self.engine.events.emit(&event);

        match to {
            RunState::Failed => tracing::error!(
                run_id = %self.run.id,
                pipeline = %self.run.pipeline_name,
                stage = ?self.run.current_stage,
                error = ?self.run.last_error,
                "Run failed"
            ),
            RunState::Succeeded | RunState::Cancelled => tracing::info!(
                run_id = %self.run.id,
                pipeline = %self.run.pipeline_name,
                state = %to,
                "Run finished"
            ),
            _ => {}
        }
        Ok(())
    }

    /// Write the run and its attempts, blocking through store outages
    async fn persist(&mut self) -> Result<(), Halt> {
        let mut failures = 0;
        loop {
            match self
                .engine
                .store
                .save(&self.run, &self.stages, &self.lease)
                .await
            {
                Ok(()) => return Ok(()),
                Err(err) if err.is_unavailable() => {
                    failures += 1;
                    let delay = self.engine.settings.store_retry.delay(failures);
                    tracing::warn!(
                        run_id = %self.run.id,
                        failures,
                        ?delay,
                        error = %err,
                        "State store unavailable, retrying write"
                    );
                    sleep(delay).await;
                }
                Err(err) => return Err(err.into()),
            }
        }
    }

    async fn renew_lease(&mut self) -> Result<(), Halt> {
        match self
            .engine
            .store
            .renew_lease(&self.lease, self.engine.settings.lease_ttl)
            .await
        {
            Ok(lease) => {
                self.lease = lease;
                Ok(())
            }
            Err(err @ StoreError::Fenced { .. }) => Err(err.into()),
            Err(err) => {
                tracing::warn!(
                    pipeline = %self.lease.pipeline_name,
                    error = %err,
                    "Lease renewal failed"
                );
                Ok(())
            }
        }
    }

    /// Swap to a fresh fencing token before entering the next stage
    async fn rotate_lease(&mut self) -> Result<(), Halt> {
        let mut failures = 0;
        loop {
            match self
                .engine
                .store
                .rotate_lease(&self.lease, self.engine.settings.lease_ttl)
                .await
            {
                Ok(lease) => {
                    tracing::debug!(
                        pipeline = %lease.pipeline_name,
                        token = lease.token,
                        "Lease rotated"
                    );
                    self.lease = lease;
                    return Ok(());
                }
                Err(err) if err.is_unavailable() => {
                    failures += 1;
                    sleep(self.engine.settings.store_retry.delay(failures)).await;
                }
                Err(err) => return Err(err.into()),
            }
        }
    }

    /// Whether cancellation was requested; a failed read counts as no
    async fn cancel_observed(&mut self) -> bool {
        if self.run.cancel_requested {
            return true;
        }
        match self.engine.store.cancel_requested(self.run.id).await {
            Ok(requested) => {
                self.run.cancel_requested = requested;
                requested
            }
            Err(err) => {
                tracing::warn!(run_id = %self.run.id, error = %err, "Could not read cancel flag");
                false
            }
        }
    }

    /// Sleep for `total` in renewal slices, keeping the lease alive
    ///
    /// With `watch_cancel`, returns `true` as soon as cancellation is seen.
    async fn wait(&mut self, total: Duration, watch_cancel: bool) -> Result<bool, Halt> {
        let deadline = Instant::now() + total;
        let slice = self.engine.settings.renewal_slice();
        loop {
            if watch_cancel && self.cancel_observed().await {
                return Ok(true);
            }
            let now = Instant::now();
            if now >= deadline {
                return Ok(false);
            }
            sleep(slice.min(deadline - now)).await;
            self.renew_lease().await?;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::testing::{DATASET, Harness, PIPELINE, Scripts, config};
    use crate::stage::testing::{Scripted, ScriptedStageClient};
    use crate::store::RunStateStore;
    use std::collections::HashMap;

    async fn leased_run(harness: &Harness) -> (PipelineRun, Lease) {
        let lease = harness
            .store
            .acquire_lease(PIPELINE, "orchestrator-test", Duration::from_secs(60))
            .await
            .unwrap();
        let run = PipelineRun::new(PIPELINE, DATASET, config(), HashMap::new());
        harness.store.create_run(&run, &lease).await.unwrap();
        (run, lease)
    }

    fn record(run: &PipelineRun) -> RunRecord {
        RunRecord {
            run: run.clone(),
            stages: Vec::new(),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_superseded_driver_halts_without_writing() {
        let scripts = Scripts::new();
        let harness = Harness::new(scripts.clients());
        let (run, lease) = leased_run(&harness).await;

        // Another orchestrator takes over and moves the token on
        harness
            .store
            .rotate_lease(&lease, Duration::from_secs(60))
            .await
            .unwrap();

        let driver = RunDriver::new(harness.orchestrator.engine().clone(), record(&run), lease);
        let halt = driver.drive().await.unwrap_err();

        assert!(matches!(halt, Halt::Fenced { ref pipeline, token: 1 } if pipeline == PIPELINE));
        let stored = harness.store.load_run(run.id).await.unwrap().unwrap();
        assert_eq!(stored.run.state, RunState::Created);
        assert!(stored.stages.is_empty());
        assert_eq!(scripts.transform.start_calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_driver_releases_lease_when_done() {
        let harness = Harness::new(Scripts::new().clients());
        let (run, lease) = leased_run(&harness).await;

        let driver = RunDriver::new(harness.orchestrator.engine().clone(), record(&run), lease);
        assert_eq!(driver.drive().await.unwrap(), RunState::Succeeded);

        // Free for the next run, with a token past every one used so far
        let next = harness
            .store
            .acquire_lease(PIPELINE, "orchestrator-next", Duration::from_secs(60))
            .await
            .unwrap();
        let stored = harness.store.load_run(run.id).await.unwrap().unwrap();
        assert!(next.token > stored.run.fencing_token);
    }

    #[tokio::test(start_paused = true)]
    async fn test_catalog_without_schema_skips_registration() {
        let scripts = Scripts::new().catalog(
            ScriptedStageClient::succeeding_with(StageOutput::default()).running_polls(3),
        );
        let harness = Harness::new(scripts.clients());
        let (run, lease) = leased_run(&harness).await;

        let driver = RunDriver::new(harness.orchestrator.engine().clone(), record(&run), lease);
        assert_eq!(driver.drive().await.unwrap(), RunState::Succeeded);

        // No schema reported: registration is skipped, not failed
        assert!(harness.registry.get_latest(DATASET).await.unwrap().is_none());
        assert_eq!(scripts.catalog.polls(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_before_start_skips_all_stages() {
        let scripts = Scripts::new();
        let harness = Harness::new(scripts.clients());
        let (run, lease) = leased_run(&harness).await;
        harness.store.request_cancel(run.id).await.unwrap();

        let driver = RunDriver::new(harness.orchestrator.engine().clone(), record(&run), lease);
        assert_eq!(driver.drive().await.unwrap(), RunState::Cancelled);

        let stored = harness.store.load_run(run.id).await.unwrap().unwrap();
        assert_eq!(stored.run.current_stage, None);
        assert_eq!(scripts.transform.start_calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rejected_start_counts_as_failed_attempt() {
        let scripts = Scripts::new().load(
            ScriptedStageClient::new()
                .fail_start(StageError::service_unavailable("loader restarting")),
        );
        let harness = Harness::new(scripts.clients());
        let (run, lease) = leased_run(&harness).await;

        let driver = RunDriver::new(harness.orchestrator.engine().clone(), record(&run), lease);
        assert_eq!(driver.drive().await.unwrap(), RunState::Succeeded);

        let stored = harness.store.load_run(run.id).await.unwrap().unwrap();
        let loads: Vec<&StageExecution> = stored
            .stages
            .iter()
            .filter(|s| s.stage == StageKind::Load)
            .collect();
        assert_eq!(loads.len(), 2);
        assert_eq!(loads[0].status, StageStatus::Failed);
        assert!(loads[0].handle.is_none());
        assert_eq!(loads[1].status, StageStatus::Succeeded);
        assert_eq!(scripts.load.start_calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_job_report_is_classified_by_its_error() {
        let scripts = Scripts::new().transform(
            ScriptedStageClient::new()
                .then(Scripted::Fail(StageError::permanent("SPARK_OOM", "executor lost"))),
        );
        let harness = Harness::new(scripts.clients());
        let (run, lease) = leased_run(&harness).await;

        let driver = RunDriver::new(harness.orchestrator.engine().clone(), record(&run), lease);
        assert_eq!(driver.drive().await.unwrap(), RunState::Failed);

        let stored = harness.store.load_run(run.id).await.unwrap().unwrap();
        assert_eq!(stored.run.last_error.unwrap().code, "SPARK_OOM");
        assert_eq!(scripts.transform.submissions(), 1);
    }
}
