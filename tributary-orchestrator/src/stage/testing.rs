//! Scripted stage client for engine tests

use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use tributary_core::domain::stage::StageOutput;
use tributary_core::error::StageError;
use uuid::Uuid;

use super::{StageClient, StageRequest, StageStatusReport, StartOutcome};

/// How a submitted job ends
#[derive(Debug, Clone)]
pub enum Scripted {
    Succeed(StageOutput),
    Fail(StageError),
    /// Never leaves the running state
    Hang,
    /// Polls never get an answer at all
    Stall,
}

struct Job {
    outcome: Scripted,
    polls_left: u32,
    cancelled: bool,
}

#[derive(Default)]
struct Inner {
    script: VecDeque<Scripted>,
    default_output: StageOutput,
    running_polls: u32,
    start_failures: VecDeque<StageError>,
    cancel_failures: u32,
    keys: HashMap<Uuid, String>,
    jobs: HashMap<String, Job>,
    requests: Vec<StageRequest>,
    start_calls: usize,
    polls: u64,
    cancels: Vec<String>,
}

/// Each new idempotency key consumes the next scripted outcome; once the
/// script runs out jobs succeed with the default output.
#[derive(Default)]
pub struct ScriptedStageClient {
    inner: Mutex<Inner>,
}

impl ScriptedStageClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn succeeding_with(output: StageOutput) -> Self {
        let client = Self::new();
        client.inner.lock().unwrap().default_output = output;
        client
    }

    pub fn then(self, outcome: Scripted) -> Self {
        self.inner.lock().unwrap().script.push_back(outcome);
        self
    }

    /// Polls that report running before a job's outcome shows
    pub fn running_polls(self, polls: u32) -> Self {
        self.inner.lock().unwrap().running_polls = polls;
        self
    }

    pub fn fail_start(self, err: StageError) -> Self {
        self.inner.lock().unwrap().start_failures.push_back(err);
        self
    }

    pub fn fail_cancel(self, times: u32) -> Self {
        self.inner.lock().unwrap().cancel_failures = times;
        self
    }

    /// Register a job as if it had been submitted before a restart
    pub fn seed(&self, key: Uuid, handle: &str, outcome: Scripted) {
        let mut inner = self.inner.lock().unwrap();
        inner.keys.insert(key, handle.to_string());
        inner.jobs.insert(
            handle.to_string(),
            Job {
                outcome,
                polls_left: 0,
                cancelled: false,
            },
        );
    }

    /// Jobs actually created, excluding duplicates and seeded ones
    pub fn submissions(&self) -> usize {
        let inner = self.inner.lock().unwrap();
        inner.requests.len()
    }

    pub fn start_calls(&self) -> usize {
        self.inner.lock().unwrap().start_calls
    }

    pub fn polls(&self) -> u64 {
        self.inner.lock().unwrap().polls
    }

    pub fn cancels(&self) -> Vec<String> {
        self.inner.lock().unwrap().cancels.clone()
    }

    pub fn requests(&self) -> Vec<StageRequest> {
        self.inner.lock().unwrap().requests.clone()
    }
}

#[async_trait]
impl StageClient for ScriptedStageClient {
    async fn start(&self, key: Uuid, request: &StageRequest) -> Result<StartOutcome, StageError> {
        let mut inner = self.inner.lock().unwrap();
        inner.start_calls += 1;
        if let Some(err) = inner.start_failures.pop_front() {
            return Err(err);
        }
        if let Some(handle) = inner.keys.get(&key) {
            return Ok(StartOutcome::Duplicate(handle.clone()));
        }

        let outcome = inner
            .script
            .pop_front()
            .unwrap_or_else(|| Scripted::Succeed(inner.default_output.clone()));
        let handle = format!("{}-{}", request.stage, inner.requests.len() + 1);
        let polls_left = inner.running_polls;
        inner.keys.insert(key, handle.clone());
        inner.jobs.insert(
            handle.clone(),
            Job {
                outcome,
                polls_left,
                cancelled: false,
            },
        );
        inner.requests.push(request.clone());
        Ok(StartOutcome::Accepted(handle))
    }

    async fn poll(&self, handle: &str) -> Result<StageStatusReport, StageError> {
        let stalled = {
            let mut inner = self.inner.lock().unwrap();
            inner.polls += 1;
            matches!(
                inner.jobs.get(handle),
                Some(Job { outcome: Scripted::Stall, cancelled: false, .. })
            )
        };
        if stalled {
            std::future::pending::<()>().await;
        }

        let mut inner = self.inner.lock().unwrap();
        let Some(job) = inner.jobs.get_mut(handle) else {
            return Err(StageError::permanent("UNKNOWN_HANDLE", handle.to_string()));
        };
        if job.cancelled {
            return Ok(StageStatusReport::Failed(StageError::transient(
                "JOB_CANCELLED",
                handle.to_string(),
            )));
        }
        if job.polls_left > 0 {
            job.polls_left -= 1;
            return Ok(StageStatusReport::Running);
        }
        Ok(match &job.outcome {
            Scripted::Succeed(output) => StageStatusReport::Succeeded(output.clone()),
            Scripted::Fail(err) => StageStatusReport::Failed(err.clone()),
            Scripted::Hang | Scripted::Stall => StageStatusReport::Running,
        })
    }

    async fn cancel(&self, handle: &str) -> Result<(), StageError> {
        let mut inner = self.inner.lock().unwrap();
        inner.cancels.push(handle.to_string());
        if inner.cancel_failures > 0 {
            inner.cancel_failures -= 1;
            return Err(StageError::service_unavailable("cancel endpoint down"));
        }
        if let Some(job) = inner.jobs.get_mut(handle) {
            job.cancelled = true;
        }
        Ok(())
    }
}
