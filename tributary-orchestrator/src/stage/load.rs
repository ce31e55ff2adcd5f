//! In-process load stage
//!
//! Upserts the query stage's result rows into the destination table on a
//! background task. A result materialized at a `location` is fetched from
//! there; inline records are used only when no location is given. Job state
//! lives in memory only: after a restart a handle polls as lost, the engine
//! retries the stage and the keyed upsert is applied again.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::task::JoinHandle;
use tributary_core::domain::stage::{Record, StageOutput};
use tributary_core::error::{StageError, codes};
use uuid::Uuid;

use super::results::ResultSource;
use super::{StageClient, StageRequest, StageStatusReport, StartOutcome};
use crate::destination::DestinationWriter;

const LOAD_STATE_POISONED: &str = "LOAD_STATE_POISONED";

enum LoadJob {
    Running(JoinHandle<()>),
    Finished(Result<StageOutput, StageError>),
    Cancelled,
}

type Jobs = Arc<Mutex<HashMap<String, LoadJob>>>;

pub struct LoadStageClient {
    destination: Arc<dyn DestinationWriter>,
    results: Arc<dyn ResultSource>,
    jobs: Jobs,
}

impl LoadStageClient {
    pub fn new(destination: Arc<dyn DestinationWriter>, results: Arc<dyn ResultSource>) -> Self {
        Self {
            destination,
            results,
            jobs: Arc::default(),
        }
    }

    fn lock(jobs: &Jobs) -> Result<MutexGuard<'_, HashMap<String, LoadJob>>, StageError> {
        jobs.lock()
            .map_err(|_| StageError::service_unavailable("load job table lock poisoned"))
    }
}

/// Rows to load: the object at the result's location, else its inline records
async fn rows_for(
    results: &dyn ResultSource,
    input: Option<StageOutput>,
) -> Result<Vec<Record>, StageError> {
    match input {
        Some(StageOutput {
            location: Some(location),
            ..
        }) => results.fetch(&location).await,
        Some(output) => Ok(output.records),
        None => Ok(Vec::new()),
    }
}

fn handle_for(key: Uuid) -> String {
    format!("load-{key}")
}

#[async_trait]
impl StageClient for LoadStageClient {
    async fn start(&self, key: Uuid, request: &StageRequest) -> Result<StartOutcome, StageError> {
        let handle = handle_for(key);
        let mut jobs = Self::lock(&self.jobs)?;
        if jobs.contains_key(&handle) {
            return Ok(StartOutcome::Duplicate(handle));
        }

        let input = request.input.clone();
        let source = self.results.clone();
        let table = request.destination.table.clone();
        let key_columns = request.destination.key_columns.clone();
        let destination = self.destination.clone();
        let results = self.jobs.clone();
        let job_handle = handle.clone();

        let task = tokio::spawn(async move {
            let result = match rows_for(source.as_ref(), input).await {
                Ok(rows) => destination
                    .upsert(&table, &key_columns, &rows)
                    .await
                    .map(|written| StageOutput {
                        location: Some(table.clone()),
                        rows_written: Some(written),
                        ..StageOutput::default()
                    }),
                Err(err) => Err(err),
            };
            // The outcome is recorded even if another holder of the lock panicked
            let mut jobs = results.lock().unwrap_or_else(PoisonError::into_inner);
            // A cancelled job keeps its cancelled state
            if let Some(LoadJob::Running(_)) = jobs.get(&job_handle) {
                jobs.insert(job_handle, LoadJob::Finished(result));
            }
        });

        tracing::debug!(handle = %handle, "Load job started");
        jobs.insert(handle.clone(), LoadJob::Running(task));
        Ok(StartOutcome::Accepted(handle))
    }

    /// Finished and cancelled jobs are dropped once reported
    async fn poll(&self, handle: &str) -> Result<StageStatusReport, StageError> {
        let mut jobs = match self.jobs.lock() {
            Ok(jobs) => jobs,
            Err(_) => {
                return Ok(StageStatusReport::Failed(StageError::transient(
                    LOAD_STATE_POISONED,
                    format!("state of load job {handle} was lost to a panic"),
                )));
            }
        };
        if let Some(LoadJob::Running(task)) = jobs.get(handle)
            && !task.is_finished()
        {
            return Ok(StageStatusReport::Running);
        }
        Ok(match jobs.remove(handle) {
            Some(LoadJob::Running(_)) => StageStatusReport::Failed(StageError::transient(
                "JOB_ABORTED",
                format!("load job {handle} ended without a result"),
            )),
            Some(LoadJob::Finished(Ok(output))) => StageStatusReport::Succeeded(output),
            Some(LoadJob::Finished(Err(err))) => StageStatusReport::Failed(err),
            Some(LoadJob::Cancelled) => StageStatusReport::Failed(StageError::transient(
                "JOB_CANCELLED",
                format!("load job {handle} was cancelled"),
            )),
            None => StageStatusReport::Failed(StageError::transient(
                codes::HANDLE_LOST,
                format!("load job {handle} is unknown to this process"),
            )),
        })
    }

    async fn cancel(&self, handle: &str) -> Result<(), StageError> {
        let mut jobs = Self::lock(&self.jobs)?;
        if let Some(LoadJob::Running(task)) = jobs.get(handle) {
            task.abort();
            jobs.insert(handle.to_string(), LoadJob::Cancelled);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::destination::MemoryDestination;
    use crate::stage::results::MemoryResultSource;
    use serde_json::json;
    use tributary_core::domain::pipeline::DestinationSpec;
    use tributary_core::domain::stage::{Record, StageKind};

    fn request(rows: usize) -> StageRequest {
        let records: Vec<Record> = (0..rows)
            .map(|i| json!({ "student_id": i, "score": 50 }).as_object().cloned().unwrap())
            .collect();
        StageRequest {
            run_id: Uuid::new_v4(),
            pipeline_name: "daily-student-perf".to_string(),
            dataset: "student_perf".to_string(),
            stage: StageKind::Load,
            parameters: HashMap::new(),
            input: Some(StageOutput {
                records,
                ..StageOutput::default()
            }),
            destination: DestinationSpec {
                table: "student_perf".to_string(),
                key_columns: vec!["student_id".to_string()],
            },
        }
    }

    fn client() -> LoadStageClient {
        LoadStageClient::new(
            Arc::new(MemoryDestination::new()),
            Arc::new(MemoryResultSource::new()),
        )
    }

    async fn wait_for(client: &LoadStageClient, handle: &str) -> StageStatusReport {
        loop {
            match client.poll(handle).await.unwrap() {
                StageStatusReport::Running => tokio::task::yield_now().await,
                report => return report,
            }
        }
    }

    #[tokio::test]
    async fn test_load_upserts_rows_and_dedupes_start() {
        let dest = Arc::new(MemoryDestination::new());
        let client = LoadStageClient::new(dest.clone(), Arc::new(MemoryResultSource::new()));
        let req = request(25);
        let key = StageKind::Load.idempotency_key(req.run_id, 1);

        let handle = client.start(key, &req).await.unwrap().into_handle();
        let again = client.start(key, &req).await.unwrap();
        assert_eq!(again, StartOutcome::Duplicate(handle.clone()));

        match wait_for(&client, &handle).await {
            StageStatusReport::Succeeded(output) => assert_eq!(output.rows_written, Some(25)),
            other => panic!("unexpected report: {other:?}"),
        }
        assert_eq!(dest.rows("student_perf").len(), 25);
    }

    #[tokio::test]
    async fn test_unknown_handle_is_lost_and_retryable() {
        let client = client();
        match client.poll("load-missing").await.unwrap() {
            StageStatusReport::Failed(err) => {
                assert_eq!(err.code, codes::HANDLE_LOST);
                assert!(err.is_retryable());
            }
            other => panic!("unexpected report: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_invalid_destination_fails_permanently() {
        let client = client();
        let mut req = request(3);
        req.destination.key_columns.clear();

        let handle = client.start(Uuid::new_v4(), &req).await.unwrap().into_handle();
        match wait_for(&client, &handle).await {
            StageStatusReport::Failed(err) => assert!(!err.is_retryable()),
            other => panic!("unexpected report: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_rows_are_read_from_result_location() {
        let dest = Arc::new(MemoryDestination::new());
        let results = Arc::new(MemoryResultSource::new());
        results.put(
            "s3://lake/reports/student_perf.csv",
            "student_id,score\n1,81.5\n2,40\n3,\n",
        );
        let client = LoadStageClient::new(dest.clone(), results);

        // Inline records are ignored once a location is present
        let mut req = request(10);
        if let Some(input) = req.input.as_mut() {
            input.location = Some("s3://lake/reports/student_perf.csv".to_string());
        }

        let handle = client.start(Uuid::new_v4(), &req).await.unwrap().into_handle();
        match wait_for(&client, &handle).await {
            StageStatusReport::Succeeded(output) => assert_eq!(output.rows_written, Some(3)),
            other => panic!("unexpected report: {other:?}"),
        }
        let rows = dest.rows("student_perf");
        assert_eq!(rows.len(), 3);
        assert!(rows.iter().any(|r| r["score"] == json!(81.5)));
    }

    #[tokio::test]
    async fn test_missing_result_object_fails_permanently() {
        let dest = Arc::new(MemoryDestination::new());
        let client = LoadStageClient::new(dest.clone(), Arc::new(MemoryResultSource::new()));
        let mut req = request(5);
        if let Some(input) = req.input.as_mut() {
            input.location = Some("s3://lake/reports/gone.csv".to_string());
        }

        let handle = client.start(Uuid::new_v4(), &req).await.unwrap().into_handle();
        match wait_for(&client, &handle).await {
            StageStatusReport::Failed(err) => {
                assert_eq!(err.code, codes::RESULT_NOT_FOUND);
                assert!(!err.is_retryable());
            }
            other => panic!("unexpected report: {other:?}"),
        }
        assert!(dest.rows("student_perf").is_empty());
    }

    #[tokio::test]
    async fn test_finished_job_is_dropped_after_poll() {
        let client = client();
        let handle = client.start(Uuid::new_v4(), &request(2)).await.unwrap().into_handle();

        assert!(matches!(
            wait_for(&client, &handle).await,
            StageStatusReport::Succeeded(_)
        ));
        assert!(client.jobs.lock().unwrap().is_empty());

        match client.poll(&handle).await.unwrap() {
            StageStatusReport::Failed(err) => assert_eq!(err.code, codes::HANDLE_LOST),
            other => panic!("unexpected report: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_poisoned_job_table_reports_failure() {
        let client = client();
        let jobs = client.jobs.clone();
        let _ = std::thread::spawn(move || {
            let _guard = jobs.lock().unwrap();
            panic!("poison the job table");
        })
        .join();

        match client.poll("load-any").await.unwrap() {
            StageStatusReport::Failed(err) => {
                assert_eq!(err.code, LOAD_STATE_POISONED);
                assert!(err.is_retryable());
            }
            other => panic!("unexpected report: {other:?}"),
        }
    }
}
