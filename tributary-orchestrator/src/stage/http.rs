//! HTTP stage client
//!
//! Adapter for external job-submission APIs (transform, catalog, query
//! services) that follow one convention:
//!
//! - `POST {base}/jobs` with an `Idempotency-Key` header submits a job and
//!   answers `{ "handle": ... }`; a 409 carries the handle of the job already
//!   submitted under that key
//! - `GET {base}/jobs/{handle}` reports `{ "status", "output", "error" }`
//! - `POST {base}/jobs/{handle}/cancel` asks the job to stop

use async_trait::async_trait;
use reqwest::{Client, Response, StatusCode, header::RETRY_AFTER};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tributary_core::domain::stage::StageOutput;
use tributary_core::error::{ErrorClass, StageError};
use uuid::Uuid;

use super::{StageClient, StageRequest, StageStatusReport, StartOutcome};

pub const IDEMPOTENCY_KEY_HEADER: &str = "Idempotency-Key";

#[derive(Debug, Serialize, Deserialize)]
struct SubmitResponse {
    handle: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
enum JobState {
    Queued,
    Running,
    Succeeded,
    Failed,
    Cancelled,
}

#[derive(Debug, Serialize, Deserialize)]
struct JobFailure {
    code: String,
    message: String,
    #[serde(default)]
    retryable: bool,
}

#[derive(Debug, Serialize, Deserialize)]
struct JobStatusResponse {
    status: JobState,
    #[serde(default)]
    output: Option<StageOutput>,
    #[serde(default)]
    error: Option<JobFailure>,
}

/// Classify a non-success HTTP status
///
/// 408, 429 and 5xx are transient; any other status is permanent.
pub fn classify_status(status: StatusCode, retry_after: Option<Duration>, body: &str) -> StageError {
    let message = if body.is_empty() {
        format!("HTTP {status}")
    } else {
        format!("HTTP {status}: {body}")
    };

    match status {
        StatusCode::TOO_MANY_REQUESTS => {
            StageError::rate_limited(message, retry_after.map(|d| d.as_millis() as u64))
        }
        StatusCode::REQUEST_TIMEOUT => StageError::transient("REQUEST_TIMEOUT", message),
        s if s.is_server_error() => StageError {
            retry_after_ms: retry_after.map(|d| d.as_millis() as u64),
            ..StageError::service_unavailable(message)
        },
        s => StageError::new(ErrorClass::Permanent, format!("HTTP_{}", s.as_u16()), message),
    }
}

/// Transport failures are transient unless the body could not be decoded
fn classify_transport(err: reqwest::Error) -> StageError {
    if err.is_decode() {
        StageError::permanent("INVALID_RESPONSE", err.to_string())
    } else if err.is_timeout() {
        StageError::call_timed_out(err.to_string())
    } else {
        StageError::network(err.to_string())
    }
}

fn retry_after(response: &Response) -> Option<Duration> {
    response
        .headers()
        .get(RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}

async fn error_for(response: Response) -> StageError {
    let status = response.status();
    let retry_after = retry_after(&response);
    let body = response.text().await.unwrap_or_default();
    classify_status(status, retry_after, &body)
}

#[derive(Debug, Clone)]
pub struct HttpStageClient {
    base_url: String,
    client: Client,
}

impl HttpStageClient {
    /// Client whose every request gives up after `request_timeout`
    pub fn new(base_url: impl Into<String>, request_timeout: Duration) -> reqwest::Result<Self> {
        let client = Client::builder().timeout(request_timeout).build()?;
        Ok(Self::with_client(base_url, client))
    }

    pub fn with_client(base_url: impl Into<String>, client: Client) -> Self {
        let base_url = base_url.into();
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
        }
    }
}

#[async_trait]
impl StageClient for HttpStageClient {
    async fn start(&self, key: Uuid, request: &StageRequest) -> Result<StartOutcome, StageError> {
        let url = format!("{}/jobs", self.base_url);
        let response = self
            .client
            .post(&url)
            .header(IDEMPOTENCY_KEY_HEADER, key.to_string())
            .json(request)
            .send()
            .await
            .map_err(classify_transport)?;

        let status = response.status();
        if status.is_success() || status == StatusCode::CONFLICT {
            let body: SubmitResponse = response.json().await.map_err(classify_transport)?;
            tracing::debug!(%key, handle = %body.handle, %status, "Stage job submitted");
            return Ok(if status == StatusCode::CONFLICT {
                StartOutcome::Duplicate(body.handle)
            } else {
                StartOutcome::Accepted(body.handle)
            });
        }

        Err(error_for(response).await)
    }

    async fn poll(&self, handle: &str) -> Result<StageStatusReport, StageError> {
        let url = format!("{}/jobs/{}", self.base_url, handle);
        let response = self.client.get(&url).send().await.map_err(classify_transport)?;

        if !response.status().is_success() {
            return Err(error_for(response).await);
        }

        let body: JobStatusResponse = response.json().await.map_err(classify_transport)?;
        Ok(match body.status {
            JobState::Queued | JobState::Running => StageStatusReport::Running,
            JobState::Succeeded => StageStatusReport::Succeeded(body.output.unwrap_or_default()),
            JobState::Failed => {
                let failure = body.error.unwrap_or(JobFailure {
                    code: "JOB_FAILED".to_string(),
                    message: "job failed without an error".to_string(),
                    retryable: false,
                });
                let class = if failure.retryable {
                    ErrorClass::Transient
                } else {
                    ErrorClass::Permanent
                };
                StageStatusReport::Failed(StageError::new(class, failure.code, failure.message))
            }
            JobState::Cancelled => StageStatusReport::Failed(StageError::transient(
                "JOB_CANCELLED",
                format!("job {handle} was cancelled externally"),
            )),
        })
    }

    async fn cancel(&self, handle: &str) -> Result<(), StageError> {
        let url = format!("{}/jobs/{}/cancel", self.base_url, handle);
        let response = self
            .client
            .post(&url)
            .send()
            .await
            .map_err(classify_transport)?;

        // A job the service no longer knows has nothing left to stop
        if response.status().is_success() || response.status() == StatusCode::NOT_FOUND {
            return Ok(());
        }
        Err(error_for(response).await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{
        Json, Router,
        extract::{Path, State},
        http::HeaderMap,
        routing::{get, post},
    };
    use std::collections::HashMap;
    use std::sync::{Arc, Mutex};
    use tributary_core::domain::pipeline::DestinationSpec;
    use tributary_core::domain::stage::StageKind;
    use tributary_core::error::codes;

    #[test]
    fn test_classify_status() {
        let err = classify_status(StatusCode::TOO_MANY_REQUESTS, Some(Duration::from_secs(3)), "");
        assert!(err.is_retryable());
        assert_eq!(err.code, codes::RATE_LIMITED);
        assert_eq!(err.retry_after_ms, Some(3_000));

        assert!(classify_status(StatusCode::REQUEST_TIMEOUT, None, "").is_retryable());
        assert!(classify_status(StatusCode::BAD_GATEWAY, None, "").is_retryable());
        assert_eq!(
            classify_status(StatusCode::SERVICE_UNAVAILABLE, None, "down").code,
            codes::SERVICE_UNAVAILABLE
        );

        let err = classify_status(StatusCode::UNPROCESSABLE_ENTITY, None, "bad column");
        assert_eq!(err.class, ErrorClass::Permanent);
        assert_eq!(err.code, "HTTP_422");
        assert!(err.message.contains("bad column"));
    }

    type Jobs = Arc<Mutex<HashMap<String, String>>>;

    async fn submit(State(jobs): State<Jobs>, headers: HeaderMap) -> (StatusCode, Json<SubmitResponse>) {
        let key = headers
            .get(IDEMPOTENCY_KEY_HEADER)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();
        let mut jobs = jobs.lock().unwrap();
        if let Some(handle) = jobs.get(&key) {
            return (StatusCode::CONFLICT, Json(SubmitResponse { handle: handle.clone() }));
        }
        let handle = format!("job-{}", jobs.len() + 1);
        jobs.insert(key, handle.clone());
        (StatusCode::ACCEPTED, Json(SubmitResponse { handle }))
    }

    async fn status(Path(handle): Path<String>) -> Json<JobStatusResponse> {
        if handle == "job-slow" {
            tokio::time::sleep(Duration::from_secs(30)).await;
        }
        Json(if handle == "job-1" {
            JobStatusResponse {
                status: JobState::Succeeded,
                output: Some(StageOutput {
                    location: Some("s3://lake/student_perf".to_string()),
                    ..StageOutput::default()
                }),
                error: None,
            }
        } else {
            JobStatusResponse {
                status: JobState::Failed,
                output: None,
                error: Some(JobFailure {
                    code: "OOM".to_string(),
                    message: "executor lost".to_string(),
                    retryable: true,
                }),
            }
        })
    }

    const TIMEOUT: Duration = Duration::from_secs(5);

    async fn serve() -> String {
        let jobs: Jobs = Arc::default();
        let app = Router::new()
            .route("/jobs", post(submit))
            .route("/jobs/{handle}", get(status))
            .with_state(jobs);
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, app).await });
        format!("http://{addr}/")
    }

    fn request() -> StageRequest {
        StageRequest {
            run_id: Uuid::new_v4(),
            pipeline_name: "daily-student-perf".to_string(),
            dataset: "student_perf".to_string(),
            stage: StageKind::Transform,
            parameters: HashMap::new(),
            input: None,
            destination: DestinationSpec::default(),
        }
    }

    #[tokio::test]
    async fn test_resubmitted_key_returns_original_handle() {
        let client = HttpStageClient::new(serve().await, TIMEOUT).unwrap();
        let req = request();
        let key = StageKind::Transform.idempotency_key(req.run_id, 1);

        let first = client.start(key, &req).await.unwrap();
        let second = client.start(key, &req).await.unwrap();
        assert_eq!(first, StartOutcome::Accepted("job-1".to_string()));
        assert_eq!(second, StartOutcome::Duplicate("job-1".to_string()));

        let other = client.start(Uuid::new_v4(), &req).await.unwrap();
        assert_eq!(other.into_handle(), "job-2");
    }

    #[tokio::test]
    async fn test_poll_maps_job_status() {
        let client = HttpStageClient::new(serve().await, TIMEOUT).unwrap();

        match client.poll("job-1").await.unwrap() {
            StageStatusReport::Succeeded(output) => {
                assert_eq!(output.location.as_deref(), Some("s3://lake/student_perf"))
            }
            other => panic!("unexpected report: {other:?}"),
        }
        match client.poll("job-2").await.unwrap() {
            StageStatusReport::Failed(err) => {
                assert!(err.is_retryable());
                assert_eq!(err.code, "OOM");
            }
            other => panic!("unexpected report: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_unreachable_service_is_transient() {
        let client = HttpStageClient::new("http://127.0.0.1:9", TIMEOUT).unwrap();
        let err = client.poll("job-1").await.unwrap_err();
        assert!(err.is_retryable());
        assert_eq!(err.code, codes::NETWORK);
    }

    #[tokio::test]
    async fn test_slow_service_times_out_as_transient() {
        let client = HttpStageClient::new(serve().await, Duration::from_millis(200)).unwrap();
        let err = client.poll("job-slow").await.unwrap_err();
        assert!(err.is_retryable());
        assert_eq!(err.code, codes::CALL_TIMEOUT);
    }
}
