//! API Module
//!
//! HTTP API layer for the orchestrator.
//! Each submodule handles endpoints for a specific domain.

pub mod error;
pub mod health;
pub mod pipeline;
pub mod run;
pub mod schema;

use axum::{
    Router,
    routing::{delete, get, post},
};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use crate::engine::Orchestrator;
use crate::service::SchemaRegistry;
use crate::store::PipelineStore;

/// Shared handler state
#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Orchestrator,
    pub registry: SchemaRegistry,
}

impl AppState {
    pub fn new(orchestrator: Orchestrator) -> Self {
        let registry = orchestrator.engine().registry.clone();
        Self {
            orchestrator,
            registry,
        }
    }

    pub fn pipelines(&self) -> &Arc<dyn PipelineStore> {
        self.orchestrator.pipelines()
    }
}

/// Create the main API router with all endpoints
pub fn create_router(state: AppState) -> Router {
    Router::new()
        // Health check
        .route("/health", get(health::health_check))
        // Pipeline endpoints
        .route("/pipeline/create", post(pipeline::create_pipeline))
        .route("/pipeline/list", get(pipeline::list_pipelines))
        .route("/pipeline/{name}", get(pipeline::get_pipeline))
        .route("/pipeline/{name}", delete(pipeline::delete_pipeline))
        // Run endpoints
        .route("/run/trigger", post(run::trigger_run))
        .route("/run/{id}", get(run::get_run))
        .route("/run/{id}/cancel", post(run::cancel_run))
        .route("/run/pipeline/{name}", get(run::list_runs_by_pipeline))
        // Schema endpoints
        .route("/schema/{dataset}", get(schema::get_latest_schema))
        .route("/schema/{dataset}/history", get(schema::get_schema_history))
        .route("/schema/{dataset}/register", post(schema::register_schema))
        // Add state and middleware
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::testing::{DATASET, Harness, PIPELINE, Scripts};
    use crate::stage::testing::{Scripted, ScriptedStageClient};
    use reqwest::StatusCode;
    use serde_json::{Value, json};

    /// Serve the router on an ephemeral port, returning its base URL
    async fn serve(harness: &Harness) -> String {
        let app = create_router(AppState::new(harness.orchestrator.clone()));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}")
    }

    fn pipeline_body() -> Value {
        json!({
            "name": PIPELINE,
            "dataset": DATASET,
            "description": "Nightly student performance rollup",
            "config": {
                "max_attempts": 3,
                "destination": { "table": "student_perf", "key_columns": ["student_id"] }
            }
        })
    }

    #[tokio::test]
    async fn test_pipeline_endpoints() {
        let harness = Harness::new(Scripts::new().clients());
        let base = serve(&harness).await;
        let http = reqwest::Client::new();

        let created = http
            .post(format!("{base}/pipeline/create"))
            .json(&pipeline_body())
            .send()
            .await
            .unwrap();
        assert_eq!(created.status(), StatusCode::CREATED);

        let duplicate = http
            .post(format!("{base}/pipeline/create"))
            .json(&pipeline_body())
            .send()
            .await
            .unwrap();
        assert_eq!(duplicate.status(), StatusCode::CONFLICT);

        let list: Vec<Value> = http
            .get(format!("{base}/pipeline/list"))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(list.len(), 1);
        assert_eq!(list[0]["name"], PIPELINE);

        let fetched: Value = http
            .get(format!("{base}/pipeline/{PIPELINE}"))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(fetched["config"]["destination"]["table"], "student_perf");

        let deleted = http
            .delete(format!("{base}/pipeline/{PIPELINE}"))
            .send()
            .await
            .unwrap();
        assert_eq!(deleted.status(), StatusCode::NO_CONTENT);

        let missing = http
            .get(format!("{base}/pipeline/{PIPELINE}"))
            .send()
            .await
            .unwrap();
        assert_eq!(missing.status(), StatusCode::NOT_FOUND);
        let body: Value = missing.json().await.unwrap();
        assert!(body["error"].as_str().unwrap().contains(PIPELINE));
    }

    #[tokio::test]
    async fn test_invalid_pipeline_is_rejected() {
        let harness = Harness::new(Scripts::new().clients());
        let base = serve(&harness).await;

        let mut body = pipeline_body();
        body["config"]["max_attempts"] = json!(0);
        let response = reqwest::Client::new()
            .post(format!("{base}/pipeline/create"))
            .json(&body)
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_run_endpoints() {
        // The transform job never finishes, so the run stays active
        let scripts = Scripts::new().transform(ScriptedStageClient::new().then(Scripted::Hang));
        let harness = Harness::new(scripts.clients());
        let base = serve(&harness).await;
        let http = reqwest::Client::new();

        http.post(format!("{base}/pipeline/create"))
            .json(&pipeline_body())
            .send()
            .await
            .unwrap();

        let trigger = json!({ "pipeline_name": PIPELINE, "parameters": { "run_date": "2026-10-18" } });
        let accepted = http
            .post(format!("{base}/run/trigger"))
            .json(&trigger)
            .send()
            .await
            .unwrap();
        assert_eq!(accepted.status(), StatusCode::ACCEPTED);
        let run_id = accepted.json::<Value>().await.unwrap()["run_id"]
            .as_str()
            .unwrap()
            .to_string();

        let again = http
            .post(format!("{base}/run/trigger"))
            .json(&trigger)
            .send()
            .await
            .unwrap();
        assert_eq!(again.status(), StatusCode::CONFLICT);

        let record: Value = http
            .get(format!("{base}/run/{run_id}"))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(record["run"]["pipeline_name"], PIPELINE);
        assert_eq!(record["run"]["parameters"]["run_date"], "2026-10-18");

        let runs: Vec<Value> = http
            .get(format!("{base}/run/pipeline/{PIPELINE}?limit=5"))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0]["id"], run_id.as_str());

        let cancelled = http
            .post(format!("{base}/run/{run_id}/cancel"))
            .send()
            .await
            .unwrap();
        assert_eq!(cancelled.status(), StatusCode::ACCEPTED);

        let unknown = http
            .post(format!("{base}/run/{}/cancel", uuid::Uuid::new_v4()))
            .send()
            .await
            .unwrap();
        assert_eq!(unknown.status(), StatusCode::NOT_FOUND);

        let no_pipeline = http
            .post(format!("{base}/run/trigger"))
            .json(&json!({ "pipeline_name": "nope" }))
            .send()
            .await
            .unwrap();
        assert_eq!(no_pipeline.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_schema_endpoints() {
        let harness = Harness::new(Scripts::new().clients());
        let base = serve(&harness).await;
        let http = reqwest::Client::new();

        let missing = http
            .get(format!("{base}/schema/{DATASET}"))
            .send()
            .await
            .unwrap();
        assert_eq!(missing.status(), StatusCode::NOT_FOUND);

        let v1 = json!({ "columns": [
            { "name": "student_id", "data_type": "bigint" },
            { "name": "score", "data_type": "double" }
        ]});
        let registered = http
            .post(format!("{base}/schema/{DATASET}/register"))
            .json(&v1)
            .send()
            .await
            .unwrap();
        assert_eq!(registered.status(), StatusCode::CREATED);

        let same = http
            .post(format!("{base}/schema/{DATASET}/register"))
            .json(&v1)
            .send()
            .await
            .unwrap();
        assert_eq!(same.status(), StatusCode::OK);

        let narrowed = json!({ "columns": [{ "name": "student_id", "data_type": "bigint" }] });
        let drift = http
            .post(format!("{base}/schema/{DATASET}/register"))
            .json(&narrowed)
            .send()
            .await
            .unwrap();
        assert_eq!(drift.status(), StatusCode::CONFLICT);
        let body: Value = drift.json().await.unwrap();
        assert_eq!(body["outcome"], "drift");
        assert_eq!(body["diff"]["removed"][0]["name"], "score");

        let latest: Value = http
            .get(format!("{base}/schema/{DATASET}"))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(latest["version"], 1);

        let history: Vec<Value> = http
            .get(format!("{base}/schema/{DATASET}/history"))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(history.len(), 1);
    }

    #[tokio::test]
    async fn test_health() {
        let harness = Harness::new(Scripts::new().clients());
        let base = serve(&harness).await;
        let response = reqwest::get(format!("{base}/health")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
}
