//! In-memory orchestrator fixture for engine tests

use chrono::Utc;
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tributary_core::domain::pipeline::{DestinationSpec, PipelineConfig, PipelineDefinition};
use tributary_core::domain::run::RunRecord;
use tributary_core::domain::schema::Column;
use tributary_core::domain::stage::{Record, StageOutput};
use uuid::Uuid;

use super::backoff::Backoff;
use super::events::RecordingSink;
use super::{Engine, EngineSettings, Orchestrator};
use crate::service::SchemaRegistry;
use crate::stage::StageClients;
use crate::stage::testing::ScriptedStageClient;
use crate::store::{MemoryStore, PipelineStore};

pub const PIPELINE: &str = "daily-student-perf";
pub const DATASET: &str = "student_perf";

pub fn settings() -> EngineSettings {
    EngineSettings {
        owner: "orchestrator-test".to_string(),
        lease_ttl: Duration::from_secs(60),
        poll: Backoff::default(),
        retry: Backoff::default(),
        store_retry: Backoff::new(Duration::from_secs(1), 2, Duration::from_secs(30)),
        cancel_grace: Duration::from_secs(60),
        max_concurrent_runs: 4,
    }
}

pub fn student_row(id: u64) -> Record {
    let row = json!({
        "student_id": id,
        "score": 50.0 + (id % 50) as f64,
        "attendance_pct": 0.9,
    });
    match row {
        Value::Object(map) => map,
        _ => Record::new(),
    }
}

pub fn student_rows(count: u64) -> Vec<Record> {
    (1..=count).map(student_row).collect()
}

pub fn columns(spec: &[(&str, &str)]) -> Vec<Column> {
    spec.iter().map(|(n, t)| Column::new(*n, *t)).collect()
}

pub fn config() -> PipelineConfig {
    PipelineConfig {
        destination: DestinationSpec {
            table: DATASET.to_string(),
            key_columns: vec!["student_id".to_string()],
        },
        ..PipelineConfig::default()
    }
}

pub fn transform_output() -> StageOutput {
    StageOutput {
        records: student_rows(10),
        location: Some("s3://lake/student_perf/".to_string()),
        ..StageOutput::default()
    }
}

pub fn catalog_output(schema: &[(&str, &str)]) -> StageOutput {
    StageOutput {
        schema: Some(columns(schema)),
        ..StageOutput::default()
    }
}

pub fn query_output() -> StageOutput {
    StageOutput {
        records: student_rows(10),
        ..StageOutput::default()
    }
}

/// One scripted client per stage, succeeding by default
pub struct Scripts {
    pub transform: Arc<ScriptedStageClient>,
    pub catalog: Arc<ScriptedStageClient>,
    pub query: Arc<ScriptedStageClient>,
    pub load: Arc<ScriptedStageClient>,
}

impl Scripts {
    pub fn new() -> Self {
        Self {
            transform: Arc::new(ScriptedStageClient::succeeding_with(transform_output())),
            catalog: Arc::new(ScriptedStageClient::succeeding_with(catalog_output(&[
                ("student_id", "bigint"),
                ("score", "double"),
            ]))),
            query: Arc::new(ScriptedStageClient::succeeding_with(query_output())),
            load: Arc::new(ScriptedStageClient::succeeding_with(StageOutput {
                rows_written: Some(10),
                ..StageOutput::default()
            })),
        }
    }

    pub fn transform(self, client: ScriptedStageClient) -> Self {
        Self {
            transform: Arc::new(client),
            ..self
        }
    }

    pub fn catalog(self, client: ScriptedStageClient) -> Self {
        Self {
            catalog: Arc::new(client),
            ..self
        }
    }

    pub fn query(self, client: ScriptedStageClient) -> Self {
        Self {
            query: Arc::new(client),
            ..self
        }
    }

    pub fn load(self, client: ScriptedStageClient) -> Self {
        Self {
            load: Arc::new(client),
            ..self
        }
    }

    pub fn clients(&self) -> StageClients {
        StageClients {
            transform: self.transform.clone(),
            catalog: self.catalog.clone(),
            query: self.query.clone(),
            load: self.load.clone(),
        }
    }
}

pub struct Harness {
    pub store: Arc<MemoryStore>,
    pub events: Arc<RecordingSink>,
    pub registry: SchemaRegistry,
    pub orchestrator: Orchestrator,
}

impl Harness {
    pub fn new(clients: StageClients) -> Self {
        Self::with_store(Arc::new(MemoryStore::new()), clients)
    }

    pub fn with_store(store: Arc<MemoryStore>, clients: StageClients) -> Self {
        Self::with_settings(store, clients, settings())
    }

    pub fn with_settings(
        store: Arc<MemoryStore>,
        clients: StageClients,
        settings: EngineSettings,
    ) -> Self {
        let events = Arc::new(RecordingSink::default());
        let registry = SchemaRegistry::new(store.clone());
        let engine = Engine {
            store: store.clone(),
            clients,
            registry: registry.clone(),
            events: events.clone(),
            settings,
        };
        let orchestrator = Orchestrator::new(engine, store.clone());
        Self {
            store,
            events,
            registry,
            orchestrator,
        }
    }

    pub async fn add_pipeline(&self, config: PipelineConfig) {
        let now = Utc::now();
        let pipeline = PipelineDefinition {
            id: Uuid::new_v4(),
            name: PIPELINE.to_string(),
            description: None,
            dataset: DATASET.to_string(),
            config,
            created_at: now,
            updated_at: now,
        };
        self.store.create_pipeline(&pipeline).await.unwrap();
    }

    /// Wait until `check` holds for the stored run
    pub async fn wait_for(&self, run_id: Uuid, check: impl Fn(&RunRecord) -> bool) -> RunRecord {
        for _ in 0..100_000 {
            if let Some(record) = self.orchestrator.get_run(run_id).await.ok()
                && check(&record)
            {
                return record;
            }
            sleep(Duration::from_millis(500)).await;
        }
        panic!("run {run_id} never reached the expected state");
    }

    /// Wait until the run is terminal and its driver has let go of the lease
    pub async fn wait_finished(&self, run_id: Uuid) -> RunRecord {
        let record = self.wait_for(run_id, |r| r.run.is_terminal()).await;
        while self.orchestrator.is_driving(run_id) {
            sleep(Duration::from_millis(500)).await;
        }
        record
    }
}
