//! Stage clients
//!
//! The uniform boundary over the external systems that execute each stage.
//! Clients classify their own failures into [`StageError`]; retries and
//! idempotency bookkeeping live in the engine.

pub mod http;
pub mod load;
pub mod results;
#[cfg(test)]
pub mod testing;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tributary_core::domain::pipeline::DestinationSpec;
use tributary_core::domain::stage::{StageKind, StageOutput};
use tributary_core::error::StageError;
use uuid::Uuid;

pub use http::HttpStageClient;
pub use load::LoadStageClient;
pub use results::S3ResultSource;

/// Everything a stage needs to run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageRequest {
    pub run_id: Uuid,
    pub pipeline_name: String,
    pub dataset: String,
    pub stage: StageKind,
    pub parameters: HashMap<String, Value>,
    /// Output of the previous stage, if any
    pub input: Option<StageOutput>,
    pub destination: DestinationSpec,
}

/// Result of submitting a stage job
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StartOutcome {
    Accepted(String),
    /// The key was seen before; this is the original job's handle
    Duplicate(String),
}

impl StartOutcome {
    pub fn into_handle(self) -> String {
        match self {
            StartOutcome::Accepted(handle) | StartOutcome::Duplicate(handle) => handle,
        }
    }
}

/// Status of a submitted job
#[derive(Debug, Clone, PartialEq)]
pub enum StageStatusReport {
    Running,
    Succeeded(StageOutput),
    Failed(StageError),
}

#[async_trait]
pub trait StageClient: Send + Sync {
    /// Submit a job; the same key always yields the same handle
    async fn start(&self, key: Uuid, request: &StageRequest) -> Result<StartOutcome, StageError>;

    async fn poll(&self, handle: &str) -> Result<StageStatusReport, StageError>;

    /// Ask the job to stop; `Ok` is the acknowledgement
    async fn cancel(&self, handle: &str) -> Result<(), StageError>;
}

/// One client per stage kind
#[derive(Clone)]
pub struct StageClients {
    pub transform: Arc<dyn StageClient>,
    pub catalog: Arc<dyn StageClient>,
    pub query: Arc<dyn StageClient>,
    pub load: Arc<dyn StageClient>,
}

impl StageClients {
    pub fn get(&self, stage: StageKind) -> &Arc<dyn StageClient> {
        match stage {
            StageKind::Transform => &self.transform,
            StageKind::CatalogRegister => &self.catalog,
            StageKind::Query => &self.query,
            StageKind::Load => &self.load,
        }
    }
}
