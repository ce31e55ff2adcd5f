//! Run DTOs

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use uuid::Uuid;

use crate::domain::run::{PipelineRun, RunState};
use crate::domain::stage::StageKind;
use crate::error::StageError;

/// Request to trigger a new run of a pipeline
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TriggerRun {
    pub pipeline_name: String,
    #[serde(default)]
    pub parameters: HashMap<String, Value>,
}

/// Response to a successful trigger
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TriggerResponse {
    pub run_id: Uuid,
}

/// Run summary for listings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSummary {
    pub id: Uuid,
    pub pipeline_name: String,
    pub state: RunState,
    pub current_stage: Option<StageKind>,
    pub last_error: Option<StageError>,
    pub triggered_at: chrono::DateTime<chrono::Utc>,
    pub completed_at: Option<chrono::DateTime<chrono::Utc>>,
}

impl From<PipelineRun> for RunSummary {
    fn from(run: PipelineRun) -> Self {
        Self {
            id: run.id,
            pipeline_name: run.pipeline_name,
            state: run.state,
            current_stage: run.current_stage,
            last_error: run.last_error,
            triggered_at: run.triggered_at,
            completed_at: run.completed_at,
        }
    }
}

/// Query parameters for run listings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunListQuery {
    #[serde(default = "default_limit")]
    pub limit: u32,
}

fn default_limit() -> u32 {
    20
}

impl Default for RunListQuery {
    fn default() -> Self {
        Self {
            limit: default_limit(),
        }
    }
}
