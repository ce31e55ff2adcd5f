//! Pipeline run domain types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use uuid::Uuid;

use crate::domain::pipeline::PipelineConfig;
use crate::domain::stage::{StageExecution, StageKind};
use crate::error::StageError;

/// Run parameter that lets a breaking schema change through registration.
pub const ALLOW_SCHEMA_OVERRIDE: &str = "allow_schema_override";

/// State of a pipeline run
///
/// Runs move forward through the stage states in order; `Failed` and
/// `Cancelled` are reachable from any non-terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    Created,
    Transforming,
    Registering,
    Querying,
    Loading,
    Succeeded,
    Failed,
    Cancelled,
}

impl RunState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RunState::Succeeded | RunState::Failed | RunState::Cancelled
        )
    }

    /// Stage executed while the run is in this state
    pub fn stage(&self) -> Option<StageKind> {
        match self {
            RunState::Transforming => Some(StageKind::Transform),
            RunState::Registering => Some(StageKind::CatalogRegister),
            RunState::Querying => Some(StageKind::Query),
            RunState::Loading => Some(StageKind::Load),
            _ => None,
        }
    }

    /// State that executes `stage`
    pub fn for_stage(stage: StageKind) -> Self {
        match stage {
            StageKind::Transform => RunState::Transforming,
            StageKind::CatalogRegister => RunState::Registering,
            StageKind::Query => RunState::Querying,
            StageKind::Load => RunState::Loading,
        }
    }

    /// Next state on the success path, `None` once terminal
    pub fn next(&self) -> Option<RunState> {
        match self {
            RunState::Created => Some(RunState::Transforming),
            RunState::Transforming => Some(RunState::Registering),
            RunState::Registering => Some(RunState::Querying),
            RunState::Querying => Some(RunState::Loading),
            RunState::Loading => Some(RunState::Succeeded),
            _ => None,
        }
    }

    /// Whether moving from `self` to `to` is a legal transition
    pub fn can_transition_to(&self, to: RunState) -> bool {
        if self.is_terminal() {
            return false;
        }
        matches!(to, RunState::Failed | RunState::Cancelled) || self.next() == Some(to)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RunState::Created => "created",
            RunState::Transforming => "transforming",
            RunState::Registering => "registering",
            RunState::Querying => "querying",
            RunState::Loading => "loading",
            RunState::Succeeded => "succeeded",
            RunState::Failed => "failed",
            RunState::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "created" => Some(RunState::Created),
            "transforming" => Some(RunState::Transforming),
            "registering" => Some(RunState::Registering),
            "querying" => Some(RunState::Querying),
            "loading" => Some(RunState::Loading),
            "succeeded" => Some(RunState::Succeeded),
            "failed" => Some(RunState::Failed),
            "cancelled" => Some(RunState::Cancelled),
            _ => None,
        }
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One end-to-end execution of a pipeline
///
/// Created on trigger, mutated only by the orchestrator driving it,
/// immutable once terminal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineRun {
    pub id: Uuid,
    pub pipeline_name: String,
    /// Logical dataset the run produces, copied from the pipeline definition
    pub dataset: String,
    pub state: RunState,
    /// Stage in progress, or where a failed/cancelled run stopped
    pub current_stage: Option<StageKind>,
    pub parameters: HashMap<String, Value>,
    /// Pipeline configuration snapshot taken at trigger time
    pub config: PipelineConfig,
    pub last_error: Option<StageError>,
    pub cancel_requested: bool,
    /// Fencing token of the lease that made the last write
    pub fencing_token: u64,
    pub triggered_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl PipelineRun {
    pub fn new(
        pipeline_name: impl Into<String>,
        dataset: impl Into<String>,
        config: PipelineConfig,
        parameters: HashMap<String, Value>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            pipeline_name: pipeline_name.into(),
            dataset: dataset.into(),
            state: RunState::Created,
            current_stage: None,
            parameters,
            config,
            last_error: None,
            cancel_requested: false,
            fencing_token: 0,
            triggered_at: now,
            updated_at: now,
            completed_at: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    /// Whether the caller asked for breaking schema changes to be accepted
    pub fn allows_schema_override(&self) -> bool {
        self.parameters
            .get(ALLOW_SCHEMA_OVERRIDE)
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }
}

/// A run together with all of its stage attempts
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunRecord {
    pub run: PipelineRun,
    pub stages: Vec<StageExecution>,
}
