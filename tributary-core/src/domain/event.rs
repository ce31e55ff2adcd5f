//! State transition events

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::run::RunState;
use crate::domain::stage::StageKind;
use crate::error::StageError;

/// Emitted on every run state transition
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransitionEvent {
    pub run_id: Uuid,
    pub pipeline_name: String,
    pub stage: Option<StageKind>,
    pub from: RunState,
    pub to: RunState,
    pub at: DateTime<Utc>,
    pub error: Option<StageError>,
}
