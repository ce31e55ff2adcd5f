//! Pipeline domain types

use serde::{Deserialize, Serialize};
use std::time::Duration;
use uuid::Uuid;

use crate::domain::quality::QualityRules;
use crate::domain::stage::StageKind;

/// Pipeline definition
///
/// A named, fixed chain of stages producing one logical dataset.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineDefinition {
    pub id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub dataset: String,
    pub config: PipelineConfig,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub updated_at: chrono::DateTime<chrono::Utc>,
}

/// Pipeline configuration options
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Attempts per stage before a transient failure fails the run
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default)]
    pub stage_timeouts: StageTimeouts,
    #[serde(default)]
    pub quality: QualityRules,
    pub destination: DestinationSpec,
    #[serde(default)]
    pub schedule: Option<Schedule>,
}

fn default_max_attempts() -> u32 {
    3
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            stage_timeouts: StageTimeouts::default(),
            quality: QualityRules::default(),
            destination: DestinationSpec::default(),
            schedule: None,
        }
    }
}

/// Per-stage timeouts in seconds; `None` means unbounded
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageTimeouts {
    pub transform_secs: Option<u64>,
    pub catalog_register_secs: Option<u64>,
    pub query_secs: Option<u64>,
    pub load_secs: Option<u64>,
}

impl Default for StageTimeouts {
    fn default() -> Self {
        Self {
            transform_secs: None,
            catalog_register_secs: Some(1800),
            query_secs: Some(1800),
            load_secs: Some(1800),
        }
    }
}

impl StageTimeouts {
    pub fn for_stage(&self, stage: StageKind) -> Option<Duration> {
        let secs = match stage {
            StageKind::Transform => self.transform_secs,
            StageKind::CatalogRegister => self.catalog_register_secs,
            StageKind::Query => self.query_secs,
            StageKind::Load => self.load_secs,
        };
        secs.map(Duration::from_secs)
    }
}

/// Destination table the load stage upserts into
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DestinationSpec {
    pub table: String,
    pub key_columns: Vec<String>,
}

/// Fixed-interval schedule for automatic triggers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Schedule {
    pub every_secs: u64,
}

impl Schedule {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.every_secs)
    }
}
