//! Pipeline DTOs

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::pipeline::{PipelineConfig, PipelineDefinition, Schedule};

/// Request to create a new pipeline
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreatePipeline {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub dataset: String,
    pub config: PipelineConfig,
}

/// Lightweight pipeline summary for listing
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineSummary {
    pub id: Uuid,
    pub name: String,
    pub dataset: String,
    pub description: Option<String>,
    pub schedule: Option<Schedule>,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

impl From<PipelineDefinition> for PipelineSummary {
    fn from(pipeline: PipelineDefinition) -> Self {
        Self {
            id: pipeline.id,
            name: pipeline.name,
            dataset: pipeline.dataset,
            description: pipeline.description,
            schedule: pipeline.config.schedule,
            created_at: pipeline.created_at,
        }
    }
}
