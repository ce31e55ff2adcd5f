//! Pipeline Service
//!
//! Business logic for pipeline definition management.

use chrono::Utc;
use tributary_core::domain::pipeline::PipelineDefinition;
use tributary_core::dto::pipeline::CreatePipeline;
use uuid::Uuid;

use crate::store::{PipelineStore, StoreError};

/// Service error type
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("pipeline '{0}' not found")]
    NotFound(String),
    #[error("pipeline '{0}' already exists")]
    AlreadyExists(String),
    #[error("invalid pipeline: {0}")]
    ValidationError(String),
    #[error(transparent)]
    Store(StoreError),
}

impl From<StoreError> for PipelineError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Duplicate(name) => PipelineError::AlreadyExists(name),
            other => PipelineError::Store(other),
        }
    }
}

pub type Result<T> = std::result::Result<T, PipelineError>;

/// Create a new pipeline
pub async fn create_pipeline(
    store: &dyn PipelineStore,
    req: CreatePipeline,
) -> Result<PipelineDefinition> {
    // Validate request
    validate_pipeline_request(&req)?;

    let now = Utc::now();
    let pipeline = PipelineDefinition {
        id: Uuid::new_v4(),
        name: req.name.trim().to_string(),
        description: req.description,
        dataset: req.dataset.trim().to_string(),
        config: req.config,
        created_at: now,
        updated_at: now,
    };
    store.create_pipeline(&pipeline).await?;

    tracing::info!("Pipeline created: {} ({})", pipeline.name, pipeline.id);

    Ok(pipeline)
}

/// Get a pipeline by name
pub async fn get_pipeline(store: &dyn PipelineStore, name: &str) -> Result<PipelineDefinition> {
    store
        .get_pipeline(name)
        .await?
        .ok_or_else(|| PipelineError::NotFound(name.to_string()))
}

/// List all pipelines
pub async fn list_pipelines(store: &dyn PipelineStore) -> Result<Vec<PipelineDefinition>> {
    Ok(store.list_pipelines().await?)
}

/// Delete a pipeline; runs already triggered keep their config snapshot
pub async fn delete_pipeline(store: &dyn PipelineStore, name: &str) -> Result<()> {
    if !store.delete_pipeline(name).await? {
        return Err(PipelineError::NotFound(name.to_string()));
    }

    tracing::info!("Pipeline deleted: {}", name);

    Ok(())
}

// =============================================================================
// Validation
// =============================================================================

fn validate_pipeline_request(req: &CreatePipeline) -> Result<()> {
    let invalid = |msg: &str| Err(PipelineError::ValidationError(msg.to_string()));

    if req.name.trim().is_empty() {
        return invalid("Pipeline name cannot be empty");
    }

    if req.name.len() > 255 {
        return invalid("Pipeline name is too long (max 255 characters)");
    }

    if req.dataset.trim().is_empty() {
        return invalid("Dataset cannot be empty");
    }

    let config = &req.config;
    if config.max_attempts == 0 {
        return invalid("max_attempts must be at least 1");
    }

    if config.destination.table.trim().is_empty() {
        return invalid("Destination table cannot be empty");
    }

    if config.destination.key_columns.is_empty() {
        return invalid("Destination needs at least one key column");
    }

    if config.schedule.is_some_and(|s| s.every_secs == 0) {
        return invalid("Schedule interval must be positive");
    }

    let thresholds = config
        .quality
        .rules
        .iter()
        .filter_map(|rule| rule.threshold())
        .chain(std::iter::once(config.quality.default_threshold));
    for threshold in thresholds {
        if !(0.0..=1.0).contains(&threshold) {
            return Err(PipelineError::ValidationError(format!(
                "Quality threshold {threshold} is outside [0, 1]"
            )));
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use tributary_core::domain::pipeline::{DestinationSpec, PipelineConfig, Schedule};
    use tributary_core::domain::quality::QualityRule;

    fn request(name: &str) -> CreatePipeline {
        CreatePipeline {
            name: name.to_string(),
            description: Some("Daily student performance rollup".to_string()),
            dataset: "student_perf".to_string(),
            config: PipelineConfig {
                destination: DestinationSpec {
                    table: "student_perf".to_string(),
                    key_columns: vec!["student_id".to_string()],
                },
                ..PipelineConfig::default()
            },
        }
    }

    #[test]
    fn test_validate_empty_name() {
        let result = validate_pipeline_request(&request("  "));
        assert!(matches!(result, Err(PipelineError::ValidationError(_))));
    }

    #[test]
    fn test_validate_missing_key_columns() {
        let mut req = request("daily-student-perf");
        req.config.destination.key_columns.clear();
        let result = validate_pipeline_request(&req);
        assert!(matches!(result, Err(PipelineError::ValidationError(_))));
    }

    #[test]
    fn test_validate_bad_threshold_and_schedule() {
        let mut req = request("daily-student-perf");
        req.config.quality.rules.push(QualityRule::NotNull {
            columns: vec!["score".to_string()],
            threshold: Some(1.5),
        });
        assert!(validate_pipeline_request(&req).is_err());

        let mut req = request("daily-student-perf");
        req.config.schedule = Some(Schedule { every_secs: 0 });
        assert!(validate_pipeline_request(&req).is_err());
    }

    #[tokio::test]
    async fn test_create_get_delete() {
        let store = MemoryStore::new();

        let created = create_pipeline(&store, request("daily-student-perf"))
            .await
            .unwrap();
        let fetched = get_pipeline(&store, "daily-student-perf").await.unwrap();
        assert_eq!(fetched.id, created.id);

        let err = create_pipeline(&store, request("daily-student-perf"))
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::AlreadyExists(_)));

        delete_pipeline(&store, "daily-student-perf").await.unwrap();
        let err = get_pipeline(&store, "daily-student-perf").await.unwrap_err();
        assert!(matches!(err, PipelineError::NotFound(_)));
    }
}
