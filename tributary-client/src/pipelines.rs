//! Pipeline-related API endpoints

use crate::OrchestratorClient;
use crate::error::Result;
use tributary_core::domain::pipeline::PipelineDefinition;
use tributary_core::dto::pipeline::{CreatePipeline, PipelineSummary};

impl OrchestratorClient {
    // =============================================================================
    // Pipeline Management
    // =============================================================================

    /// Create a new pipeline
    pub async fn create_pipeline(&self, req: CreatePipeline) -> Result<PipelineDefinition> {
        let url = format!("{}/pipeline/create", self.base_url);
        let response = self.client.post(&url).json(&req).send().await?;

        self.handle_response(response).await
    }

    /// List all pipelines
    pub async fn list_pipelines(&self) -> Result<Vec<PipelineSummary>> {
        let url = format!("{}/pipeline/list", self.base_url);
        let response = self.client.get(&url).send().await?;

        self.handle_response(response).await
    }

    /// Get a pipeline by name
    pub async fn get_pipeline(&self, name: &str) -> Result<PipelineDefinition> {
        let url = format!("{}/pipeline/{}", self.base_url, name);
        let response = self.client.get(&url).send().await?;

        self.handle_response(response).await
    }

    /// Delete a pipeline by name
    pub async fn delete_pipeline(&self, name: &str) -> Result<()> {
        let url = format!("{}/pipeline/{}", self.base_url, name);
        let response = self.client.delete(&url).send().await?;

        self.handle_empty_response(response).await
    }
}
