//! Run-related API endpoints

use serde_json::Value;
use std::collections::HashMap;
use tributary_core::domain::run::RunRecord;
use tributary_core::dto::run::{RunSummary, TriggerResponse, TriggerRun};
use uuid::Uuid;

use crate::OrchestratorClient;
use crate::error::Result;

impl OrchestratorClient {
    // =============================================================================
    // Run Lifecycle
    // =============================================================================

    /// Trigger a run of a pipeline
    ///
    /// Fails with a 409 [`crate::ClientError`] (see `is_conflict`) while the
    /// pipeline already has an active run.
    pub async fn trigger_run(
        &self,
        pipeline_name: &str,
        parameters: HashMap<String, Value>,
    ) -> Result<Uuid> {
        let url = format!("{}/run/trigger", self.base_url);
        let req = TriggerRun {
            pipeline_name: pipeline_name.to_string(),
            parameters,
        };
        let response = self.client.post(&url).json(&req).send().await?;

        let accepted: TriggerResponse = self.handle_response(response).await?;
        Ok(accepted.run_id)
    }

    /// Get a run with all of its stage attempts
    pub async fn get_run(&self, run_id: Uuid) -> Result<RunRecord> {
        let url = format!("{}/run/{}", self.base_url, run_id);
        let response = self.client.get(&url).send().await?;

        self.handle_response(response).await
    }

    /// Request cancellation of a run
    pub async fn cancel_run(&self, run_id: Uuid) -> Result<RunSummary> {
        let url = format!("{}/run/{}/cancel", self.base_url, run_id);
        let response = self.client.post(&url).send().await?;

        self.handle_response(response).await
    }

    /// List the most recent runs of a pipeline
    pub async fn list_runs(&self, pipeline_name: &str, limit: u32) -> Result<Vec<RunSummary>> {
        let url = format!("{}/run/pipeline/{}", self.base_url, pipeline_name);
        let response = self
            .client
            .get(&url)
            .query(&[("limit", limit)])
            .send()
            .await?;

        self.handle_response(response).await
    }
}
