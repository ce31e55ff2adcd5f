//! Schema registry API endpoints

use tributary_core::domain::schema::{Column, DatasetSchema, Registration};
use tributary_core::dto::schema::RegisterSchema;

use crate::OrchestratorClient;
use crate::error::{ClientError, Result};

impl OrchestratorClient {
    // =============================================================================
    // Schema Registry
    // =============================================================================

    /// Latest registered schema of a dataset
    pub async fn get_schema(&self, dataset: &str) -> Result<DatasetSchema> {
        let url = format!("{}/schema/{}", self.base_url, dataset);
        let response = self.client.get(&url).send().await?;

        self.handle_response(response).await
    }

    /// Every registered version of a dataset, oldest first
    pub async fn schema_history(&self, dataset: &str) -> Result<Vec<DatasetSchema>> {
        let url = format!("{}/schema/{}/history", self.base_url, dataset);
        let response = self.client.get(&url).send().await?;

        self.handle_response(response).await
    }

    /// Register an observed schema
    ///
    /// Breaking drift comes back as `Ok(Registration::Drift { .. })` rather
    /// than an error, so callers can show the diff.
    pub async fn register_schema(
        &self,
        dataset: &str,
        columns: Vec<Column>,
        allow_override: bool,
    ) -> Result<Registration> {
        let url = format!("{}/schema/{}/register", self.base_url, dataset);
        let req = RegisterSchema {
            columns,
            allow_override,
        };
        let response = self.client.post(&url).json(&req).send().await?;

        if response.status() == reqwest::StatusCode::CONFLICT {
            return response
                .json()
                .await
                .map_err(|e| ClientError::ParseError(format!("Failed to parse drift: {}", e)));
        }
        self.handle_response(response).await
    }
}
