//! Schema Registry
//!
//! Versioned dataset schemas. Registration is monotonic: additive changes
//! bump the version, identical resubmissions are no-ops, and breaking
//! changes are refused unless explicitly overridden.

use chrono::Utc;
use std::sync::Arc;
use tributary_core::domain::schema::{Column, DatasetSchema, Registration};
use tributary_core::drift;

use crate::store::{SchemaStore, StoreError};

/// Compare-and-set attempts before giving up on a contended dataset
const MAX_REGISTER_ATTEMPTS: u32 = 5;

#[derive(Clone)]
pub struct SchemaRegistry {
    store: Arc<dyn SchemaStore>,
}

impl SchemaRegistry {
    pub fn new(store: Arc<dyn SchemaStore>) -> Self {
        Self { store }
    }

    pub async fn get_latest(&self, dataset: &str) -> Result<Option<DatasetSchema>, StoreError> {
        self.store.latest_schema(dataset).await
    }

    pub async fn history(&self, dataset: &str) -> Result<Vec<DatasetSchema>, StoreError> {
        self.store.schema_history(dataset).await
    }

    /// Register `observed` as the dataset's shape
    pub async fn register(
        &self,
        dataset: &str,
        observed: &[Column],
        allow_override: bool,
    ) -> Result<Registration, StoreError> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            let latest = self.store.latest_schema(dataset).await?;

            let next_version = match &latest {
                None => 1,
                Some(latest) => {
                    let diff = drift::diff(&latest.columns, observed);
                    if diff.is_empty() {
                        return Ok(Registration::Accepted {
                            version: latest.version,
                            changed: false,
                        });
                    }
                    if diff.is_breaking() && !allow_override {
                        tracing::warn!(
                            dataset,
                            version = latest.version,
                            drift = %diff.describe(),
                            "Rejected breaking schema change"
                        );
                        return Ok(Registration::Drift {
                            latest_version: latest.version,
                            diff,
                        });
                    }
                    if diff.is_breaking() {
                        tracing::warn!(
                            dataset,
                            drift = %diff.describe(),
                            "Breaking schema change accepted by override"
                        );
                    }
                    latest.version + 1
                }
            };

            let schema = DatasetSchema {
                dataset: dataset.to_string(),
                columns: observed.to_vec(),
                version: next_version,
                registered_at: Utc::now(),
            };

            match self.store.insert_schema(&schema).await {
                Ok(()) => {
                    tracing::info!(dataset, version = next_version, "Registered schema version");
                    return Ok(Registration::Accepted {
                        version: next_version,
                        changed: true,
                    });
                }
                Err(StoreError::VersionConflict { .. }) if attempt < MAX_REGISTER_ATTEMPTS => {
                    tracing::debug!(dataset, attempt, "Schema version raced, re-reading latest");
                }
                Err(err) => return Err(err),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    fn cols(spec: &[(&str, &str)]) -> Vec<Column> {
        spec.iter().map(|(n, t)| Column::new(*n, *t)).collect()
    }

    fn registry() -> SchemaRegistry {
        SchemaRegistry::new(Arc::new(MemoryStore::new()))
    }

    #[tokio::test]
    async fn test_first_registration_is_version_one() {
        let registry = registry();
        let outcome = registry
            .register("student_perf", &cols(&[("student_id", "bigint")]), false)
            .await
            .unwrap();
        assert_eq!(outcome, Registration::Accepted { version: 1, changed: true });
    }

    #[tokio::test]
    async fn test_identical_resubmission_is_noop() {
        let registry = registry();
        let schema = cols(&[("student_id", "bigint"), ("score", "double")]);
        registry.register("student_perf", &schema, false).await.unwrap();

        let reordered = cols(&[("score", "DOUBLE"), ("student_id", "bigint")]);
        let outcome = registry
            .register("student_perf", &reordered, false)
            .await
            .unwrap();
        assert_eq!(outcome, Registration::Accepted { version: 1, changed: false });
        assert_eq!(registry.history("student_perf").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_additive_change_bumps_version() {
        let registry = registry();
        registry
            .register("student_perf", &cols(&[("student_id", "bigint"), ("score", "double")]), false)
            .await
            .unwrap();

        let outcome = registry
            .register(
                "student_perf",
                &cols(&[
                    ("student_id", "bigint"),
                    ("score", "double"),
                    ("attendance_pct", "double"),
                ]),
                false,
            )
            .await
            .unwrap();
        assert_eq!(outcome, Registration::Accepted { version: 2, changed: true });

        let latest = registry.get_latest("student_perf").await.unwrap().unwrap();
        assert_eq!(latest.version, 2);
        assert_eq!(latest.columns.len(), 3);
    }

    #[tokio::test]
    async fn test_breaking_change_rejected_in_either_order() {
        let wide = cols(&[("student_id", "bigint"), ("score", "double")]);
        let narrow = cols(&[("student_id", "bigint")]);

        // Dropping a column is breaking
        let registry = registry();
        registry.register("d", &wide, false).await.unwrap();
        let outcome = registry.register("d", &narrow, false).await.unwrap();
        assert!(matches!(outcome, Registration::Drift { latest_version: 1, .. }));

        // Adding then dropping it again is breaking too
        let registry = self::registry();
        registry.register("d", &narrow, false).await.unwrap();
        registry.register("d", &wide, false).await.unwrap();
        let outcome = registry.register("d", &narrow, false).await.unwrap();
        assert!(matches!(outcome, Registration::Drift { latest_version: 2, .. }));

        let latest = registry.get_latest("d").await.unwrap().unwrap();
        assert_eq!(latest.columns, wide);
    }

    #[tokio::test]
    async fn test_override_accepts_breaking_change() {
        let registry = registry();
        registry
            .register("d", &cols(&[("score", "double")]), false)
            .await
            .unwrap();

        let outcome = registry
            .register("d", &cols(&[("score", "string")]), true)
            .await
            .unwrap();
        assert_eq!(outcome, Registration::Accepted { version: 2, changed: true });
    }
}
