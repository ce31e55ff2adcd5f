//! Run engine
//!
//! Drives pipeline runs through their stages: one driver task per active
//! run, fenced by the pipeline's lease, with retries, timeouts and
//! cooperative cancellation.

pub mod backoff;
pub mod driver;
pub mod events;
pub mod schedule;
pub mod supervisor;
#[cfg(test)]
pub mod testing;

use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use crate::service::SchemaRegistry;
use crate::stage::StageClients;
use crate::store::{RunStateStore, StoreError};
use backoff::Backoff;
use events::EventSink;

pub use driver::RunDriver;
pub use supervisor::Orchestrator;

/// Timing and identity of one orchestrator instance
#[derive(Debug, Clone)]
pub struct EngineSettings {
    /// Lease owner recorded for runs driven here
    pub owner: String,
    pub lease_ttl: Duration,
    /// Waits between polls of a running stage
    pub poll: Backoff,
    /// Waits between attempts of a failed stage
    pub retry: Backoff,
    /// Waits between attempts of a failed state write
    pub store_retry: Backoff,
    pub cancel_grace: Duration,
    pub max_concurrent_runs: usize,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            owner: format!("orchestrator-{}", Uuid::new_v4()),
            lease_ttl: Duration::from_secs(60),
            poll: Backoff::default(),
            retry: Backoff::default(),
            store_retry: Backoff::new(Duration::from_secs(1), 2, Duration::from_secs(30)),
            cancel_grace: Duration::from_secs(60),
            max_concurrent_runs: 8,
        }
    }
}

impl EngineSettings {
    /// Interval at which a held lease is renewed while waiting
    pub fn renewal_slice(&self) -> Duration {
        (self.lease_ttl / 3).max(Duration::from_millis(100))
    }
}

/// Shared dependencies of every run driver
pub struct Engine {
    pub store: Arc<dyn RunStateStore>,
    pub clients: StageClients,
    pub registry: SchemaRegistry,
    pub events: Arc<dyn EventSink>,
    pub settings: EngineSettings,
}

/// Errors surfaced by orchestrator operations
#[derive(Debug, thiserror::Error)]
pub enum OrchestratorError {
    #[error("pipeline '{0}' not found")]
    PipelineNotFound(String),

    #[error("run {0} not found")]
    RunNotFound(Uuid),

    #[error("pipeline '{0}' already has an active run")]
    AlreadyRunning(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}
