//! Repository Module
//!
//! Data access layer for the Postgres store.
//! Each repository handles database operations for a specific domain entity.

pub mod lease;
pub mod pipeline;
pub mod run;
pub mod schema;
pub mod stage;

// Re-export for convenience
pub use lease as lease_repository;
pub use pipeline as pipeline_repository;
pub use run as run_repository;
pub use schema as schema_repository;
pub use stage as stage_repository;
