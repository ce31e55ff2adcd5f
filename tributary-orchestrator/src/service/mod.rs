//! Service Module
//!
//! Business logic layer for the orchestrator.
//! Services sit between the HTTP handlers and the stores.

pub mod pipeline;
pub mod schema_registry;

// Re-export for convenience
pub use pipeline as pipeline_service;
pub use schema_registry::SchemaRegistry;
