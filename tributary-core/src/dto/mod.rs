//! Data Transfer Objects for the orchestrator API
//!
//! Request and response bodies exchanged between the orchestrator's HTTP
//! API and its clients (the client library and the CLI).

pub mod pipeline;
pub mod run;
pub mod schema;
