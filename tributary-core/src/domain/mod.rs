//! Core domain types
//!
//! This module contains the domain structures shared across Tributary crates.
//! The orchestrator persists and mutates them; the client and CLI only read
//! them back from the API.

pub mod event;
pub mod pipeline;
pub mod quality;
pub mod run;
pub mod schema;
pub mod stage;
