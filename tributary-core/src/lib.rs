//! Tributary Core
//!
//! Core types and pure logic for the Tributary pipeline orchestrator.
//!
//! This crate contains:
//! - Domain types: runs, stage executions, dataset schemas, pipeline definitions
//! - DTOs: request/response bodies shared by the orchestrator API and its clients
//! - Error taxonomy: the classification every stage failure is reduced to
//! - Pure evaluators: data quality rules and schema drift detection

pub mod domain;
pub mod drift;
pub mod dto;
pub mod error;
pub mod quality;
