//! Stage domain types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use uuid::Uuid;

use crate::domain::quality::QualityViolation;
use crate::domain::schema::Column;
use crate::error::StageError;

/// A single record flowing between stages, keyed by column name.
pub type Record = Map<String, Value>;

/// The fixed, ordered set of stages every run goes through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageKind {
    Transform,
    CatalogRegister,
    Query,
    Load,
}

impl StageKind {
    /// All stages in execution order.
    pub const ALL: [StageKind; 4] = [
        StageKind::Transform,
        StageKind::CatalogRegister,
        StageKind::Query,
        StageKind::Load,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            StageKind::Transform => "transform",
            StageKind::CatalogRegister => "catalog_register",
            StageKind::Query => "query",
            StageKind::Load => "load",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "transform" => Some(StageKind::Transform),
            "catalog_register" => Some(StageKind::CatalogRegister),
            "query" => Some(StageKind::Query),
            "load" => Some(StageKind::Load),
            _ => None,
        }
    }

    /// Deterministic idempotency key for one attempt of this stage.
    ///
    /// The first attempt hashes only the stage name, so the key is a pure
    /// function of run id and stage kind. Later attempts fold the attempt
    /// number in, giving a retry its own external job.
    pub fn idempotency_key(&self, run_id: Uuid, attempt: u32) -> Uuid {
        let name = if attempt <= 1 {
            self.as_str().to_string()
        } else {
            format!("{}#{}", self.as_str(), attempt)
        };
        Uuid::new_v5(&run_id, name.as_bytes())
    }
}

impl fmt::Display for StageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Status of one stage attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    /// Recorded, not yet accepted by the external system
    Pending,
    /// Accepted and being polled
    Running,
    Succeeded,
    Failed,
    TimedOut,
    Cancelled,
}

impl StageStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, StageStatus::Pending | StageStatus::Running)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            StageStatus::Pending => "pending",
            StageStatus::Running => "running",
            StageStatus::Succeeded => "succeeded",
            StageStatus::Failed => "failed",
            StageStatus::TimedOut => "timed_out",
            StageStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(StageStatus::Pending),
            "running" => Some(StageStatus::Running),
            "succeeded" => Some(StageStatus::Succeeded),
            "failed" => Some(StageStatus::Failed),
            "timed_out" => Some(StageStatus::TimedOut),
            "cancelled" => Some(StageStatus::Cancelled),
            _ => None,
        }
    }
}

/// What a stage hands to the next one.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StageOutput {
    /// Records produced by the stage (a bounded sample for transform,
    /// the full result set for query)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub records: Vec<Record>,

    /// Schema observed by the stage, if it inspects one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schema: Option<Vec<Column>>,

    /// Where the external system left its result (e.g. an object URI)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,

    /// Rows written, reported by the load stage
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rows_written: Option<u64>,
}

/// One attempt of one stage within a run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageExecution {
    pub run_id: Uuid,
    pub stage: StageKind,
    pub attempt: u32,
    pub idempotency_key: Uuid,
    /// Opaque handle returned by the stage client once accepted
    pub handle: Option<String>,
    pub status: StageStatus,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub poll_count: u64,
    pub error: Option<StageError>,
    #[serde(default)]
    pub violations: Vec<QualityViolation>,
    pub output: Option<StageOutput>,
}

impl StageExecution {
    /// A fresh, not-yet-submitted attempt
    pub fn pending(run_id: Uuid, stage: StageKind, attempt: u32) -> Self {
        Self {
            run_id,
            stage,
            attempt,
            idempotency_key: stage.idempotency_key(run_id, attempt),
            handle: None,
            status: StageStatus::Pending,
            started_at: Utc::now(),
            finished_at: None,
            poll_count: 0,
            error: None,
            violations: Vec::new(),
            output: None,
        }
    }

    /// Close the attempt with a terminal status
    pub fn finish(&mut self, status: StageStatus, error: Option<StageError>) {
        self.status = status;
        self.error = error;
        self.finished_at = Some(Utc::now());
    }
}

/// Latest attempt of `stage` among a run's executions
pub fn latest_attempt(stages: &[StageExecution], stage: StageKind) -> Option<&StageExecution> {
    stages
        .iter()
        .filter(|s| s.stage == stage)
        .max_by_key(|s| s.attempt)
}
