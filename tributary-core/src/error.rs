//! Error taxonomy for stage failures
//!
//! Every failure a stage client observes is reduced to a [`StageError`]
//! carrying an [`ErrorClass`]. The orchestrator decides retry behaviour from
//! the class alone.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Broad classification of a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorClass {
    /// Retryable: timeouts, rate limits, temporary unavailability.
    Transient,
    /// Not retryable: invalid parameters, schema drift, quality-gate breach.
    Permanent,
    /// Lost ownership: another run is active or the lease was fenced.
    Conflict,
    /// The orchestrator's own storage is unavailable.
    Infrastructure,
}

impl fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Transient => "transient",
            Self::Permanent => "permanent",
            Self::Conflict => "conflict",
            Self::Infrastructure => "infrastructure",
        };
        f.write_str(s)
    }
}

/// Well-known error codes produced by the orchestrator itself.
pub mod codes {
    pub const QUALITY_GATE: &str = "QUALITY_GATE";
    pub const SCHEMA_DRIFT: &str = "SCHEMA_DRIFT";
    pub const STAGE_TIMEOUT: &str = "STAGE_TIMEOUT";
    pub const HANDLE_LOST: &str = "HANDLE_LOST";
    pub const RATE_LIMITED: &str = "RATE_LIMITED";
    pub const SERVICE_UNAVAILABLE: &str = "SERVICE_UNAVAILABLE";
    pub const NETWORK: &str = "NETWORK";
    pub const INVALID_INPUT: &str = "INVALID_INPUT";
    pub const CALL_TIMEOUT: &str = "CALL_TIMEOUT";
    pub const RESULT_NOT_FOUND: &str = "RESULT_NOT_FOUND";
    pub const RESULT_UNAVAILABLE: &str = "RESULT_UNAVAILABLE";
    pub const INVALID_RESULT: &str = "INVALID_RESULT";
}

/// Classified failure of a stage, persisted on the stage execution and the run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[error("[{class}] {code}: {message}")]
pub struct StageError {
    pub class: ErrorClass,
    pub code: String,
    pub message: String,
    /// Delay the external system asked for before the next attempt
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_after_ms: Option<u64>,
}

impl StageError {
    pub fn new(class: ErrorClass, code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            class,
            code: code.into(),
            message: message.into(),
            retry_after_ms: None,
        }
    }

    pub fn transient(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ErrorClass::Transient, code, message)
    }

    pub fn permanent(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ErrorClass::Permanent, code, message)
    }

    pub fn rate_limited(message: impl Into<String>, retry_after_ms: Option<u64>) -> Self {
        Self {
            retry_after_ms,
            ..Self::transient(codes::RATE_LIMITED, message)
        }
    }

    pub fn service_unavailable(message: impl Into<String>) -> Self {
        Self::transient(codes::SERVICE_UNAVAILABLE, message)
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self::transient(codes::NETWORK, message)
    }

    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::permanent(codes::INVALID_INPUT, message)
    }

    pub fn quality_gate(message: impl Into<String>) -> Self {
        Self::permanent(codes::QUALITY_GATE, message)
    }

    pub fn schema_drift(message: impl Into<String>) -> Self {
        Self::permanent(codes::SCHEMA_DRIFT, message)
    }

    pub fn timed_out(message: impl Into<String>) -> Self {
        Self::transient(codes::STAGE_TIMEOUT, message)
    }

    /// A single call to a stage service got no answer in time
    pub fn call_timed_out(message: impl Into<String>) -> Self {
        Self::transient(codes::CALL_TIMEOUT, message)
    }

    pub fn is_retryable(&self) -> bool {
        self.class == ErrorClass::Transient
    }
}
