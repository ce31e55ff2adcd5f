//! Data quality domain types

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Violation rate above which a rule without its own threshold breaches.
pub const DEFAULT_THRESHOLD: f64 = 0.01;

/// Rule set applied to the transform stage's output
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityRules {
    #[serde(default)]
    pub rules: Vec<QualityRule>,
    #[serde(default = "default_threshold")]
    pub default_threshold: f64,
}

fn default_threshold() -> f64 {
    DEFAULT_THRESHOLD
}

impl Default for QualityRules {
    fn default() -> Self {
        Self {
            rules: Vec::new(),
            default_threshold: DEFAULT_THRESHOLD,
        }
    }
}

/// A single quality assertion
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "rule", rename_all = "snake_case")]
pub enum QualityRule {
    /// Every listed column must be present and non-null
    NotNull {
        columns: Vec<String>,
        #[serde(default)]
        threshold: Option<f64>,
    },
    /// The combination of the listed columns must be unique
    Unique {
        columns: Vec<String>,
        #[serde(default)]
        threshold: Option<f64>,
    },
    /// Non-null values of the column must have the expected type
    Type {
        column: String,
        expected: ValueType,
        #[serde(default)]
        threshold: Option<f64>,
    },
    /// Numeric values of the column must fall within the bounds
    Range {
        column: String,
        #[serde(default)]
        min: Option<f64>,
        #[serde(default)]
        max: Option<f64>,
        #[serde(default)]
        threshold: Option<f64>,
    },
}

impl QualityRule {
    pub fn threshold(&self) -> Option<f64> {
        match self {
            QualityRule::NotNull { threshold, .. }
            | QualityRule::Unique { threshold, .. }
            | QualityRule::Type { threshold, .. }
            | QualityRule::Range { threshold, .. } => *threshold,
        }
    }
}

/// JSON value types a type rule can assert
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueType {
    String,
    Integer,
    Number,
    Boolean,
}

impl ValueType {
    pub fn matches(&self, value: &Value) -> bool {
        match self {
            ValueType::String => value.is_string(),
            ValueType::Integer => value.is_i64() || value.is_u64(),
            ValueType::Number => value.is_number(),
            ValueType::Boolean => value.is_boolean(),
        }
    }
}

/// Classification of a violation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ViolationKind {
    NullInRequiredField,
    DuplicateKey,
    TypeMismatch,
    OutOfRange,
}

impl fmt::Display for ViolationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::NullInRequiredField => "null_in_required_field",
            Self::DuplicateKey => "duplicate_key",
            Self::TypeMismatch => "type_mismatch",
            Self::OutOfRange => "out_of_range",
        };
        f.write_str(s)
    }
}

/// Aggregated violations of one rule over one column (or key)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityViolation {
    pub kind: ViolationKind,
    /// Column name, or comma-joined key columns for uniqueness
    pub column: String,
    pub count: u64,
    /// Violating fraction of the evaluated records
    pub rate: f64,
    pub threshold: f64,
    /// A few offending values
    pub sample: Vec<Value>,
}

impl QualityViolation {
    pub fn is_breach(&self) -> bool {
        self.rate > self.threshold
    }
}
