//! Data quality evaluation.
//!
//! Pure evaluation of a [`QualityRules`] set over a sample of records. The
//! result carries every violation found; the gate decision is a function of
//! violation counts alone.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashSet;

use crate::domain::quality::{QualityRule, QualityRules, QualityViolation, ViolationKind};
use crate::domain::stage::Record;

const MAX_SAMPLE_VALUES: usize = 5;

/// Outcome of evaluating a rule set
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityReport {
    pub records_evaluated: u64,
    pub violations: Vec<QualityViolation>,
}

impl QualityReport {
    /// Violations whose rate exceeds their threshold
    pub fn breaches(&self) -> impl Iterator<Item = &QualityViolation> {
        self.violations.iter().filter(|v| v.is_breach())
    }

    pub fn passed(&self) -> bool {
        self.breaches().next().is_none()
    }

    /// Human-readable summary of the breaches, for the gate error
    pub fn breach_summary(&self) -> String {
        self.breaches()
            .map(|v| {
                format!(
                    "{} on '{}': {}/{} records ({:.2}% > {:.2}%)",
                    v.kind,
                    v.column,
                    v.count,
                    self.records_evaluated,
                    v.rate * 100.0,
                    v.threshold * 100.0
                )
            })
            .collect::<Vec<_>>()
            .join("; ")
    }
}

/// Evaluate `rules` over `records`
pub fn evaluate(rules: &QualityRules, records: &[Record]) -> QualityReport {
    let total = records.len() as u64;
    let mut violations = Vec::new();

    for rule in &rules.rules {
        let threshold = rule.threshold().unwrap_or(rules.default_threshold);

        match rule {
            QualityRule::NotNull { columns, .. } => {
                for column in columns {
                    let tally = tally(records, |record| {
                        match record.get(column) {
                            None | Some(Value::Null) => Some(Value::Null),
                            Some(_) => None,
                        }
                    });
                    push(&mut violations, ViolationKind::NullInRequiredField, column, tally, total, threshold);
                }
            }
            QualityRule::Unique { columns, .. } => {
                let mut seen = HashSet::new();
                let tally = tally(records, |record| {
                    let key: Vec<Value> = columns
                        .iter()
                        .map(|c| record.get(c).cloned().unwrap_or(Value::Null))
                        .collect();
                    let key = Value::Array(key);
                    if seen.insert(key.to_string()) {
                        None
                    } else {
                        Some(key)
                    }
                });
                push(&mut violations, ViolationKind::DuplicateKey, &columns.join(","), tally, total, threshold);
            }
            QualityRule::Type { column, expected, .. } => {
                let tally = tally(records, |record| match record.get(column) {
                    Some(value) if !value.is_null() && !expected.matches(value) => {
                        Some(value.clone())
                    }
                    _ => None,
                });
                push(&mut violations, ViolationKind::TypeMismatch, column, tally, total, threshold);
            }
            QualityRule::Range { column, min, max, .. } => {
                let tally = tally(records, |record| {
                    let value = record.get(column)?;
                    let n = value.as_f64()?;
                    let below = min.is_some_and(|m| n < m);
                    let above = max.is_some_and(|m| n > m);
                    (below || above).then(|| value.clone())
                });
                push(&mut violations, ViolationKind::OutOfRange, column, tally, total, threshold);
            }
        }
    }

    QualityReport {
        records_evaluated: total,
        violations,
    }
}

struct Tally {
    count: u64,
    sample: Vec<Value>,
}

/// Count records for which `check` reports an offending value
fn tally(records: &[Record], mut check: impl FnMut(&Record) -> Option<Value>) -> Tally {
    let mut count = 0;
    let mut sample = Vec::new();
    for record in records {
        if let Some(value) = check(record) {
            count += 1;
            if sample.len() < MAX_SAMPLE_VALUES {
                sample.push(value);
            }
        }
    }
    Tally { count, sample }
}

fn push(
    violations: &mut Vec<QualityViolation>,
    kind: ViolationKind,
    column: &str,
    tally: Tally,
    total: u64,
    threshold: f64,
) {
    if tally.count == 0 {
        return;
    }
    let rate = if total == 0 {
        0.0
    } else {
        tally.count as f64 / total as f64
    };
    violations.push(QualityViolation {
        kind,
        column: column.to_string(),
        count: tally.count,
        rate,
        threshold,
        sample: tally.sample,
    });
}
