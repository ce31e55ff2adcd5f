//! Dataset schema domain types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A named, typed column
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Column {
    pub name: String,
    pub data_type: String,
}

impl Column {
    pub fn new(name: impl Into<String>, data_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            data_type: data_type.into(),
        }
    }
}

/// A registered version of a dataset's shape
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatasetSchema {
    pub dataset: String,
    pub columns: Vec<Column>,
    pub version: u32,
    pub registered_at: DateTime<Utc>,
}

/// A column whose type differs between two schema versions
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypeChange {
    pub column: String,
    pub from: String,
    pub to: String,
}

/// Differences between the latest registered schema and an observed one
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaDiff {
    /// Present in the observed schema only
    pub added: Vec<Column>,
    /// Present in the registered schema only
    pub removed: Vec<Column>,
    pub type_changes: Vec<TypeChange>,
}

impl SchemaDiff {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty() && self.type_changes.is_empty()
    }

    /// Removed columns or changed types break downstream consumers
    pub fn is_breaking(&self) -> bool {
        !self.removed.is_empty() || !self.type_changes.is_empty()
    }

    pub fn describe(&self) -> String {
        let mut parts = Vec::new();
        if !self.removed.is_empty() {
            let names: Vec<&str> = self.removed.iter().map(|c| c.name.as_str()).collect();
            parts.push(format!("removed columns [{}]", names.join(", ")));
        }
        for change in &self.type_changes {
            parts.push(format!(
                "column '{}' changed type {} -> {}",
                change.column, change.from, change.to
            ));
        }
        if !self.added.is_empty() {
            let names: Vec<&str> = self.added.iter().map(|c| c.name.as_str()).collect();
            parts.push(format!("added columns [{}]", names.join(", ")));
        }
        parts.join("; ")
    }
}

/// Result of registering an observed schema
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum Registration {
    /// The schema is now (or already was) the latest version
    Accepted { version: u32, changed: bool },
    /// Breaking drift without an override; nothing was written
    Drift { latest_version: u32, diff: SchemaDiff },
}
