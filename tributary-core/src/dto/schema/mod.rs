//! Schema registry DTOs

use serde::{Deserialize, Serialize};

use crate::domain::schema::Column;

/// Request to register an observed schema for a dataset
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterSchema {
    pub columns: Vec<Column>,
    #[serde(default)]
    pub allow_override: bool,
}
