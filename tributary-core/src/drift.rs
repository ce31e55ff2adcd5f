//! Schema drift detection.
//!
//! Columns are matched by name; order is irrelevant and types compare
//! case-insensitively after trimming.

use std::collections::HashMap;

use crate::domain::schema::{Column, SchemaDiff, TypeChange};

fn normalize_type(data_type: &str) -> String {
    data_type.trim().to_ascii_lowercase()
}

/// Compute the difference from `registered` to `observed`
pub fn diff(registered: &[Column], observed: &[Column]) -> SchemaDiff {
    let registered_by_name: HashMap<&str, &Column> =
        registered.iter().map(|c| (c.name.as_str(), c)).collect();
    let observed_by_name: HashMap<&str, &Column> =
        observed.iter().map(|c| (c.name.as_str(), c)).collect();

    let added = observed
        .iter()
        .filter(|c| !registered_by_name.contains_key(c.name.as_str()))
        .cloned()
        .collect();

    let removed = registered
        .iter()
        .filter(|c| !observed_by_name.contains_key(c.name.as_str()))
        .cloned()
        .collect();

    let type_changes = registered
        .iter()
        .filter_map(|old| {
            let new = observed_by_name.get(old.name.as_str())?;
            (normalize_type(&old.data_type) != normalize_type(&new.data_type)).then(|| {
                TypeChange {
                    column: old.name.clone(),
                    from: old.data_type.clone(),
                    to: new.data_type.clone(),
                }
            })
        })
        .collect();

    SchemaDiff {
        added,
        removed,
        type_changes,
    }
}
