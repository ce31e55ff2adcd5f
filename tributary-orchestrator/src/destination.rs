//! Destination write boundary
//!
//! Keyed upserts of loaded rows. Re-applying the same batch leaves the
//! destination unchanged, which is what makes the load stage safe to retry.

use async_trait::async_trait;
use pg_escape::quote_identifier;
use serde_json::Value;
use sqlx::PgPool;
use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;
use tributary_core::domain::stage::Record;
use tributary_core::error::StageError;

#[async_trait]
pub trait DestinationWriter: Send + Sync {
    /// Insert or update `rows` in `table`, matching on `key_columns`
    async fn upsert(
        &self,
        table: &str,
        key_columns: &[String],
        rows: &[Record],
    ) -> Result<u64, StageError>;
}

/// Check the batch and collapse rows sharing a key, last one wins
fn dedupe_by_key(
    table: &str,
    key_columns: &[String],
    rows: &[Record],
) -> Result<Vec<Record>, StageError> {
    if table.trim().is_empty() {
        return Err(StageError::invalid_input("destination table is empty"));
    }
    if key_columns.is_empty() {
        return Err(StageError::invalid_input(format!(
            "destination '{table}' has no key columns"
        )));
    }

    let mut order = Vec::new();
    let mut by_key: HashMap<String, Record> = HashMap::new();
    for (index, row) in rows.iter().enumerate() {
        let mut key = Vec::with_capacity(key_columns.len());
        for column in key_columns {
            match row.get(column) {
                Some(value) if !value.is_null() => key.push(value.clone()),
                _ => {
                    return Err(StageError::invalid_input(format!(
                        "row {index} has no value for key column '{column}'"
                    )));
                }
            }
        }
        let key = Value::Array(key).to_string();
        if by_key.insert(key.clone(), row.clone()).is_none() {
            order.push(key);
        }
    }

    Ok(order
        .into_iter()
        .filter_map(|key| by_key.remove(&key))
        .collect())
}

/// Quote a possibly schema-qualified table name
fn quote_table(table: &str) -> String {
    table
        .split('.')
        .map(quote_identifier)
        .collect::<Vec<_>>()
        .join(".")
}

/// Build the upsert statement for the given columns
fn upsert_sql(table: &str, key_columns: &[String], columns: &[String]) -> String {
    let table = quote_table(table);
    let column_list = columns
        .iter()
        .map(|c| quote_identifier(c).into_owned())
        .collect::<Vec<_>>()
        .join(", ");
    let key_list = key_columns
        .iter()
        .map(|c| quote_identifier(c).into_owned())
        .collect::<Vec<_>>()
        .join(", ");
    let updates = columns
        .iter()
        .filter(|c| !key_columns.contains(c))
        .map(|c| {
            let ident = quote_identifier(c);
            format!("{ident} = EXCLUDED.{ident}")
        })
        .collect::<Vec<_>>();

    let on_conflict = if updates.is_empty() {
        "DO NOTHING".to_string()
    } else {
        format!("DO UPDATE SET {}", updates.join(", "))
    };

    format!(
        "INSERT INTO {table} ({column_list}) \
         SELECT {column_list} FROM jsonb_populate_recordset(NULL::{table}, $1) \
         ON CONFLICT ({key_list}) {on_conflict}"
    )
}

/// Columns present in any row, in first-seen order
fn batch_columns(rows: &[Record]) -> Vec<String> {
    let mut columns: Vec<String> = Vec::new();
    for row in rows {
        for name in row.keys() {
            if !columns.contains(name) {
                columns.push(name.clone());
            }
        }
    }
    columns
}

/// Upserts into a Postgres table
#[derive(Clone)]
pub struct PgDestinationWriter {
    pool: PgPool,
}

impl PgDestinationWriter {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl DestinationWriter for PgDestinationWriter {
    async fn upsert(
        &self,
        table: &str,
        key_columns: &[String],
        rows: &[Record],
    ) -> Result<u64, StageError> {
        let rows = dedupe_by_key(table, key_columns, rows)?;
        if rows.is_empty() {
            return Ok(0);
        }

        let sql = upsert_sql(table, key_columns, &batch_columns(&rows));
        let payload = Value::Array(rows.into_iter().map(Value::Object).collect());

        let result = sqlx::query(&sql)
            .bind(payload)
            .execute(&self.pool)
            .await
            .map_err(|e| match e {
                sqlx::Error::Database(db) => {
                    StageError::invalid_input(format!("upsert into '{table}' rejected: {db}"))
                }
                other => StageError::service_unavailable(format!(
                    "destination database unavailable: {other}"
                )),
            })?;

        tracing::debug!(table, rows = result.rows_affected(), "Upserted batch");
        Ok(result.rows_affected())
    }
}

/// Keyed in-memory tables
#[derive(Debug, Default)]
pub struct MemoryDestination {
    tables: Mutex<HashMap<String, BTreeMap<String, Record>>>,
}

impl MemoryDestination {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rows currently stored in `table`, ordered by key
    pub fn rows(&self, table: &str) -> Vec<Record> {
        self.tables
            .lock()
            .ok()
            .and_then(|tables| tables.get(table).map(|t| t.values().cloned().collect()))
            .unwrap_or_default()
    }
}

#[async_trait]
impl DestinationWriter for MemoryDestination {
    async fn upsert(
        &self,
        table: &str,
        key_columns: &[String],
        rows: &[Record],
    ) -> Result<u64, StageError> {
        let rows = dedupe_by_key(table, key_columns, rows)?;
        let mut tables = self
            .tables
            .lock()
            .map_err(|_| StageError::service_unavailable("destination lock poisoned"))?;
        let stored = tables.entry(table.to_string()).or_default();

        let written = rows.len() as u64;
        for row in rows {
            let key: Vec<Value> = key_columns
                .iter()
                .map(|c| row.get(c).cloned().unwrap_or(Value::Null))
                .collect();
            stored.insert(Value::Array(key).to_string(), row);
        }
        Ok(written)
    }
}
