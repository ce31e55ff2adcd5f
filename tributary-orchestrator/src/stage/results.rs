//! Materialized stage results
//!
//! The query stage may leave its result set in object storage and report
//! only its `location`. A [`ResultSource`] fetches that object and decodes
//! it into rows for the load stage. Results are CSV with a header line.

use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_s3::Client;
use serde_json::{Number, Value};
use tributary_core::domain::stage::Record;
use tributary_core::error::{StageError, codes};

#[async_trait]
pub trait ResultSource: Send + Sync {
    async fn fetch(&self, location: &str) -> Result<Vec<Record>, StageError>;
}

/// Split `s3://bucket/key` into its bucket and key
pub fn parse_location(location: &str) -> Result<(&str, &str), StageError> {
    let invalid = || {
        StageError::permanent(
            codes::INVALID_RESULT,
            format!("result location '{location}' is not an s3://bucket/key URL"),
        )
    };
    let rest = location.strip_prefix("s3://").ok_or_else(invalid)?;
    match rest.split_once('/') {
        Some((bucket, key)) if !bucket.is_empty() && !key.is_empty() => Ok((bucket, key)),
        _ => Err(invalid()),
    }
}

/// Decode CSV with a header line into rows
///
/// Empty cells become null; other cells are read as integer, float or
/// boolean when they parse as one, and as text otherwise.
pub fn parse_csv(data: &[u8]) -> Result<Vec<Record>, StageError> {
    let invalid = |err: csv::Error| StageError::permanent(codes::INVALID_RESULT, err.to_string());

    let mut reader = csv::ReaderBuilder::new().has_headers(true).from_reader(data);
    let headers = reader.headers().map_err(invalid)?.clone();

    let mut rows = Vec::new();
    for row in reader.records() {
        let row = row.map_err(invalid)?;
        let record: Record = headers
            .iter()
            .zip(row.iter())
            .map(|(name, cell)| (name.to_string(), infer(cell)))
            .collect();
        rows.push(record);
    }
    Ok(rows)
}

fn infer(cell: &str) -> Value {
    let cell = cell.trim();
    if cell.is_empty() {
        return Value::Null;
    }
    if let Ok(n) = cell.parse::<i64>() {
        return Value::from(n);
    }
    if let Some(n) = cell.parse::<f64>().ok().and_then(Number::from_f64) {
        return Value::Number(n);
    }
    match cell.to_ascii_lowercase().as_str() {
        "true" => Value::Bool(true),
        "false" => Value::Bool(false),
        _ => Value::String(cell.to_string()),
    }
}

/// Reads results from S3
pub struct S3ResultSource {
    client: Client,
}

impl S3ResultSource {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Client configured from the standard AWS environment
    pub async fn from_env() -> Self {
        let config = aws_config::defaults(BehaviorVersion::latest()).load().await;
        Self::new(Client::new(&config))
    }
}

#[async_trait]
impl ResultSource for S3ResultSource {
    async fn fetch(&self, location: &str) -> Result<Vec<Record>, StageError> {
        let (bucket, key) = parse_location(location)?;

        let response = self
            .client
            .get_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(|err| {
                let missing = err
                    .as_service_error()
                    .map(|e| e.is_no_such_key())
                    .unwrap_or(false);
                if missing {
                    StageError::permanent(
                        codes::RESULT_NOT_FOUND,
                        format!("no result object at {location}"),
                    )
                } else {
                    StageError::transient(
                        codes::RESULT_UNAVAILABLE,
                        format!("failed to fetch {location}: {err}"),
                    )
                }
            })?;

        let body = response.body.collect().await.map_err(|err| {
            StageError::transient(
                codes::RESULT_UNAVAILABLE,
                format!("failed to read {location}: {err}"),
            )
        })?;

        let rows = parse_csv(&body.into_bytes())?;
        tracing::debug!(%location, rows = rows.len(), "Fetched materialized result");
        Ok(rows)
    }
}

/// Results held in memory, keyed by location
#[cfg(test)]
#[derive(Default)]
pub struct MemoryResultSource {
    objects: std::sync::Mutex<std::collections::HashMap<String, Vec<u8>>>,
}

#[cfg(test)]
impl MemoryResultSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&self, location: impl Into<String>, data: impl Into<Vec<u8>>) {
        if let Ok(mut objects) = self.objects.lock() {
            objects.insert(location.into(), data.into());
        }
    }
}

#[cfg(test)]
#[async_trait]
impl ResultSource for MemoryResultSource {
    async fn fetch(&self, location: &str) -> Result<Vec<Record>, StageError> {
        parse_location(location)?;
        let data = self
            .objects
            .lock()
            .map_err(|_| StageError::transient(codes::RESULT_UNAVAILABLE, "result store lock poisoned"))?
            .get(location)
            .cloned()
            .ok_or_else(|| {
                StageError::permanent(codes::RESULT_NOT_FOUND, format!("no result object at {location}"))
            })?;
        parse_csv(&data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tributary_core::error::ErrorClass;

    #[test]
    fn test_parse_location() {
        assert_eq!(
            parse_location("s3://lake/reports/2026-10-18.csv").unwrap(),
            ("lake", "reports/2026-10-18.csv")
        );
        for bad in ["lake/report.csv", "s3://lake", "s3://lake/", "s3:///report.csv", "gs://lake/a"] {
            let err = parse_location(bad).unwrap_err();
            assert_eq!(err.code, codes::INVALID_RESULT);
            assert_eq!(err.class, ErrorClass::Permanent);
        }
    }

    #[test]
    fn test_csv_cells_are_typed() {
        let rows = parse_csv(b"student_id,score,passed,name,note\n7,81.5,TRUE,Ada,\n8,40,false,\"Lin, M\",late\n")
            .unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0]["student_id"], json!(7));
        assert_eq!(rows[0]["score"], json!(81.5));
        assert_eq!(rows[0]["passed"], json!(true));
        assert_eq!(rows[0]["name"], json!("Ada"));
        assert_eq!(rows[0]["note"], Value::Null);
        assert_eq!(rows[1]["score"], json!(40));
        assert_eq!(rows[1]["name"], json!("Lin, M"));
    }

    #[test]
    fn test_ragged_csv_is_rejected() {
        let err = parse_csv(b"a,b\n1,2\n3\n").unwrap_err();
        assert_eq!(err.code, codes::INVALID_RESULT);
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_header_only_csv_has_no_rows() {
        assert!(parse_csv(b"student_id,score\n").unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_memory_source_reports_missing_objects() {
        let source = MemoryResultSource::new();
        source.put("s3://lake/a.csv", "x\n1\n");

        assert_eq!(source.fetch("s3://lake/a.csv").await.unwrap().len(), 1);
        let err = source.fetch("s3://lake/b.csv").await.unwrap_err();
        assert_eq!(err.code, codes::RESULT_NOT_FOUND);
        assert!(!err.is_retryable());
    }
}
