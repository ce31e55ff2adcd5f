//! Lease Repository
//!
//! Per-pipeline leases with fencing tokens. A released lease keeps its row
//! with a NULL owner so the next token still continues from the last one.

use chrono::{DateTime, Utc};
use sqlx::{PgConnection, PgPool};

use crate::store::{Lease, StoreError};

/// Take the lease if it is free, released or expired
///
/// Returns `None` when another owner holds an unexpired lease.
pub async fn acquire(
    pool: &PgPool,
    pipeline: &str,
    owner: &str,
    expires_at: DateTime<Utc>,
    now: DateTime<Utc>,
) -> Result<Option<Lease>, StoreError> {
    let row = sqlx::query_as::<_, LeaseRow>(
        r#"
        INSERT INTO pipeline_leases (pipeline_name, owner, token, expires_at)
        VALUES ($1, $2, 1, $3)
        ON CONFLICT (pipeline_name) DO UPDATE
        SET owner = EXCLUDED.owner,
            token = pipeline_leases.token + 1,
            expires_at = EXCLUDED.expires_at
        WHERE pipeline_leases.owner IS NULL OR pipeline_leases.expires_at <= $4
        RETURNING pipeline_name, owner, token, expires_at
        "#,
    )
    .bind(pipeline)
    .bind(owner)
    .bind(expires_at)
    .bind(now)
    .fetch_optional(pool)
    .await?;

    Ok(row.map(Into::into))
}

/// Current holder of a pipeline's lease, if held
pub async fn find_held(pool: &PgPool, pipeline: &str) -> Result<Option<Lease>, StoreError> {
    let row = sqlx::query_as::<_, LeaseRow>(
        r#"
        SELECT pipeline_name, owner, token, expires_at
        FROM pipeline_leases
        WHERE pipeline_name = $1 AND owner IS NOT NULL
        "#,
    )
    .bind(pipeline)
    .fetch_optional(pool)
    .await?;

    Ok(row.map(Into::into))
}

/// Extend a lease whose token is still current
pub async fn renew(
    pool: &PgPool,
    lease: &Lease,
    expires_at: DateTime<Utc>,
) -> Result<Option<Lease>, StoreError> {
    let row = sqlx::query_as::<_, LeaseRow>(
        r#"
        UPDATE pipeline_leases
        SET expires_at = $3
        WHERE pipeline_name = $1 AND token = $2 AND owner IS NOT NULL
        RETURNING pipeline_name, owner, token, expires_at
        "#,
    )
    .bind(&lease.pipeline_name)
    .bind(lease.token as i64)
    .bind(expires_at)
    .fetch_optional(pool)
    .await?;

    Ok(row.map(Into::into))
}

/// Swap a current lease for one with the next token, same owner
pub async fn rotate(
    pool: &PgPool,
    lease: &Lease,
    expires_at: DateTime<Utc>,
) -> Result<Option<Lease>, StoreError> {
    let row = sqlx::query_as::<_, LeaseRow>(
        r#"
        UPDATE pipeline_leases
        SET token = token + 1, expires_at = $3
        WHERE pipeline_name = $1 AND token = $2 AND owner IS NOT NULL
        RETURNING pipeline_name, owner, token, expires_at
        "#,
    )
    .bind(&lease.pipeline_name)
    .bind(lease.token as i64)
    .bind(expires_at)
    .fetch_optional(pool)
    .await?;

    Ok(row.map(Into::into))
}

/// Release a lease; a stale token matches nothing
pub async fn release(pool: &PgPool, lease: &Lease, now: DateTime<Utc>) -> Result<(), StoreError> {
    sqlx::query(
        r#"
        UPDATE pipeline_leases
        SET owner = NULL, expires_at = $3
        WHERE pipeline_name = $1 AND token = $2
        "#,
    )
    .bind(&lease.pipeline_name)
    .bind(lease.token as i64)
    .bind(now)
    .execute(pool)
    .await?;

    Ok(())
}

/// Lock the lease row and verify `fence` is still the current token
///
/// Must run inside the transaction whose writes it guards.
pub async fn check_fence(conn: &mut PgConnection, fence: &Lease) -> Result<(), StoreError> {
    let token: Option<i64> = sqlx::query_scalar(
        r#"
        SELECT token
        FROM pipeline_leases
        WHERE pipeline_name = $1 AND owner IS NOT NULL
        FOR UPDATE
        "#,
    )
    .bind(&fence.pipeline_name)
    .fetch_optional(&mut *conn)
    .await?;

    match token {
        Some(current) if current as u64 == fence.token => Ok(()),
        _ => Err(StoreError::Fenced {
            pipeline: fence.pipeline_name.clone(),
            token: fence.token,
        }),
    }
}

// =============================================================================
// Database Row Types
// =============================================================================

#[derive(sqlx::FromRow)]
struct LeaseRow {
    pipeline_name: String,
    owner: Option<String>,
    token: i64,
    expires_at: DateTime<Utc>,
}

impl From<LeaseRow> for Lease {
    fn from(row: LeaseRow) -> Self {
        Lease {
            pipeline_name: row.pipeline_name,
            owner: row.owner.unwrap_or_default(),
            token: row.token as u64,
            expires_at: row.expires_at,
        }
    }
}
