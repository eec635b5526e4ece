//! Repository for the `job_locks` table.
//!
//! Acquisition runs in one transaction holding a transaction-scoped advisory
//! lock on the job name, so the "count holders, then insert" check cannot
//! race between scheduler instances.

use sqlx::PgPool;
use uuid::Uuid;

use crate::models::lock::{LockLease, LockRequest};

/// Column list for `job_locks` queries.
const COLUMNS: &str = "id, job_name, identity, holder, acquired_at, expires_at";

/// Provides lease operations for job locks.
pub struct LockRepo;

impl LockRepo {
    /// Try to take a lease for `req.identity`.
    ///
    /// Returns `None` when the identity is already held or `job_name` is at
    /// its concurrency limit. Expired leases are purged first and never
    /// count toward the limit.
    pub async fn try_acquire(
        pool: &PgPool,
        req: &LockRequest,
    ) -> Result<Option<LockLease>, sqlx::Error> {
        let mut tx = pool.begin().await?;

        sqlx::query("SELECT pg_advisory_xact_lock(hashtext($1))")
            .bind(&req.job_name)
            .execute(&mut *tx)
            .await?;

        sqlx::query("DELETE FROM job_locks WHERE job_name = $1 AND expires_at <= NOW()")
            .bind(&req.job_name)
            .execute(&mut *tx)
            .await?;

        let held: Vec<String> =
            sqlx::query_scalar("SELECT identity FROM job_locks WHERE job_name = $1")
                .bind(&req.job_name)
                .fetch_all(&mut *tx)
                .await?;

        if held.iter().any(|identity| identity == &req.identity)
            || held.len() >= req.max_concurrent as usize
        {
            tx.rollback().await?;
            return Ok(None);
        }

        let ttl_ms = i64::try_from(req.ttl.as_millis()).unwrap_or(i64::MAX);
        let query = format!(
            "INSERT INTO job_locks (id, job_name, identity, holder, acquired_at, expires_at) \
             VALUES ($1, $2, $3, $4, NOW(), NOW() + ($5::BIGINT * INTERVAL '1 millisecond')) \
             RETURNING {COLUMNS}"
        );
        let lease = sqlx::query_as::<_, LockLease>(&query)
            .bind(Uuid::new_v4())
            .bind(&req.job_name)
            .bind(&req.identity)
            .bind(&req.holder)
            .bind(ttl_ms)
            .fetch_one(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(Some(lease))
    }

    /// Release a lease by ID. Returns `false` if it had already expired and
    /// been purged (or was never granted).
    pub async fn release(pool: &PgPool, lease_id: Uuid) -> Result<bool, sqlx::Error> {
        let result = sqlx::query("DELETE FROM job_locks WHERE id = $1")
            .bind(lease_id)
            .execute(pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Unexpired leases for a job name.
    pub async fn list_active(pool: &PgPool, job_name: &str) -> Result<Vec<LockLease>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM job_locks \
             WHERE job_name = $1 AND expires_at > NOW() \
             ORDER BY acquired_at ASC"
        );
        sqlx::query_as::<_, LockLease>(&query)
            .bind(job_name)
            .fetch_all(pool)
            .await
    }
}
