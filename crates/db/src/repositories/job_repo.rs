//! Repository for the `scheduled_jobs` table.

use abacus_core::types::{DbId, Timestamp};
use sqlx::PgPool;

use crate::models::job::{JobListQuery, NewJob, ScheduledJob};

/// Column list for `scheduled_jobs` queries.
const COLUMNS: &str = "\
    id, name, identity, data, schedule, lock_limit, \
    next_run_at, last_run_at, last_finished_at, fail_count, last_error, \
    created_at, updated_at";

/// Maximum page size for job listing.
const MAX_LIMIT: i64 = 100;

/// Default page size for job listing.
const DEFAULT_LIMIT: i64 = 50;

/// Provides CRUD operations for scheduled jobs.
pub struct JobRepo;

impl JobRepo {
    /// Register (or update) the recurrence for a job identity.
    ///
    /// Re-registering an unchanged schedule keeps the pending `next_run_at`,
    /// so process restarts do not shift the cadence.
    pub async fn register_recurring(
        pool: &PgPool,
        job: &NewJob,
    ) -> Result<ScheduledJob, sqlx::Error> {
        let query = format!(
            "INSERT INTO scheduled_jobs (name, identity, data, schedule, lock_limit, next_run_at) \
             VALUES ($1, $2, $3, $4, $5, $6) \
             ON CONFLICT (name, identity) WHERE schedule IS NOT NULL \
             DO UPDATE SET \
                 data = EXCLUDED.data, \
                 lock_limit = EXCLUDED.lock_limit, \
                 next_run_at = CASE \
                     WHEN scheduled_jobs.schedule IS DISTINCT FROM EXCLUDED.schedule \
                       OR scheduled_jobs.next_run_at IS NULL \
                     THEN EXCLUDED.next_run_at \
                     ELSE scheduled_jobs.next_run_at END, \
                 schedule = EXCLUDED.schedule \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, ScheduledJob>(&query)
            .bind(&job.name)
            .bind(&job.identity)
            .bind(&job.data)
            .bind(&job.schedule)
            .bind(job.lock_limit)
            .bind(job.next_run_at)
            .fetch_one(pool)
            .await
    }

    /// Enqueue a one-shot run.
    ///
    /// A not-yet-started one-shot run of the same identity absorbs the new
    /// request (keeping the earlier run time) instead of adding a duplicate.
    pub async fn enqueue_once(pool: &PgPool, job: &NewJob) -> Result<ScheduledJob, sqlx::Error> {
        let query = format!(
            "INSERT INTO scheduled_jobs (name, identity, data, schedule, lock_limit, next_run_at) \
             VALUES ($1, $2, $3, NULL, $4, $5) \
             ON CONFLICT (name, identity) \
                 WHERE schedule IS NULL AND next_run_at IS NOT NULL AND last_run_at IS NULL \
             DO UPDATE SET \
                 data = EXCLUDED.data, \
                 lock_limit = EXCLUDED.lock_limit, \
                 next_run_at = LEAST(scheduled_jobs.next_run_at, EXCLUDED.next_run_at) \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, ScheduledJob>(&query)
            .bind(&job.name)
            .bind(&job.identity)
            .bind(&job.data)
            .bind(job.lock_limit)
            .bind(job.next_run_at)
            .fetch_one(pool)
            .await
    }

    /// Jobs whose `next_run_at` has passed, oldest first.
    pub async fn list_due(
        pool: &PgPool,
        now: Timestamp,
        limit: i64,
    ) -> Result<Vec<ScheduledJob>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM scheduled_jobs \
             WHERE next_run_at IS NOT NULL AND next_run_at <= $1 \
             ORDER BY next_run_at ASC, id ASC \
             LIMIT $2"
        );
        sqlx::query_as::<_, ScheduledJob>(&query)
            .bind(now)
            .bind(limit)
            .fetch_all(pool)
            .await
    }

    /// Set `last_run_at` when a handler invocation begins, but only while
    /// `next_run_at` still equals the occurrence the caller listed as due.
    pub async fn mark_started(
        pool: &PgPool,
        id: DbId,
        due_at: Timestamp,
        at: Timestamp,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE scheduled_jobs SET last_run_at = $3 WHERE id = $1 AND next_run_at = $2",
        )
        .bind(id)
        .bind(due_at)
        .bind(at)
        .execute(pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    /// Record a successful run: clears the error state and moves
    /// `next_run_at` (to `NULL` for one-shot jobs).
    pub async fn record_success(
        pool: &PgPool,
        id: DbId,
        finished_at: Timestamp,
        next_run_at: Option<Timestamp>,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            "UPDATE scheduled_jobs \
             SET last_finished_at = $2, next_run_at = $3, \
                 fail_count = 0, last_error = NULL \
             WHERE id = $1",
        )
        .bind(id)
        .bind(finished_at)
        .bind(next_run_at)
        .execute(pool)
        .await?;
        Ok(())
    }

    /// Record a failed or timed-out run. Recurring jobs still advance to the
    /// next tick; there is no immediate retry.
    pub async fn record_failure(
        pool: &PgPool,
        id: DbId,
        finished_at: Timestamp,
        error: &str,
        next_run_at: Option<Timestamp>,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            "UPDATE scheduled_jobs \
             SET last_finished_at = $2, next_run_at = $4, \
                 fail_count = fail_count + 1, last_error = $3 \
             WHERE id = $1",
        )
        .bind(id)
        .bind(finished_at)
        .bind(error)
        .bind(next_run_at)
        .execute(pool)
        .await?;
        Ok(())
    }

    /// Find a job by its ID.
    pub async fn find_by_id(pool: &PgPool, id: DbId) -> Result<Option<ScheduledJob>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM scheduled_jobs WHERE id = $1");
        sqlx::query_as::<_, ScheduledJob>(&query)
            .bind(id)
            .fetch_optional(pool)
            .await
    }

    /// List jobs, optionally filtered by name, most recently created first.
    pub async fn list(
        pool: &PgPool,
        params: &JobListQuery,
    ) -> Result<Vec<ScheduledJob>, sqlx::Error> {
        let limit = params.limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT);
        let offset = params.offset.unwrap_or(0).max(0);

        let query = format!(
            "SELECT {COLUMNS} FROM scheduled_jobs \
             WHERE ($1::TEXT IS NULL OR name = $1) \
             ORDER BY created_at DESC, id DESC \
             LIMIT $2 OFFSET $3"
        );
        sqlx::query_as::<_, ScheduledJob>(&query)
            .bind(params.name.as_deref())
            .bind(limit)
            .bind(offset)
            .fetch_all(pool)
            .await
    }

    /// Delete finished one-shot jobs whose last run ended before `older_than`.
    pub async fn prune_finished(pool: &PgPool, older_than: Timestamp) -> Result<u64, sqlx::Error> {
        let result = sqlx::query(
            "DELETE FROM scheduled_jobs \
             WHERE schedule IS NULL AND next_run_at IS NULL \
               AND last_finished_at < $1",
        )
        .bind(older_than)
        .execute(pool)
        .await?;
        Ok(result.rows_affected())
    }
}
