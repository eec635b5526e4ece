//! Submission of recurring and one-shot jobs.

use std::collections::HashMap;
use std::sync::Arc;

use abacus_core::jobs::{JobData, JobKind};
use abacus_core::schedule::{Schedule, Trigger};
use abacus_core::types::Timestamp;
use abacus_db::models::job::{NewJob, NewJobError, ScheduledJob};
use abacus_db::store::JobStore;
use abacus_db::StoreError;
use chrono::Utc;

#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error(transparent)]
    Job(#[from] NewJobError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Writes jobs to the [`JobStore`], stamping each row with its kind's lock
/// limit.
#[derive(Clone)]
pub struct JobQueue {
    jobs: Arc<dyn JobStore>,
    default_lock_limit: u32,
    lock_limits: HashMap<JobKind, u32>,
}

impl JobQueue {
    pub fn new(jobs: Arc<dyn JobStore>, default_lock_limit: u32) -> Self {
        Self {
            jobs,
            default_lock_limit: default_lock_limit.max(1),
            lock_limits: HashMap::new(),
        }
    }

    /// Override the concurrency limit for one kind.
    pub fn with_lock_limit(mut self, kind: JobKind, limit: u32) -> Self {
        self.lock_limits.insert(kind, limit.max(1));
        self
    }

    pub fn lock_limit(&self, kind: JobKind) -> u32 {
        self.lock_limits
            .get(&kind)
            .copied()
            .unwrap_or(self.default_lock_limit)
    }

    /// Register (or update) a recurrence for `data`'s identity.
    pub async fn every(
        &self,
        data: &JobData,
        schedule: Schedule,
    ) -> Result<ScheduledJob, QueueError> {
        self.submit(data, &Trigger::Every(schedule)).await
    }

    /// Run `data` once at `at`.
    pub async fn schedule_at(
        &self,
        data: &JobData,
        at: Timestamp,
    ) -> Result<ScheduledJob, QueueError> {
        self.submit(data, &Trigger::At(at)).await
    }

    /// Run `data` once, as soon as a worker slot and a lock are free.
    pub async fn now(&self, data: &JobData) -> Result<ScheduledJob, QueueError> {
        self.schedule_at(data, Utc::now()).await
    }

    pub async fn submit(
        &self,
        data: &JobData,
        trigger: &Trigger,
    ) -> Result<ScheduledJob, QueueError> {
        let job = NewJob::new(data, trigger, self.lock_limit(data.kind()), Utc::now())?;
        let row = match trigger {
            Trigger::Every(_) => self.jobs.register_recurring(&job).await?,
            Trigger::At(_) => self.jobs.enqueue_once(&job).await?,
        };
        tracing::info!(
            job_id = row.id,
            job_name = %row.name,
            identity = %row.identity,
            schedule = row.schedule.as_deref().unwrap_or("once"),
            next_run_at = ?row.next_run_at,
            "Job scheduled"
        );
        Ok(row)
    }
}
