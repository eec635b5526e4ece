//! Scheduled job models.

use abacus_core::jobs::{JobData, JobDataError};
use abacus_core::schedule::{Schedule, ScheduleError, Trigger};
use abacus_core::types::{DbId, Timestamp};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// A row from the `scheduled_jobs` table.
///
/// Recurring jobs carry a `schedule`; one-shot jobs have `schedule = None`
/// and lose their `next_run_at` once they have run.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct ScheduledJob {
    pub id: DbId,
    pub name: String,
    pub identity: String,
    pub data: serde_json::Value,
    pub schedule: Option<String>,
    pub lock_limit: i32,
    pub next_run_at: Option<Timestamp>,
    pub last_run_at: Option<Timestamp>,
    pub last_finished_at: Option<Timestamp>,
    pub fail_count: i32,
    pub last_error: Option<String>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl ScheduledJob {
    pub fn is_recurring(&self) -> bool {
        self.schedule.is_some()
    }

    /// Typed payload rebuilt from `name` + `data`.
    pub fn job_data(&self) -> Result<JobData, JobDataError> {
        JobData::from_parts(&self.name, self.data.clone())
    }

    /// Parsed recurrence, `None` for one-shot jobs.
    pub fn parsed_schedule(&self) -> Option<Result<Schedule, ScheduleError>> {
        self.schedule.as_deref().map(Schedule::parse)
    }
}

/// DTO for registering a recurrence or enqueueing a one-shot run.
#[derive(Debug, Clone)]
pub struct NewJob {
    pub name: String,
    pub identity: String,
    pub data: serde_json::Value,
    pub schedule: Option<String>,
    pub lock_limit: i32,
    pub next_run_at: Timestamp,
}

impl NewJob {
    /// Build the row for `data` under `trigger`. Recurring jobs first run at
    /// the schedule's next tick after `now`.
    pub fn new(
        data: &JobData,
        trigger: &Trigger,
        lock_limit: u32,
        now: Timestamp,
    ) -> Result<Self, NewJobError> {
        let (schedule, next_run_at) = match trigger {
            Trigger::Every(schedule) => {
                let next = schedule
                    .next_after(now)
                    .ok_or_else(|| NewJobError::NoFutureRun(schedule.to_string()))?;
                (Some(schedule.expression().to_string()), next)
            }
            Trigger::At(at) => (None, *at),
        };

        Ok(Self {
            name: data.kind().name().to_string(),
            identity: data.identity(),
            data: data.payload()?,
            schedule,
            lock_limit: i32::try_from(lock_limit).unwrap_or(i32::MAX),
            next_run_at,
        })
    }
}

#[derive(Debug, thiserror::Error)]
pub enum NewJobError {
    #[error("Schedule '{0}' has no future run")]
    NoFutureRun(String),

    #[error("Payload serialization failed: {0}")]
    Payload(#[from] serde_json::Error),
}

/// Query parameters for job listings.
#[derive(Debug, Default, Deserialize)]
pub struct JobListQuery {
    pub name: Option<String>,
    /// Maximum number of results. Defaults to 50, capped at 100.
    pub limit: Option<i64>,
    /// Number of results to skip. Defaults to 0.
    pub offset: Option<i64>,
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};

    use super::*;

    #[test]
    fn recurring_job_starts_at_next_tick() {
        let now = Utc.with_ymd_and_hms(2024, 1, 1, 1, 30, 0).unwrap();
        let data = JobData::update_metrics("met_1", "org_1");
        let trigger = Trigger::Every(Schedule::parse("0 */6 * * *").unwrap());

        let job = NewJob::new(&data, &trigger, 5, now).unwrap();

        assert_eq!(job.name, "updateMetrics");
        assert_eq!(job.schedule.as_deref(), Some("0 */6 * * *"));
        assert_eq!(
            job.next_run_at,
            Utc.with_ymd_and_hms(2024, 1, 1, 6, 0, 0).unwrap()
        );
    }

    #[test]
    fn one_shot_job_runs_at_given_time() {
        let now = Utc::now();
        let data = JobData::webhooks("exp_1", "org_1");

        let job = NewJob::new(&data, &Trigger::At(now), 5, now).unwrap();

        assert!(job.schedule.is_none());
        assert_eq!(job.next_run_at, now);
        assert_eq!(job.identity, "webhooks:org_1:exp_1");
        assert_eq!(job.data["organizationId"], "org_1");
    }
}
