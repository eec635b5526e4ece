//! Scheduler core.
//!
//! Polls the [`JobStore`] for due jobs every `poll_interval` and runs each
//! one in a bounded pool of worker slots:
//!
//! ```text
//! Pending -> LockWait -> Running -> Succeeded | Failed
//! ```
//!
//! A denied lock leaves the job due for the next tick without recording
//! anything. Once the lock is held, the job's `next_run_at` must still be
//! the occurrence that was listed; if another scheduler already ran it, the
//! lock is dropped and the job is skipped. A handler failure, panic or timeout is recorded on the job
//! (`fail_count`, `last_error`) and recurring jobs move on to their next
//! tick. The lock is released after every run.
//!
//! Store failures during the scheduler's own bookkeeping are fatal:
//! [`Scheduler::run`] returns the error and the process is expected to exit.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use abacus_core::scheduling::{validate_transition, RunState};
use abacus_core::types::{DbId, Timestamp};
use abacus_db::models::job::ScheduledJob;
use abacus_db::store::JobStore;
use abacus_db::StoreError;
use chrono::Utc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::lock::LockManager;
use crate::queue::JobQueue;
use crate::registry::JobRegistry;

/// How often finished one-shot jobs are pruned.
const PRUNE_INTERVAL: Duration = Duration::from_secs(3600);

/// Upper bound on waiting for in-flight jobs at shutdown.
const DEFAULT_SHUTDOWN_GRACE: Duration = Duration::from_secs(30);

// ---------------------------------------------------------------------------
// Errors and reports
// ---------------------------------------------------------------------------

/// Infrastructure failure that stops the scheduler.
#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    #[error("Job store failure: {0}")]
    Store(#[from] StoreError),

    #[error("Scheduler task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

/// Outcome of one due job during one tick.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunReport {
    pub job_id: DbId,
    pub job_name: String,
    pub identity: String,
    /// `LockWait` when the lock was denied, `Pending` when another scheduler
    /// already ran this occurrence, otherwise the terminal state.
    pub state: RunState,
    pub error: Option<String>,
}

#[derive(Debug)]
enum HandlerOutcome {
    Succeeded,
    Failed(String),
    TimedOut(Duration),
}

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub poll_interval: Duration,
    pub worker_slots: usize,
    pub batch_size: i64,
    pub job_timeout: Duration,
    pub finished_job_retention: Duration,
    pub shutdown_grace: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            poll_interval: abacus_core::scheduling::DEFAULT_POLL_INTERVAL,
            worker_slots: abacus_core::scheduling::DEFAULT_WORKER_SLOTS,
            batch_size: 50,
            job_timeout: abacus_core::scheduling::DEFAULT_JOB_TIMEOUT,
            finished_job_retention: Duration::from_secs(24 * 3600),
            shutdown_grace: DEFAULT_SHUTDOWN_GRACE,
        }
    }
}

// ---------------------------------------------------------------------------
// Scheduler
// ---------------------------------------------------------------------------

/// Owns the lock manager and the job registry of one scheduler process.
#[derive(Clone)]
pub struct Scheduler {
    inner: Arc<Inner>,
}

struct Inner {
    jobs: Arc<dyn JobStore>,
    queue: JobQueue,
    locks: LockManager,
    registry: JobRegistry,
    config: SchedulerConfig,
    slots: Arc<Semaphore>,
    /// Jobs this process is currently running, skipped when listed again.
    running: Mutex<HashSet<DbId>>,
}

impl Scheduler {
    pub fn new(
        jobs: Arc<dyn JobStore>,
        queue: JobQueue,
        locks: LockManager,
        registry: JobRegistry,
        config: SchedulerConfig,
    ) -> Self {
        let slots = Arc::new(Semaphore::new(config.worker_slots.max(1)));
        Self {
            inner: Arc::new(Inner {
                jobs,
                queue,
                locks,
                registry,
                config,
                slots,
                running: Mutex::new(HashSet::new()),
            }),
        }
    }

    /// Queue used for `every` / `schedule_at` / `now` submissions.
    pub fn queue(&self) -> &JobQueue {
        &self.inner.queue
    }

    pub fn registry(&self) -> &JobRegistry {
        &self.inner.registry
    }

    /// Run the polling loop until `cancel` fires or the store fails.
    ///
    /// On cancellation, in-flight jobs get `shutdown_grace` to finish; jobs
    /// still running after that are aborted and their leases left to expire.
    pub async fn run(&self, cancel: CancellationToken) -> Result<(), SchedulerError> {
        let config = &self.inner.config;
        let mut ticker = tokio::time::interval(config.poll_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        let mut prune = tokio::time::interval(PRUNE_INTERVAL);
        let mut tasks: JoinSet<Result<RunReport, SchedulerError>> = JoinSet::new();

        tracing::info!(
            poll_interval_ms = config.poll_interval.as_millis() as u64,
            worker_slots = config.worker_slots,
            job_timeout_secs = config.job_timeout.as_secs(),
            lock_ttl_secs = self.inner.locks.ttl().as_secs(),
            kinds = ?self.inner.registry.kinds(),
            "Scheduler started",
        );

        let result = loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!(in_flight = tasks.len(), "Scheduler shutting down");
                    break Ok(());
                }
                _ = ticker.tick() => {
                    if let Err(e) = self.spawn_due(&mut tasks).await {
                        break Err(e);
                    }
                }
                _ = prune.tick() => {
                    if let Err(e) = self.prune_finished().await {
                        break Err(e);
                    }
                }
                Some(joined) = tasks.join_next(), if !tasks.is_empty() => {
                    if let Err(e) = joined.map_err(SchedulerError::from).and_then(|r| r) {
                        break Err(e);
                    }
                }
            }
        };

        if let Err(e) = &result {
            tracing::error!(error = %e, "Scheduler stopping after infrastructure failure");
        }
        self.drain(tasks).await;
        result
    }

    /// List due jobs once, run every one that gets a slot, and wait for them.
    pub async fn run_due_once(&self) -> Result<Vec<RunReport>, SchedulerError> {
        let mut tasks = JoinSet::new();
        self.spawn_due(&mut tasks).await?;

        let mut reports = Vec::with_capacity(tasks.len());
        while let Some(joined) = tasks.join_next().await {
            reports.push(joined??);
        }
        reports.sort_by_key(|r| r.job_id);
        Ok(reports)
    }

    /// Delete finished one-shot jobs older than the retention window.
    pub async fn prune_finished(&self) -> Result<u64, SchedulerError> {
        let retention = chrono::Duration::from_std(self.inner.config.finished_job_retention)
            .unwrap_or(chrono::Duration::MAX);
        let cutoff = Utc::now()
            .checked_sub_signed(retention)
            .unwrap_or(Timestamp::MIN_UTC);
        let pruned = self.inner.jobs.prune_finished(cutoff).await?;
        if pruned > 0 {
            tracing::info!(pruned, "Pruned finished one-shot jobs");
        } else {
            tracing::debug!("No finished jobs to prune");
        }
        Ok(pruned)
    }

    /// Spawn every due job that is not already running here, while worker
    /// slots remain. Jobs left over wait for the next tick.
    async fn spawn_due(
        &self,
        tasks: &mut JoinSet<Result<RunReport, SchedulerError>>,
    ) -> Result<usize, SchedulerError> {
        let due = self
            .inner
            .jobs
            .list_due(Utc::now(), self.inner.config.batch_size)
            .await?;

        let mut spawned = 0;
        for job in due {
            let Some(running) = RunningGuard::claim(&self.inner, job.id) else {
                continue;
            };
            let Ok(permit) = Arc::clone(&self.inner.slots).try_acquire_owned() else {
                tracing::debug!("All worker slots busy, deferring remaining due jobs");
                break;
            };
            let inner = Arc::clone(&self.inner);
            tasks.spawn(async move {
                let _permit = permit;
                let _running = running;
                inner.execute(job).await
            });
            spawned += 1;
        }
        Ok(spawned)
    }

    async fn drain(&self, mut tasks: JoinSet<Result<RunReport, SchedulerError>>) {
        if tasks.is_empty() {
            return;
        }
        let grace = self.inner.config.shutdown_grace;
        let waited = tokio::time::timeout(grace, async {
            while let Some(joined) = tasks.join_next().await {
                if let Err(e) = joined.map_err(SchedulerError::from).and_then(|r| r) {
                    tracing::error!(error = %e, "In-flight job failed during shutdown");
                }
            }
        })
        .await;
        if waited.is_err() {
            tracing::warn!(
                remaining = tasks.len(),
                grace_secs = grace.as_secs(),
                "Aborting jobs still running after shutdown grace period"
            );
            tasks.abort_all();
        }
    }
}

// ---------------------------------------------------------------------------
// Execution of a single job
// ---------------------------------------------------------------------------

impl Inner {
    async fn execute(&self, job: ScheduledJob) -> Result<RunReport, SchedulerError> {
        let recurring = job.is_recurring();
        let mut state = RunState::Pending;
        transition(&job, &mut state, RunState::LockWait, recurring);

        let lock_limit = u32::try_from(job.lock_limit).unwrap_or(1);
        let Some(lock) = self
            .locks
            .try_acquire(&job.name, &job.identity, lock_limit)
            .await?
        else {
            transition(&job, &mut state, RunState::Pending, recurring);
            return Ok(report(&job, RunState::LockWait, None));
        };

        let started_at = Utc::now();
        let claimed = match job.next_run_at {
            Some(due_at) => self.jobs.mark_started(job.id, due_at, started_at).await,
            None => Ok(false),
        };
        let claimed = match claimed {
            Ok(claimed) => claimed,
            Err(e) => {
                self.locks.release(lock).await?;
                return Err(e.into());
            }
        };
        if !claimed {
            self.locks.release(lock).await?;
            tracing::info!(
                job_id = job.id,
                job_name = %job.name,
                identity = %job.identity,
                "Job occurrence already taken by another scheduler, skipping"
            );
            transition(&job, &mut state, RunState::Pending, recurring);
            return Ok(report(&job, RunState::Pending, None));
        }

        transition(&job, &mut state, RunState::Running, recurring);
        tracing::info!(
            job_id = job.id,
            job_name = %job.name,
            identity = %job.identity,
            "Job started"
        );
        let outcome = self.invoke(&job).await;

        // Record before releasing: the next holder must see the advanced
        // `next_run_at`.
        let recorded = self.record(&job, &outcome, started_at).await;
        let released = self.locks.release(lock).await;

        let error = recorded?;
        released?;

        let terminal = if error.is_none() {
            RunState::Succeeded
        } else {
            RunState::Failed
        };
        transition(&job, &mut state, terminal, recurring);
        Ok(report(&job, terminal, error))
    }

    /// Run the handler in its own task, so a panic or an overrun is contained
    /// to this job.
    async fn invoke(&self, job: &ScheduledJob) -> HandlerOutcome {
        let data = match job.job_data() {
            Ok(data) => data,
            Err(e) => return HandlerOutcome::Failed(e.to_string()),
        };
        let Some(handler) = self.registry.handler(data.kind()) else {
            return HandlerOutcome::Failed(format!("No handler registered for {}", data.kind()));
        };

        let timeout = self.config.job_timeout;
        let handle = tokio::spawn(async move { handler.run(&data).await });
        let abort = handle.abort_handle();

        match tokio::time::timeout(timeout, handle).await {
            Ok(Ok(Ok(()))) => HandlerOutcome::Succeeded,
            Ok(Ok(Err(e))) => HandlerOutcome::Failed(e.to_string()),
            Ok(Err(e)) => HandlerOutcome::Failed(format!("Handler panicked: {e}")),
            Err(_) => {
                abort.abort();
                HandlerOutcome::TimedOut(timeout)
            }
        }
    }

    /// Persist the outcome and advance `next_run_at`. Returns the error
    /// message recorded, if any.
    async fn record(
        &self,
        job: &ScheduledJob,
        outcome: &HandlerOutcome,
        started_at: Timestamp,
    ) -> Result<Option<String>, StoreError> {
        let finished_at = Utc::now();
        let duration_ms = (finished_at - started_at).num_milliseconds();
        let (next_run_at, schedule_error) = next_run(job, finished_at);

        let error = match (outcome, schedule_error) {
            (HandlerOutcome::Succeeded, None) => None,
            (HandlerOutcome::Succeeded, Some(e)) => Some(e),
            (HandlerOutcome::Failed(e), _) => Some(e.clone()),
            (HandlerOutcome::TimedOut(t), _) => Some(format!("Job timed out after {t:?}")),
        };

        match &error {
            None => {
                self.jobs
                    .record_success(job.id, finished_at, next_run_at)
                    .await?;
                tracing::info!(
                    job_id = job.id,
                    job_name = %job.name,
                    identity = %job.identity,
                    duration_ms,
                    next_run_at = ?next_run_at,
                    "Job succeeded"
                );
            }
            Some(message) => {
                self.jobs
                    .record_failure(job.id, finished_at, message, next_run_at)
                    .await?;
                tracing::warn!(
                    job_id = job.id,
                    job_name = %job.name,
                    identity = %job.identity,
                    duration_ms,
                    fail_count = job.fail_count + 1,
                    error = %message,
                    next_run_at = ?next_run_at,
                    "Job failed"
                );
            }
        }
        Ok(error)
    }
}

/// Next run time after a finished attempt, plus an error message when a
/// recurring job's schedule can no longer produce one.
fn next_run(job: &ScheduledJob, finished_at: Timestamp) -> (Option<Timestamp>, Option<String>) {
    match job.parsed_schedule() {
        None => (None, None),
        Some(Ok(schedule)) => match schedule.next_after(finished_at) {
            Some(next) => (Some(next), None),
            None => (None, Some(format!("Schedule '{schedule}' has no future run"))),
        },
        Some(Err(e)) => (None, Some(e.to_string())),
    }
}

fn transition(job: &ScheduledJob, state: &mut RunState, to: RunState, recurring: bool) {
    if let Err(e) = validate_transition(*state, to, recurring) {
        tracing::error!(job_id = job.id, error = %e, "Unexpected job state transition");
    }
    *state = to;
}

fn report(job: &ScheduledJob, state: RunState, error: Option<String>) -> RunReport {
    RunReport {
        job_id: job.id,
        job_name: job.name.clone(),
        identity: job.identity.clone(),
        state,
        error,
    }
}

/// Marks a job as running in this process for the guard's lifetime.
struct RunningGuard {
    inner: Arc<Inner>,
    job_id: DbId,
}

impl RunningGuard {
    fn claim(inner: &Arc<Inner>, job_id: DbId) -> Option<Self> {
        let mut running = inner
            .running
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        running.insert(job_id).then(|| Self {
            inner: Arc::clone(inner),
            job_id,
        })
    }
}

impl Drop for RunningGuard {
    fn drop(&mut self) {
        self.inner
            .running
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .remove(&self.job_id);
    }
}
