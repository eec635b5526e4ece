//! Scheduler core behaviour with stub handlers.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use abacus_core::jobs::{JobData, JobKind, UPDATE_METRICS};
use abacus_core::scheduling::RunState;
use abacus_db::models::job::NewJob;
use abacus_db::models::lock::{LockLease, LockRequest};
use abacus_db::store::{JobStore, LockStore};
use abacus_db::{MemoryStore, StoreError};
use abacus_worker::{
    JobError, JobHandler, JobQueue, JobRegistry, LockManager, Scheduler, SchedulerConfig,
};
use async_trait::async_trait;
use chrono::Utc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Stub handlers
// ---------------------------------------------------------------------------

/// Sleeps for `hold` and tracks the peak number of concurrent runs.
#[derive(Default)]
struct Tracking {
    hold: Duration,
    active: AtomicUsize,
    peak: AtomicUsize,
    runs: AtomicUsize,
}

#[async_trait]
impl JobHandler for Tracking {
    async fn run(&self, _data: &JobData) -> Result<(), JobError> {
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(self.hold).await;
        self.active.fetch_sub(1, Ordering::SeqCst);
        self.runs.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

struct Failing;

#[async_trait]
impl JobHandler for Failing {
    async fn run(&self, _data: &JobData) -> Result<(), JobError> {
        Err(JobError::new("warehouse unavailable"))
    }
}

struct Panicking;

#[async_trait]
impl JobHandler for Panicking {
    async fn run(&self, _data: &JobData) -> Result<(), JobError> {
        panic!("handler bug");
    }
}

/// Lease store whose grants arrive late, as from a slow database round trip.
struct SlowLocks {
    inner: Arc<MemoryStore>,
    delay: Duration,
}

#[async_trait]
impl LockStore for SlowLocks {
    async fn try_acquire(&self, req: &LockRequest) -> Result<Option<LockLease>, StoreError> {
        tokio::time::sleep(self.delay).await;
        self.inner.try_acquire(req).await
    }

    async fn release(&self, lease_id: Uuid) -> Result<bool, StoreError> {
        self.inner.release(lease_id).await
    }

    async fn active_leases(&self, job_name: &str) -> Result<Vec<LockLease>, StoreError> {
        self.inner.active_leases(job_name).await
    }
}

fn scheduler(
    store: &Arc<MemoryStore>,
    handler: Arc<dyn JobHandler>,
    lock_limit: u32,
    job_timeout: Duration,
) -> Scheduler {
    scheduler_with_locks(store, store.clone(), handler, lock_limit, job_timeout)
}

fn scheduler_with_locks(
    store: &Arc<MemoryStore>,
    lock_store: Arc<dyn LockStore>,
    handler: Arc<dyn JobHandler>,
    lock_limit: u32,
    job_timeout: Duration,
) -> Scheduler {
    let queue = JobQueue::new(store.clone(), 5).with_lock_limit(JobKind::UpdateMetrics, lock_limit);
    let locks = LockManager::new(lock_store, "test-worker", Duration::from_secs(60));
    let mut registry = JobRegistry::new();
    registry.register(JobKind::UpdateMetrics, handler);
    let config = SchedulerConfig {
        poll_interval: Duration::from_millis(10),
        worker_slots: 16,
        job_timeout,
        ..SchedulerConfig::default()
    };
    Scheduler::new(store.clone(), queue, locks, registry, config)
}

async fn enqueue_metrics(scheduler: &Scheduler, count: usize) {
    for i in 0..count {
        scheduler
            .queue()
            .now(&JobData::update_metrics(&format!("met_{i}"), "org_1"))
            .await
            .unwrap();
    }
}

// ---------------------------------------------------------------------------
// Lock limit
// ---------------------------------------------------------------------------

#[tokio::test]
async fn lock_limit_bounds_concurrency_and_denied_jobs_run_later() {
    let store = Arc::new(MemoryStore::new());
    let handler = Arc::new(Tracking {
        hold: Duration::from_millis(150),
        ..Tracking::default()
    });
    let scheduler = scheduler(&store, handler.clone(), 2, Duration::from_secs(5));
    enqueue_metrics(&scheduler, 5).await;

    let reports = scheduler.run_due_once().await.unwrap();
    let ran = reports
        .iter()
        .filter(|r| r.state == RunState::Succeeded)
        .count();
    let denied = reports
        .iter()
        .filter(|r| r.state == RunState::LockWait)
        .count();
    assert_eq!(ran, 2);
    assert_eq!(denied, 3);

    // Lock contention is not a failure.
    for job in store.all_jobs().await {
        assert_eq!(job.fail_count, 0);
        assert!(job.last_error.is_none());
    }

    for _ in 0..5 {
        if scheduler.run_due_once().await.unwrap().is_empty() {
            break;
        }
    }
    assert_eq!(handler.runs.load(Ordering::SeqCst), 5);
    assert!(handler.peak.load(Ordering::SeqCst) <= 2);
    assert!(store.active_leases(UPDATE_METRICS).await.unwrap().is_empty());
}

#[tokio::test]
async fn running_loop_drains_all_jobs_within_the_limit() {
    let store = Arc::new(MemoryStore::new());
    let handler = Arc::new(Tracking {
        hold: Duration::from_millis(30),
        ..Tracking::default()
    });
    let scheduler = scheduler(&store, handler.clone(), 3, Duration::from_secs(5));
    enqueue_metrics(&scheduler, 10).await;

    let cancel = CancellationToken::new();
    let running = {
        let scheduler = scheduler.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move { scheduler.run(cancel).await })
    };

    for _ in 0..200 {
        if handler.runs.load(Ordering::SeqCst) == 10 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    cancel.cancel();
    running.await.unwrap().unwrap();

    assert_eq!(handler.runs.load(Ordering::SeqCst), 10);
    assert!(handler.peak.load(Ordering::SeqCst) <= 3);
}

#[tokio::test]
async fn occurrence_finished_elsewhere_is_not_run_again() {
    let store = Arc::new(MemoryStore::new());
    let handler = Arc::new(Tracking::default());
    let fast = scheduler(&store, handler.clone(), 1, Duration::from_secs(5));
    let slow = scheduler_with_locks(
        &store,
        Arc::new(SlowLocks {
            inner: store.clone(),
            delay: Duration::from_millis(200),
        }),
        handler.clone(),
        1,
        Duration::from_secs(5),
    );
    enqueue_metrics(&fast, 1).await;

    // `slow` lists the job as due, then waits on its lock grant while `fast`
    // runs the job to completion and releases the lease.
    let slow_tick = tokio::spawn(async move { slow.run_due_once().await });
    tokio::time::sleep(Duration::from_millis(20)).await;
    let fast_reports = fast.run_due_once().await.unwrap();
    let slow_reports = slow_tick.await.unwrap().unwrap();

    assert_eq!(fast_reports[0].state, RunState::Succeeded);
    assert_eq!(slow_reports[0].state, RunState::Pending);
    assert!(slow_reports[0].error.is_none());
    assert_eq!(handler.runs.load(Ordering::SeqCst), 1);
    assert!(store.active_leases(UPDATE_METRICS).await.unwrap().is_empty());

    let job = scheduler_job(&store).await;
    assert_eq!(job.fail_count, 0);
    assert!(job.next_run_at.is_none());
}

// ---------------------------------------------------------------------------
// Failures
// ---------------------------------------------------------------------------

#[tokio::test]
async fn timed_out_handler_is_failed_and_its_lock_released() {
    let store = Arc::new(MemoryStore::new());
    let handler = Arc::new(Tracking {
        hold: Duration::from_secs(30),
        ..Tracking::default()
    });
    let scheduler = scheduler(&store, handler, 1, Duration::from_millis(50));
    enqueue_metrics(&scheduler, 1).await;

    let reports = scheduler.run_due_once().await.unwrap();

    assert_eq!(reports[0].state, RunState::Failed);
    assert_eq!(reports[0].error.as_deref(), Some("Job timed out after 50ms"));
    assert!(store.active_leases(UPDATE_METRICS).await.unwrap().is_empty());

    let job = scheduler_job(&store).await;
    assert_eq!(job.fail_count, 1);
    assert!(job.next_run_at.is_none(), "one-shot jobs are terminal");
    assert!(job.last_finished_at.is_some());
}

#[tokio::test]
async fn panicking_handler_does_not_stop_the_scheduler() {
    let store = Arc::new(MemoryStore::new());
    let scheduler = scheduler(&store, Arc::new(Panicking), 1, Duration::from_secs(5));
    enqueue_metrics(&scheduler, 1).await;

    let reports = scheduler.run_due_once().await.unwrap();

    assert_eq!(reports[0].state, RunState::Failed);
    assert!(reports[0].error.as_deref().unwrap().contains("panicked"));
    assert!(store.active_leases(UPDATE_METRICS).await.unwrap().is_empty());
}

#[tokio::test]
async fn failed_recurring_job_waits_for_its_next_tick() {
    let store = Arc::new(MemoryStore::new());
    let scheduler = scheduler(&store, Arc::new(Failing), 1, Duration::from_secs(5));

    let data = JobData::update_metrics("met_1", "org_1");
    store
        .register_recurring(&NewJob {
            name: data.kind().name().to_string(),
            identity: data.identity(),
            data: data.payload().unwrap(),
            schedule: Some("1 hour".into()),
            lock_limit: 1,
            next_run_at: Utc::now(),
        })
        .await
        .unwrap();

    let reports = scheduler.run_due_once().await.unwrap();
    assert_eq!(reports[0].state, RunState::Failed);

    let job = scheduler_job(&store).await;
    assert_eq!(job.fail_count, 1);
    assert_eq!(job.last_error.as_deref(), Some("warehouse unavailable"));
    let next = job.next_run_at.unwrap();
    assert!(next > Utc::now() + chrono::Duration::minutes(59));

    // Not retried before the next tick.
    assert!(scheduler.run_due_once().await.unwrap().is_empty());
}

#[tokio::test]
async fn expired_lease_lets_the_same_identity_run_again() {
    let store = Arc::new(MemoryStore::new());
    let handler = Arc::new(Tracking::default());
    let scheduler = scheduler(&store, handler.clone(), 1, Duration::from_secs(5));
    enqueue_metrics(&scheduler, 1).await;

    // A crashed holder left a short lease behind.
    let job = scheduler_job(&store).await;
    let crashed = LockManager::new(store.clone(), "crashed-worker", Duration::from_millis(40));
    let stale = crashed
        .try_acquire(&job.name, &job.identity, 1)
        .await
        .unwrap();
    assert!(stale.is_some());

    let reports = scheduler.run_due_once().await.unwrap();
    assert_eq!(reports[0].state, RunState::LockWait);

    tokio::time::sleep(Duration::from_millis(80)).await;
    let reports = scheduler.run_due_once().await.unwrap();
    assert_eq!(reports[0].state, RunState::Succeeded);
    assert_eq!(handler.runs.load(Ordering::SeqCst), 1);
}

async fn scheduler_job(store: &MemoryStore) -> abacus_db::models::job::ScheduledJob {
    let mut jobs = store.all_jobs().await;
    assert_eq!(jobs.len(), 1);
    jobs.remove(0)
}
