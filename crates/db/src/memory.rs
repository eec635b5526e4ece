//! In-process implementation of the store traits.
//!
//! Mirrors the Postgres semantics (partial unique indexes, lease expiry,
//! guarded result writes) behind a single mutex. Used by the test suites and
//! for running a single worker without a database.

use std::collections::{BTreeMap, HashMap};

use abacus_core::stats::AnalysisSummary;
use abacus_core::types::{DbId, Timestamp};
use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::error::StoreError;
use crate::models::analysis::{AnalysisResult, AnalysisTarget, QueryRecord};
use crate::models::definition::{ExperimentDefinition, MetricDefinition};
use crate::models::job::{JobListQuery, NewJob, ScheduledJob};
use crate::models::lock::{LockLease, LockRequest};
use crate::models::webhook::WebhookEndpoint;
use crate::store::{AnalysisStore, DefinitionSource, JobStore, LockStore, WebhookStore};

#[derive(Default)]
struct Inner {
    next_job_id: DbId,
    jobs: BTreeMap<DbId, ScheduledJob>,
    leases: HashMap<Uuid, LockLease>,
    results: HashMap<(AnalysisTarget, String), AnalysisResult>,
    webhooks: Vec<WebhookEndpoint>,
    metrics: Vec<MetricDefinition>,
    experiments: Vec<ExperimentDefinition>,
}

impl Inner {
    fn insert_job(&mut self, job: &NewJob, schedule: Option<String>) -> ScheduledJob {
        self.next_job_id += 1;
        let now = Utc::now();
        let row = ScheduledJob {
            id: self.next_job_id,
            name: job.name.clone(),
            identity: job.identity.clone(),
            data: job.data.clone(),
            schedule,
            lock_limit: job.lock_limit,
            next_run_at: Some(job.next_run_at),
            last_run_at: None,
            last_finished_at: None,
            fail_count: 0,
            last_error: None,
            created_at: now,
            updated_at: now,
        };
        self.jobs.insert(row.id, row.clone());
        row
    }

    fn job_mut(&mut self, id: DbId) -> Option<&mut ScheduledJob> {
        let job = self.jobs.get_mut(&id)?;
        job.updated_at = Utc::now();
        Some(job)
    }
}

/// Store kept entirely in memory.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add (or replace) a metric definition.
    pub async fn insert_metric(&self, metric: MetricDefinition) {
        let mut inner = self.inner.lock().await;
        inner
            .metrics
            .retain(|m| !(m.id == metric.id && m.organization == metric.organization));
        inner.metrics.push(metric);
    }

    /// Add (or replace) an experiment definition.
    pub async fn insert_experiment(&self, experiment: ExperimentDefinition) {
        let mut inner = self.inner.lock().await;
        inner
            .experiments
            .retain(|e| !(e.id == experiment.id && e.organization == experiment.organization));
        inner.experiments.push(experiment);
    }

    /// Every job row, in insertion order.
    pub async fn all_jobs(&self) -> Vec<ScheduledJob> {
        self.inner.lock().await.jobs.values().cloned().collect()
    }
}

#[async_trait]
impl JobStore for MemoryStore {
    async fn register_recurring(&self, job: &NewJob) -> Result<ScheduledJob, StoreError> {
        let mut inner = self.inner.lock().await;
        let existing = inner
            .jobs
            .values()
            .find(|j| j.schedule.is_some() && j.name == job.name && j.identity == job.identity)
            .map(|j| j.id);

        let row = match existing {
            Some(id) => inner.job_mut(id),
            None => None,
        };
        let Some(row) = row else {
            return Ok(inner.insert_job(job, job.schedule.clone()));
        };
        if row.schedule != job.schedule || row.next_run_at.is_none() {
            row.next_run_at = Some(job.next_run_at);
        }
        row.data = job.data.clone();
        row.lock_limit = job.lock_limit;
        row.schedule = job.schedule.clone();
        Ok(row.clone())
    }

    async fn enqueue_once(&self, job: &NewJob) -> Result<ScheduledJob, StoreError> {
        let mut inner = self.inner.lock().await;
        let pending = inner
            .jobs
            .values()
            .find(|j| {
                j.schedule.is_none()
                    && j.next_run_at.is_some()
                    && j.last_run_at.is_none()
                    && j.name == job.name
                    && j.identity == job.identity
            })
            .map(|j| j.id);

        let row = match pending {
            Some(id) => inner.job_mut(id),
            None => None,
        };
        let Some(row) = row else {
            return Ok(inner.insert_job(job, None));
        };
        row.data = job.data.clone();
        row.lock_limit = job.lock_limit;
        row.next_run_at = row.next_run_at.map(|at| at.min(job.next_run_at));
        Ok(row.clone())
    }

    async fn list_due(&self, now: Timestamp, limit: i64) -> Result<Vec<ScheduledJob>, StoreError> {
        let inner = self.inner.lock().await;
        let mut due: Vec<ScheduledJob> = inner
            .jobs
            .values()
            .filter(|j| j.next_run_at.is_some_and(|at| at <= now))
            .cloned()
            .collect();
        due.sort_by_key(|j| (j.next_run_at, j.id));
        due.truncate(usize::try_from(limit).unwrap_or(0));
        Ok(due)
    }

    async fn mark_started(
        &self,
        id: DbId,
        due_at: Timestamp,
        at: Timestamp,
    ) -> Result<bool, StoreError> {
        let mut inner = self.inner.lock().await;
        match inner.job_mut(id) {
            Some(row) if row.next_run_at == Some(due_at) => {
                row.last_run_at = Some(at);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn record_success(
        &self,
        id: DbId,
        finished_at: Timestamp,
        next_run_at: Option<Timestamp>,
    ) -> Result<(), StoreError> {
        if let Some(row) = self.inner.lock().await.job_mut(id) {
            row.last_finished_at = Some(finished_at);
            row.next_run_at = next_run_at;
            row.fail_count = 0;
            row.last_error = None;
        }
        Ok(())
    }

    async fn record_failure(
        &self,
        id: DbId,
        finished_at: Timestamp,
        error: &str,
        next_run_at: Option<Timestamp>,
    ) -> Result<(), StoreError> {
        if let Some(row) = self.inner.lock().await.job_mut(id) {
            row.last_finished_at = Some(finished_at);
            row.next_run_at = next_run_at;
            row.fail_count += 1;
            row.last_error = Some(error.to_string());
        }
        Ok(())
    }

    async fn find_job(&self, id: DbId) -> Result<Option<ScheduledJob>, StoreError> {
        Ok(self.inner.lock().await.jobs.get(&id).cloned())
    }

    async fn list_jobs(&self, params: &JobListQuery) -> Result<Vec<ScheduledJob>, StoreError> {
        let limit = params.limit.unwrap_or(50).clamp(1, 100) as usize;
        let offset = params.offset.unwrap_or(0).max(0) as usize;
        let inner = self.inner.lock().await;
        Ok(inner
            .jobs
            .values()
            .rev()
            .filter(|j| params.name.as_ref().is_none_or(|name| &j.name == name))
            .skip(offset)
            .take(limit)
            .cloned()
            .collect())
    }

    async fn prune_finished(&self, older_than: Timestamp) -> Result<u64, StoreError> {
        let mut inner = self.inner.lock().await;
        let before = inner.jobs.len();
        inner.jobs.retain(|_, j| {
            !(j.schedule.is_none()
                && j.next_run_at.is_none()
                && j.last_finished_at.is_some_and(|at| at < older_than))
        });
        Ok((before - inner.jobs.len()) as u64)
    }
}

#[async_trait]
impl LockStore for MemoryStore {
    async fn try_acquire(&self, req: &LockRequest) -> Result<Option<LockLease>, StoreError> {
        let mut inner = self.inner.lock().await;
        let now = Utc::now();
        inner.leases.retain(|_, l| l.expires_at > now);

        let held: Vec<&LockLease> = inner
            .leases
            .values()
            .filter(|l| l.job_name == req.job_name)
            .collect();
        if held.iter().any(|l| l.identity == req.identity)
            || held.len() >= req.max_concurrent as usize
        {
            return Ok(None);
        }

        let ttl = chrono::Duration::from_std(req.ttl).unwrap_or(chrono::Duration::MAX);
        let lease = LockLease {
            id: Uuid::new_v4(),
            job_name: req.job_name.clone(),
            identity: req.identity.clone(),
            holder: req.holder.clone(),
            acquired_at: now,
            expires_at: now.checked_add_signed(ttl).unwrap_or(Timestamp::MAX_UTC),
        };
        inner.leases.insert(lease.id, lease.clone());
        Ok(Some(lease))
    }

    async fn release(&self, lease_id: Uuid) -> Result<bool, StoreError> {
        Ok(self.inner.lock().await.leases.remove(&lease_id).is_some())
    }

    async fn active_leases(&self, job_name: &str) -> Result<Vec<LockLease>, StoreError> {
        let now = Utc::now();
        let inner = self.inner.lock().await;
        let mut leases: Vec<LockLease> = inner
            .leases
            .values()
            .filter(|l| l.job_name == job_name && l.expires_at > now)
            .cloned()
            .collect();
        leases.sort_by_key(|l| l.acquired_at);
        Ok(leases)
    }
}

#[async_trait]
impl AnalysisStore for MemoryStore {
    async fn mark_run_started(
        &self,
        target: &AnalysisTarget,
        organization_id: &str,
        at: Timestamp,
    ) -> Result<Timestamp, StoreError> {
        let mut inner = self.inner.lock().await;
        inner.results.insert(
            (target.clone(), organization_id.to_string()),
            AnalysisResult {
                target: target.clone(),
                organization_id: organization_id.to_string(),
                run_started: Some(at),
                analysis: None,
                analysis_error: None,
                queries: Vec::new(),
            },
        );
        Ok(at)
    }

    async fn save_result(
        &self,
        target: &AnalysisTarget,
        organization_id: &str,
        run_started: Timestamp,
        analysis: Option<&AnalysisSummary>,
        analysis_error: Option<&str>,
        queries: &[QueryRecord],
    ) -> Result<bool, StoreError> {
        let mut inner = self.inner.lock().await;
        let key = (target.clone(), organization_id.to_string());
        match inner.results.get_mut(&key) {
            Some(result) if result.run_started == Some(run_started) => {
                result.analysis = analysis.cloned();
                result.analysis_error = analysis_error.map(str::to_string);
                result.queries = queries.to_vec();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn find_result(
        &self,
        target: &AnalysisTarget,
        organization_id: &str,
    ) -> Result<Option<AnalysisResult>, StoreError> {
        let inner = self.inner.lock().await;
        Ok(inner
            .results
            .get(&(target.clone(), organization_id.to_string()))
            .cloned())
    }
}

#[async_trait]
impl WebhookStore for MemoryStore {
    async fn create_webhook(
        &self,
        id: &str,
        organization: &str,
        name: &str,
        endpoint: &str,
        signing_key: &str,
    ) -> Result<WebhookEndpoint, StoreError> {
        let webhook = WebhookEndpoint {
            id: id.to_string(),
            organization: organization.to_string(),
            name: name.to_string(),
            endpoint: endpoint.to_string(),
            signing_key: signing_key.to_string(),
            last_success: None,
            error: None,
            created: Utc::now(),
        };
        self.inner.lock().await.webhooks.push(webhook.clone());
        Ok(webhook)
    }

    async fn list_webhooks(&self, organization: &str) -> Result<Vec<WebhookEndpoint>, StoreError> {
        let inner = self.inner.lock().await;
        Ok(inner
            .webhooks
            .iter()
            .filter(|w| w.organization == organization)
            .cloned()
            .collect())
    }

    async fn find_webhook(
        &self,
        id: &str,
        organization: &str,
    ) -> Result<Option<WebhookEndpoint>, StoreError> {
        let inner = self.inner.lock().await;
        Ok(inner
            .webhooks
            .iter()
            .find(|w| w.id == id && w.organization == organization)
            .cloned())
    }

    async fn delete_webhook(&self, id: &str, organization: &str) -> Result<bool, StoreError> {
        let mut inner = self.inner.lock().await;
        let before = inner.webhooks.len();
        inner
            .webhooks
            .retain(|w| !(w.id == id && w.organization == organization));
        Ok(inner.webhooks.len() < before)
    }

    async fn record_webhook_success(&self, id: &str, at: Timestamp) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().await;
        if let Some(webhook) = inner.webhooks.iter_mut().find(|w| w.id == id) {
            webhook.last_success = Some(at);
            webhook.error = None;
        }
        Ok(())
    }

    async fn record_webhook_error(&self, id: &str, error: &str) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().await;
        if let Some(webhook) = inner.webhooks.iter_mut().find(|w| w.id == id) {
            webhook.error = Some(error.to_string());
        }
        Ok(())
    }
}

#[async_trait]
impl DefinitionSource for MemoryStore {
    async fn metric(
        &self,
        id: &str,
        organization: &str,
    ) -> Result<Option<MetricDefinition>, StoreError> {
        let inner = self.inner.lock().await;
        Ok(inner
            .metrics
            .iter()
            .find(|m| m.id == id && m.organization == organization)
            .cloned())
    }

    async fn experiment(
        &self,
        id: &str,
        organization: &str,
    ) -> Result<Option<ExperimentDefinition>, StoreError> {
        let inner = self.inner.lock().await;
        Ok(inner
            .experiments
            .iter()
            .find(|e| e.id == id && e.organization == organization)
            .cloned())
    }
}
