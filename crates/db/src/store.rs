//! Store traits the pipeline is written against.
//!
//! [`crate::PgStore`] implements all of them over Postgres;
//! [`crate::MemoryStore`] implements them in-process for tests and
//! single-node development. Definitions may come from a separate
//! [`DefinitionSource`] such as [`crate::FileDefinitions`].

use std::sync::Arc;

use abacus_core::stats::AnalysisSummary;
use abacus_core::types::{DbId, Timestamp};
use async_trait::async_trait;
use uuid::Uuid;

use crate::error::StoreError;
use crate::models::analysis::{AnalysisResult, AnalysisTarget, QueryRecord};
use crate::models::definition::{ExperimentDefinition, MetricDefinition};
use crate::models::job::{JobListQuery, NewJob, ScheduledJob};
use crate::models::lock::{LockLease, LockRequest};
use crate::models::webhook::WebhookEndpoint;

/// Durable job table.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Create or update the recurrence for `job.identity`. An unchanged
    /// schedule keeps its pending `next_run_at`.
    async fn register_recurring(&self, job: &NewJob) -> Result<ScheduledJob, StoreError>;

    /// Add a one-shot run, merging with a not-yet-started one of the same
    /// identity.
    async fn enqueue_once(&self, job: &NewJob) -> Result<ScheduledJob, StoreError>;

    async fn list_due(&self, now: Timestamp, limit: i64) -> Result<Vec<ScheduledJob>, StoreError>;

    /// Claim the occurrence that was due at `due_at` by setting `last_run_at`.
    /// Returns `false` when the row has moved on, i.e. another scheduler
    /// already ran that occurrence or it was rescheduled.
    async fn mark_started(
        &self,
        id: DbId,
        due_at: Timestamp,
        at: Timestamp,
    ) -> Result<bool, StoreError>;

    async fn record_success(
        &self,
        id: DbId,
        finished_at: Timestamp,
        next_run_at: Option<Timestamp>,
    ) -> Result<(), StoreError>;

    async fn record_failure(
        &self,
        id: DbId,
        finished_at: Timestamp,
        error: &str,
        next_run_at: Option<Timestamp>,
    ) -> Result<(), StoreError>;

    async fn find_job(&self, id: DbId) -> Result<Option<ScheduledJob>, StoreError>;

    async fn list_jobs(&self, params: &JobListQuery) -> Result<Vec<ScheduledJob>, StoreError>;

    /// Delete finished one-shot jobs that ended before `older_than`.
    async fn prune_finished(&self, older_than: Timestamp) -> Result<u64, StoreError>;
}

/// Shared lease table backing the lock manager.
#[async_trait]
pub trait LockStore: Send + Sync {
    /// Atomically check the identity and the per-name limit, then grant.
    async fn try_acquire(&self, req: &LockRequest) -> Result<Option<LockLease>, StoreError>;

    async fn release(&self, lease_id: Uuid) -> Result<bool, StoreError>;

    async fn active_leases(&self, job_name: &str) -> Result<Vec<LockLease>, StoreError>;
}

/// Latest analysis result per metric / experiment.
#[async_trait]
pub trait AnalysisStore: Send + Sync {
    /// Start a run: clear the previous outcome and return the stored
    /// `run_started`.
    async fn mark_run_started(
        &self,
        target: &AnalysisTarget,
        organization_id: &str,
        at: Timestamp,
    ) -> Result<Timestamp, StoreError>;

    /// Write the terminal outcome if `run_started` still matches. Returns
    /// `false` when a newer run has superseded this one.
    async fn save_result(
        &self,
        target: &AnalysisTarget,
        organization_id: &str,
        run_started: Timestamp,
        analysis: Option<&AnalysisSummary>,
        analysis_error: Option<&str>,
        queries: &[QueryRecord],
    ) -> Result<bool, StoreError>;

    async fn find_result(
        &self,
        target: &AnalysisTarget,
        organization_id: &str,
    ) -> Result<Option<AnalysisResult>, StoreError>;
}

/// Registered webhook endpoints and their delivery status.
#[async_trait]
pub trait WebhookStore: Send + Sync {
    async fn create_webhook(
        &self,
        id: &str,
        organization: &str,
        name: &str,
        endpoint: &str,
        signing_key: &str,
    ) -> Result<WebhookEndpoint, StoreError>;

    async fn list_webhooks(&self, organization: &str) -> Result<Vec<WebhookEndpoint>, StoreError>;

    async fn find_webhook(
        &self,
        id: &str,
        organization: &str,
    ) -> Result<Option<WebhookEndpoint>, StoreError>;

    async fn delete_webhook(&self, id: &str, organization: &str) -> Result<bool, StoreError>;

    async fn record_webhook_success(&self, id: &str, at: Timestamp) -> Result<(), StoreError>;

    async fn record_webhook_error(&self, id: &str, error: &str) -> Result<(), StoreError>;
}

/// Lookup of metric and experiment definitions.
#[async_trait]
pub trait DefinitionSource: Send + Sync {
    async fn metric(
        &self,
        id: &str,
        organization: &str,
    ) -> Result<Option<MetricDefinition>, StoreError>;

    async fn experiment(
        &self,
        id: &str,
        organization: &str,
    ) -> Result<Option<ExperimentDefinition>, StoreError>;
}

/// The set of stores a worker or API process runs against.
#[derive(Clone)]
pub struct Stores {
    pub jobs: Arc<dyn JobStore>,
    pub locks: Arc<dyn LockStore>,
    pub analysis: Arc<dyn AnalysisStore>,
    pub webhooks: Arc<dyn WebhookStore>,
    pub definitions: Arc<dyn DefinitionSource>,
}

impl Stores {
    /// Use one backend for every store.
    pub fn shared<S>(store: Arc<S>) -> Self
    where
        S: JobStore + LockStore + AnalysisStore + WebhookStore + DefinitionSource + 'static,
    {
        Self {
            jobs: store.clone(),
            locks: store.clone(),
            analysis: store.clone(),
            webhooks: store.clone(),
            definitions: store,
        }
    }

    /// Replace the definition source (e.g. with a YAML file).
    pub fn with_definitions(mut self, definitions: Arc<dyn DefinitionSource>) -> Self {
        self.definitions = definitions;
        self
    }
}
