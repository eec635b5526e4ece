//! Postgres-backed implementation of the store traits.

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
use crate::repositories::{AnalysisRepo, DefinitionRepo, JobRepo, LockRepo, WebhookRepo};
use crate::store::{AnalysisStore, DefinitionSource, JobStore, LockStore, WebhookStore};
use crate::DbPool;

/// Delegates every store operation to the `*Repo` structs.
#[derive(Debug, Clone)]
pub struct PgStore {
    pool: DbPool,
}

impl PgStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &DbPool {
        &self.pool
    }
}

#[async_trait]
impl JobStore for PgStore {
    async fn register_recurring(&self, job: &NewJob) -> Result<ScheduledJob, StoreError> {
        Ok(JobRepo::register_recurring(&self.pool, job).await?)
    }

    async fn enqueue_once(&self, job: &NewJob) -> Result<ScheduledJob, StoreError> {
        Ok(JobRepo::enqueue_once(&self.pool, job).await?)
    }

    async fn list_due(&self, now: Timestamp, limit: i64) -> Result<Vec<ScheduledJob>, StoreError> {
        Ok(JobRepo::list_due(&self.pool, now, limit).await?)
    }

    async fn mark_started(
        &self,
        id: DbId,
        due_at: Timestamp,
        at: Timestamp,
    ) -> Result<bool, StoreError> {
        Ok(JobRepo::mark_started(&self.pool, id, due_at, at).await?)
    }

    async fn record_success(
        &self,
        id: DbId,
        finished_at: Timestamp,
        next_run_at: Option<Timestamp>,
    ) -> Result<(), StoreError> {
        Ok(JobRepo::record_success(&self.pool, id, finished_at, next_run_at).await?)
    }

    async fn record_failure(
        &self,
        id: DbId,
        finished_at: Timestamp,
        error: &str,
        next_run_at: Option<Timestamp>,
    ) -> Result<(), StoreError> {
        Ok(JobRepo::record_failure(&self.pool, id, finished_at, error, next_run_at).await?)
    }

    async fn find_job(&self, id: DbId) -> Result<Option<ScheduledJob>, StoreError> {
        Ok(JobRepo::find_by_id(&self.pool, id).await?)
    }

    async fn list_jobs(&self, params: &JobListQuery) -> Result<Vec<ScheduledJob>, StoreError> {
        Ok(JobRepo::list(&self.pool, params).await?)
    }

    async fn prune_finished(&self, older_than: Timestamp) -> Result<u64, StoreError> {
        Ok(JobRepo::prune_finished(&self.pool, older_than).await?)
    }
}

#[async_trait]
impl LockStore for PgStore {
    async fn try_acquire(&self, req: &LockRequest) -> Result<Option<LockLease>, StoreError> {
        Ok(LockRepo::try_acquire(&self.pool, req).await?)
    }

    async fn release(&self, lease_id: Uuid) -> Result<bool, StoreError> {
        Ok(LockRepo::release(&self.pool, lease_id).await?)
    }

    async fn active_leases(&self, job_name: &str) -> Result<Vec<LockLease>, StoreError> {
        Ok(LockRepo::list_active(&self.pool, job_name).await?)
    }
}

#[async_trait]
impl AnalysisStore for PgStore {
    async fn mark_run_started(
        &self,
        target: &AnalysisTarget,
        organization_id: &str,
        at: Timestamp,
    ) -> Result<Timestamp, StoreError> {
        Ok(AnalysisRepo::mark_run_started(&self.pool, target, organization_id, at).await?)
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
        Ok(AnalysisRepo::save_result(
            &self.pool,
            target,
            organization_id,
            run_started,
            analysis,
            analysis_error,
            queries,
        )
        .await?)
    }

    async fn find_result(
        &self,
        target: &AnalysisTarget,
        organization_id: &str,
    ) -> Result<Option<AnalysisResult>, StoreError> {
        Ok(AnalysisRepo::find(&self.pool, target, organization_id).await?)
    }
}

#[async_trait]
impl WebhookStore for PgStore {
    async fn create_webhook(
        &self,
        id: &str,
        organization: &str,
        name: &str,
        endpoint: &str,
        signing_key: &str,
    ) -> Result<WebhookEndpoint, StoreError> {
        Ok(WebhookRepo::create(&self.pool, id, organization, name, endpoint, signing_key).await?)
    }

    async fn list_webhooks(&self, organization: &str) -> Result<Vec<WebhookEndpoint>, StoreError> {
        Ok(WebhookRepo::list_by_organization(&self.pool, organization).await?)
    }

    async fn find_webhook(
        &self,
        id: &str,
        organization: &str,
    ) -> Result<Option<WebhookEndpoint>, StoreError> {
        Ok(WebhookRepo::find(&self.pool, id, organization).await?)
    }

    async fn delete_webhook(&self, id: &str, organization: &str) -> Result<bool, StoreError> {
        Ok(WebhookRepo::delete(&self.pool, id, organization).await?)
    }

    async fn record_webhook_success(&self, id: &str, at: Timestamp) -> Result<(), StoreError> {
        Ok(WebhookRepo::record_success(&self.pool, id, at).await?)
    }

    async fn record_webhook_error(&self, id: &str, error: &str) -> Result<(), StoreError> {
        Ok(WebhookRepo::record_error(&self.pool, id, error).await?)
    }
}

#[async_trait]
impl DefinitionSource for PgStore {
    async fn metric(
        &self,
        id: &str,
        organization: &str,
    ) -> Result<Option<MetricDefinition>, StoreError> {
        Ok(DefinitionRepo::find_metric(&self.pool, id, organization).await?)
    }

    async fn experiment(
        &self,
        id: &str,
        organization: &str,
    ) -> Result<Option<ExperimentDefinition>, StoreError> {
        Ok(DefinitionRepo::find_experiment(&self.pool, id, organization).await?)
    }
}
