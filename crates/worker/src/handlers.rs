//! Handlers for the three pipeline job kinds.

use std::sync::Arc;

use abacus_core::jobs::{JobData, JobKind};
use abacus_db::models::analysis::AnalysisTarget;
use abacus_db::store::AnalysisStore;
use abacus_events::WebhookDispatcher;
use async_trait::async_trait;

use crate::analysis::{AnalysisRunner, RunnerError};
use crate::queue::JobQueue;
use crate::registry::{JobError, JobHandler};

fn unexpected(kind: JobKind, data: &JobData) -> JobError {
    JobError::new(format!("{kind} handler received a {} job", data.kind()))
}

impl From<RunnerError> for JobError {
    fn from(e: RunnerError) -> Self {
        JobError::new(e.to_string())
    }
}

// ---------------------------------------------------------------------------
// updateExperimentResults
// ---------------------------------------------------------------------------

/// Recomputes an experiment, then queues a `webhooks` job for it.
///
/// A failed analysis fails the job with the analysis error and queues
/// nothing, so receivers never see error states.
pub struct UpdateExperimentResults {
    runner: AnalysisRunner,
    queue: JobQueue,
}

impl UpdateExperimentResults {
    pub fn new(runner: AnalysisRunner, queue: JobQueue) -> Self {
        Self { runner, queue }
    }
}

#[async_trait]
impl JobHandler for UpdateExperimentResults {
    async fn run(&self, data: &JobData) -> Result<(), JobError> {
        let JobData::UpdateExperimentResults(job) = data else {
            return Err(unexpected(JobKind::UpdateExperimentResults, data));
        };

        let result = self
            .runner
            .run(&AnalysisTarget::experiment(&job.id), &job.organization_id)
            .await?;
        if let Some(error) = result.analysis_error {
            return Err(JobError::new(error));
        }

        self.queue
            .now(&JobData::webhooks(&job.id, &job.organization_id))
            .await
            .map_err(|e| JobError::new(format!("Failed to queue webhooks: {e}")))?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// updateMetrics
// ---------------------------------------------------------------------------

pub struct UpdateMetrics {
    runner: AnalysisRunner,
}

impl UpdateMetrics {
    pub fn new(runner: AnalysisRunner) -> Self {
        Self { runner }
    }
}

#[async_trait]
impl JobHandler for UpdateMetrics {
    async fn run(&self, data: &JobData) -> Result<(), JobError> {
        let JobData::UpdateMetrics(job) = data else {
            return Err(unexpected(JobKind::UpdateMetrics, data));
        };

        let result = self
            .runner
            .run(&AnalysisTarget::metric(&job.id), &job.organization_id)
            .await?;
        match result.analysis_error {
            Some(error) => Err(JobError::new(error)),
            None => Ok(()),
        }
    }
}

// ---------------------------------------------------------------------------
// webhooks
// ---------------------------------------------------------------------------

/// Delivers the stored experiment result to the organization's endpoints.
///
/// The result is re-read at run time; one that is missing is an error, one
/// that is in flight or failed is skipped.
pub struct Webhooks {
    results: Arc<dyn AnalysisStore>,
    dispatcher: WebhookDispatcher,
}

impl Webhooks {
    pub fn new(results: Arc<dyn AnalysisStore>, dispatcher: WebhookDispatcher) -> Self {
        Self {
            results,
            dispatcher,
        }
    }
}

#[async_trait]
impl JobHandler for Webhooks {
    async fn run(&self, data: &JobData) -> Result<(), JobError> {
        let JobData::Webhooks(job) = data else {
            return Err(unexpected(JobKind::Webhooks, data));
        };

        let target = AnalysisTarget::experiment(&job.id);
        let result = self
            .results
            .find_result(&target, &job.organization_id)
            .await?
            .ok_or_else(|| JobError::new(format!("No analysis stored for {target}")))?;

        if !result.is_success() {
            tracing::info!(
                %target,
                organization_id = %job.organization_id,
                "Latest analysis is not a success, skipping webhooks"
            );
            return Ok(());
        }

        self.dispatcher
            .dispatch(&result, &job.organization_id)
            .await
            .map_err(|e| JobError::new(e.to_string()))?;
        Ok(())
    }
}
