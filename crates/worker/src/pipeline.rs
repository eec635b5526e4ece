//! Wiring of one scheduler process.
//!
//! Everything is constructed explicitly from a [`WorkerConfig`] and a set of
//! [`Stores`]; there is no process-wide scheduler instance.

use std::sync::Arc;

use abacus_core::jobs::JobKind;
use abacus_db::store::Stores;
use abacus_events::{WebhookDelivery, WebhookDispatcher, WebhookError};

use crate::analysis::{AnalysisRunner, DataSourceRegistry};
use crate::config::WorkerConfig;
use crate::handlers::{UpdateExperimentResults, UpdateMetrics, Webhooks};
use crate::lock::LockManager;
use crate::queue::JobQueue;
use crate::registry::JobRegistry;
use crate::scheduler::{Scheduler, SchedulerConfig};

impl From<&WorkerConfig> for SchedulerConfig {
    fn from(config: &WorkerConfig) -> Self {
        Self {
            poll_interval: config.poll_interval,
            worker_slots: config.worker_slots,
            batch_size: config.batch_size,
            job_timeout: config.job_timeout,
            finished_job_retention: config.finished_job_retention,
            ..Self::default()
        }
    }
}

/// A fully wired scheduler plus the pieces tests and bootstrap reach into.
pub struct Pipeline {
    pub scheduler: Scheduler,
    pub runner: AnalysisRunner,
    pub dispatcher: WebhookDispatcher,
}

impl Pipeline {
    /// Build the registry with all three handlers and the scheduler around it.
    pub fn build(
        config: &WorkerConfig,
        stores: Stores,
        sources: DataSourceRegistry,
    ) -> Result<Self, WebhookError> {
        let queue = JobQueue::new(stores.jobs.clone(), config.default_lock_limit);
        let locks = LockManager::new(
            stores.locks.clone(),
            config.instance_id.clone(),
            config.lock_ttl,
        );
        let runner = AnalysisRunner::new(
            stores.analysis.clone(),
            stores.definitions.clone(),
            Arc::new(sources),
            config.query_timeout,
        );
        let dispatcher = WebhookDispatcher::new(
            stores.webhooks.clone(),
            WebhookDelivery::new(config.webhook_timeout)?,
        );

        let mut registry = JobRegistry::new();
        registry
            .register(
                JobKind::UpdateExperimentResults,
                Arc::new(UpdateExperimentResults::new(runner.clone(), queue.clone())),
            )
            .register(
                JobKind::UpdateMetrics,
                Arc::new(UpdateMetrics::new(runner.clone())),
            )
            .register(
                JobKind::Webhooks,
                Arc::new(Webhooks::new(stores.analysis.clone(), dispatcher.clone())),
            );

        let scheduler = Scheduler::new(
            stores.jobs,
            queue,
            locks,
            registry,
            SchedulerConfig::from(config),
        );

        Ok(Self {
            scheduler,
            runner,
            dispatcher,
        })
    }
}
