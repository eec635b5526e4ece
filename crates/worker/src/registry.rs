//! Job registry: the handler table keyed by [`JobKind`].

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use abacus_core::jobs::{JobData, JobKind};
use async_trait::async_trait;

/// A handler failure, recorded verbatim as the job's `last_error`.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{0}")]
pub struct JobError(pub String);

impl JobError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

impl From<abacus_db::StoreError> for JobError {
    fn from(e: abacus_db::StoreError) -> Self {
        Self(e.to_string())
    }
}

/// The work bound to one job kind.
///
/// Handlers may be abandoned mid-flight when they exceed the scheduler's
/// timeout, so any state they write must tolerate a newer run having
/// started in the meantime.
#[async_trait]
pub trait JobHandler: Send + Sync {
    async fn run(&self, data: &JobData) -> Result<(), JobError>;
}

#[derive(Default, Clone)]
pub struct JobRegistry {
    handlers: HashMap<JobKind, Arc<dyn JobHandler>>,
}

impl fmt::Debug for JobRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobRegistry")
            .field("kinds", &self.kinds())
            .finish()
    }
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind `handler` to `kind`, replacing any previous binding.
    pub fn register(&mut self, kind: JobKind, handler: Arc<dyn JobHandler>) -> &mut Self {
        self.handlers.insert(kind, handler);
        self
    }

    pub fn handler(&self, kind: JobKind) -> Option<Arc<dyn JobHandler>> {
        self.handlers.get(&kind).cloned()
    }

    /// Registered kinds, in [`JobKind::ALL`] order.
    pub fn kinds(&self) -> Vec<JobKind> {
        JobKind::ALL
            .into_iter()
            .filter(|kind| self.handlers.contains_key(kind))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Noop;

    #[async_trait]
    impl JobHandler for Noop {
        async fn run(&self, _data: &JobData) -> Result<(), JobError> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn registered_handler_is_found() {
        let mut registry = JobRegistry::new();
        registry.register(JobKind::UpdateMetrics, Arc::new(Noop));

        let handler = registry.handler(JobKind::UpdateMetrics).unwrap();
        assert!(handler
            .run(&JobData::update_metrics("met_1", "org_1"))
            .await
            .is_ok());
        assert!(registry.handler(JobKind::Webhooks).is_none());
        assert_eq!(registry.kinds(), vec![JobKind::UpdateMetrics]);
    }
}
