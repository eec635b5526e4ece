use std::sync::Arc;

use abacus_db::store::Stores;
use abacus_worker::JobQueue;

use crate::config::ServerConfig;

/// Shared application state available to all Axum handlers via `State<AppState>`.
#[derive(Clone)]
pub struct AppState {
    pub stores: Stores,
    /// Submits jobs with the same lock limits the workers use.
    pub queue: JobQueue,
    pub config: Arc<ServerConfig>,
    /// Postgres pool for health checks; `None` with in-memory stores.
    pub pool: Option<abacus_db::DbPool>,
}

impl AppState {
    pub fn new(stores: Stores, config: ServerConfig, pool: Option<abacus_db::DbPool>) -> Self {
        let queue = JobQueue::new(stores.jobs.clone(), config.default_lock_limit);
        Self {
            stores,
            queue,
            config: Arc::new(config),
            pool,
        }
    }
}
