//! Job lock leases.

use std::time::Duration;

use abacus_core::types::Timestamp;
use serde::Serialize;
use sqlx::FromRow;
use uuid::Uuid;

/// A request to hold one slot of `job_name`'s concurrency limit for
/// `identity`.
#[derive(Debug, Clone)]
pub struct LockRequest {
    pub job_name: String,
    pub identity: String,
    /// Scheduler instance asking for the lease.
    pub holder: String,
    pub max_concurrent: u32,
    pub ttl: Duration,
}

/// A granted lease, a row from the `job_locks` table.
#[derive(Debug, Clone, PartialEq, Eq, FromRow, Serialize)]
pub struct LockLease {
    pub id: Uuid,
    pub job_name: String,
    pub identity: String,
    pub holder: String,
    pub acquired_at: Timestamp,
    pub expires_at: Timestamp,
}
