//! Lock manager: bounded, leased concurrency per job name.
//!
//! A lease covers one job identity. At most `max_concurrent` leases exist per
//! job name across every scheduler process sharing the [`LockStore`], and an
//! identity is never leased twice. Denial is immediate; the caller retries on
//! its next poll tick.
//!
//! Leases expire after the configured TTL so a crashed holder cannot keep a
//! slot forever. The TTL has to outlive the handler timeout: if a holder
//! stalls past the TTL (e.g. a frozen process), its lease is reclaimed and a
//! second instance of the same identity may start. Handlers stay correct in
//! that window because result writes are guarded by `run_started`.

use std::sync::Arc;
use std::time::Duration;

use abacus_db::models::lock::{LockLease, LockRequest};
use abacus_db::store::LockStore;
use abacus_db::StoreError;

/// Proof of a granted lease, consumed by [`LockManager::release`].
#[derive(Debug)]
#[must_use = "a lock handle must be released"]
pub struct LockHandle {
    lease: LockLease,
}

impl LockHandle {
    pub fn lease(&self) -> &LockLease {
        &self.lease
    }
}

#[derive(Clone)]
pub struct LockManager {
    store: Arc<dyn LockStore>,
    holder: String,
    ttl: Duration,
}

impl LockManager {
    pub fn new(store: Arc<dyn LockStore>, holder: impl Into<String>, ttl: Duration) -> Self {
        Self {
            store,
            holder: holder.into(),
            ttl,
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Try to lease `identity` under `job_name`'s limit.
    ///
    /// `Ok(None)` means denied: the identity is already running somewhere or
    /// the job name is at `max_concurrent`.
    pub async fn try_acquire(
        &self,
        job_name: &str,
        identity: &str,
        max_concurrent: u32,
    ) -> Result<Option<LockHandle>, StoreError> {
        let request = LockRequest {
            job_name: job_name.to_string(),
            identity: identity.to_string(),
            holder: self.holder.clone(),
            max_concurrent: max_concurrent.max(1),
            ttl: self.ttl,
        };
        let lease = self.store.try_acquire(&request).await?;
        match &lease {
            Some(lease) => tracing::debug!(
                job_name,
                identity,
                lease_id = %lease.id,
                expires_at = %lease.expires_at,
                "Lock acquired"
            ),
            None => tracing::debug!(job_name, identity, max_concurrent, "Lock denied"),
        }
        Ok(lease.map(|lease| LockHandle { lease }))
    }

    /// Release a lease. Returns `false` when it had already expired.
    pub async fn release(&self, handle: LockHandle) -> Result<bool, StoreError> {
        let released = self.store.release(handle.lease.id).await?;
        if !released {
            tracing::warn!(
                job_name = %handle.lease.job_name,
                identity = %handle.lease.identity,
                lease_id = %handle.lease.id,
                "Lock lease had already expired before release"
            );
        }
        Ok(released)
    }
}
