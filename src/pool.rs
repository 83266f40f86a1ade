//! Sandbox pool manager
//!
//! Admission control for the most expensive resource in the system:
//! untrusted code execution slots. A bounded semaphore grants leases, a
//! lease table remembers who holds what, and a periodic sweep reclaims
//! leases whose holder crashed without releasing.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{Mutex, OwnedSemaphorePermit, Semaphore};
use tracing::{debug, warn};

use crate::error::EngineError;

/// A granted execution slot.
///
/// Leases are pool bookkeeping only; dropping one without calling
/// `release` leaves the slot to the TTL reclaimer.
#[derive(Debug, Clone)]
pub struct SandboxLease {
    pub id: u64,
    pub acquired_at: Instant,
}

struct LeaseEntry {
    acquired_at: Instant,
    // Slot frees when the entry (and with it the permit) is dropped
    _permit: OwnedSemaphorePermit,
}

/// Bounded pool of sandbox execution slots
pub struct SandboxPool {
    semaphore: Arc<Semaphore>,
    leases: Mutex<HashMap<u64, LeaseEntry>>,
    next_id: AtomicU64,
    capacity: usize,
    lease_ttl: Duration,
    enabled: bool,
}

impl SandboxPool {
    pub fn new(capacity: usize, lease_ttl: Duration, enabled: bool) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(capacity)),
            leases: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            capacity,
            lease_ttl,
            enabled,
        }
    }

    /// Block until a slot frees or the timeout elapses.
    ///
    /// With pooling disabled, grants an untracked lease immediately.
    pub async fn acquire(&self, timeout: Duration) -> Result<SandboxLease, EngineError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);

        if !self.enabled {
            return Ok(SandboxLease {
                id,
                acquired_at: Instant::now(),
            });
        }

        let permit = tokio::time::timeout(timeout, self.semaphore.clone().acquire_owned())
            .await
            .map_err(|_| EngineError::PoolTimeout(timeout))?
            .map_err(|_| EngineError::Internal("sandbox pool closed".into()))?;

        // TTL starts at grant; time spent queued is not the holder's
        let acquired_at = Instant::now();
        self.leases.lock().await.insert(
            id,
            LeaseEntry {
                acquired_at,
                _permit: permit,
            },
        );

        debug!(lease_id = id, "Sandbox lease granted");
        Ok(SandboxLease { id, acquired_at })
    }

    /// Return a slot to the pool. Releasing an already-released (or
    /// reclaimed) lease is a no-op.
    pub async fn release(&self, lease: &SandboxLease) {
        if !self.enabled {
            return;
        }
        if self.leases.lock().await.remove(&lease.id).is_some() {
            debug!(lease_id = lease.id, "Sandbox lease released");
        }
    }

    /// Force-release leases whose TTL has elapsed. Returns how many were
    /// reclaimed.
    pub async fn reclaim_expired(&self) -> usize {
        let mut table = self.leases.lock().await;
        let before = table.len();
        table.retain(|id, entry| {
            let expired = entry.acquired_at.elapsed() >= self.lease_ttl;
            if expired {
                warn!(lease_id = id, "Reclaiming expired sandbox lease");
            }
            !expired
        });
        before - table.len()
    }

    /// Number of currently granted leases
    pub async fn live_leases(&self) -> usize {
        self.leases.lock().await.len()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Periodic reclaim sweep, independent of request traffic
    pub fn spawn_reclaimer(self: &Arc<Self>, interval: Duration) -> tokio::task::JoinHandle<()> {
        let pool = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let reclaimed = pool.reclaim_expired().await;
                if reclaimed > 0 {
                    warn!(reclaimed, "Reclaimed leaked sandbox leases");
                }
            }
        })
    }
}
