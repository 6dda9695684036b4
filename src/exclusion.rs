//! Mutual exclusion over shared resource keys.
//!
//! The host engine runs executions on its own parallel thread pool; this
//! module only layers exclusion constraints on top. Any two executions
//! whose key sets intersect never run their bodies concurrently, while
//! disjoint executions stay fully parallel.

use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::{Condvar, Mutex};

use crate::key::PermitKey;

/// One exclusive permit per resource key.
#[derive(Default)]
struct Permit {
    held: Mutex<bool>,
    released: Condvar,
}

impl Permit {
    /// Block the calling thread until the permit is free, then take it.
    fn acquire(&self) {
        let mut held = self.held.lock();
        while *held {
            self.released.wait(&mut held);
        }
        *held = true;
    }

    fn release(&self) {
        let mut held = self.held.lock();
        *held = false;
        drop(held);
        self.released.notify_one();
    }
}

/// Serializes executions whose resource-key sets overlap.
///
/// Permits are acquired in the canonical [`PermitKey`] order, so any two
/// executions that need overlapping keys always attempt the shared ones in
/// the same relative order — no circular wait is possible.
#[derive(Default)]
pub struct ExclusionCoordinator {
    permits: DashMap<PermitKey, Arc<Permit>>,
}

impl ExclusionCoordinator {
    /// Create a coordinator with no permits outstanding.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquire one exclusive permit per key, blocking until all are held.
    ///
    /// Keys are sorted and deduplicated first; the returned guard releases
    /// the permits in reverse acquisition order when dropped, on every exit
    /// path including panics.
    pub fn acquire(&self, mut keys: Vec<PermitKey>) -> PermitGuard {
        keys.sort();
        keys.dedup();
        let mut held = Vec::with_capacity(keys.len());
        for key in keys {
            // Clone the Arc and leave the map before blocking: waiting on
            // the permit while holding a shard lock would stall unrelated
            // acquisitions hashed to the same shard.
            let permit = {
                let entry = self
                    .permits
                    .entry(key.clone())
                    .or_insert_with(|| Arc::new(Permit::default()));
                Arc::clone(entry.value())
            };
            tracing::trace!(key = %key, "acquiring permit");
            permit.acquire();
            held.push(permit);
        }
        PermitGuard { held }
    }

    /// Number of keys a permit has ever been created for.
    #[must_use]
    pub fn permit_count(&self) -> usize {
        self.permits.len()
    }
}

impl std::fmt::Debug for ExclusionCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExclusionCoordinator")
            .field("permit_count", &self.permits.len())
            .finish()
    }
}

/// RAII holder of acquired permits.
///
/// Dropping the guard releases every permit in reverse acquisition order,
/// unconditionally.
pub struct PermitGuard {
    held: Vec<Arc<Permit>>,
}

impl Drop for PermitGuard {
    fn drop(&mut self) {
        for permit in self.held.drain(..).rev() {
            permit.release();
        }
    }
}

impl std::fmt::Debug for PermitGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PermitGuard")
            .field("held", &self.held.len())
            .finish()
    }
}
