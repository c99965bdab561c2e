//! Per-group concurrency limits backed by FIFO semaphores.

use crate::semaphore::Semaphore;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

/// Registry of named concurrency groups.
///
/// Each group name owns one [`Semaphore`], created lazily with the capacity
/// supplied by the first caller. Later calls naming a different capacity are
/// ignored until [`reset`](Self::reset) deletes the cached entry; callers may
/// rely on a group's capacity staying stable once established.
///
/// The registry lock only guards the map itself. Semaphores are cloned out
/// before any waiting happens, so independent groups never contend.
#[derive(Debug, Default)]
pub struct GroupLimiter {
    groups: RwLock<HashMap<String, Arc<Semaphore>>>,
}

impl GroupLimiter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the group's semaphore, creating it on first use.
    ///
    /// A requested capacity of 0 defaults to 1: a group exists to serialize
    /// work, not to reject all of it.
    fn semaphore_for(&self, group: &str, max_concurrent: usize) -> Arc<Semaphore> {
        let mut groups = self.groups.write().unwrap();
        if let Some(sem) = groups.get(group) {
            return Arc::clone(sem);
        }

        let capacity = if max_concurrent == 0 { 1 } else { max_concurrent };
        let sem = Arc::new(Semaphore::new(capacity));
        groups.insert(group.to_string(), Arc::clone(&sem));
        tracing::debug!(group, capacity, "created limiter group");
        sem
    }

    /// Acquires one permit for `group`, waiting in FIFO order.
    ///
    /// Cancel by dropping the future, e.g. under `tokio::time::timeout`.
    pub async fn acquire(&self, group: &str, max_concurrent: usize) {
        let sem = self.semaphore_for(group, max_concurrent);
        sem.acquire().await;
    }

    /// Releases a previously acquired permit for `group`.
    ///
    /// Releasing a group that was never acquired is a safe no-op.
    pub fn release(&self, group: &str) {
        let sem = {
            let groups = self.groups.read().unwrap();
            groups.get(group).cloned()
        };
        if let Some(sem) = sem {
            sem.release();
        }
    }

    /// Drops the cached semaphore for `group`.
    ///
    /// The next `acquire` recreates the group, which is how a capacity
    /// change takes effect.
    pub fn reset(&self, group: &str) {
        let mut groups = self.groups.write().unwrap();
        if groups.remove(group).is_some() {
            tracing::debug!(group, "reset limiter group");
        }
    }
}
