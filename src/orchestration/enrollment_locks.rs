//! Per-enrollment serialization
//!
//! Every read-modify-write of one enrollment (override merge, failed-channel
//! append, counters, healing history) runs while holding that enrollment's
//! async mutex. Entries are dropped from the map once nobody holds or waits on
//! them, so the map only grows with in-flight enrollments.

use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;

#[derive(Debug, Clone, Default)]
pub struct EnrollmentLocks {
    locks: Arc<DashMap<Uuid, Arc<Mutex<()>>>>,
}

impl EnrollmentLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to one enrollment
    pub async fn lock(&self, enrollment_id: Uuid) -> EnrollmentGuard {
        let mutex = self
            .locks
            .entry(enrollment_id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();

        let guard = mutex.lock_owned().await;
        EnrollmentGuard {
            enrollment_id,
            guard: Some(guard),
            locks: Arc::clone(&self.locks),
        }
    }

    /// Enrollments with a live or contended lock
    pub fn active(&self) -> usize {
        self.locks.len()
    }
}

pub struct EnrollmentGuard {
    enrollment_id: Uuid,
    guard: Option<OwnedMutexGuard<()>>,
    locks: Arc<DashMap<Uuid, Arc<Mutex<()>>>>,
}

impl std::fmt::Debug for EnrollmentGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EnrollmentGuard")
            .field("enrollment_id", &self.enrollment_id)
            .finish()
    }
}

impl Drop for EnrollmentGuard {
    fn drop(&mut self) {
        drop(self.guard.take());
        // Only the map's own reference left: nobody holds or waits
        self.locks
            .remove_if(&self.enrollment_id, |_, mutex| Arc::strong_count(mutex) == 1);
    }
}
