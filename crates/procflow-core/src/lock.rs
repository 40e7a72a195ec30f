//! Mutual exclusion for scheduling passes.
//!
//! `JobLock` is non-blocking: a caller that cannot acquire it skips its work
//! instead of queueing. `LocalJobLock` only excludes callers inside one
//! process; deployments running several engine processes must supply a
//! distributed implementation.

use std::sync::{Arc, Mutex};

use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// Non-blocking lock guarding scheduling passes.
pub trait JobLock: Send + Sync {
    /// Try to acquire the lock. Returns `false` immediately when it is held.
    fn try_lock(&self) -> bool;

    /// Release the lock. Releasing an unheld lock is a no-op.
    fn unlock(&self);
}

/// Releases the wrapped lock when dropped, including on early return or error.
pub struct JobLockGuard<'a> {
    lock: &'a dyn JobLock,
}

impl<'a> JobLockGuard<'a> {
    /// Acquire `lock`, or return `None` when another caller holds it.
    pub fn try_acquire(lock: &'a dyn JobLock) -> Option<Self> {
        lock.try_lock().then_some(Self { lock })
    }
}

impl Drop for JobLockGuard<'_> {
    fn drop(&mut self) {
        self.lock.unlock();
    }
}

// ---------------------------------------------------------------------------
// LocalJobLock
// ---------------------------------------------------------------------------

/// In-process lock backed by a single-permit semaphore.
///
/// Not reentrant: a second `try_lock` while held fails, even from the same
/// task.
#[derive(Debug)]
pub struct LocalJobLock {
    semaphore: Arc<Semaphore>,
    permit: Mutex<Option<OwnedSemaphorePermit>>,
}

impl LocalJobLock {
    pub fn new() -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(1)),
            permit: Mutex::new(None),
        }
    }

    pub fn is_locked(&self) -> bool {
        self.semaphore.available_permits() == 0
    }
}

impl Default for LocalJobLock {
    fn default() -> Self {
        Self::new()
    }
}

impl JobLock for LocalJobLock {
    fn try_lock(&self) -> bool {
        match self.semaphore.clone().try_acquire_owned() {
            Ok(permit) => {
                let mut slot = self.permit.lock().unwrap_or_else(|e| e.into_inner());
                *slot = Some(permit);
                true
            }
            Err(_) => false,
        }
    }

    fn unlock(&self) {
        let mut slot = self.permit.lock().unwrap_or_else(|e| e.into_inner());
        slot.take();
    }
}
