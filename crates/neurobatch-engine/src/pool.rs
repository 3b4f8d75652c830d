//! Semaphore-based worker pool for batch concurrency control.
//!
//! The [`WorkerPool`] limits the number of concurrently running jobs to
//! the configured slot count. It issues permits via a Tokio semaphore and
//! tracks which subjects currently hold a slot, along with a peak-active
//! watermark used by the batch report and the concurrency-bound tests.

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use tokio::sync::{OwnedSemaphorePermit, RwLock, Semaphore};
use tracing::{debug, info};

/// Default maximum number of concurrent jobs.
const DEFAULT_MAX_JOBS: usize = 4;

/// A permit granting the right to run one job.
///
/// When dropped, the permit is automatically returned to the pool.
pub struct PoolPermit {
    _permit: OwnedSemaphorePermit,
}

/// Semaphore-based concurrency pool for batch jobs.
pub struct WorkerPool {
    semaphore: Arc<Semaphore>,
    max_jobs: usize,
    /// Subjects currently holding a slot.
    running: Arc<RwLock<HashSet<String>>>,
    /// Highest number of simultaneously registered subjects seen so far.
    peak_active: AtomicUsize,
}

impl WorkerPool {
    /// Create a new pool with the given slot count.
    pub fn new(max_jobs: usize) -> Self {
        let limit = if max_jobs == 0 {
            DEFAULT_MAX_JOBS
        } else {
            max_jobs
        };

        info!(max_jobs = limit, "WorkerPool created");

        Self {
            semaphore: Arc::new(Semaphore::new(limit)),
            max_jobs: limit,
            running: Arc::new(RwLock::new(HashSet::new())),
            peak_active: AtomicUsize::new(0),
        }
    }

    /// Acquire a permit to run a job.
    ///
    /// Returns `None` if a permit cannot be acquired immediately (pool full).
    pub fn try_acquire(&self) -> Option<PoolPermit> {
        let permit = Arc::clone(&self.semaphore).try_acquire_owned().ok()?;
        Some(PoolPermit { _permit: permit })
    }

    /// Acquire a permit, waiting until a slot becomes free.
    pub async fn acquire(&self) -> Result<PoolPermit, PoolError> {
        let permit = Arc::clone(&self.semaphore)
            .acquire_owned()
            .await
            .map_err(|_| PoolError::Closed)?;
        Ok(PoolPermit { _permit: permit })
    }

    /// Record a subject as running. Called after its permit is acquired.
    pub async fn register(&self, subject: &str) {
        debug!(subject, "Registering job in pool");
        let active = {
            let mut running = self.running.write().await;
            running.insert(subject.to_string());
            running.len()
        };
        self.peak_active.fetch_max(active, Ordering::SeqCst);
    }

    /// Remove a subject from the running set once its job reaches a
    /// terminal state.
    pub async fn unregister(&self, subject: &str) {
        debug!(subject, "Unregistering job from pool");
        self.running.write().await.remove(subject);
    }

    /// Subjects currently holding a slot.
    pub async fn running_ids(&self) -> Vec<String> {
        self.running.read().await.iter().cloned().collect()
    }

    /// Number of currently registered jobs.
    pub async fn active_count(&self) -> usize {
        self.running.read().await.len()
    }

    /// Highest number of simultaneously running jobs observed so far.
    pub fn peak_active(&self) -> usize {
        self.peak_active.load(Ordering::SeqCst)
    }

    /// Configured slot count.
    pub const fn max_jobs(&self) -> usize {
        self.max_jobs
    }

    /// Number of free slots remaining.
    pub fn available_permits(&self) -> usize {
        self.semaphore.available_permits()
    }
}

impl Default for WorkerPool {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_JOBS)
    }
}

/// Errors from the worker pool.
#[derive(Debug, thiserror::Error)]
pub enum PoolError {
    /// The semaphore was closed (pool shut down).
    #[error("Worker pool has been closed")]
    Closed,
}

#[cfg(test)]
#[allow(clippy::panic, clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn pool_default_slot_count() {
        let pool = WorkerPool::default();
        assert_eq!(pool.max_jobs(), DEFAULT_MAX_JOBS);
        assert_eq!(pool.available_permits(), DEFAULT_MAX_JOBS);
    }

    #[tokio::test]
    async fn pool_custom_slot_count() {
        let pool = WorkerPool::new(3);
        assert_eq!(pool.max_jobs(), 3);
        assert_eq!(pool.available_permits(), 3);
    }

    #[tokio::test]
    async fn pool_zero_uses_default() {
        let pool = WorkerPool::new(0);
        assert_eq!(pool.max_jobs(), DEFAULT_MAX_JOBS);
    }

    #[tokio::test]
    #[allow(clippy::significant_drop_tightening)]
    async fn try_acquire_succeeds_when_available() {
        let pool = WorkerPool::new(2);
        let permit1 = pool.try_acquire();
        assert!(permit1.is_some());
        assert_eq!(pool.available_permits(), 1);

        let permit2 = pool.try_acquire();
        assert!(permit2.is_some());
        assert_eq!(pool.available_permits(), 0);

        // Third should fail
        let permit3 = pool.try_acquire();
        assert!(permit3.is_none());
        drop((permit1, permit2, permit3));
    }

    #[tokio::test]
    async fn permit_returned_on_drop() {
        let pool = WorkerPool::new(1);

        {
            let _permit = pool.try_acquire().unwrap();
            assert_eq!(pool.available_permits(), 0);
        }
        // Permit dropped
        assert_eq!(pool.available_permits(), 1);
    }

    #[tokio::test]
    async fn acquire_waits_for_permit() {
        let pool = Arc::new(WorkerPool::new(1));

        let permit = pool.try_acquire().unwrap();
        assert_eq!(pool.available_permits(), 0);

        let pool_clone = Arc::clone(&pool);
        let handle = tokio::spawn(async move {
            // This should wait until the permit is released
            pool_clone.acquire().await.unwrap();
        });

        // Drop permit to unblock
        drop(permit);

        // The spawned task should complete
        tokio::time::timeout(std::time::Duration::from_millis(100), handle)
            .await
            .expect("acquire should complete after permit released")
            .unwrap();
    }

    #[tokio::test]
    async fn register_and_unregister_track_running_set() {
        let pool = WorkerPool::new(5);

        pool.register("sub01").await;
        assert_eq!(pool.active_count().await, 1);

        pool.register("sub02").await;
        let mut ids = pool.running_ids().await;
        ids.sort();
        assert_eq!(ids, vec!["sub01", "sub02"]);

        pool.unregister("sub01").await;
        assert_eq!(pool.active_count().await, 1);
        pool.unregister("sub02").await;
        assert_eq!(pool.active_count().await, 0);
    }

    #[tokio::test]
    async fn peak_watermark_survives_unregister() {
        let pool = WorkerPool::new(5);

        pool.register("a").await;
        pool.register("b").await;
        pool.register("c").await;
        pool.unregister("a").await;
        pool.unregister("b").await;
        pool.unregister("c").await;

        assert_eq!(pool.active_count().await, 0);
        assert_eq!(pool.peak_active(), 3);
    }

    #[tokio::test]
    async fn unregister_nonexistent_is_harmless() {
        let pool = WorkerPool::new(5);
        pool.unregister("nonexistent").await;
        assert_eq!(pool.active_count().await, 0);
    }
}
