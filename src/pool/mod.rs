//! Bounded worker pool: a fixed-size concurrency gate over `tokio::spawn`.
//!
//! The example pack has no direct `Semaphore`-based pool precedent; this is
//! the idiomatic-Tokio stand-in for the original's `ants.Pool` (see
//! `original_source/scheduler/implement/cron.go`), chosen for the same
//! design intent — bounded concurrency with non-blocking admission — using
//! `tokio::sync::Semaphore::try_acquire_owned` rather than a blocking
//! submit.

use crate::error::{PoolError, Result};
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Semaphore;

/// A bounded set of worker slots. `submit` never blocks: it either spawns
/// immediately or returns [`PoolError::Full`].
pub struct WorkerPool {
    semaphore: Arc<Semaphore>,
    closed: Arc<AtomicBool>,
}

impl WorkerPool {
    /// `size` is the maximum number of concurrently-running submissions.
    pub fn new(size: usize) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(size)),
            closed: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Submit `task` for execution. Returns immediately after either
    /// spawning it or rejecting it; does not wait for `task` to complete.
    pub fn submit<F>(&self, task: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        if self.closed.load(Ordering::Acquire) {
            return Err(PoolError::Closed.into());
        }

        let permit = match self.semaphore.clone().try_acquire_owned() {
            Ok(permit) => permit,
            Err(_) => return Err(PoolError::Full.into()),
        };

        tokio::spawn(async move {
            task.await;
            drop(permit);
        });

        Ok(())
    }

    /// Reject further submissions. In-flight work continues to run to
    /// completion; cancellation of running jobs is the caller's
    /// responsibility (the scheduler cancels `schedulerCtx` separately).
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    #[tokio::test]
    async fn admits_up_to_size_concurrently() {
        let pool = WorkerPool::new(2);
        let running = Arc::new(AtomicUsize::new(0));
        let max_seen = Arc::new(AtomicUsize::new(0));

        for _ in 0..2 {
            let running = running.clone();
            let max_seen = max_seen.clone();
            pool.submit(async move {
                let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                max_seen.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(50)).await;
                running.fetch_sub(1, Ordering::SeqCst);
            })
            .unwrap();
        }

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(pool.submit(async {}).is_err(), true);

        tokio::time::sleep(Duration::from_millis(80)).await;
        assert_eq!(max_seen.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn closed_pool_rejects_submit() {
        let pool = WorkerPool::new(4);
        pool.close();
        let result = pool.submit(async {});
        assert!(matches!(
            result,
            Err(crate::error::Error::Pool(PoolError::Closed))
        ));
    }
}
