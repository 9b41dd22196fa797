//! Bounded executor for outbound delivery jobs.
//!
//! Admission is bounded by `capacity` (queued + running) and rejected
//! beyond that; at most `workers` jobs run at once.

use std::{future::Future, sync::Arc};

use {
    tokio::sync::Semaphore,
    tokio_util::task::TaskTracker,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum PoolError {
    #[error("worker pool saturated ({capacity} jobs pending)")]
    Saturated { capacity: usize },
    #[error("worker pool is closed")]
    Closed,
}

pub struct WorkerPool {
    workers: Arc<Semaphore>,
    admission: Arc<Semaphore>,
    capacity: usize,
    tracker: TaskTracker,
}

impl WorkerPool {
    #[must_use]
    pub fn new(workers: usize, capacity: usize) -> Self {
        let workers = workers.max(1);
        let capacity = capacity.max(workers);
        Self {
            workers: Arc::new(Semaphore::new(workers)),
            admission: Arc::new(Semaphore::new(capacity)),
            capacity,
            tracker: TaskTracker::new(),
        }
    }

    /// Admit `job` or reject it immediately. Never waits.
    pub fn try_submit<F>(&self, job: F) -> Result<(), PoolError>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        if self.tracker.is_closed() {
            return Err(PoolError::Closed);
        }
        let admitted = Arc::clone(&self.admission)
            .try_acquire_owned()
            .map_err(|_| PoolError::Saturated {
                capacity: self.capacity,
            })?;
        let workers = Arc::clone(&self.workers);

        self.tracker.spawn(async move {
            let _admitted = admitted;
            let Ok(_running) = workers.acquire_owned().await else {
                return;
            };
            job.await;
        });
        Ok(())
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Jobs admitted and not yet finished.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.capacity - self.admission.available_permits()
    }

    /// Stop admitting new jobs.
    pub fn close(&self) {
        self.tracker.close();
    }

    /// Wait for every admitted job. Returns only after [`close`](Self::close).
    pub async fn wait(&self) {
        self.tracker.wait().await;
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {
        super::*,
        std::sync::atomic::{AtomicUsize, Ordering},
        tokio::sync::oneshot,
    };

    #[tokio::test]
    async fn rejects_beyond_capacity() {
        let pool = WorkerPool::new(1, 2);
        let (release_tx, release_rx) = oneshot::channel::<()>();

        pool.try_submit(async move {
            let _ = release_rx.await;
        })
        .unwrap();
        pool.try_submit(async {}).unwrap();

        assert_eq!(
            pool.try_submit(async {}),
            Err(PoolError::Saturated { capacity: 2 })
        );
        assert_eq!(pool.pending(), 2);

        release_tx.send(()).unwrap();
        pool.close();
        pool.wait().await;
        assert_eq!(pool.pending(), 0);
    }

    #[tokio::test]
    async fn limits_concurrency_to_worker_count() {
        let pool = WorkerPool::new(2, 16);
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        for _ in 0..8 {
            let running = Arc::clone(&running);
            let peak = Arc::clone(&peak);
            pool.try_submit(async move {
                let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::task::yield_now().await;
                tokio::time::sleep(std::time::Duration::from_millis(5)).await;
                running.fetch_sub(1, Ordering::SeqCst);
            })
            .unwrap();
        }

        pool.close();
        pool.wait().await;
        assert!(peak.load(Ordering::SeqCst) <= 2);
        assert!(peak.load(Ordering::SeqCst) >= 1);
    }

    #[tokio::test]
    async fn closed_pool_rejects() {
        let pool = WorkerPool::new(1, 1);
        pool.close();
        assert_eq!(pool.try_submit(async {}), Err(PoolError::Closed));
    }
}
