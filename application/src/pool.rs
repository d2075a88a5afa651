use std::ops::Deref;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use dialogue_domain::DomainError;

/// Fixed-size pool of collaborator workers. Each worker fronts one loaded
/// model instance on the collaborator side, so capacity equals the worker
/// count; checkout suspends the caller until a worker is free and the
/// permit is released when the handle drops.
pub struct WorkerPool<P: ?Sized> {
    workers: Vec<Arc<P>>,
    semaphore: Arc<Semaphore>,
    next: AtomicUsize,
}

impl<P: ?Sized + Send + Sync> WorkerPool<P> {
    pub fn new(workers: Vec<Arc<P>>) -> Result<Self, DomainError> {
        if workers.is_empty() {
            return Err(DomainError::internal("worker pool needs at least one worker"));
        }
        let capacity = workers.len();
        Ok(Self {
            workers,
            semaphore: Arc::new(Semaphore::new(capacity)),
            next: AtomicUsize::new(0),
        })
    }

    pub fn capacity(&self) -> usize {
        self.workers.len()
    }

    pub async fn checkout(&self) -> Result<PooledWorker<P>, DomainError> {
        let permit = self
            .semaphore
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| DomainError::internal("worker pool closed"))?;
        let index = self.next.fetch_add(1, Ordering::Relaxed) % self.workers.len();
        Ok(PooledWorker {
            worker: Arc::clone(&self.workers[index]),
            _permit: permit,
        })
    }
}

/// Checked-out worker handle; returns its slot to the pool on drop.
pub struct PooledWorker<P: ?Sized> {
    worker: Arc<P>,
    _permit: OwnedSemaphorePermit,
}

impl<P: ?Sized> Deref for PooledWorker<P> {
    type Target = P;

    fn deref(&self) -> &P {
        &self.worker
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    use super::WorkerPool;

    struct CountingWorker {
        busy: AtomicUsize,
        peak: AtomicUsize,
    }

    impl CountingWorker {
        fn new() -> Self {
            Self {
                busy: AtomicUsize::new(0),
                peak: AtomicUsize::new(0),
            }
        }

        async fn work(&self) {
            let now = self.busy.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(5)).await;
            self.busy.fetch_sub(1, Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn checkout_bounds_concurrency_to_pool_capacity() {
        let shared = Arc::new(CountingWorker::new());
        let pool = Arc::new(
            WorkerPool::new(vec![Arc::clone(&shared), Arc::clone(&shared)])
                .expect("non-empty pool"),
        );

        let mut handles = Vec::new();
        for _ in 0..8 {
            let pool = Arc::clone(&pool);
            handles.push(tokio::spawn(async move {
                let worker = pool.checkout().await.expect("checkout");
                worker.work().await;
            }));
        }
        for handle in handles {
            handle.await.expect("task completes");
        }

        assert!(shared.peak.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test]
    async fn empty_pool_is_rejected() {
        let result: Result<WorkerPool<CountingWorker>, _> = WorkerPool::new(Vec::new());
        assert!(result.is_err());
    }
}
