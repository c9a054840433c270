//! Bounded blocking worker pool for validator scripts

use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PoolError {
    #[error("timed out after {0:?}")]
    Timeout(Duration),

    #[error("worker pool is shut down")]
    Closed,

    #[error("worker failed: {0}")]
    Worker(String),
}

/// Runs closures on the blocking thread pool, at most `max_concurrency` at
/// a time, each under a wall-clock limit.
///
/// The limit covers waiting for a permit as well as running. A job that
/// times out keeps its permit until the closure returns, so the closure is
/// handed the deadline and should stop on its own.
#[derive(Debug, Clone)]
pub struct WorkerPool {
    permits: Arc<Semaphore>,
    timeout: Duration,
}

impl WorkerPool {
    pub fn new(max_concurrency: usize, timeout: Duration) -> Self {
        Self {
            permits: Arc::new(Semaphore::new(max_concurrency.max(1))),
            timeout,
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn is_closed(&self) -> bool {
        self.permits.is_closed()
    }

    pub async fn run<F, T>(&self, job: F) -> Result<T, PoolError>
    where
        F: FnOnce(Instant) -> T + Send + 'static,
        T: Send + 'static,
    {
        let deadline = Instant::now() + self.timeout;
        let permits = Arc::clone(&self.permits);

        let work = async move {
            let permit = permits
                .acquire_owned()
                .await
                .map_err(|_| PoolError::Closed)?;
            tokio::task::spawn_blocking(move || {
                let _permit = permit;
                job(deadline)
            })
            .await
            .map_err(|e| PoolError::Worker(e.to_string()))
        };

        match tokio::time::timeout(self.timeout, work).await {
            Ok(result) => result,
            Err(_) => Err(PoolError::Timeout(self.timeout)),
        }
    }

    /// Refuse new jobs. Jobs already running finish normally.
    pub fn shutdown(&self) {
        self.permits.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn test_runs_job() {
        let pool = WorkerPool::new(2, Duration::from_secs(1));
        let value = pool.run(|_| 21 * 2).await.unwrap();
        assert_eq!(value, 42);
    }

    #[tokio::test]
    async fn test_job_sees_deadline() {
        let pool = WorkerPool::new(1, Duration::from_millis(500));
        let before = Instant::now();
        let deadline = pool.run(|deadline| deadline).await.unwrap();
        assert!(deadline > before);
        assert!(deadline <= before + Duration::from_millis(600));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_slow_job_times_out() {
        let pool = WorkerPool::new(1, Duration::from_millis(50));
        let result = pool
            .run(|_| std::thread::sleep(Duration::from_millis(300)))
            .await;
        assert_eq!(result, Err(PoolError::Timeout(Duration::from_millis(50))));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_concurrency_is_bounded() {
        let pool = WorkerPool::new(2, Duration::from_secs(5));
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let jobs = (0..6).map(|_| {
            let pool = pool.clone();
            let running = Arc::clone(&running);
            let peak = Arc::clone(&peak);
            async move {
                pool.run(move |_| {
                    let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    std::thread::sleep(Duration::from_millis(20));
                    running.fetch_sub(1, Ordering::SeqCst);
                })
                .await
            }
        });
        for result in futures_join(jobs).await {
            assert!(result.is_ok());
        }
        assert!(peak.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test]
    async fn test_shutdown_rejects_new_jobs() {
        let pool = WorkerPool::new(1, Duration::from_secs(1));
        pool.shutdown();
        assert!(pool.is_closed());
        assert_eq!(pool.run(|_| ()).await, Err(PoolError::Closed));
    }

    async fn futures_join<F, T>(jobs: impl Iterator<Item = F>) -> Vec<T>
    where
        F: std::future::Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        let handles: Vec<_> = jobs.map(tokio::spawn).collect();
        let mut out = Vec::with_capacity(handles.len());
        for handle in handles {
            out.push(handle.await.unwrap());
        }
        out
    }
}
