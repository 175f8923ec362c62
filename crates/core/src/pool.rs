//! Bounded pool for blocking work
//!
//! Renderer invocations block on process I/O, so they run on tokio's blocking
//! threads. A semaphore bounds how many run at once; excess conversions wait
//! for a permit without occupying a thread.

use std::sync::Arc;

use tokio::sync::Semaphore;

use crate::error::{Error, Result};

#[derive(Debug, Clone)]
pub struct BlockingPool {
    permits: Arc<Semaphore>,
    max_concurrent: usize,
}

impl BlockingPool {
    /// Create a pool running at most `max_concurrent` jobs (minimum 1)
    pub fn new(max_concurrent: usize) -> Self {
        let max_concurrent = max_concurrent.max(1);
        Self {
            permits: Arc::new(Semaphore::new(max_concurrent)),
            max_concurrent,
        }
    }

    pub fn max_concurrent(&self) -> usize {
        self.max_concurrent
    }

    /// Jobs that could start right now without waiting
    pub fn available(&self) -> usize {
        self.permits.available_permits()
    }

    /// Run `job` on a blocking thread once a permit is free
    ///
    /// The permit travels with the job, so it is held until the job finishes
    /// even if the returned future is dropped first.
    pub async fn run<F, T>(&self, job: F) -> Result<T>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        let permit = Arc::clone(&self.permits)
            .acquire_owned()
            .await
            .map_err(|_| Error::Io("render pool is closed".to_string()))?;

        tokio::task::spawn_blocking(move || {
            let _permit = permit;
            job()
        })
        .await
        .map_err(|e| Error::Io(format!("render worker failed: {}", e)))
    }
}
