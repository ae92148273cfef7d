//! Bounded run pool
//!
//! Caps how many runs execute at once and how many can wait. A submission
//! beyond workers + backlog is rejected immediately rather than queued
//! without bound.

use std::future::Future;
use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::JoinHandle;

use crate::errors::{ChainflowError, Result};

pub struct RunPool {
    workers: Arc<Semaphore>,
    slots: Arc<Semaphore>,
    worker_count: usize,
    backlog: usize,
}

impl RunPool {
    /// `workers` concurrent runs, up to `backlog` more waiting.
    pub fn new(workers: usize, backlog: usize) -> Self {
        Self {
            workers: Arc::new(Semaphore::new(workers)),
            slots: Arc::new(Semaphore::new(workers + backlog)),
            worker_count: workers,
            backlog,
        }
    }

    /// Submit a run. Rejects with `PoolSaturated` when every worker is busy
    /// and the backlog is full; otherwise the future is spawned and waits
    /// for a worker permit.
    pub fn try_submit<F, T>(&self, fut: F) -> Result<JoinHandle<T>>
    where
        F: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        let slot = self.slots.clone().try_acquire_owned().map_err(|_| {
            ChainflowError::PoolSaturated(format!(
                "{} runs active and {} queued",
                self.worker_count, self.backlog
            ))
        })?;

        let workers = Arc::clone(&self.workers);
        Ok(tokio::spawn(async move {
            // The pool never closes its semaphores.
            let _worker = workers
                .acquire_owned()
                .await
                .expect("run pool semaphore closed");
            let result = fut.await;
            drop(slot);
            result
        }))
    }

    /// Free capacity, workers plus backlog.
    pub fn available_slots(&self) -> usize {
        self.slots.available_permits()
    }
}
