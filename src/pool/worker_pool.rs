//! Worker pool implementation

use crate::core::{CancellationReason, CancellationToken, Handler, Result, WorkError, WorkItem};
use crate::pool::worker::{PoolEvent, Worker, WorkerContext, WorkerState, WorkerStats};
use crate::queue::BoundedQueue;
use crossbeam::channel::{self, Receiver, Sender};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Configuration for a worker pool
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerPoolConfig {
    /// Number of worker threads
    pub workers: usize,
    /// Thread name prefix; workers are named `{prefix}-{id}`
    pub thread_name_prefix: String,
}

impl Default for WorkerPoolConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            thread_name_prefix: "worker".to_string(),
        }
    }
}

impl WorkerPoolConfig {
    /// Create a configuration with the given number of workers
    #[must_use]
    pub fn new(workers: usize) -> Self {
        Self {
            workers,
            ..Default::default()
        }
    }

    /// Set thread name prefix
    #[must_use = "builder methods return a new value and do not modify the original"]
    pub fn with_thread_name_prefix<S: Into<String>>(mut self, prefix: S) -> Self {
        self.thread_name_prefix = prefix.into();
        self
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.workers == 0 {
            return Err(WorkError::capacity_misuse(
                "workers",
                "Number of workers must be at least 1",
            ));
        }
        Ok(())
    }
}

/// A fixed-size set of worker threads consuming one [`BoundedQueue`]
///
/// Each worker loops `get` → handler → `mark_done` until the queue is closed
/// and drained, until its handler fails, or until the pool's token is
/// cancelled. Every started item produces exactly one [`PoolEvent::Outcome`].
///
/// # Example
///
/// ```rust
/// use rust_work_queue::prelude::*;
/// use std::sync::Arc;
///
/// # fn main() -> Result<()> {
/// let queue = Arc::new(BoundedQueue::<WorkItem<u64>>::new(8)?);
/// let square = |x: u64| -> Result<u64> { Ok(x * x) };
/// let (pool, events) = WorkerPool::start(Arc::clone(&queue), square, 2)?;
///
/// for seq in 1..=4 {
///     queue.put(WorkItem::new(seq, seq)).map_err(WorkError::from)?;
/// }
/// queue.close();
/// pool.join()?;
///
/// let squares: u64 = events
///     .try_iter()
///     .filter_map(|e| match e {
///         PoolEvent::Outcome(o) => o.result.ok(),
///         _ => None,
///     })
///     .sum();
/// assert_eq!(squares, 1 + 4 + 9 + 16);
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct WorkerPool {
    workers: Vec<Worker>,
    token: CancellationToken,
}

impl WorkerPool {
    /// Start `workers` threads with a fresh token and event channel
    pub fn start<T, H>(
        queue: Arc<BoundedQueue<WorkItem<T>>>,
        handler: H,
        workers: usize,
    ) -> Result<(Self, Receiver<PoolEvent<H::Output>>)>
    where
        T: Send + 'static,
        H: Handler<T> + 'static,
        H::Output: 'static,
    {
        let (tx, rx) = channel::unbounded();
        let pool = Self::start_with(
            &WorkerPoolConfig::new(workers),
            queue,
            Arc::new(handler),
            CancellationToken::new(),
            tx,
        )?;
        Ok((pool, rx))
    }

    /// Start a pool with explicit configuration, token and event sender
    ///
    /// If a worker fails to spawn, the ones already started are cancelled,
    /// the queue is closed and the spawn error is returned.
    pub fn start_with<T, H>(
        config: &WorkerPoolConfig,
        queue: Arc<BoundedQueue<WorkItem<T>>>,
        handler: Arc<H>,
        token: CancellationToken,
        events: Sender<PoolEvent<H::Output>>,
    ) -> Result<Self>
    where
        T: Send + 'static,
        H: Handler<T> + 'static,
        H::Output: 'static,
    {
        config.validate()?;

        let mut workers = Vec::with_capacity(config.workers);
        for id in 0..config.workers {
            let ctx = WorkerContext {
                queue: Arc::clone(&queue),
                handler: Arc::clone(&handler),
                token: token.clone(),
                events: events.clone(),
            };
            match Worker::spawn(id, &config.thread_name_prefix, ctx) {
                Ok(worker) => workers.push(worker),
                Err(e) => {
                    log::error!("failed to start worker {}: {}", id, e);
                    token.cancel_with_reason(CancellationReason::Failure(e.to_string()));
                    queue.close();
                    for worker in workers {
                        let _ = worker.join();
                    }
                    return Err(e);
                }
            }
        }

        let handler_name = Handler::<T>::name(handler.as_ref());
        log::debug!(
            "started {} workers running '{}'",
            config.workers,
            handler_name
        );
        #[cfg(feature = "tracing")]
        crate::telemetry::metrics::record_pool_start(config.workers, handler_name);

        Ok(Self { workers, token })
    }

    /// Number of workers
    pub fn len(&self) -> usize {
        self.workers.len()
    }

    /// Whether the pool has no workers
    pub fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }

    /// The token workers check between items
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    /// Ask workers to stop starting new items
    ///
    /// Items already inside the handler run to completion. Workers blocked
    /// on an empty queue only notice once the queue is closed.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// Current state of each worker
    pub fn states(&self) -> Vec<WorkerState> {
        self.workers.iter().map(Worker::state).collect()
    }

    /// Per-worker statistics
    pub fn stats(&self) -> Vec<Arc<WorkerStats>> {
        self.workers.iter().map(Worker::stats).collect()
    }

    /// Items handled successfully across all workers
    pub fn total_items_processed(&self) -> u64 {
        self.workers
            .iter()
            .map(|w| w.stats().get_items_processed())
            .sum()
    }

    /// Items that failed or panicked across all workers
    pub fn total_items_failed(&self) -> u64 {
        self.workers
            .iter()
            .map(|w| {
                let stats = w.stats();
                stats.get_items_failed() + stats.get_items_panicked()
            })
            .sum()
    }

    /// Wait for every worker thread to exit
    pub fn join(self) -> Result<()> {
        let mut first_error = None;
        for worker in self.workers {
            if let Err(e) = worker.join() {
                log::error!("{}", e);
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }
}
