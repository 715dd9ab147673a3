//! Worker thread implementation

use crate::core::{CancellationToken, Handler, Result, WorkError, WorkItem};
use crate::queue::BoundedQueue;
use crossbeam::channel::Sender;
use serde::{Deserialize, Serialize};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

#[cfg(feature = "tracing")]
use tracing::{debug, span, Level};

/// Lifecycle of a worker
///
/// Workers start `Running` and move exactly once to a terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WorkerState {
    /// Taking items from the queue
    Running,
    /// Stopped because the queue was closed and drained, or after reporting
    /// a handler failure
    Completed,
    /// Stopped at a cancellation checkpoint
    Cancelled,
}

impl WorkerState {
    fn to_u8(self) -> u8 {
        match self {
            WorkerState::Running => 0,
            WorkerState::Completed => 1,
            WorkerState::Cancelled => 2,
        }
    }

    fn from_u8(value: u8) -> Self {
        match value {
            0 => WorkerState::Running,
            1 => WorkerState::Completed,
            _ => WorkerState::Cancelled,
        }
    }

    /// Whether the worker has stopped
    pub fn is_terminal(self) -> bool {
        self != WorkerState::Running
    }
}

/// Result of one item a worker started
#[derive(Debug)]
pub struct ItemOutcome<R> {
    /// Sequence number of the item
    pub sequence: u64,
    /// Worker that processed it
    pub worker_id: usize,
    /// What the handler returned; failures are wrapped in
    /// [`WorkError::HandlerFailure`]
    pub result: Result<R>,
    /// Time spent in the handler
    pub elapsed: Duration,
}

/// Events a worker reports to whoever supervises the pool
#[derive(Debug)]
pub enum PoolEvent<R> {
    /// An item was handled (successfully or not)
    Outcome(ItemOutcome<R>),
    /// An item was dequeued after cancellation and not started
    Abandoned {
        /// Sequence number of the item
        sequence: u64,
        /// Worker that dequeued it
        worker_id: usize,
    },
    /// A worker stopped
    WorkerExited {
        /// Worker ID
        worker_id: usize,
        /// Its terminal state
        state: WorkerState,
    },
}

/// Statistics for a worker thread
#[derive(Debug, Default)]
pub struct WorkerStats {
    /// Items handled successfully
    pub items_processed: AtomicU64,
    /// Items whose handler returned an error
    pub items_failed: AtomicU64,
    /// Items whose handler panicked
    pub items_panicked: AtomicU64,
    /// Items dequeued after cancellation and never started
    pub items_abandoned: AtomicU64,
    /// Total time spent in the handler (microseconds)
    pub total_processing_time_us: AtomicU64,
}

/// Point-in-time copy of [`WorkerStats`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerStatsSnapshot {
    /// Items handled successfully
    pub items_processed: u64,
    /// Items whose handler returned an error
    pub items_failed: u64,
    /// Items whose handler panicked
    pub items_panicked: u64,
    /// Items dequeued after cancellation and never started
    pub items_abandoned: u64,
    /// Total time spent in the handler (microseconds)
    pub total_processing_time_us: u64,
}

impl WorkerStats {
    /// Create new worker statistics
    pub fn new() -> Self {
        Self::default()
    }

    fn add_processing_time(&self, elapsed: Duration) {
        self.total_processing_time_us
            .fetch_add(elapsed.as_micros() as u64, Ordering::Relaxed);
    }

    /// Items handled successfully
    pub fn get_items_processed(&self) -> u64 {
        self.items_processed.load(Ordering::Relaxed)
    }

    /// Items whose handler returned an error
    pub fn get_items_failed(&self) -> u64 {
        self.items_failed.load(Ordering::Relaxed)
    }

    /// Items whose handler panicked
    pub fn get_items_panicked(&self) -> u64 {
        self.items_panicked.load(Ordering::Relaxed)
    }

    /// Items dequeued after cancellation and never started
    pub fn get_items_abandoned(&self) -> u64 {
        self.items_abandoned.load(Ordering::Relaxed)
    }

    /// Average handler time per started item in microseconds
    pub fn get_average_processing_time_us(&self) -> f64 {
        let total = self.total_processing_time_us.load(Ordering::Relaxed);
        let count =
            self.get_items_processed() + self.get_items_failed() + self.get_items_panicked();
        if count > 0 {
            total as f64 / count as f64
        } else {
            0.0
        }
    }

    /// Copy the counters
    pub fn snapshot(&self) -> WorkerStatsSnapshot {
        WorkerStatsSnapshot {
            items_processed: self.get_items_processed(),
            items_failed: self.get_items_failed(),
            items_panicked: self.get_items_panicked(),
            items_abandoned: self.get_items_abandoned(),
            total_processing_time_us: self.total_processing_time_us.load(Ordering::Relaxed),
        }
    }
}

/// Everything a worker thread needs
pub(crate) struct WorkerContext<T, H: Handler<T>> {
    pub(crate) queue: Arc<BoundedQueue<WorkItem<T>>>,
    pub(crate) handler: Arc<H>,
    pub(crate) token: CancellationToken,
    pub(crate) events: Sender<PoolEvent<H::Output>>,
}

/// A worker thread that takes items from a queue and runs the handler on them
#[derive(Debug)]
pub struct Worker {
    id: usize,
    thread: Option<thread::JoinHandle<()>>,
    stats: Arc<WorkerStats>,
    state: Arc<AtomicU8>,
}

impl Worker {
    /// Spawn a worker thread named `{prefix}-{id}`
    pub(crate) fn spawn<T, H>(id: usize, prefix: &str, ctx: WorkerContext<T, H>) -> Result<Self>
    where
        T: Send + 'static,
        H: Handler<T> + 'static,
        H::Output: 'static,
    {
        let stats = Arc::new(WorkerStats::new());
        let state = Arc::new(AtomicU8::new(WorkerState::Running.to_u8()));
        let stats_clone = Arc::clone(&stats);
        let state_clone = Arc::clone(&state);
        let name = format!("{}-{}", prefix, id);

        let thread = thread::Builder::new()
            .name(name.clone())
            .spawn(move || {
                let final_state = Self::run(id, &ctx, &stats_clone);
                state_clone.store(final_state.to_u8(), Ordering::Release);
                let _ = ctx.events.send(PoolEvent::WorkerExited {
                    worker_id: id,
                    state: final_state,
                });
            })
            .map_err(|e| WorkError::spawn(name, e))?;

        Ok(Self {
            id,
            thread: Some(thread),
            stats,
            state,
        })
    }

    /// Get worker ID
    pub fn id(&self) -> usize {
        self.id
    }

    /// Get worker statistics
    pub fn stats(&self) -> Arc<WorkerStats> {
        Arc::clone(&self.stats)
    }

    /// Current lifecycle state
    pub fn state(&self) -> WorkerState {
        WorkerState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Join the worker thread
    pub fn join(mut self) -> Result<()> {
        if let Some(thread) = self.thread.take() {
            thread
                .join()
                .map_err(|_| WorkError::worker_panic(self.id, "worker thread panicked"))?;
        }
        Ok(())
    }

    /// Main worker loop
    ///
    /// Cancellation is checked before and after each `get`, never while the
    /// handler runs.
    fn run<T, H>(id: usize, ctx: &WorkerContext<T, H>, stats: &WorkerStats) -> WorkerState
    where
        H: Handler<T>,
    {
        #[cfg(feature = "tracing")]
        let worker_span = span!(Level::DEBUG, "worker", id = id);
        #[cfg(feature = "tracing")]
        let _guard = worker_span.enter();

        log::debug!("worker {} started", id);

        let final_state = loop {
            if ctx.token.is_cancelled() {
                break WorkerState::Cancelled;
            }

            let item = match ctx.queue.get() {
                Ok(item) => item,
                // Closed and drained
                Err(_) => break WorkerState::Completed,
            };
            let sequence = item.sequence();

            if ctx.token.is_cancelled() {
                stats.items_abandoned.fetch_add(1, Ordering::Relaxed);
                Self::mark_done(id, ctx);
                let _ = ctx.events.send(PoolEvent::Abandoned {
                    sequence,
                    worker_id: id,
                });
                break WorkerState::Cancelled;
            }

            #[cfg(feature = "tracing")]
            crate::telemetry::metrics::record_worker_busy(id);

            let outcome = Self::execute_item(id, item, ctx.handler.as_ref(), stats);

            #[cfg(feature = "tracing")]
            crate::telemetry::metrics::record_worker_idle(id);

            let failed = outcome.result.is_err();
            Self::mark_done(id, ctx);
            let _ = ctx.events.send(PoolEvent::Outcome(outcome));

            if failed {
                break WorkerState::Completed;
            }
        };

        #[cfg(feature = "tracing")]
        debug!(
            items_processed = stats.get_items_processed(),
            items_failed = stats.get_items_failed(),
            "worker shutting down"
        );
        log::debug!("worker {} stopped ({:?})", id, final_state);

        final_state
    }

    fn mark_done<T, H: Handler<T>>(id: usize, ctx: &WorkerContext<T, H>) {
        if let Err(e) = ctx.queue.mark_done() {
            log::error!("worker {}: {}", id, e);
        }
    }

    /// Run the handler on one item with panic protection
    fn execute_item<T, H>(
        id: usize,
        item: WorkItem<T>,
        handler: &H,
        stats: &WorkerStats,
    ) -> ItemOutcome<H::Output>
    where
        H: Handler<T>,
    {
        let sequence = item.sequence();

        #[cfg(feature = "tracing")]
        let item_span = span!(
            Level::DEBUG,
            "item",
            sequence = sequence,
            handler = Handler::<T>::name(handler)
        );
        #[cfg(feature = "tracing")]
        let _item_guard = item_span.enter();

        let start = Instant::now();
        let panic_result = catch_unwind(AssertUnwindSafe(|| handler.handle(item.into_payload())));
        let elapsed = start.elapsed();
        stats.add_processing_time(elapsed);

        let result = match panic_result {
            Ok(Ok(value)) => {
                stats.items_processed.fetch_add(1, Ordering::Relaxed);
                #[cfg(feature = "tracing")]
                crate::telemetry::metrics::record_completion(elapsed, true);
                Ok(value)
            }
            Ok(Err(e)) => {
                stats.items_failed.fetch_add(1, Ordering::Relaxed);
                log::warn!("worker {}: item #{} failed: {}", id, sequence, e);
                #[cfg(feature = "tracing")]
                crate::telemetry::metrics::record_completion(elapsed, false);
                Err(WorkError::handler_failure(sequence, e))
            }
            Err(panic_info) => {
                let panic_msg = if let Some(s) = panic_info.downcast_ref::<&str>() {
                    s.to_string()
                } else if let Some(s) = panic_info.downcast_ref::<String>() {
                    s.clone()
                } else {
                    "Unknown panic".to_string()
                };
                stats.items_panicked.fetch_add(1, Ordering::Relaxed);
                log::error!("worker {}: item #{} panicked: {}", id, sequence, panic_msg);
                #[cfg(feature = "tracing")]
                crate::telemetry::metrics::record_panic(elapsed);
                Err(WorkError::handler_failure(
                    sequence,
                    WorkError::worker_panic(id, panic_msg),
                ))
            }
        };

        ItemOutcome {
            sequence,
            worker_id: id,
            result,
            elapsed,
        }
    }
}

impl Drop for Worker {
    fn drop(&mut self) {
        if let Some(thread) = self.thread.take() {
            if thread.is_finished() {
                if thread.join().is_err() {
                    log::error!("worker {} panicked during shutdown", self.id);
                }
            } else {
                log::warn!(
                    "worker {} dropped while still running; detaching its thread",
                    self.id
                );
            }
        }
    }
}
