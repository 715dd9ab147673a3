//! Tracing integration for observability.
//!
//! With the `tracing` feature enabled, workers open a span per worker and per
//! item, and the [`metrics`] functions emit counter/gauge events that a
//! subscriber can turn into metrics.
//!
//! # Example
//!
//! ```rust,ignore
//! use rust_work_queue::prelude::*;
//! use rust_work_queue::telemetry::TracedHandler;
//!
//! let _run = tracing::info_span!("import", batch = 7).entered();
//! let supervisor = Supervisor::new(SupervisorConfig::new(8, 4))?;
//! // handler calls on worker threads run inside the "import" span
//! let report = supervisor.run(produce, TracedHandler::new(parse_row))?;
//! ```

use crate::core::{Handler, Result};

/// A handler wrapper that carries a tracing span into worker threads.
///
/// The span current at construction is entered around every call, so events
/// emitted by the handler on a worker thread nest under the caller's span.
/// Without the `tracing` feature this is a transparent wrapper.
pub struct TracedHandler<H> {
    inner: H,
    #[cfg(feature = "tracing")]
    span: tracing::Span,
}

impl<H> TracedHandler<H> {
    /// Wrap `handler`, capturing the current span
    pub fn new(handler: H) -> Self {
        Self {
            inner: handler,
            #[cfg(feature = "tracing")]
            span: tracing::Span::current(),
        }
    }

    /// Wrap `handler` with a specific span
    #[cfg(feature = "tracing")]
    pub fn with_span(handler: H, span: tracing::Span) -> Self {
        Self {
            inner: handler,
            span,
        }
    }

    /// The wrapped handler
    pub fn inner(&self) -> &H {
        &self.inner
    }
}

impl<T, H: Handler<T>> Handler<T> for TracedHandler<H> {
    type Output = H::Output;

    fn handle(&self, item: T) -> Result<Self::Output> {
        #[cfg(feature = "tracing")]
        let _guard = self.span.enter();
        self.inner.handle(item)
    }

    fn name(&self) -> &str {
        Handler::<T>::name(&self.inner)
    }
}

/// Metrics recording functions for observability.
///
/// These functions emit tracing events that can be consumed by
/// metrics collection systems.
#[cfg(feature = "tracing")]
pub mod metrics {
    use std::time::Duration;

    /// Records an item entering the queue.
    #[inline]
    pub fn record_put(queue_depth: usize) {
        tracing::trace!(
            counter.items_put = 1,
            gauge.queue_depth = queue_depth as i64,
            "item queued"
        );
    }

    /// Records a handler call finishing.
    #[inline]
    pub fn record_completion(duration: Duration, success: bool) {
        let duration_ms = duration.as_millis() as u64;
        if success {
            tracing::trace!(
                counter.items_succeeded = 1,
                histogram.item_duration_ms = duration_ms,
                "item succeeded"
            );
        } else {
            tracing::trace!(
                counter.items_failed = 1,
                histogram.item_duration_ms = duration_ms,
                "item failed"
            );
        }
    }

    /// Records a handler panic.
    #[inline]
    pub fn record_panic(duration: Duration) {
        tracing::trace!(
            counter.items_panicked = 1,
            histogram.item_duration_ms = duration.as_millis() as u64,
            "handler panicked"
        );
    }

    /// Records worker becoming busy.
    #[inline]
    pub fn record_worker_busy(worker_id: usize) {
        tracing::trace!(gauge.workers_busy = 1, worker_id = worker_id, "worker busy");
    }

    /// Records worker becoming idle.
    #[inline]
    pub fn record_worker_idle(worker_id: usize) {
        tracing::trace!(
            gauge.workers_busy = -1i64,
            worker_id = worker_id,
            "worker idle"
        );
    }

    /// Records pool startup.
    #[inline]
    pub fn record_pool_start(num_workers: usize, handler: &str) {
        tracing::info!(workers = num_workers, handler = handler, "worker pool started");
    }

    /// Records the start of a supervised run.
    #[inline]
    pub fn record_supervisor_start(capacity: usize, workers: usize) {
        tracing::info!(capacity = capacity, workers = workers, "supervised run started");
    }

    /// Records the end of a supervised run.
    #[inline]
    pub fn record_supervisor_done(succeeded: u64, failed: u64, abandoned: u64) {
        tracing::info!(
            counter.items_abandoned = abandoned,
            succeeded = succeeded,
            failed = failed,
            "supervised run finished"
        );
    }
}
