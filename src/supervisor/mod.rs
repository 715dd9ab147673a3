//! Supervised runs: one producer, a worker pool and first-failure cancellation
//!
//! A [`Supervisor`] owns a single run. It creates the queue, starts the pool,
//! runs the producer on its own thread and consumes worker events until either
//! everything drained naturally or a failure was observed. On failure it
//! cancels, closes the queue, waits for every thread and discards what is
//! still buffered, so that no work is left behind when [`Supervisor::run`]
//! returns.
//!
//! ```rust
//! use rust_work_queue::prelude::*;
//!
//! # fn main() -> Result<()> {
//! let supervisor = Supervisor::new(SupervisorConfig::new(3, 2))?;
//! let report = supervisor.run(
//!     |producer: &Producer<u64>| producer.put_all(1..=10),
//!     |x: u64| -> Result<u64> { Ok(x * 2) },
//! )?;
//!
//! assert!(report.is_success());
//! assert_eq!(report.succeeded, 10);
//! assert_eq!(report.into_result()?.iter().sum::<u64>(), 110);
//! # Ok(())
//! # }
//! ```

mod config;
mod producer;
mod report;

pub use config::SupervisorConfig;
pub use producer::Producer;
pub use report::{Report, ReportSummary};

use crate::broker::{Broker, BrokerSession};
use crate::core::{
    CancellationReason, CancellationToken, DeadlineTimer, Handler, Result, WorkError, WorkItem,
};
use crate::pool::{ItemOutcome, PoolEvent, WorkerPool};
use crate::queue::BoundedQueue;
use chrono::Utc;
use crossbeam::channel::{self, Receiver, Sender};
use crossbeam::select;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::thread;

/// Lifecycle of a supervised run
///
/// `Idle → Running → {Draining, Cancelling} → Done`; `Cancelling` always
/// continues to `Draining`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SupervisorState {
    /// Not started
    Idle,
    /// Producer and workers are running
    Running,
    /// A failure was observed; stopping producer and workers
    Cancelling,
    /// Waiting for threads and discarding leftovers
    Draining,
    /// The run finished and its report was returned
    Done,
}

/// What the producer thread reports when it returns
struct ProducerExit {
    produced: u64,
    result: Result<()>,
}

/// Accumulates outcomes while the run is in progress
struct Tally<R> {
    outputs: Vec<(u64, R)>,
    failure: Option<WorkError>,
    secondary_failures: Vec<WorkError>,
    succeeded: u64,
    failed: u64,
    abandoned: u64,
}

impl<R> Tally<R> {
    fn new() -> Self {
        Self {
            outputs: Vec::new(),
            failure: None,
            secondary_failures: Vec::new(),
            succeeded: 0,
            failed: 0,
            abandoned: 0,
        }
    }

    /// Record an outcome; returns the error if the item failed
    fn record(&mut self, outcome: ItemOutcome<R>) -> Option<WorkError> {
        match outcome.result {
            Ok(value) => {
                self.succeeded += 1;
                self.outputs.push((outcome.sequence, value));
                None
            }
            Err(e) => {
                self.failed += 1;
                Some(e)
            }
        }
    }
}

/// Runs one producer and a pool of consumers over a bounded queue
///
/// A supervisor can run once; a second call to [`run`](Self::run) fails with
/// [`WorkError::InvalidState`].
pub struct Supervisor {
    config: SupervisorConfig,
    token: CancellationToken,
    state: Mutex<SupervisorState>,
}

impl std::fmt::Debug for Supervisor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Supervisor")
            .field("config", &self.config)
            .field("state", &self.state())
            .field("cancelled", &self.token.is_cancelled())
            .finish()
    }
}

impl Supervisor {
    /// Create a supervisor after validating `config`
    pub fn new(config: SupervisorConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            token: CancellationToken::new(),
            state: Mutex::new(SupervisorState::Idle),
        })
    }

    /// Configuration of this supervisor
    pub fn config(&self) -> &SupervisorConfig {
        &self.config
    }

    /// Token shared by the producer and every worker
    ///
    /// Cancelling it from outside ends the run with [`WorkError::Cancelled`].
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    /// Cancel the run from outside
    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// Current lifecycle state
    pub fn state(&self) -> SupervisorState {
        *self.state.lock()
    }

    fn set_state(&self, next: SupervisorState) {
        let mut state = self.state.lock();
        if *state != next {
            log::info!("supervisor {:?} -> {:?}", *state, next);
            *state = next;
        }
    }

    fn begin(&self) -> Result<()> {
        let mut state = self.state.lock();
        if *state != SupervisorState::Idle {
            return Err(WorkError::invalid_state(
                "Idle",
                format!("{:?}", *state),
            ));
        }
        *state = SupervisorState::Running;
        log::info!(
            "supervisor Idle -> Running (capacity {}, {} workers)",
            self.config.capacity,
            self.config.workers
        );
        Ok(())
    }

    /// Run `producer` and a pool running `handler` until both finish or one fails
    ///
    /// The producer receives a [`Producer`] handle and runs on a thread named
    /// `{prefix}-producer`. An error it returns ends the run like a handler
    /// failure does, unless the run was already being cancelled.
    ///
    /// Returns `Err` only when the run could not be set up (wrong state,
    /// thread spawn failure). Failures during the run are reported in
    /// [`Report::failure`].
    pub fn run<T, P, H>(&self, producer: P, handler: H) -> Result<Report<H::Output>>
    where
        T: Send + 'static,
        P: FnOnce(&Producer<T>) -> Result<()> + Send + 'static,
        H: Handler<T> + 'static,
        H::Output: 'static,
    {
        self.begin()?;

        #[cfg(feature = "tracing")]
        crate::telemetry::metrics::record_supervisor_start(
            self.config.capacity,
            self.config.workers,
        );

        let result = self.execute(producer, handler);
        self.set_state(SupervisorState::Done);

        #[cfg(feature = "tracing")]
        {
            if let Ok(report) = &result {
                crate::telemetry::metrics::record_supervisor_done(
                    report.succeeded,
                    report.failed,
                    report.abandoned,
                );
            }
        }

        result
    }

    /// Like [`run`](Self::run), with a broker session open for the whole run
    ///
    /// The session is opened before the producer starts and closed when the
    /// run returns, on every path. Both closures receive the broker; a broker
    /// error returned by the handler becomes the run's
    /// [`WorkError::HandlerFailure`]. Once the run is cancelled, blocking
    /// broker calls fail with [`WorkError::Cancelled`] so a producer waiting
    /// on the broker stops.
    pub fn run_with_broker<B, T, R, P, H>(
        &self,
        broker: Arc<B>,
        producer: P,
        handler: H,
    ) -> Result<Report<R>>
    where
        B: Broker + 'static,
        T: Send + 'static,
        R: Send + 'static,
        P: FnOnce(&Producer<T>, &Arc<B>) -> Result<()> + Send + 'static,
        H: Fn(T, &Arc<B>) -> Result<R> + Send + Sync + 'static,
    {
        let session = BrokerSession::open(broker)?;
        // A producer blocked on the broker must see the run's cancellation.
        let _interrupt = session.interrupt_on_cancel(&self.token);
        let producer_broker = session.broker();
        let handler_broker = session.broker();

        self.run(
            move |p: &Producer<T>| producer(p, &producer_broker),
            move |item: T| -> Result<R> { handler(item, &handler_broker) },
        )
    }

    fn execute<T, P, H>(&self, producer: P, handler: H) -> Result<Report<H::Output>>
    where
        T: Send + 'static,
        P: FnOnce(&Producer<T>) -> Result<()> + Send + 'static,
        H: Handler<T> + 'static,
        H::Output: 'static,
    {
        let started_at = Utc::now();
        let queue = Arc::new(BoundedQueue::new(self.config.capacity)?);
        let (event_tx, event_rx) = channel::unbounded();
        let (producer_tx, producer_rx) = channel::bounded(1);
        let (cancel_tx, cancel_rx) = channel::bounded(1);

        let _cancel_guard = self.token.on_cancel(move || {
            let _ = cancel_tx.try_send(());
        });

        let timer = DeadlineTimer::new(self.token.clone());
        if let Some(deadline) = self.config.deadline {
            timer.arm(deadline)?;
        }

        let pool = WorkerPool::start_with(
            &self.config.pool_config(),
            Arc::clone(&queue),
            Arc::new(handler),
            self.token.clone(),
            event_tx,
        )?;

        let producer_thread = match self.spawn_producer(Arc::clone(&queue), producer, producer_tx)
        {
            Ok(thread) => thread,
            Err(e) => {
                self.token
                    .cancel_with_reason(CancellationReason::Failure(e.to_string()));
                queue.close();
                let _ = pool.join();
                return Err(e);
            }
        };

        let mut tally = Tally::new();
        let reported = self.consume(&queue, &pool, event_rx, producer_rx, cancel_rx, &mut tally);

        self.set_state(SupervisorState::Draining);
        queue.close();
        if producer_thread.join().is_err() {
            log::error!("producer thread panicked outside the producer closure");
        }

        let worker_states = pool.states();
        let worker_stats = pool.stats().iter().map(|s| s.snapshot()).collect();
        if let Err(e) = pool.join() {
            tally.secondary_failures.push(e);
        }

        while let Ok(item) = queue.try_get() {
            log::debug!("discarding buffered item #{}", item.sequence());
            tally.abandoned += 1;
            if let Err(e) = queue.mark_done() {
                log::error!("{}", e);
            }
        }
        queue.join();
        let _ = timer.disarm();

        let produced = reported.unwrap_or(tally.succeeded + tally.failed + tally.abandoned);
        debug_assert_eq!(
            produced,
            tally.succeeded + tally.failed + tally.abandoned,
            "every produced item is accounted for"
        );

        tally.outputs.sort_by_key(|(sequence, _)| *sequence);
        let report = Report {
            outputs: tally.outputs,
            failure: tally.failure,
            secondary_failures: tally.secondary_failures,
            produced,
            succeeded: tally.succeeded,
            failed: tally.failed,
            abandoned: tally.abandoned,
            worker_states,
            worker_stats,
            started_at,
            finished_at: Utc::now(),
        };

        log::info!(
            "run finished: {} produced, {} succeeded, {} failed, {} abandoned",
            report.produced,
            report.succeeded,
            report.failed,
            report.abandoned
        );
        if let Some(failure) = &report.failure {
            log::info!("run failed: {}", failure);
        }

        Ok(report)
    }

    fn spawn_producer<T, P>(
        &self,
        queue: Arc<BoundedQueue<WorkItem<T>>>,
        producer: P,
        exit: Sender<ProducerExit>,
    ) -> Result<thread::JoinHandle<()>>
    where
        T: Send + 'static,
        P: FnOnce(&Producer<T>) -> Result<()> + Send + 'static,
    {
        let name = format!("{}-producer", self.config.thread_name_prefix);
        let token = self.token.clone();

        thread::Builder::new()
            .name(name.clone())
            .spawn(move || {
                let handle = Producer::new(queue, token);
                let result = match catch_unwind(AssertUnwindSafe(|| producer(&handle))) {
                    Ok(result) => result,
                    Err(panic_info) => {
                        let message = if let Some(s) = panic_info.downcast_ref::<&str>() {
                            s.to_string()
                        } else if let Some(s) = panic_info.downcast_ref::<String>() {
                            s.clone()
                        } else {
                            "Unknown panic".to_string()
                        };
                        log::error!("producer panicked: {}", message);
                        Err(WorkError::other(format!("producer panicked: {}", message)))
                    }
                };
                let _ = exit.send(ProducerExit {
                    produced: handle.produced(),
                    result,
                });
            })
            .map_err(|e| WorkError::spawn(name, e))
    }

    /// Event loop of the `Running` and `Cancelling` states
    ///
    /// Returns once the producer has reported and every worker has exited,
    /// with the producer's count of accepted items.
    fn consume<T, R>(
        &self,
        queue: &BoundedQueue<WorkItem<T>>,
        pool: &WorkerPool,
        events: Receiver<PoolEvent<R>>,
        producer_rx: Receiver<ProducerExit>,
        cancel_rx: Receiver<()>,
        tally: &mut Tally<R>,
    ) -> Option<u64> {
        let workers = pool.len();
        let mut exited = 0;
        let mut producer_done = false;
        let mut cancel_seen = false;
        let mut produced = None;
        let no_exit = channel::never();
        let no_cancel = channel::never();

        while !producer_done || exited < workers {
            let producer_rx = if producer_done { &no_exit } else { &producer_rx };
            let cancel_rx = if cancel_seen { &no_cancel } else { &cancel_rx };

            select! {
                recv(events) -> event => match event {
                    Ok(PoolEvent::Outcome(outcome)) => {
                        if let Some(e) = tally.record(outcome) {
                            self.fail(e, queue, tally);
                        }
                    }
                    Ok(PoolEvent::Abandoned { sequence, worker_id }) => {
                        log::debug!("worker {} abandoned item #{}", worker_id, sequence);
                        tally.abandoned += 1;
                    }
                    Ok(PoolEvent::WorkerExited { worker_id, state }) => {
                        log::debug!("worker {} exited ({:?})", worker_id, state);
                        exited += 1;
                    }
                    Err(_) => exited = workers,
                },
                recv(producer_rx) -> exit => {
                    producer_done = true;
                    match exit {
                        Ok(ProducerExit { produced: count, result }) => {
                            produced = Some(count);
                            match result {
                                Ok(()) => {
                                    log::debug!("producer finished after {} items", count);
                                    queue.close();
                                }
                                Err(e) => self.producer_failed(e, queue, tally),
                            }
                        }
                        Err(_) => {
                            self.fail(
                                WorkError::other("producer exited without reporting"),
                                queue,
                                tally,
                            );
                        }
                    }
                },
                recv(cancel_rx) -> _ => {
                    cancel_seen = true;
                    if tally.failure.is_none() {
                        let failure = self.cancellation_failure();
                        self.fail(failure, queue, tally);
                    }
                },
            }
        }

        produced
    }

    fn producer_failed<T, R>(
        &self,
        error: WorkError,
        queue: &BoundedQueue<WorkItem<T>>,
        tally: &mut Tally<R>,
    ) {
        let stopped_by_cancel = matches!(error, WorkError::Closed | WorkError::Cancelled { .. })
            && self.token.is_cancelled();
        if !stopped_by_cancel {
            self.fail(error, queue, tally);
        } else if tally.failure.is_none() {
            let failure = self.cancellation_failure();
            self.fail(failure, queue, tally);
        } else {
            log::debug!("producer stopped: {}", error);
        }
    }

    /// The failure to report when the token was cancelled by something other
    /// than a handler or producer error
    fn cancellation_failure(&self) -> WorkError {
        match self.token.reason() {
            Some(CancellationReason::Timeout(timeout)) => {
                WorkError::deadline_exceeded(timeout.as_millis() as u64)
            }
            Some(reason) => WorkError::cancelled(reason.to_string()),
            None => WorkError::cancelled("unknown"),
        }
    }

    /// Record a failure; the first one moves the run to `Cancelling`
    fn fail<T, R>(&self, error: WorkError, queue: &BoundedQueue<WorkItem<T>>, tally: &mut Tally<R>) {
        if tally.failure.is_some() {
            log::warn!("secondary failure: {}", error);
            tally.secondary_failures.push(error);
            return;
        }

        log::warn!("first failure: {}", error);
        self.set_state(SupervisorState::Cancelling);
        self.token
            .cancel_with_reason(CancellationReason::Failure(error.to_string()));
        queue.close();
        tally.failure = Some(error);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_runs_once() {
        let supervisor = Supervisor::new(SupervisorConfig::new(2, 1)).unwrap();
        assert_eq!(supervisor.state(), SupervisorState::Idle);

        let report = supervisor
            .run(
                |p: &Producer<u8>| p.put_all([1, 2]),
                |x: u8| -> Result<u8> { Ok(x) },
            )
            .unwrap();
        assert_eq!(report.succeeded, 2);
        assert_eq!(supervisor.state(), SupervisorState::Done);

        let again = supervisor.run(
            |p: &Producer<u8>| p.put_all([1]),
            |x: u8| -> Result<u8> { Ok(x) },
        );
        assert!(matches!(again, Err(WorkError::InvalidState { .. })));
    }

    #[test]
    fn test_invalid_config_rejected() {
        assert!(Supervisor::new(SupervisorConfig::new(0, 2)).is_err());
        assert!(Supervisor::new(SupervisorConfig::new(2, 0)).is_err());
    }

    #[test]
    fn test_producer_error_ends_run() {
        let supervisor = Supervisor::new(SupervisorConfig::new(4, 2)).unwrap();
        let report = supervisor
            .run(
                |p: &Producer<u32>| {
                    p.put(1)?;
                    Err(WorkError::other("source exhausted unexpectedly"))
                },
                |x: u32| -> Result<u32> { Ok(x) },
            )
            .unwrap();

        assert!(matches!(report.failure, Some(WorkError::Other(_))));
        assert_eq!(report.produced, 1);
        assert_eq!(report.succeeded + report.abandoned, 1);
    }

    #[test]
    fn test_producer_panic_is_a_failure() {
        let supervisor = Supervisor::new(SupervisorConfig::new(4, 1)).unwrap();
        let report = supervisor
            .run(
                |_: &Producer<u32>| -> Result<()> { panic!("producer blew up") },
                |x: u32| -> Result<u32> { Ok(x) },
            )
            .unwrap();

        let message = report.failure.map(|e| e.to_string()).unwrap_or_default();
        assert!(message.contains("producer blew up"));
        assert_eq!(report.produced, 0);
    }

    #[test]
    fn test_cancel_before_run() {
        let supervisor = Supervisor::new(SupervisorConfig::new(2, 2)).unwrap();
        supervisor.cancel();

        let report = supervisor
            .run(
                |p: &Producer<u32>| p.put_all(0..10),
                |x: u32| -> Result<u32> { Ok(x) },
            )
            .unwrap();
        assert!(matches!(report.failure, Some(WorkError::Cancelled { .. })));
        assert_eq!(report.succeeded, 0);
        assert_eq!(report.produced, 0);
    }

    #[test]
    fn test_deadline_reports_deadline_exceeded() {
        let config = SupervisorConfig::new(2, 1).with_deadline(Duration::from_millis(50));
        let supervisor = Supervisor::new(config).unwrap();

        let report = supervisor
            .run(
                |p: &Producer<u32>| p.put_all(0..1000),
                |x: u32| -> Result<u32> {
                    thread::sleep(Duration::from_millis(20));
                    Ok(x)
                },
            )
            .unwrap();

        assert!(matches!(
            report.failure,
            Some(WorkError::DeadlineExceeded { timeout_ms: 50 })
        ));
        assert!(report.succeeded < 1000);
        assert_eq!(
            report.succeeded + report.failed + report.abandoned,
            report.produced
        );
    }
}
