//! # Rust Work Queue
//!
//! Bounded work queues consumed by a fixed pool of worker threads, with
//! first-failure cancellation and deterministic drain-on-exit.
//!
//! ## Features
//!
//! - **Bounded Queue**: capacity-limited FIFO with `put`/`get`/`mark_done`/`join`/`close`
//! - **Worker Pool**: N named threads applying a [`Handler`] to every item
//! - **Supervisor**: runs a producer and a pool, stops everything on the first failure
//!   and reports successes, the failure and the abandoned items
//! - **Deadlines**: one-shot [`DeadlineTimer`] driving cooperative cancellation
//! - **Limits**: [`limit::ConcurrencyLimit`] and keyed [`rate_limit::RateLimiter`]
//! - **Brokers**: pluggable [`broker::Broker`] with an in-memory implementation and a
//!   serialized task queue on top
//!
//! ## Quick Start
//!
//! ```rust
//! use rust_work_queue::prelude::*;
//!
//! # fn main() -> Result<()> {
//! // Queue of 3, two consumers
//! let supervisor = Supervisor::new(SupervisorConfig::new(3, 2))?;
//!
//! let report = supervisor.run(
//!     |producer: &Producer<u32>| {
//!         for i in 1..=10 {
//!             producer.put(i)?;
//!         }
//!         Ok(())
//!     },
//!     |item: u32| -> Result<String> { Ok(format!("item-{}", item)) },
//! )?;
//!
//! assert_eq!(report.succeeded, 10);
//! assert_eq!(report.outputs[0], (1, "item-1".to_string()));
//! # Ok(())
//! # }
//! ```
//!
//! ## First Failure
//!
//! ```rust
//! use rust_work_queue::prelude::*;
//!
//! # fn main() -> Result<()> {
//! let supervisor = Supervisor::new(SupervisorConfig::new(5, 1))?;
//! let report = supervisor.run(
//!     |producer: &Producer<u32>| producer.put_all(1..=5),
//!     |item: u32| -> Result<u32> {
//!         std::thread::sleep(std::time::Duration::from_millis(10));
//!         if item == 3 {
//!             return Err(WorkError::other("item 3 is bad"));
//!         }
//!         Ok(item)
//!     },
//! )?;
//!
//! assert_eq!(report.succeeded, 2);
//! assert_eq!(report.failure.as_ref().and_then(WorkError::sequence), Some(3));
//! assert_eq!(report.abandoned, 2);
//! # Ok(())
//! # }
//! ```
//!
//! ## Using the Queue Directly
//!
//! ```rust
//! use rust_work_queue::queue::{BoundedQueue, QueueError};
//!
//! let queue = BoundedQueue::new(1).unwrap();
//! queue.put("a").unwrap();
//! assert!(matches!(queue.try_put("b"), Err(QueueError::Full("b"))));
//!
//! assert_eq!(queue.get().unwrap(), "a");
//! queue.mark_done().unwrap();
//! queue.join();
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod broker;
pub mod core;
pub mod limit;
pub mod pool;
pub mod prelude;
pub mod queue;
pub mod rate_limit;
pub mod supervisor;
pub mod telemetry;

pub use crate::core::{
    run_with_timeout, CancellationReason, CancellationToken, DeadlineTimer, Handler, Result,
    TimerError, WorkError, WorkItem,
};
pub use crate::pool::{WorkerPool, WorkerPoolConfig, WorkerStats};
pub use crate::supervisor::{Producer, Report, ReportSummary, Supervisor, SupervisorConfig};
