//! Core types: errors, cancellation, deadlines and handlers

pub mod cancellation;
pub mod error;
pub mod handler;
pub mod timer;

pub use cancellation::{CancellationCallbackGuard, CancellationReason, CancellationToken};
pub use error::{Result, WorkError};
pub use handler::{BoxedTask, ClosureTask, Handler, Task, TaskRunner, WorkItem};
pub use timer::{run_with_timeout, DeadlineTimer, TimerError, TimerPhase};
