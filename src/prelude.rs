//! Convenient re-exports for common types and traits

pub use crate::core::{
    BoxedTask, CancellationReason, CancellationToken, ClosureTask, DeadlineTimer, Handler,
    Result, Task, TaskRunner, WorkError, WorkItem,
};
pub use crate::pool::{PoolEvent, WorkerPool, WorkerPoolConfig, WorkerState};
pub use crate::queue::{BoundedQueue, QueueError};
pub use crate::supervisor::{Producer, Report, Supervisor, SupervisorConfig};
