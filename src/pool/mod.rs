//! Worker pool and worker implementations

pub mod worker;
pub mod worker_pool;

pub use worker::{
    ItemOutcome, PoolEvent, Worker, WorkerState, WorkerStats, WorkerStatsSnapshot,
};
pub use worker_pool::{WorkerPool, WorkerPoolConfig};
