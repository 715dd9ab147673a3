//! Bounded queue used as the handoff between producers and workers.
//!
//! [`BoundedQueue`] is the only shared mutable state between the producer and
//! the worker pool: they synchronize solely through `put`, `get`,
//! `mark_done` and `join`.

mod bounded;

pub use bounded::BoundedQueue;

use crate::core::WorkError;

/// Errors returned by [`BoundedQueue`] operations.
///
/// Operations that fail to enqueue hand the rejected item back so the caller
/// can recover it.
#[derive(Debug, PartialEq, Eq)]
pub enum QueueError<T> {
    /// The queue is closed (and, for `get`, drained)
    Closed(Option<T>),
    /// The queue is at capacity
    Full(T),
    /// No item is available yet
    Empty,
    /// `mark_done` was called more times than items were put
    TooManyDone,
}

impl<T> std::fmt::Display for QueueError<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            QueueError::Closed(_) => write!(f, "queue is closed"),
            QueueError::Full(_) => write!(f, "queue is full"),
            QueueError::Empty => write!(f, "queue is empty"),
            QueueError::TooManyDone => {
                write!(f, "mark_done called more times than items were put")
            }
        }
    }
}

impl<T: std::fmt::Debug> std::error::Error for QueueError<T> {}

impl<T> QueueError<T> {
    /// Take back the item that could not be enqueued, if any.
    pub fn into_item(self) -> Option<T> {
        match self {
            QueueError::Closed(item) => item,
            QueueError::Full(item) => Some(item),
            QueueError::Empty | QueueError::TooManyDone => None,
        }
    }

    /// Whether this error signals closure.
    pub fn is_closed(&self) -> bool {
        matches!(self, QueueError::Closed(_))
    }
}

impl<T> From<QueueError<T>> for WorkError {
    fn from(err: QueueError<T>) -> Self {
        match err {
            QueueError::Closed(_) => WorkError::Closed,
            other => WorkError::other(other.to_string()),
        }
    }
}

/// Result type for queue operations
pub type QueueResult<R, T> = std::result::Result<R, QueueError<T>>;
