//! Producer handle given to the producer closure

use crate::core::{CancellationToken, Result, WorkError, WorkItem};
use crate::queue::{BoundedQueue, QueueError};
use std::cell::Cell;
use std::sync::Arc;

/// Enqueues payloads for a supervised run
///
/// Assigns sequence numbers 1, 2, 3… in put order. `put` blocks while the
/// queue is full and fails once the run is cancelled, so a producer written
/// with `?` stops as soon as the supervisor gives up.
pub struct Producer<T> {
    queue: Arc<BoundedQueue<WorkItem<T>>>,
    token: CancellationToken,
    produced: Cell<u64>,
}

impl<T> std::fmt::Debug for Producer<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Producer")
            .field("produced", &self.produced.get())
            .field("cancelled", &self.token.is_cancelled())
            .finish()
    }
}

impl<T> Producer<T> {
    pub(crate) fn new(queue: Arc<BoundedQueue<WorkItem<T>>>, token: CancellationToken) -> Self {
        Self {
            queue,
            token,
            produced: Cell::new(0),
        }
    }

    /// Enqueue a payload, blocking while the queue is full
    ///
    /// Returns the item's sequence number.
    ///
    /// # Errors
    ///
    /// [`WorkError::Cancelled`] once the run is cancelled, or
    /// [`WorkError::Closed`] if the queue was closed while waiting.
    pub fn put(&self, payload: T) -> Result<u64> {
        self.token.check()?;
        let sequence = self.produced.get() + 1;
        match self.queue.put(WorkItem::new(sequence, payload)) {
            Ok(()) => {
                self.produced.set(sequence);
                Ok(sequence)
            }
            Err(QueueError::Closed(_)) => Err(self.token.check().err().unwrap_or(WorkError::Closed)),
            Err(e) => Err(e.into()),
        }
    }

    /// Enqueue every payload in order
    pub fn put_all<I: IntoIterator<Item = T>>(&self, payloads: I) -> Result<()> {
        for payload in payloads {
            self.put(payload)?;
        }
        Ok(())
    }

    /// Number of payloads accepted so far
    pub fn produced(&self) -> u64 {
        self.produced.get()
    }

    /// Whether the queue is currently at capacity
    pub fn is_full(&self) -> bool {
        self.queue.is_full()
    }

    /// Whether the run has been cancelled
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// The run's cancellation token
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }
}
