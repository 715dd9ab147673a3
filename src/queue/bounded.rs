//! Bounded FIFO queue with completion tracking.

use super::{QueueError, QueueResult};
use crate::core::{Result, WorkError};
use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::time::{Duration, Instant};

#[cfg(feature = "tracing")]
use crate::telemetry::metrics;

struct QueueState<T> {
    items: VecDeque<T>,
    unfinished: usize,
    closed: bool,
}

/// A capacity-limited FIFO handoff between producers and consumers.
///
/// `put` blocks while the queue is full, which throttles a fast producer to
/// the pace of its consumers. Every item put also increments an
/// `unfinished` counter that consumers decrement with
/// [`mark_done`](Self::mark_done) once they have finished with the item, so
/// [`join`](Self::join) waits for accepted work to be *processed*, not merely
/// dequeued.
///
/// # Example
///
/// ```rust
/// use rust_work_queue::queue::{BoundedQueue, QueueError};
///
/// let queue = BoundedQueue::new(2).unwrap();
/// queue.put(1).unwrap();
/// queue.put(2).unwrap();
///
/// // Queue is now full - try_put hands the item back
/// match queue.try_put(3) {
///     Err(QueueError::Full(item)) => assert_eq!(item, 3),
///     _ => panic!("expected Full error"),
/// }
///
/// assert_eq!(queue.get().unwrap(), 1);
/// queue.mark_done().unwrap();
/// ```
pub struct BoundedQueue<T> {
    state: Mutex<QueueState<T>>,
    not_empty: Condvar,
    not_full: Condvar,
    all_done: Condvar,
    capacity: usize,
}

impl<T> std::fmt::Debug for BoundedQueue<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("BoundedQueue")
            .field("capacity", &self.capacity)
            .field("buffered", &state.items.len())
            .field("unfinished", &state.unfinished)
            .field("closed", &state.closed)
            .finish()
    }
}

impl<T> BoundedQueue<T> {
    /// Creates a new bounded queue with the specified capacity.
    ///
    /// # Errors
    ///
    /// Returns [`WorkError::CapacityMisuse`] if `capacity` is 0.
    pub fn new(capacity: usize) -> Result<Self> {
        if capacity == 0 {
            return Err(WorkError::capacity_misuse(
                "capacity",
                "Queue capacity must be at least 1",
            ));
        }
        Ok(Self {
            state: Mutex::new(QueueState {
                items: VecDeque::with_capacity(capacity),
                unfinished: 0,
                closed: false,
            }),
            not_empty: Condvar::new(),
            not_full: Condvar::new(),
            all_done: Condvar::new(),
            capacity,
        })
    }

    /// Returns the maximum capacity of this queue.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Appends an item, blocking while the queue is full.
    ///
    /// Fails with [`QueueError::Closed`] (returning the item) if the queue is
    /// closed before or while waiting.
    pub fn put(&self, item: T) -> QueueResult<(), T> {
        let mut state = self.state.lock();
        loop {
            if state.closed {
                return Err(QueueError::Closed(Some(item)));
            }
            if state.items.len() < self.capacity {
                break;
            }
            self.not_full.wait(&mut state);
        }
        self.push_locked(&mut state, item);
        Ok(())
    }

    /// Appends an item without blocking.
    pub fn try_put(&self, item: T) -> QueueResult<(), T> {
        let mut state = self.state.lock();
        if state.closed {
            return Err(QueueError::Closed(Some(item)));
        }
        if state.items.len() >= self.capacity {
            return Err(QueueError::Full(item));
        }
        self.push_locked(&mut state, item);
        Ok(())
    }

    /// Appends an item, blocking at most `timeout` for space.
    pub fn put_timeout(&self, item: T, timeout: Duration) -> QueueResult<(), T> {
        let deadline = Instant::now() + timeout;
        let mut state = self.state.lock();
        loop {
            if state.closed {
                return Err(QueueError::Closed(Some(item)));
            }
            if state.items.len() < self.capacity {
                break;
            }
            if self.not_full.wait_until(&mut state, deadline).timed_out()
                && state.items.len() >= self.capacity
                && !state.closed
            {
                return Err(QueueError::Full(item));
            }
        }
        self.push_locked(&mut state, item);
        Ok(())
    }

    fn push_locked(&self, state: &mut QueueState<T>, item: T) {
        state.items.push_back(item);
        state.unfinished += 1;
        #[cfg(feature = "tracing")]
        metrics::record_put(state.items.len());
        self.not_empty.notify_one();
    }

    /// Removes and returns the head item, blocking while the queue is empty.
    ///
    /// Fails with [`QueueError::Closed`] only once the queue is closed *and*
    /// drained; items put before `close()` are still delivered.
    pub fn get(&self) -> QueueResult<T, T> {
        let mut state = self.state.lock();
        loop {
            if let Some(item) = self.pop_locked(&mut state) {
                return Ok(item);
            }
            if state.closed {
                return Err(QueueError::Closed(None));
            }
            self.not_empty.wait(&mut state);
        }
    }

    /// Removes and returns the head item without blocking.
    pub fn try_get(&self) -> QueueResult<T, T> {
        let mut state = self.state.lock();
        match self.pop_locked(&mut state) {
            Some(item) => Ok(item),
            None if state.closed => Err(QueueError::Closed(None)),
            None => Err(QueueError::Empty),
        }
    }

    /// Removes and returns the head item, blocking at most `timeout`.
    pub fn get_timeout(&self, timeout: Duration) -> QueueResult<T, T> {
        let deadline = Instant::now() + timeout;
        let mut state = self.state.lock();
        loop {
            if let Some(item) = self.pop_locked(&mut state) {
                return Ok(item);
            }
            if state.closed {
                return Err(QueueError::Closed(None));
            }
            if self.not_empty.wait_until(&mut state, deadline).timed_out() {
                return match self.pop_locked(&mut state) {
                    Some(item) => Ok(item),
                    None if state.closed => Err(QueueError::Closed(None)),
                    None => Err(QueueError::Empty),
                };
            }
        }
    }

    fn pop_locked(&self, state: &mut QueueState<T>) -> Option<T> {
        let item = state.items.pop_front()?;
        self.not_full.notify_one();
        Some(item)
    }

    /// Marks one previously dequeued item as finished.
    ///
    /// Fails with [`QueueError::TooManyDone`] if called more times than items
    /// were put.
    pub fn mark_done(&self) -> QueueResult<(), T> {
        let mut state = self.state.lock();
        if state.unfinished == 0 {
            return Err(QueueError::TooManyDone);
        }
        state.unfinished -= 1;
        if state.unfinished == 0 {
            self.all_done.notify_all();
        }
        Ok(())
    }

    /// Blocks until every item put has been marked done.
    ///
    /// Does not stop further `put`s unless the queue is also closed.
    pub fn join(&self) {
        let mut state = self.state.lock();
        while state.unfinished > 0 {
            self.all_done.wait(&mut state);
        }
    }

    /// Like [`join`](Self::join) but gives up after `timeout`.
    ///
    /// Returns `true` if the unfinished count reached zero.
    pub fn join_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut state = self.state.lock();
        while state.unfinished > 0 {
            if self.all_done.wait_until(&mut state, deadline).timed_out() {
                return state.unfinished == 0;
            }
        }
        true
    }

    /// Closes the queue.
    ///
    /// Idempotent. Wakes every blocked producer (which then fails with
    /// `Closed`) and every blocked consumer (which drains what is left, then
    /// fails with `Closed`).
    pub fn close(&self) {
        let mut state = self.state.lock();
        if state.closed {
            return;
        }
        state.closed = true;
        drop(state);
        self.not_empty.notify_all();
        self.not_full.notify_all();
    }

    /// Whether [`close`](Self::close) has been called.
    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    /// Number of buffered items.
    pub fn len(&self) -> usize {
        self.state.lock().items.len()
    }

    /// Whether no items are buffered.
    pub fn is_empty(&self) -> bool {
        self.state.lock().items.is_empty()
    }

    /// Whether the buffer is at capacity.
    pub fn is_full(&self) -> bool {
        self.state.lock().items.len() >= self.capacity
    }

    /// Number of items put but not yet marked done.
    pub fn unfinished(&self) -> usize {
        self.state.lock().unfinished
    }
}
