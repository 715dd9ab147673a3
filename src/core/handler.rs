//! Work items, handlers and task objects

use crate::core::error::{Result, WorkError};
use std::fmt;

/// A payload tagged with the sequence number it was given when enqueued
///
/// Sequence numbers start at 1 and follow `put` order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkItem<T> {
    sequence: u64,
    payload: T,
}

impl<T> WorkItem<T> {
    /// Create a work item
    pub fn new(sequence: u64, payload: T) -> Self {
        Self { sequence, payload }
    }

    /// Sequence number assigned at enqueue time
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    /// Borrow the payload
    pub fn payload(&self) -> &T {
        &self.payload
    }

    /// Take the payload
    pub fn into_payload(self) -> T {
        self.payload
    }
}

/// The function every worker applies to the items it takes from the queue
///
/// Implemented for any `Fn(T) -> Result<R>` closure. Retrying is the
/// handler's business: the pool never re-runs a failed item.
pub trait Handler<T>: Send + Sync {
    /// Value produced for each successfully handled item
    type Output: Send;

    /// Process one item
    ///
    /// # Errors
    ///
    /// Any error is reported to the supervisor as the failure of this item.
    fn handle(&self, item: T) -> Result<Self::Output>;

    /// Name used in logs
    fn name(&self) -> &str {
        "Handler"
    }
}

impl<T, R, F> Handler<T> for F
where
    F: Fn(T) -> Result<R> + Send + Sync,
    R: Send,
{
    type Output = R;

    fn handle(&self, item: T) -> Result<R> {
        self(item)
    }
}

/// A self-contained unit of work: a callable together with its arguments
pub trait Task: Send {
    /// Value produced by the task
    type Output: Send;

    /// Run the task
    ///
    /// # Errors
    ///
    /// Returns an error if the task fails
    fn execute(&mut self) -> Result<Self::Output>;

    /// Task type name for logging
    fn task_type(&self) -> &str {
        "Task"
    }
}

/// A boxed task that can be sent across threads
pub type BoxedTask<R> = Box<dyn Task<Output = R>>;

impl<R: Send> fmt::Debug for dyn Task<Output = R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Task({})", self.task_type())
    }
}

/// Helper to create a task from a closure
pub struct ClosureTask<F> {
    closure: Option<F>,
    name: String,
}

impl<F, R> ClosureTask<F>
where
    F: FnOnce() -> Result<R> + Send,
{
    /// Create a new closure task
    pub fn new(closure: F) -> Self {
        Self {
            closure: Some(closure),
            name: "ClosureTask".to_string(),
        }
    }

    /// Create a new closure task with a custom name
    pub fn with_name<S: Into<String>>(closure: F, name: S) -> Self {
        Self {
            closure: Some(closure),
            name: name.into(),
        }
    }

    /// Box the task for use as a queue payload
    pub fn boxed(self) -> BoxedTask<R>
    where
        F: 'static,
        R: Send + 'static,
    {
        Box::new(self)
    }
}

impl<F, R> Task for ClosureTask<F>
where
    F: FnOnce() -> Result<R> + Send,
    R: Send,
{
    type Output = R;

    fn execute(&mut self) -> Result<R> {
        match self.closure.take() {
            Some(closure) => closure(),
            None => Err(WorkError::other(format!(
                "{} already executed - cannot execute twice",
                self.name
            ))),
        }
    }

    fn task_type(&self) -> &str {
        &self.name
    }
}

/// Handler that runs task payloads
///
/// Lets a queue carry heterogeneous closures, the way a broker-backed queue
/// carries serialized callables.
#[derive(Debug, Default, Clone, Copy)]
pub struct TaskRunner;

impl<R: Send> Handler<BoxedTask<R>> for TaskRunner {
    type Output = R;

    fn handle(&self, mut task: BoxedTask<R>) -> Result<R> {
        log::trace!("running task {}", task.task_type());
        task.execute()
    }

    fn name(&self) -> &str {
        "TaskRunner"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_closure_handler() {
        let double = |x: u32| -> Result<u32> { Ok(x * 2) };
        assert_eq!(double.handle(21).unwrap(), 42);
        assert_eq!(Handler::<u32>::name(&double), "Handler");
    }

    #[test]
    fn test_closure_task_runs_once() {
        let mut task = ClosureTask::with_name(|| Ok(7), "Seven");
        assert_eq!(task.task_type(), "Seven");
        assert_eq!(task.execute().unwrap(), 7);
        assert!(task.execute().is_err());
    }

    #[test]
    fn test_task_runner() {
        let task = ClosureTask::new(|| Ok("hello".to_string())).boxed();
        assert_eq!(TaskRunner.handle(task).unwrap(), "hello");
    }

    #[test]
    fn test_boxed_task_debug() {
        let task: BoxedTask<u8> = ClosureTask::with_name(|| Ok(1), "One").boxed();
        assert_eq!(format!("{:?}", task), "Task(One)");
    }

    #[test]
    fn test_work_item_accessors() {
        let item = WorkItem::new(4, "payload");
        assert_eq!(item.sequence(), 4);
        assert_eq!(*item.payload(), "payload");
        assert_eq!(item.into_payload(), "payload");
    }
}
