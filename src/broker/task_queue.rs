//! FIFO task queue over a [`Broker`]

use super::Broker;
use crate::core::Result;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

/// A task as stored in the broker
///
/// Tasks name the operation to run by `kind`; the worker maps kinds to code.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskEnvelope {
    /// Unique task identifier
    pub id: Uuid,
    /// Operation name
    pub kind: String,
    /// Operation arguments
    pub args: serde_json::Value,
    /// When the task was enqueued
    pub enqueued_at: DateTime<Utc>,
}

impl TaskEnvelope {
    /// Create an envelope with a fresh id
    pub fn new<S: Into<String>>(kind: S, args: serde_json::Value) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind: kind.into(),
            args,
            enqueued_at: Utc::now(),
        }
    }

    /// Decode the arguments into a concrete type
    pub fn args<A: DeserializeOwned>(&self) -> Result<A> {
        Ok(serde_json::from_value(self.args.clone())?)
    }

    /// Key under which this task's result is stored
    pub fn result_key(&self) -> String {
        result_key(&self.id)
    }
}

fn result_key(id: &Uuid) -> String {
    format!("result:{}", id)
}

/// A named FIFO of [`TaskEnvelope`]s stored in a broker
///
/// ```rust
/// use rust_work_queue::broker::{BrokerQueue, MemoryBroker};
/// use std::sync::Arc;
///
/// # fn main() -> rust_work_queue::Result<()> {
/// let queue = BrokerQueue::new(Arc::new(MemoryBroker::new()), "default");
/// let id = queue.enqueue("random_between", (0, 100))?;
///
/// let task = queue.dequeue()?;
/// assert_eq!(task.id, id);
/// let (low, high): (i64, i64) = task.args()?;
/// assert_eq!((low, high), (0, 100));
/// # Ok(())
/// # }
/// ```
pub struct BrokerQueue<B: Broker> {
    broker: Arc<B>,
    name: String,
}

impl<B: Broker> std::fmt::Debug for BrokerQueue<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BrokerQueue")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

impl<B: Broker> Clone for BrokerQueue<B> {
    fn clone(&self) -> Self {
        Self {
            broker: Arc::clone(&self.broker),
            name: self.name.clone(),
        }
    }
}

impl<B: Broker> BrokerQueue<B> {
    /// Queue `name` on `broker`
    pub fn new<S: Into<String>>(broker: Arc<B>, name: S) -> Self {
        Self {
            broker,
            name: name.into(),
        }
    }

    /// Queue name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The broker behind this queue
    pub fn broker(&self) -> &Arc<B> {
        &self.broker
    }

    /// Serialize a task and append it; returns its id
    pub fn enqueue<S, A>(&self, kind: S, args: A) -> Result<Uuid>
    where
        S: Into<String>,
        A: Serialize,
    {
        let envelope = TaskEnvelope::new(kind, serde_json::to_value(args)?);
        self.push(&envelope)?;
        Ok(envelope.id)
    }

    /// Append an existing envelope
    pub fn push(&self, envelope: &TaskEnvelope) -> Result<()> {
        let payload = serde_json::to_vec(envelope)?;
        self.broker.push(&self.name, payload)?;
        log::debug!("enqueued task {} ({})", envelope.id, envelope.kind);
        Ok(())
    }

    /// Pop the oldest task, waiting until one is available
    pub fn dequeue(&self) -> Result<TaskEnvelope> {
        let payload = self.broker.pop_blocking(&self.name)?;
        let envelope: TaskEnvelope = serde_json::from_slice(&payload)?;
        log::debug!(
            "dequeued task {} ({}, args {})",
            envelope.id,
            envelope.kind,
            envelope.args
        );
        Ok(envelope)
    }

    /// Number of tasks waiting
    pub fn length(&self) -> Result<usize> {
        self.broker.length(&self.name)
    }

    /// Store a task result under `result:{id}`
    pub fn store_result<V: Serialize>(&self, id: &Uuid, value: &V) -> Result<()> {
        self.broker
            .store_result(&result_key(id), serde_json::to_vec(value)?)
    }
}
