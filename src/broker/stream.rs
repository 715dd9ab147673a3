//! Append-only streams read through consumer groups
//!
//! Producers append field maps to a named stream. Each consumer group keeps
//! its own read position: an entry is delivered to one consumer of the group,
//! stays pending until that consumer acknowledges it, and is never delivered
//! to the same group again.

use super::Broker;
use crate::core::{Result, WorkError};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

/// Field/value pairs of one stream entry
pub type StreamFields = BTreeMap<String, String>;

/// Position of an entry in a stream: milliseconds plus a sequence number
///
/// Ids are strictly increasing within a stream and print as `millis-seq`.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct StreamId {
    /// Wall-clock milliseconds when the entry was appended
    pub millis: u64,
    /// Sequence within the millisecond
    pub seq: u64,
}

impl StreamId {
    /// Position before every entry
    pub const ZERO: StreamId = StreamId { millis: 0, seq: 0 };

    /// Build an id from its parts
    pub const fn new(millis: u64, seq: u64) -> Self {
        Self { millis, seq }
    }
}

impl fmt::Display for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.millis, self.seq)
    }
}

impl FromStr for StreamId {
    type Err = WorkError;

    fn from_str(s: &str) -> Result<Self> {
        let invalid = || WorkError::other(format!("invalid stream id '{}'", s));
        let (millis, seq) = s.split_once('-').ok_or_else(invalid)?;
        Ok(Self {
            millis: millis.parse().map_err(|_| invalid())?,
            seq: seq.parse().map_err(|_| invalid())?,
        })
    }
}

/// One entry of a stream
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamEntry {
    /// Entry id
    pub id: StreamId,
    /// Entry payload
    pub fields: StreamFields,
}

impl StreamEntry {
    /// Value of `name`, if present
    pub fn field(&self, name: &str) -> Option<&str> {
        self.fields.get(name).map(String::as_str)
    }
}

/// An entry delivered to a consumer and not yet acknowledged
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingEntry {
    /// Entry id
    pub id: StreamId,
    /// Consumer the entry was delivered to
    pub consumer: String,
    /// Number of deliveries
    pub deliveries: u32,
}

/// Where a new consumer group starts reading
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum GroupStart {
    /// Only entries appended after the group was created
    #[default]
    Latest,
    /// Every entry already in the stream
    Beginning,
}

/// A [`Broker`] that also stores streams
pub trait StreamBroker: Broker {
    /// Append an entry to `stream`, creating the stream if needed
    fn append(&self, stream: &str, fields: StreamFields) -> Result<StreamId>;

    /// Create consumer group `group` on `stream`
    ///
    /// Creates the stream if needed. Returns `false` if the group already
    /// existed, leaving its position untouched.
    fn create_group(&self, stream: &str, group: &str, start: GroupStart) -> Result<bool>;

    /// Deliver up to `count` new entries to `consumer`
    ///
    /// With `block: None` this returns at once, possibly with no entries;
    /// otherwise it waits up to `block` for an append. Delivered entries are
    /// pending until acknowledged. Reading a group that does not exist fails
    /// with [`WorkError::BrokerUnavailable`].
    fn read_group(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        count: usize,
        block: Option<Duration>,
    ) -> Result<Vec<StreamEntry>>;

    /// Acknowledge entries; returns how many were pending
    fn ack(&self, stream: &str, group: &str, ids: &[StreamId]) -> Result<usize>;

    /// Entries of `group` delivered and not yet acknowledged, in id order
    fn pending(&self, stream: &str, group: &str) -> Result<Vec<PendingEntry>>;

    /// Number of entries in `stream`
    fn stream_length(&self, stream: &str) -> Result<usize>;
}

/// One consumer group on one stream of a [`StreamBroker`]
///
/// ```rust
/// use rust_work_queue::broker::{BrokerStream, MemoryBroker};
/// use std::sync::Arc;
///
/// # fn main() -> rust_work_queue::Result<()> {
/// let stream = BrokerStream::new(Arc::new(MemoryBroker::new()), "dhaka", "sensors");
/// stream.ensure_group()?;
///
/// let id = stream.append([("temperature", "31"), ("humidity", "80")])?;
/// let entries = stream.read("reader-1", 10, None)?;
/// assert_eq!(entries[0].id, id);
/// assert_eq!(entries[0].field("temperature"), Some("31"));
///
/// assert!(stream.ack(id)?);
/// assert_eq!(stream.pending_count()?, 0);
/// # Ok(())
/// # }
/// ```
pub struct BrokerStream<B: StreamBroker> {
    broker: Arc<B>,
    stream: String,
    group: String,
}

impl<B: StreamBroker> fmt::Debug for BrokerStream<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BrokerStream")
            .field("stream", &self.stream)
            .field("group", &self.group)
            .finish_non_exhaustive()
    }
}

impl<B: StreamBroker> Clone for BrokerStream<B> {
    fn clone(&self) -> Self {
        Self {
            broker: Arc::clone(&self.broker),
            stream: self.stream.clone(),
            group: self.group.clone(),
        }
    }
}

impl<B: StreamBroker> BrokerStream<B> {
    /// Group `group` on stream `stream`
    pub fn new<S: Into<String>, G: Into<String>>(broker: Arc<B>, stream: S, group: G) -> Self {
        Self {
            broker,
            stream: stream.into(),
            group: group.into(),
        }
    }

    /// Stream name
    pub fn stream(&self) -> &str {
        &self.stream
    }

    /// Group name
    pub fn group(&self) -> &str {
        &self.group
    }

    /// Create the group at the latest entry unless it already exists
    pub fn ensure_group(&self) -> Result<()> {
        if self
            .broker
            .create_group(&self.stream, &self.group, GroupStart::Latest)?
        {
            log::debug!("created group {} on stream {}", self.group, self.stream);
        }
        Ok(())
    }

    /// Append an entry built from `fields`
    pub fn append<I, K, V>(&self, fields: I) -> Result<StreamId>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let fields = fields
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();
        let id = self.broker.append(&self.stream, fields)?;
        log::debug!("appended {} to stream {}", id, self.stream);
        Ok(id)
    }

    /// Read new entries as `consumer`
    pub fn read(
        &self,
        consumer: &str,
        count: usize,
        block: Option<Duration>,
    ) -> Result<Vec<StreamEntry>> {
        self.broker
            .read_group(&self.stream, &self.group, consumer, count, block)
    }

    /// Acknowledge one entry; `false` if it was not pending
    pub fn ack(&self, id: StreamId) -> Result<bool> {
        Ok(self.broker.ack(&self.stream, &self.group, &[id])? == 1)
    }

    /// Number of unacknowledged entries in the group
    pub fn pending_count(&self) -> Result<usize> {
        Ok(self.broker.pending(&self.stream, &self.group)?.len())
    }

    /// Number of entries in the stream
    pub fn length(&self) -> Result<usize> {
        self.broker.stream_length(&self.stream)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::MemoryBroker;

    #[test]
    fn test_stream_id_text_form() {
        let id = StreamId::new(1_700_000_000_000, 3);
        assert_eq!(id.to_string(), "1700000000000-3");
        assert_eq!("1700000000000-3".parse::<StreamId>().unwrap(), id);
        assert!("17".parse::<StreamId>().is_err());
        assert!("a-b".parse::<StreamId>().is_err());
        assert!(StreamId::ZERO < StreamId::new(0, 1));
    }

    #[test]
    fn test_groups_on_one_stream_are_independent() {
        let broker = Arc::new(MemoryBroker::new());
        let first = BrokerStream::new(Arc::clone(&broker), "dhaka", "one");
        let second = BrokerStream::new(Arc::clone(&broker), "dhaka", "two");
        first.ensure_group().unwrap();
        second.ensure_group().unwrap();
        first.ensure_group().unwrap();

        first.append([("uuid", "a")]).unwrap();
        assert_eq!(first.read("c", 10, None).unwrap().len(), 1);
        assert_eq!(second.read("c", 10, None).unwrap().len(), 1);
        assert_eq!(first.length().unwrap(), 1);
        assert_eq!(first.pending_count().unwrap(), 1);
        assert_eq!(second.pending_count().unwrap(), 1);
    }

    #[test]
    fn test_ack_unknown_entry() {
        let stream = BrokerStream::new(Arc::new(MemoryBroker::new()), "s", "g");
        stream.ensure_group().unwrap();
        assert!(!stream.ack(StreamId::new(1, 0)).unwrap());
    }
}
