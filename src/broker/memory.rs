//! In-memory broker

use super::stream::{GroupStart, PendingEntry, StreamBroker, StreamEntry, StreamFields, StreamId};
use super::Broker;
use crate::core::{Result, WorkError};
use chrono::Utc;
use parking_lot::{Condvar, Mutex};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::time::{Duration, Instant};

#[derive(Default)]
struct MemoryState {
    lists: HashMap<String, VecDeque<Vec<u8>>>,
    results: HashMap<String, Vec<u8>>,
    streams: HashMap<String, StreamState>,
    available: bool,
    open_sessions: usize,
    /// Bumped each time the last open session closes
    close_generation: u64,
    /// Outstanding `interrupt` calls
    interrupts: usize,
}

#[derive(Default)]
struct StreamState {
    entries: Vec<StreamEntry>,
    last_id: StreamId,
    groups: HashMap<String, GroupState>,
}

#[derive(Default)]
struct GroupState {
    last_delivered: StreamId,
    pending: BTreeMap<StreamId, PendingEntry>,
}

/// A [`Broker`] backed by in-process maps
///
/// Lists, streams and results live in separate namespaces, like a broker
/// database and a result database. [`set_available(false)`](Self::set_available)
/// makes every operation fail with [`WorkError::BrokerUnavailable`] and wakes
/// blocked pops and reads.
///
/// ```rust
/// use rust_work_queue::broker::{Broker, MemoryBroker};
///
/// let broker = MemoryBroker::new();
/// broker.push("default", b"first".to_vec()).unwrap();
/// broker.push("default", b"second".to_vec()).unwrap();
/// assert_eq!(broker.length("default").unwrap(), 2);
/// assert_eq!(broker.pop_blocking("default").unwrap(), b"first".to_vec());
/// ```
pub struct MemoryBroker {
    state: Mutex<MemoryState>,
    pushed: Condvar,
}

impl std::fmt::Debug for MemoryBroker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("MemoryBroker")
            .field("lists", &state.lists.len())
            .field("streams", &state.streams.len())
            .field("results", &state.results.len())
            .field("available", &state.available)
            .field("open_sessions", &state.open_sessions)
            .finish()
    }
}

impl Default for MemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBroker {
    /// Create an empty, available broker
    pub fn new() -> Self {
        Self {
            state: Mutex::new(MemoryState {
                available: true,
                ..Default::default()
            }),
            pushed: Condvar::new(),
        }
    }

    /// Simulate an outage (`false`) or recovery (`true`)
    pub fn set_available(&self, available: bool) {
        self.state.lock().available = available;
        if !available {
            log::warn!("memory broker marked unavailable");
        }
        self.pushed.notify_all();
    }

    /// Whether the broker currently accepts operations
    pub fn is_available(&self) -> bool {
        self.state.lock().available
    }

    /// Number of sessions opened and not yet closed
    pub fn open_sessions(&self) -> usize {
        self.state.lock().open_sessions
    }

    /// Whether blocking calls are currently interrupted
    pub fn is_interrupted(&self) -> bool {
        self.state.lock().interrupts > 0
    }

    /// Read a stored result
    pub fn result(&self, key: &str) -> Option<Vec<u8>> {
        self.state.lock().results.get(key).cloned()
    }

    /// Number of stored results
    pub fn result_count(&self) -> usize {
        self.state.lock().results.len()
    }

    fn ensure_available(state: &MemoryState, operation: &str) -> Result<()> {
        if state.available {
            Ok(())
        } else {
            Err(WorkError::broker_unavailable(
                operation,
                "memory broker is unavailable",
            ))
        }
    }

    /// Checks shared by every blocking call before it takes data or waits
    fn ensure_may_block(state: &MemoryState, operation: &str, closes_at_start: u64) -> Result<()> {
        Self::ensure_available(state, operation)?;
        if state.interrupts > 0 {
            return Err(WorkError::cancelled(format!("broker {} interrupted", operation)));
        }
        if state.close_generation != closes_at_start {
            return Err(WorkError::broker_unavailable(
                operation,
                "broker closed while waiting",
            ));
        }
        Ok(())
    }

    fn next_stream_id(last: StreamId) -> StreamId {
        let now = u64::try_from(Utc::now().timestamp_millis()).unwrap_or(0);
        if now > last.millis {
            StreamId::new(now, 0)
        } else {
            StreamId::new(last.millis, last.seq + 1)
        }
    }

    fn deliver(
        state: &mut MemoryState,
        stream: &str,
        group: &str,
        consumer: &str,
        count: usize,
    ) -> Result<Vec<StreamEntry>> {
        let missing_group = || {
            WorkError::broker_unavailable(
                "read_group",
                format!("no consumer group '{}' on stream '{}'", group, stream),
            )
        };
        let StreamState {
            entries, groups, ..
        } = state.streams.get_mut(stream).ok_or_else(missing_group)?;
        let group_state = groups.get_mut(group).ok_or_else(missing_group)?;

        let start = entries.partition_point(|e| e.id <= group_state.last_delivered);
        let batch: Vec<StreamEntry> = entries[start..].iter().take(count).cloned().collect();
        if let Some(last) = batch.last() {
            group_state.last_delivered = last.id;
        }
        for entry in &batch {
            group_state.pending.insert(
                entry.id,
                PendingEntry {
                    id: entry.id,
                    consumer: consumer.to_string(),
                    deliveries: 1,
                },
            );
        }
        Ok(batch)
    }
}

impl Broker for MemoryBroker {
    fn open(&self) -> Result<()> {
        let mut state = self.state.lock();
        Self::ensure_available(&state, "open")?;
        state.open_sessions += 1;
        Ok(())
    }

    fn close(&self) -> Result<()> {
        let mut state = self.state.lock();
        if state.open_sessions > 0 {
            state.open_sessions -= 1;
            if state.open_sessions == 0 {
                state.close_generation += 1;
            }
        }
        drop(state);
        self.pushed.notify_all();
        Ok(())
    }

    fn interrupt(&self) {
        self.state.lock().interrupts += 1;
        self.pushed.notify_all();
    }

    fn resume(&self) {
        let mut state = self.state.lock();
        state.interrupts = state.interrupts.saturating_sub(1);
    }

    fn push(&self, queue: &str, payload: Vec<u8>) -> Result<()> {
        let mut state = self.state.lock();
        Self::ensure_available(&state, "push")?;
        state
            .lists
            .entry(queue.to_string())
            .or_default()
            .push_back(payload);
        drop(state);
        self.pushed.notify_all();
        Ok(())
    }

    fn pop_blocking(&self, queue: &str) -> Result<Vec<u8>> {
        let mut state = self.state.lock();
        let closes_at_start = state.close_generation;
        loop {
            Self::ensure_may_block(&state, "pop", closes_at_start)?;
            if let Some(payload) = state.lists.get_mut(queue).and_then(VecDeque::pop_front) {
                return Ok(payload);
            }
            self.pushed.wait(&mut state);
        }
    }

    fn length(&self, queue: &str) -> Result<usize> {
        let state = self.state.lock();
        Self::ensure_available(&state, "length")?;
        Ok(state.lists.get(queue).map_or(0, VecDeque::len))
    }

    fn store_result(&self, key: &str, value: Vec<u8>) -> Result<()> {
        let mut state = self.state.lock();
        Self::ensure_available(&state, "store_result")?;
        state.results.insert(key.to_string(), value);
        Ok(())
    }
}

impl StreamBroker for MemoryBroker {
    fn append(&self, stream: &str, fields: StreamFields) -> Result<StreamId> {
        let mut state = self.state.lock();
        Self::ensure_available(&state, "append")?;
        let stream_state = state.streams.entry(stream.to_string()).or_default();
        let id = Self::next_stream_id(stream_state.last_id);
        stream_state.last_id = id;
        stream_state.entries.push(StreamEntry { id, fields });
        drop(state);
        self.pushed.notify_all();
        Ok(id)
    }

    fn create_group(&self, stream: &str, group: &str, start: GroupStart) -> Result<bool> {
        let mut state = self.state.lock();
        Self::ensure_available(&state, "create_group")?;
        let stream_state = state.streams.entry(stream.to_string()).or_default();
        if stream_state.groups.contains_key(group) {
            return Ok(false);
        }
        let last_delivered = match start {
            GroupStart::Latest => stream_state.last_id,
            GroupStart::Beginning => StreamId::ZERO,
        };
        stream_state.groups.insert(
            group.to_string(),
            GroupState {
                last_delivered,
                pending: BTreeMap::new(),
            },
        );
        Ok(true)
    }

    fn read_group(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        count: usize,
        block: Option<Duration>,
    ) -> Result<Vec<StreamEntry>> {
        if count == 0 {
            return Err(WorkError::capacity_misuse("count", "count must be at least 1"));
        }
        let deadline = block.map(|timeout| Instant::now() + timeout);
        let mut state = self.state.lock();
        let closes_at_start = state.close_generation;
        loop {
            Self::ensure_may_block(&state, "read_group", closes_at_start)?;
            let batch = Self::deliver(&mut state, stream, group, consumer, count)?;
            if !batch.is_empty() {
                return Ok(batch);
            }
            match deadline {
                Some(deadline) if Instant::now() < deadline => {
                    self.pushed.wait_until(&mut state, deadline);
                }
                _ => return Ok(batch),
            }
        }
    }

    fn ack(&self, stream: &str, group: &str, ids: &[StreamId]) -> Result<usize> {
        let mut state = self.state.lock();
        Self::ensure_available(&state, "ack")?;
        let Some(group_state) = state
            .streams
            .get_mut(stream)
            .and_then(|s| s.groups.get_mut(group))
        else {
            return Ok(0);
        };
        Ok(ids
            .iter()
            .filter(|id| group_state.pending.remove(id).is_some())
            .count())
    }

    fn pending(&self, stream: &str, group: &str) -> Result<Vec<PendingEntry>> {
        let state = self.state.lock();
        Self::ensure_available(&state, "pending")?;
        Ok(state
            .streams
            .get(stream)
            .and_then(|s| s.groups.get(group))
            .map(|g| g.pending.values().cloned().collect())
            .unwrap_or_default())
    }

    fn stream_length(&self, stream: &str) -> Result<usize> {
        let state = self.state.lock();
        Self::ensure_available(&state, "stream_length")?;
        Ok(state.streams.get(stream).map_or(0, |s| s.entries.len()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_fifo_per_queue() {
        let broker = MemoryBroker::new();
        broker.push("a", vec![1]).unwrap();
        broker.push("b", vec![9]).unwrap();
        broker.push("a", vec![2]).unwrap();

        assert_eq!(broker.length("a").unwrap(), 2);
        assert_eq!(broker.length("missing").unwrap(), 0);
        assert_eq!(broker.pop_blocking("a").unwrap(), vec![1]);
        assert_eq!(broker.pop_blocking("a").unwrap(), vec![2]);
        assert_eq!(broker.pop_blocking("b").unwrap(), vec![9]);
    }

    #[test]
    fn test_pop_wakes_on_push() {
        let broker = Arc::new(MemoryBroker::new());
        let b = Arc::clone(&broker);
        let popper = thread::spawn(move || b.pop_blocking("q"));

        thread::sleep(Duration::from_millis(30));
        broker.push("q", vec![7]).unwrap();
        assert_eq!(popper.join().unwrap().unwrap(), vec![7]);
    }

    #[test]
    fn test_pop_wakes_on_outage() {
        let broker = Arc::new(MemoryBroker::new());
        let b = Arc::clone(&broker);
        let popper = thread::spawn(move || b.pop_blocking("q"));

        thread::sleep(Duration::from_millis(30));
        broker.set_available(false);
        assert!(matches!(
            popper.join().unwrap(),
            Err(WorkError::BrokerUnavailable { .. })
        ));
    }

    #[test]
    fn test_pop_wakes_on_close() {
        let broker = Arc::new(MemoryBroker::new());
        broker.open().unwrap();
        let b = Arc::clone(&broker);
        let popper = thread::spawn(move || b.pop_blocking("q"));

        thread::sleep(Duration::from_millis(30));
        broker.close().unwrap();
        assert!(popper.join().unwrap().is_err());
    }

    #[test]
    fn test_closing_one_of_two_sessions_keeps_pops_waiting() {
        let broker = Arc::new(MemoryBroker::new());
        broker.open().unwrap();
        broker.open().unwrap();
        let b = Arc::clone(&broker);
        let popper = thread::spawn(move || b.pop_blocking("q"));

        thread::sleep(Duration::from_millis(30));
        broker.close().unwrap();
        thread::sleep(Duration::from_millis(30));
        assert!(!popper.is_finished());

        broker.push("q", vec![3]).unwrap();
        assert_eq!(popper.join().unwrap().unwrap(), vec![3]);
        broker.close().unwrap();
    }

    #[test]
    fn test_interrupt_fails_pops_until_resumed() {
        let broker = Arc::new(MemoryBroker::new());
        let b = Arc::clone(&broker);
        let popper = thread::spawn(move || b.pop_blocking("q"));

        thread::sleep(Duration::from_millis(30));
        broker.interrupt();
        assert!(matches!(
            popper.join().unwrap(),
            Err(WorkError::Cancelled { .. })
        ));

        // data stays in the list while interrupted
        broker.push("q", vec![5]).unwrap();
        assert!(broker.pop_blocking("q").is_err());
        assert!(broker.is_interrupted());

        broker.resume();
        assert_eq!(broker.pop_blocking("q").unwrap(), vec![5]);
    }

    #[test]
    fn test_stream_ids_increase() {
        let broker = MemoryBroker::new();
        let ids: Vec<_> = (0..50)
            .map(|i| {
                broker
                    .append("s", StreamFields::from([("n".to_string(), i.to_string())]))
                    .unwrap()
            })
            .collect();
        assert!(ids.windows(2).all(|w| w[0] < w[1]));
        assert_eq!(broker.stream_length("s").unwrap(), 50);
        assert_eq!(broker.stream_length("missing").unwrap(), 0);
    }

    #[test]
    fn test_group_starts_at_latest_or_beginning() {
        let broker = MemoryBroker::new();
        broker.append("s", StreamFields::new()).unwrap();

        assert!(broker.create_group("s", "late", GroupStart::Latest).unwrap());
        assert!(broker.create_group("s", "early", GroupStart::Beginning).unwrap());
        assert!(!broker.create_group("s", "late", GroupStart::Beginning).unwrap());

        assert!(broker.read_group("s", "late", "c", 10, None).unwrap().is_empty());
        assert_eq!(broker.read_group("s", "early", "c", 10, None).unwrap().len(), 1);
    }

    #[test]
    fn test_read_group_delivers_once_and_tracks_pending() {
        let broker = MemoryBroker::new();
        broker.create_group("s", "g", GroupStart::Latest).unwrap();
        let first = broker.append("s", StreamFields::new()).unwrap();
        let second = broker.append("s", StreamFields::new()).unwrap();

        let a = broker.read_group("s", "g", "alice", 1, None).unwrap();
        let b = broker.read_group("s", "g", "bob", 5, None).unwrap();
        assert_eq!(a.iter().map(|e| e.id).collect::<Vec<_>>(), vec![first]);
        assert_eq!(b.iter().map(|e| e.id).collect::<Vec<_>>(), vec![second]);
        assert!(broker.read_group("s", "g", "alice", 5, None).unwrap().is_empty());

        let pending = broker.pending("s", "g").unwrap();
        assert_eq!(pending.len(), 2);
        assert_eq!(pending[0].consumer, "alice");

        assert_eq!(broker.ack("s", "g", &[first, first]).unwrap(), 1);
        assert_eq!(broker.pending("s", "g").unwrap().len(), 1);
        assert_eq!(broker.ack("s", "missing", &[second]).unwrap(), 0);
    }

    #[test]
    fn test_read_group_blocks_until_append_or_timeout() {
        let broker = Arc::new(MemoryBroker::new());
        broker.create_group("s", "g", GroupStart::Latest).unwrap();

        let started = Instant::now();
        let empty = broker
            .read_group("s", "g", "c", 1, Some(Duration::from_millis(30)))
            .unwrap();
        assert!(empty.is_empty());
        assert!(started.elapsed() >= Duration::from_millis(30));

        let b = Arc::clone(&broker);
        let reader = thread::spawn(move || {
            b.read_group("s", "g", "c", 1, Some(Duration::from_secs(5)))
        });
        thread::sleep(Duration::from_millis(20));
        broker.append("s", StreamFields::new()).unwrap();
        assert_eq!(reader.join().unwrap().unwrap().len(), 1);
    }

    #[test]
    fn test_read_group_errors() {
        let broker = MemoryBroker::new();
        assert!(matches!(
            broker.read_group("s", "g", "c", 1, None),
            Err(WorkError::BrokerUnavailable { .. })
        ));
        broker.create_group("s", "g", GroupStart::Latest).unwrap();
        assert!(matches!(
            broker.read_group("s", "g", "c", 0, None),
            Err(WorkError::CapacityMisuse { .. })
        ));
    }

    #[test]
    fn test_outage_and_recovery() {
        let broker = MemoryBroker::new();
        broker.set_available(false);
        assert!(broker.push("q", vec![1]).is_err());
        assert!(broker.store_result("k", vec![1]).is_err());
        assert!(broker.length("q").is_err());

        broker.set_available(true);
        broker.store_result("k", vec![1]).unwrap();
        assert_eq!(broker.result("k"), Some(vec![1]));
        assert_eq!(broker.result_count(), 1);
    }
}
