//! Pluggable broker: a list store for tasks plus a key/value result store
//!
//! [`Broker`] is the seam for external queue services. [`MemoryBroker`] is an
//! in-process implementation with an availability switch for testing outage
//! handling, and [`BrokerQueue`] builds a FIFO task queue of serialized
//! [`TaskEnvelope`]s on top of any broker. Brokers that also implement
//! [`StreamBroker`] carry append-only streams read through consumer groups,
//! wrapped by [`BrokerStream`].

mod memory;
mod stream;
mod task_queue;

pub use memory::MemoryBroker;
pub use stream::{
    BrokerStream, GroupStart, PendingEntry, StreamBroker, StreamEntry, StreamFields, StreamId,
};
pub use task_queue::{BrokerQueue, TaskEnvelope};

use crate::core::{CancellationCallbackGuard, CancellationToken, Result};
use parking_lot::Mutex;
use std::sync::Arc;

/// List and result storage shared by producers and workers
///
/// Failures are reported as [`WorkError::BrokerUnavailable`](crate::WorkError::BrokerUnavailable),
/// except blocking calls stopped by [`interrupt`](Self::interrupt), which
/// fail with [`WorkError::Cancelled`](crate::WorkError::Cancelled).
pub trait Broker: Send + Sync {
    /// Start using the broker
    fn open(&self) -> Result<()> {
        Ok(())
    }

    /// Stop using the broker
    ///
    /// Once the last open session closes, blocked `pop_blocking` calls return.
    fn close(&self) -> Result<()> {
        Ok(())
    }

    /// Make blocked and later blocking calls fail until [`resume`](Self::resume)
    ///
    /// Data is left in place. Calls nest: each `interrupt` needs one `resume`.
    fn interrupt(&self) {}

    /// Undo one [`interrupt`](Self::interrupt)
    fn resume(&self) {}

    /// Append a payload to the tail of `queue`
    fn push(&self, queue: &str, payload: Vec<u8>) -> Result<()>;

    /// Remove the head of `queue`, waiting until one is available
    fn pop_blocking(&self, queue: &str) -> Result<Vec<u8>>;

    /// Number of payloads in `queue`
    fn length(&self, queue: &str) -> Result<usize>;

    /// Store a result under `key`, replacing any previous value
    fn store_result(&self, key: &str, value: Vec<u8>) -> Result<()>;
}

/// Keeps a broker open for as long as the session lives
///
/// [`open`](Self::open) calls [`Broker::open`]; dropping the session calls
/// [`Broker::close`], so the broker is released on every exit path.
pub struct BrokerSession<B: Broker> {
    broker: Arc<B>,
    flags: Arc<Mutex<SessionFlags>>,
}

#[derive(Debug, Default)]
struct SessionFlags {
    interrupted: bool,
    closed: bool,
}

impl<B: Broker> std::fmt::Debug for BrokerSession<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BrokerSession").finish_non_exhaustive()
    }
}

impl<B: Broker> BrokerSession<B> {
    /// Open `broker` for the lifetime of the returned session
    pub fn open(broker: Arc<B>) -> Result<Self> {
        broker.open()?;
        log::debug!("broker session opened");
        Ok(Self {
            broker,
            flags: Arc::new(Mutex::new(SessionFlags::default())),
        })
    }

    /// Shared handle to the broker
    pub fn broker(&self) -> Arc<B> {
        Arc::clone(&self.broker)
    }

    /// Interrupt the broker's blocking calls when `token` is cancelled
    ///
    /// The interrupt lasts until the session is dropped. Dropping the returned
    /// guard before cancellation unregisters it.
    pub fn interrupt_on_cancel(&self, token: &CancellationToken) -> CancellationCallbackGuard
    where
        B: 'static,
    {
        let broker = Arc::clone(&self.broker);
        let flags = Arc::clone(&self.flags);
        token.on_cancel(move || {
            let mut flags = flags.lock();
            if !flags.closed && !flags.interrupted {
                flags.interrupted = true;
                broker.interrupt();
                log::debug!("broker calls interrupted by cancellation");
            }
        })
    }
}

impl<B: Broker> Drop for BrokerSession<B> {
    fn drop(&mut self) {
        let interrupted = {
            let mut flags = self.flags.lock();
            flags.closed = true;
            std::mem::take(&mut flags.interrupted)
        };
        if interrupted {
            self.broker.resume();
        }
        match self.broker.close() {
            Ok(()) => log::debug!("broker session closed"),
            Err(e) => log::warn!("failed to close broker session: {}", e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_closes_on_drop() {
        let broker = Arc::new(MemoryBroker::new());
        {
            let session = BrokerSession::open(Arc::clone(&broker)).unwrap();
            assert_eq!(broker.open_sessions(), 1);
            session.broker().push("q", b"x".to_vec()).unwrap();
        }
        assert_eq!(broker.open_sessions(), 0);
    }

    #[test]
    fn test_cancel_interrupts_until_session_drops() {
        let broker = Arc::new(MemoryBroker::new());
        let token = CancellationToken::new();
        {
            let session = BrokerSession::open(Arc::clone(&broker)).unwrap();
            let _guard = session.interrupt_on_cancel(&token);
            assert!(!broker.is_interrupted());

            token.cancel();
            assert!(broker.is_interrupted());
            assert!(matches!(
                broker.pop_blocking("q"),
                Err(crate::WorkError::Cancelled { .. })
            ));
        }
        assert!(!broker.is_interrupted());
        assert_eq!(broker.open_sessions(), 0);
    }

    #[test]
    fn test_cancel_after_session_dropped_is_ignored() {
        let broker = Arc::new(MemoryBroker::new());
        let token = CancellationToken::new();
        let session = BrokerSession::open(Arc::clone(&broker)).unwrap();
        let guard = session.interrupt_on_cancel(&token);
        guard.detach();
        drop(session);

        token.cancel();
        assert!(!broker.is_interrupted());
    }

    #[test]
    fn test_open_fails_when_unavailable() {
        let broker = Arc::new(MemoryBroker::new());
        broker.set_available(false);
        assert!(BrokerSession::open(Arc::clone(&broker)).is_err());
        assert_eq!(broker.open_sessions(), 0);
    }
}
