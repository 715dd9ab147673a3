//! Cooperative cancellation
//!
//! A [`CancellationToken`] is shared between the supervisor, the producer and
//! every worker. Cancelling it never interrupts running code: workers observe
//! it at their checkpoints (before and after taking an item from the queue)
//! and stop starting new items.
//!
//! # Example
//!
//! ```rust
//! use rust_work_queue::CancellationToken;
//!
//! let parent = CancellationToken::new();
//! let child = parent.child();
//!
//! parent.cancel();
//!
//! assert!(parent.is_cancelled());
//! assert!(child.is_cancelled());
//! ```

use crate::core::error::{Result, WorkError};
use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

static NEXT_CALLBACK_ID: AtomicUsize = AtomicUsize::new(1);

fn next_callback_id() -> usize {
    NEXT_CALLBACK_ID.fetch_add(1, Ordering::Relaxed)
}

/// Reason for cancellation
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CancellationReason {
    /// Explicitly cancelled via `cancel()`
    Manual,
    /// A deadline timer fired
    Timeout(Duration),
    /// The parent token was cancelled
    ParentCancelled,
    /// A producer or worker reported a failure
    Failure(String),
    /// Custom cancellation reason
    Custom(String),
}

impl std::fmt::Display for CancellationReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CancellationReason::Manual => write!(f, "manually cancelled"),
            CancellationReason::Timeout(d) => write!(f, "timeout after {:?}", d),
            CancellationReason::ParentCancelled => write!(f, "parent was cancelled"),
            CancellationReason::Failure(msg) => write!(f, "failure: {}", msg),
            CancellationReason::Custom(msg) => write!(f, "{}", msg),
        }
    }
}

struct StoredCallback {
    id: usize,
    callback: Box<dyn FnOnce() + Send + Sync>,
}

struct TokenInner {
    cancelled: AtomicBool,
    children: RwLock<Vec<Weak<TokenInner>>>,
    callbacks: RwLock<Vec<StoredCallback>>,
    reason: RwLock<Option<CancellationReason>>,
}

impl TokenInner {
    fn new() -> Self {
        Self {
            cancelled: AtomicBool::new(false),
            children: RwLock::new(Vec::new()),
            callbacks: RwLock::new(Vec::new()),
            reason: RwLock::new(None),
        }
    }
}

/// A thread-safe, clonable cancellation flag with reasons and callbacks
///
/// Clones share state. Child tokens created with [`child()`](Self::child) are
/// cancelled together with their parent but can also be cancelled on their own.
#[derive(Clone)]
pub struct CancellationToken {
    inner: Arc<TokenInner>,
}

impl std::fmt::Debug for CancellationToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CancellationToken")
            .field("cancelled", &self.is_cancelled())
            .field("reason", &self.reason())
            .finish()
    }
}

impl CancellationToken {
    /// Create a new token (not cancelled)
    pub fn new() -> Self {
        Self {
            inner: Arc::new(TokenInner::new()),
        }
    }

    /// Create a child token linked to this one
    ///
    /// If this token is already cancelled the child starts cancelled.
    pub fn child(&self) -> Self {
        let child = CancellationToken {
            inner: Arc::new(TokenInner::new()),
        };

        self.inner
            .children
            .write()
            .push(Arc::downgrade(&child.inner));

        if self.is_cancelled() {
            child.cancel_with_reason(CancellationReason::ParentCancelled);
        }

        child
    }

    /// Cancel with [`CancellationReason::Manual`]
    pub fn cancel(&self) {
        self.cancel_with_reason(CancellationReason::Manual);
    }

    /// Cancel with a specific reason
    ///
    /// Only the first call has an effect: it records the reason, runs the
    /// registered callbacks and cancels all children.
    pub fn cancel_with_reason(&self, reason: CancellationReason) {
        {
            // The reason is published before the flag so observers of
            // `is_cancelled` always see it.
            let mut slot = self.inner.reason.write();
            if slot.is_some() {
                return;
            }
            *slot = Some(reason);
            self.inner.cancelled.store(true, Ordering::SeqCst);
        }

        let callbacks: Vec<_> = self.inner.callbacks.write().drain(..).collect();
        for stored in callbacks {
            (stored.callback)();
        }

        let children: Vec<_> = self
            .inner
            .children
            .read()
            .iter()
            .filter_map(Weak::upgrade)
            .collect();
        for child_inner in children {
            CancellationToken { inner: child_inner }
                .cancel_with_reason(CancellationReason::ParentCancelled);
        }
    }

    /// Check if this token has been cancelled
    #[inline]
    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::Acquire)
    }

    /// The cancellation reason, if cancelled
    pub fn reason(&self) -> Option<CancellationReason> {
        self.inner.reason.read().clone()
    }

    /// Returns [`WorkError::Cancelled`] if cancelled, `Ok(())` otherwise
    ///
    /// ```rust
    /// use rust_work_queue::{CancellationToken, Result};
    ///
    /// fn process(token: &CancellationToken) -> Result<()> {
    ///     for _ in 0..100 {
    ///         token.check()?;
    ///     }
    ///     Ok(())
    /// }
    /// # assert!(process(&CancellationToken::new()).is_ok());
    /// ```
    pub fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            let reason = self
                .reason()
                .map(|r| r.to_string())
                .unwrap_or_else(|| "unknown".to_string());
            Err(WorkError::cancelled(reason))
        } else {
            Ok(())
        }
    }

    /// Register a callback to run on cancellation
    ///
    /// Runs immediately if the token is already cancelled. Dropping the
    /// returned guard unregisters the callback unless it was detached.
    pub fn on_cancel<F>(&self, callback: F) -> CancellationCallbackGuard
    where
        F: FnOnce() + Send + Sync + 'static,
    {
        let id = next_callback_id();

        // Registration and cancellation both take the callbacks lock, so a
        // callback is either drained by `cancel_with_reason` or run here.
        let mut callbacks = self.inner.callbacks.write();
        if self.is_cancelled() {
            drop(callbacks);
            callback();
        } else {
            callbacks.push(StoredCallback {
                id,
                callback: Box::new(callback),
            });
        }

        CancellationCallbackGuard {
            token: Some(self.clone()),
            callback_id: id,
        }
    }

    fn remove_callback(&self, callback_id: usize) {
        self.inner.callbacks.write().retain(|c| c.id != callback_id);
    }
}

impl Default for CancellationToken {
    fn default() -> Self {
        Self::new()
    }
}

/// Guard returned by [`CancellationToken::on_cancel()`]
pub struct CancellationCallbackGuard {
    token: Option<CancellationToken>,
    callback_id: usize,
}

impl Drop for CancellationCallbackGuard {
    fn drop(&mut self) {
        if let Some(token) = self.token.take() {
            if !token.is_cancelled() {
                token.remove_callback(self.callback_id);
            }
        }
    }
}

impl CancellationCallbackGuard {
    /// Keep the callback registered after the guard is dropped
    pub fn detach(mut self) {
        self.token = None;
    }
}
