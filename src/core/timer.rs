//! One-shot deadline timer
//!
//! A [`DeadlineTimer`] cancels its [`CancellationToken`] when the deadline
//! passes. It can be rescheduled while pending, but once it has fired or has
//! been disarmed it cannot be armed again.
//!
//! ```rust
//! use rust_work_queue::{CancellationToken, DeadlineTimer};
//! use std::time::Duration;
//!
//! let token = CancellationToken::new();
//! let timer = DeadlineTimer::new(token.clone());
//! timer.arm(Duration::from_millis(10)).unwrap();
//!
//! std::thread::sleep(Duration::from_millis(50));
//! assert!(token.is_cancelled());
//! assert!(timer.arm(Duration::from_secs(1)).is_err());
//! ```

use crate::core::cancellation::{CancellationReason, CancellationToken};
use crate::core::error::{Result, WorkError};
use parking_lot::{Condvar, Mutex};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

/// Errors from arming or disarming a timer
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum TimerError {
    /// The timer already fired
    #[error("cannot reschedule an expired timer")]
    Expired,
    /// The timer was disarmed
    #[error("cannot reschedule a disarmed timer")]
    Disarmed,
}

/// Lifecycle of a [`DeadlineTimer`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerPhase {
    /// Created, never armed
    Idle,
    /// Waiting for the deadline
    Armed,
    /// The deadline passed and the token was cancelled
    Fired,
    /// Stopped before the deadline
    Disarmed,
}

struct TimerState {
    phase: TimerPhase,
    deadline: Option<Instant>,
    timeout: Duration,
    watcher_running: bool,
}

struct TimerInner {
    state: Mutex<TimerState>,
    changed: Condvar,
    token: CancellationToken,
}

/// A one-shot timer that cancels a token at its deadline
pub struct DeadlineTimer {
    inner: Arc<TimerInner>,
}

impl std::fmt::Debug for DeadlineTimer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("DeadlineTimer")
            .field("phase", &state.phase)
            .field("deadline", &state.deadline)
            .finish()
    }
}

impl DeadlineTimer {
    /// Create an idle timer bound to `token`
    pub fn new(token: CancellationToken) -> Self {
        Self {
            inner: Arc::new(TimerInner {
                state: Mutex::new(TimerState {
                    phase: TimerPhase::Idle,
                    deadline: None,
                    timeout: Duration::ZERO,
                    watcher_running: false,
                }),
                changed: Condvar::new(),
                token,
            }),
        }
    }

    /// Arm (or reschedule) the timer to fire `timeout` from now
    pub fn arm(&self, timeout: Duration) -> std::result::Result<(), TimerError> {
        self.schedule(Instant::now() + timeout, timeout)
    }

    /// Arm (or reschedule) the timer to fire at `deadline`
    ///
    /// A deadline that has already passed fires immediately.
    pub fn arm_at(&self, deadline: Instant) -> std::result::Result<(), TimerError> {
        let timeout = deadline.saturating_duration_since(Instant::now());
        self.schedule(deadline, timeout)
    }

    fn schedule(
        &self,
        deadline: Instant,
        timeout: Duration,
    ) -> std::result::Result<(), TimerError> {
        let mut state = self.inner.state.lock();
        match state.phase {
            TimerPhase::Fired => return Err(TimerError::Expired),
            TimerPhase::Disarmed => return Err(TimerError::Disarmed),
            TimerPhase::Idle | TimerPhase::Armed => {}
        }

        state.timeout = timeout;
        if Instant::now() >= deadline {
            state.phase = TimerPhase::Fired;
            state.deadline = None;
            drop(state);
            self.inner.changed.notify_all();
            log::debug!("deadline already passed, firing immediately");
            self.inner
                .token
                .cancel_with_reason(CancellationReason::Timeout(timeout));
            return Ok(());
        }

        state.phase = TimerPhase::Armed;
        state.deadline = Some(deadline);
        if state.watcher_running {
            drop(state);
            self.inner.changed.notify_all();
        } else {
            state.watcher_running = true;
            drop(state);
            let inner = Arc::clone(&self.inner);
            thread::Builder::new()
                .name("deadline-timer".to_string())
                .spawn(move || Self::watch(inner))
                .map_err(|e| {
                    log::error!("failed to spawn deadline timer thread: {}", e);
                    let mut state = self.inner.state.lock();
                    state.watcher_running = false;
                    state.phase = TimerPhase::Disarmed;
                    TimerError::Disarmed
                })?;
        }
        Ok(())
    }

    /// Stop a pending timer
    ///
    /// An idle timer is disarmed without ever firing. Disarming a fired
    /// timer fails with [`TimerError::Expired`], and disarming twice fails
    /// with [`TimerError::Disarmed`].
    pub fn disarm(&self) -> std::result::Result<(), TimerError> {
        let mut state = self.inner.state.lock();
        match state.phase {
            TimerPhase::Fired => Err(TimerError::Expired),
            TimerPhase::Disarmed => Err(TimerError::Disarmed),
            TimerPhase::Idle | TimerPhase::Armed => {
                state.phase = TimerPhase::Disarmed;
                state.deadline = None;
                drop(state);
                self.inner.changed.notify_all();
                Ok(())
            }
        }
    }

    /// Current phase
    pub fn phase(&self) -> TimerPhase {
        self.inner.state.lock().phase
    }

    /// Whether the timer has fired
    pub fn has_fired(&self) -> bool {
        self.phase() == TimerPhase::Fired
    }

    /// The token this timer cancels
    pub fn token(&self) -> &CancellationToken {
        &self.inner.token
    }

    fn watch(inner: Arc<TimerInner>) {
        let mut state = inner.state.lock();
        loop {
            match (state.phase, state.deadline) {
                (TimerPhase::Armed, Some(deadline)) => {
                    if Instant::now() >= deadline {
                        state.phase = TimerPhase::Fired;
                        state.deadline = None;
                        state.watcher_running = false;
                        let timeout = state.timeout;
                        drop(state);
                        log::debug!("deadline of {:?} reached", timeout);
                        inner
                            .token
                            .cancel_with_reason(CancellationReason::Timeout(timeout));
                        return;
                    }
                    inner.changed.wait_until(&mut state, deadline);
                }
                _ => {
                    state.watcher_running = false;
                    return;
                }
            }
        }
    }
}

impl Drop for DeadlineTimer {
    fn drop(&mut self) {
        // Releases the watcher thread; a fired or disarmed timer is left as is.
        let _ = self.disarm();
    }
}

/// Run `f` under a deadline
///
/// `f` receives a token that is cancelled when `timeout` elapses and is
/// expected to observe it cooperatively. If the deadline fired before `f`
/// returned, the result is replaced by [`WorkError::DeadlineExceeded`].
///
/// ```rust
/// use rust_work_queue::run_with_timeout;
/// use std::time::Duration;
///
/// let value = run_with_timeout(Duration::from_secs(5), |_token| Ok(42)).unwrap();
/// assert_eq!(value, 42);
/// ```
pub fn run_with_timeout<R, F>(timeout: Duration, f: F) -> Result<R>
where
    F: FnOnce(&CancellationToken) -> Result<R>,
{
    let token = CancellationToken::new();
    let timer = DeadlineTimer::new(token.clone());
    timer.arm(timeout)?;

    let result = f(&token);

    if timer.disarm().is_err() {
        return Err(WorkError::deadline_exceeded(timeout.as_millis() as u64));
    }
    result
}
