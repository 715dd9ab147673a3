//! Concurrency limit
//!
//! [`ConcurrencyLimit`] is a counting semaphore: at most `permits` holders of
//! a [`Permit`] exist at once. [`run_limited`] uses one to run a closure over
//! many items with bounded parallelism, returning results in input order.

use crate::core::{Result, WorkError};
use parking_lot::{Condvar, Mutex};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::thread;
use std::time::{Duration, Instant};

/// A counting semaphore
///
/// ```rust
/// use rust_work_queue::limit::ConcurrencyLimit;
///
/// let limit = ConcurrencyLimit::new(2).unwrap();
/// let a = limit.acquire();
/// let b = limit.acquire();
/// assert!(limit.is_locked());
/// assert!(limit.try_acquire().is_none());
///
/// drop(a);
/// assert_eq!(limit.available(), 1);
/// # drop(b);
/// ```
pub struct ConcurrencyLimit {
    permits: usize,
    available: Mutex<usize>,
    released: Condvar,
}

impl std::fmt::Debug for ConcurrencyLimit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConcurrencyLimit")
            .field("permits", &self.permits)
            .field("available", &self.available())
            .finish()
    }
}

impl ConcurrencyLimit {
    /// Create a limit allowing `permits` concurrent holders
    pub fn new(permits: usize) -> Result<Self> {
        if permits == 0 {
            return Err(WorkError::capacity_misuse(
                "permits",
                "Concurrency limit must allow at least 1 holder",
            ));
        }
        Ok(Self {
            permits,
            available: Mutex::new(permits),
            released: Condvar::new(),
        })
    }

    /// Total number of permits
    pub fn permits(&self) -> usize {
        self.permits
    }

    /// Permits not currently held
    pub fn available(&self) -> usize {
        *self.available.lock()
    }

    /// Whether every permit is held
    pub fn is_locked(&self) -> bool {
        self.available() == 0
    }

    /// Take a permit, blocking until one is free
    pub fn acquire(&self) -> Permit<'_> {
        let mut available = self.available.lock();
        while *available == 0 {
            self.released.wait(&mut available);
        }
        *available -= 1;
        Permit { limit: self }
    }

    /// Take a permit if one is free
    pub fn try_acquire(&self) -> Option<Permit<'_>> {
        let mut available = self.available.lock();
        if *available == 0 {
            return None;
        }
        *available -= 1;
        Some(Permit { limit: self })
    }

    /// Take a permit, waiting at most `timeout`
    pub fn acquire_timeout(&self, timeout: Duration) -> Option<Permit<'_>> {
        let deadline = Instant::now() + timeout;
        let mut available = self.available.lock();
        while *available == 0 {
            if self
                .released
                .wait_until(&mut available, deadline)
                .timed_out()
                && *available == 0
            {
                return None;
            }
        }
        *available -= 1;
        Some(Permit { limit: self })
    }

    fn release(&self) {
        *self.available.lock() += 1;
        self.released.notify_one();
    }
}

/// A held slot of a [`ConcurrencyLimit`]; released on drop
#[derive(Debug)]
pub struct Permit<'a> {
    limit: &'a ConcurrencyLimit,
}

impl Drop for Permit<'_> {
    fn drop(&mut self) {
        self.limit.release();
    }
}

/// Run `f` on every item with at most `limit.permits()` calls in flight
///
/// Results come back in input order. Other users of the same limit count
/// against the bound too. A panic in `f` is reported as
/// [`WorkError::WorkerPanic`] after every other item has finished.
///
/// ```rust
/// use rust_work_queue::limit::{run_limited, ConcurrencyLimit};
///
/// let limit = ConcurrencyLimit::new(3).unwrap();
/// let lengths = run_limited(&limit, vec!["a", "bb", "ccc"], |s| s.len()).unwrap();
/// assert_eq!(lengths, vec![1, 2, 3]);
/// ```
pub fn run_limited<I, R, F>(limit: &ConcurrencyLimit, items: I, f: F) -> Result<Vec<R>>
where
    I: IntoIterator,
    I::Item: Send,
    R: Send,
    F: Fn(I::Item) -> R + Sync,
{
    let items: Vec<I::Item> = items.into_iter().collect();
    let count = items.len();
    if count == 0 {
        return Ok(Vec::new());
    }

    let threads = limit.permits().min(count);
    let pending = Mutex::new(items.into_iter().enumerate());
    let results: Mutex<Vec<Option<R>>> = Mutex::new((0..count).map(|_| None).collect());
    let f = &f;
    let pending = &pending;
    let results_ref = &results;

    let outcome: Result<()> = thread::scope(|scope| {
        let mut handles = Vec::with_capacity(threads);
        let mut spawn_error = None;

        for id in 0..threads {
            let name = format!("limited-{}", id);
            let spawned = thread::Builder::new()
                .name(name.clone())
                .spawn_scoped(scope, move || -> Result<()> {
                    loop {
                        let next = pending.lock().next();
                        let Some((index, item)) = next else {
                            return Ok(());
                        };
                        let _permit = limit.acquire();
                        let value = catch_unwind(AssertUnwindSafe(|| f(item)))
                            .map_err(|_| WorkError::worker_panic(id, "limited task panicked"))?;
                        results_ref.lock()[index] = Some(value);
                    }
                });
            match spawned {
                Ok(handle) => handles.push(handle),
                Err(e) => {
                    spawn_error = Some(WorkError::spawn(name, e));
                    break;
                }
            }
        }

        let mut first_error = None;
        for handle in handles {
            let result = handle
                .join()
                .unwrap_or_else(|_| Err(WorkError::other("limited thread panicked")));
            if let Err(e) = result {
                first_error.get_or_insert(e);
            }
        }

        match first_error.or(spawn_error) {
            Some(e) => Err(e),
            None => Ok(()),
        }
    });
    outcome?;

    results
        .into_inner()
        .into_iter()
        .collect::<Option<Vec<R>>>()
        .ok_or_else(|| WorkError::other("limited task did not produce a result"))
}
