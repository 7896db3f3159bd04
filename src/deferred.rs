//! Single-assignment deferred results.
//!
//! A [`Deferred<T>`] stands for a value the remote service has not confirmed
//! yet, typically the identifier of a launch or item whose start request is
//! still in flight. Exactly one producer settles it; any number of consumers
//! may wait for it, either cooperatively ([`Deferred::wait`]) or by blocking
//! a thread ([`Deferred::wait_blocking`], [`Deferred::wait_timeout`]).
//!
//! ```text
//!   Pending ──resolve(v)──► Resolved(v)
//!      │
//!      └────fail(e)───────► Failed(e)
//! ```
//!
//! Reporting operations accept [`MaybeDeferred<T>`] wherever a caller may pass
//! either a plain value or a deferred one, and normalize it with
//! [`MaybeDeferred::get`] at the point of use.
//!
//! # Example
//!
//! ```
//! use rp_client::deferred::Deferred;
//!
//! let id: Deferred<String> = Deferred::new();
//! let consumer = id.clone();
//!
//! let handle = std::thread::spawn(move || consumer.wait_blocking());
//! id.resolve("launch-1".to_string()).unwrap();
//!
//! assert_eq!(handle.join().unwrap().unwrap(), "launch-1");
//! ```

use std::fmt;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use tokio::sync::Notify;

use crate::error::{ReportError, ReportResult};

enum State<T> {
    Pending,
    Settled(ReportResult<T>),
}

struct Shared<T> {
    state: Mutex<State<T>>,
    settled: Condvar,
    notify: Notify,
}

impl<T> Shared<T> {
    fn lock(&self) -> MutexGuard<'_, State<T>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// A single-assignment container for a value produced later.
///
/// Cloning a `Deferred` yields another handle to the same slot.
pub struct Deferred<T> {
    shared: Arc<Shared<T>>,
}

impl<T> Clone for Deferred<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T> Default for Deferred<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for Deferred<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = match &*self.shared.lock() {
            State::Pending => "pending",
            State::Settled(Ok(_)) => "resolved",
            State::Settled(Err(_)) => "failed",
        };
        f.debug_struct("Deferred").field("state", &state).finish()
    }
}

impl<T> Deferred<T> {
    /// Creates a pending deferred result.
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(State::Pending),
                settled: Condvar::new(),
                notify: Notify::new(),
            }),
        }
    }

    /// Creates a deferred result that is already resolved.
    pub fn resolved(value: T) -> Self {
        let deferred = Self::new();
        *deferred.shared.lock() = State::Settled(Ok(value));
        deferred
    }

    /// Creates a deferred result that has already failed.
    pub fn failed(error: ReportError) -> Self {
        let deferred = Self::new();
        *deferred.shared.lock() = State::Settled(Err(error));
        deferred
    }

    /// Resolves with a value.
    ///
    /// # Errors
    ///
    /// Returns [`ReportError::AlreadyResolved`] if the result was already
    /// settled. In debug builds a second settlement panics instead.
    pub fn resolve(&self, value: T) -> ReportResult<()> {
        self.complete(Ok(value))
    }

    /// Fails with an error.
    ///
    /// Subject to the same single-assignment rule as [`resolve`](Self::resolve).
    pub fn fail(&self, error: ReportError) -> ReportResult<()> {
        self.complete(Err(error))
    }

    /// Settles the result with an outcome, waking every waiter.
    pub fn complete(&self, outcome: ReportResult<T>) -> ReportResult<()> {
        {
            let mut state = self.shared.lock();
            if let State::Settled(_) = *state {
                drop(state);
                if cfg!(debug_assertions) {
                    panic!("deferred result settled twice");
                }
                tracing::error!("Attempt to settle an already settled deferred result");
                return Err(ReportError::AlreadyResolved);
            }
            *state = State::Settled(outcome);
        }
        self.shared.settled.notify_all();
        self.shared.notify.notify_waiters();
        Ok(())
    }

    /// Returns `true` once the result is resolved or failed.
    pub fn is_resolved(&self) -> bool {
        matches!(*self.shared.lock(), State::Settled(_))
    }

    /// Returns `true` if both handles point at the same slot.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.shared, &other.shared)
    }
}

impl<T: Clone> Deferred<T> {
    /// Returns the outcome without waiting, or `None` while pending.
    pub fn peek(&self) -> Option<ReportResult<T>> {
        match &*self.shared.lock() {
            State::Pending => None,
            State::Settled(outcome) => Some(outcome.clone()),
        }
    }

    /// Suspends the calling task until the result is settled.
    pub async fn wait(&self) -> ReportResult<T> {
        loop {
            let notified = self.shared.notify.notified();
            tokio::pin!(notified);
            // Register before checking so a settle in between is not missed.
            notified.as_mut().enable();
            if let Some(outcome) = self.peek() {
                return outcome;
            }
            notified.await;
        }
    }

    /// Blocks the calling thread until the result is settled.
    ///
    /// Must not be called from inside an async task; use [`wait`](Self::wait)
    /// there.
    pub fn wait_blocking(&self) -> ReportResult<T> {
        let mut state = self.shared.lock();
        loop {
            if let State::Settled(outcome) = &*state {
                return outcome.clone();
            }
            state = self
                .shared
                .settled
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// Blocks for at most `timeout`, returning `None` if still pending.
    pub fn wait_timeout(&self, timeout: Duration) -> Option<ReportResult<T>> {
        let deadline = Instant::now() + timeout;
        let mut state = self.shared.lock();
        loop {
            if let State::Settled(outcome) = &*state {
                return Some(outcome.clone());
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return None;
            }
            state = self
                .shared
                .settled
                .wait_timeout(state, remaining)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
    }
}

/// Either a value that is already known or one still being produced.
#[derive(Debug, Clone)]
pub enum MaybeDeferred<T> {
    /// The value is known.
    Resolved(T),
    /// The value will be produced by a unit of work.
    Deferred(Deferred<T>),
}

impl<T: Clone> MaybeDeferred<T> {
    /// Normalizes to the value, waiting cooperatively if needed.
    pub async fn get(&self) -> ReportResult<T> {
        match self {
            Self::Resolved(value) => Ok(value.clone()),
            Self::Deferred(deferred) => deferred.wait().await,
        }
    }

    /// Normalizes to the value, blocking the calling thread if needed.
    pub fn get_blocking(&self) -> ReportResult<T> {
        match self {
            Self::Resolved(value) => Ok(value.clone()),
            Self::Deferred(deferred) => deferred.wait_blocking(),
        }
    }

    /// Returns the outcome if it is available without waiting.
    pub fn peek(&self) -> Option<ReportResult<T>> {
        match self {
            Self::Resolved(value) => Some(Ok(value.clone())),
            Self::Deferred(deferred) => deferred.peek(),
        }
    }

    /// Returns `true` if [`get`](Self::get) would not wait.
    pub fn is_resolved(&self) -> bool {
        match self {
            Self::Resolved(_) => true,
            Self::Deferred(deferred) => deferred.is_resolved(),
        }
    }
}

impl<T> From<T> for MaybeDeferred<T> {
    fn from(value: T) -> Self {
        Self::Resolved(value)
    }
}

impl<T> From<Deferred<T>> for MaybeDeferred<T> {
    fn from(deferred: Deferred<T>) -> Self {
        Self::Deferred(deferred)
    }
}

impl<T> From<&Deferred<T>> for MaybeDeferred<T> {
    fn from(deferred: &Deferred<T>) -> Self {
        Self::Deferred(deferred.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolved_returns_immediately() {
        let deferred = Deferred::resolved(7);
        assert!(deferred.is_resolved());
        assert_eq!(deferred.wait_blocking().unwrap(), 7);
        assert_eq!(tokio_test::block_on(deferred.wait()).unwrap(), 7);
    }

    #[test]
    fn test_failure_is_replayed_to_every_waiter() {
        let deferred: Deferred<String> = Deferred::new();
        deferred
            .fail(ReportError::transport("start_item", Some(502), "Bad Gateway"))
            .unwrap();

        for _ in 0..2 {
            let err = deferred.wait_blocking().unwrap_err();
            assert!(matches!(err, ReportError::Transport { status: Some(502), .. }));
        }
    }

    #[cfg(debug_assertions)]
    #[test]
    #[should_panic(expected = "settled twice")]
    fn test_second_resolve_panics_in_debug() {
        let deferred = Deferred::new();
        deferred.resolve(1).unwrap();
        let _ = deferred.resolve(2);
    }

    #[cfg(not(debug_assertions))]
    #[test]
    fn test_second_resolve_is_rejected() {
        let deferred = Deferred::new();
        deferred.resolve(1).unwrap();
        assert!(matches!(deferred.resolve(2), Err(ReportError::AlreadyResolved)));
        assert_eq!(deferred.peek().unwrap().unwrap(), 1);
    }

    #[test]
    fn test_wait_timeout_on_pending() {
        let deferred: Deferred<u32> = Deferred::new();
        let start = Instant::now();
        assert!(deferred.wait_timeout(Duration::from_millis(20)).is_none());
        assert!(start.elapsed() >= Duration::from_millis(20));
    }

    #[test]
    fn test_blocking_waiter_wakes_on_resolve() {
        let deferred: Deferred<u32> = Deferred::new();
        let waiter = deferred.clone();
        let handle = std::thread::spawn(move || waiter.wait_timeout(Duration::from_secs(5)));

        std::thread::sleep(Duration::from_millis(10));
        deferred.resolve(42).unwrap();

        assert_eq!(handle.join().unwrap().unwrap().unwrap(), 42);
    }

    #[tokio::test]
    async fn test_async_waiters_wake_on_resolve() {
        let deferred: Deferred<&'static str> = Deferred::new();
        let first = deferred.clone();
        let second = deferred.clone();

        let a = tokio::spawn(async move { first.wait().await });
        let b = tokio::spawn(async move { second.wait().await });

        tokio::task::yield_now().await;
        deferred.resolve("item-1").unwrap();

        assert_eq!(a.await.unwrap().unwrap(), "item-1");
        assert_eq!(b.await.unwrap().unwrap(), "item-1");
    }

    #[test]
    fn test_maybe_deferred_normalizes_both_forms() {
        let plain: MaybeDeferred<u32> = 5.into();
        let pending = Deferred::new();
        let deferred: MaybeDeferred<u32> = (&pending).into();

        assert!(plain.is_resolved());
        assert!(!deferred.is_resolved());
        assert!(deferred.peek().is_none());

        pending.resolve(6).unwrap();
        assert_eq!(plain.get_blocking().unwrap(), 5);
        assert_eq!(tokio_test::block_on(deferred.get()).unwrap(), 6);
    }

    #[test]
    fn test_ptr_eq_tracks_slot_identity() {
        let a: Deferred<u8> = Deferred::new();
        let b = a.clone();
        let c: Deferred<u8> = Deferred::new();
        assert!(a.ptr_eq(&b));
        assert!(!a.ptr_eq(&c));
    }
}
