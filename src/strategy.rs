//! Execution strategies for deferred units of work.
//!
//! A reporting call made from synchronous code cannot wait for the service,
//! so it is wrapped into a [`UnitOfWork`] and handed to an
//! [`ExecutionStrategy`]. The caller immediately receives a
//! [`Deferred`] for the eventual result and may pass it on to dependent
//! calls (a child item, a log line) before it resolves.
//!
//! # Architecture
//!
//! ```text
//!   caller ── schedule(op, future) ──► UnitOfWork ──► ExecutionStrategy
//!     ▲                                   │                 │
//!     │                                   │        ┌────────┴─────────┐
//!     │ Deferred<T>                       │        ▼                  ▼
//!     └───────────────────────────────────┤   Immediate           Batched
//!                                         │   (background         (caller thread,
//!                                         │    thread, now)        on trigger)
//!                                         ▼
//!                            future runs, resolves Deferred<T>
//! ```
//!
//! # Strategies
//!
//! | Strategy | Module | Submission | Runs on |
//! |----------|--------|------------|---------|
//! | Immediate | [`immediate`] | never blocks | dedicated background thread |
//! | Batched | [`batched`] | blocks when a trigger fires | the submitting thread |

pub mod batched;
pub mod immediate;

use std::future::Future;
use std::sync::Arc;

use futures::FutureExt;
use futures::future::BoxFuture;
use tracing::warn;

use crate::config::ExecutionConfig;
use crate::deferred::Deferred;
use crate::error::{ReportError, ReportResult};

pub use batched::BatchedStrategy;
pub use immediate::ImmediateStrategy;

/// A scheduled computation paired with its completion signal.
///
/// The future already resolves its own result slot when it finishes; the
/// strategy only needs to drive it and watch `completion`.
pub struct UnitOfWork {
    operation: &'static str,
    future: BoxFuture<'static, ()>,
    completion: Deferred<()>,
}

impl UnitOfWork {
    /// Name of the reporting operation, for logging.
    pub fn operation(&self) -> &'static str {
        self.operation
    }

    /// Signal settled once the unit has finished (or was abandoned).
    pub fn completion(&self) -> &Deferred<()> {
        &self.completion
    }

    pub(crate) fn into_parts(self) -> (&'static str, BoxFuture<'static, ()>, Deferred<()>) {
        (self.operation, self.future, self.completion)
    }
}

/// Handles returned by [`schedule`].
pub struct Scheduled<T> {
    /// The unit's eventual result.
    pub result: Deferred<T>,
    /// Settled when the unit has stopped running, whatever its outcome.
    pub completion: Deferred<()>,
}

/// Outcome of [`ExecutionStrategy::drain_all`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrainReport {
    /// Units that finished before the drain returned.
    pub completed: usize,
    /// Units the drain stopped waiting for; they may still finish later.
    pub abandoned: usize,
}

impl DrainReport {
    /// Returns `true` if every unit finished.
    pub fn is_complete(&self) -> bool {
        self.abandoned == 0
    }

    /// Converts an incomplete drain into
    /// [`ReportError::DrainTimeoutExceeded`].
    pub fn into_result(self) -> ReportResult<usize> {
        if self.is_complete() {
            Ok(self.completed)
        } else {
            Err(ReportError::DrainTimeoutExceeded {
                abandoned: self.abandoned,
            })
        }
    }
}

/// A policy for driving units of work to completion.
pub trait ExecutionStrategy: Send + Sync {
    /// Short name for logging.
    fn name(&self) -> &'static str;

    /// Takes ownership of a unit and runs it now or later.
    fn submit(&self, unit: UnitOfWork);

    /// Drives or waits for every submitted unit, within the strategy's
    /// time budget.
    fn drain_all(&self) -> DrainReport;

    /// Number of units submitted but not yet known to be complete.
    fn pending(&self) -> usize;

    /// Creates a sibling strategy sharing this one's runtime but with its
    /// own list of units.
    fn fork(&self) -> Arc<dyn ExecutionStrategy>;
}

/// Builds the strategy selected by configuration.
///
/// # Errors
///
/// Returns [`ReportError::Runtime`] if the strategy's runtime cannot be
/// created.
pub fn from_config(config: &ExecutionConfig) -> ReportResult<Arc<dyn ExecutionStrategy>> {
    Ok(match config {
        ExecutionConfig::Immediate(immediate) => Arc::new(ImmediateStrategy::new(
            immediate.task_timeout(),
            immediate.shutdown_timeout(),
        )?),
        ExecutionConfig::Batched(batched) => Arc::new(BatchedStrategy::new(
            batched.trigger_count,
            batched.trigger_interval(),
        )?),
    })
}

/// Settles a unit's handles exactly once, even if its future is dropped.
struct Settle<T> {
    operation: &'static str,
    result: Deferred<T>,
    completion: Deferred<()>,
    settled: bool,
}

impl<T> Settle<T> {
    fn finish(mut self, outcome: ReportResult<T>) {
        if let Err(e) = &outcome {
            warn!(operation = self.operation, "Report operation failed: {}", e);
        }
        let _ = self.result.complete(outcome);
        let _ = self.completion.resolve(());
        self.settled = true;
    }
}

impl<T> Drop for Settle<T> {
    fn drop(&mut self) {
        if !self.settled {
            warn!(
                operation = self.operation,
                "Unit of work dropped before completion"
            );
            let _ = self.result.fail(ReportError::Abandoned);
            let _ = self.completion.resolve(());
        }
    }
}

/// Wraps `future` into a unit of work, submits it, and returns its handles.
///
/// Failures are contained: an `Err` from the future is logged with the
/// operation name and stored in the returned result.
///
/// # Example
///
/// ```
/// use std::time::Duration;
/// use rp_client::strategy::{schedule, ExecutionStrategy, ImmediateStrategy};
///
/// let strategy = ImmediateStrategy::new(Duration::from_secs(5), Duration::from_secs(10))?;
/// let scheduled = schedule(&strategy, "answer", async { Ok(42) });
///
/// strategy.drain_all();
/// assert_eq!(scheduled.result.wait_blocking()?, 42);
/// # Ok::<(), rp_client::ReportError>(())
/// ```
pub fn schedule<T, F>(
    strategy: &dyn ExecutionStrategy,
    operation: &'static str,
    future: F,
) -> Scheduled<T>
where
    T: Send + 'static,
    F: Future<Output = ReportResult<T>> + Send + 'static,
{
    let result = Deferred::new();
    let completion = Deferred::new();
    let settle = Settle {
        operation,
        result: result.clone(),
        completion: completion.clone(),
        settled: false,
    };
    let wrapped = async move {
        let outcome = future.await;
        settle.finish(outcome);
    }
    .boxed();

    strategy.submit(UnitOfWork {
        operation,
        future: wrapped,
        completion: completion.clone(),
    });

    Scheduled { result, completion }
}
