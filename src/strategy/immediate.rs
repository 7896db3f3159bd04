//! Immediate execution on a background thread.
//!
//! Every submitted unit is spawned right away onto a current-thread tokio
//! runtime driven by a dedicated thread (`rp-async-client`), so submission
//! never blocks the caller. The strategy keeps a list of submitted units to
//! wait for at shutdown:
//!
//! - On each submit, the contiguous prefix of already-finished units is
//!   pruned. Earlier units tend to finish first, so this keeps the list
//!   short without scanning it entirely.
//! - [`drain_all`](ImmediateStrategy::drain_all) waits for each unit up to
//!   the per-task timeout, within a global shutdown budget. Units still
//!   running when the budget is spent are abandoned: the caller stops
//!   waiting, but they keep running in the background.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use tokio::runtime::{Builder, Handle};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::{DrainReport, ExecutionStrategy, UnitOfWork};
use crate::deferred::Deferred;
use crate::error::{ReportError, ReportResult};

/// Default time to wait for a single unit during drain.
pub const DEFAULT_TASK_TIMEOUT: Duration = Duration::from_secs(60);

/// Default total time budget for a drain.
pub const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(120);

const THREAD_NAME: &str = "rp-async-client";

/// A current-thread runtime kept alive by its own thread until dropped.
struct BackgroundRuntime {
    handle: Handle,
    shutdown: CancellationToken,
    thread: Option<JoinHandle<()>>,
}

impl BackgroundRuntime {
    fn start() -> ReportResult<Self> {
        let runtime = Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| ReportError::Runtime(format!("Failed to build runtime: {}", e)))?;
        let handle = runtime.handle().clone();
        let shutdown = CancellationToken::new();

        let token = shutdown.clone();
        let thread = std::thread::Builder::new()
            .name(THREAD_NAME.to_string())
            .spawn(move || {
                runtime.block_on(token.cancelled());
                debug!("Background reporting runtime stopped");
            })
            .map_err(|e| ReportError::Runtime(format!("Failed to spawn {}: {}", THREAD_NAME, e)))?;

        Ok(Self {
            handle,
            shutdown,
            thread: Some(thread),
        })
    }
}

impl Drop for BackgroundRuntime {
    fn drop(&mut self) {
        self.shutdown.cancel();
        // Detach: joining could block on a unit stuck in the network.
        drop(self.thread.take());
    }
}

struct Tracked {
    operation: &'static str,
    completion: Deferred<()>,
}

/// Strategy that runs each unit as soon as it is submitted.
pub struct ImmediateStrategy {
    handle: Handle,
    runtime: Option<Arc<BackgroundRuntime>>,
    tracked: Mutex<Vec<Tracked>>,
    task_timeout: Duration,
    shutdown_timeout: Duration,
}

impl ImmediateStrategy {
    /// Creates the strategy and starts its background thread.
    ///
    /// # Errors
    ///
    /// Returns [`ReportError::Runtime`] if the runtime or thread cannot be
    /// created.
    pub fn new(task_timeout: Duration, shutdown_timeout: Duration) -> ReportResult<Self> {
        let runtime = Arc::new(BackgroundRuntime::start()?);
        Ok(Self {
            handle: runtime.handle.clone(),
            runtime: Some(runtime),
            tracked: Mutex::new(Vec::new()),
            task_timeout,
            shutdown_timeout,
        })
    }

    /// Creates the strategy on a runtime owned by the caller.
    ///
    /// The caller is responsible for keeping that runtime running.
    pub fn with_handle(handle: Handle, task_timeout: Duration, shutdown_timeout: Duration) -> Self {
        Self {
            handle,
            runtime: None,
            tracked: Mutex::new(Vec::new()),
            task_timeout,
            shutdown_timeout,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Vec<Tracked>> {
        self.tracked.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl ExecutionStrategy for ImmediateStrategy {
    fn name(&self) -> &'static str {
        "immediate"
    }

    fn submit(&self, unit: UnitOfWork) {
        let (operation, future, completion) = unit.into_parts();
        // Dropping the JoinHandle detaches the task; completion is tracked
        // through the unit's own signal.
        drop(self.handle.spawn(future));

        let mut tracked = self.lock();
        tracked.push(Tracked {
            operation,
            completion,
        });
        let finished = tracked
            .iter()
            .take_while(|t| t.completion.is_resolved())
            .count();
        tracked.drain(..finished);
    }

    fn drain_all(&self) -> DrainReport {
        let units = std::mem::take(&mut *self.lock());
        let started = Instant::now();
        let mut report = DrainReport::default();

        for (index, unit) in units.iter().enumerate() {
            let remaining = self.shutdown_timeout.saturating_sub(started.elapsed());
            if remaining.is_zero() {
                report.abandoned += units[index..]
                    .iter()
                    .filter(|u| !u.completion.is_resolved())
                    .count();
                break;
            }
            match unit.completion.wait_timeout(self.task_timeout.min(remaining)) {
                Some(_) => report.completed += 1,
                None => {
                    warn!(
                        operation = unit.operation,
                        "Unit did not finish within {:?}",
                        self.task_timeout.min(remaining)
                    );
                    report.abandoned += 1;
                }
            }
        }

        if report.abandoned > 0 {
            warn!(
                "Drain abandoned {} unit(s) after {:?}",
                report.abandoned,
                started.elapsed()
            );
        } else {
            debug!("Drained {} unit(s)", report.completed);
        }
        report
    }

    fn pending(&self) -> usize {
        self.lock()
            .iter()
            .filter(|t| !t.completion.is_resolved())
            .count()
    }

    fn fork(&self) -> Arc<dyn ExecutionStrategy> {
        Arc::new(Self {
            handle: self.handle.clone(),
            runtime: self.runtime.clone(),
            tracked: Mutex::new(Vec::new()),
            task_timeout: self.task_timeout,
            shutdown_timeout: self.shutdown_timeout,
        })
    }
}
