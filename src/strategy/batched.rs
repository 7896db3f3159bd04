//! Batched execution on the caller's thread.
//!
//! Submitted units are queued until a trigger fires: the queue reaches
//! `trigger_count` units, or `trigger_interval` has passed since the last
//! run. The submitting thread then drives the whole queue concurrently on a
//! private current-thread runtime and returns once every unit is done.
//!
//! Nothing runs between triggers. A caller waiting on a result that depends
//! on a queued unit must call [`drain_all`](BatchedStrategy::drain_all)
//! first. The submit that fires a trigger blocks for the duration of the
//! run, which trades latency on that one call for fewer context switches.
//! Submitting from inside an async context is not supported, since the run
//! blocks the thread it is called on.
//!
//! Forks share the queue and the run lock with the strategy they came from,
//! so there is a single loop per strategy family. A run takes the queue only
//! while holding the run lock, so every unit a run waits on was submitted
//! earlier and is either part of the same run or already finished.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use futures::future::{BoxFuture, join_all};
use tokio::runtime::{Builder, Runtime};
use tracing::debug;

use super::{DrainReport, ExecutionStrategy, UnitOfWork};
use crate::deferred::Deferred;
use crate::error::{ReportError, ReportResult};

/// Default number of queued units that triggers a run.
pub const DEFAULT_TRIGGER_COUNT: usize = 10;

/// Default time since the last run that triggers a run.
pub const DEFAULT_TRIGGER_INTERVAL: Duration = Duration::from_millis(1000);

struct Queue {
    units: Vec<UnitOfWork>,
    last_run: Instant,
}

/// Queue and run lock shared by a strategy and its forks.
struct Shared {
    queue: Mutex<Queue>,
    run_lock: Mutex<()>,
}

/// Strategy that accumulates units and runs them in groups.
pub struct BatchedStrategy {
    runtime: Arc<Runtime>,
    shared: Arc<Shared>,
    trigger_count: usize,
    trigger_interval: Duration,
}

impl BatchedStrategy {
    /// Creates the strategy with its own runtime.
    ///
    /// A `trigger_count` below 1 is clamped to 1.
    ///
    /// # Errors
    ///
    /// Returns [`ReportError::Runtime`] if the runtime cannot be built.
    pub fn new(trigger_count: usize, trigger_interval: Duration) -> ReportResult<Self> {
        let runtime = Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| ReportError::Runtime(format!("Failed to build runtime: {}", e)))?;
        Ok(Self {
            runtime: Arc::new(runtime),
            shared: Arc::new(Shared {
                queue: Mutex::new(Queue {
                    units: Vec::new(),
                    last_run: Instant::now(),
                }),
                run_lock: Mutex::new(()),
            }),
            trigger_count: trigger_count.max(1),
            trigger_interval,
        })
    }

    fn lock(&self) -> MutexGuard<'_, Queue> {
        self.shared
            .queue
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Takes every queued unit and drives them to completion on the
    /// calling thread. Returns how many were taken and how many completed.
    fn run_pending(&self) -> (usize, usize) {
        let _running = self
            .shared
            .run_lock
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let units = {
            let mut queue = self.lock();
            queue.last_run = Instant::now();
            std::mem::take(&mut queue.units)
        };
        if units.is_empty() {
            return (0, 0);
        }
        let count = units.len();
        debug!("Running batch of {} unit(s)", count);

        let (futures, completions): (Vec<BoxFuture<'static, ()>>, Vec<Deferred<()>>) = units
            .into_iter()
            .map(|unit| {
                let (_, future, completion) = unit.into_parts();
                (future, completion)
            })
            .unzip();
        self.runtime.block_on(join_all(futures));

        let completed = completions.iter().filter(|c| c.is_resolved()).count();
        (count, completed)
    }
}

impl ExecutionStrategy for BatchedStrategy {
    fn name(&self) -> &'static str {
        "batched"
    }

    fn submit(&self, unit: UnitOfWork) {
        let fire = {
            let mut queue = self.lock();
            queue.units.push(unit);
            queue.units.len() >= self.trigger_count
                || queue.last_run.elapsed() >= self.trigger_interval
        };
        if fire {
            self.run_pending();
        }
    }

    fn drain_all(&self) -> DrainReport {
        let (submitted, completed) = self.run_pending();
        DrainReport {
            completed,
            abandoned: submitted - completed,
        }
    }

    fn pending(&self) -> usize {
        self.lock().units.len()
    }

    fn fork(&self) -> Arc<dyn ExecutionStrategy> {
        Arc::new(Self {
            runtime: Arc::clone(&self.runtime),
            shared: Arc::clone(&self.shared),
            trigger_count: self.trigger_count,
            trigger_interval: self.trigger_interval,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::strategy::schedule;

    const LONG: Duration = Duration::from_secs(3600);

    #[test]
    fn test_nothing_runs_before_trigger() {
        let strategy = BatchedStrategy::new(5, LONG).unwrap();
        let scheduled: Vec<_> = (0..4)
            .map(|n| schedule(&strategy, "noop", async move { Ok(n) }))
            .collect();

        assert_eq!(strategy.pending(), 4);
        assert!(scheduled.iter().all(|s| !s.result.is_resolved()));
    }

    #[test]
    fn test_trigger_count_runs_whole_queue() {
        let n = 6;
        let strategy = BatchedStrategy::new(n, LONG).unwrap();
        let scheduled: Vec<_> = (0..n)
            .map(|i| {
                schedule(&strategy, "sleep", async move {
                    tokio::time::sleep(Duration::from_millis(5)).await;
                    Ok(i)
                })
            })
            .collect();

        assert_eq!(strategy.pending(), 0);
        for (i, s) in scheduled.iter().enumerate() {
            assert_eq!(s.result.peek().unwrap().unwrap(), i);
            assert!(s.completion.is_resolved());
        }
    }

    #[test]
    fn test_interval_trigger() {
        let strategy = BatchedStrategy::new(100, Duration::from_millis(20)).unwrap();
        let first = schedule(&strategy, "noop", async { Ok(1) });
        assert!(!first.result.is_resolved());

        std::thread::sleep(Duration::from_millis(30));
        let second = schedule(&strategy, "noop", async { Ok(2) });

        assert!(first.result.is_resolved());
        assert!(second.result.is_resolved());
        assert_eq!(strategy.pending(), 0);
    }

    #[test]
    fn test_drain_runs_remaining_units() {
        let strategy = BatchedStrategy::new(100, LONG).unwrap();
        let ok = schedule(&strategy, "noop", async { Ok("ok") });
        let failed = schedule(&strategy, "finish_item", async {
            Err::<&str, _>(ReportError::transport("finish_item", Some(404), "missing"))
        });

        let report = strategy.drain_all();
        assert_eq!(
            report,
            DrainReport {
                completed: 2,
                abandoned: 0
            }
        );
        assert_eq!(ok.result.wait_blocking().unwrap(), "ok");
        assert!(failed.result.wait_blocking().is_err());
        assert_eq!(strategy.drain_all(), DrainReport::default());
    }

    #[test]
    fn test_dependent_units_resolve_in_one_run() {
        let strategy = BatchedStrategy::new(100, LONG).unwrap();
        let parent = schedule(&strategy, "start_item", async { Ok(7u32) });
        let parent_id = parent.result.clone();
        let child = schedule(&strategy, "start_item", async move {
            Ok(parent_id.wait().await? + 1)
        });

        strategy.drain_all();
        assert_eq!(child.result.wait_blocking().unwrap(), 8);
    }

    #[test]
    fn test_fork_drain_runs_parent_queue() {
        let strategy = BatchedStrategy::new(100, LONG).unwrap();
        let fork = strategy.fork();
        let parent = schedule(&strategy, "start_item", async { Ok(2u32) });
        let parent_id = parent.result.clone();
        let child = schedule(fork.as_ref(), "start_item", async move {
            Ok(parent_id.wait().await? * 10)
        });
        assert_eq!(strategy.pending(), 2);
        assert_eq!(fork.pending(), 2);

        assert_eq!(
            fork.drain_all(),
            DrainReport {
                completed: 2,
                abandoned: 0
            }
        );
        assert_eq!(child.result.wait_blocking().unwrap(), 20);
        assert_eq!(strategy.pending(), 0);
    }

    #[test]
    fn test_fork_on_other_thread_completes() {
        let strategy = BatchedStrategy::new(100, LONG).unwrap();
        let parent = schedule(&strategy, "start_item", async { Ok(1u32) });
        let parent_id = parent.result.clone();
        let fork = strategy.fork();

        let worker = std::thread::spawn(move || {
            let child = schedule(fork.as_ref(), "start_item", async move {
                Ok(parent_id.wait().await? + 1)
            });
            fork.drain_all();
            child.result.wait_timeout(Duration::from_secs(5))
        });

        assert_eq!(worker.join().unwrap().unwrap().unwrap(), 2);
        assert!(parent.completion.is_resolved());
    }
}
