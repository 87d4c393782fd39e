//! Constant-arrival-rate scheduler.
//!
//! Ticks at `time_unit / rate` regardless of how long iterations take. Each
//! tick borrows a worker identity from a bounded pool; when the pool ceiling
//! is reached the tick's iteration is dropped rather than queued.

use serde::Serialize;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tokio::task::JoinSet;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, instrument, warn};

use crate::client::TargetApi;
use crate::config::LoadProfileConfig;
use crate::dispatcher::{Dispatch, Dispatcher};
use crate::executor::{ExecutorSettings, Outcome, ScenarioContext};
use crate::fixture::RunFixture;
use crate::recorder::RunMetrics;
use crate::registry::PullRequestRegistry;

const MIN_TICK: Duration = Duration::from_nanos(1);

#[derive(Debug)]
struct PoolState {
    idle: Vec<u32>,
    allocated: u32,
    active: u32,
    peak_active: u32,
}

/// Bounded set of worker identities.
///
/// `pre_allocated` identities exist from the start; more are spun up on
/// demand until `max_workers`.
#[derive(Debug)]
pub struct WorkerPool {
    state: Mutex<PoolState>,
    max_workers: u32,
}

/// Result of asking the pool for a worker
#[derive(Debug)]
pub enum Acquire {
    /// Reused an idle worker
    Idle(WorkerLease),
    /// No idle worker, a new one was spun up
    Spawned(WorkerLease),
    /// Ceiling reached and every worker busy
    Exhausted,
}

/// Worker identity on loan; returned to the pool on drop
#[derive(Debug)]
pub struct WorkerLease {
    pool: Arc<WorkerPool>,
    id: u32,
}

impl WorkerLease {
    pub fn id(&self) -> u32 {
        self.id
    }
}

impl Drop for WorkerLease {
    fn drop(&mut self) {
        self.pool.release(self.id);
    }
}

impl WorkerPool {
    pub fn new(pre_allocated: u32, max_workers: u32) -> Arc<Self> {
        let pre_allocated = pre_allocated.min(max_workers);
        // Reversed so that worker 1 is handed out first
        let idle: Vec<u32> = (1..=pre_allocated).rev().collect();

        Arc::new(Self {
            state: Mutex::new(PoolState {
                idle,
                allocated: pre_allocated,
                active: 0,
                peak_active: 0,
            }),
            max_workers,
        })
    }

    /// Borrow a worker for one iteration
    pub fn acquire(self: &Arc<Self>) -> Acquire {
        let mut state = self.lock();

        let (id, spawned) = if let Some(id) = state.idle.pop() {
            (id, false)
        } else if state.allocated < self.max_workers {
            state.allocated += 1;
            (state.allocated, true)
        } else {
            return Acquire::Exhausted;
        };

        state.active += 1;
        state.peak_active = state.peak_active.max(state.active);
        drop(state);

        let lease = WorkerLease {
            pool: Arc::clone(self),
            id,
        };
        if spawned {
            Acquire::Spawned(lease)
        } else {
            Acquire::Idle(lease)
        }
    }

    fn release(&self, id: u32) {
        let mut state = self.lock();
        state.active = state.active.saturating_sub(1);
        state.idle.push(id);
    }

    /// Workers currently running an iteration
    pub fn active(&self) -> u32 {
        self.lock().active
    }

    /// Worker identities created so far, warm pool included
    pub fn allocated(&self) -> u32 {
        self.lock().allocated
    }

    /// Highest number of simultaneously busy workers
    pub fn peak_active(&self) -> u32 {
        self.lock().peak_active
    }

    fn lock(&self) -> MutexGuard<'_, PoolState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                warn!("Worker pool mutex was poisoned, recovering");
                poisoned.into_inner()
            }
        }
    }
}

/// What the scheduler did during a run
#[derive(Debug, Clone, Default, Serialize)]
pub struct SchedulerReport {
    /// Ticks that fell inside the run window
    pub scheduled: u64,
    /// Iterations that ran to completion
    pub completed: u64,
    /// Ticks dropped for lack of a worker
    pub dropped: u64,
    /// Completed iterations that declined to act
    pub no_ops: u64,
    /// Iterations that panicked; always 0 under `panic = "abort"`
    pub aborted: u64,
    /// Worker identities created, warm pool included
    pub workers_allocated: u32,
    /// Highest number of simultaneously busy workers
    pub peak_active_workers: u32,
    /// Pull requests in the registry at the end of the run
    pub pull_requests_created: usize,
    /// Wall-clock time from first tick to last drained iteration
    pub elapsed_seconds: f64,
}

/// Drives iterations at a constant arrival rate for a fixed duration
#[derive(Debug)]
pub struct WorkloadScheduler {
    profile: LoadProfileConfig,
    dispatcher: Arc<Dispatcher>,
    registry: Arc<PullRequestRegistry>,
}

impl WorkloadScheduler {
    pub fn new(profile: LoadProfileConfig, dispatcher: Dispatcher) -> Self {
        Self {
            profile,
            dispatcher: Arc::new(dispatcher),
            registry: Arc::new(PullRequestRegistry::new()),
        }
    }

    /// Registry of pull requests created during this run
    pub fn registry(&self) -> &Arc<PullRequestRegistry> {
        &self.registry
    }

    /// Run the load phase.
    ///
    /// Stops scheduling once the duration elapses, then waits for every
    /// in-flight iteration to finish.
    #[instrument(skip_all, fields(rate = self.profile.rate, duration_seconds = self.profile.duration_seconds))]
    pub async fn run(
        &self,
        api: Arc<dyn TargetApi>,
        fixture: Arc<RunFixture>,
        metrics: Arc<RunMetrics>,
        settings: ExecutorSettings,
    ) -> SchedulerReport {
        let ctx = ScenarioContext::new(
            api,
            fixture,
            Arc::clone(&self.registry),
            Arc::clone(&metrics),
            settings,
        );
        let pool = WorkerPool::new(self.profile.pre_allocated_workers, self.profile.max_workers);

        info!(
            rate = self.profile.rate,
            time_unit_seconds = self.profile.time_unit_seconds,
            duration_seconds = self.profile.duration_seconds,
            pre_allocated_workers = self.profile.pre_allocated_workers,
            max_workers = self.profile.max_workers,
            expected_iterations = expected_iterations(&self.profile),
            "Starting constant arrival rate load"
        );

        let mut report = SchedulerReport::default();
        let started = Instant::now();
        let deadline = tokio::time::Instant::now() + self.profile.duration();

        let mut ticker = tokio::time::interval(tick_period(&self.profile));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Burst);

        let stop = tokio::time::sleep_until(deadline);
        tokio::pin!(stop);

        let mut in_flight: JoinSet<Dispatch> = JoinSet::new();

        loop {
            tokio::select! {
                biased;

                _ = &mut stop => break,

                Some(joined) = in_flight.join_next(), if !in_flight.is_empty() => {
                    settle(joined, &mut report);
                    metrics.set_active_workers(pool.active() as usize);
                }

                tick = ticker.tick() => {
                    if tick >= deadline {
                        break;
                    }
                    report.scheduled += 1;

                    let lease = match pool.acquire() {
                        Acquire::Idle(lease) => lease,
                        Acquire::Spawned(lease) => {
                            debug!(
                                worker_id = lease.id(),
                                allocated = pool.allocated(),
                                "Spun up additional worker"
                            );
                            metrics.record_worker_spawned();
                            lease
                        }
                        Acquire::Exhausted => {
                            report.dropped += 1;
                            metrics.record_dropped_iteration();
                            warn!(
                                max_workers = self.profile.max_workers,
                                "Worker pool exhausted, dropping iteration"
                            );
                            continue;
                        }
                    };
                    metrics.set_active_workers(pool.active() as usize);

                    let ctx = ctx.clone();
                    let dispatcher = Arc::clone(&self.dispatcher);
                    in_flight.spawn(async move {
                        let worker_id = lease.id();
                        let dispatch = dispatcher.run_iteration(&ctx, worker_id).await;
                        drop(lease);
                        dispatch
                    });
                }
            }
        }

        info!(
            in_flight = in_flight.len(),
            scheduled = report.scheduled,
            "Run duration elapsed, draining in-flight iterations"
        );

        while let Some(joined) = in_flight.join_next().await {
            settle(joined, &mut report);
        }
        metrics.set_active_workers(0);

        report.workers_allocated = pool.allocated();
        report.peak_active_workers = pool.peak_active();
        report.pull_requests_created = self.registry.len();
        report.elapsed_seconds = started.elapsed().as_secs_f64();

        info!(
            scheduled = report.scheduled,
            completed = report.completed,
            dropped = report.dropped,
            no_ops = report.no_ops,
            workers_allocated = report.workers_allocated,
            peak_active_workers = report.peak_active_workers,
            elapsed_seconds = report.elapsed_seconds,
            "Load phase finished"
        );

        report
    }
}

fn settle(joined: Result<Dispatch, tokio::task::JoinError>, report: &mut SchedulerReport) {
    match joined {
        Ok(Dispatch::Skipped) | Ok(Dispatch::Ran(_, Outcome::NoOp)) => {
            report.completed += 1;
            report.no_ops += 1;
        }
        Ok(Dispatch::Ran(_, _)) => report.completed += 1,
        Err(e) => {
            report.aborted += 1;
            error!(error = %e, "Iteration task failed");
        }
    }
}

/// Ticker period, never zero
fn tick_period(profile: &LoadProfileConfig) -> Duration {
    let tick = profile.tick_interval();
    if tick.is_zero() {
        warn!(
            rate = profile.rate,
            time_unit_seconds = profile.time_unit_seconds,
            "Arrival rate below nanosecond resolution, ticking every 1ns"
        );
        return MIN_TICK;
    }
    tick
}

/// Ticks a profile schedules over its whole duration
pub fn expected_iterations(profile: &LoadProfileConfig) -> u64 {
    let tick = tick_period(profile);
    (profile.duration().as_nanos() / tick.as_nanos()) as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pool_hands_out_warm_workers_first() {
        let pool = WorkerPool::new(2, 3);
        let first = match pool.acquire() {
            Acquire::Idle(lease) => lease,
            other => panic!("expected idle worker, got {:?}", other),
        };
        assert_eq!(first.id(), 1);

        let second = match pool.acquire() {
            Acquire::Idle(lease) => lease,
            other => panic!("expected idle worker, got {:?}", other),
        };
        assert_eq!(second.id(), 2);

        let third = match pool.acquire() {
            Acquire::Spawned(lease) => lease,
            other => panic!("expected spawned worker, got {:?}", other),
        };
        assert_eq!(third.id(), 3);
        assert_eq!(pool.active(), 3);

        assert!(matches!(pool.acquire(), Acquire::Exhausted));

        drop(second);
        assert_eq!(pool.active(), 2);
        match pool.acquire() {
            Acquire::Idle(lease) => assert_eq!(lease.id(), 2),
            other => panic!("expected idle worker, got {:?}", other),
        }
        assert_eq!(pool.allocated(), 3);
        assert_eq!(pool.peak_active(), 3);
    }

    #[test]
    fn test_pool_pre_allocation_clamped_to_ceiling() {
        let pool = WorkerPool::new(10, 2);
        assert_eq!(pool.allocated(), 2);
    }

    #[test]
    fn test_expected_iterations() {
        let profile = LoadProfileConfig::default();
        assert_eq!(expected_iterations(&profile), 150);
    }

    #[tokio::test]
    async fn test_panicked_iteration_counts_as_aborted() {
        let mut set: JoinSet<Dispatch> = JoinSet::new();
        set.spawn(async {
            if true {
                panic!("iteration failed");
            }
            Dispatch::Skipped
        });
        set.spawn(async { Dispatch::Skipped });

        let mut report = SchedulerReport::default();
        while let Some(joined) = set.join_next().await {
            settle(joined, &mut report);
        }
        assert_eq!(report.aborted, 1);
        assert_eq!(report.completed, 1);
        assert_eq!(report.no_ops, 1);
    }

    #[tokio::test]
    async fn test_tick_period_never_zero() {
        let mut profile = LoadProfileConfig::default();
        assert_eq!(tick_period(&profile), Duration::from_millis(200));

        profile.rate = 2_000_000_000;
        profile.duration_seconds = 1;
        assert!(profile.tick_interval().is_zero());
        assert_eq!(tick_period(&profile), MIN_TICK);
        assert_eq!(expected_iterations(&profile), 1_000_000_000);

        // `interval` panics on a zero period
        let _ticker = tokio::time::interval(tick_period(&profile));
    }
}
