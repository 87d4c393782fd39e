//! Run-wide measurement store.
//!
//! Every observation is aggregated locally for post-hoc threshold evaluation
//! and mirrored to the `metrics` facade so an installed exporter sees it live.
//! Latencies go into a fixed-size HDR histogram.

use dashmap::DashMap;
use hdrhistogram::Histogram;
use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tracing::warn;

use crate::scenario::Scenario;

pub const HTTP_REQ_DURATION: &str = "http_req_duration";
pub const HTTP_REQ_FAILED: &str = "http_req_failed";
pub const HTTP_REQS: &str = "http_reqs";
pub const ERRORS: &str = "errors";
pub const CHECKS: &str = "checks";
pub const ITERATIONS: &str = "iterations";
pub const DROPPED_ITERATIONS: &str = "dropped_iterations";

/// Highest latency tracked, in microseconds; longer samples saturate
const LATENCY_MAX_US: u64 = 60_000_000;
const LATENCY_SIGFIG: u8 = 3;

fn latency_histogram() -> Histogram<u64> {
    Histogram::new_with_bounds(1, LATENCY_MAX_US, LATENCY_SIGFIG)
        .expect("static latency histogram bounds are valid")
}

fn us_to_ms(us: u64) -> f64 {
    us as f64 / 1000.0
}

/// Register metric descriptions with the installed recorder
pub fn describe_metrics() {
    describe_histogram!(
        "loadgen_http_req_duration_ms",
        "Request latency observed by scenario executors, in milliseconds"
    );
    describe_counter!(
        "loadgen_http_reqs_total",
        "Total number of requests issued by scenario executors"
    );
    describe_counter!(
        "loadgen_http_req_failed_total",
        "Requests with an unexpected status or a transport failure"
    );
    describe_counter!(
        "loadgen_errors_total",
        "Scenario iterations counted against the error rate"
    );
    describe_counter!("loadgen_checks_total", "Check results by name and outcome");
    describe_counter!("loadgen_iterations_total", "Iterations completed by scenario");
    describe_counter!(
        "loadgen_iterations_dropped_total",
        "Iterations dropped because the worker pool was exhausted"
    );
    describe_counter!(
        "loadgen_iterations_noop_total",
        "Iterations that declined to act for lack of state"
    );
    describe_counter!("loadgen_workers_spawned_total", "Workers spun up beyond the warm pool");
    describe_gauge!("loadgen_active_workers", "Workers currently running an iteration");
    describe_gauge!("loadgen_registry_size", "Pull requests in the shared registry");
}

/// Boolean rate accumulator (k6 `Rate`)
#[derive(Debug, Default)]
struct RateCounter {
    trues: AtomicU64,
    total: AtomicU64,
}

impl RateCounter {
    fn add(&self, value: bool) {
        self.total.fetch_add(1, Ordering::Relaxed);
        if value {
            self.trues.fetch_add(1, Ordering::Relaxed);
        }
    }

    fn summary(&self) -> RateStats {
        RateStats::new(
            self.trues.load(Ordering::Relaxed),
            self.total.load(Ordering::Relaxed),
        )
    }
}

/// Per-scenario counters
#[derive(Debug, Default)]
struct ScenarioCounters {
    passed: AtomicU64,
    failed: AtomicU64,
    no_op: AtomicU64,
}

/// Aggregated statistics of a trend metric, in milliseconds
#[derive(Debug, Clone, Serialize)]
pub struct TrendStats {
    pub count: u64,
    pub avg: f64,
    pub min: f64,
    pub max: f64,
    pub med: f64,
    pub p90: f64,
    pub p95: f64,
    pub p99: f64,
    #[serde(skip)]
    histogram: Histogram<u64>,
}

impl TrendStats {
    /// Aggregate a histogram of microsecond samples
    pub fn from_histogram(histogram: Histogram<u64>) -> Self {
        let count = histogram.len();
        let (avg, min, max) = if histogram.is_empty() {
            (0.0, 0.0, 0.0)
        } else {
            (
                histogram.mean() / 1000.0,
                us_to_ms(histogram.min()),
                us_to_ms(histogram.max()),
            )
        };

        let mut stats = Self {
            count,
            avg,
            min,
            max,
            med: 0.0,
            p90: 0.0,
            p95: 0.0,
            p99: 0.0,
            histogram,
        };
        stats.med = stats.percentile(50.0);
        stats.p90 = stats.percentile(90.0);
        stats.p95 = stats.percentile(95.0);
        stats.p99 = stats.percentile(99.0);
        stats
    }

    /// Value at percentile `p` in `[0, 100]`, in milliseconds
    pub fn percentile(&self, p: f64) -> f64 {
        if self.histogram.is_empty() {
            return 0.0;
        }
        us_to_ms(self.histogram.value_at_percentile(p.clamp(0.0, 100.0)))
    }
}

/// Aggregated statistics of a rate metric
#[derive(Debug, Clone, Copy, Serialize)]
pub struct RateStats {
    pub trues: u64,
    pub total: u64,
    pub rate: f64,
}

impl RateStats {
    pub fn new(trues: u64, total: u64) -> Self {
        let rate = if total == 0 {
            0.0
        } else {
            trues as f64 / total as f64
        };
        Self { trues, total, rate }
    }
}

/// Aggregated value of one metric
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum MetricSummary {
    Trend(TrendStats),
    Rate(RateStats),
    Counter { count: u64 },
}

impl MetricSummary {
    /// Number of samples behind this summary
    pub fn samples(&self) -> u64 {
        match self {
            MetricSummary::Trend(t) => t.count,
            MetricSummary::Rate(r) => r.total,
            MetricSummary::Counter { count } => *count,
        }
    }
}

/// Pass/fail counts of one named check
#[derive(Debug, Clone, Copy, Default, Serialize, PartialEq, Eq)]
pub struct CheckSummary {
    pub passes: u64,
    pub fails: u64,
}

/// Counts of one scenario
#[derive(Debug, Clone, Copy, Default, Serialize, PartialEq, Eq)]
pub struct ScenarioSummary {
    pub passed: u64,
    pub failed: u64,
    pub no_op: u64,
}

/// Snapshot of everything recorded during a run
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub metrics: BTreeMap<String, MetricSummary>,
    pub checks: BTreeMap<String, CheckSummary>,
    pub scenarios: BTreeMap<Scenario, ScenarioSummary>,
    pub no_op_iterations: u64,
}

impl RunSummary {
    pub fn metric(&self, name: &str) -> Option<&MetricSummary> {
        self.metrics.get(name)
    }

    pub fn rate(&self, name: &str) -> Option<RateStats> {
        match self.metrics.get(name) {
            Some(MetricSummary::Rate(r)) => Some(*r),
            _ => None,
        }
    }

    pub fn trend(&self, name: &str) -> Option<&TrendStats> {
        match self.metrics.get(name) {
            Some(MetricSummary::Trend(t)) => Some(t),
            _ => None,
        }
    }

    pub fn count(&self, name: &str) -> Option<u64> {
        match self.metrics.get(name) {
            Some(MetricSummary::Counter { count }) => Some(*count),
            _ => None,
        }
    }
}

/// Metrics engine shared by all iterations of a run
#[derive(Debug)]
pub struct RunMetrics {
    durations_us: Mutex<Histogram<u64>>,
    http_req_failed: RateCounter,
    errors: RateCounter,
    checks: DashMap<String, (AtomicU64, AtomicU64)>,
    scenarios: DashMap<Scenario, ScenarioCounters>,
    iterations: AtomicU64,
    dropped_iterations: AtomicU64,
    no_op_iterations: AtomicU64,
}

impl Default for RunMetrics {
    fn default() -> Self {
        Self {
            durations_us: Mutex::new(latency_histogram()),
            http_req_failed: RateCounter::default(),
            errors: RateCounter::default(),
            checks: DashMap::new(),
            scenarios: DashMap::new(),
            iterations: AtomicU64::new(0),
            dropped_iterations: AtomicU64::new(0),
            no_op_iterations: AtomicU64::new(0),
        }
    }
}

impl RunMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one request issued by a scenario executor
    pub fn record_request(&self, scenario: Scenario, latency: Duration, failed: bool) {
        let latency_ms = latency.as_secs_f64() * 1000.0;
        let latency_us = u64::try_from(latency.as_micros()).unwrap_or(u64::MAX);
        self.durations().saturating_record(latency_us);
        self.http_req_failed.add(failed);

        histogram!("loadgen_http_req_duration_ms", latency_ms, "scenario" => scenario.name());
        counter!("loadgen_http_reqs_total", 1, "scenario" => scenario.name());
        if failed {
            counter!("loadgen_http_req_failed_total", 1, "scenario" => scenario.name());
        }
    }

    /// Record a transport failure: counted as failed, no latency sample
    pub fn record_transport_failure(&self, scenario: Scenario) {
        self.http_req_failed.add(true);
        counter!("loadgen_http_reqs_total", 1, "scenario" => scenario.name());
        counter!("loadgen_http_req_failed_total", 1, "scenario" => scenario.name());
    }

    /// Record one named check result
    pub fn record_check(&self, name: &str, passed: bool) {
        {
            let entry = self
                .checks
                .entry(name.to_string())
                .or_insert_with(|| (AtomicU64::new(0), AtomicU64::new(0)));
            if passed {
                entry.0.fetch_add(1, Ordering::Relaxed);
            } else {
                entry.1.fetch_add(1, Ordering::Relaxed);
            }
        }

        let result = if passed { "pass" } else { "fail" };
        counter!("loadgen_checks_total", 1, "check" => name.to_string(), "result" => result);
    }

    /// Add one sample to the custom error rate
    pub fn record_error(&self, scenario: Scenario, is_error: bool) {
        self.errors.add(is_error);
        if is_error {
            counter!("loadgen_errors_total", 1, "scenario" => scenario.name());
        }
    }

    /// Record the final outcome of an executed scenario
    pub fn record_scenario(&self, scenario: Scenario, passed: bool) {
        let counters = self.scenarios.entry(scenario).or_default();
        if passed {
            counters.passed.fetch_add(1, Ordering::Relaxed);
        } else {
            counters.failed.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Record a scenario that declined to act
    pub fn record_scenario_no_op(&self, scenario: Scenario) {
        self.scenarios
            .entry(scenario)
            .or_default()
            .no_op
            .fetch_add(1, Ordering::Relaxed);
    }

    /// Iteration finished, whatever it did
    pub fn record_iteration(&self, scenario: Option<Scenario>) {
        self.iterations.fetch_add(1, Ordering::Relaxed);
        let label = scenario.map(|s| s.name()).unwrap_or("none");
        counter!("loadgen_iterations_total", 1, "scenario" => label);
    }

    /// Iteration that did nothing because there was no state to act on
    pub fn record_no_op_iteration(&self) {
        self.no_op_iterations.fetch_add(1, Ordering::Relaxed);
        counter!("loadgen_iterations_noop_total", 1);
    }

    /// Tick whose iteration could not be placed on a worker
    pub fn record_dropped_iteration(&self) {
        self.dropped_iterations.fetch_add(1, Ordering::Relaxed);
        counter!("loadgen_iterations_dropped_total", 1);
    }

    pub fn record_worker_spawned(&self) {
        counter!("loadgen_workers_spawned_total", 1);
    }

    pub fn set_active_workers(&self, active: usize) {
        gauge!("loadgen_active_workers", active as f64);
    }

    pub fn set_registry_size(&self, size: usize) {
        gauge!("loadgen_registry_size", size as f64);
    }

    /// Aggregate everything recorded so far
    pub fn summary(&self) -> RunSummary {
        let durations = self.durations().clone();
        let http_reqs = durations.len();
        let transport_failures =
            self.http_req_failed.summary().total.saturating_sub(http_reqs);

        let mut check_rate = (0u64, 0u64);
        let mut checks = BTreeMap::new();
        for entry in self.checks.iter() {
            let passes = entry.value().0.load(Ordering::Relaxed);
            let fails = entry.value().1.load(Ordering::Relaxed);
            check_rate.0 += passes;
            check_rate.1 += passes + fails;
            checks.insert(entry.key().clone(), CheckSummary { passes, fails });
        }

        let mut scenarios = BTreeMap::new();
        for entry in self.scenarios.iter() {
            let counters = entry.value();
            scenarios.insert(
                *entry.key(),
                ScenarioSummary {
                    passed: counters.passed.load(Ordering::Relaxed),
                    failed: counters.failed.load(Ordering::Relaxed),
                    no_op: counters.no_op.load(Ordering::Relaxed),
                },
            );
        }

        let mut metrics = BTreeMap::new();
        metrics.insert(
            HTTP_REQ_DURATION.to_string(),
            MetricSummary::Trend(TrendStats::from_histogram(durations)),
        );
        metrics.insert(
            HTTP_REQ_FAILED.to_string(),
            MetricSummary::Rate(self.http_req_failed.summary()),
        );
        metrics.insert(
            HTTP_REQS.to_string(),
            MetricSummary::Counter {
                count: http_reqs + transport_failures,
            },
        );
        metrics.insert(ERRORS.to_string(), MetricSummary::Rate(self.errors.summary()));
        metrics.insert(
            CHECKS.to_string(),
            MetricSummary::Rate(RateStats::new(check_rate.0, check_rate.1)),
        );
        metrics.insert(
            ITERATIONS.to_string(),
            MetricSummary::Counter {
                count: self.iterations.load(Ordering::Relaxed),
            },
        );
        metrics.insert(
            DROPPED_ITERATIONS.to_string(),
            MetricSummary::Counter {
                count: self.dropped_iterations.load(Ordering::Relaxed),
            },
        );

        RunSummary {
            metrics,
            checks,
            scenarios,
            no_op_iterations: self.no_op_iterations.load(Ordering::Relaxed),
        }
    }

    fn durations(&self) -> MutexGuard<'_, Histogram<u64>> {
        match self.durations_us.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                warn!("Duration store mutex was poisoned, recovering");
                poisoned.into_inner()
            }
        }
    }
}
