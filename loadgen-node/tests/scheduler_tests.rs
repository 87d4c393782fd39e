//! Scheduler tests: arrival pacing, worker ceiling, draining and registry
//! ownership, run against a scripted target with real timers.

mod common;

use common::{fixture, Endpoint, MockTarget};
use loadgen_node::config::LoadProfileConfig;
use loadgen_node::dispatcher::Dispatcher;
use loadgen_node::executor::ExecutorSettings;
use loadgen_node::recorder::{RunMetrics, DROPPED_ITERATIONS, ITERATIONS};
use loadgen_node::scenario::{Scenario, ScenarioTable};
use loadgen_node::scheduler::WorkloadScheduler;
use loadgen_node::Selection;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

fn profile(rate: u32, duration_seconds: u64, pre_allocated: u32, max: u32) -> LoadProfileConfig {
    LoadProfileConfig {
        rate,
        time_unit_seconds: 1,
        duration_seconds,
        pre_allocated_workers: pre_allocated,
        max_workers: max,
    }
}

fn only(scenario: Scenario) -> Dispatcher {
    Dispatcher::new(ScenarioTable::from_weights(&[(scenario, 100)]).unwrap())
}

#[tokio::test]
async fn test_exhausted_pool_drops_iterations() {
    let api = Arc::new(MockTarget::new().holding(Duration::from_millis(400)));
    let metrics = Arc::new(RunMetrics::new());
    let scheduler = WorkloadScheduler::new(profile(20, 1, 1, 2), only(Scenario::GetStats));

    let report = scheduler
        .run(
            api.clone(),
            fixture(1, 1),
            Arc::clone(&metrics),
            ExecutorSettings::default(),
        )
        .await;

    assert!(report.dropped > 0, "expected drops, got {:?}", report);
    assert_eq!(report.scheduled, report.completed + report.dropped);
    assert_eq!(report.workers_allocated, 2);
    assert_eq!(report.peak_active_workers, 2);
    assert_eq!(api.calls(Endpoint::Stats), report.completed);

    let summary = metrics.summary();
    assert_eq!(summary.count(DROPPED_ITERATIONS), Some(report.dropped));
    assert_eq!(summary.count(ITERATIONS), Some(report.completed));
    // A dropped iteration is not a failed request
    assert_eq!(summary.rate("http_req_failed").map(|r| r.trues), Some(0));
}

#[tokio::test]
async fn test_in_flight_iterations_drain_before_return() {
    let api = Arc::new(MockTarget::new().holding(Duration::from_millis(250)));
    let metrics = Arc::new(RunMetrics::new());
    let scheduler = WorkloadScheduler::new(profile(10, 1, 10, 10), only(Scenario::GetStats));

    let report = scheduler
        .run(
            api.clone(),
            fixture(1, 1),
            Arc::clone(&metrics),
            ExecutorSettings::default(),
        )
        .await;

    assert!(report.scheduled >= 8 && report.scheduled <= 10, "{:?}", report);
    assert_eq!(report.dropped, 0);
    assert_eq!(report.completed, report.scheduled);
    assert_eq!(api.calls(Endpoint::Stats), report.completed);
    assert!(report.elapsed_seconds >= 1.0);
}

#[tokio::test]
async fn test_registry_holds_every_created_pull_request() {
    let api = Arc::new(MockTarget::new());
    let scheduler =
        WorkloadScheduler::new(profile(40, 1, 5, 10), only(Scenario::CreatePullRequest));

    let report = scheduler
        .run(
            api.clone(),
            fixture(3, 2),
            Arc::new(RunMetrics::new()),
            ExecutorSettings::default(),
        )
        .await;

    let registered = scheduler.registry().snapshot(usize::MAX, Selection::All);
    assert_eq!(registered.len(), report.pull_requests_created);
    assert_eq!(registered.len() as u64, api.calls(Endpoint::CreatePullRequest));

    let unique: HashSet<_> = registered.iter().collect();
    assert_eq!(unique.len(), registered.len());

    let created: HashSet<_> = api.created().into_iter().collect();
    assert!(registered.iter().all(|id| created.contains(id)));
}

#[tokio::test]
async fn test_empty_fixture_runs_only_no_ops() {
    let api = Arc::new(MockTarget::new());
    let scheduler = WorkloadScheduler::new(profile(20, 1, 2, 4), Dispatcher::default());

    let report = scheduler
        .run(
            api.clone(),
            Arc::new(loadgen_node::RunFixture::default()),
            Arc::new(RunMetrics::new()),
            ExecutorSettings::default(),
        )
        .await;

    assert!(report.scheduled > 0);
    assert_eq!(report.no_ops, report.completed);
    assert_eq!(api.total_calls(), 0);
}
