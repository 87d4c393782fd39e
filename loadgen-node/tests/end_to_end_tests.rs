//! End-to-end tests: the full run lifecycle over HTTP against the in-memory
//! stub target bound to an ephemeral port.

use loadgen_node::config::{LoadConfig, ScenarioWeightsConfig};
use loadgen_node::fixture::FixtureBuilder;
use loadgen_node::recorder::{ERRORS, HTTP_REQ_DURATION, HTTP_REQ_FAILED};
use loadgen_node::target_stub::{spawn_target_stub, TargetStubState};
use loadgen_node::{HttpTargetClient, LoadRunner, LoadgenError, TargetApi};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;

async fn start_stub(state: TargetStubState) -> SocketAddr {
    let (addr, _handle) = spawn_target_stub("127.0.0.1:0".parse().unwrap(), state)
        .await
        .unwrap();
    addr
}

fn test_config(addr: SocketAddr) -> LoadConfig {
    let mut config = LoadConfig::default();
    config.target.base_url = format!("http://{}", addr);
    config.target.request_timeout_seconds = 5;
    config.load.rate = 20;
    config.load.duration_seconds = 2;
    config.load.pre_allocated_workers = 5;
    config.load.max_workers = 20;
    config.fixture.teams = 3;
    config.fixture.members_per_team = 3;
    config
}

fn runner(config: LoadConfig) -> LoadRunner {
    let client = HttpTargetClient::new(&config.target).unwrap();
    LoadRunner::new(config, Arc::new(client))
}

#[tokio::test]
async fn test_full_run_against_stub_passes() {
    let state = TargetStubState::new();
    let addr = start_stub(state.clone()).await;
    let config = test_config(addr);
    config.validate().unwrap();

    let report = runner(config).run().await.unwrap();

    assert_eq!(report.teams_created, 3);
    assert_eq!(report.users_created, 9);
    assert!(report.scheduler.scheduled >= 30, "{:?}", report.scheduler);
    assert_eq!(report.scheduler.dropped, 0);

    assert_eq!(report.summary.rate(HTTP_REQ_FAILED).unwrap().trues, 0);
    assert_eq!(report.summary.rate(ERRORS).unwrap().trues, 0);
    assert!(report.summary.trend(HTTP_REQ_DURATION).unwrap().count > 0);
    assert_eq!(report.thresholds.results.len(), 3);
    assert!(report.passed(), "{:?}", report.thresholds);

    let stats = state.stats();
    assert_eq!(stats.total_teams, 3);
    assert_eq!(stats.total_prs as usize, report.scheduler.pull_requests_created);
}

#[tokio::test]
async fn test_slow_target_fails_latency_threshold() {
    let state = TargetStubState::new().with_latency(Duration::from_millis(350));
    let addr = start_stub(state).await;

    let mut config = test_config(addr);
    config.load.rate = 5;
    config.load.duration_seconds = 1;
    config.load.pre_allocated_workers = 10;
    config.load.max_workers = 10;
    config.scenarios = ScenarioWeightsConfig {
        get_stats: 96,
        get_user_reviews: 1,
        create_pull_request: 1,
        merge_pull_request: 1,
        deactivate_team: 1,
    };

    let report = runner(config).run().await.unwrap();

    assert!(!report.passed());
    let failed: Vec<_> = report.thresholds.failures().map(|f| f.metric.as_str()).collect();
    assert!(failed.contains(&HTTP_REQ_DURATION), "{:?}", failed);
    // Slow but successful responses are not errors
    assert_eq!(report.summary.rate(HTTP_REQ_FAILED).unwrap().trues, 0);
}

#[tokio::test]
async fn test_unreachable_target_aborts_before_load() {
    // Reserve a port and release it so nothing is listening there
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let mut config = test_config(addr);
    config.target.health_timeout_seconds = 1;

    let result = runner(config).run().await;
    assert!(matches!(result, Err(LoadgenError::Setup(_))), "{:?}", result.err());
}

#[tokio::test]
async fn test_summary_written_to_file() {
    let addr = start_stub(TargetStubState::new()).await;
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("summary.json");

    let mut config = test_config(addr);
    config.load.duration_seconds = 1;
    config.report.summary_path = path.to_string_lossy().to_string();

    let report = runner(config).run().await.unwrap();

    let written: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
    assert_eq!(written["run_id"], report.run_id.to_string());
    assert_eq!(written["teams_created"], 3);
    assert!(written["thresholds"]["results"].is_array());
}

#[tokio::test]
async fn test_repeated_setup_collides_on_team_names() {
    let addr = start_stub(TargetStubState::new()).await;
    let config = test_config(addr);
    let client = HttpTargetClient::new(&config.target).unwrap();

    let health = client.health().await.unwrap();
    assert_eq!(health.status, 200);

    let first = FixtureBuilder::new(config.fixture.clone()).build(&client).await;
    assert_eq!(first.team_count(), 3);

    // Same names again: the target rejects them and the fixture is empty
    let second = FixtureBuilder::new(config.fixture.clone()).build(&client).await;
    assert!(second.is_empty());

    let mut prefixed = config.fixture.clone();
    prefixed.team_prefix = "rerun".to_string();
    let third = FixtureBuilder::new(prefixed).build(&client).await;
    assert_eq!(third.team_count(), 3);
    assert_eq!(third.teams[0].members[0].user_id, "u-rerun-t0-0");
}
