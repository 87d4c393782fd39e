//! Scripted in-process target shared by the integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use loadgen_common::{
    CreatePullRequestRequest, DeactivateTeamRequest, MergePullRequestRequest, Team, User,
};
use loadgen_node::client::{ApiResponse, TargetApi};
use loadgen_node::config::MergeConfig;
use loadgen_node::error::{LoadgenError, Result};
use loadgen_node::executor::{ExecutorSettings, ScenarioContext};
use loadgen_node::fixture::RunFixture;
use loadgen_node::recorder::RunMetrics;
use loadgen_node::registry::PullRequestRegistry;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Endpoint {
    Health,
    AddTeam,
    Stats,
    Reviews,
    CreatePullRequest,
    MergePullRequest,
    DeactivateTeam,
}

/// Target whose answers are scripted per endpoint
#[derive(Debug, Default)]
pub struct MockTarget {
    statuses: HashMap<Endpoint, u16>,
    unreachable: HashSet<Endpoint>,
    rejected_teams: HashSet<String>,
    unreachable_teams: HashSet<String>,
    /// Latency reported in every response
    reported_latency: Duration,
    /// Time actually spent in every call
    hold: Duration,
    stats_body: Option<String>,
    calls: Mutex<HashMap<Endpoint, u64>>,
    deactivated: Mutex<HashSet<String>>,
    created: Mutex<Vec<String>>,
    merged: Mutex<Vec<String>>,
}

impl MockTarget {
    pub fn new() -> Self {
        Self {
            reported_latency: Duration::from_millis(5),
            ..Self::default()
        }
    }

    pub fn with_status(mut self, endpoint: Endpoint, status: u16) -> Self {
        self.statuses.insert(endpoint, status);
        self
    }

    pub fn unreachable(mut self, endpoint: Endpoint) -> Self {
        self.unreachable.insert(endpoint);
        self
    }

    pub fn rejecting_team(mut self, team_name: &str) -> Self {
        self.rejected_teams.insert(team_name.to_string());
        self
    }

    pub fn unreachable_team(mut self, team_name: &str) -> Self {
        self.unreachable_teams.insert(team_name.to_string());
        self
    }

    pub fn reporting_latency(mut self, latency: Duration) -> Self {
        self.reported_latency = latency;
        self
    }

    pub fn holding(mut self, hold: Duration) -> Self {
        self.hold = hold;
        self
    }

    pub fn with_stats_body(mut self, body: &str) -> Self {
        self.stats_body = Some(body.to_string());
        self
    }

    pub fn calls(&self, endpoint: Endpoint) -> u64 {
        self.calls.lock().unwrap().get(&endpoint).copied().unwrap_or(0)
    }

    pub fn total_calls(&self) -> u64 {
        self.calls.lock().unwrap().values().sum()
    }

    pub fn created(&self) -> Vec<String> {
        self.created.lock().unwrap().clone()
    }

    pub fn merged(&self) -> Vec<String> {
        self.merged.lock().unwrap().clone()
    }

    async fn answer(&self, endpoint: Endpoint, default_status: u16, body: &str) -> Result<ApiResponse> {
        *self.calls.lock().unwrap().entry(endpoint).or_insert(0) += 1;
        if !self.hold.is_zero() {
            tokio::time::sleep(self.hold).await;
        }
        if self.unreachable.contains(&endpoint) {
            return Err(LoadgenError::Transport("connection refused".to_string()));
        }
        let status = self.statuses.get(&endpoint).copied().unwrap_or(default_status);
        Ok(ApiResponse::new(status, self.reported_latency, body.as_bytes().to_vec()))
    }
}

#[async_trait]
impl TargetApi for MockTarget {
    async fn health(&self) -> Result<ApiResponse> {
        self.answer(Endpoint::Health, 200, r#"{"status":"ok"}"#).await
    }

    async fn add_team(&self, team: &Team) -> Result<ApiResponse> {
        if self.unreachable_teams.contains(&team.name) {
            *self.calls.lock().unwrap().entry(Endpoint::AddTeam).or_insert(0) += 1;
            return Err(LoadgenError::Transport("connection reset".to_string()));
        }
        if self.rejected_teams.contains(&team.name) {
            *self.calls.lock().unwrap().entry(Endpoint::AddTeam).or_insert(0) += 1;
            return Ok(ApiResponse::new(500, self.reported_latency, Vec::new()));
        }
        self.answer(Endpoint::AddTeam, 201, "{}").await
    }

    async fn get_stats(&self) -> Result<ApiResponse> {
        let body = self
            .stats_body
            .clone()
            .unwrap_or_else(|| r#"{"total_teams": 2, "total_prs": 0}"#.to_string());
        self.answer(Endpoint::Stats, 200, &body).await
    }

    async fn get_user_reviews(&self, _user_id: &str) -> Result<ApiResponse> {
        self.answer(Endpoint::Reviews, 200, r#"{"pull_requests": []}"#).await
    }

    async fn create_pull_request(&self, request: &CreatePullRequestRequest) -> Result<ApiResponse> {
        let response = self.answer(Endpoint::CreatePullRequest, 201, "{}").await?;
        if response.status == 201 {
            self.created.lock().unwrap().push(request.pull_request_id.clone());
        }
        Ok(response)
    }

    async fn merge_pull_request(&self, request: &MergePullRequestRequest) -> Result<ApiResponse> {
        self.merged.lock().unwrap().push(request.pull_request_id.clone());
        self.answer(Endpoint::MergePullRequest, 200, "{}").await
    }

    async fn deactivate_team(&self, request: &DeactivateTeamRequest) -> Result<ApiResponse> {
        if self.statuses.contains_key(&Endpoint::DeactivateTeam) {
            return self.answer(Endpoint::DeactivateTeam, 200, "{}").await;
        }
        let first_time = self.deactivated.lock().unwrap().insert(request.team_name.clone());
        let status = if first_time { 200 } else { 404 };
        self.answer(Endpoint::DeactivateTeam, status, "{}").await
    }
}

/// `teams` x `members` fixture with the default naming scheme
pub fn fixture(teams: u32, members: u32) -> Arc<RunFixture> {
    let teams = (0..teams)
        .map(|t| Team {
            name: format!("team-{}", t),
            members: (0..members)
                .map(|m| User {
                    user_id: format!("u-t{}-{}", t, m),
                    username: format!("user_{}_{}", t, m),
                    is_active: true,
                })
                .collect(),
        })
        .collect();
    Arc::new(RunFixture::new(teams))
}

/// Context over `api` and `fixture` with a fresh registry and metrics
pub fn context(api: Arc<MockTarget>, fixture: Arc<RunFixture>) -> ScenarioContext {
    ScenarioContext::new(
        api,
        fixture,
        Arc::new(PullRequestRegistry::new()),
        Arc::new(RunMetrics::new()),
        ExecutorSettings {
            response_time: Duration::from_millis(300),
            merge: MergeConfig::default(),
        },
    )
}
