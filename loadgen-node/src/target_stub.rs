//! In-memory stand-in for the team / pull-request review API.
//!
//! Serves the endpoints the load generator exercises with just enough
//! state to make their status codes meaningful. Used by integration tests
//! and the `test-target` binary for local smoke runs.

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use loadgen_common::{
    paths, CreatePullRequestRequest, DeactivateTeamRequest, ErrorResponse,
    MergePullRequestRequest, StatsResponse, Team,
};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info};

use crate::error::{LoadgenError, Result};

const MAX_REVIEWERS: usize = 2;

#[derive(Debug, Clone)]
struct UserRecord {
    team_name: String,
    is_active: bool,
}

#[derive(Debug, Clone)]
struct TeamRecord {
    members: Vec<String>,
    is_active: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
enum PullRequestStatus {
    Open,
    Merged,
}

#[derive(Debug, Clone, Serialize)]
struct PullRequestRecord {
    pull_request_id: String,
    pull_request_name: String,
    author_id: String,
    status: PullRequestStatus,
    assigned_reviewers: Vec<String>,
    created_at: chrono::DateTime<chrono::Utc>,
    merged_at: Option<chrono::DateTime<chrono::Utc>>,
}

/// Shared state of the stub target
#[derive(Debug, Clone, Default)]
pub struct TargetStubState {
    teams: Arc<DashMap<String, TeamRecord>>,
    users: Arc<DashMap<String, UserRecord>>,
    pull_requests: Arc<DashMap<String, PullRequestRecord>>,
    latency: Duration,
}

impl TargetStubState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Delay every load endpoint by `latency`
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Current aggregate counters
    pub fn stats(&self) -> StatsResponse {
        let merged = self
            .pull_requests
            .iter()
            .filter(|pr| pr.status == PullRequestStatus::Merged)
            .count() as u64;
        let total_prs = self.pull_requests.len() as u64;

        StatsResponse {
            total_prs,
            open_prs: total_prs.saturating_sub(merged),
            merged_prs: merged,
            total_teams: self.teams.len() as u64,
            total_users: self.users.len() as u64,
            active_users: self.users.iter().filter(|u| u.is_active).count() as u64,
        }
    }

    /// Whether `team_name` exists and is still active
    pub fn is_team_active(&self, team_name: &str) -> Option<bool> {
        self.teams.get(team_name).map(|team| team.is_active)
    }

    async fn simulate_latency(&self) {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
    }

    /// Active teammates of the author, up to two
    fn pick_reviewers(&self, author_id: &str, team_name: &str) -> Vec<String> {
        let Some(team) = self.teams.get(team_name) else {
            return Vec::new();
        };
        team.members
            .iter()
            .filter(|id| id.as_str() != author_id)
            .filter(|id| self.users.get(id.as_str()).is_some_and(|u| u.is_active))
            .take(MAX_REVIEWERS)
            .cloned()
            .collect()
    }
}

fn api_error(status: StatusCode, code: &str, message: impl Into<String>) -> Response {
    (status, Json(ErrorResponse::new(code, message))).into_response()
}

/// Build the stub router over `state`
pub fn create_stub_router(state: TargetStubState) -> Router {
    Router::new()
        .route(paths::HEALTH, get(health_check))
        .route(paths::STATS, get(handle_stats))
        .route(paths::TEAM_ADD, post(handle_team_add))
        .route(paths::TEAM_DEACTIVATE, post(handle_team_deactivate))
        .route(paths::USER_REVIEWS, get(handle_user_reviews))
        .route(paths::PULL_REQUEST_CREATE, post(handle_pull_request_create))
        .route(paths::PULL_REQUEST_MERGE, post(handle_pull_request_merge))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Bind `addr` and serve the stub in the background.
///
/// Returns the bound address, so `127.0.0.1:0` yields an ephemeral port.
pub async fn spawn_target_stub(
    addr: SocketAddr,
    state: TargetStubState,
) -> Result<(SocketAddr, JoinHandle<()>)> {
    let listener = TcpListener::bind(addr).await?;
    let local_addr = listener.local_addr()?;
    let app = create_stub_router(state);

    info!(addr = %local_addr, "Target stub listening");

    let handle = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            error!(error = %e, "Target stub server failed");
        }
    });

    Ok((local_addr, handle))
}

/// Serve the stub on `addr` until the server fails
pub async fn run_target_stub(addr: SocketAddr, state: TargetStubState) -> Result<()> {
    let listener = TcpListener::bind(addr).await?;
    info!(addr = %listener.local_addr()?, "Target stub listening");

    axum::serve(listener, create_stub_router(state))
        .await
        .map_err(|e| LoadgenError::Other(format!("Target stub server failed: {}", e)))
}

async fn health_check() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

async fn handle_stats(State(state): State<TargetStubState>) -> Json<StatsResponse> {
    state.simulate_latency().await;
    Json(state.stats())
}

async fn handle_team_add(State(state): State<TargetStubState>, Json(team): Json<Team>) -> Response {
    if team.name.is_empty() {
        return api_error(StatusCode::BAD_REQUEST, "INVALID_REQUEST", "team_name is required");
    }

    match state.teams.entry(team.name.clone()) {
        Entry::Occupied(_) => {
            return api_error(
                StatusCode::BAD_REQUEST,
                "TEAM_EXISTS",
                format!("{} already exists", team.name),
            );
        }
        Entry::Vacant(slot) => {
            slot.insert(TeamRecord {
                members: team.members.iter().map(|m| m.user_id.clone()).collect(),
                is_active: true,
            });
        }
    }

    for member in &team.members {
        state.users.insert(
            member.user_id.clone(),
            UserRecord {
                team_name: team.name.clone(),
                is_active: member.is_active,
            },
        );
    }

    debug!(team = %team.name, members = team.members.len(), "Team added");
    (StatusCode::CREATED, Json(serde_json::json!({ "team": team }))).into_response()
}

async fn handle_team_deactivate(
    State(state): State<TargetStubState>,
    Json(request): Json<DeactivateTeamRequest>,
) -> Response {
    state.simulate_latency().await;

    let members = {
        let Some(mut team) = state.teams.get_mut(&request.team_name) else {
            return api_error(StatusCode::NOT_FOUND, "NOT_FOUND", "team not found");
        };
        if !team.is_active {
            return api_error(StatusCode::NOT_FOUND, "NOT_FOUND", "team already deactivated");
        }
        team.is_active = false;
        team.members.clone()
    };

    for user_id in &members {
        if let Some(mut user) = state.users.get_mut(user_id) {
            user.is_active = false;
        }
    }

    debug!(team = %request.team_name, "Team deactivated");
    Json(serde_json::json!({
        "team_name": request.team_name,
        "deactivated_users": members.len(),
    }))
    .into_response()
}

#[derive(Debug, Deserialize)]
struct ReviewQuery {
    user_id: String,
}

async fn handle_user_reviews(
    State(state): State<TargetStubState>,
    Query(query): Query<ReviewQuery>,
) -> Response {
    state.simulate_latency().await;

    let pull_requests: Vec<serde_json::Value> = state
        .pull_requests
        .iter()
        .filter(|pr| pr.assigned_reviewers.contains(&query.user_id))
        .map(|pr| {
            serde_json::json!({
                "pull_request_id": pr.pull_request_id,
                "pull_request_name": pr.pull_request_name,
                "author_id": pr.author_id,
                "status": pr.status,
            })
        })
        .collect();

    Json(serde_json::json!({
        "user_id": query.user_id,
        "pull_requests": pull_requests,
    }))
    .into_response()
}

async fn handle_pull_request_create(
    State(state): State<TargetStubState>,
    Json(request): Json<CreatePullRequestRequest>,
) -> Response {
    state.simulate_latency().await;

    let Some(team_name) = state
        .users
        .get(&request.author_id)
        .map(|u| u.team_name.clone())
    else {
        return api_error(StatusCode::NOT_FOUND, "NOT_FOUND", "author not found");
    };
    let reviewers = state.pick_reviewers(&request.author_id, &team_name);

    let record = match state.pull_requests.entry(request.pull_request_id.clone()) {
        Entry::Occupied(_) => {
            return api_error(
                StatusCode::CONFLICT,
                "PR_EXISTS",
                format!("{} already exists", request.pull_request_id),
            );
        }
        Entry::Vacant(slot) => slot
            .insert(PullRequestRecord {
                pull_request_id: request.pull_request_id,
                pull_request_name: request.pull_request_name,
                author_id: request.author_id,
                status: PullRequestStatus::Open,
                assigned_reviewers: reviewers,
                created_at: chrono::Utc::now(),
                merged_at: None,
            })
            .clone(),
    };

    (StatusCode::CREATED, Json(serde_json::json!({ "pr": record }))).into_response()
}

async fn handle_pull_request_merge(
    State(state): State<TargetStubState>,
    Json(request): Json<MergePullRequestRequest>,
) -> Response {
    state.simulate_latency().await;

    let Some(mut pr) = state.pull_requests.get_mut(&request.pull_request_id) else {
        return api_error(StatusCode::NOT_FOUND, "NOT_FOUND", "pull request not found");
    };
    if pr.status != PullRequestStatus::Merged {
        pr.status = PullRequestStatus::Merged;
        pr.merged_at = Some(chrono::Utc::now());
    }
    let record = pr.clone();
    drop(pr);

    Json(serde_json::json!({ "pr": record })).into_response()
}
