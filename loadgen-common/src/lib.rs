// Loadgen Common - Wire types shared between the load generator and the stub target
// Field names follow the JSON contract of the team / pull-request API.

use serde::{Deserialize, Serialize};

/// Endpoint paths of the target API
pub mod paths {
    pub const HEALTH: &str = "/health";
    pub const STATS: &str = "/stats";
    pub const TEAM_ADD: &str = "/team/add";
    pub const TEAM_DEACTIVATE: &str = "/team/deactivate";
    pub const USER_REVIEWS: &str = "/users/getReview";
    pub const PULL_REQUEST_CREATE: &str = "/pullRequest/create";
    pub const PULL_REQUEST_MERGE: &str = "/pullRequest/merge";
}

/// Team member as sent to `/team/add`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub user_id: String,
    pub username: String,
    pub is_active: bool,
}

/// Team with its ordered member list
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Team {
    #[serde(rename = "team_name")]
    pub name: String,
    pub members: Vec<User>,
}

impl Team {
    /// First member of the team, used as pull request author
    pub fn author(&self) -> Option<&User> {
        self.members.first()
    }
}

/// Body of `POST /team/deactivate`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeactivateTeamRequest {
    pub team_name: String,
}

/// Body of `POST /pullRequest/create`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreatePullRequestRequest {
    pub pull_request_id: String,
    pub pull_request_name: String,
    pub author_id: String,
}

/// Body of `POST /pullRequest/merge`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MergePullRequestRequest {
    pub pull_request_id: String,
}

/// Aggregate counters returned by `GET /stats`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatsResponse {
    pub total_prs: u64,
    pub open_prs: u64,
    pub merged_prs: u64,
    pub total_teams: u64,
    pub total_users: u64,
    pub active_users: u64,
}

/// Error envelope used by the target API
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: ErrorBody,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub code: String,
    pub message: String,
}

impl ErrorResponse {
    pub fn new(code: &str, message: impl Into<String>) -> Self {
        Self {
            error: ErrorBody {
                code: code.to_string(),
                message: message.into(),
            },
        }
    }
}
