//! Scenario kinds and the weighted table that maps a draw in `[0, 100)` to one
//! of them.

use serde::Serialize;
use std::fmt;

use crate::error::{LoadgenError, Result};

/// Size of the draw domain; weights are percentages of it
pub const DRAW_DOMAIN: u32 = 100;

/// One category of simulated user action
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Scenario {
    GetStats,
    GetUserReviews,
    CreatePullRequest,
    MergePullRequest,
    DeactivateTeam,
}

impl Scenario {
    pub const ALL: [Scenario; 5] = [
        Scenario::GetStats,
        Scenario::GetUserReviews,
        Scenario::CreatePullRequest,
        Scenario::MergePullRequest,
        Scenario::DeactivateTeam,
    ];

    /// Stable name used in logs and metric labels
    pub fn name(&self) -> &'static str {
        match self {
            Scenario::GetStats => "get_stats",
            Scenario::GetUserReviews => "get_user_reviews",
            Scenario::CreatePullRequest => "create_pull_request",
            Scenario::MergePullRequest => "merge_pull_request",
            Scenario::DeactivateTeam => "deactivate_team",
        }
    }

    /// Prefix of the check names recorded by this scenario
    pub fn check_prefix(&self) -> &'static str {
        match self {
            Scenario::GetStats => "stats",
            Scenario::GetUserReviews => "reviews",
            Scenario::CreatePullRequest => "pr create",
            Scenario::MergePullRequest => "merge",
            Scenario::DeactivateTeam => "deactivate",
        }
    }
}

impl fmt::Display for Scenario {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Weighted choice table of `(cumulative upper bound, scenario)` pairs
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScenarioTable {
    entries: Vec<(u32, Scenario)>,
}

impl ScenarioTable {
    /// Build a table from per-scenario weights.
    ///
    /// Every weight must be positive and the weights must add up to
    /// [`DRAW_DOMAIN`], so the ranges are exhaustive and non-overlapping.
    pub fn from_weights(weights: &[(Scenario, u32)]) -> Result<Self> {
        if weights.is_empty() {
            return Err(LoadgenError::Config("Scenario table is empty".to_string()));
        }

        let mut entries = Vec::with_capacity(weights.len());
        let mut upper = 0u32;
        for &(scenario, weight) in weights {
            if weight == 0 {
                return Err(LoadgenError::Config(format!(
                    "Scenario {} has zero weight",
                    scenario
                )));
            }
            upper = upper.saturating_add(weight);
            entries.push((upper, scenario));
        }

        if upper != DRAW_DOMAIN {
            return Err(LoadgenError::Config(format!(
                "Scenario weights add up to {}, expected {}",
                upper, DRAW_DOMAIN
            )));
        }

        Ok(Self { entries })
    }

    /// Scenario selected by `draw`, or `None` when the draw is outside `[0, 100)`
    pub fn select(&self, draw: u32) -> Option<Scenario> {
        let idx = self.entries.partition_point(|&(upper, _)| upper <= draw);
        self.entries.get(idx).map(|&(_, scenario)| scenario)
    }

    /// Half-open draw range `[start, end)` owned by `scenario`
    pub fn range_of(&self, scenario: Scenario) -> Option<(u32, u32)> {
        let mut start = 0;
        for &(upper, s) in &self.entries {
            if s == scenario {
                return Some((start, upper));
            }
            start = upper;
        }
        None
    }
}

impl Default for ScenarioTable {
    fn default() -> Self {
        Self {
            entries: vec![
                (35, Scenario::GetStats),
                (60, Scenario::GetUserReviews),
                (75, Scenario::CreatePullRequest),
                (88, Scenario::MergePullRequest),
                (100, Scenario::DeactivateTeam),
            ],
        }
    }
}
