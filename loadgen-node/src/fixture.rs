//! One-time fixture setup: teams and users every iteration draws from.

use loadgen_common::{Team, User};
use rand::Rng;
use std::sync::Arc;
use tracing::{info, instrument, warn};

use crate::client::TargetApi;
use crate::config::FixtureConfig;

const DEFAULT_PREFIX: &str = "team";

/// Read-only set of teams created before load starts
#[derive(Debug, Clone, Default)]
pub struct RunFixture {
    pub teams: Vec<Team>,
}

impl RunFixture {
    pub fn new(teams: Vec<Team>) -> Self {
        Self { teams }
    }

    pub fn team_count(&self) -> usize {
        self.teams.len()
    }

    pub fn user_count(&self) -> usize {
        self.teams.iter().map(|t| t.members.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.teams.is_empty()
    }

    /// Uniformly chosen team
    pub fn random_team<R: Rng + ?Sized>(&self, rng: &mut R) -> Option<&Team> {
        if self.teams.is_empty() {
            return None;
        }
        self.teams.get(rng.gen_range(0..self.teams.len()))
    }
}

/// Builds the fixture by creating each team on the target
#[derive(Debug, Clone)]
pub struct FixtureBuilder {
    config: FixtureConfig,
}

impl FixtureBuilder {
    pub fn new(config: FixtureConfig) -> Self {
        Self { config }
    }

    /// Deterministic team record for `team_index`, members first
    pub fn build_team(&self, team_index: u32) -> Team {
        let prefix = self.config.team_prefix.as_str();
        let members = (0..self.config.members_per_team)
            .map(|member_index| {
                let (user_id, username) = if prefix == DEFAULT_PREFIX {
                    (
                        format!("u-t{}-{}", team_index, member_index),
                        format!("user_{}_{}", team_index, member_index),
                    )
                } else {
                    (
                        format!("u-{}-t{}-{}", prefix, team_index, member_index),
                        format!("user_{}_{}_{}", prefix, team_index, member_index),
                    )
                };
                User {
                    user_id,
                    username,
                    is_active: true,
                }
            })
            .collect();

        Team {
            name: format!("{}-{}", prefix, team_index),
            members,
        }
    }

    /// Create every team sequentially and keep those the target accepted.
    ///
    /// A rejected or unreachable team is logged and left out; the run goes
    /// on with whatever was created.
    #[instrument(skip_all, fields(teams = self.config.teams, members = self.config.members_per_team))]
    pub async fn build<A: TargetApi + ?Sized>(&self, api: &A) -> Arc<RunFixture> {
        info!(
            teams = self.config.teams,
            users = self.config.teams * self.config.members_per_team,
            "Setting up test data"
        );

        let mut teams = Vec::with_capacity(self.config.teams as usize);
        let mut failed = 0u32;

        for team_index in 0..self.config.teams {
            let team = self.build_team(team_index);

            match api.add_team(&team).await {
                Ok(response) if response.status == 200 || response.status == 201 => {
                    info!(
                        team = %team.name,
                        members = team.members.len(),
                        "Created team"
                    );
                    teams.push(team);
                }
                Ok(response) => {
                    failed += 1;
                    warn!(
                        team = %team.name,
                        status = response.status,
                        "Failed to create team"
                    );
                }
                Err(e) => {
                    failed += 1;
                    warn!(team = %team.name, error = %e, "Failed to create team");
                }
            }
        }

        let fixture = RunFixture::new(teams);
        info!(
            teams = fixture.team_count(),
            users = fixture.user_count(),
            failed = failed,
            "Setup complete"
        );
        Arc::new(fixture)
    }
}
