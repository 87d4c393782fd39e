//! Scenario executors.
//!
//! Each executor issues at most one request, evaluates its named checks and
//! records one outcome. A no-op records nothing but the no-op itself.

use loadgen_common::{CreatePullRequestRequest, DeactivateTeamRequest, MergePullRequestRequest};
use rand::seq::SliceRandom;
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::client::{ApiResponse, TargetApi};
use crate::config::MergeConfig;
use crate::error::LoadgenError;
use crate::fixture::RunFixture;
use crate::recorder::RunMetrics;
use crate::registry::PullRequestRegistry;
use crate::scenario::Scenario;

/// Result of one executed scenario
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Every check passed
    Passed,
    /// At least one check failed
    Failed,
    /// Declined to act for lack of state; nothing recorded
    NoOp,
}

/// Tunables shared by all executors
#[derive(Debug, Clone)]
pub struct ExecutorSettings {
    /// Latency SLI a response must beat to count as fast
    pub response_time: Duration,
    pub merge: MergeConfig,
}

impl Default for ExecutorSettings {
    fn default() -> Self {
        Self {
            response_time: Duration::from_millis(300),
            merge: MergeConfig::default(),
        }
    }
}

/// Everything an iteration needs, shared across workers
#[derive(Clone)]
pub struct ScenarioContext {
    pub api: Arc<dyn TargetApi>,
    pub fixture: Arc<RunFixture>,
    pub registry: Arc<PullRequestRegistry>,
    pub metrics: Arc<RunMetrics>,
    pub settings: ExecutorSettings,
}

/// Named check results of one scenario execution
struct CheckSet {
    scenario: Scenario,
    results: Vec<(String, bool)>,
}

impl CheckSet {
    fn new(scenario: Scenario) -> Self {
        Self {
            scenario,
            results: Vec::with_capacity(3),
        }
    }

    fn check(&mut self, label: &str, passed: bool) -> &mut Self {
        self.results
            .push((format!("{}: {}", self.scenario.check_prefix(), label), passed));
        self
    }

    fn passed(&self) -> bool {
        self.results.iter().all(|(_, passed)| *passed)
    }
}

impl ScenarioContext {
    pub fn new(
        api: Arc<dyn TargetApi>,
        fixture: Arc<RunFixture>,
        registry: Arc<PullRequestRegistry>,
        metrics: Arc<RunMetrics>,
        settings: ExecutorSettings,
    ) -> Self {
        Self {
            api,
            fixture,
            registry,
            metrics,
            settings,
        }
    }

    /// Run `scenario` on behalf of worker `worker_id`
    pub async fn execute(&self, scenario: Scenario, worker_id: u32) -> Outcome {
        let outcome = match scenario {
            Scenario::GetStats => self.get_stats().await,
            Scenario::GetUserReviews => self.get_user_reviews().await,
            Scenario::CreatePullRequest => self.create_pull_request(worker_id).await,
            Scenario::MergePullRequest => self.merge_pull_request().await,
            Scenario::DeactivateTeam => self.deactivate_team().await,
        };

        match outcome {
            Outcome::Passed => self.metrics.record_scenario(scenario, true),
            Outcome::Failed => self.metrics.record_scenario(scenario, false),
            Outcome::NoOp => self.metrics.record_scenario_no_op(scenario),
        }
        outcome
    }

    fn latency_label(&self) -> String {
        format!("response time < {}ms", self.settings.response_time.as_millis())
    }

    fn is_fast(&self, response: &ApiResponse) -> bool {
        response.latency < self.settings.response_time
    }

    /// Record a response against the statuses this scenario expects
    fn record_response(&self, scenario: Scenario, response: &ApiResponse, expected: &[u16]) {
        let failed = !expected.contains(&response.status);
        self.metrics
            .record_request(scenario, response.latency, failed);
    }

    /// Commit checks and the error-rate sample, return the outcome
    fn finish(&self, checks: &CheckSet, is_error: bool) -> Outcome {
        for (name, passed) in &checks.results {
            self.metrics.record_check(name, *passed);
        }
        self.metrics.record_error(checks.scenario, is_error);

        if checks.passed() {
            Outcome::Passed
        } else {
            debug!(
                scenario = %checks.scenario,
                failed_checks = ?checks.results.iter().filter(|(_, p)| !p).map(|(n, _)| n.as_str()).collect::<Vec<_>>(),
                "Scenario checks failed"
            );
            Outcome::Failed
        }
    }

    /// A transport failure fails every check of the scenario
    fn transport_failure(&self, mut checks: CheckSet, labels: &[&str], error: &LoadgenError) -> Outcome {
        warn!(scenario = %checks.scenario, error = %error, "Request failed");
        self.metrics.record_transport_failure(checks.scenario);
        for label in labels {
            checks.check(label, false);
        }
        self.finish(&checks, true)
    }

    /// `GET /stats`: status 200, fast, and a numeric `total_teams`
    pub async fn get_stats(&self) -> Outcome {
        let latency_label = self.latency_label();
        let labels = ["status is 200", latency_label.as_str(), "has total_teams"];
        let mut checks = CheckSet::new(Scenario::GetStats);

        let response = match self.api.get_stats().await {
            Ok(response) => response,
            Err(e) => return self.transport_failure(checks, &labels, &e),
        };
        self.record_response(Scenario::GetStats, &response, &[200]);

        let has_total_teams = response
            .json()
            .map(|body| body.get("total_teams").is_some_and(|v| v.is_number()))
            .unwrap_or(false);

        checks
            .check(labels[0], response.status == 200)
            .check(labels[1], self.is_fast(&response))
            .check(labels[2], has_total_teams);

        let passed = checks.passed();
        self.finish(&checks, !passed)
    }

    /// `GET /users/getReview` for a random member of a random team
    pub async fn get_user_reviews(&self) -> Outcome {
        let user_id = {
            let mut rng = rand::thread_rng();
            self.fixture
                .random_team(&mut rng)
                .and_then(|team| team.members.choose(&mut rng))
                .map(|user| user.user_id.clone())
        };
        let Some(user_id) = user_id else {
            return Outcome::NoOp;
        };

        let latency_label = self.latency_label();
        let labels = ["status is 200", latency_label.as_str()];
        let mut checks = CheckSet::new(Scenario::GetUserReviews);

        let response = match self.api.get_user_reviews(&user_id).await {
            Ok(response) => response,
            Err(e) => return self.transport_failure(checks, &labels, &e),
        };
        self.record_response(Scenario::GetUserReviews, &response, &[200]);

        checks
            .check(labels[0], response.status == 200)
            .check(labels[1], self.is_fast(&response));

        let passed = checks.passed();
        self.finish(&checks, !passed)
    }

    /// `POST /pullRequest/create` authored by the first member of a random team
    pub async fn create_pull_request(&self, worker_id: u32) -> Outcome {
        let request = {
            let mut rng = rand::thread_rng();
            self.fixture
                .random_team(&mut rng)
                .and_then(|team| team.author())
                .map(|author| new_pull_request(worker_id, &author.user_id, &mut rng))
        };
        let Some(request) = request else {
            return Outcome::NoOp;
        };

        let latency_label = self.latency_label();
        let labels = ["status is 201", latency_label.as_str()];
        let mut checks = CheckSet::new(Scenario::CreatePullRequest);

        let response = match self.api.create_pull_request(&request).await {
            Ok(response) => response,
            Err(e) => return self.transport_failure(checks, &labels, &e),
        };
        self.record_response(Scenario::CreatePullRequest, &response, &[201]);

        if response.status == 201 {
            self.registry.append(request.pull_request_id.clone());
            self.metrics.set_registry_size(self.registry.len());
        }

        checks
            .check(labels[0], response.status == 201)
            .check(labels[1], self.is_fast(&response));

        let passed = checks.passed();
        self.finish(&checks, !passed)
    }

    /// `POST /pullRequest/merge` on a previously created pull request.
    ///
    /// Skipped entirely while the registry is colder than
    /// `merge.min_registry_size`.
    pub async fn merge_pull_request(&self) -> Outcome {
        let merge = &self.settings.merge;
        if self.registry.len() < merge.min_registry_size {
            debug!(
                registry_size = self.registry.len(),
                min_registry_size = merge.min_registry_size,
                "Registry too small, skipping merge"
            );
            return Outcome::NoOp;
        }

        let picked = {
            let mut rng = rand::thread_rng();
            self.registry.pick(merge.window, merge.selection, &mut rng)
        };
        let Some(pull_request_id) = picked else {
            return Outcome::NoOp;
        };

        let latency_label = self.latency_label();
        let labels = ["status is 200", latency_label.as_str()];
        let mut checks = CheckSet::new(Scenario::MergePullRequest);

        let request = MergePullRequestRequest { pull_request_id };
        let response = match self.api.merge_pull_request(&request).await {
            Ok(response) => response,
            Err(e) => return self.transport_failure(checks, &labels, &e),
        };
        self.record_response(Scenario::MergePullRequest, &response, &[200]);

        checks
            .check(labels[0], response.status == 200)
            .check(labels[1], self.is_fast(&response));

        let passed = checks.passed();
        self.finish(&checks, !passed)
    }

    /// `POST /team/deactivate` on a random team.
    ///
    /// 404 means another iteration got there first; it never counts
    /// against the error rate.
    pub async fn deactivate_team(&self) -> Outcome {
        let team_name = {
            let mut rng = rand::thread_rng();
            self.fixture
                .random_team(&mut rng)
                .map(|team| team.name.clone())
        };
        let Some(team_name) = team_name else {
            return Outcome::NoOp;
        };

        let latency_label = self.latency_label();
        let labels = ["status is 200 or 404", latency_label.as_str()];
        let mut checks = CheckSet::new(Scenario::DeactivateTeam);

        let request = DeactivateTeamRequest { team_name };
        let response = match self.api.deactivate_team(&request).await {
            Ok(response) => response,
            Err(e) => return self.transport_failure(checks, &labels, &e),
        };
        self.record_response(Scenario::DeactivateTeam, &response, &[200, 404]);

        checks
            .check(labels[0], response.status == 200 || response.status == 404)
            .check(labels[1], self.is_fast(&response));

        let passed = checks.passed();
        self.finish(&checks, !passed && response.status != 404)
    }
}

/// Fresh pull request with an id unique across workers
pub fn new_pull_request<R: Rng + ?Sized>(
    worker_id: u32,
    author_id: &str,
    rng: &mut R,
) -> CreatePullRequestRequest {
    let timestamp = chrono::Utc::now().timestamp_millis();
    let suffix: String = (0..8).map(|_| rng.gen_range(b'a'..=b'z') as char).collect();

    CreatePullRequestRequest {
        pull_request_id: format!("pr-{}-{}-{}", worker_id, timestamp, suffix),
        pull_request_name: format!("Feature-{}-{}", timestamp, suffix),
        author_id: author_id.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_pull_request_id_shape() {
        let mut rng = StdRng::seed_from_u64(3);
        let pr = new_pull_request(7, "u-t0-0", &mut rng);
        let parts: Vec<_> = pr.pull_request_id.split('-').collect();
        assert_eq!(parts.len(), 4);
        assert_eq!(parts[0], "pr");
        assert_eq!(parts[1], "7");
        assert!(parts[2].parse::<i64>().is_ok());
        assert_eq!(parts[3].len(), 8);
        assert!(parts[3].chars().all(|c| c.is_ascii_lowercase()));
        assert!(pr.pull_request_name.starts_with("Feature-"));
        assert_eq!(pr.author_id, "u-t0-0");
    }

    #[test]
    fn test_pull_request_ids_differ() {
        let mut rng = StdRng::seed_from_u64(3);
        let ids: std::collections::HashSet<_> = (0..500)
            .map(|_| new_pull_request(1, "a", &mut rng).pull_request_id)
            .collect();
        assert_eq!(ids.len(), 500);
    }

    #[test]
    fn test_check_set_naming() {
        let mut checks = CheckSet::new(Scenario::CreatePullRequest);
        checks.check("status is 201", true).check("response time < 300ms", false);
        assert_eq!(checks.results[0].0, "pr create: status is 201");
        assert!(!checks.passed());
    }
}
