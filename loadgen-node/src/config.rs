use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::time::Duration;
use tracing::info;

use crate::error::{LoadgenError, Result};
use crate::registry::Selection;
use crate::scenario::{Scenario, ScenarioTable};
use crate::thresholds::parse_threshold_expr;

/// Main configuration for a load run
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LoadConfig {
    /// Target API connection settings
    pub target: TargetConfig,
    /// Arrival rate, duration and worker pool bounds
    pub load: LoadProfileConfig,
    /// Fixture dimensions
    pub fixture: FixtureConfig,
    /// Scenario mix
    pub scenarios: ScenarioWeightsConfig,
    /// Merge scenario tuning
    pub merge: MergeConfig,
    /// Pass/fail thresholds
    pub thresholds: ThresholdsConfig,
    /// Logging configuration
    pub logging: LoggingConfig,
    /// Metrics export
    pub metrics: MetricsConfig,
    /// End-of-run report
    pub report: ReportConfig,
}

/// Target API configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TargetConfig {
    /// Base URL of the API under test
    pub base_url: String,
    /// Per-request timeout in seconds
    pub request_timeout_seconds: u64,
    /// Probe `/health` before fixture setup
    pub health_check: bool,
    /// Timeout for the pre-flight probe in seconds
    pub health_timeout_seconds: u64,
}

impl Default for TargetConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8080".to_string(),
            request_timeout_seconds: 10,
            health_check: true,
            health_timeout_seconds: 5,
        }
    }
}

/// Constant arrival rate profile
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoadProfileConfig {
    /// Iterations started per time unit
    pub rate: u32,
    /// Length of the time unit in seconds
    pub time_unit_seconds: u64,
    /// Wall-clock duration of the run in seconds
    pub duration_seconds: u64,
    /// Workers kept warm from the start
    pub pre_allocated_workers: u32,
    /// Hard ceiling on concurrent workers
    pub max_workers: u32,
}

impl Default for LoadProfileConfig {
    fn default() -> Self {
        Self {
            rate: 5,
            time_unit_seconds: 1,
            duration_seconds: 30,
            pre_allocated_workers: 10,
            max_workers: 50,
        }
    }
}

impl LoadProfileConfig {
    /// Gap between two scheduled iterations; zero when `rate` exceeds
    /// one per nanosecond of `time_unit_seconds`
    pub fn tick_interval(&self) -> Duration {
        let unit = Duration::from_secs(self.time_unit_seconds);
        unit / self.rate.max(1)
    }

    /// Run duration as Duration
    pub fn duration(&self) -> Duration {
        Duration::from_secs(self.duration_seconds)
    }
}

/// Fixture dimensions
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FixtureConfig {
    /// Number of teams to create
    pub teams: u32,
    /// Members per team
    pub members_per_team: u32,
    /// Team name prefix
    pub team_prefix: String,
}

impl Default for FixtureConfig {
    fn default() -> Self {
        Self {
            teams: 20,
            members_per_team: 10,
            team_prefix: "team".to_string(),
        }
    }
}

/// Scenario weights, in percent of iterations
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScenarioWeightsConfig {
    pub get_stats: u32,
    pub get_user_reviews: u32,
    pub create_pull_request: u32,
    pub merge_pull_request: u32,
    pub deactivate_team: u32,
}

impl Default for ScenarioWeightsConfig {
    fn default() -> Self {
        Self {
            get_stats: 35,
            get_user_reviews: 25,
            create_pull_request: 15,
            merge_pull_request: 13,
            deactivate_team: 12,
        }
    }
}

impl ScenarioWeightsConfig {
    /// Weights in dispatch order
    pub fn as_pairs(&self) -> Vec<(Scenario, u32)> {
        vec![
            (Scenario::GetStats, self.get_stats),
            (Scenario::GetUserReviews, self.get_user_reviews),
            (Scenario::CreatePullRequest, self.create_pull_request),
            (Scenario::MergePullRequest, self.merge_pull_request),
            (Scenario::DeactivateTeam, self.deactivate_team),
        ]
    }

    /// Build the dispatch table from these weights
    pub fn table(&self) -> Result<ScenarioTable> {
        ScenarioTable::from_weights(&self.as_pairs())
    }
}

/// Merge scenario configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MergeConfig {
    /// Registry size below which merges are skipped
    pub min_registry_size: usize,
    /// Number of candidate ids considered per merge
    pub window: usize,
    /// Which end of the registry the window covers
    pub selection: Selection,
}

impl Default for MergeConfig {
    fn default() -> Self {
        Self {
            min_registry_size: 5,
            window: 10,
            selection: Selection::Recent,
        }
    }
}

/// Threshold configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ThresholdsConfig {
    /// Response time SLI in milliseconds
    pub response_time_ms: u64,
    /// Percentile the response time SLI applies to
    pub response_time_percentile: f64,
    /// Maximum tolerated HTTP failure rate
    pub http_failure_rate: f64,
    /// Maximum tolerated custom error rate
    pub error_rate: f64,
    /// Additional expressions keyed by metric name
    pub extra: BTreeMap<String, Vec<String>>,
}

impl Default for ThresholdsConfig {
    fn default() -> Self {
        Self {
            response_time_ms: 300,
            response_time_percentile: 95.0,
            http_failure_rate: 0.001,
            error_rate: 0.001,
            extra: BTreeMap::new(),
        }
    }
}

impl ThresholdsConfig {
    /// Response time SLI as Duration
    pub fn response_time(&self) -> Duration {
        Duration::from_millis(self.response_time_ms)
    }

    /// All threshold expressions as (metric, expression) pairs
    pub fn expressions(&self) -> Vec<(String, String)> {
        let mut exprs = vec![
            (
                "http_req_duration".to_string(),
                format!(
                    "p({})<{}",
                    self.response_time_percentile, self.response_time_ms
                ),
            ),
            (
                "http_req_failed".to_string(),
                format!("rate<{}", self.http_failure_rate),
            ),
            ("errors".to_string(), format!("rate<{}", self.error_rate)),
        ];

        for (metric, list) in &self.extra {
            for expr in list {
                exprs.push((metric.clone(), expr.clone()));
            }
        }

        exprs
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,
    /// Log format (json, text)
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "text".to_string(),
        }
    }
}

/// Metrics export configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    /// Expose a Prometheus scrape endpoint during the run
    pub prometheus_enabled: bool,
    /// Scrape endpoint address
    pub listen_addr: String,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            prometheus_enabled: false,
            listen_addr: "127.0.0.1:9090".to_string(),
        }
    }
}

/// End-of-run report configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ReportConfig {
    /// Write a JSON summary here when non-empty
    pub summary_path: String,
}

impl LoadConfig {
    /// Load configuration from file, with `LOADGEN_*` environment overrides
    pub fn from_file(path: &str) -> Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::with_name(path))
            .add_source(
                config::Environment::with_prefix("LOADGEN")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let config: LoadConfig = settings.try_deserialize()?;
        info!(path = %path, "Configuration loaded");
        Ok(config)
    }

    /// Save configuration to file
    pub fn save_to_file(&self, path: &str) -> Result<()> {
        let toml_string =
            toml::to_string_pretty(self).map_err(|e| LoadgenError::Config(e.to_string()))?;
        std::fs::write(path, toml_string)?;
        Ok(())
    }

    /// Metrics listener address
    pub fn metrics_addr(&self) -> std::result::Result<SocketAddr, std::net::AddrParseError> {
        self.metrics.listen_addr.parse()
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        reqwest::Url::parse(&self.target.base_url).map_err(|e| {
            LoadgenError::Config(format!("Invalid target base_url {}: {}", self.target.base_url, e))
        })?;

        if self.target.request_timeout_seconds == 0 {
            return Err(LoadgenError::Config(
                "Request timeout cannot be 0".to_string(),
            ));
        }

        let load = &self.load;
        if load.rate == 0 {
            return Err(LoadgenError::Config("Arrival rate cannot be 0".to_string()));
        }
        if load.time_unit_seconds == 0 {
            return Err(LoadgenError::Config("Time unit cannot be 0".to_string()));
        }
        if load.tick_interval().is_zero() {
            return Err(LoadgenError::Config(format!(
                "Arrival rate {} per {}s is below nanosecond resolution",
                load.rate, load.time_unit_seconds
            )));
        }
        if load.duration_seconds == 0 {
            return Err(LoadgenError::Config("Run duration cannot be 0".to_string()));
        }
        if load.max_workers == 0 {
            return Err(LoadgenError::Config("max_workers cannot be 0".to_string()));
        }
        if load.pre_allocated_workers > load.max_workers {
            return Err(LoadgenError::Config(format!(
                "pre_allocated_workers ({}) exceeds max_workers ({})",
                load.pre_allocated_workers, load.max_workers
            )));
        }

        if self.fixture.teams == 0 || self.fixture.members_per_team == 0 {
            return Err(LoadgenError::Config(
                "Fixture needs at least one team and one member per team".to_string(),
            ));
        }
        if self.fixture.team_prefix.is_empty() {
            return Err(LoadgenError::Config("Team prefix cannot be empty".to_string()));
        }

        if self.merge.window == 0 {
            return Err(LoadgenError::Config("Merge window cannot be 0".to_string()));
        }

        self.scenarios.table()?;

        let t = &self.thresholds;
        if t.response_time_ms == 0 {
            return Err(LoadgenError::Config(
                "Response time threshold cannot be 0".to_string(),
            ));
        }
        if !(t.response_time_percentile > 0.0 && t.response_time_percentile <= 100.0) {
            return Err(LoadgenError::Config(format!(
                "Response time percentile must be in (0, 100], got {}",
                t.response_time_percentile
            )));
        }
        if t.http_failure_rate <= 0.0 || t.error_rate <= 0.0 {
            return Err(LoadgenError::Config(
                "Rate thresholds must be positive".to_string(),
            ));
        }
        for (metric, expr) in t.expressions() {
            parse_threshold_expr(&expr).map_err(|e| {
                LoadgenError::Config(format!("Threshold for {}: {}", metric, e))
            })?;
        }

        if self.metrics.prometheus_enabled {
            self.metrics_addr().map_err(|e| {
                LoadgenError::Config(format!(
                    "Invalid metrics listen_addr {}: {}",
                    self.metrics.listen_addr, e
                ))
            })?;
        }

        Ok(())
    }
}
