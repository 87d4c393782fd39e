//! Loadgen Node Library
//!
//! Constant-arrival-rate load generator for the team / pull-request review
//! API: fixture setup, weighted scenario dispatch, shared pull request
//! registry, k6-style metrics and threshold evaluation.

pub mod client;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod executor;
pub mod fixture;
pub mod recorder;
pub mod registry;
pub mod report;
pub mod runner;
pub mod scenario;
pub mod scheduler;
pub mod target_stub;
pub mod thresholds;

// Re-export commonly used types
pub use client::{ApiResponse, HttpTargetClient, TargetApi};
pub use config::LoadConfig;
pub use dispatcher::{Dispatch, Dispatcher};
pub use error::{LoadgenError, Result};
pub use executor::{ExecutorSettings, Outcome, ScenarioContext};
pub use fixture::{FixtureBuilder, RunFixture};
pub use recorder::{RunMetrics, RunSummary};
pub use registry::{PullRequestRegistry, Selection};
pub use report::RunReport;
pub use runner::LoadRunner;
pub use scenario::{Scenario, ScenarioTable};
pub use scheduler::{SchedulerReport, WorkloadScheduler};
pub use thresholds::{evaluate_thresholds, ThresholdReport};
