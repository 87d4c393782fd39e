//! Run lifecycle: pre-flight, fixture setup, load phase, thresholds, teardown.

use std::sync::Arc;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use crate::client::TargetApi;
use crate::config::LoadConfig;
use crate::dispatcher::Dispatcher;
use crate::error::{LoadgenError, Result};
use crate::executor::ExecutorSettings;
use crate::fixture::FixtureBuilder;
use crate::recorder::RunMetrics;
use crate::report::RunReport;
use crate::scheduler::WorkloadScheduler;
use crate::thresholds::evaluate_thresholds;

/// Drives one complete load test against a target
pub struct LoadRunner {
    config: LoadConfig,
    api: Arc<dyn TargetApi>,
}

impl LoadRunner {
    pub fn new(config: LoadConfig, api: Arc<dyn TargetApi>) -> Self {
        Self { config, api }
    }

    /// Probe `/health`; anything but a 200 aborts the run
    pub async fn preflight(&self) -> Result<()> {
        match self.api.health().await {
            Ok(response) if response.status == 200 => {
                info!(latency_ms = response.latency_ms(), "Target is healthy");
                Ok(())
            }
            Ok(response) => Err(LoadgenError::Setup(format!(
                "Health check returned status {}",
                response.status
            ))),
            Err(e) => Err(LoadgenError::Setup(format!("Health check failed: {}", e))),
        }
    }

    /// Run the whole test and return its report.
    ///
    /// Errors only on configuration or pre-flight problems; threshold
    /// failures are reported through [`RunReport::passed`].
    #[instrument(skip_all, fields(target = %self.config.target.base_url))]
    pub async fn run(&self) -> Result<RunReport> {
        let run_id = Uuid::new_v4();
        let started_at = chrono::Utc::now();
        let table = self.config.scenarios.table()?;

        info!(run_id = %run_id, "Starting load test");

        if self.config.target.health_check {
            if let Err(e) = self.preflight().await {
                error!(error = %e, "Pre-flight check failed, aborting before load");
                return Err(e);
            }
        }

        let fixture = FixtureBuilder::new(self.config.fixture.clone())
            .build(&*self.api)
            .await;
        if fixture.is_empty() {
            warn!("No teams were created, every iteration will be skipped");
        }

        let metrics = Arc::new(RunMetrics::new());
        let settings = ExecutorSettings {
            response_time: self.config.thresholds.response_time(),
            merge: self.config.merge.clone(),
        };

        let scheduler = WorkloadScheduler::new(self.config.load.clone(), Dispatcher::new(table));
        let scheduler_report = scheduler
            .run(
                Arc::clone(&self.api),
                Arc::clone(&fixture),
                Arc::clone(&metrics),
                settings,
            )
            .await;

        let summary = metrics.summary();
        let thresholds = evaluate_thresholds(&summary, &self.config.thresholds.expressions());

        let report = RunReport {
            run_id,
            target: self.config.target.base_url.clone(),
            started_at,
            finished_at: chrono::Utc::now(),
            teams_created: fixture.team_count(),
            users_created: fixture.user_count(),
            scheduler: scheduler_report,
            summary,
            thresholds,
        };
        report.log();

        if !self.config.report.summary_path.is_empty() {
            if let Err(e) = report.write_json(&self.config.report.summary_path) {
                warn!(
                    path = %self.config.report.summary_path,
                    error = %e,
                    "Failed to write summary"
                );
            }
        }

        Ok(report)
    }
}
