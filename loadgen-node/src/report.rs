//! End-of-run report: logged at teardown, optionally written as JSON.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::Path;
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::Result;
use crate::recorder::{RunSummary, HTTP_REQ_DURATION};
use crate::scheduler::SchedulerReport;
use crate::thresholds::ThresholdReport;

/// Everything known about a finished run
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub run_id: Uuid,
    pub target: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub teams_created: usize,
    pub users_created: usize,
    pub scheduler: SchedulerReport,
    pub summary: RunSummary,
    pub thresholds: ThresholdReport,
}

impl RunReport {
    pub fn passed(&self) -> bool {
        self.thresholds.passed
    }

    /// Log the report, one event per section
    pub fn log(&self) {
        info!(
            run_id = %self.run_id,
            target = %self.target,
            teams = self.teams_created,
            users = self.users_created,
            pull_requests_created = self.scheduler.pull_requests_created,
            "Test completed"
        );

        info!(
            scheduled = self.scheduler.scheduled,
            completed = self.scheduler.completed,
            dropped = self.scheduler.dropped,
            no_ops = self.scheduler.no_ops,
            peak_active_workers = self.scheduler.peak_active_workers,
            elapsed_seconds = %format!("{:.2}", self.scheduler.elapsed_seconds),
            "Iterations"
        );

        for (scenario, counts) in &self.summary.scenarios {
            info!(
                scenario = %scenario,
                passed = counts.passed,
                failed = counts.failed,
                no_op = counts.no_op,
                "Scenario"
            );
        }

        for (name, check) in &self.summary.checks {
            let total = check.passes + check.fails;
            let ratio = if total == 0 {
                0.0
            } else {
                check.passes as f64 / total as f64 * 100.0
            };
            let pass_ratio = format!("{:.2}%", ratio);
            if check.fails == 0 {
                info!(check = %name, passes = check.passes, fails = check.fails, pass_ratio = %pass_ratio, "Check");
            } else {
                warn!(check = %name, passes = check.passes, fails = check.fails, pass_ratio = %pass_ratio, "Check");
            }
        }

        if let Some(trend) = self.summary.trend(HTTP_REQ_DURATION) {
            info!(
                count = trend.count,
                avg = %format!("{:.2}", trend.avg),
                min = %format!("{:.2}", trend.min),
                med = %format!("{:.2}", trend.med),
                max = %format!("{:.2}", trend.max),
                p90 = %format!("{:.2}", trend.p90),
                p95 = %format!("{:.2}", trend.p95),
                p99 = %format!("{:.2}", trend.p99),
                "http_req_duration (ms)"
            );
        }

        for (name, metric) in &self.summary.metrics {
            if let Some(rate) = self.summary.rate(name) {
                info!(metric = %name, trues = rate.trues, total = rate.total, rate = rate.rate, "Rate");
            } else if let Some(count) = self.summary.count(name) {
                info!(metric = %name, count = count, samples = metric.samples(), "Counter");
            }
        }

        if self.thresholds.passed {
            info!(thresholds = self.thresholds.results.len(), "All thresholds passed");
        } else {
            for failure in self.thresholds.failures() {
                warn!(
                    metric = %failure.metric,
                    expression = %failure.expression,
                    observed = ?failure.observed,
                    error = ?failure.error,
                    "Threshold crossed"
                );
            }
        }
    }

    /// Write the report as pretty JSON to `path`
    pub fn write_json(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        info!(path = %path.display(), "Summary written");
        Ok(())
    }
}
