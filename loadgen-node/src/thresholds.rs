//! k6-style threshold expressions (`p(95)<300`, `rate<0.001`, ...) evaluated
//! against the aggregated run summary once the run is over.

use serde::Serialize;
use std::fmt;
use tracing::{info, warn};

use crate::error::{LoadgenError, Result};
use crate::recorder::{MetricSummary, RunSummary};

/// Statistic a threshold is computed on
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub enum Aggregation {
    Avg,
    Min,
    Max,
    Med,
    Percentile(f64),
    Rate,
    Count,
}

impl fmt::Display for Aggregation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Aggregation::Avg => f.write_str("avg"),
            Aggregation::Min => f.write_str("min"),
            Aggregation::Max => f.write_str("max"),
            Aggregation::Med => f.write_str("med"),
            Aggregation::Percentile(p) => write!(f, "p({})", p),
            Aggregation::Rate => f.write_str("rate"),
            Aggregation::Count => f.write_str("count"),
        }
    }
}

/// Comparison operator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Comparison {
    Lt,
    Le,
    Gt,
    Ge,
    Eq,
    Ne,
}

impl Comparison {
    fn apply(&self, lhs: f64, rhs: f64) -> bool {
        match self {
            Comparison::Lt => lhs < rhs,
            Comparison::Le => lhs <= rhs,
            Comparison::Gt => lhs > rhs,
            Comparison::Ge => lhs >= rhs,
            Comparison::Eq => lhs == rhs,
            Comparison::Ne => lhs != rhs,
        }
    }

    fn symbol(&self) -> &'static str {
        match self {
            Comparison::Lt => "<",
            Comparison::Le => "<=",
            Comparison::Gt => ">",
            Comparison::Ge => ">=",
            Comparison::Eq => "==",
            Comparison::Ne => "!=",
        }
    }
}

/// Parsed threshold expression
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ThresholdExpr {
    pub aggregation: Aggregation,
    pub comparison: Comparison,
    pub value: f64,
}

impl fmt::Display for ThresholdExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}{}", self.aggregation, self.comparison.symbol(), self.value)
    }
}

/// Parse an expression such as `p(95)<300` or `rate <= 0.01`
pub fn parse_threshold_expr(input: &str) -> Result<ThresholdExpr> {
    let expr: String = input.chars().filter(|c| !c.is_whitespace()).collect();

    // Two-character operators first so `<=` is not read as `<`
    const OPERATORS: [(&str, Comparison); 6] = [
        ("<=", Comparison::Le),
        (">=", Comparison::Ge),
        ("==", Comparison::Eq),
        ("!=", Comparison::Ne),
        ("<", Comparison::Lt),
        (">", Comparison::Gt),
    ];

    let (pos, op, comparison) = OPERATORS
        .iter()
        .filter_map(|&(op, cmp)| expr.find(op).map(|pos| (pos, op, cmp)))
        .min_by_key(|&(pos, op, _)| (pos, std::cmp::Reverse(op.len())))
        .ok_or_else(|| LoadgenError::Threshold(format!("No comparison operator in '{}'", input)))?;

    let lhs = &expr[..pos];
    let rhs = &expr[pos + op.len()..];

    let aggregation = parse_aggregation(lhs)
        .ok_or_else(|| LoadgenError::Threshold(format!("Unknown aggregation '{}' in '{}'", lhs, input)))?;

    let value: f64 = rhs
        .parse()
        .map_err(|_| LoadgenError::Threshold(format!("Invalid value '{}' in '{}'", rhs, input)))?;
    if !value.is_finite() {
        return Err(LoadgenError::Threshold(format!(
            "Threshold value must be finite in '{}'",
            input
        )));
    }

    Ok(ThresholdExpr {
        aggregation,
        comparison,
        value,
    })
}

fn parse_aggregation(lhs: &str) -> Option<Aggregation> {
    match lhs {
        "avg" => Some(Aggregation::Avg),
        "min" => Some(Aggregation::Min),
        "max" => Some(Aggregation::Max),
        "med" => Some(Aggregation::Med),
        "rate" => Some(Aggregation::Rate),
        "count" => Some(Aggregation::Count),
        _ => {
            let inner = lhs.strip_prefix("p(")?.strip_suffix(')')?;
            let p: f64 = inner.parse().ok()?;
            (0.0..=100.0).contains(&p).then_some(Aggregation::Percentile(p))
        }
    }
}

/// Result of one threshold
#[derive(Debug, Clone, Serialize)]
pub struct ThresholdResult {
    pub metric: String,
    pub expression: String,
    /// Observed value, `None` when the metric had no samples
    pub observed: Option<f64>,
    pub passed: bool,
    /// Why a threshold could not be evaluated
    pub error: Option<String>,
}

/// Outcome of all thresholds of a run
#[derive(Debug, Clone, Serialize)]
pub struct ThresholdReport {
    pub results: Vec<ThresholdResult>,
    pub passed: bool,
}

impl ThresholdReport {
    pub fn failures(&self) -> impl Iterator<Item = &ThresholdResult> {
        self.results.iter().filter(|r| !r.passed)
    }
}

/// Observed value of `aggregation` on `summary`
fn observe(summary: &MetricSummary, aggregation: Aggregation) -> std::result::Result<f64, String> {
    match (summary, aggregation) {
        (MetricSummary::Trend(t), Aggregation::Avg) => Ok(t.avg),
        (MetricSummary::Trend(t), Aggregation::Min) => Ok(t.min),
        (MetricSummary::Trend(t), Aggregation::Max) => Ok(t.max),
        (MetricSummary::Trend(t), Aggregation::Med) => Ok(t.med),
        (MetricSummary::Trend(t), Aggregation::Percentile(p)) => Ok(t.percentile(p)),
        (MetricSummary::Trend(t), Aggregation::Count) => Ok(t.count as f64),
        (MetricSummary::Rate(r), Aggregation::Rate) => Ok(r.rate),
        (MetricSummary::Rate(r), Aggregation::Count) => Ok(r.trues as f64),
        (MetricSummary::Counter { count }, Aggregation::Count) => Ok(*count as f64),
        (_, aggregation) => Err(format!("'{}' does not apply to this metric", aggregation)),
    }
}

/// Evaluate `(metric, expression)` pairs against a run summary.
///
/// A metric that recorded no samples passes: nothing was observed, so
/// nothing was violated.
pub fn evaluate_thresholds(summary: &RunSummary, expressions: &[(String, String)]) -> ThresholdReport {
    let mut results = Vec::with_capacity(expressions.len());

    for (metric, expression) in expressions {
        let result = match parse_threshold_expr(expression) {
            Err(e) => ThresholdResult {
                metric: metric.clone(),
                expression: expression.clone(),
                observed: None,
                passed: false,
                error: Some(e.to_string()),
            },
            Ok(expr) => evaluate_one(summary, metric, expression, &expr),
        };

        if result.passed {
            info!(
                metric = %result.metric,
                expression = %result.expression,
                observed = ?result.observed,
                "Threshold passed"
            );
        } else {
            warn!(
                metric = %result.metric,
                expression = %result.expression,
                observed = ?result.observed,
                error = ?result.error,
                "Threshold failed"
            );
        }
        results.push(result);
    }

    let passed = results.iter().all(|r| r.passed);
    ThresholdReport { results, passed }
}

fn evaluate_one(
    summary: &RunSummary,
    metric: &str,
    expression: &str,
    expr: &ThresholdExpr,
) -> ThresholdResult {
    let mut result = ThresholdResult {
        metric: metric.to_string(),
        expression: expression.to_string(),
        observed: None,
        passed: true,
        error: None,
    };

    let Some(metric_summary) = summary.metric(metric) else {
        result.passed = false;
        result.error = Some(format!("Unknown metric '{}'", metric));
        return result;
    };

    match observe(metric_summary, expr.aggregation) {
        Err(e) => {
            result.passed = false;
            result.error = Some(e);
        }
        Ok(_) if metric_summary.samples() == 0 => {}
        Ok(value) => {
            result.observed = Some(value);
            result.passed = expr.comparison.apply(value, expr.value);
        }
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recorder::RunMetrics;
    use crate::scenario::Scenario;
    use std::time::Duration;

    fn default_exprs() -> Vec<(String, String)> {
        vec![
            ("http_req_duration".to_string(), "p(95)<300".to_string()),
            ("http_req_failed".to_string(), "rate<0.001".to_string()),
            ("errors".to_string(), "rate<0.001".to_string()),
        ]
    }

    #[test]
    fn test_parse_expressions() {
        let expr = parse_threshold_expr("p(95)<300").unwrap();
        assert_eq!(expr.aggregation, Aggregation::Percentile(95.0));
        assert_eq!(expr.comparison, Comparison::Lt);
        assert_eq!(expr.value, 300.0);

        let expr = parse_threshold_expr("rate <= 0.01").unwrap();
        assert_eq!(expr.aggregation, Aggregation::Rate);
        assert_eq!(expr.comparison, Comparison::Le);

        let expr = parse_threshold_expr("p(99.9)>=1").unwrap();
        assert_eq!(expr.aggregation, Aggregation::Percentile(99.9));
        assert_eq!(expr.comparison, Comparison::Ge);

        assert_eq!(parse_threshold_expr("count!=0").unwrap().comparison, Comparison::Ne);
        assert_eq!(parse_threshold_expr("avg==5").unwrap().to_string(), "avg==5");
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(parse_threshold_expr("p(95)").is_err());
        assert!(parse_threshold_expr("p(101)<3").is_err());
        assert!(parse_threshold_expr("mean<3").is_err());
        assert!(parse_threshold_expr("rate<abc").is_err());
        assert!(parse_threshold_expr("rate<inf").is_err());
    }

    #[test]
    fn test_fast_clean_run_passes() {
        let metrics = RunMetrics::new();
        for ms in [20, 40, 60, 80, 100] {
            metrics.record_request(Scenario::GetStats, Duration::from_millis(ms), false);
            metrics.record_error(Scenario::GetStats, false);
        }

        let report = evaluate_thresholds(&metrics.summary(), &default_exprs());
        assert!(report.passed);
        assert_eq!(report.results.len(), 3);
        assert_eq!(report.failures().count(), 0);
    }

    #[test]
    fn test_slow_run_fails_latency_threshold() {
        let metrics = RunMetrics::new();
        for _ in 0..10 {
            metrics.record_request(Scenario::GetStats, Duration::from_millis(500), false);
        }

        let report = evaluate_thresholds(&metrics.summary(), &default_exprs());
        assert!(!report.passed);
        let failed: Vec<_> = report.failures().map(|r| r.metric.as_str()).collect();
        assert_eq!(failed, vec!["http_req_duration"]);
    }

    #[test]
    fn test_error_rate_threshold() {
        let metrics = RunMetrics::new();
        for i in 0..100 {
            metrics.record_error(Scenario::CreatePullRequest, i == 0);
        }

        let report = evaluate_thresholds(&metrics.summary(), &default_exprs());
        let errors = report.results.iter().find(|r| r.metric == "errors").unwrap();
        assert!(!errors.passed);
        assert_eq!(errors.observed, Some(0.01));
    }

    #[test]
    fn test_empty_metrics_pass() {
        let report = evaluate_thresholds(&RunMetrics::new().summary(), &default_exprs());
        assert!(report.passed);
        assert!(report.results.iter().all(|r| r.observed.is_none()));
    }

    #[test]
    fn test_unknown_metric_and_mismatched_aggregation_fail() {
        let summary = RunMetrics::new().summary();
        let report = evaluate_thresholds(
            &summary,
            &[
                ("nope".to_string(), "rate<1".to_string()),
                ("errors".to_string(), "p(95)<1".to_string()),
            ],
        );
        assert!(!report.passed);
        assert!(report.results.iter().all(|r| r.error.is_some()));
    }
}
