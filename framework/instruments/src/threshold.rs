use std::fmt::{Display, Formatter};

use surge_core::prelude::ConfigError;

use crate::statistics::{LabelStatistics, RunStatistics};

/// The metrics a threshold can be declared against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Metric {
    /// Rate of passing checks.
    Checks,
    /// Rate of failing checks.
    CheckFailed,
    /// Rate of failed invocations, a transport error or a status outside 200-399.
    OpFailed,
    /// Invocation latency in milliseconds.
    OpDuration,
    /// Number of invocations.
    Ops,
    /// Number of completed workflow iterations.
    Iterations,
}

impl Metric {
    fn parse(name: &str) -> Option<Self> {
        match name {
            "checks" => Some(Self::Checks),
            "check_failed" => Some(Self::CheckFailed),
            "op_failed" | "http_req_failed" => Some(Self::OpFailed),
            "op_duration" | "http_req_duration" => Some(Self::OpDuration),
            "ops" | "http_reqs" => Some(Self::Ops),
            "iterations" => Some(Self::Iterations),
            _ => None,
        }
    }

    fn accepts(&self, aggregation: Aggregation) -> bool {
        match self {
            Self::Checks | Self::CheckFailed | Self::OpFailed => aggregation == Aggregation::Rate,
            Self::Ops | Self::Iterations => aggregation == Aggregation::Count,
            Self::OpDuration => !matches!(aggregation, Aggregation::Rate | Aggregation::Count),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Aggregation {
    Rate,
    Count,
    Avg,
    Min,
    Max,
    Med,
    /// Percentile between 0 and 100.
    Percentile(f64),
}

impl Aggregation {
    fn parse(value: &str) -> Option<Self> {
        match value {
            "rate" => Some(Self::Rate),
            "count" => Some(Self::Count),
            "avg" => Some(Self::Avg),
            "min" => Some(Self::Min),
            "max" => Some(Self::Max),
            "med" => Some(Self::Med),
            other => {
                let p = other
                    .strip_prefix("p(")
                    .and_then(|rest| rest.strip_suffix(')'))?
                    .trim()
                    .parse::<f64>()
                    .ok()?;
                (p > 0.0 && p <= 100.0).then_some(Self::Percentile(p))
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Comparison {
    Lt,
    Le,
    Gt,
    Ge,
    Eq,
    Ne,
}

impl Comparison {
    /// Longer operators first so that `<=` is not read as `<`.
    const SYMBOLS: [(&'static str, Comparison); 6] = [
        ("<=", Comparison::Le),
        (">=", Comparison::Ge),
        ("==", Comparison::Eq),
        ("!=", Comparison::Ne),
        ("<", Comparison::Lt),
        (">", Comparison::Gt),
    ];

    pub fn holds(&self, observed: f64, limit: f64) -> bool {
        match self {
            Self::Lt => observed < limit,
            Self::Le => observed <= limit,
            Self::Gt => observed > limit,
            Self::Ge => observed >= limit,
            Self::Eq => observed == limit,
            Self::Ne => observed != limit,
        }
    }
}

/// What a threshold measures: a metric, how it is aggregated, and optionally which step label it
/// is restricted to.
#[derive(Debug, Clone, PartialEq)]
pub struct MetricSelector {
    pub metric: Metric,
    pub aggregation: Aggregation,
    pub label: Option<String>,
}

impl MetricSelector {
    /// Read the selected value from a statistics snapshot.
    ///
    /// Returns `None` when there is nothing to measure, for example a label that has not been
    /// observed or a latency percentile with no samples.
    pub fn resolve(&self, statistics: &RunStatistics) -> Option<f64> {
        let stats: &LabelStatistics = match &self.label {
            Some(label) => statistics.label(label)?,
            None => &statistics.overall,
        };

        match self.metric {
            Metric::Checks => stats.check_pass_rate(),
            Metric::CheckFailed => stats.check_failure_rate(),
            Metric::OpFailed => stats.operation_failure_rate(),
            Metric::Ops => Some(stats.operations as f64),
            Metric::Iterations => Some(statistics.iterations as f64),
            Metric::OpDuration => {
                let latency = &stats.latency;
                let value = match self.aggregation {
                    Aggregation::Avg => latency.mean(),
                    Aggregation::Min => latency.min(),
                    Aggregation::Max => latency.max(),
                    Aggregation::Med => latency.median(),
                    Aggregation::Percentile(p) => latency.percentile(p),
                    Aggregation::Rate | Aggregation::Count => None,
                }?;
                Some(value.as_secs_f64() * 1000.0)
            }
        }
    }
}

/// A pass/fail condition on the run's statistics, such as `http_req_duration: p(95)<500`.
#[derive(Debug, Clone, PartialEq)]
pub struct Threshold {
    metric_source: String,
    expression: String,
    pub selector: MetricSelector,
    pub comparison: Comparison,
    pub limit: f64,
    /// Stop the run as soon as a live evaluation finds this threshold violated.
    pub abort_on_fail: bool,
}

impl Threshold {
    /// Parse a threshold from a metric (optionally filtered, `op_duration{label:create}`) and an
    /// expression (`p(95)<500`).
    pub fn parse(metric: &str, expression: &str) -> Result<Self, ConfigError> {
        let source = format!("{metric}: {expression}");
        let invalid = |reason: &str| ConfigError::invalid_threshold(source.clone(), reason);

        let (metric_name, label) = parse_metric_source(metric).map_err(|r| invalid(&r))?;
        let metric_kind = Metric::parse(metric_name)
            .ok_or_else(|| invalid(&format!("unknown metric `{metric_name}`")))?;

        if label.is_some() && metric_kind == Metric::Iterations {
            return Err(invalid("iterations cannot be filtered by label"));
        }

        let (aggregation, comparison, limit) = Comparison::SYMBOLS
            .iter()
            .find_map(|(symbol, comparison)| {
                expression
                    .split_once(symbol)
                    .map(|(lhs, rhs)| (lhs.trim(), *comparison, rhs.trim()))
            })
            .ok_or_else(|| invalid("expected an expression like `p(95)<500`"))?;

        let aggregation = Aggregation::parse(aggregation)
            .ok_or_else(|| invalid(&format!("unknown aggregation `{aggregation}`")))?;
        if !metric_kind.accepts(aggregation) {
            return Err(invalid(&format!(
                "aggregation `{aggregation:?}` is not supported for this metric"
            )));
        }

        let limit = limit
            .parse::<f64>()
            .ok()
            .filter(|l| l.is_finite())
            .ok_or_else(|| invalid(&format!("`{limit}` is not a number")))?;

        Ok(Self {
            metric_source: metric.trim().to_string(),
            expression: expression.trim().to_string(),
            selector: MetricSelector {
                metric: metric_kind,
                aggregation,
                label,
            },
            comparison,
            limit,
            abort_on_fail: false,
        })
    }

    pub fn with_abort_on_fail(mut self, abort_on_fail: bool) -> Self {
        self.abort_on_fail = abort_on_fail;
        self
    }

    /// The metric as it was declared, including any label filter.
    pub fn metric_source(&self) -> &str {
        &self.metric_source
    }

    pub fn expression(&self) -> &str {
        &self.expression
    }
}

impl Display for Threshold {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.metric_source, self.expression)
    }
}

fn parse_metric_source(metric: &str) -> Result<(&str, Option<String>), String> {
    let metric = metric.trim();
    let Some((name, filter)) = metric.split_once('{') else {
        return Ok((metric, None));
    };

    let filter = filter
        .strip_suffix('}')
        .ok_or_else(|| "unterminated label filter".to_string())?;
    let (key, value) = filter
        .split_once(':')
        .ok_or_else(|| "label filter must look like `{label:name}`".to_string())?;

    if key.trim() != "label" {
        return Err(format!("unsupported filter `{}`", key.trim()));
    }
    let value = value.trim();
    if value.is_empty() {
        return Err("empty label in filter".to_string());
    }

    Ok((name.trim(), Some(value.to_string())))
}

#[derive(Debug, Clone, PartialEq)]
pub struct ThresholdViolation {
    pub threshold: Threshold,
    pub observed: f64,
}

/// The result of evaluating thresholds against a statistics snapshot.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Verdict {
    pub passed: bool,
    /// Thresholds that did not hold, in declaration order.
    pub violations: Vec<ThresholdViolation>,
    /// Thresholds with nothing to measure. They are not counted as violations.
    pub inconclusive: Vec<Threshold>,
}

impl Verdict {
    /// Whether any violated threshold asked for the run to be stopped.
    pub fn should_abort(&self) -> bool {
        self.violations.iter().any(|v| v.threshold.abort_on_fail)
    }
}

/// Evaluate `thresholds` against `statistics`.
///
/// Has no side effects, the same inputs always produce the same verdict.
pub fn evaluate(statistics: &RunStatistics, thresholds: &[Threshold]) -> Verdict {
    let mut violations = Vec::new();
    let mut inconclusive = Vec::new();

    for threshold in thresholds {
        match threshold.selector.resolve(statistics) {
            Some(observed) => {
                if !threshold.comparison.holds(observed, threshold.limit) {
                    violations.push(ThresholdViolation {
                        threshold: threshold.clone(),
                        observed,
                    });
                }
            }
            None => inconclusive.push(threshold.clone()),
        }
    }

    Verdict {
        passed: violations.is_empty(),
        violations,
        inconclusive,
    }
}
