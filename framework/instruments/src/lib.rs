mod aggregator;
mod report;
mod statistics;
mod threshold;

use std::time::{Duration, SystemTime};

use surge_core::prelude::InvokeResult;
use tokio::time::Instant;

pub use aggregator::Aggregator;
pub use report::{
    NoopReportCollector, ReportCollector, ReportConfig, Reporter, SummaryReportCollector,
};
pub use statistics::{CheckStatistics, LabelStatistics, LatencyDistribution, RunStatistics};
pub use threshold::{
    evaluate, Aggregation, Comparison, Metric, MetricSelector, Threshold, ThresholdViolation,
    Verdict,
};

/// Timing of one invocation of a workflow step.
#[derive(Debug, Clone)]
pub struct OperationRecord {
    pub label: String,
    started: Instant,
    elapsed: Option<Duration>,
    is_error: bool,
}

impl OperationRecord {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            started: Instant::now(),
            elapsed: None,
            is_error: false,
        }
    }

    /// Complete the record from the invocation's result.
    ///
    /// The invoker's own latency measurement is preferred when there is a response, otherwise the
    /// time since the record was created is used. Any invocation error or a non-success status
    /// marks the operation as failed.
    pub fn complete(&mut self, result: &InvokeResult) {
        match result {
            Ok(response) => {
                self.elapsed = Some(response.latency);
                self.is_error = !response.is_success();
            }
            Err(_) => {
                self.elapsed = Some(self.started.elapsed());
                self.is_error = true;
            }
        }
    }

    /// Build an already completed record, mostly useful for feeding an [Aggregator] directly.
    pub fn completed(label: impl Into<String>, elapsed: Duration, is_error: bool) -> Self {
        Self {
            label: label.into(),
            started: Instant::now(),
            elapsed: Some(elapsed),
            is_error,
        }
    }

    /// The measured duration, `None` until the record is completed.
    pub fn duration(&self) -> Option<Duration> {
        self.elapsed
    }

    pub fn is_error(&self) -> bool {
        self.is_error
    }
}

/// The result of evaluating one check of one workflow step.
///
/// Created once when the check is evaluated and never changed afterwards.
#[derive(Debug, Clone, PartialEq)]
pub struct OperationOutcome {
    pub label: String,
    pub check: String,
    pub passed: bool,
    /// The step was not invoked because an earlier step failed and was not allowed to continue.
    /// Skipped outcomes are always failures.
    pub skipped: bool,
    pub duration: Duration,
    pub timestamp: SystemTime,
}

impl OperationOutcome {
    pub fn new(
        label: impl Into<String>,
        check: impl Into<String>,
        passed: bool,
        duration: Duration,
    ) -> Self {
        Self {
            label: label.into(),
            check: check.into(),
            passed,
            skipped: false,
            duration,
            timestamp: SystemTime::now(),
        }
    }

    pub fn skipped(label: impl Into<String>, check: impl Into<String>) -> Self {
        Self {
            skipped: true,
            ..Self::new(label, check, false, Duration::ZERO)
        }
    }
}
