use std::collections::BTreeMap;
use std::time::Duration;

use hdrhistogram::Histogram;

use crate::{OperationOutcome, OperationRecord};

/// Latencies are tracked in microseconds and saturate at one hour.
const HIGHEST_TRACKABLE_MICROS: u64 = 3_600_000_000;
const SIGNIFICANT_FIGURES: u8 = 3;

/// A streaming latency distribution.
///
/// Memory use is constant regardless of how many samples are recorded, any percentile can be
/// read at 3 significant figures of precision.
#[derive(Debug, Clone, PartialEq)]
pub struct LatencyDistribution {
    histogram: Histogram<u64>,
}

impl Default for LatencyDistribution {
    fn default() -> Self {
        Self {
            histogram: Histogram::new_with_bounds(1, HIGHEST_TRACKABLE_MICROS, SIGNIFICANT_FIGURES)
                .expect("Latency histogram bounds are valid"),
        }
    }
}

impl LatencyDistribution {
    pub fn record(&mut self, duration: Duration) {
        let micros = u64::try_from(duration.as_micros()).unwrap_or(u64::MAX);
        self.histogram.saturating_record(micros);
    }

    pub fn count(&self) -> u64 {
        self.histogram.len()
    }

    pub fn is_empty(&self) -> bool {
        self.histogram.is_empty()
    }

    /// The latency at percentile `p`, where `p` is between 0 and 100.
    pub fn percentile(&self, p: f64) -> Option<Duration> {
        if self.is_empty() {
            return None;
        }

        Some(Duration::from_micros(
            self.histogram.value_at_quantile(p / 100.0),
        ))
    }

    pub fn median(&self) -> Option<Duration> {
        self.percentile(50.0)
    }

    pub fn min(&self) -> Option<Duration> {
        (!self.is_empty()).then(|| Duration::from_micros(self.histogram.min()))
    }

    pub fn max(&self) -> Option<Duration> {
        (!self.is_empty()).then(|| Duration::from_micros(self.histogram.max()))
    }

    pub fn mean(&self) -> Option<Duration> {
        (!self.is_empty()).then(|| Duration::from_secs_f64(self.histogram.mean() / 1_000_000.0))
    }
}

/// Check and operation statistics for a group of steps, either a single label or the whole run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LabelStatistics {
    pub total_checks: u64,
    pub failed_checks: u64,
    /// Failed checks belonging to steps that were never invoked. Included in `failed_checks`.
    pub skipped_checks: u64,
    pub operations: u64,
    pub failed_operations: u64,
    pub latency: LatencyDistribution,
}

impl LabelStatistics {
    /// Fraction of checks that failed, 0 when no checks were recorded.
    pub fn error_rate(&self) -> f64 {
        ratio(self.failed_checks, self.total_checks).unwrap_or(0.0)
    }

    /// Fraction of checks that passed, `None` when no checks were recorded.
    pub fn check_pass_rate(&self) -> Option<f64> {
        ratio(self.total_checks - self.failed_checks, self.total_checks)
    }

    /// Fraction of checks that failed, `None` when no checks were recorded.
    pub fn check_failure_rate(&self) -> Option<f64> {
        ratio(self.failed_checks, self.total_checks)
    }

    /// Fraction of invocations that failed, `None` when nothing was invoked.
    pub fn operation_failure_rate(&self) -> Option<f64> {
        ratio(self.failed_operations, self.operations)
    }

    pub(crate) fn add_outcome(&mut self, outcome: &OperationOutcome) {
        self.total_checks += 1;
        if !outcome.passed {
            self.failed_checks += 1;
        }
        if outcome.skipped {
            self.skipped_checks += 1;
        }
    }

    pub(crate) fn add_operation(&mut self, record: &OperationRecord) {
        self.operations += 1;
        if record.is_error() {
            self.failed_operations += 1;
        }
        if let Some(duration) = record.duration() {
            self.latency.record(duration);
        }
    }
}

/// Pass and fail counts for a single named check.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CheckStatistics {
    pub passes: u64,
    pub fails: u64,
}

impl CheckStatistics {
    pub fn total(&self) -> u64 {
        self.passes + self.fails
    }
}

/// A view of everything recorded so far in a run.
///
/// Produced by [crate::Aggregator::snapshot]. It holds no wall clock state, so two snapshots
/// taken with no records in between compare equal.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunStatistics {
    pub iterations: u64,
    pub overall: LabelStatistics,
    pub per_label: BTreeMap<String, LabelStatistics>,
    pub per_check: BTreeMap<String, CheckStatistics>,
}

impl RunStatistics {
    pub fn total_checks(&self) -> u64 {
        self.overall.total_checks
    }

    pub fn failed_checks(&self) -> u64 {
        self.overall.failed_checks
    }

    /// `failed_checks / total_checks` across the whole run.
    pub fn error_rate(&self) -> f64 {
        self.overall.error_rate()
    }

    /// The latency at percentile `p` across every operation in the run.
    pub fn latency_percentile(&self, p: f64) -> Option<Duration> {
        self.overall.latency.percentile(p)
    }

    pub fn label(&self, label: &str) -> Option<&LabelStatistics> {
        self.per_label.get(label)
    }

    pub(crate) fn add_outcome(&mut self, outcome: &OperationOutcome) {
        self.overall.add_outcome(outcome);
        self.per_label
            .entry(outcome.label.clone())
            .or_default()
            .add_outcome(outcome);

        let check = self.per_check.entry(outcome.check.clone()).or_default();
        if outcome.passed {
            check.passes += 1;
        } else {
            check.fails += 1;
        }
    }

    pub(crate) fn add_operation(&mut self, record: &OperationRecord) {
        self.overall.add_operation(record);
        self.per_label
            .entry(record.label.clone())
            .or_default()
            .add_operation(record);
    }
}

fn ratio(numerator: u64, denominator: u64) -> Option<f64> {
    (denominator > 0).then(|| numerator as f64 / denominator as f64)
}
