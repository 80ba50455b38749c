use std::time::Duration;

use surge_core::prelude::{RampMode, RampProfile};
use surge_instruments::{LabelStatistics, RunStatistics, Threshold, Verdict};
use surge_summary_model::{
    LabelSummary, LatencySummary, RunSummary, StageSummary, ThresholdStatus, ThresholdSummary,
};

use crate::scheduler::SchedulerReport;

pub(crate) struct SummaryInput<'a> {
    pub run_id: &'a str,
    pub scenario_name: &'a str,
    pub started_at: i64,
    pub profile: &'a RampProfile,
    pub thresholds: &'a [Threshold],
    pub scheduler: &'a SchedulerReport,
    pub statistics: &'a RunStatistics,
    pub verdict: &'a Verdict,
}

pub(crate) fn build_run_summary(input: SummaryInput<'_>) -> RunSummary {
    let mut summary = RunSummary::new(
        input.run_id.to_string(),
        input.scenario_name.to_string(),
        input.started_at,
        env!("CARGO_PKG_VERSION").to_string(),
    );

    summary.ramp_mode = match input.profile.mode() {
        RampMode::Linear => "linear",
        RampMode::Step => "step",
    }
    .to_string();
    summary.stages = input
        .profile
        .stages()
        .iter()
        .map(|stage| StageSummary {
            target: stage.target,
            duration_ms: millis(stage.duration),
        })
        .collect();
    summary.peak_vus = input.profile.peak();

    summary.vus_started = input.scheduler.started;
    summary.spawn_failures = input.scheduler.spawn_failures;
    summary.interrupted = input.scheduler.interrupted;
    summary.elapsed_ms = millis(input.scheduler.elapsed);

    let statistics = input.statistics;
    summary.iterations = statistics.iterations;
    summary.total_checks = statistics.total_checks();
    summary.failed_checks = statistics.failed_checks();
    summary.error_rate = statistics.error_rate();
    summary.labels = statistics
        .per_label
        .iter()
        .map(|(label, stats)| (label.clone(), label_summary(stats)))
        .collect();

    summary.passed = input.verdict.passed;
    summary.thresholds = input
        .thresholds
        .iter()
        .map(|threshold| threshold_summary(threshold, input.verdict, statistics))
        .collect();

    if let Ok(level) = std::env::var("RUST_LOG") {
        summary.add_env("RUST_LOG".to_string(), level);
    }

    summary
}

fn label_summary(stats: &LabelStatistics) -> LabelSummary {
    let ms = |d: Option<Duration>| d.map(|d| d.as_secs_f64() * 1000.0);
    let latency = &stats.latency;

    LabelSummary {
        checks: stats.total_checks,
        failed_checks: stats.failed_checks,
        error_rate: stats.error_rate(),
        operations: stats.operations,
        failed_operations: stats.failed_operations,
        latency: LatencySummary {
            avg: ms(latency.mean()),
            min: ms(latency.min()),
            med: ms(latency.median()),
            p90: ms(latency.percentile(90.0)),
            p95: ms(latency.percentile(95.0)),
            p99: ms(latency.percentile(99.0)),
            max: ms(latency.max()),
        },
    }
}

fn threshold_summary(
    threshold: &Threshold,
    verdict: &Verdict,
    statistics: &RunStatistics,
) -> ThresholdSummary {
    let observed = threshold.selector.resolve(statistics);
    let status = if verdict.inconclusive.contains(threshold) {
        ThresholdStatus::Inconclusive
    } else if verdict
        .violations
        .iter()
        .any(|violation| &violation.threshold == threshold)
    {
        ThresholdStatus::Failed
    } else {
        ThresholdStatus::Passed
    };

    ThresholdSummary {
        threshold: threshold.to_string(),
        observed,
        status,
        abort_on_fail: threshold.abort_on_fail,
    }
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use surge_core::prelude::Stage;
    use surge_instruments::{evaluate, Aggregator, OperationOutcome, OperationRecord};

    #[test]
    fn summary_reflects_verdict() {
        let aggregator = Aggregator::new();
        for passed in [true, false] {
            let record = OperationRecord::completed("get", Duration::from_millis(20), !passed);
            let outcome =
                OperationOutcome::new("get", "get 200", passed, Duration::from_millis(20));
            aggregator.record_step(Some(&record), &[outcome]);
            aggregator.record_iteration();
        }
        let statistics = aggregator.snapshot();

        let thresholds = vec![
            Threshold::parse("check_failed", "rate<0.01").unwrap(),
            Threshold::parse("http_req_duration", "p(95)<500").unwrap(),
            Threshold::parse("op_duration{label:missing}", "avg<10").unwrap(),
        ];
        let verdict = evaluate(&statistics, &thresholds);
        let profile = RampProfile::linear(vec![Stage::new(1, Duration::from_secs(1))]).unwrap();
        let scheduler = SchedulerReport {
            started: 1,
            elapsed: Duration::from_millis(1_000),
            ..Default::default()
        };

        let summary = build_run_summary(SummaryInput {
            run_id: "run",
            scenario_name: "summary_test",
            started_at: 0,
            profile: &profile,
            thresholds: &thresholds,
            scheduler: &scheduler,
            statistics: &statistics,
            verdict: &verdict,
        });

        assert!(!summary.passed);
        assert_eq!(0.5, summary.error_rate);
        assert_eq!(1_000, summary.elapsed_ms);
        assert_eq!(
            vec![
                ThresholdStatus::Failed,
                ThresholdStatus::Passed,
                ThresholdStatus::Inconclusive
            ],
            summary
                .thresholds
                .iter()
                .map(|t| t.status)
                .collect::<Vec<_>>()
        );
        assert_eq!(2, summary.labels["get"].operations);
        assert!(summary.labels["get"].latency.p95.is_some());
    }
}
