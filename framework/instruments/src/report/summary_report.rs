mod operations_table;

use std::time::Duration;

use parking_lot::Mutex;
use tabled::settings::Style;
use tabled::Table;

use crate::report::summary_report::operations_table::{
    CheckRow, LiveViolationRow, OperationRow, ThresholdRow,
};
use crate::report::ReportCollector;
use crate::statistics::{LabelStatistics, RunStatistics};
use crate::threshold::Verdict;

/// Prints per-label operation timings, check results and threshold results at the end of a run.
///
/// Live threshold evaluations made during the run are summarised too, with the first time each
/// threshold was seen to be violated.
#[derive(Debug, Default)]
pub struct SummaryReportCollector {
    live: Mutex<LiveHistory>,
}

#[derive(Debug, Default)]
pub(crate) struct LiveHistory {
    evaluations: usize,
    /// In the order they were first violated.
    first_violations: Vec<(String, Duration)>,
}

impl LiveHistory {
    fn add(&mut self, elapsed: Duration, verdict: &Verdict) {
        self.evaluations += 1;
        for violation in &verdict.violations {
            let threshold = violation.threshold.to_string();
            if !self.first_violations.iter().any(|(t, _)| *t == threshold) {
                self.first_violations.push((threshold, elapsed));
            }
        }
    }
}

impl SummaryReportCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn render(
        statistics: &RunStatistics,
        verdict: &Verdict,
        live: &LiveHistory,
    ) -> String {
        let mut out = String::new();

        out.push_str("\nSummary of operations\n");
        let mut rows = statistics
            .per_label
            .iter()
            .map(|(label, stats)| operation_row(label, stats))
            .collect::<Vec<_>>();
        rows.push(operation_row("(all)", &statistics.overall));
        let mut table = Table::new(rows);
        table.with(Style::modern());
        out.push_str(&table.to_string());

        out.push_str("\n\nChecks\n");
        let rows = statistics
            .per_check
            .iter()
            .map(|(check, stats)| CheckRow {
                check: check.clone(),
                passes: stats.passes,
                fails: stats.fails,
                pass_rate: if stats.total() == 0 {
                    0.0
                } else {
                    stats.passes as f64 / stats.total() as f64
                },
            })
            .collect::<Vec<_>>();
        let mut table = Table::new(rows);
        table.with(Style::modern());
        out.push_str(&table.to_string());

        out.push_str(&format!(
            "\n\nIterations: {}, checks: {}, error rate: {:.2}%\n",
            statistics.iterations,
            statistics.total_checks(),
            statistics.error_rate() * 100.0
        ));

        let mut rows = verdict
            .violations
            .iter()
            .map(|v| ThresholdRow {
                threshold: v.threshold.to_string(),
                observed: format!("{:.4}", v.observed),
                result: "FAILED",
            })
            .collect::<Vec<_>>();
        rows.extend(verdict.inconclusive.iter().map(|t| ThresholdRow {
            threshold: t.to_string(),
            observed: "-".to_string(),
            result: "inconclusive",
        }));
        if !rows.is_empty() {
            out.push_str("\nThresholds needing attention\n");
            let mut table = Table::new(rows);
            table.with(Style::modern());
            out.push_str(&table.to_string());
            out.push('\n');
        }

        if live.evaluations > 0 {
            out.push_str(&format!(
                "\nLive threshold evaluations: {}\n",
                live.evaluations
            ));
            if !live.first_violations.is_empty() {
                let rows = live
                    .first_violations
                    .iter()
                    .map(|(threshold, elapsed)| LiveViolationRow {
                        threshold: threshold.clone(),
                        first_violated_s: elapsed.as_secs_f64(),
                    })
                    .collect::<Vec<_>>();
                let mut table = Table::new(rows);
                table.with(Style::modern());
                out.push_str(&table.to_string());
                out.push('\n');
            }
        }

        out.push_str(if verdict.passed {
            "\nResult: PASSED\n"
        } else {
            "\nResult: FAILED\n"
        });

        out
    }
}

impl ReportCollector for SummaryReportCollector {
    fn add_live_verdict(&self, elapsed: Duration, verdict: &Verdict) {
        self.live.lock().add(elapsed, verdict);
    }

    fn finalize(&self, statistics: &RunStatistics, verdict: &Verdict) {
        println!("{}", Self::render(statistics, verdict, &self.live.lock()));
    }
}

fn operation_row(label: &str, stats: &LabelStatistics) -> OperationRow {
    let ms = |d: Option<Duration>| d.map(|d| d.as_secs_f64() * 1000.0).unwrap_or(0.0);

    OperationRow {
        label: label.to_string(),
        operations: stats.operations,
        failed: stats.operation_failure_rate().unwrap_or(0.0),
        avg_time_ms: ms(stats.latency.mean()),
        min_time_ms: ms(stats.latency.min()),
        med_time_ms: ms(stats.latency.median()),
        p90_time_ms: ms(stats.latency.percentile(90.0)),
        p95_time_ms: ms(stats.latency.percentile(95.0)),
        max_time_ms: ms(stats.latency.max()),
    }
}
