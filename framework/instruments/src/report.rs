mod summary_report;

use std::time::Duration;

use crate::statistics::RunStatistics;
use crate::threshold::Verdict;

pub use summary_report::SummaryReportCollector;

/// Receives the results of a run.
pub trait ReportCollector: Send + Sync {
    /// Called after each live threshold evaluation while the run is in progress.
    fn add_live_verdict(&self, _elapsed: Duration, _verdict: &Verdict) {}

    /// Called once when the run has drained, with the final statistics and verdict.
    fn finalize(&self, statistics: &RunStatistics, verdict: &Verdict);
}

/// Discards everything, useful for tests and when output is handled elsewhere.
#[derive(Debug, Default)]
pub struct NoopReportCollector;

impl ReportCollector for NoopReportCollector {
    fn finalize(&self, _statistics: &RunStatistics, _verdict: &Verdict) {}
}

/// Select which collectors a [Reporter] should forward to.
#[derive(Debug, Default)]
pub struct ReportConfig {
    summary: bool,
}

impl ReportConfig {
    /// Print summary tables at the end of the run.
    pub fn enable_summary(mut self) -> Self {
        self.summary = true;
        self
    }

    pub fn init(self) -> Reporter {
        let mut reporter = Reporter {
            collectors: Vec::new(),
        };
        if self.summary {
            reporter.add_collector(Box::new(SummaryReportCollector::new()));
        }

        reporter
    }
}

/// Fans results out to the configured collectors.
pub struct Reporter {
    collectors: Vec<Box<dyn ReportCollector>>,
}

impl Reporter {
    pub fn add_collector(&mut self, collector: Box<dyn ReportCollector>) {
        self.collectors.push(collector);
    }

    pub fn add_live_verdict(&self, elapsed: Duration, verdict: &Verdict) {
        for collector in &self.collectors {
            collector.add_live_verdict(elapsed, verdict);
        }
    }

    pub fn finalize(&self, statistics: &RunStatistics, verdict: &Verdict) {
        for collector in &self.collectors {
            collector.finalize(statistics, verdict);
        }
    }
}

impl std::fmt::Debug for Reporter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reporter")
            .field("collectors", &self.collectors.len())
            .finish()
    }
}
