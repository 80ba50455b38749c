use std::sync::Arc;

use parking_lot::Mutex;

use crate::statistics::RunStatistics;
use crate::{OperationOutcome, OperationRecord};

/// Shared sink for everything the virtual users observe.
///
/// Clones share the same state. Every append takes one short lock and updates running statistics
/// in place, outcomes are not retained. Appends from different virtual users may interleave in
/// any order.
#[derive(Debug, Clone, Default)]
pub struct Aggregator {
    inner: Arc<Mutex<RunStatistics>>,
}

impl Aggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a single check outcome.
    pub fn record(&self, outcome: &OperationOutcome) {
        self.inner.lock().add_outcome(outcome);
    }

    /// Record everything a single workflow step produced in one go, so that no snapshot can see
    /// part of a step.
    ///
    /// `record` is `None` for a step that was skipped rather than invoked.
    pub fn record_step(&self, record: Option<&OperationRecord>, outcomes: &[OperationOutcome]) {
        let mut state = self.inner.lock();
        if let Some(record) = record {
            state.add_operation(record);
        }
        for outcome in outcomes {
            state.add_outcome(outcome);
        }
    }

    /// Count one completed workflow iteration.
    pub fn record_iteration(&self) {
        self.inner.lock().iterations += 1;
    }

    /// A consistent copy of the statistics so far.
    pub fn snapshot(&self) -> RunStatistics {
        self.inner.lock().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::time::Duration;

    fn step(aggregator: &Aggregator, label: &str, check: &str, passed: bool, ms: u64) {
        let record = OperationRecord::completed(label, Duration::from_millis(ms), !passed);
        let outcome = OperationOutcome::new(label, check, passed, Duration::from_millis(ms));
        aggregator.record_step(Some(&record), &[outcome]);
    }

    #[test]
    fn per_label_breakdown() {
        let aggregator = Aggregator::new();
        for _ in 0..4 {
            step(&aggregator, "create", "create 201", true, 10);
            step(&aggregator, "get", "get 200", false, 20);
            aggregator.record_iteration();
        }

        let stats = aggregator.snapshot();
        assert_eq!(4, stats.iterations);
        assert_eq!(8, stats.total_checks());
        assert_eq!(4, stats.failed_checks());
        assert_eq!(0.5, stats.error_rate());

        let create = stats.label("create").unwrap();
        assert_eq!(0.0, create.error_rate());
        assert_eq!(4, create.operations);

        let get = stats.label("get").unwrap();
        assert_eq!(1.0, get.error_rate());
        assert_eq!(4, get.failed_operations);

        assert_eq!(4, stats.per_check["get 200"].fails);
        assert_eq!(4, stats.per_check["create 201"].passes);
    }

    #[test]
    fn snapshot_is_idempotent() {
        let aggregator = Aggregator::new();
        step(&aggregator, "create", "create 201", true, 5);
        step(&aggregator, "list", "list 200", true, 7);

        assert_eq!(aggregator.snapshot(), aggregator.snapshot());
    }

    #[test]
    fn skipped_steps_have_no_latency() {
        let aggregator = Aggregator::new();
        aggregator.record_step(None, &[OperationOutcome::skipped("delete", "delete 204")]);

        let stats = aggregator.snapshot();
        let delete = stats.label("delete").unwrap();
        assert_eq!(1, delete.failed_checks);
        assert_eq!(1, delete.skipped_checks);
        assert_eq!(0, delete.operations);
        assert!(delete.latency.is_empty());
    }

    #[test]
    fn concurrent_appends_are_all_counted() {
        let aggregator = Aggregator::new();

        let handles = (0..8)
            .map(|_| {
                let aggregator = aggregator.clone();
                std::thread::spawn(move || {
                    for _ in 0..500 {
                        aggregator.record(&OperationOutcome::new(
                            "create",
                            "create 201",
                            true,
                            Duration::from_millis(1),
                        ));
                    }
                })
            })
            .collect::<Vec<_>>();

        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(4000, aggregator.snapshot().total_checks());
    }
}
