use std::sync::Arc;
use std::time::Duration;

use surge_instruments::{evaluate, Aggregator, Reporter, Threshold};
use tokio::time::{Instant, MissedTickBehavior};

use crate::shutdown::{DelegatedShutdownListener, ShutdownHandle};

/// Periodically evaluate thresholds while the run is in progress.
///
/// Violations are logged and passed to the reporter. If a violated threshold is marked
/// `abort_on_fail` the run is shut down, which drains the virtual users the same way as Ctrl-C.
pub(crate) async fn run_live_thresholds(
    interval: Duration,
    thresholds: Vec<Threshold>,
    aggregator: Aggregator,
    reporter: Arc<Reporter>,
    shutdown_handle: ShutdownHandle,
    mut shutdown_listener: DelegatedShutdownListener,
) {
    let start = Instant::now();
    let mut ticker = tokio::time::interval_at(start + interval, interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = shutdown_listener.wait_for_shutdown() => break,
        }

        let verdict = evaluate(&aggregator.snapshot(), &thresholds);
        reporter.add_live_verdict(start.elapsed(), &verdict);

        for violation in &verdict.violations {
            log::warn!(
                "Threshold `{}` is failing, observed {:.3}",
                violation.threshold,
                violation.observed
            );
        }

        if verdict.should_abort() {
            log::error!("A threshold marked abortOnFail was violated, stopping the run");
            shutdown_handle.shutdown();
            break;
        }
    }
}
