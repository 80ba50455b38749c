use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use futures::future::BoxFuture;
use futures::FutureExt;
use surge_core::prelude::{
    vu_stop_signal, DelegatedShutdownListener, RampProfile, VuStopHandle, VuStopListener,
};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

use crate::context::{RunnerContext, VuContext};
use crate::definition::VuHookMut;
use crate::vu::{VirtualUser, VuSummary};
use crate::workflow::Workflow;

/// How long to wait on a draining virtual user before logging that it is still busy.
const DRAIN_WARNING_INTERVAL: Duration = Duration::from_secs(10);

/// Starts one virtual user.
///
/// The returned task must resolve once the virtual user has seen its stop signal and finished
/// its current iteration.
pub trait VuFactory: Send + Sync {
    fn start(
        &self,
        vu_id: usize,
        stop: VuStopListener,
    ) -> BoxFuture<'_, anyhow::Result<JoinHandle<VuSummary>>>;
}

/// Starts virtual users that run a [Workflow], after the optional virtual user setup hook.
pub(crate) struct WorkflowVuFactory {
    runner_context: Arc<RunnerContext>,
    workflow: Arc<Workflow>,
    setup_vu_fn: Option<VuHookMut>,
}

impl WorkflowVuFactory {
    pub(crate) fn new(
        runner_context: Arc<RunnerContext>,
        workflow: Arc<Workflow>,
        setup_vu_fn: Option<VuHookMut>,
    ) -> Self {
        Self {
            runner_context,
            workflow,
            setup_vu_fn,
        }
    }
}

impl VuFactory for WorkflowVuFactory {
    fn start(
        &self,
        vu_id: usize,
        stop: VuStopListener,
    ) -> BoxFuture<'_, anyhow::Result<JoinHandle<VuSummary>>> {
        async move {
            let name = format!("vu-{vu_id}");
            let mut context = VuContext::new(name.clone(), self.runner_context.clone());

            if let Some(setup_vu_fn) = self.setup_vu_fn {
                // Hooks are synchronous and may block on the executor, so keep them off the
                // scheduler's thread.
                context = tokio::task::spawn_blocking(move || {
                    setup_vu_fn(&mut context).map(|_| context)
                })
                .await
                .context("Virtual user setup panicked")?
                .with_context(|| format!("Virtual user setup failed for {name}"))?;
            }

            let vu = VirtualUser::new(
                name,
                self.workflow.clone(),
                self.runner_context.invoker().clone(),
                self.runner_context.aggregator().clone(),
                stop,
            )
            .with_vars(context.into_vars());

            Ok(tokio::spawn(vu.run()))
        }
        .boxed()
    }
}

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// How often the number of virtual users is adjusted.
    pub tick: Duration,
    /// Allowed difference between the active and desired number of virtual users before acting.
    pub tolerance: usize,
}

/// Live counts of virtual users, safe to read from any thread while the scheduler runs.
#[derive(Debug, Clone, Default)]
pub struct ActiveVuGauge {
    active: Arc<AtomicUsize>,
    draining: Arc<AtomicUsize>,
}

impl ActiveVuGauge {
    /// Virtual users which are running and have not been asked to stop.
    pub fn active(&self) -> usize {
        self.active.load(Ordering::Acquire)
    }

    /// Virtual users which have been asked to stop and are finishing their iteration.
    pub fn draining(&self) -> usize {
        self.draining.load(Ordering::Acquire)
    }

    fn set(&self, active: usize, draining: usize) {
        self.active.store(active, Ordering::Release);
        self.draining.store(draining, Ordering::Release);
    }
}

/// What the scheduler did over the course of a run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SchedulerReport {
    /// Virtual users successfully started.
    pub started: usize,
    /// Attempts to start a virtual user that failed.
    pub spawn_failures: usize,
    /// The most virtual users active at once.
    pub peak_active: usize,
    /// Iterations completed by every virtual user.
    pub total_iterations: u64,
    pub elapsed: Duration,
    /// Whether the run was stopped by the shutdown signal before the ramp completed.
    pub interrupted: bool,
}

struct RunningVu {
    id: usize,
    stop: VuStopHandle,
    handle: JoinHandle<VuSummary>,
}

/// Adjusts the number of running virtual users to follow a [RampProfile].
///
/// Every tick the scheduler compares the active count with the profile's target at that moment.
/// When they differ by more than the tolerance, new virtual users are started or the most
/// recently started ones are asked to stop. Virtual users that have been asked to stop still
/// count towards the profile's peak until they have finished, so no more than the peak ever run
/// at once. If the target rises again before they finish, they are resumed instead of starting
/// new ones.
pub struct Scheduler<F: VuFactory> {
    profile: RampProfile,
    config: SchedulerConfig,
    factory: F,
    shutdown_listener: DelegatedShutdownListener,
    gauge: ActiveVuGauge,
    next_id: usize,
    active: Vec<RunningVu>,
    draining: Vec<RunningVu>,
    report: SchedulerReport,
}

impl<F: VuFactory> Scheduler<F> {
    pub fn new(
        profile: RampProfile,
        config: SchedulerConfig,
        factory: F,
        shutdown_listener: DelegatedShutdownListener,
    ) -> Self {
        Self {
            profile,
            config,
            factory,
            shutdown_listener,
            gauge: ActiveVuGauge::default(),
            next_id: 0,
            active: Vec::new(),
            draining: Vec::new(),
            report: SchedulerReport::default(),
        }
    }

    pub fn gauge(&self) -> ActiveVuGauge {
        self.gauge.clone()
    }

    /// Follow the profile until it ends or shutdown is signalled, then stop every virtual user and
    /// wait for them to finish.
    pub async fn run(mut self) -> SchedulerReport {
        let start = Instant::now();
        let total_duration = self.profile.total_duration();

        let mut interval = tokio::time::interval(self.config.tick);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = interval.tick() => {}
                _ = self.shutdown_listener.wait_for_shutdown() => {
                    log::info!("Shutdown requested, stopping the ramp");
                    self.report.interrupted = true;
                    break;
                }
            }

            let elapsed = start.elapsed();
            if elapsed >= total_duration {
                break;
            }

            self.reap().await;
            let desired = self.profile.desired_at(elapsed);
            self.adjust(desired).await;
        }

        if !self.report.interrupted && self.profile.final_target() != 0 {
            log::warn!(
                "The ramp profile ends at {} virtual users, stopping them because the run is over",
                self.profile.final_target()
            );
        }

        self.drain().await;
        self.report.elapsed = start.elapsed();

        log::info!(
            "Scheduler finished after {:?}: {} virtual users started, {} failed to start, peak of {} active",
            self.report.elapsed,
            self.report.started,
            self.report.spawn_failures,
            self.report.peak_active
        );

        self.report
    }

    async fn adjust(&mut self, desired: usize) {
        let active = self.active.len();

        if active + self.config.tolerance < desired {
            let mut wanted = desired - active;

            // Virtual users still finishing their last iteration already count toward the
            // ceiling, so put them back to work before starting new ones.
            let revived = wanted.min(self.draining.len());
            if revived > 0 {
                log::trace!("Reviving {revived} draining virtual users");
                let from = self.draining.len() - revived;
                for vu in self.draining.drain(from..) {
                    vu.stop.resume();
                    self.active.push(vu);
                }
                // Retirement takes the most recently started, keep them last.
                self.active.sort_by_key(|vu| vu.id);
                wanted -= revived;
            }

            let ceiling = self.profile.peak() as usize;
            let room = ceiling.saturating_sub(self.active.len() + self.draining.len());
            if room < wanted {
                log::trace!(
                    "Want {wanted} more virtual users but {} are still draining",
                    self.draining.len()
                );
            }

            for _ in 0..wanted.min(room) {
                if !self.start_one().await {
                    // Try again on the next tick rather than hammering a failing factory.
                    break;
                }
            }
        } else if active > desired + self.config.tolerance {
            log::trace!("Retiring {} virtual users", active - desired);
            for vu in self.active.drain(desired..).rev() {
                vu.stop.stop();
                self.draining.push(vu);
            }
        }

        self.report.peak_active = self.report.peak_active.max(self.active.len());
        self.gauge.set(self.active.len(), self.draining.len());
    }

    async fn start_one(&mut self) -> bool {
        let id = self.next_id;
        self.next_id += 1;

        let (stop, listener) = vu_stop_signal();
        match self.factory.start(id, listener).await {
            Ok(handle) => {
                self.report.started += 1;
                self.active.push(RunningVu { id, stop, handle });
                true
            }
            Err(e) => {
                log::error!("Failed to start virtual user {id}: {e:?}");
                self.report.spawn_failures += 1;
                false
            }
        }
    }

    /// Collect virtual users which have finished, whether they were retired or ended on their own.
    async fn reap(&mut self) {
        let (finished, active): (Vec<_>, Vec<_>) = std::mem::take(&mut self.active)
            .into_iter()
            .partition(|vu| vu.handle.is_finished());
        self.active = active;

        let (drained, draining): (Vec<_>, Vec<_>) = std::mem::take(&mut self.draining)
            .into_iter()
            .partition(|vu| vu.handle.is_finished());
        self.draining = draining;

        for vu in finished.into_iter().chain(drained) {
            self.collect(vu).await;
        }

        self.gauge.set(self.active.len(), self.draining.len());
    }

    async fn drain(&mut self) {
        for vu in self.active.drain(..) {
            vu.stop.stop();
            self.draining.push(vu);
        }
        self.gauge.set(0, self.draining.len());

        while let Some(mut vu) = self.draining.pop() {
            loop {
                match tokio::time::timeout(DRAIN_WARNING_INTERVAL, &mut vu.handle).await {
                    Ok(result) => {
                        self.record_summary(vu.id, result);
                        break;
                    }
                    Err(_) => {
                        log::warn!(
                            "Still waiting for virtual user {} to finish its iteration",
                            vu.id
                        );
                    }
                }
            }
            self.gauge.set(0, self.draining.len());
        }
    }

    async fn collect(&mut self, vu: RunningVu) {
        let result = vu.handle.await;
        self.record_summary(vu.id, result);
    }

    fn record_summary(&mut self, id: usize, result: Result<VuSummary, tokio::task::JoinError>) {
        match result {
            Ok(summary) => {
                log::debug!(
                    "Virtual user {} finished after {} iterations",
                    summary.id,
                    summary.iterations
                );
                self.report.total_iterations += summary.iterations;
            }
            Err(e) => {
                log::error!("Virtual user {id} did not finish cleanly: {e:?}");
            }
        }
    }
}
