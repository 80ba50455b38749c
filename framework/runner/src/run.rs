use std::sync::Arc;

use anyhow::Context;
use surge_instruments::{evaluate, Aggregator, ReportConfig, RunStatistics, Verdict};
use surge_summary_model::{write_run_summary, RunSummary};

use crate::cli::ReporterOpt;
use crate::live::run_live_thresholds;
use crate::monitor::start_monitor;
use crate::progress::start_progress;
use crate::scheduler::{Scheduler, SchedulerReport, WorkflowVuFactory};
use crate::summary::{build_run_summary, SummaryInput};
use crate::{
    context::RunnerContext,
    definition::ScenarioDefinitionBuilder,
    executor::Executor,
    shutdown::{start_shutdown_listener, ShutdownHandle},
};

/// Everything a finished run produced.
#[derive(Debug)]
pub struct RunReport {
    pub verdict: Verdict,
    pub statistics: RunStatistics,
    pub scheduler: SchedulerReport,
    pub summary: RunSummary,
}

/// Run a scenario to completion.
///
/// Returns an error only if the scenario could not be started, for example because of invalid
/// configuration or a failing setup hook. Once virtual users have started, the run always
/// produces a [RunReport], threshold violations are reported through [RunReport::verdict].
pub fn run(definition: ScenarioDefinitionBuilder) -> anyhow::Result<RunReport> {
    let definition = definition.build()?;

    log::info!("Running scenario: {}", definition.name);

    let runtime = tokio::runtime::Runtime::new().context("Failed to create Tokio runtime")?;
    let shutdown_handle = start_shutdown_listener(&runtime)?;
    let executor = Arc::new(Executor::new(runtime, shutdown_handle.clone()));

    let report_config = match definition.reporter {
        ReporterOpt::Summary => ReportConfig::default().enable_summary(),
        ReporterOpt::Noop => ReportConfig::default(),
    };
    let reporter = Arc::new(report_config.init());

    let invoker =
        (definition.invoker_factory)(&definition.target).context("Failed to create invoker")?;

    let aggregator = Aggregator::new();
    let mut runner_context = RunnerContext::new(
        executor.clone(),
        reporter.clone(),
        shutdown_handle.clone(),
        definition.target.clone(),
        invoker,
        aggregator.clone(),
    );

    if let Some(setup_fn) = &definition.setup_fn {
        setup_fn(&mut runner_context)?;
    }

    let runner_context = Arc::new(runner_context);
    let started_at = chrono::Utc::now().timestamp();

    let factory = WorkflowVuFactory::new(
        runner_context.clone(),
        Arc::new(definition.workflow),
        definition.setup_vu_fn,
    );
    let scheduler = Scheduler::new(
        definition.profile.clone(),
        definition.scheduler.clone(),
        factory,
        shutdown_handle.new_listener(),
    );

    // Background helpers run until the scheduler has drained. They get their own signal so that
    // the run's shutdown handle stays untouched for the teardown hook.
    let helpers_handle = ShutdownHandle::new();

    if !definition.no_progress {
        if let Err(e) = start_progress(
            definition.profile.total_duration(),
            scheduler.gauge(),
            helpers_handle.new_listener(),
        ) {
            log::warn!("Failed to start the progress bar: {e:?}");
        }
    }

    // Report high usage by the load generator itself, which might lead to a misleading outcome.
    if let Err(e) = start_monitor(helpers_handle.new_listener()) {
        log::warn!("Failed to start the resource monitor: {e:?}");
    }

    if let Some(interval) = definition.live_thresholds {
        if !definition.thresholds.is_empty() {
            executor.spawn(run_live_thresholds(
                interval,
                definition.thresholds.clone(),
                aggregator.clone(),
                reporter.clone(),
                shutdown_handle.clone(),
                helpers_handle.new_listener(),
            ));
        }
    }

    let scheduler_report = executor.block_on(scheduler.run());
    helpers_handle.shutdown();

    if let Some(teardown_fn) = definition.teardown_fn {
        // Don't crash the runner if the teardown fails. We still want the reporting to happen
        // cleanly. The hook is documented as 'best effort'
        if let Err(e) = teardown_fn(runner_context.clone()) {
            log::error!("Teardown failed: {:?}", e);
        }
    }

    let statistics = aggregator.snapshot();
    let verdict = evaluate(&statistics, &definition.thresholds);
    for threshold in &verdict.inconclusive {
        log::warn!("Threshold `{threshold}` had nothing to measure and was not evaluated");
    }

    reporter.finalize(&statistics, &verdict);

    let summary = build_run_summary(SummaryInput {
        run_id: &definition.run_id,
        scenario_name: &definition.name,
        started_at,
        profile: &definition.profile,
        thresholds: &definition.thresholds,
        scheduler: &scheduler_report,
        statistics: &statistics,
        verdict: &verdict,
    });

    if let Some(path) = &definition.summary_path {
        match write_run_summary(&summary, path) {
            Ok(()) => log::info!("Wrote run summary to {}", path.display()),
            Err(e) => log::error!("Failed to write run summary to {}: {e:?}", path.display()),
        }
    }

    log::info!(
        "Scenario {} {} after {} iterations, p95 latency {:?}",
        definition.name,
        if verdict.passed { "passed" } else { "failed" },
        statistics.iterations,
        statistics.latency_percentile(95.0).unwrap_or_default()
    );

    Ok(RunReport {
        verdict,
        statistics,
        scheduler: scheduler_report,
        summary,
    })
}
