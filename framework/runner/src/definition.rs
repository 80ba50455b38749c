use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use surge_core::prelude::{ConfigError, Invoker, RampMode, RampProfile, Stage, TargetConfig};
use surge_instruments::Threshold;

use crate::cli::{ReporterOpt, SurgeScenarioCli};
use crate::context::{RunnerContext, VuContext};
use crate::profile::load_profile;
use crate::scheduler::SchedulerConfig;
use crate::workflow::Workflow;

pub type HookResult = anyhow::Result<()>;

pub type GlobalHookMut = fn(&mut RunnerContext) -> HookResult;
pub type GlobalHook = fn(Arc<RunnerContext>) -> HookResult;
pub type VuHookMut = fn(&mut VuContext) -> HookResult;

/// Builds the [Invoker] once the target is known.
pub type InvokerFactory =
    Box<dyn FnOnce(&TargetConfig) -> anyhow::Result<Arc<dyn Invoker>> + Send>;

/// Bounds for the tick derived from the ramp when none is configured.
const MIN_TICK: Duration = Duration::from_millis(10);
const MAX_TICK: Duration = Duration::from_millis(100);

/// The builder for a scenario definition.
///
/// This must be used at the start of a test to define the scenario that you want to run.
pub struct ScenarioDefinitionBuilder {
    /// The name of the scenario, which should be unique within the test suite.
    ///
    /// Recommended value is `env!("CARGO_PKG_NAME")`.
    name: String,
    /// This value is initialised for you and you cannot change it.
    #[doc(hidden)]
    cli: SurgeScenarioCli,
    /// The ramp to use when no profile file is given on the command line.
    default_stages: Vec<Stage>,
    ramp_mode: RampMode,
    /// Thresholds to use when the profile file does not declare any, as `(metric, expression, abort_on_fail)`.
    default_thresholds: Vec<(String, String, bool)>,
    /// Derived from the ramp when not set, see [tick_for_profile].
    default_tick: Option<Duration>,
    default_request_timeout: Option<Duration>,
    /// The workflow every virtual user repeats.
    workflow: Option<Workflow>,
    invoker_factory: Option<InvokerFactory>,
    /// Global setup hook for this scenario. It will be run once, before any virtual users are started.
    setup_fn: Option<GlobalHookMut>,
    /// Setup hook for a virtual user, which will be run once for each virtual user as it starts.
    ///
    /// If this hook fails then the virtual user is not started, which counts as a spawn failure.
    setup_vu_fn: Option<VuHookMut>,
    /// Global teardown hook for this scenario. It will be run once, after all virtual users have
    /// stopped. This is best effort, an error is logged and does not fail the run.
    teardown_fn: Option<GlobalHook>,
}

pub struct ScenarioDefinition {
    pub name: String,
    pub profile: RampProfile,
    pub thresholds: Vec<Threshold>,
    pub workflow: Workflow,
    pub target: TargetConfig,
    pub scheduler: SchedulerConfig,
    pub live_thresholds: Option<Duration>,
    pub summary_path: Option<PathBuf>,
    pub no_progress: bool,
    pub reporter: ReporterOpt,
    pub run_id: String,
    pub invoker_factory: InvokerFactory,
    pub setup_fn: Option<GlobalHookMut>,
    pub setup_vu_fn: Option<VuHookMut>,
    pub teardown_fn: Option<GlobalHook>,
}

impl ScenarioDefinitionBuilder {
    /// Initialise a new scenario definition from the scenario name and command line arguments.
    /// See the [ScenarioDefinitionBuilder::name] for more information about the name.
    pub fn new(name: &str, cli: SurgeScenarioCli) -> Self {
        Self {
            name: name.to_string(),
            cli,
            default_stages: Vec::new(),
            ramp_mode: RampMode::default(),
            default_thresholds: Vec::new(),
            default_tick: None,
            default_request_timeout: None,
            workflow: None,
            invoker_factory: None,
            setup_fn: None,
            setup_vu_fn: None,
            teardown_fn: None,
        }
    }

    /// Initialise logging, parse the command line and create a new scenario definition.
    pub fn new_with_init(name: &str) -> Self {
        Self::new(name, crate::init::init())
    }

    /// The stages to ramp through, unless a profile file overrides them.
    pub fn with_default_stages(mut self, stages: Vec<Stage>) -> Self {
        self.default_stages = stages;
        self
    }

    pub fn with_ramp_mode(mut self, mode: RampMode) -> Self {
        self.ramp_mode = mode;
        self
    }

    /// Add a threshold such as `("http_req_duration", "p(95)<500")`, unless a profile file
    /// declares its own thresholds.
    pub fn with_default_threshold(mut self, metric: &str, expression: &str) -> Self {
        self.default_thresholds
            .push((metric.to_string(), expression.to_string(), false));
        self
    }

    /// Like [ScenarioDefinitionBuilder::with_default_threshold] but the run is stopped early if a
    /// live evaluation finds the threshold violated.
    pub fn with_default_abort_threshold(mut self, metric: &str, expression: &str) -> Self {
        self.default_thresholds
            .push((metric.to_string(), expression.to_string(), true));
        self
    }

    /// How often the scheduler adjusts the number of virtual users, unless `--tick-ms` is given.
    pub fn with_default_tick(mut self, tick: Duration) -> Self {
        self.default_tick = Some(tick);
        self
    }

    /// Passed to the invoker through [TargetConfig::timeout].
    pub fn with_default_request_timeout(mut self, timeout: Duration) -> Self {
        self.default_request_timeout = Some(timeout);
        self
    }

    pub fn use_workflow(mut self, workflow: Workflow) -> Self {
        self.workflow = Some(workflow);
        self
    }

    /// Set how the [Invoker] is created from the target configuration.
    pub fn use_invoker<I, F>(mut self, factory: F) -> Self
    where
        I: Invoker,
        F: FnOnce(&TargetConfig) -> anyhow::Result<I> + Send + 'static,
    {
        self.invoker_factory = Some(Box::new(move |target| {
            let invoker: Arc<dyn Invoker> = Arc::new(factory(target)?);
            Ok(invoker)
        }));
        self
    }

    /// Use an already constructed [Invoker], ignoring the target configuration.
    pub fn with_invoker(mut self, invoker: Arc<dyn Invoker>) -> Self {
        self.invoker_factory = Some(Box::new(move |_| Ok(invoker)));
        self
    }

    /// Set the global setup hook [ScenarioDefinitionBuilder::setup_fn] for this scenario.
    pub fn use_setup(mut self, setup_fn: GlobalHookMut) -> Self {
        self.setup_fn = Some(setup_fn);
        self
    }

    /// Set the virtual user setup hook [ScenarioDefinitionBuilder::setup_vu_fn] for this scenario.
    pub fn use_vu_setup(mut self, setup_vu_fn: VuHookMut) -> Self {
        self.setup_vu_fn = Some(setup_vu_fn);
        self
    }

    /// Set the global teardown hook [ScenarioDefinitionBuilder::teardown_fn] for this scenario.
    pub fn use_teardown(mut self, teardown_fn: GlobalHook) -> Self {
        self.teardown_fn = Some(teardown_fn);
        self
    }

    /// Validate the configuration, applying the command line and profile file on top of the
    /// defaults set on this builder.
    pub(crate) fn build(self) -> anyhow::Result<ScenarioDefinition> {
        let profile_file = self
            .cli
            .profile
            .as_deref()
            .map(load_profile)
            .transpose()?
            .unwrap_or_default();

        let profile = RampProfile::new(
            profile_file.stages.unwrap_or(self.default_stages),
            profile_file.mode.unwrap_or(self.ramp_mode),
        )?;

        if let Some(max_vus) = self.cli.max_vus {
            if profile.peak() > max_vus {
                return Err(ConfigError::PeakExceedsMaxVus {
                    peak: profile.peak(),
                    max_vus,
                }
                .into());
            }
        }

        let thresholds = match profile_file.thresholds {
            Some(thresholds) => thresholds,
            None => self
                .default_thresholds
                .iter()
                .map(|(metric, expression, abort_on_fail)| {
                    Threshold::parse(metric, expression)
                        .map(|t| t.with_abort_on_fail(*abort_on_fail))
                })
                .collect::<Result<Vec<_>, _>>()?,
        };

        let tick = self
            .cli
            .tick_ms
            .map(Duration::from_millis)
            .or(self.default_tick)
            .unwrap_or_else(|| tick_for_profile(&profile));
        if tick.is_zero() {
            return Err(ConfigError::ZeroTickInterval.into());
        }

        let workflow = self.workflow.ok_or(ConfigError::EmptyWorkflow)?;
        workflow.validate()?;

        let invoker_factory = self.invoker_factory.ok_or_else(|| {
            anyhow::anyhow!("No invoker configured for scenario {}", self.name)
        })?;

        Ok(ScenarioDefinition {
            name: self.name,
            profile,
            thresholds,
            workflow,
            target: TargetConfig {
                base_url: self.cli.target,
                headers: self.cli.headers,
                timeout: self.default_request_timeout,
            },
            scheduler: SchedulerConfig {
                tick,
                tolerance: self.cli.tolerance,
            },
            live_thresholds: self
                .cli
                .live_thresholds_s
                .filter(|s| *s > 0)
                .map(Duration::from_secs),
            summary_path: self.cli.summary_path,
            no_progress: self.cli.no_progress,
            reporter: self.cli.reporter,
            run_id: self.cli.run_id.unwrap_or_else(|| nanoid::nanoid!()),
            invoker_factory,
            setup_fn: self.setup_fn,
            setup_vu_fn: self.setup_vu_fn,
            teardown_fn: self.teardown_fn,
        })
    }
}

/// Tick at 1% of the shortest stage, so that short stages are still followed closely, kept
/// between [MIN_TICK] and [MAX_TICK].
fn tick_for_profile(profile: &RampProfile) -> Duration {
    profile
        .shortest_stage()
        .map(|shortest| (shortest / 100).clamp(MIN_TICK, MAX_TICK))
        .unwrap_or(MAX_TICK)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::WorkflowStep;
    use futures::future::BoxFuture;
    use futures::FutureExt;
    use std::io::Write;
    use surge_core::prelude::{InvokeResult, Operation, Response};

    struct OkInvoker;

    impl Invoker for OkInvoker {
        fn invoke(&self, _operation: Operation) -> BoxFuture<'_, InvokeResult> {
            async { Ok(Response::new(200, "", Duration::ZERO)) }.boxed()
        }
    }

    fn cli() -> SurgeScenarioCli {
        SurgeScenarioCli {
            target: Some("http://localhost:8080".to_string()),
            headers: vec![],
            profile: None,
            tick_ms: None,
            tolerance: 0,
            max_vus: None,
            live_thresholds_s: None,
            summary_path: None,
            no_progress: true,
            reporter: ReporterOpt::Noop,
            run_id: None,
        }
    }

    fn builder(cli: SurgeScenarioCli) -> ScenarioDefinitionBuilder {
        ScenarioDefinitionBuilder::new("definition_test", cli)
            .with_default_stages(vec![
                Stage::new(5, Duration::from_secs(10)),
                Stage::new(0, Duration::from_secs(5)),
            ])
            .with_default_threshold("http_req_failed", "rate<0.01")
            .use_workflow(
                Workflow::builder()
                    .step(WorkflowStep::get("list", "/users").expect_status(200))
                    .build(),
            )
            .use_invoker(|_| Ok(OkInvoker))
    }

    fn err_of(builder: ScenarioDefinitionBuilder) -> ConfigError {
        match builder.build() {
            Ok(_) => panic!("Expected the definition to be rejected"),
            Err(e) => e.downcast::<ConfigError>().unwrap(),
        }
    }

    #[test]
    fn build_with_defaults() {
        let definition = builder(cli()).build().unwrap();

        assert_eq!(5, definition.profile.peak());
        assert_eq!(Duration::from_secs(15), definition.profile.total_duration());
        assert_eq!(1, definition.thresholds.len());
        // 1% of the 5s stage.
        assert_eq!(Duration::from_millis(50), definition.scheduler.tick);
        assert_eq!(
            Some("http://localhost:8080".to_string()),
            definition.target.base_url
        );
        assert!(!definition.run_id.is_empty());
    }

    #[test]
    fn profile_file_overrides_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "mode: step\nstages:\n  - duration: 2s\n    target: 3\nthresholds:\n  http_req_duration: p(95)<500\n  checks: rate>0.99\n"
        )
        .unwrap();

        let mut cli = cli();
        cli.profile = Some(file.path().to_path_buf());
        let definition = builder(cli).build().unwrap();

        assert_eq!(RampMode::Step, definition.profile.mode());
        assert_eq!(3, definition.profile.peak());
        let thresholds = definition
            .thresholds
            .iter()
            .map(|t| t.to_string())
            .collect::<Vec<_>>();
        assert_eq!(
            vec!["http_req_duration: p(95)<500", "checks: rate>0.99"],
            thresholds
        );
    }

    #[test]
    fn peak_above_max_vus_is_rejected() {
        let mut cli = cli();
        cli.max_vus = Some(4);

        assert!(matches!(
            err_of(builder(cli)),
            ConfigError::PeakExceedsMaxVus {
                peak: 5,
                max_vus: 4
            }
        ));
    }

    #[test]
    fn zero_tick_is_rejected() {
        let mut cli = cli();
        cli.tick_ms = Some(0);

        assert!(matches!(
            err_of(builder(cli)),
            ConfigError::ZeroTickInterval
        ));
    }

    #[test]
    fn tick_follows_shortest_stage() {
        let profile = |stages| RampProfile::linear(stages).unwrap();

        assert_eq!(
            Duration::from_millis(20),
            tick_for_profile(&profile(vec![
                Stage::new(5, Duration::ZERO),
                Stage::new(5, Duration::from_secs(2)),
                Stage::new(0, Duration::from_secs(30)),
            ]))
        );
        assert_eq!(
            MIN_TICK,
            tick_for_profile(&profile(vec![Stage::new(1, Duration::from_millis(200))]))
        );
        assert_eq!(
            MAX_TICK,
            tick_for_profile(&profile(vec![Stage::new(1, Duration::from_secs(3_600))]))
        );
        assert_eq!(
            MAX_TICK,
            tick_for_profile(&profile(vec![Stage::new(1, Duration::ZERO)]))
        );
    }

    #[test]
    fn configured_tick_overrides_derived_tick() {
        let definition = builder(cli())
            .with_default_tick(Duration::from_millis(250))
            .build()
            .unwrap();
        assert_eq!(Duration::from_millis(250), definition.scheduler.tick);

        let mut cli = cli();
        cli.tick_ms = Some(30);
        let definition = builder(cli)
            .with_default_tick(Duration::from_millis(250))
            .build()
            .unwrap();
        assert_eq!(Duration::from_millis(30), definition.scheduler.tick);
    }

    #[test]
    fn ramp_mode_from_builder() {
        let definition = builder(cli())
            .with_ramp_mode(RampMode::Step)
            .build()
            .unwrap();

        assert_eq!(RampMode::Step, definition.profile.mode());
        assert_eq!(5.0, definition.profile.target_at(Duration::from_secs(1)));
    }

    #[test]
    fn empty_stages_are_rejected() {
        assert!(matches!(
            err_of(builder(cli()).with_default_stages(vec![])),
            ConfigError::NoStages
        ));
    }

    #[test]
    fn malformed_threshold_is_rejected() {
        assert!(matches!(
            err_of(builder(cli()).with_default_threshold("http_req_duration", "p95 < 500")),
            ConfigError::InvalidThreshold { .. }
        ));
    }

    #[test]
    fn empty_workflow_is_rejected() {
        assert!(matches!(
            err_of(builder(cli()).use_workflow(Workflow::builder().build())),
            ConfigError::EmptyWorkflow
        ));
    }

    #[test]
    fn missing_invoker_is_rejected() {
        let builder = ScenarioDefinitionBuilder::new("no_invoker", cli())
            .with_default_stages(vec![Stage::new(1, Duration::from_secs(1))])
            .use_workflow(
                Workflow::builder()
                    .step(WorkflowStep::get("list", "/users"))
                    .build(),
            );

        assert!(builder.build().is_err());
    }
}
