use std::sync::Arc;

use surge_core::prelude::{Invoker, TargetConfig};
use surge_instruments::{Aggregator, Reporter};

use crate::executor::Executor;
use crate::shutdown::{DelegatedShutdownListener, ShutdownHandle};
use crate::workflow::Vars;

/// State shared by the whole run.
///
/// Mutable during the global setup hook, after which it is shared read-only with every virtual user.
pub struct RunnerContext {
    executor: Arc<Executor>,
    reporter: Arc<Reporter>,
    shutdown_handle: ShutdownHandle,
    target: TargetConfig,
    invoker: Arc<dyn Invoker>,
    aggregator: Aggregator,
    vars: Vars,
}

impl RunnerContext {
    pub(crate) fn new(
        executor: Arc<Executor>,
        reporter: Arc<Reporter>,
        shutdown_handle: ShutdownHandle,
        target: TargetConfig,
        invoker: Arc<dyn Invoker>,
        aggregator: Aggregator,
    ) -> Self {
        Self {
            executor,
            reporter,
            shutdown_handle,
            target,
            invoker,
            aggregator,
            vars: Vars::new(),
        }
    }

    pub fn executor(&self) -> &Arc<Executor> {
        &self.executor
    }

    pub fn reporter(&self) -> Arc<Reporter> {
        self.reporter.clone()
    }

    pub fn target(&self) -> &TargetConfig {
        &self.target
    }

    /// The invoker that virtual users send their requests through. Setup hooks may use it to
    /// prepare the target before load starts.
    pub fn invoker(&self) -> &Arc<dyn Invoker> {
        &self.invoker
    }

    pub fn aggregator(&self) -> &Aggregator {
        &self.aggregator
    }

    /// Variables seeded into every iteration of every virtual user.
    pub fn vars(&self) -> &Vars {
        &self.vars
    }

    pub fn vars_mut(&mut self) -> &mut Vars {
        &mut self.vars
    }

    pub fn shutdown_listener(&self) -> DelegatedShutdownListener {
        self.shutdown_handle.new_listener()
    }

    /// Stop the ramp and drain all virtual users, as if the operator had pressed Ctrl-C.
    pub fn force_stop_scenario(&self) {
        self.shutdown_handle.shutdown();
    }
}

impl std::fmt::Debug for RunnerContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunnerContext")
            .field("target", &self.target)
            .field("vars", &self.vars)
            .finish_non_exhaustive()
    }
}

/// State for a single virtual user, available to the virtual user setup hook.
#[derive(Debug)]
pub struct VuContext {
    vu_id: String,
    runner_context: Arc<RunnerContext>,
    vars: Vars,
}

impl VuContext {
    pub(crate) fn new(vu_id: String, runner_context: Arc<RunnerContext>) -> Self {
        let vars = runner_context.vars().clone();
        Self {
            vu_id,
            runner_context,
            vars,
        }
    }

    /// A value which is unique within this run, like `vu-3`.
    pub fn vu_id(&self) -> &str {
        &self.vu_id
    }

    pub fn runner_context(&self) -> &Arc<RunnerContext> {
        &self.runner_context
    }

    /// Variables seeded into every iteration of this virtual user. Starts as a copy of the
    /// [RunnerContext::vars].
    pub fn vars(&self) -> &Vars {
        &self.vars
    }

    pub fn vars_mut(&mut self) -> &mut Vars {
        &mut self.vars
    }

    pub(crate) fn into_vars(self) -> Vars {
        self.vars
    }
}
