mod cli;
mod context;
mod definition;
mod executor;
mod init;
mod live;
mod monitor;
mod profile;
mod progress;
mod run;
mod scheduler;
mod shutdown;
mod summary;
mod types;
mod vu;
mod workflow;

pub mod prelude {
    pub use crate::cli::{ReporterOpt, SurgeScenarioCli};
    pub use crate::context::{RunnerContext, VuContext};
    pub use crate::definition::{HookResult, ScenarioDefinitionBuilder};
    pub use crate::executor::Executor;
    pub use crate::init::init;
    pub use crate::profile::{load_profile, Profile};
    pub use crate::run::{run, RunReport};
    pub use crate::scheduler::{
        ActiveVuGauge, Scheduler, SchedulerConfig, SchedulerReport, VuFactory,
    };
    pub use crate::shutdown::{DelegatedShutdownListener, ShutdownHandle, ShutdownSignalError};
    pub use crate::types::SurgeResult;
    pub use crate::vu::{VirtualUser, VuSummary};
    pub use crate::workflow::{Capture, Check, RequestTemplate, Vars, Workflow, WorkflowStep};

    pub use surge_core::prelude::{
        InvokeError, InvokeResult, Invoker, Operation, RampMode, Response, Stage, TargetConfig,
    };
    pub use surge_instruments::{RunStatistics, Threshold, Verdict};
}
