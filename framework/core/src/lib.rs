mod error;
mod invoke;
mod shutdown;
mod stage;
mod stop;
mod target;

pub mod prelude {
    pub use crate::error::ConfigError;
    pub use crate::invoke::{InvokeError, InvokeResult, Invoker, Operation, Response};
    pub use crate::shutdown::{DelegatedShutdownListener, ShutdownHandle, ShutdownSignalError};
    pub use crate::stage::{RampMode, RampProfile, Stage};
    pub use crate::stop::{vu_stop_signal, VuStopHandle, VuStopListener};
    pub use crate::target::TargetConfig;
}
