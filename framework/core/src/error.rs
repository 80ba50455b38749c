/// Problems with a run's configuration.
///
/// These are the only errors that abort a run, and they are always raised during setup before
/// any virtual user starts.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("The ramp profile must contain at least one stage")]
    NoStages,
    #[error("The workflow must contain at least one step")]
    EmptyWorkflow,
    #[error("Workflow step {index} has an empty label")]
    EmptyStepLabel { index: usize },
    #[error("The scheduler tick interval must be greater than zero")]
    ZeroTickInterval,
    #[error("The ramp profile peaks at {peak} virtual users but at most {max_vus} are allowed")]
    PeakExceedsMaxVus { peak: u32, max_vus: u32 },
    #[error("Invalid threshold `{source_text}`: {reason}")]
    InvalidThreshold { source_text: String, reason: String },
    #[error("Failed to load profile: {0}")]
    Profile(String),
}

impl ConfigError {
    pub fn invalid_threshold(source_text: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidThreshold {
            source_text: source_text.into(),
            reason: reason.into(),
        }
    }
}
