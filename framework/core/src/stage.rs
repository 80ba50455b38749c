use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// One segment of a ramp profile.
///
/// The number of running virtual users moves from the level reached by the previous stage (or 0
/// for the first stage) to `target` over `duration`. A zero duration is an instantaneous jump.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stage {
    pub target: u32,
    pub duration: Duration,
}

impl Stage {
    pub fn new(target: u32, duration: Duration) -> Self {
        Self { target, duration }
    }
}

/// How the target moves between stage boundaries.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RampMode {
    /// Interpolate linearly from the previous level to the stage target.
    #[default]
    Linear,
    /// Jump to the stage target at the start of the stage and hold it.
    Step,
}

/// An ordered, validated list of stages.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RampProfile {
    stages: Vec<Stage>,
    mode: RampMode,
}

impl RampProfile {
    pub fn new(stages: Vec<Stage>, mode: RampMode) -> Result<Self, ConfigError> {
        if stages.is_empty() {
            return Err(ConfigError::NoStages);
        }

        Ok(Self { stages, mode })
    }

    pub fn linear(stages: Vec<Stage>) -> Result<Self, ConfigError> {
        Self::new(stages, RampMode::Linear)
    }

    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    pub fn mode(&self) -> RampMode {
        self.mode
    }

    /// Sum of all stage durations, the planned length of the run.
    pub fn total_duration(&self) -> Duration {
        self.stages.iter().map(|s| s.duration).sum()
    }

    /// The highest target anywhere on the trajectory.
    pub fn peak(&self) -> u32 {
        self.stages.iter().map(|s| s.target).max().unwrap_or(0)
    }

    pub fn final_target(&self) -> u32 {
        self.stages.last().map(|s| s.target).unwrap_or(0)
    }

    /// The shortest stage that actually spans time, if any.
    pub fn shortest_stage(&self) -> Option<Duration> {
        self.stages
            .iter()
            .map(|s| s.duration)
            .filter(|d| !d.is_zero())
            .min()
    }

    /// The interpolated target concurrency `elapsed` into the run.
    ///
    /// Past the end of the profile this is the final stage's target.
    pub fn target_at(&self, elapsed: Duration) -> f64 {
        let mut level = 0.0;
        let mut stage_start = Duration::ZERO;

        for stage in &self.stages {
            let stage_end = stage_start + stage.duration;
            if elapsed < stage_end {
                return match self.mode {
                    RampMode::Step => stage.target as f64,
                    RampMode::Linear => {
                        let progress = (elapsed - stage_start).as_secs_f64()
                            / stage.duration.as_secs_f64();
                        level + (stage.target as f64 - level) * progress
                    }
                };
            }

            level = stage.target as f64;
            stage_start = stage_end;
        }

        level
    }

    /// [RampProfile::target_at] rounded to a whole number of virtual users.
    pub fn desired_at(&self, elapsed: Duration) -> usize {
        self.target_at(elapsed).round() as usize
    }
}
