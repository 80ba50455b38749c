use std::path::PathBuf;

use clap::{Parser, ValueEnum};

#[derive(Parser, Clone, Debug)]
#[command(about, long_about = None)]
pub struct SurgeScenarioCli {
    /// The base URL of the service to test, for example `http://localhost:8080`.
    ///
    /// Paths in the workflow are joined onto this URL.
    #[clap(short, long, env = "SURGE_TARGET")]
    pub target: Option<String>,

    /// Extra header to send with every request, in the format `Name: value`.
    ///
    /// This is where credentials for the target go. For example `--header "Authorization: Bearer abc"`.
    /// You can specify multiple headers by using the flag multiple times.
    #[clap(long = "header", value_parser = parse_header)]
    pub headers: Vec<(String, String)>,

    /// A YAML profile file that overrides the stages, ramp mode and thresholds defined by the scenario.
    #[clap(long)]
    pub profile: Option<PathBuf>,

    /// How often the scheduler adjusts the number of running virtual users, in milliseconds.
    #[clap(long)]
    pub tick_ms: Option<u64>,

    /// How far the number of active virtual users may drift from the ramp before the scheduler acts.
    #[clap(long, default_value = "0")]
    pub tolerance: usize,

    /// The maximum number of virtual users this process may run at once.
    ///
    /// The run will fail to start if the ramp profile peaks above this value.
    #[clap(long)]
    pub max_vus: Option<u32>,

    /// Evaluate thresholds every this many seconds while the run is in progress.
    ///
    /// Thresholds marked `abortOnFail` will stop the run early when they are violated.
    #[clap(long)]
    pub live_thresholds_s: Option<u64>,

    /// Write a JSON summary of the run to this path when it completes.
    #[clap(long)]
    pub summary_path: Option<PathBuf>,

    /// Do not show a progress bar on the CLI.
    ///
    /// This is recommended for CI/CD environments where the progress bar isn't being looked at by anyone and is just adding noise to the logs.
    #[clap(long, default_value = "false")]
    pub no_progress: bool,

    /// The reporter to use for the end of run output.
    #[clap(long, value_enum, default_value_t = ReporterOpt::Summary)]
    pub reporter: ReporterOpt,

    /// Set the ID of this run, which is included in the summary.
    ///
    /// A random ID is generated if none is provided.
    #[clap(long)]
    pub run_id: Option<String>,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum)]
pub enum ReporterOpt {
    /// Print summary tables when the run finishes
    #[default]
    Summary,
    /// Discard the report, the verdict is still returned and written to the summary file
    Noop,
}

fn parse_header(s: &str) -> anyhow::Result<(String, String)> {
    let (name, value) = s
        .split_once(':')
        .ok_or(anyhow::anyhow!("Header must be in the format `Name: value`"))?;

    let name = name.trim();
    if name.is_empty() {
        anyhow::bail!("No name specified for header");
    }

    Ok((name.to_string(), value.trim().to_string()))
}
