use itertools::Itertools;
use serde::{Deserialize, Serialize};
use sha3::Digest;
use std::collections::{BTreeMap, HashMap};
use std::io::{Read, Write};
use std::path::Path;

/// Summary of a run
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct RunSummary {
    /// The unique run id
    ///
    /// Chosen by the runner. Unique for each run.
    pub run_id: String,
    /// The name of the scenario that was run
    pub scenario_name: String,
    /// The time the run started
    ///
    /// This is a Unix timestamp in seconds.
    pub started_at: i64,
    /// How the target moved between stages, `linear` or `step`
    pub ramp_mode: String,
    /// The stages the run was configured with
    pub stages: Vec<StageSummary>,
    /// The highest target of any stage
    pub peak_vus: u32,
    /// The number of virtual users that were started over the whole run
    pub vus_started: usize,
    /// The number of attempts to start a virtual user that failed
    pub spawn_failures: usize,
    /// Whether the run was stopped before the ramp completed, by an operator or an
    /// `abortOnFail` threshold
    pub interrupted: bool,
    /// Wall clock time from the first tick to the last virtual user stopping, in milliseconds
    pub elapsed_ms: u64,
    /// Completed workflow iterations across all virtual users
    pub iterations: u64,
    pub total_checks: u64,
    pub failed_checks: u64,
    /// `failed_checks / total_checks`, 0 if no checks ran
    pub error_rate: f64,
    /// Breakdown by workflow step label
    pub labels: BTreeMap<String, LabelSummary>,
    /// Whether every conclusive threshold held
    pub passed: bool,
    /// Every threshold, in the order they were declared
    pub thresholds: Vec<ThresholdSummary>,
    /// Environment variables set for the run
    ///
    /// This won't capture all environment variables. Just the ones that the runner is aware of or
    /// that are included by the scenario itself.
    pub env: HashMap<String, String>,
    /// The version of Surge that was used for this run
    pub surge_version: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct StageSummary {
    pub target: u32,
    pub duration_ms: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct LabelSummary {
    pub checks: u64,
    pub failed_checks: u64,
    pub error_rate: f64,
    pub operations: u64,
    pub failed_operations: u64,
    pub latency: LatencySummary,
}

/// Latency of the operations for one label, in milliseconds. Empty when nothing was invoked.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct LatencySummary {
    pub avg: Option<f64>,
    pub min: Option<f64>,
    pub med: Option<f64>,
    pub p90: Option<f64>,
    pub p95: Option<f64>,
    pub p99: Option<f64>,
    pub max: Option<f64>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ThresholdStatus {
    Passed,
    Failed,
    /// Nothing was observed for the threshold's metric
    Inconclusive,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ThresholdSummary {
    /// The threshold as declared, such as `http_req_duration: p(95)<500`
    pub threshold: String,
    pub observed: Option<f64>,
    pub status: ThresholdStatus,
    pub abort_on_fail: bool,
}

impl RunSummary {
    /// Create a new run summary
    pub fn new(
        run_id: String,
        scenario_name: String,
        started_at: i64,
        surge_version: String,
    ) -> Self {
        Self {
            run_id,
            scenario_name,
            started_at,
            surge_version,
            ..Default::default()
        }
    }

    /// Add an environment variable
    pub fn add_env(&mut self, key: String, value: String) {
        self.env.insert(key, value);
    }

    /// Compute a fingerprint for this run summary
    ///
    /// The fingerprint is intended to uniquely identify the configuration used to run the scenario.
    /// It uses the
    ///     - Scenario name
    ///     - Ramp mode and stages
    ///     - Declared thresholds
    ///     - Selected environment variables
    ///     - Surge version
    ///
    /// The fingerprint is computed using [sha3::Sha3_256].
    pub fn fingerprint(&self) -> String {
        let mut hasher = sha3::Sha3_256::new();
        Digest::update(&mut hasher, self.scenario_name.as_bytes());
        Digest::update(&mut hasher, self.ramp_mode.as_bytes());
        self.stages.iter().for_each(|stage| {
            Digest::update(&mut hasher, stage.target.to_le_bytes());
            Digest::update(&mut hasher, stage.duration_ms.to_le_bytes());
        });
        self.thresholds
            .iter()
            .map(|t| (t.threshold.as_str(), t.abort_on_fail))
            .sorted()
            .for_each(|(threshold, abort_on_fail)| {
                Digest::update(&mut hasher, threshold.as_bytes());
                Digest::update(&mut hasher, [abort_on_fail as u8]);
            });
        self.env
            .iter()
            .sorted_by_key(|(k, _)| k.to_owned())
            .for_each(|(k, v)| {
                Digest::update(&mut hasher, k.as_bytes());
                Digest::update(&mut hasher, v.as_bytes());
            });
        Digest::update(&mut hasher, self.surge_version.as_bytes());

        format!("{:x}", hasher.finalize())
    }
}

/// Write the run summary to a file, replacing anything already there
///
/// The summary is written as pretty printed JSON.
pub fn write_run_summary(run_summary: &RunSummary, path: &Path) -> anyhow::Result<()> {
    let mut file = std::fs::File::create(path)?;
    serde_json::to_writer_pretty(&mut file, run_summary)?;
    file.write_all(b"\n")?;
    Ok(())
}

/// Serialize the run summary to a writer
pub fn store_run_summary<W: Write>(run_summary: &RunSummary, writer: &mut W) -> anyhow::Result<()> {
    serde_json::to_writer(writer, run_summary)?;
    Ok(())
}

/// Load a run summary from a reader
pub fn load_run_summary<R: Read>(reader: R) -> anyhow::Result<RunSummary> {
    let reader = std::io::BufReader::new(reader);
    let run_summary: RunSummary = serde_json::from_reader(reader)?;
    Ok(run_summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn summary() -> RunSummary {
        let mut summary = RunSummary::new(
            "run-1".to_string(),
            "user_crud".to_string(),
            1_700_000_000,
            "0.1.0".to_string(),
        );
        summary.ramp_mode = "linear".to_string();
        summary.stages = vec![
            StageSummary {
                target: 5,
                duration_ms: 20_000,
            },
            StageSummary {
                target: 0,
                duration_ms: 20_000,
            },
        ];
        summary.thresholds = vec![
            ThresholdSummary {
                threshold: "http_req_failed: rate<0.01".to_string(),
                observed: Some(0.0),
                status: ThresholdStatus::Passed,
                abort_on_fail: false,
            },
            ThresholdSummary {
                threshold: "http_req_duration: p(95)<500".to_string(),
                observed: None,
                status: ThresholdStatus::Inconclusive,
                abort_on_fail: false,
            },
        ];
        summary.labels.insert(
            "create".to_string(),
            LabelSummary {
                checks: 10,
                operations: 10,
                latency: LatencySummary {
                    avg: Some(12.5),
                    ..Default::default()
                },
                ..Default::default()
            },
        );
        summary
    }

    #[test]
    fn store_and_load() {
        let summary = summary();

        let mut buf = Vec::new();
        store_run_summary(&summary, &mut buf).unwrap();
        let loaded = load_run_summary(buf.as_slice()).unwrap();

        assert_eq!(summary, loaded);
    }

    #[test]
    fn fingerprint_ignores_results() {
        let a = summary();
        let mut b = summary();
        b.run_id = "run-2".to_string();
        b.iterations = 500;
        b.passed = true;
        b.thresholds.reverse();

        assert_eq!(a.fingerprint(), b.fingerprint());
    }

    #[test]
    fn fingerprint_changes_with_configuration() {
        let a = summary();
        let mut b = summary();
        b.stages[0].target = 6;
        let mut c = summary();
        c.add_env("BASE_URL".to_string(), "http://localhost:8080".to_string());

        assert_ne!(a.fingerprint(), b.fingerprint());
        assert_ne!(a.fingerprint(), c.fingerprint());
    }

    #[test]
    fn write_replaces_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("summary.json");

        let mut first = summary();
        first.run_id = "first".to_string();
        write_run_summary(&first, &path).unwrap();
        write_run_summary(&summary(), &path).unwrap();

        let loaded = load_run_summary(std::fs::File::open(&path).unwrap()).unwrap();
        assert_eq!(summary(), loaded);
    }

    #[test]
    fn threshold_status_is_lowercase() {
        let json = serde_json::to_string(&ThresholdStatus::Inconclusive).unwrap();
        assert_eq!("\"inconclusive\"", json);
    }
}
