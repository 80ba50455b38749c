use std::path::Path;
use std::time::Duration;

use serde::Deserialize;
use surge_core::prelude::{ConfigError, RampMode, Stage};
use surge_instruments::Threshold;

/// Overrides for a scenario's built in ramp and thresholds, loaded from a YAML file.
///
/// ```yaml
/// mode: linear
/// stages:
///   - duration: 20s
///     target: 5
///   - duration: 1m
///     target: 50
/// thresholds:
///   http_req_failed: rate<0.01
///   http_req_duration:
///     - p(95)<500
///     - threshold: p(99)<1500
///       abortOnFail: true
/// ```
///
/// Anything left out falls back to what the scenario defines.
#[derive(Debug, Default)]
pub struct Profile {
    pub mode: Option<RampMode>,
    pub stages: Option<Vec<Stage>>,
    /// In the order they were declared.
    pub thresholds: Option<Vec<Threshold>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct ProfileYaml {
    #[serde(default)]
    mode: Option<RampMode>,
    #[serde(default)]
    stages: Option<Vec<StageYaml>>,
    /// A mapping rather than a map type so that declaration order is kept.
    #[serde(default)]
    thresholds: Option<serde_yaml::Mapping>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct StageYaml {
    target: u32,
    #[serde(default)]
    duration: YamlDuration,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ThresholdExprYaml {
    One(ThresholdEntryYaml),
    Many(Vec<ThresholdEntryYaml>),
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ThresholdEntryYaml {
    Expression(String),
    Detailed(DetailedThresholdYaml),
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct DetailedThresholdYaml {
    threshold: String,
    #[serde(default)]
    abort_on_fail: bool,
}

#[derive(Debug, Clone, Copy, Default)]
struct YamlDuration(Duration);

impl<'de> Deserialize<'de> for YamlDuration {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        struct V;

        impl serde::de::Visitor<'_> for V {
            type Value = YamlDuration;

            fn expecting(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
                f.write_str("duration as string (e.g. 10s), integer seconds, or float seconds")
            }

            fn visit_u64<E>(self, v: u64) -> Result<Self::Value, E>
            where
                E: serde::de::Error,
            {
                Ok(YamlDuration(Duration::from_secs(v)))
            }

            fn visit_i64<E>(self, v: i64) -> Result<Self::Value, E>
            where
                E: serde::de::Error,
            {
                let secs =
                    u64::try_from(v).map_err(|_| E::custom("duration must not be negative"))?;
                Ok(YamlDuration(Duration::from_secs(secs)))
            }

            fn visit_f64<E>(self, v: f64) -> Result<Self::Value, E>
            where
                E: serde::de::Error,
            {
                if !v.is_finite() || v < 0.0 {
                    return Err(E::custom("duration must be a finite, non-negative number"));
                }
                Ok(YamlDuration(Duration::from_secs_f64(v)))
            }

            fn visit_str<E>(self, v: &str) -> Result<Self::Value, E>
            where
                E: serde::de::Error,
            {
                let d = humantime::parse_duration(v.trim()).map_err(E::custom)?;
                Ok(YamlDuration(d))
            }
        }

        deserializer.deserialize_any(V)
    }
}

pub fn load_profile(path: &Path) -> Result<Profile, ConfigError> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| ConfigError::Profile(format!("{}: {e}", path.display())))?;

    parse_profile(&content)
        .map_err(|e| ConfigError::Profile(format!("{}: {e}", path.display())))
}

/// Parse the YAML text of a profile. Errors are reported as a message to be wrapped with the
/// file's path.
fn parse_profile(content: &str) -> Result<Profile, String> {
    let raw: ProfileYaml = serde_yaml::from_str(content).map_err(|e| e.to_string())?;

    let thresholds = raw.thresholds.map(parse_thresholds).transpose()?;

    Ok(Profile {
        mode: raw.mode,
        stages: raw.stages.map(|stages| {
            stages
                .into_iter()
                .map(|s| Stage::new(s.target, s.duration.0))
                .collect()
        }),
        thresholds,
    })
}

fn parse_thresholds(mapping: serde_yaml::Mapping) -> Result<Vec<Threshold>, String> {
    let mut thresholds = Vec::new();

    for (key, value) in mapping {
        let metric = key
            .as_str()
            .ok_or_else(|| format!("threshold metric must be a string, got {key:?}"))?
            .to_string();

        let entries = match serde_yaml::from_value::<ThresholdExprYaml>(value)
            .map_err(|e| format!("thresholds for `{metric}`: {e}"))?
        {
            ThresholdExprYaml::One(entry) => vec![entry],
            ThresholdExprYaml::Many(entries) => entries,
        };

        for entry in entries {
            let (expression, abort_on_fail) = match entry {
                ThresholdEntryYaml::Expression(expression) => (expression, false),
                ThresholdEntryYaml::Detailed(detailed) => {
                    (detailed.threshold, detailed.abort_on_fail)
                }
            };

            let threshold = Threshold::parse(&metric, &expression)
                .map_err(|e| e.to_string())?
                .with_abort_on_fail(abort_on_fail);
            thresholds.push(threshold);
        }
    }

    Ok(thresholds)
}
