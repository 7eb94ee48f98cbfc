//! capgrid.toml configuration parser.
//!
//! Every tunable of the control loop comes from this file. Controller gains
//! (`kp`, `ki`) and the API endpoint have no defaults: a config without them
//! fails to load and the daemon exits before entering the loop.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Deserializer};
use thiserror::Error;

use crate::types::NodeSpec;

/// Errors raised while loading or validating the configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid value for `{field}`: {reason}")]
    Invalid { field: &'static str, reason: String },
}

fn invalid(field: &'static str, reason: impl Into<String>) -> ConfigError {
    ConfigError::Invalid {
        field,
        reason: reason.into(),
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CapgridConfig {
    pub control: ControlConfig,
    #[serde(default)]
    pub scaling: ScalingConfig,
    #[serde(default)]
    pub cycle: CycleConfig,
    #[serde(default)]
    pub dispatch: DispatchConfig,
    pub api: ApiConfig,
    #[serde(default)]
    pub export: ExportConfig,
    /// Static node inventory, in dispatch priority order.
    #[serde(default)]
    pub nodes: Vec<NodeSpec>,
}

/// Per-node admission controller tunables.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ControlConfig {
    /// Operating point (percent CPU) for both the PI controllers and the
    /// global scaling policy.
    #[serde(default = "default_target_utilization")]
    pub target_utilization: f64,
    /// Acceptable utilization band `(low, high)`.
    #[serde(default = "default_utilization_band")]
    pub utilization_band: (f64, f64),
    #[serde(default)]
    pub min_pods: u32,
    #[serde(default = "default_max_pods")]
    pub max_pods: u32,
    pub kp: f64,
    pub ki: f64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ScalingConfig {
    /// Scale-down fires below `downscale_threshold * target_utilization`.
    #[serde(default = "default_downscale_threshold")]
    pub downscale_threshold: f64,
    /// Consecutive low-utilization cycles required before a removal.
    #[serde(default = "default_downscale_cycles")]
    pub downscale_cycles: u32,
    #[serde(default = "default_cooldown", deserialize_with = "de_duration")]
    pub add_cooldown: Duration,
    #[serde(default = "default_cooldown", deserialize_with = "de_duration")]
    pub remove_cooldown: Duration,
    #[serde(default = "default_cooldown", deserialize_with = "de_duration")]
    pub failure_cooldown: Duration,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CycleConfig {
    #[serde(default = "default_poll_interval", deserialize_with = "de_duration")]
    pub poll_interval: Duration,
    /// Attempts for membership queries before a cycle is abandoned.
    #[serde(default = "default_retry_attempts")]
    pub retry_attempts: u32,
    #[serde(default = "default_retry_backoff", deserialize_with = "de_duration")]
    pub retry_backoff: Duration,
    /// Attempts per node for a utilization sample before the controller holds.
    #[serde(default = "default_metrics_retry_attempts")]
    pub metrics_retry_attempts: u32,
    #[serde(default = "default_metrics_retry_backoff", deserialize_with = "de_duration")]
    pub metrics_retry_backoff: Duration,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DispatchConfig {
    #[serde(default = "default_jobs_file")]
    pub jobs_file: PathBuf,
    #[serde(default = "default_namespace")]
    pub namespace: String,
    #[serde(default = "default_image")]
    pub image: String,
    /// Minimum time between two successful dispatches.
    #[serde(default = "default_poll_interval", deserialize_with = "de_duration")]
    pub min_interval: Duration,
    #[serde(default = "default_ready_timeout", deserialize_with = "de_duration")]
    pub ready_timeout: Duration,
    #[serde(default = "default_ready_poll", deserialize_with = "de_duration")]
    pub ready_poll: Duration,
    /// Seconds a finished job object is kept before the cluster reaps it.
    #[serde(default = "default_ttl_after_finished")]
    pub ttl_after_finished: u32,
}

/// Connection to the orchestration API server.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ApiConfig {
    pub server: String,
    /// Bearer token, inline.
    pub token: Option<String>,
    /// Bearer token read from a file (e.g. a service account token).
    pub token_file: Option<PathBuf>,
    #[serde(default)]
    pub insecure: bool,
    #[serde(default = "default_request_timeout", deserialize_with = "de_duration")]
    pub request_timeout: Duration,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ExportConfig {
    /// Directory receiving the CSV time series.
    #[serde(default = "default_export_dir")]
    pub dir: PathBuf,
}

impl Default for ScalingConfig {
    fn default() -> Self {
        Self {
            downscale_threshold: default_downscale_threshold(),
            downscale_cycles: default_downscale_cycles(),
            add_cooldown: default_cooldown(),
            remove_cooldown: default_cooldown(),
            failure_cooldown: default_cooldown(),
        }
    }
}

impl Default for CycleConfig {
    fn default() -> Self {
        Self {
            poll_interval: default_poll_interval(),
            retry_attempts: default_retry_attempts(),
            retry_backoff: default_retry_backoff(),
            metrics_retry_attempts: default_metrics_retry_attempts(),
            metrics_retry_backoff: default_metrics_retry_backoff(),
        }
    }
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            jobs_file: default_jobs_file(),
            namespace: default_namespace(),
            image: default_image(),
            min_interval: default_poll_interval(),
            ready_timeout: default_ready_timeout(),
            ready_poll: default_ready_poll(),
            ttl_after_finished: default_ttl_after_finished(),
        }
    }
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            dir: default_export_dir(),
        }
    }
}

fn default_target_utilization() -> f64 {
    80.0
}
fn default_utilization_band() -> (f64, f64) {
    (75.0, 85.0)
}
fn default_max_pods() -> u32 {
    8
}
fn default_downscale_threshold() -> f64 {
    0.2
}
fn default_downscale_cycles() -> u32 {
    4
}
fn default_cooldown() -> Duration {
    Duration::from_secs(60)
}
fn default_poll_interval() -> Duration {
    Duration::from_secs(15)
}
fn default_retry_attempts() -> u32 {
    5
}
fn default_retry_backoff() -> Duration {
    Duration::from_secs(5)
}
fn default_metrics_retry_attempts() -> u32 {
    2
}
fn default_metrics_retry_backoff() -> Duration {
    Duration::from_secs(1)
}
fn default_jobs_file() -> PathBuf {
    PathBuf::from("static/jobs.txt")
}
fn default_namespace() -> String {
    "jobs".to_string()
}
fn default_image() -> String {
    "polinux/stress-ng".to_string()
}
fn default_ready_timeout() -> Duration {
    Duration::from_secs(60)
}
fn default_ready_poll() -> Duration {
    Duration::from_secs(2)
}
fn default_ttl_after_finished() -> u32 {
    30
}
fn default_request_timeout() -> Duration {
    Duration::from_secs(10)
}
fn default_export_dir() -> PathBuf {
    PathBuf::from("data")
}

impl CapgridConfig {
    /// Read, parse and validate a config file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&content)
    }

    /// Parse and validate a config document.
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let config: CapgridConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Check cross-field invariants that serde cannot express.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let c = &self.control;
        if !c.target_utilization.is_finite() || c.target_utilization <= 0.0 {
            return Err(invalid("control.target_utilization", "must be a positive number"));
        }
        if !c.kp.is_finite() || !c.ki.is_finite() {
            return Err(invalid("control.kp", "gains must be finite"));
        }
        let (low, high) = c.utilization_band;
        if low > high {
            return Err(invalid(
                "control.utilization_band",
                format!("low bound {low} exceeds high bound {high}"),
            ));
        }
        if c.min_pods > c.max_pods {
            return Err(invalid(
                "control.min_pods",
                format!("{} exceeds max_pods {}", c.min_pods, c.max_pods),
            ));
        }

        let s = &self.scaling;
        if !(s.downscale_threshold > 0.0 && s.downscale_threshold <= 1.0) {
            return Err(invalid("scaling.downscale_threshold", "must be in (0, 1]"));
        }
        if s.downscale_cycles == 0 {
            return Err(invalid("scaling.downscale_cycles", "must be at least 1"));
        }

        if self.cycle.retry_attempts == 0 {
            return Err(invalid("cycle.retry_attempts", "must be at least 1"));
        }
        if self.cycle.metrics_retry_attempts == 0 {
            return Err(invalid("cycle.metrics_retry_attempts", "must be at least 1"));
        }
        if self.cycle.poll_interval.is_zero() {
            return Err(invalid("cycle.poll_interval", "must be non-zero"));
        }

        if self.dispatch.namespace.is_empty() {
            return Err(invalid("dispatch.namespace", "must not be empty"));
        }
        if self.dispatch.ready_poll.is_zero() {
            return Err(invalid("dispatch.ready_poll", "must be non-zero"));
        }

        if self.api.server.is_empty() {
            return Err(invalid("api.server", "must not be empty"));
        }

        if self.nodes.is_empty() {
            return Err(invalid("nodes", "inventory must list at least one node"));
        }
        let mut seen = HashSet::new();
        for node in &self.nodes {
            if !seen.insert(node.name.as_str()) {
                return Err(invalid("nodes", format!("duplicate node name {}", node.name)));
            }
        }

        Ok(())
    }
}

/// Parse a duration string like `"500ms"`, `"30s"`, `"5m"`, `"1h"`, `"2d"`
/// or a bare number of seconds.
pub fn parse_duration(s: &str) -> Result<Duration, String> {
    let s = s.trim();
    let (digits, unit_secs, millis) = if let Some(ms) = s.strip_suffix("ms") {
        (ms, 0, true)
    } else if let Some(secs) = s.strip_suffix('s') {
        (secs, 1, false)
    } else if let Some(mins) = s.strip_suffix('m') {
        (mins, 60, false)
    } else if let Some(hours) = s.strip_suffix('h') {
        (hours, 3600, false)
    } else if let Some(days) = s.strip_suffix('d') {
        (days, 86_400, false)
    } else {
        (s, 1, false)
    };

    let value = digits
        .trim()
        .parse::<u64>()
        .map_err(|_| format!("invalid duration: {s:?}"))?;

    if millis {
        Ok(Duration::from_millis(value))
    } else {
        value
            .checked_mul(unit_secs)
            .map(Duration::from_secs)
            .ok_or_else(|| format!("duration out of range: {s:?}"))
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawDuration {
    Secs(u64),
    Text(String),
}

fn de_duration<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    match RawDuration::deserialize(deserializer)? {
        RawDuration::Secs(secs) => Ok(Duration::from_secs(secs)),
        RawDuration::Text(s) => parse_duration(&s).map_err(serde::de::Error::custom),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::NodeRole;

    const MINIMAL: &str = r#"
[control]
kp = 0.094
ki = 0.006

[api]
server = "https://127.0.0.1:6443"

[[nodes]]
name = "node0"
address = "10.0.0.1"
role = "master"
node_type = "worker0"
"#;

    #[test]
    fn parse_minimal_uses_defaults() {
        let config = CapgridConfig::parse(MINIMAL).unwrap();
        assert_eq!(config.control.target_utilization, 80.0);
        assert_eq!(config.control.utilization_band, (75.0, 85.0));
        assert_eq!(config.control.min_pods, 0);
        assert_eq!(config.control.max_pods, 8);
        assert_eq!(config.scaling.downscale_cycles, 4);
        assert_eq!(config.scaling.add_cooldown, Duration::from_secs(60));
        assert_eq!(config.cycle.poll_interval, Duration::from_secs(15));
        assert_eq!(config.cycle.retry_attempts, 5);
        assert_eq!(config.cycle.metrics_retry_attempts, 2);
        assert_eq!(config.dispatch.min_interval, Duration::from_secs(15));
        assert_eq!(config.dispatch.namespace, "jobs");
        assert_eq!(config.nodes.len(), 1);
        assert_eq!(config.nodes[0].labels.role, NodeRole::Master);
    }

    #[test]
    fn parse_full() {
        let toml_str = r#"
[control]
target_utilization = 70.0
utilization_band = [65.0, 75.0]
min_pods = 1
max_pods = 6
kp = 0.2
ki = 0.01

[scaling]
downscale_threshold = 0.25
downscale_cycles = 3
add_cooldown = "2m"
remove_cooldown = 45
failure_cooldown = "30s"

[cycle]
poll_interval = "10s"
retry_attempts = 3
retry_backoff = "500ms"

[dispatch]
jobs_file = "jobs.txt"
namespace = "batch"
min_interval = "20s"

[api]
server = "https://10.0.0.1:6443"
token = "abc"
insecure = true

[export]
dir = "/tmp/out"

[[nodes]]
name = "node0"
address = "10.0.0.1"
role = "master"
node_type = "worker0"

[[nodes]]
name = "node1"
address = "10.0.0.2"
role = "worker"
node_type = "worker1"
"#;
        let config = CapgridConfig::parse(toml_str).unwrap();
        assert_eq!(config.control.utilization_band, (65.0, 75.0));
        assert_eq!(config.scaling.add_cooldown, Duration::from_secs(120));
        assert_eq!(config.scaling.remove_cooldown, Duration::from_secs(45));
        assert_eq!(config.cycle.retry_backoff, Duration::from_millis(500));
        assert_eq!(config.dispatch.namespace, "batch");
        assert!(config.api.insecure);
        assert_eq!(config.export.dir, PathBuf::from("/tmp/out"));
        assert_eq!(config.nodes[1].labels.node_type, "worker1");
    }

    #[test]
    fn missing_gain_is_an_error() {
        let toml_str = MINIMAL.replace("ki = 0.006\n", "");
        let err = CapgridConfig::parse(&toml_str).unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
        assert!(err.to_string().contains("ki"));
    }

    #[test]
    fn missing_api_is_an_error() {
        let toml_str = MINIMAL.replace("[api]\nserver = \"https://127.0.0.1:6443\"\n", "");
        assert!(matches!(
            CapgridConfig::parse(&toml_str),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn inverted_band_rejected() {
        let toml_str = MINIMAL.replace(
            "[control]\n",
            "[control]\nutilization_band = [90.0, 10.0]\n",
        );
        let err = CapgridConfig::parse(&toml_str).unwrap_err();
        assert!(matches!(
            err,
            ConfigError::Invalid { field: "control.utilization_band", .. }
        ));
    }

    #[test]
    fn min_pods_above_max_rejected() {
        let toml_str = MINIMAL.replace("[control]\n", "[control]\nmin_pods = 9\n");
        let err = CapgridConfig::parse(&toml_str).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { field: "control.min_pods", .. }));
    }

    #[test]
    fn duplicate_nodes_rejected() {
        let toml_str = format!(
            "{MINIMAL}\n[[nodes]]\nname = \"node0\"\naddress = \"10.0.0.9\"\nrole = \"worker\"\nnode_type = \"worker9\"\n"
        );
        let err = CapgridConfig::parse(&toml_str).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { field: "nodes", .. }));
    }

    #[test]
    fn zero_downscale_cycles_rejected() {
        let toml_str = format!("{MINIMAL}\n[scaling]\ndownscale_cycles = 0\n");
        let err = CapgridConfig::parse(&toml_str).unwrap_err();
        assert!(matches!(
            err,
            ConfigError::Invalid { field: "scaling.downscale_cycles", .. }
        ));
    }

    #[test]
    fn from_file_reads_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("capgrid.toml");
        std::fs::write(&path, MINIMAL).unwrap();
        let config = CapgridConfig::from_file(&path).unwrap();
        assert_eq!(config.nodes[0].name, "node0");

        let missing = CapgridConfig::from_file(&dir.path().join("nope.toml")).unwrap_err();
        assert!(matches!(missing, ConfigError::Read { .. }));
    }

    #[test]
    fn parse_duration_values() {
        assert_eq!(parse_duration("30s"), Ok(Duration::from_secs(30)));
        assert_eq!(parse_duration("5m"), Ok(Duration::from_secs(300)));
        assert_eq!(parse_duration("1h"), Ok(Duration::from_secs(3600)));
        assert_eq!(parse_duration("250ms"), Ok(Duration::from_millis(250)));
        assert_eq!(parse_duration("42"), Ok(Duration::from_secs(42)));
        assert!(parse_duration("soon").is_err());
        assert!(parse_duration("").is_err());
    }

    #[test]
    fn parse_duration_rejects_overflow() {
        assert!(parse_duration("99999999999999999d").is_err());
        assert!(parse_duration("18446744073709551615m").is_err());
        assert_eq!(
            parse_duration("18446744073709551615s"),
            Ok(Duration::from_secs(u64::MAX))
        );
    }
}
