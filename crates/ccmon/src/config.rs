//! Monitor configuration
//!
//! Layered: serde defaults, then an optional config file, then `CCMON_*`
//! environment variables. Command-line flags are applied on top by `main`.

use anyhow::{Context, Result};
use ccmon_lib::accumulator::AccumulatorConfig;
use ccmon_lib::scheduler::SchedulerConfig;
use ccmon_lib::RunnerConfig;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Json,
    Pretty,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MonitorConfig {
    /// Namespace for created workloads and the pod watch
    #[serde(default = "default_namespace")]
    pub namespace: String,

    /// Directory for the telemetry record
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,

    #[serde(default = "default_pending_interval")]
    pub pending_interval_ms: u64,

    #[serde(default = "default_cost_interval")]
    pub cost_interval_ms: u64,

    /// Cadence of the periodic cost log line
    #[serde(default = "default_report_interval")]
    pub report_interval_secs: u64,

    #[serde(default = "default_max_scale_attempts")]
    pub max_scale_attempts: u32,

    /// JSON or YAML price table; the built-in table is used when unset
    #[serde(default)]
    pub pricing_file: Option<PathBuf>,

    #[serde(default)]
    pub spot_aware_pricing: bool,

    /// Serve health and metrics endpoints on this port
    #[serde(default)]
    pub metrics_port: Option<u16>,

    #[serde(default = "default_log_format")]
    pub log_format: LogFormat,
}

fn default_namespace() -> String {
    "default".to_string()
}

fn default_output_dir() -> PathBuf {
    PathBuf::from(".")
}

fn default_pending_interval() -> u64 {
    250
}

fn default_cost_interval() -> u64 {
    1000
}

fn default_report_interval() -> u64 {
    60
}

fn default_max_scale_attempts() -> u32 {
    100
}

fn default_log_format() -> LogFormat {
    LogFormat::Json
}

impl MonitorConfig {
    /// Load from an optional file and the process environment
    pub fn load(file: Option<&Path>) -> Result<Self> {
        Self::load_with_env(file, environment())
    }

    fn load_with_env(file: Option<&Path>, env: config::Environment) -> Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = file {
            builder = builder.add_source(config::File::from(path).required(true));
        }

        let config = builder
            .add_source(env)
            .build()
            .context("Failed to load configuration")?;
        let parsed: Self = config
            .try_deserialize()
            .context("Invalid configuration")?;
        parsed.validate()?;
        Ok(parsed)
    }

    fn validate(&self) -> Result<()> {
        anyhow::ensure!(self.pending_interval_ms > 0, "pending_interval_ms must be positive");
        anyhow::ensure!(self.cost_interval_ms > 0, "cost_interval_ms must be positive");
        anyhow::ensure!(self.max_scale_attempts > 0, "max_scale_attempts must be positive");
        Ok(())
    }

    pub fn runner_config(&self) -> RunnerConfig {
        RunnerConfig {
            namespace: self.namespace.clone(),
            output_dir: self.output_dir.clone(),
            accumulator: AccumulatorConfig {
                pending_interval: Duration::from_millis(self.pending_interval_ms),
                cost_interval: Duration::from_millis(self.cost_interval_ms),
                report_interval: Duration::from_secs(self.report_interval_secs),
            },
            scheduler: SchedulerConfig {
                max_attempts: self.max_scale_attempts,
            },
            spot_aware_pricing: self.spot_aware_pricing,
        }
    }
}

fn environment() -> config::Environment {
    config::Environment::with_prefix("CCMON")
        .prefix_separator("_")
        .separator("__")
        .try_parsing(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    fn env(vars: &[(&str, &str)]) -> config::Environment {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        environment().source(Some(map))
    }

    #[test]
    fn test_defaults() {
        let config = MonitorConfig::load_with_env(None, env(&[])).unwrap();

        assert_eq!(config.namespace, "default");
        assert_eq!(config.output_dir, PathBuf::from("."));
        assert_eq!(config.pending_interval_ms, 250);
        assert_eq!(config.cost_interval_ms, 1000);
        assert_eq!(config.report_interval_secs, 60);
        assert_eq!(config.max_scale_attempts, 100);
        assert_eq!(config.pricing_file, None);
        assert!(!config.spot_aware_pricing);
        assert_eq!(config.metrics_port, None);
        assert_eq!(config.log_format, LogFormat::Json);
    }

    #[test]
    fn test_file_then_environment() {
        let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        writeln!(file, "namespace: bench\ncost_interval_ms: 500\nlog_format: pretty").unwrap();

        let config = MonitorConfig::load_with_env(
            Some(file.path()),
            env(&[("CCMON_NAMESPACE", "override"), ("CCMON_METRICS_PORT", "9100")]),
        )
        .unwrap();

        assert_eq!(config.namespace, "override");
        assert_eq!(config.cost_interval_ms, 500);
        assert_eq!(config.metrics_port, Some(9100));
        assert_eq!(config.log_format, LogFormat::Pretty);
    }

    #[test]
    fn test_missing_file_is_an_error() {
        let result = MonitorConfig::load_with_env(Some(Path::new("/nonexistent/ccmon.yaml")), env(&[]));
        assert!(result.is_err());
    }

    #[test]
    fn test_zero_interval_rejected() {
        let result =
            MonitorConfig::load_with_env(None, env(&[("CCMON_PENDING_INTERVAL_MS", "0")]));
        assert!(result.is_err());
    }

    #[test]
    fn test_runner_config_conversion() {
        let config = MonitorConfig::load_with_env(
            None,
            env(&[("CCMON_MAX_SCALE_ATTEMPTS", "7"), ("CCMON_SPOT_AWARE_PRICING", "true")]),
        )
        .unwrap();
        let runner = config.runner_config();

        assert_eq!(runner.scheduler.max_attempts, 7);
        assert!(runner.spot_aware_pricing);
        assert_eq!(runner.accumulator.pending_interval, Duration::from_millis(250));
        assert_eq!(runner.accumulator.report_interval, Duration::from_secs(60));
    }
}
