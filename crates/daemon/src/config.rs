//! Configuration loading (SPEC_FULL §10.2, spec §6): YAML file, overlaid by
//! `RUNNER_`-prefixed environment variables, overlaid by explicit CLI flags.
//! Unknown YAML keys are ignored (no `deny_unknown_fields`). Grounded in
//! `original_source/src/cmd/root.go`'s viper-based three-tier precedence,
//! reproduced here by hand since no Rust crate in the corpus plays viper's
//! role.

use std::path::Path;

use runner_core::WorkloadConfig;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::cli::Cli;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read { path: String, source: std::io::Error },
    #[error("failed to parse config file {path}: {source}")]
    Parse { path: String, source: serde_yaml::Error },
    #[error("control plane api token is required (config `controlPlane.apiToken`, env `RUNNER_API_TOKEN`, or `--api-token`)")]
    MissingApiToken,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Mode {
    ControlPlane,
    Broker,
}

impl Default for Mode {
    fn default() -> Self {
        Mode::ControlPlane
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ControlPlaneConfig {
    pub api_url: String,
    pub api_token: String,
    pub poll_interval_seconds: u64,
    pub concurrency: i64,
}

impl Default for ControlPlaneConfig {
    fn default() -> Self {
        Self {
            api_url: String::new(),
            api_token: String::new(),
            poll_interval_seconds: 10,
            concurrency: 5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    pub port: u16,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self { port: 9090 }
    }
}

/// The decoded `RunnerConfig`: the full YAML document shape from SPEC_FULL
/// §6.1, unknown keys ignored.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RunnerConfig {
    pub workload: WorkloadConfig,
    pub control_plane: ControlPlaneConfig,
    pub metrics: MetricsConfig,
    pub mode: Mode,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            workload: WorkloadConfig::default(),
            control_plane: ControlPlaneConfig::default(),
            metrics: MetricsConfig::default(),
            mode: Mode::default(),
        }
    }
}

fn env_override(key: &str) -> Option<String> {
    std::env::var(format!("RUNNER_{key}")).ok()
}

impl RunnerConfig {
    /// Loads `path` (if given), applies `RUNNER_*` environment overrides,
    /// then applies explicit CLI flags — the precedence named in SPEC_FULL
    /// §6.1: file < environment < flags.
    pub fn load(path: Option<&Path>, cli: &Cli) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => {
                let text = std::fs::read_to_string(path)
                    .map_err(|e| ConfigError::Read { path: path.display().to_string(), source: e })?;
                serde_yaml::from_str(&text)
                    .map_err(|e| ConfigError::Parse { path: path.display().to_string(), source: e })?
            }
            None => RunnerConfig::default(),
        };

        config.apply_env();
        config.apply_cli(cli);

        if config.control_plane.api_token.is_empty() && config.mode == Mode::ControlPlane {
            return Err(ConfigError::MissingApiToken);
        }

        Ok(config)
    }

    fn apply_env(&mut self) {
        if let Some(v) = env_override("POD_SHELL") {
            self.workload.shell = v;
        }
        if let Some(v) = env_override("NAMESPACE") {
            self.workload.namespace = v;
        }
        if let Some(v) = env_override("POD_MAX_WAIT") {
            if let Ok(n) = v.parse() {
                self.workload.pod_max_wait_seconds = n;
            }
        }
        if let Some(v) = env_override("API_URL") {
            self.control_plane.api_url = v;
        }
        if let Some(v) = env_override("API_TOKEN") {
            self.control_plane.api_token = v;
        }
        if let Some(v) = env_override("POLL_INTERVAL") {
            if let Ok(n) = v.parse() {
                self.control_plane.poll_interval_seconds = n;
            }
        }
        if let Some(v) = env_override("CONCURRENCY") {
            if let Ok(n) = v.parse() {
                self.control_plane.concurrency = n;
            }
        }
        if let Some(v) = env_override("METRICS_PORT") {
            if let Ok(n) = v.parse() {
                self.metrics.port = n;
            }
        }
        if let Some(v) = env_override("MODE") {
            if v.eq_ignore_ascii_case("broker") {
                self.mode = Mode::Broker;
            } else if v.eq_ignore_ascii_case("control-plane") {
                self.mode = Mode::ControlPlane;
            }
        }
    }

    fn apply_cli(&mut self, cli: &Cli) {
        if let Some(shell) = &cli.pod_shell {
            self.workload.shell = shell.clone();
        }
        if let Some(interval) = cli.poll_interval {
            self.control_plane.poll_interval_seconds = interval;
        }
        if let Some(concurrency) = cli.concurrency {
            self.control_plane.concurrency = concurrency;
        }
        if let Some(token) = &cli.api_token {
            self.control_plane.api_token = token.clone();
        }
        if let Some(port) = cli.metrics_port {
            self.metrics.port = port;
        }
    }
}
