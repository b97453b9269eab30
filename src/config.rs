//! Agent configuration parsing and validation.
//!
//! Every field has a default so the agent runs without a config file. When
//! the `DISPATCH_AGENT_CONFIG` environment variable names a TOML file, its
//! values override the defaults.

use std::env;
use std::fs;
use std::path::{Component, Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::{AppError, Result};

/// Environment variable naming an optional TOML configuration file.
pub const CONFIG_PATH_ENV: &str = "DISPATCH_AGENT_CONFIG";

/// How the experiment code is materialized and launched.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case", default)]
pub struct RunnerConfig {
    /// Interpreter binary that executes the script (e.g., `python3`).
    pub interpreter: String,
    /// Arguments passed to the interpreter before the script path.
    pub interpreter_args: Vec<String>,
    /// File name the experiment code is written to.
    pub script_name: String,
    /// Parent directory for per-job scratch directories; system temp if unset.
    pub work_root: Option<PathBuf>,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            interpreter: "python3".into(),
            interpreter_args: vec!["-u".into()],
            script_name: "experiment.py".into(),
            work_root: None,
        }
    }
}

/// Agent configuration parsed from TOML.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case", default)]
pub struct AgentConfig {
    /// Duplex channel endpoint the relay connects to for every job.
    pub relay_url: String,
    /// Interval between liveness reports.
    pub heartbeat_interval_ms: u64,
    /// Sleep between queue polls when no job is pending.
    pub poll_interval_ms: u64,
    /// Bounded wait on the child per `Running` iteration.
    pub wait_poll_ms: u64,
    /// Wait after the graceful-stop signal before escalating.
    pub terminate_grace_seconds: u64,
    /// Wait after the forceful-stop signal before giving up.
    pub kill_grace_seconds: u64,
    /// Maximum bytes read from the child's stdout per chunk.
    pub read_chunk_bytes: usize,
    /// Time the outbound pump gets to drain stdout before the channel closes.
    pub relay_drain_ms: u64,
    /// Time both pumps get to stop after the channel closes.
    pub relay_join_timeout_seconds: u64,
    /// Per-request timeout for dispatcher calls.
    pub http_timeout_seconds: u64,
    /// Script materialization and launch settings.
    pub runner: RunnerConfig,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            relay_url: "ws://echo.websocket.org".into(),
            heartbeat_interval_ms: 5_000,
            poll_interval_ms: 500,
            wait_poll_ms: 1_000,
            terminate_grace_seconds: 10,
            kill_grace_seconds: 10,
            read_chunk_bytes: 512,
            relay_drain_ms: 1_000,
            relay_join_timeout_seconds: 5,
            http_timeout_seconds: 30,
            runner: RunnerConfig::default(),
        }
    }
}

impl AgentConfig {
    /// Load configuration from the file named by [`CONFIG_PATH_ENV`], or
    /// fall back to defaults when the variable is unset.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the file cannot be read, contains
    /// invalid TOML, or fails validation.
    pub fn load() -> Result<Self> {
        match env::var_os(CONFIG_PATH_ENV) {
            Some(path) => Self::load_from_path(PathBuf::from(path)),
            None => {
                let config = Self::default();
                config.validate()?;
                Ok(config)
            }
        }
    }

    /// Load and validate configuration from a TOML file path.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the file cannot be read or contains
    /// invalid TOML, or if validation fails.
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .map_err(|err| AppError::Config(format!("failed to read config: {err}")))?;
        Self::from_toml_str(&raw)
    }

    /// Parse configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if parsing or validation fails.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Interval between liveness reports.
    #[must_use]
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    /// Sleep between empty queue polls.
    #[must_use]
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Bounded child wait per `Running` iteration.
    #[must_use]
    pub fn wait_poll(&self) -> Duration {
        Duration::from_millis(self.wait_poll_ms)
    }

    /// Grace period after the graceful-stop signal.
    #[must_use]
    pub fn terminate_grace(&self) -> Duration {
        Duration::from_secs(self.terminate_grace_seconds)
    }

    /// Grace period after the forceful-stop signal.
    #[must_use]
    pub fn kill_grace(&self) -> Duration {
        Duration::from_secs(self.kill_grace_seconds)
    }

    /// Drain window for the outbound pump before closing the channel.
    #[must_use]
    pub fn relay_drain(&self) -> Duration {
        Duration::from_millis(self.relay_drain_ms)
    }

    /// Bound on joining the pumps after the channel closes.
    #[must_use]
    pub fn relay_join_timeout(&self) -> Duration {
        Duration::from_secs(self.relay_join_timeout_seconds)
    }

    /// Per-request timeout for dispatcher calls.
    #[must_use]
    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_seconds)
    }

    fn validate(&self) -> Result<()> {
        let positive = [
            ("heartbeat_interval_ms", self.heartbeat_interval_ms),
            ("poll_interval_ms", self.poll_interval_ms),
            ("wait_poll_ms", self.wait_poll_ms),
            ("http_timeout_seconds", self.http_timeout_seconds),
        ];
        for (name, value) in positive {
            if value == 0 {
                return Err(AppError::Config(format!(
                    "{name} must be greater than zero"
                )));
            }
        }

        if self.read_chunk_bytes == 0 {
            return Err(AppError::Config(
                "read_chunk_bytes must be greater than zero".into(),
            ));
        }

        if !(self.relay_url.starts_with("ws://") || self.relay_url.starts_with("wss://")) {
            return Err(AppError::Config(format!(
                "relay_url must be a ws:// or wss:// url, got {}",
                self.relay_url
            )));
        }

        if self.runner.interpreter.trim().is_empty() {
            return Err(AppError::Config("runner.interpreter must not be empty".into()));
        }

        let mut components = Path::new(&self.runner.script_name).components();
        let plain = matches!(components.next(), Some(Component::Normal(_)))
            && components.next().is_none();
        if !plain {
            return Err(AppError::Config(
                "runner.script_name must be a plain file name".into(),
            ));
        }

        Ok(())
    }
}
