//! Configuration structures for the condition-variable probe.
//!
//! Supports TOML deserialization with sensible defaults so the probe runs
//! without a config file, and explicit values for longer soak runs.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Top-level probe configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProbeConfig {
    /// Report output format.
    pub output: OutputFormat,

    /// Optional path the report is written to in addition to stdout.
    pub report_path: Option<PathBuf>,

    /// Timed-wait accuracy scenario.
    pub timeout: TimeoutProbeConfig,

    /// Two-thread hand-off scenario.
    pub handoff: HandoffProbeConfig,

    /// Broadcast wakeup scenario.
    pub broadcast: BroadcastProbeConfig,

    /// Metrics collection configuration.
    pub metrics: MetricsConfig,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            output: OutputFormat::Text,
            report_path: None,
            timeout: TimeoutProbeConfig::default(),
            handoff: HandoffProbeConfig::default(),
            broadcast: BroadcastProbeConfig::default(),
            metrics: MetricsConfig::default(),
        }
    }
}

/// Timed-wait accuracy scenario: `wait_for` with nobody notifying.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutProbeConfig {
    /// Enable this scenario.
    pub enabled: bool,

    /// Relative timeout passed to each wait.
    #[serde(with = "humantime_serde")]
    pub wait_timeout: Duration,

    /// Number of timed waits to perform.
    pub iterations: u32,

    /// Overshoot past the timeout tolerated before a wait counts as late.
    #[serde(with = "humantime_serde")]
    pub max_overshoot: Duration,
}

impl Default for TimeoutProbeConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            wait_timeout: Duration::from_millis(50),
            iterations: 20,
            max_overshoot: Duration::from_millis(20),
        }
    }
}

/// Hand-off scenario: two threads pass a token back and forth.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HandoffProbeConfig {
    /// Enable this scenario.
    pub enabled: bool,

    /// Number of round trips.
    pub rounds: u32,

    /// Upper bound for a single round trip; exceeding it aborts the scenario.
    #[serde(with = "humantime_serde")]
    pub round_timeout: Duration,
}

impl Default for HandoffProbeConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            rounds: 1_000,
            round_timeout: Duration::from_secs(1),
        }
    }
}

/// Broadcast scenario: many waiters released by one `notify_all`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BroadcastProbeConfig {
    /// Enable this scenario.
    pub enabled: bool,

    /// Number of waiting threads.
    pub waiters: usize,

    /// How long each waiter waits before giving up.
    #[serde(with = "humantime_serde")]
    pub wait_timeout: Duration,

    /// Wake latency after `notify_all` tolerated before a waiter counts as slow.
    #[serde(with = "humantime_serde")]
    pub wake_budget: Duration,
}

impl Default for BroadcastProbeConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            waiters: 4,
            wait_timeout: Duration::from_secs(2),
            wake_budget: Duration::from_millis(10),
        }
    }
}

/// Metrics configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    /// Samples kept per scenario for the latency summary.
    pub max_samples: usize,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            max_samples: 1024,
        }
    }
}

/// Report output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// Human-readable summary.
    #[default]
    Text,
    /// Pretty-printed JSON report.
    Json,
}

impl ProbeConfig {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &std::path::Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;
        Self::from_toml(&content)
    }

    /// Parse configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns an error if the TOML is invalid.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(ConfigError::Parse)
    }

    /// Serialize configuration to TOML string.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(ConfigError::Serialize)
    }
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// File I/O error.
    #[error("failed to read config file {path}: {source}")]
    Io {
        /// Path to the configuration file.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// TOML parsing error.
    #[error("failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    /// TOML serialization error.
    #[error("failed to serialize TOML: {0}")]
    Serialize(#[from] toml::ser::Error),
}

/// Serde helper module for `Duration` using humantime format.
mod humantime_serde {
    use serde::{self, Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let s = humantime::format_duration(*duration).to_string();
        serializer.serialize_str(&s)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        humantime::parse_duration(&s).map_err(serde::de::Error::custom)
    }
}
