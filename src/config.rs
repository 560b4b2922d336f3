//! Configuration loading and management.

use serde::Deserialize;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Daemon configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Identity of this process within the fleet.
    pub server: ServerConfig,
    /// Shared fleet database.
    pub database: DatabaseConfig,
    /// Notification channel policy.
    #[serde(default)]
    pub notify: NotifyConfig,
    /// Moderation behavior.
    #[serde(default)]
    pub moderation: ModerationConfig,
    /// Metrics endpoint.
    #[serde(default)]
    pub metrics: MetricsConfig,
    /// Canonical role ids (`category:name`) known to this deployment.
    #[serde(default)]
    pub roles: Vec<String>,
}

/// Server identity configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Fleet-unique server name (e.g. "lizard-us-west"). Resolved to a
    /// server row id on startup; that id tags outgoing notifications.
    pub name: String,
}

/// Database configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// PostgreSQL connection URL.
    pub url: String,
    /// Connection pool size.
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

/// Notification admission and reconnect policy.
#[derive(Debug, Clone, Deserialize)]
pub struct NotifyConfig {
    /// Fixed rate-limit window length in seconds.
    #[serde(default = "default_rate_window_secs")]
    pub rate_window_secs: u64,
    /// Notifications admitted per window, per channel.
    #[serde(default = "default_rate_max_admits")]
    pub rate_max_admits: u32,
    /// Backoff added after each failed listener reconnect, in milliseconds.
    #[serde(default = "default_backoff_increment_ms")]
    pub backoff_increment_ms: u64,
    /// Upper bound on the reconnect backoff, in milliseconds.
    #[serde(default = "default_backoff_cap_ms")]
    pub backoff_cap_ms: u64,
}

/// Moderation behavior configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ModerationConfig {
    /// Appeal URL appended to disconnect messages.
    pub appeal_url: Option<String>,
    /// Interval for cache maintenance sweeps, in seconds.
    #[serde(default = "default_maintenance_interval_secs")]
    pub maintenance_interval_secs: u64,
}

/// Prometheus metrics endpoint configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct MetricsConfig {
    /// Port for the `/metrics` HTTP endpoint. Disabled if unset.
    pub port: Option<u16>,
}

fn default_max_connections() -> u32 {
    8
}

fn default_rate_window_secs() -> u64 {
    30
}

fn default_rate_max_admits() -> u32 {
    10
}

fn default_backoff_increment_ms() -> u64 {
    1000
}

fn default_backoff_cap_ms() -> u64 {
    15_000
}

fn default_maintenance_interval_secs() -> u64 {
    60
}

impl Default for NotifyConfig {
    fn default() -> Self {
        NotifyConfig {
            rate_window_secs: default_rate_window_secs(),
            rate_max_admits: default_rate_max_admits(),
            backoff_increment_ms: default_backoff_increment_ms(),
            backoff_cap_ms: default_backoff_cap_ms(),
        }
    }
}

impl NotifyConfig {
    pub fn rate_window(&self) -> Duration {
        Duration::from_secs(self.rate_window_secs)
    }

    pub fn backoff_increment(&self) -> Duration {
        Duration::from_millis(self.backoff_increment_ms)
    }

    pub fn backoff_cap(&self) -> Duration {
        Duration::from_millis(self.backoff_cap_ms)
    }
}

impl ModerationConfig {
    pub fn maintenance_interval(&self) -> Duration {
        Duration::from_secs(if self.maintenance_interval_secs == 0 {
            default_maintenance_interval_secs()
        } else {
            self.maintenance_interval_secs
        })
    }
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Config, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&content)?)
    }
}
