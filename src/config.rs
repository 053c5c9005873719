//! Configuration loading and validation.

use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::error::{ConfigError, Result};
use crate::manager::ManagerOptions;
use crate::network::frame;

/// Main configuration for the arpwarden binary.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Adapter identity to bind to. If None, auto-detect the first viable
    /// adapter.
    pub interface: Option<String>,

    /// Seconds between re-emitted spoof pairs for active victims.
    /// Omit to disable the background re-poisoner.
    #[serde(default)]
    pub repoison_interval_secs: Option<u64>,

    /// Sweep the subnet for live hosts after initialization.
    #[serde(default)]
    pub scan_on_start: bool,

    /// Victims to start poisoning at startup.
    #[serde(default)]
    pub targets: Vec<TargetConfig>,

    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// One victim entry: IPv4 and MAC, as strings.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TargetConfig {
    pub ip: String,
    pub mac: String,
}

/// Prometheus exporter settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MetricsConfig {
    #[serde(default)]
    pub enabled: bool,

    #[serde(default = "default_metrics_listen")]
    pub listen: SocketAddr,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            listen: default_metrics_listen(),
        }
    }
}

fn default_metrics_listen() -> SocketAddr {
    ([127, 0, 0, 1], 9598).into()
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(ConfigError::ReadFile)?;
        Self::parse(&content)
    }

    /// Parse configuration from a TOML string.
    pub fn parse(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content).map_err(ConfigError::Parse)?;
        config.validate()?;
        Ok(config)
    }

    /// The manager tunables this configuration implies.
    pub fn manager_options(&self) -> ManagerOptions {
        ManagerOptions {
            repoison_interval: self.repoison_interval_secs.map(Duration::from_secs),
            ..ManagerOptions::default()
        }
    }

    /// Validate the configuration.
    fn validate(&self) -> Result<()> {
        if let Some(secs) = self.repoison_interval_secs
            && !(1..=5).contains(&secs)
        {
            return Err(ConfigError::Validation(format!(
                "repoison_interval_secs must be between 1 and 5, got {secs}"
            ))
            .into());
        }

        for target in &self.targets {
            if frame::parse_ipv4(&target.ip).is_err() {
                return Err(ConfigError::Validation(format!(
                    "invalid target ip: {}",
                    target.ip
                ))
                .into());
            }
            if frame::parse_mac(&target.mac).is_err() {
                return Err(ConfigError::Validation(format!(
                    "invalid target mac: {}",
                    target.mac
                ))
                .into());
            }
        }

        Ok(())
    }
}
