//! Client configuration.
//!
//! Configuration can be loaded from:
//! - Environment variables (RELAYMUX_*)
//! - TOML configuration file
//! - `--config` on the command line

use anyhow::{Context, Result};
use relaymux_core::PoolConfig;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Client configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Relays used when `--relay` is not given.
    #[serde(default = "default_relays")]
    pub relays: Vec<String>,

    /// Pool timeouts.
    #[serde(default)]
    pub pool: PoolSection,

    /// Metrics configuration.
    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// Pool timeouts, in milliseconds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolSection {
    /// Connect watchdog.
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_ms: u64,

    /// Completion watchdog for aggregate subscriptions.
    #[serde(default = "default_eose_timeout")]
    pub eose_timeout_ms: u64,

    /// Wait for the first event in `get`.
    #[serde(default = "default_get_timeout")]
    pub get_timeout_ms: u64,
}

/// Metrics configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    /// Enable the Prometheus exporter.
    #[serde(default = "default_metrics_enabled")]
    pub enabled: bool,

    /// Metrics port.
    #[serde(default = "default_metrics_port")]
    pub port: u16,
}

// Default value functions
fn default_relays() -> Vec<String> {
    std::env::var("RELAYMUX_RELAYS")
        .map(|list| {
            list.split(',')
                .map(str::trim)
                .filter(|relay| !relay.is_empty())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

fn default_connect_timeout() -> u64 {
    env_millis("RELAYMUX_CONNECT_TIMEOUT_MS", 10_000)
}

fn default_eose_timeout() -> u64 {
    env_millis("RELAYMUX_EOSE_TIMEOUT_MS", 2_400)
}

fn default_get_timeout() -> u64 {
    env_millis("RELAYMUX_GET_TIMEOUT_MS", 1_500)
}

fn default_metrics_enabled() -> bool {
    std::env::var("RELAYMUX_METRICS")
        .map(|v| matches!(v.as_str(), "1" | "true" | "yes"))
        .unwrap_or(false)
}

fn default_metrics_port() -> u16 {
    std::env::var("RELAYMUX_METRICS_PORT")
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(9464)
}

fn env_millis(key: &str, fallback: u64) -> u64 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(fallback)
}

impl Default for Config {
    fn default() -> Self {
        Self {
            relays: default_relays(),
            pool: PoolSection::default(),
            metrics: MetricsConfig::default(),
        }
    }
}

impl Default for PoolSection {
    fn default() -> Self {
        Self {
            connect_timeout_ms: default_connect_timeout(),
            eose_timeout_ms: default_eose_timeout(),
            get_timeout_ms: default_get_timeout(),
        }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: default_metrics_enabled(),
            port: default_metrics_port(),
        }
    }
}

impl PoolSection {
    /// Convert to the pool's configuration type.
    #[must_use]
    pub fn to_pool_config(&self) -> PoolConfig {
        PoolConfig {
            connect_timeout: Duration::from_millis(self.connect_timeout_ms),
            eose_timeout: Duration::from_millis(self.eose_timeout_ms),
            get_timeout: Duration::from_millis(self.get_timeout_ms),
        }
    }
}

impl Config {
    /// Load configuration from `explicit`, the default paths, or defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if a config file exists but cannot be parsed, or if
    /// `explicit` cannot be read.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit {
            return Self::from_file(path);
        }

        let config_paths = [
            "relaymux.toml",
            "/etc/relaymux/relaymux.toml",
            "~/.config/relaymux/relaymux.toml",
        ];

        for path in &config_paths {
            let expanded = shellexpand::tilde(path);
            if Path::new(expanded.as_ref()).exists() {
                return Self::from_file(expanded.as_ref());
            }
        }

        // Fall back to defaults with environment overrides
        Ok(Self::default())
    }

    /// Load configuration from a specific file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_pool_section() {
        let pool = PoolSection {
            connect_timeout_ms: 10_000,
            eose_timeout_ms: 2_400,
            get_timeout_ms: 1_500,
        };
        let config = pool.to_pool_config();
        assert_eq!(config.connect_timeout, Duration::from_secs(10));
        assert_eq!(config.eose_timeout, Duration::from_millis(2400));
        assert_eq!(config.get_timeout, Duration::from_millis(1500));
    }

    #[test]
    fn test_config_from_toml() {
        let toml_str = r#"
            relays = ["wss://relay.one", "wss://relay.two"]

            [pool]
            eose_timeout_ms = 5000

            [metrics]
            enabled = true
            port = 9100
        "#;

        let config: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(config.relays, vec!["wss://relay.one", "wss://relay.two"]);
        assert_eq!(config.pool.eose_timeout_ms, 5000);
        assert!(config.metrics.enabled);
        assert_eq!(config.metrics.port, 9100);
        assert_eq!(
            config.pool.to_pool_config().eose_timeout,
            Duration::from_secs(5)
        );
    }

    #[test]
    fn test_missing_explicit_file_is_an_error() {
        let err = Config::load(Some(Path::new("/nonexistent/relaymux.toml"))).unwrap_err();
        assert!(err.to_string().contains("Failed to read config file"));
    }
}
