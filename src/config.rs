//! Supervisor configuration
//!
//! This module handles configuration for capture and transmit supervisors.
//! It provides documented defaults, validation, and file loading.

use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{RawLinkError, Result};

/// Default network interface name.
pub const DEFAULT_INTERFACE: &str = "eth0";
/// Default pacing interval between I/O attempts, in milliseconds.
pub const DEFAULT_INTERVAL_MS: u64 = 100;
/// Default delay before restarting after an error-class fault, in milliseconds.
pub const DEFAULT_ERROR_BACKOFF_MS: u64 = 60_000;
/// Default capture watchdog window: time allowed without any worker message.
pub const CAPTURE_WATCHDOG_TIMEOUT_MS: u64 = 600_000;
/// Default transmit watchdog window. Short, because transmit heartbeats are
/// expected frequently even with no outbound traffic.
pub const TRANSMIT_WATCHDOG_TIMEOUT_MS: u64 = 10_000;

/// Configuration for one supervisor instance.
///
/// Immutable after construction; a supervisor keeps the configuration it
/// was spawned with for its whole life.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SupervisorConfig {
    /// Network interface name
    pub interface: String,
    /// Pacing interval between I/O attempts (ms)
    pub interval_ms: u64,
    /// Delay before restarting after an error-class fault (ms)
    pub error_backoff_ms: u64,
    /// Watchdog window: worker silence beyond this forces a restart (ms)
    pub watchdog_timeout_ms: u64,
}

impl SupervisorConfig {
    /// Defaults for a capture supervisor (10 minute watchdog).
    pub fn capture() -> Self {
        Self {
            interface: DEFAULT_INTERFACE.to_string(),
            interval_ms: DEFAULT_INTERVAL_MS,
            error_backoff_ms: DEFAULT_ERROR_BACKOFF_MS,
            watchdog_timeout_ms: CAPTURE_WATCHDOG_TIMEOUT_MS,
        }
    }

    /// Defaults for a transmit supervisor (10 second watchdog).
    pub fn transmit() -> Self {
        Self {
            watchdog_timeout_ms: TRANSMIT_WATCHDOG_TIMEOUT_MS,
            ..Self::capture()
        }
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        if self.interface.is_empty() {
            return Err(RawLinkError::Config(
                "interface name must not be empty".to_string(),
            ));
        }
        if self.interval_ms == 0 {
            return Err(RawLinkError::Config(
                "interval_ms must be greater than zero".to_string(),
            ));
        }
        if self.watchdog_timeout_ms == 0 {
            return Err(RawLinkError::Config(
                "watchdog_timeout_ms must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    /// Load a configuration from a JSON or TOML file, dispatching on the
    /// file extension, and validate it.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|e| {
            RawLinkError::Config(format!("failed to read {}: {}", path.display(), e))
        })?;

        let config: Self = match path.extension().and_then(|ext| ext.to_str()) {
            Some("json") => serde_json::from_str(&content)
                .map_err(|e| RawLinkError::Config(format!("invalid JSON config: {}", e)))?,
            Some("toml") => toml::from_str(&content)
                .map_err(|e| RawLinkError::Config(format!("invalid TOML config: {}", e)))?,
            _ => {
                return Err(RawLinkError::Config(format!(
                    "unsupported config format: {}",
                    path.display()
                )))
            }
        };

        config.validate()?;
        Ok(config)
    }

    /// Pacing interval as a `Duration`.
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    /// Error backoff as a `Duration`.
    pub fn error_backoff(&self) -> Duration {
        Duration::from_millis(self.error_backoff_ms)
    }

    /// Watchdog window as a `Duration`.
    pub fn watchdog_timeout(&self) -> Duration {
        Duration::from_millis(self.watchdog_timeout_ms)
    }
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self::capture()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capture_defaults() {
        let config = SupervisorConfig::capture();
        assert_eq!(config.interface, "eth0");
        assert_eq!(config.interval_ms, 100);
        assert_eq!(config.error_backoff_ms, 60_000);
        assert_eq!(config.watchdog_timeout_ms, 600_000);
        assert_eq!(config, SupervisorConfig::default());
    }

    #[test]
    fn test_transmit_defaults() {
        let config = SupervisorConfig::transmit();
        assert_eq!(config.interface, "eth0");
        assert_eq!(config.interval_ms, 100);
        assert_eq!(config.error_backoff_ms, 60_000);
        assert_eq!(config.watchdog_timeout_ms, 10_000);
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = SupervisorConfig::capture();
        config.interface.clear();
        assert!(config.validate().is_err());

        let mut config = SupervisorConfig::capture();
        config.interval_ms = 0;
        assert!(config.validate().is_err());

        let mut config = SupervisorConfig::transmit();
        config.watchdog_timeout_ms = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_duration_accessors() {
        let config = SupervisorConfig::transmit();
        assert_eq!(config.interval(), Duration::from_millis(100));
        assert_eq!(config.error_backoff(), Duration::from_secs(60));
        assert_eq!(config.watchdog_timeout(), Duration::from_secs(10));
    }

    #[test]
    fn test_load_from_json_file() {
        let path = std::env::temp_dir().join("rawlink_config_test.json");
        let config = SupervisorConfig {
            interface: "wlan0".to_string(),
            ..SupervisorConfig::transmit()
        };
        fs::write(&path, serde_json::to_string_pretty(&config).unwrap()).unwrap();

        let loaded = SupervisorConfig::load_from_file(&path).unwrap();
        assert_eq!(loaded, config);
        let _ = fs::remove_file(&path);
    }

    #[test]
    fn test_load_from_toml_file() {
        let path = std::env::temp_dir().join("rawlink_config_test.toml");
        let config = SupervisorConfig::capture();
        fs::write(&path, toml::to_string_pretty(&config).unwrap()).unwrap();

        let loaded = SupervisorConfig::load_from_file(&path).unwrap();
        assert_eq!(loaded, config);
        let _ = fs::remove_file(&path);
    }

    #[test]
    fn test_load_rejects_unknown_extension() {
        let path = std::env::temp_dir().join("rawlink_config_test.conf");
        fs::write(&path, "interface = \"eth0\"").unwrap();
        assert!(SupervisorConfig::load_from_file(&path).is_err());
        let _ = fs::remove_file(&path);
    }
}
