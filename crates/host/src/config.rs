//! Host configuration management

use crate::usb::VidPidFilter;
use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HostConfig {
    #[serde(default)]
    pub host: HostSettings,
    #[serde(default)]
    pub scan: ScanSettings,
    #[serde(default)]
    pub usb: UsbSettings,
    #[serde(default)]
    pub route: RouteSettings,
}

/// Which hardware backend the service drives
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    #[default]
    Real,
    Simulated,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HostSettings {
    #[serde(default = "HostSettings::default_log_level")]
    pub log_level: String,
    #[serde(default)]
    pub backend: BackendKind,
}

impl Default for HostSettings {
    fn default() -> Self {
        Self {
            log_level: Self::default_log_level(),
            backend: BackendKind::default(),
        }
    }
}

impl HostSettings {
    fn default_log_level() -> String {
        "info".to_string()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanSettings {
    /// Interval between periodic bus scans
    #[serde(default = "ScanSettings::default_interval_ms")]
    pub interval_ms: u64,
}

impl Default for ScanSettings {
    fn default() -> Self {
        Self {
            interval_ms: Self::default_interval_ms(),
        }
    }
}

impl ScanSettings {
    fn default_interval_ms() -> u64 {
        2000
    }

    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UsbSettings {
    #[serde(default = "UsbSettings::default_write_timeout_ms")]
    pub write_timeout_ms: u64,
    /// Additional supported devices, as `0xVID:0xPID` patterns (`*` wildcard)
    #[serde(default)]
    pub extra_filters: Vec<String>,
}

impl Default for UsbSettings {
    fn default() -> Self {
        Self {
            write_timeout_ms: Self::default_write_timeout_ms(),
            extra_filters: Vec::new(),
        }
    }
}

impl UsbSettings {
    fn default_write_timeout_ms() -> u64 {
        1000
    }

    pub fn write_timeout(&self) -> Duration {
        Duration::from_millis(self.write_timeout_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouteSettings {
    /// Time between route samples
    #[serde(default = "RouteSettings::default_tick_ms")]
    pub tick_ms: u64,
    /// Speed used when a route is played without an explicit speed
    #[serde(default = "RouteSettings::default_speed_mps")]
    pub default_speed_mps: f64,
}

impl Default for RouteSettings {
    fn default() -> Self {
        Self {
            tick_ms: Self::default_tick_ms(),
            default_speed_mps: Self::default_speed_mps(),
        }
    }
}

impl RouteSettings {
    fn default_tick_ms() -> u64 {
        1000
    }

    fn default_speed_mps() -> f64 {
        1.4 // walking pace
    }

    pub fn tick(&self) -> Duration {
        Duration::from_millis(self.tick_ms)
    }
}

impl HostConfig {
    /// Load configuration from the specified path
    ///
    /// A leading `~` is expanded. Without a path, the default location is
    /// tried.
    pub fn load(path: Option<PathBuf>) -> Result<Self> {
        let config_path = match path {
            Some(p) => PathBuf::from(shellexpand::tilde(&p.to_string_lossy()).as_ref()),
            None => {
                let default = Self::default_path();
                if !default.exists() {
                    return Err(anyhow!("No configuration file found, using defaults"));
                }
                default
            }
        };

        let content = fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read config file: {}", config_path.display()))?;

        let config: HostConfig = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", config_path.display()))?;

        config.validate()?;

        tracing::info!("Loaded configuration from: {}", config_path.display());
        Ok(config)
    }

    /// Load configuration or return defaults if not found
    pub fn load_or_default() -> Self {
        match Self::load(None) {
            Ok(config) => config,
            Err(e) => {
                tracing::warn!("Failed to load config: {}, using defaults", e);
                Self::default()
            }
        }
    }

    /// Save configuration to the specified path
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self).context("Failed to serialize configuration")?;

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }

        fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        tracing::info!("Saved configuration to: {}", path.display());
        Ok(())
    }

    /// Get the default configuration file path
    pub fn default_path() -> PathBuf {
        if let Some(config_dir) = dirs::config_dir() {
            config_dir.join("gps-usb-host").join("host.toml")
        } else {
            PathBuf::from(".config/gps-usb-host/host.toml")
        }
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.host.log_level.as_str()) {
            return Err(anyhow!(
                "Invalid log level '{}', must be one of: {}",
                self.host.log_level,
                valid_levels.join(", ")
            ));
        }

        if self.scan.interval_ms == 0 {
            return Err(anyhow!("scan.interval_ms must be greater than 0"));
        }

        if self.usb.write_timeout_ms == 0 {
            return Err(anyhow!("usb.write_timeout_ms must be greater than 0"));
        }

        for filter in &self.usb.extra_filters {
            filter.parse::<VidPidFilter>().map_err(|e| anyhow!(e))?;
        }

        if self.route.tick_ms == 0 {
            return Err(anyhow!("route.tick_ms must be greater than 0"));
        }

        let speed = self.route.default_speed_mps;
        if !speed.is_finite() || speed <= 0.0 {
            return Err(anyhow!(
                "route.default_speed_mps must be a positive number, got {}",
                speed
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = HostConfig::default();
        assert_eq!(config.host.log_level, "info");
        assert_eq!(config.host.backend, BackendKind::Real);
        assert_eq!(config.scan.interval(), Duration::from_secs(2));
        assert_eq!(config.usb.write_timeout(), Duration::from_secs(1));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_log_level() {
        let mut config = HostConfig::default();
        config.host.log_level = "invalid".to_string();
        assert!(config.validate().is_err());

        config.host.log_level = "debug".to_string();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_zero_interval() {
        let mut config = HostConfig::default();
        config.scan.interval_ms = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_filters() {
        let mut config = HostConfig::default();
        config.usb.extra_filters = vec!["0x1234:*".to_string()];
        assert!(config.validate().is_ok());

        config.usb.extra_filters.push("1234:5678".to_string());
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config: HostConfig = toml::from_str(
            r#"
            [scan]
            interval_ms = 500

            [host]
            backend = "simulated"
            "#,
        )
        .unwrap();

        assert_eq!(config.scan.interval_ms, 500);
        assert_eq!(config.host.backend, BackendKind::Simulated);
        assert_eq!(config.host.log_level, "info");
        assert_eq!(config.route.tick_ms, 1000);
    }
}
