use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use crate::logging::LogConfig;
use crate::recorder::SampleBounds;
use crate::session::SessionSettings;
use crate::summary::CompromiseThresholds;
use crate::sync::RetryPolicy;

/// Main engine configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Configuration metadata
    pub metadata: ConfigMetadata,

    /// When a completed segment counts as compromised
    #[serde(default)]
    pub thresholds: CompromiseThresholds,

    /// Plausible ranges for live samples
    #[serde(default)]
    pub sample_bounds: SampleBounds,

    /// Peer device sync
    #[serde(default)]
    pub sync: SyncSettings,

    #[serde(default)]
    pub logging: LogConfig,
}

/// Configuration metadata
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfigMetadata {
    /// Configuration format version
    pub version: String,

    pub created_at: DateTime<Utc>,

    pub updated_at: DateTime<Utc>,
}

/// One of the two cooperating devices
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceRole {
    #[default]
    Wrist,
    Phone,
}

impl DeviceRole {
    /// The device on the other end of the link
    pub fn peer(self) -> Self {
        match self {
            DeviceRole::Wrist => DeviceRole::Phone,
            DeviceRole::Phone => DeviceRole::Wrist,
        }
    }
}

impl fmt::Display for DeviceRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceRole::Phone => write!(f, "phone"),
            DeviceRole::Wrist => write!(f, "wrist"),
        }
    }
}

/// Peer sync settings
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SyncSettings {
    /// Device running the authoritative session; its peer mirrors it
    #[serde(default)]
    pub driver: DeviceRole,

    /// Backoff for failed sends
    #[serde(default)]
    pub retry: RetryPolicy,
}

impl Default for EngineConfig {
    fn default() -> Self {
        let now = Utc::now();
        EngineConfig {
            metadata: ConfigMetadata {
                version: "1.0".to_string(),
                created_at: now,
                updated_at: now,
            },
            thresholds: CompromiseThresholds::default(),
            sample_bounds: SampleBounds::default(),
            sync: SyncSettings::default(),
            logging: LogConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Load configuration from TOML file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read config file: {}", path.as_ref().display()))?;

        let config: EngineConfig =
            toml::from_str(&content).with_context(|| "Failed to parse TOML configuration")?;

        config.validate()?;
        Ok(config)
    }

    /// Save configuration to TOML file
    pub fn save_to_file<P: AsRef<Path>>(&mut self, path: P) -> Result<()> {
        self.metadata.updated_at = Utc::now();

        if let Some(parent) = path.as_ref().parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }

        let toml_content = toml::to_string_pretty(self)
            .with_context(|| "Failed to serialize configuration to TOML")?;

        fs::write(&path, toml_content)
            .with_context(|| format!("Failed to write config file: {}", path.as_ref().display()))?;

        Ok(())
    }

    /// Get default configuration file path
    pub fn default_config_path() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".hybridrs")
            .join("config.toml")
    }

    /// Load configuration with fallback to defaults
    pub fn load_or_default() -> Self {
        let config_path = Self::default_config_path();

        match Self::load_from_file(&config_path) {
            Ok(config) => config,
            Err(e) => {
                tracing::debug!(
                    path = %config_path.display(),
                    error = %e,
                    "Using default configuration"
                );
                Self::default()
            }
        }
    }

    pub fn save_default(&mut self) -> Result<()> {
        let config_path = Self::default_config_path();
        self.save_to_file(config_path)
    }

    /// Reject settings the engine cannot run with
    pub fn validate(&self) -> Result<()> {
        let bounds = &self.sample_bounds;
        if bounds.min_heart_rate >= bounds.max_heart_rate {
            anyhow::bail!(
                "sample_bounds: min_heart_rate ({}) must be below max_heart_rate ({})",
                bounds.min_heart_rate,
                bounds.max_heart_rate
            );
        }
        let retry = &self.sync.retry;
        if retry.multiplier < 1.0 {
            anyhow::bail!("sync.retry: multiplier must be at least 1.0");
        }
        if retry.initial_delay_ms > retry.max_delay_ms {
            anyhow::bail!("sync.retry: initial_delay_ms exceeds max_delay_ms");
        }
        Ok(())
    }

    /// The part of the configuration a session needs
    pub fn session_settings(&self) -> SessionSettings {
        SessionSettings {
            thresholds: self.thresholds.clone(),
            sample_bounds: self.sample_bounds.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_config_serialization() {
        let config = EngineConfig::default();
        let toml_str = toml::to_string(&config).unwrap();
        let deserialized: EngineConfig = toml::from_str(&toml_str).unwrap();

        assert_eq!(config, deserialized);
        assert_eq!(deserialized.thresholds.heart_rate_margin_bpm, 5);
        assert_eq!(deserialized.sync.driver, DeviceRole::Wrist);
        assert_eq!(deserialized.sync.driver.peer(), DeviceRole::Phone);
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let toml_str = r#"
            [metadata]
            version = "1.0"
            created_at = "2024-01-01T00:00:00Z"
            updated_at = "2024-01-01T00:00:00Z"

            [thresholds]
            heart_rate_margin_bpm = 8
            pace_tolerance_secs_per_km = 10
            flag_fast_pace = true

            [sync]
            driver = "phone"
        "#;
        let config: EngineConfig = toml::from_str(toml_str).unwrap();

        assert_eq!(config.thresholds.heart_rate_margin_bpm, 8);
        assert!(config.thresholds.flag_fast_pace);
        assert_eq!(config.sync.driver, DeviceRole::Phone);
        assert_eq!(config.sync.retry, RetryPolicy::default());
        assert_eq!(config.sample_bounds, SampleBounds::default());
    }

    #[test]
    fn test_config_file_io() {
        let temp_dir = tempdir().unwrap();
        let config_path = temp_dir.path().join("nested").join("config.toml");

        let mut original = EngineConfig::default();
        original.thresholds.pace_tolerance_secs_per_km = 20;
        original.sync.retry.max_attempts = Some(12);

        original.save_to_file(&config_path).unwrap();
        let loaded = EngineConfig::load_from_file(&config_path).unwrap();

        assert_eq!(loaded.thresholds.pace_tolerance_secs_per_km, 20);
        assert_eq!(loaded.sync.retry.max_attempts, Some(12));
        assert_eq!(loaded.session_settings().thresholds, loaded.thresholds);
    }

    #[test]
    fn test_invalid_bounds_rejected() {
        let mut config = EngineConfig::default();
        config.sample_bounds.min_heart_rate = 200;
        config.sample_bounds.max_heart_rate = 100;
        assert!(config.validate().is_err());

        let mut config = EngineConfig::default();
        config.sync.retry.multiplier = 0.5;
        assert!(config.validate().is_err());
    }
}
