//! # Configuration Module
//!
//! Loads the tuning knobs of the engine, the runtime clock and the listening
//! session from a JSON file in the platform configuration directory:
//!
//! - Linux: `~/.config/fieldplay/config.json`
//! - macOS: `~/Library/Application Support/fieldplay/config.json`
//! - Windows: `%APPDATA%\fieldplay\config.json`
//!
//! Every field has a default, so the file is optional and may list only the
//! values it overrides:
//!
//! ```json
//! { "engine": { "recency_strength": 0.5 }, "session": { "shuffle": true } }
//! ```

use crate::clock::ClockConfig;
use crate::engine::EngineConfig;
use crate::session::SessionConfig;
use anyhow::{Context, Result};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Complete application configuration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub engine: EngineConfig,
    pub clock: ClockConfig,
    pub session: SessionConfig,
}

/// Returns the platform-appropriate configuration file path.
///
/// The directory is not created; use [`AppConfig::save_to`] for that.
///
/// # Errors
///
/// Returns an error if the system configuration directory cannot be determined.
pub fn config_path() -> Result<PathBuf> {
    let config_dir = dirs::config_dir().ok_or_else(|| {
        anyhow::anyhow!(
            "Could not determine system config directory. \
             Please ensure your platform supports standard config directories."
        )
    })?;
    Ok(config_dir.join("fieldplay").join("config.json"))
}

impl AppConfig {
    /// Load the configuration from [`config_path`].
    ///
    /// A missing file yields the defaults. A file that cannot be read or
    /// parsed is reported with a warning and also yields the defaults.
    #[must_use]
    pub fn load() -> Self {
        let path = match config_path() {
            Ok(path) => path,
            Err(e) => {
                warn!("{e:#}. Using defaults.");
                return Self::default();
            }
        };
        if !path.exists() {
            debug!("No config file at {}, using defaults", path.display());
            return Self::default();
        }
        match Self::load_from(&path) {
            Ok(config) => {
                info!("Loaded config from {}", path.display());
                config
            }
            Err(e) => {
                warn!("{e:#}. Using defaults.");
                Self::default()
            }
        }
    }

    /// Load the configuration from `path`.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, is not valid configuration
    /// JSON, or holds settings outside their valid ranges.
    pub fn load_from(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let config: Self = serde_json::from_str(&contents)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;
        config
            .validate()
            .with_context(|| format!("Invalid settings in config file {}", path.display()))?;
        Ok(config)
    }

    /// Check every section.
    ///
    /// # Errors
    ///
    /// Returns an error naming the first setting that is out of range.
    pub fn validate(&self) -> Result<()> {
        self.engine.validate()?;
        self.clock.validate()?;
        anyhow::ensure!(
            (0.0..=1.0).contains(&self.session.initial_volume),
            "session.initial_volume must lie in [0, 1], got {}",
            self.session.initial_volume
        );
        Ok(())
    }

    /// Write the configuration to `path` as pretty JSON, creating parent directories.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory or the file cannot be written.
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!(
                    "Failed to create config directory at {}. Please check file permissions.",
                    parent.display()
                )
            })?;
        }
        let json = self.to_json()?;
        fs::write(path, json)
            .with_context(|| format!("Failed to write config file {}", path.display()))?;
        info!("Wrote config to {}", path.display());
        Ok(())
    }

    /// Pretty JSON rendering of the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).context("Failed to serialize configuration")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_config_path_ends_with_app_file() {
        if let Ok(path) = config_path() {
            assert!(path.ends_with("fieldplay/config.json"));
        }
    }

    #[test]
    fn test_partial_file_keeps_other_defaults() {
        let dir = TempDir::new().expect("temp dir");
        let path = dir.path().join("config.json");
        fs::write(
            &path,
            r#"{"engine": {"recency_strength": 0.5}, "clock": {"time_scale": 2.0}}"#,
        )
        .expect("write config");

        let config = AppConfig::load_from(&path).expect("valid config");
        assert_eq!(config.engine.recency_strength, 0.5);
        assert_eq!(config.engine.history_length, EngineConfig::default().history_length);
        assert_eq!(config.clock.time_scale, 2.0);
        assert_eq!(config.clock.tick_interval_ms, 1000);
        assert_eq!(config.session, SessionConfig::default());
    }

    #[test]
    fn test_invalid_file_is_an_error() {
        let dir = TempDir::new().expect("temp dir");
        let path = dir.path().join("config.json");
        fs::write(&path, "{ not json").expect("write config");
        let err = AppConfig::load_from(&path).expect_err("invalid config");
        assert!(format!("{err:#}").contains("Failed to parse config file"));
        assert!(AppConfig::load_from(&dir.path().join("absent.json")).is_err());
    }

    #[test]
    fn test_defaults_are_valid() {
        assert!(AppConfig::default().validate().is_ok());
    }

    #[test]
    fn test_out_of_range_settings_are_rejected() {
        let dir = TempDir::new().expect("temp dir");
        let cases = [
            (r#"{"engine": {"jitter_min": 1.2, "jitter_max": 0.8}}"#, "engine.jitter_min"),
            (r#"{"engine": {"jitter_min": 1.0, "jitter_max": 1.0}}"#, "engine.jitter_min"),
            (r#"{"engine": {"min_weight": 5.0, "max_weight": 0.1}}"#, "engine.min_weight"),
            (r#"{"engine": {"history_length": 18446744073709551615}}"#, "engine.history_length"),
            (r#"{"engine": {"probability_floor": 0.0}}"#, "engine.probability_floor"),
            (r#"{"engine": {"feedback": {"skip": -0.6}}}"#, "engine.feedback.skip"),
            (r#"{"clock": {"tick_interval_ms": 0}}"#, "clock.tick_interval_ms"),
            (r#"{"session": {"initial_volume": 1.5}}"#, "session.initial_volume"),
        ];
        for (i, (json, setting)) in cases.iter().enumerate() {
            let path = dir.path().join(format!("config-{i}.json"));
            fs::write(&path, json).expect("write config");
            let err = AppConfig::load_from(&path).expect_err("out-of-range config");
            let message = format!("{err:#}");
            assert!(message.contains("Invalid settings in config file"), "{message}");
            assert!(message.contains(setting), "{json}: {message}");
        }
    }

    #[test]
    fn test_save_then_load_matches() {
        let dir = TempDir::new().expect("temp dir");
        let path = dir.path().join("nested").join("config.json");
        let mut config = AppConfig::default();
        config.session.shuffle = true;
        config.engine.feedback.skip = 0.5;

        config.save_to(&path).expect("save config");
        assert_eq!(AppConfig::load_from(&path).expect("load config"), config);
    }
}
