//! Configuration loading for hachimi.
//!
//! Layered config: defaults -> config file -> env vars -> CLI flags.
//! The default config file lives at ~/.config/hachimi/config.toml.

use config::{Config, Environment, File};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::error::HachimiError;
use crate::resonance::ResonanceConfig;
use crate::scoring::HIGH_VALUE_SCORE;

/// Configuration for stratified candidate sampling.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SamplerConfig {
    /// Records scoring at or above this are drawn from the high-value stratum.
    #[serde(default = "default_high_value_threshold")]
    pub high_value_threshold: i64,

    /// Maximum keys sampled from each stratum.
    #[serde(default = "default_stratum_cap")]
    pub stratum_cap: usize,

    /// Items returned by a resonance selection when no count is given.
    #[serde(default = "default_selection_count")]
    pub default_count: usize,
}

fn default_high_value_threshold() -> i64 {
    HIGH_VALUE_SCORE
}

fn default_stratum_cap() -> usize {
    50
}

fn default_selection_count() -> usize {
    3
}

impl Default for SamplerConfig {
    fn default() -> Self {
        Self {
            high_value_threshold: default_high_value_threshold(),
            stratum_cap: default_stratum_cap(),
            default_count: default_selection_count(),
        }
    }
}

impl SamplerConfig {
    /// Validate configuration values.
    pub fn validate(&self) -> Result<(), String> {
        if self.stratum_cap == 0 {
            return Err("stratum_cap must be greater than 0".to_string());
        }
        Ok(())
    }
}

/// Main application settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Path to RocksDB storage directory
    #[serde(default = "default_db_path")]
    pub db_path: String,

    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Entries kept by the in-memory log hub
    #[serde(default = "default_log_capacity")]
    pub log_capacity: usize,

    #[serde(default)]
    pub resonance: ResonanceConfig,

    #[serde(default)]
    pub sampler: SamplerConfig,
}

fn default_db_path() -> String {
    ProjectDirs::from("", "", "hachimi")
        .map(|p| p.data_local_dir().join("db"))
        .unwrap_or_else(|| PathBuf::from("./data"))
        .to_string_lossy()
        .to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_capacity() -> usize {
    100
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            log_level: default_log_level(),
            log_capacity: default_log_capacity(),
            resonance: ResonanceConfig::default(),
            sampler: SamplerConfig::default(),
        }
    }
}

impl Settings {
    /// Load settings with layered precedence:
    /// 1. Built-in defaults
    /// 2. Config file (~/.config/hachimi/config.toml)
    /// 3. CLI-specified config file (optional)
    /// 4. Environment variables (HACHIMI_*)
    ///
    /// CLI flags should be applied by the caller after this returns.
    pub fn load(cli_config_path: Option<&str>) -> Result<Self, HachimiError> {
        let config_dir = ProjectDirs::from("", "", "hachimi")
            .map(|p| p.config_dir().to_path_buf())
            .unwrap_or_else(|| PathBuf::from("."));

        let default_config_path = config_dir.join("config");

        let mut builder = Config::builder()
            .set_default("db_path", default_db_path())
            .map_err(|e| HachimiError::Config(e.to_string()))?
            .set_default("log_level", default_log_level())
            .map_err(|e| HachimiError::Config(e.to_string()))?
            .set_default("log_capacity", default_log_capacity() as i64)
            .map_err(|e| HachimiError::Config(e.to_string()))?
            .add_source(File::with_name(&default_config_path.to_string_lossy()).required(false));

        if let Some(path) = cli_config_path {
            builder = builder.add_source(File::with_name(path).required(true));
        }

        // Format: HACHIMI_DB_PATH, HACHIMI_LOG_LEVEL, HACHIMI_SAMPLER__STRATUM_CAP
        builder = builder.add_source(
            Environment::with_prefix("HACHIMI")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let settings: Settings = builder
            .build()
            .map_err(|e| HachimiError::Config(e.to_string()))?
            .try_deserialize()
            .map_err(|e| HachimiError::Config(e.to_string()))?;

        settings.validate().map_err(HachimiError::Config)?;
        Ok(settings)
    }

    /// Validate all sections.
    pub fn validate(&self) -> Result<(), String> {
        if self.log_capacity == 0 {
            return Err("log_capacity must be greater than 0".to_string());
        }
        self.resonance.validate()?;
        self.sampler.validate()?;
        Ok(())
    }

    /// Expand ~ in db_path to actual home directory
    pub fn expanded_db_path(&self) -> PathBuf {
        if let Some(rest) = self.db_path.strip_prefix("~/") {
            if let Some(home) = directories::BaseDirs::new().map(|d| d.home_dir().to_path_buf()) {
                return home.join(rest);
            }
        }
        PathBuf::from(&self.db_path)
    }
}
