use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use thiserror::Error;

use crate::database::default_database_file;
use crate::logging::default_log_level;
use crate::models::ColorTag;
use crate::utils;

/// Current configuration version
pub const CURRENT_CONFIG_VERSION: u32 = 1;

/// Upper bound for `default_block_minutes`: a dropped block never outlasts a day.
pub const MINUTES_PER_DAY: i64 = 24 * 60;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_database_path")]
    pub database_path: String,
    /// Identity presented to the planner core for every command
    #[serde(default = "default_user")]
    pub user: String,
    /// Falls back to the build-mode default when unset
    #[serde(default)]
    pub log_level: Option<String>,
    #[serde(default = "default_log_dir")]
    pub log_dir: String,
    #[serde(default)]
    pub default_color: ColorTag,
    /// Length of a block created by dropping an item on a time slot
    #[serde(default = "default_block_minutes")]
    pub default_block_minutes: i64,
    #[serde(default = "default_config_version")]
    pub config_version: Option<u32>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
            user: default_user(),
            log_level: None,
            log_dir: default_log_dir(),
            default_color: ColorTag::default(),
            default_block_minutes: default_block_minutes(),
            config_version: Some(CURRENT_CONFIG_VERSION),
        }
    }
}

// Default value functions
fn default_database_path() -> String {
    default_database_path_for_profile(utils::Profile::Prod)
}

fn default_log_dir() -> String {
    default_log_dir_for_profile(utils::Profile::Prod)
}

fn default_user() -> String {
    utils::os_user().unwrap_or_else(|| "local".to_string())
}

fn default_block_minutes() -> i64 {
    60
}

fn default_config_version() -> Option<u32> {
    Some(CURRENT_CONFIG_VERSION)
}

fn fallback_data_dir(profile: utils::Profile) -> PathBuf {
    utils::get_data_dir(profile).unwrap_or_else(|| {
        let name = match profile {
            utils::Profile::Dev => "dayplan-dev",
            utils::Profile::Prod => "dayplan",
        };
        utils::expand_path(&format!("~/.local/share/{name}"))
    })
}

fn default_database_path_for_profile(profile: utils::Profile) -> String {
    default_database_file(&fallback_data_dir(profile))
        .to_string_lossy()
        .to_string()
}

fn default_log_dir_for_profile(profile: utils::Profile) -> String {
    fallback_data_dir(profile)
        .join("logs")
        .to_string_lossy()
        .to_string()
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config directory: {0}")]
    ConfigDirError(String),
    #[error("Failed to read config file: {0}")]
    ReadError(String),
    #[error("Failed to parse TOML: {0}")]
    ParseError(#[from] toml::de::Error),
    #[error("Failed to write config file: {0}")]
    WriteError(String),
    #[error("Invalid config value: {0}")]
    InvalidValue(String),
}

impl Config {
    /// Load configuration from file, or create default if missing
    /// Uses the provided profile to determine config, database and log paths
    pub fn load_with_profile(profile: utils::Profile) -> Result<Self, ConfigError> {
        let config_path = Self::get_config_path(profile)?;

        if config_path.exists() {
            let contents = fs::read_to_string(&config_path)
                .map_err(|e| ConfigError::ReadError(e.to_string()))?;
            let config = Self::from_toml(&contents)?;
            Ok(config)
        } else {
            let mut config = Self::defaults_for_profile(profile);
            config.save_with_profile(profile)?;
            Ok(config)
        }
    }

    /// Defaults with database and log paths placed in the profile's data dir
    pub fn defaults_for_profile(profile: utils::Profile) -> Self {
        Self {
            database_path: default_database_path_for_profile(profile),
            log_dir: default_log_dir_for_profile(profile),
            ..Self::default()
        }
    }

    /// Parse and validate a TOML document; missing keys take their defaults
    pub fn from_toml(contents: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.user.trim().is_empty() {
            return Err(ConfigError::InvalidValue("user cannot be empty".to_string()));
        }
        if !(1..=MINUTES_PER_DAY).contains(&self.default_block_minutes) {
            return Err(ConfigError::InvalidValue(format!(
                "default_block_minutes must be between 1 and {}, got {}",
                MINUTES_PER_DAY, self.default_block_minutes
            )));
        }
        Ok(())
    }

    /// Save configuration to file
    pub fn save_with_profile(&mut self, profile: utils::Profile) -> Result<(), ConfigError> {
        self.config_version = Some(CURRENT_CONFIG_VERSION);

        let config_path = Self::get_config_path(profile)?;

        if let Some(parent) = config_path.parent() {
            fs::create_dir_all(parent).map_err(|e| ConfigError::WriteError(e.to_string()))?;
        }

        let toml_string = toml::to_string_pretty(self)
            .map_err(|e| ConfigError::WriteError(format!("Failed to serialize config: {}", e)))?;

        fs::write(&config_path, toml_string).map_err(|e| ConfigError::WriteError(e.to_string()))?;

        Ok(())
    }

    /// Get the path to the config file
    pub fn get_config_path(profile: utils::Profile) -> Result<PathBuf, ConfigError> {
        let config_dir = utils::get_config_dir(profile).ok_or_else(|| {
            ConfigError::ConfigDirError("Could not determine config directory".to_string())
        })?;
        Ok(config_dir.join("config.toml"))
    }

    /// Get the expanded database path (with ~ expansion)
    pub fn get_database_path(&self) -> PathBuf {
        utils::expand_path(&self.database_path)
    }

    /// Get the expanded log directory (with ~ expansion)
    pub fn get_log_dir(&self) -> PathBuf {
        utils::expand_path(&self.log_dir)
    }

    /// Configured log level, or the build-mode default
    pub fn effective_log_level(&self) -> &str {
        self.log_level
            .as_deref()
            .filter(|level| !level.trim().is_empty())
            .unwrap_or_else(|| default_log_level())
    }
}
