//! Layered daemon configuration.
//!
//! Sources, highest priority first:
//! 1. `ATTENDD_*` environment variables (a `.env` file is loaded first)
//! 2. the TOML file named by `ATTENDD_CONFIG`, or `./attendd.toml`
//! 3. built-in defaults

use crate::dates;
use chrono_tz::Tz;
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

const DEFAULT_CONFIG_FILE: &str = "attendd.toml";

fn default_timezone() -> String {
    "UTC".to_string()
}

fn default_log_level() -> String {
    "warn".to_string()
}

const fn default_max_sheet_days() -> usize {
    62
}

const fn default_max_commit_cells() -> usize {
    5000
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Configuration error: {0}")]
    Figment(#[from] Box<figment::Error>),

    #[error("Invalid configuration value for '{field}': {reason}")]
    InvalidValue { field: String, reason: String },
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AttendConfig {
    /// Workspace opened at startup, before any `workspace.select`.
    #[serde(default)]
    pub workspace: Option<PathBuf>,

    /// IANA zone in which wire dates are reduced to calendar dates.
    #[serde(default = "default_timezone")]
    pub timezone: String,

    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Longest date range an attendance sheet may span.
    #[serde(default = "default_max_sheet_days")]
    pub max_sheet_days: usize,

    #[serde(default = "default_max_commit_cells")]
    pub max_commit_cells: usize,
}

impl Default for AttendConfig {
    fn default() -> Self {
        Self {
            workspace: None,
            timezone: default_timezone(),
            log_level: default_log_level(),
            max_sheet_days: default_max_sheet_days(),
            max_commit_cells: default_max_commit_cells(),
        }
    }
}

impl AttendConfig {
    pub fn load() -> Result<Self, ConfigError> {
        let config: Self = Self::figment().extract().map_err(Box::new)?;
        config.validate()?;
        Ok(config)
    }

    /// Loads `.env` from the current directory, then [`AttendConfig::load`].
    pub fn load_with_dotenv() -> Result<Self, ConfigError> {
        let _ = dotenvy::dotenv();
        Self::load()
    }

    pub fn figment() -> Figment {
        let file = std::env::var("ATTENDD_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG_FILE));
        Figment::from(Serialized::defaults(Self::default()))
            .merge(Toml::file(file))
            .merge(Env::prefixed("ATTENDD_").ignore(&["config", "log"]))
    }

    pub fn tz(&self) -> Result<Tz, ConfigError> {
        dates::parse_timezone(&self.timezone).map_err(|reason| ConfigError::InvalidValue {
            field: "timezone".to_string(),
            reason,
        })
    }

    fn validate(&self) -> Result<(), ConfigError> {
        self.tz()?;
        if self.max_sheet_days == 0 {
            return Err(ConfigError::InvalidValue {
                field: "max_sheet_days".to_string(),
                reason: "must be at least 1".to_string(),
            });
        }
        if self.max_commit_cells == 0 {
            return Err(ConfigError::InvalidValue {
                field: "max_commit_cells".to_string(),
                reason: "must be at least 1".to_string(),
            });
        }
        Ok(())
    }
}
