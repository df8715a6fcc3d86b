//! # wm-config
//!
//! Layered configuration loading for Waymark using figment.
//!
//! Configuration sources (in priority order, highest wins):
//! 1. Environment variables (`WAYMARK_*` prefix, `__` as separator)
//! 2. Project-level `.waymark/config.toml`
//! 3. User-level `~/.config/waymark/config.toml`
//! 4. Built-in defaults
//!
//! # Environment Variable Mapping
//!
//! Figment maps `WAYMARK_SYNC__CHECKPOINT_MAX_AGE_SECS` -> `sync.checkpoint_max_age_secs`
//! and `WAYMARK_CONFLICTS__STRATEGIES__TITLE` -> `conflicts.strategies.title`.
//!
//! # Usage
//!
//! ```no_run
//! use wm_config::WaymarkConfig;
//!
//! let config = WaymarkConfig::load_with_dotenv().expect("config");
//! println!("database: {}", config.database.path);
//! ```

mod conflicts;
mod database;
mod error;
mod sync;

pub use conflicts::ConflictConfig;
pub use database::DatabaseConfig;
pub use error::ConfigError;
pub use sync::SyncConfig;

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct WaymarkConfig {
    #[serde(default)]
    pub sync: SyncConfig,
    #[serde(default)]
    pub conflicts: ConflictConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
}

impl WaymarkConfig {
    /// Load configuration from all sources (TOML files + environment variables).
    ///
    /// Does NOT call `dotenvy` -- use [`Self::load_with_dotenv`] if you need `.env` file loading.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if a source cannot be parsed or a value is out of range.
    pub fn load() -> Result<Self, ConfigError> {
        Self::from_figment(&Self::figment())
    }

    /// Load configuration with `.env` file support.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if a source cannot be parsed or a value is out of range.
    pub fn load_with_dotenv() -> Result<Self, ConfigError> {
        Self::load_dotenv_from_workspace();
        Self::load()
    }

    /// Extract and validate a config from an arbitrary figment.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if extraction or validation fails.
    pub fn from_figment(figment: &Figment) -> Result<Self, ConfigError> {
        let config: Self = figment.extract()?;
        config.validate()?;
        Ok(config)
    }

    /// Build the figment provider chain.
    ///
    /// Public so tests can inspect the figment or layer extra providers on top.
    #[must_use]
    pub fn figment() -> Figment {
        let mut figment = Figment::from(Serialized::defaults(Self::default()));

        // Layer 1: User-global config
        if let Some(global_path) = Self::global_config_path() {
            if global_path.exists() {
                figment = figment.merge(Toml::file(global_path));
            }
        }

        // Layer 2: Project-local config
        let local_path = PathBuf::from(".waymark/config.toml");
        if local_path.exists() {
            figment = figment.merge(Toml::file(local_path));
        }

        // Layer 3: Environment variables (highest priority)
        figment.merge(Env::prefixed("WAYMARK_").split("__"))
    }

    /// Reject values the sync engine cannot work with.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidValue` naming the offending field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.sync.checkpoint_max_age_secs == 0 {
            return Err(ConfigError::InvalidValue {
                field: "sync.checkpoint_max_age_secs".into(),
                reason: "must be greater than zero".into(),
            });
        }
        if self.sync.history_limit == 0 {
            return Err(ConfigError::InvalidValue {
                field: "sync.history_limit".into(),
                reason: "must be greater than zero".into(),
            });
        }
        if self.database.path.trim().is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "database.path".into(),
                reason: "must not be empty".into(),
            });
        }
        Ok(())
    }

    /// Path to the user-global config file.
    fn global_config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("waymark").join("config.toml"))
    }

    /// Load `.env` from the workspace root.
    ///
    /// Walks up from `CARGO_MANIFEST_DIR` (if available), then falls back to
    /// the current directory. Silently does nothing if no `.env` is found.
    fn load_dotenv_from_workspace() {
        if let Ok(manifest_dir) = std::env::var("CARGO_MANIFEST_DIR") {
            let mut dir = PathBuf::from(manifest_dir);
            // crate -> crates/ -> workspace root
            for _ in 0..3 {
                let env_path = dir.join(".env");
                if env_path.exists() {
                    let _ = dotenvy::from_path(&env_path);
                    return;
                }
                if !dir.pop() {
                    break;
                }
            }
        }

        let _ = dotenvy::dotenv();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_loads() {
        let config = WaymarkConfig::default();
        assert_eq!(config.sync.checkpoint_max_age_secs, 3600);
        assert!(!config.conflicts.has_overrides());
        assert_eq!(config.database.path, ".waymark/waymark.db");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn figment_builds_without_files() {
        figment::Jail::expect_with(|_jail| {
            let config = WaymarkConfig::from_figment(&WaymarkConfig::figment())
                .expect("should extract defaults");
            assert_eq!(config.sync.history_limit, 10);
            assert!(!config.database.is_in_memory());
            Ok(())
        });
    }

    #[test]
    fn zero_max_age_is_rejected() {
        let mut config = WaymarkConfig::default();
        config.sync.checkpoint_max_age_secs = 0;
        let err = config.validate().unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { ref field, .. } if field == "sync.checkpoint_max_age_secs"));
    }
}
