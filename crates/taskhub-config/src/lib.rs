//! # taskhub-config
//!
//! Layered configuration loading for the Taskhub backend using figment.
//!
//! Configuration sources (in priority order, highest wins):
//! 1. Environment variables (`TASKHUB_*` prefix, `__` as separator)
//! 2. Project-level `.taskhub/config.toml`
//! 3. User-level `~/.config/taskhub/config.toml`
//! 4. Built-in defaults
//!
//! # Environment Variable Mapping
//!
//! Figment maps `TASKHUB_DATABASE__URL` -> `database.url`,
//! `TASKHUB_GENERAL__ENVIRONMENT` -> `general.environment`, etc.
//! The `__` (double underscore) separates nested config sections.
//!
//! # Usage
//!
//! ```no_run
//! use taskhub_config::TaskhubConfig;
//!
//! let config = TaskhubConfig::load_with_dotenv().expect("config");
//! config.validate().expect("valid config");
//!
//! println!("retry budget: {}", config.max_retries());
//! ```

mod database;
mod error;
mod general;
mod health;
mod retry;
mod server;

pub use database::DatabaseConfig;
pub use error::ConfigError;
pub use general::{Environment, GeneralConfig};
pub use health::HealthSettings;
pub use retry::{DEFAULT_MAX_RETRIES, PRODUCTION_MAX_RETRIES, RetrySettings};
pub use server::ServerConfig;

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct TaskhubConfig {
    #[serde(default)]
    pub general: GeneralConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub retry: RetrySettings,
    #[serde(default)]
    pub health: HealthSettings,
    #[serde(default)]
    pub server: ServerConfig,
}

impl TaskhubConfig {
    /// Load configuration from all sources (TOML files + environment variables).
    ///
    /// Does NOT call `dotenvy` -- use [`Self::load_with_dotenv`] if you need
    /// `.env` file loading.
    pub fn load() -> Result<Self, ConfigError> {
        Self::figment().extract().map_err(ConfigError::from)
    }

    /// Load configuration after reading `.env` from the current directory
    /// or its ancestors. A missing `.env` is not an error.
    pub fn load_with_dotenv() -> Result<Self, ConfigError> {
        let _ = dotenvy::dotenv();
        Self::load()
    }

    /// Build the figment provider chain.
    ///
    /// Public so tests and the binary can layer extra providers on top.
    pub fn figment() -> Figment {
        let mut figment = Figment::from(Serialized::defaults(Self::default()));

        if let Some(global_path) = Self::global_config_path() {
            if global_path.exists() {
                figment = figment.merge(Toml::file(global_path));
            }
        }

        let local_path = PathBuf::from(".taskhub/config.toml");
        if local_path.exists() {
            figment = figment.merge(Toml::file(local_path));
        }

        figment.merge(Env::prefixed("TASKHUB_").split("__"))
    }

    /// Attempt budget for the safe executors in the configured environment.
    pub fn max_retries(&self) -> u32 {
        self.retry.max_retries_for(self.general.is_production())
    }

    /// Reject values the connection-resilience layer cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.database.url.is_empty() {
            return Err(ConfigError::NotConfigured {
                section: "database".into(),
            });
        }
        if !self.database.is_configured() {
            return Err(ConfigError::InvalidValue {
                field: "database.auth_token".into(),
                reason: "remote database URLs require an auth token".into(),
            });
        }
        if self.max_retries() == 0 {
            return Err(ConfigError::InvalidValue {
                field: "retry.max_retries".into(),
                reason: "must allow at least one attempt".into(),
            });
        }
        if self.health.error_threshold == 0 {
            return Err(ConfigError::InvalidValue {
                field: "health.error_threshold".into(),
                reason: "must be at least 1".into(),
            });
        }
        if self.health.check_interval_ms == 0 {
            return Err(ConfigError::InvalidValue {
                field: "health.check_interval_ms".into(),
                reason: "must be greater than zero".into(),
            });
        }
        Ok(())
    }

    fn global_config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("taskhub").join("config.toml"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use figment::Jail;
    use pretty_assertions::assert_eq;

    #[test]
    fn default_config_loads() {
        let config = TaskhubConfig::default();
        assert_eq!(config.general.environment, Environment::Development);
        assert_eq!(config.max_retries(), 3);
        assert_eq!(config.database.url, "taskhub.db");
        assert_eq!(config.server.port, 4000);
        config.validate().unwrap();
    }

    #[test]
    fn production_env_raises_retry_budget() {
        Jail::expect_with(|jail| {
            jail.set_env("TASKHUB_GENERAL__ENVIRONMENT", "production");
            let config = TaskhubConfig::load().map_err(|e| e.to_string())?;
            assert!(config.general.is_production());
            assert_eq!(config.max_retries(), 5);
            Ok(())
        });
    }

    #[test]
    fn env_overrides_project_file() {
        Jail::expect_with(|jail| {
            std::fs::create_dir(jail.directory().join(".taskhub"))
                .map_err(|e| e.to_string())?;
            jail.create_file(
                ".taskhub/config.toml",
                r#"
                [database]
                url = "project.db"

                [health]
                error_threshold = 5
                "#,
            )?;
            jail.set_env("TASKHUB_DATABASE__URL", "env.db");

            let config = TaskhubConfig::load().map_err(|e| e.to_string())?;
            assert_eq!(config.database.url, "env.db");
            assert_eq!(config.health.error_threshold, 5);
            assert_eq!(config.health.reset_cooldown_ms, 30_000);
            Ok(())
        });
    }

    #[test]
    fn dotenv_in_working_directory_is_loaded() {
        Jail::expect_with(|jail| {
            // Registers the key with the jail so it is removed on drop, then
            // clears it so `.env` can set it.
            jail.set_env("TASKHUB_DATABASE__AUTH_TOKEN", "unset");
            jail.clear_env();
            jail.create_file(".env", "TASKHUB_DATABASE__AUTH_TOKEN=dotenv-token\n")?;

            let config = TaskhubConfig::load_with_dotenv().map_err(|e| e.to_string())?;
            assert_eq!(config.database.auth_token, "dotenv-token");
            Ok(())
        });
    }

    #[test]
    fn missing_dotenv_is_not_an_error() {
        Jail::expect_with(|jail| {
            jail.clear_env();
            let config = TaskhubConfig::load_with_dotenv().map_err(|e| e.to_string())?;
            assert_eq!(config.database.url, "taskhub.db");
            Ok(())
        });
    }

    #[test]
    fn validate_rejects_zero_retries() {
        let mut config = TaskhubConfig::default();
        config.retry.max_retries = Some(0);
        let err = config.validate().unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { ref field, .. } if field == "retry.max_retries"));
    }

    #[test]
    fn validate_rejects_remote_without_token() {
        let mut config = TaskhubConfig::default();
        config.database.url = "libsql://taskhub-prod.turso.io".into();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidValue { .. })
        ));
    }

    #[test]
    fn validate_rejects_empty_url() {
        let mut config = TaskhubConfig::default();
        config.database.url.clear();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::NotConfigured { .. })
        ));
    }
}
