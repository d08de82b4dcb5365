//! Configuration Loader
//!
//! Environment-aware configuration loading. Defaults are layered under an
//! optional base TOML file, an optional per-environment TOML file and finally
//! `DELIVERY_STATES__` prefixed environment variables.

use super::error::{ConfigResult, ConfigurationError};
use super::StatesConfig;
use ::config::{Config, Environment, File};
use std::env;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

const BASE_FILE_STEM: &str = "delivery-states";
const ENV_PREFIX: &str = "DELIVERY_STATES";

/// Loaded configuration plus the context it was loaded from
#[derive(Debug)]
pub struct ConfigManager {
    config: StatesConfig,
    environment: String,
    config_directory: PathBuf,
}

impl ConfigManager {
    /// Load configuration with environment auto-detection
    pub fn load() -> ConfigResult<Arc<ConfigManager>> {
        Self::load_from_directory(None)
    }

    /// Load configuration from a specific directory
    pub fn load_from_directory(config_dir: Option<PathBuf>) -> ConfigResult<Arc<ConfigManager>> {
        let environment = Self::detect_environment();
        Self::load_from_directory_with_env(config_dir, &environment)
    }

    /// Load configuration from a specific directory with explicit environment
    pub fn load_from_directory_with_env(
        config_dir: Option<PathBuf>,
        environment: &str,
    ) -> ConfigResult<Arc<ConfigManager>> {
        let config_directory = config_dir.unwrap_or_else(|| PathBuf::from("config"));

        debug!(
            environment = %environment,
            directory = %config_directory.display(),
            "Loading delivery states configuration"
        );

        let config = Self::load_and_merge_config(&config_directory, environment)?;
        config.validate()?;

        debug!(
            environment = %environment,
            analysis_max_minutes = config.analysis.max_time_duration_minutes,
            summary_fetch_attempts = config.analysis.summary_fetch_attempts,
            "✅ Configuration loaded successfully"
        );

        Ok(Arc::new(ConfigManager {
            config,
            environment: environment.to_string(),
            config_directory,
        }))
    }

    /// Wrap an already built configuration, validating it first
    pub fn from_config(config: StatesConfig) -> ConfigResult<Arc<ConfigManager>> {
        config.validate()?;
        Ok(Arc::new(ConfigManager {
            config,
            environment: Self::detect_environment(),
            config_directory: PathBuf::from("config"),
        }))
    }

    fn load_and_merge_config(directory: &Path, environment: &str) -> ConfigResult<StatesConfig> {
        let defaults = Config::try_from(&StatesConfig::default())?;
        let base_file = directory.join(format!("{BASE_FILE_STEM}.toml"));
        let env_file = directory.join(format!("{BASE_FILE_STEM}.{environment}.toml"));

        let merged = Config::builder()
            .add_source(defaults)
            .add_source(File::from(base_file.as_path()).required(false))
            .add_source(File::from(env_file.as_path()).required(false))
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .list_separator(",")
                    .with_list_parse_key("analysis.per_minute_cv_states")
                    .with_list_parse_key("analysis.ga_per_minute_cv_states")
                    .try_parsing(true),
            )
            .build()
            .map_err(|e| ConfigurationError::EnvironmentConfigError {
                environment: environment.to_string(),
                error: e.to_string(),
            })?;

        Ok(merged.try_deserialize()?)
    }

    /// Detect the current environment
    pub fn detect_environment() -> String {
        env::var("DELIVERY_STATES_ENV")
            .or_else(|_| env::var("APP_ENV"))
            .unwrap_or_else(|_| "development".to_string())
    }

    pub fn config(&self) -> &StatesConfig {
        &self.config
    }

    pub fn environment(&self) -> &str {
        &self.environment
    }

    pub fn config_directory(&self) -> &Path {
        &self.config_directory
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_missing_directory_yields_defaults() {
        let dir = TempDir::new().unwrap();
        let manager =
            ConfigManager::load_from_directory_with_env(Some(dir.path().join("absent")), "test")
                .unwrap();
        assert_eq!(manager.environment(), "test");
        assert_eq!(
            manager.config().analysis.log_host_batch_size,
            StatesConfig::default().analysis.log_host_batch_size
        );
    }

    #[test]
    fn test_environment_file_overrides_base() {
        let dir = TempDir::new().unwrap();
        fs::write(
            dir.path().join("delivery-states.toml"),
            "[analysis]\nsummary_fetch_attempts = 3\nsummary_fetch_backoff_ms = 1500\n",
        )
        .unwrap();
        fs::write(
            dir.path().join("delivery-states.staging.toml"),
            "[analysis]\nsummary_fetch_attempts = 7\n",
        )
        .unwrap();

        let manager =
            ConfigManager::load_from_directory_with_env(Some(dir.path().to_path_buf()), "staging")
                .unwrap();
        assert_eq!(manager.config().analysis.summary_fetch_attempts, 7);
        assert_eq!(manager.config().analysis.summary_fetch_backoff_ms, 1500);
    }

    #[test]
    fn test_invalid_file_value_is_rejected() {
        let dir = TempDir::new().unwrap();
        fs::write(
            dir.path().join("delivery-states.toml"),
            "[analysis]\nlog_host_batch_size = 0\n",
        )
        .unwrap();

        let result =
            ConfigManager::load_from_directory_with_env(Some(dir.path().to_path_buf()), "qa");
        assert!(matches!(
            result,
            Err(ConfigurationError::InvalidValue { .. })
        ));
    }
}
