//! # Delivery States Configuration
//!
//! Typed configuration for step dispatch, execution timeouts, verification
//! analysis and logging.
//!
//! ## Architecture
//!
//! - **Defaults first**: every field has a default so an empty environment
//!   produces a working configuration
//! - **Layered overrides**: `config/delivery-states.toml`, then
//!   `config/delivery-states.<env>.toml`, then `DELIVERY_STATES__*` variables
//! - **Explicit validation**: [`StatesConfig::validate`] rejects values the
//!   orchestrator cannot honor
//!
//! ## Usage
//!
//! ```rust,no_run
//! use delivery_states::config::ConfigManager;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let manager = ConfigManager::load()?;
//! let batch = manager.config().analysis.log_host_batch_size;
//! # let _ = batch;
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod loader;

use crate::constants::system;
use serde::{Deserialize, Serialize};
use std::time::Duration;

pub use error::{ConfigResult, ConfigurationError};
pub use loader::ConfigManager;

/// Root configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StatesConfig {
    pub dispatch: DispatchConfig,
    pub execution: ExecutionConfig,
    pub analysis: AnalysisConfig,
    pub logging: LoggingConfig,
}

/// Task dispatch timeouts
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    /// Timeout stamped on async task descriptors that do not set their own
    pub default_task_timeout_ms: u64,
    /// Upper bound for `submit_blocking` calls
    pub blocking_timeout_ms: u64,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            default_task_timeout_ms: 10 * 60 * 1000,
            blocking_timeout_ms: 2 * system::DEFAULT_TILLER_CONNECTION_TIMEOUT_MILLIS,
        }
    }
}

impl DispatchConfig {
    pub fn blocking_timeout(&self) -> Duration {
        Duration::from_millis(self.blocking_timeout_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutionConfig {
    /// Lifetime of a step instance when its step type declares no timeout
    pub default_state_timeout_ms: u64,
    /// Responses held for wait ids whose step has not registered yet
    pub early_response_buffer_size: usize,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            default_state_timeout_ms: system::DEFAULT_STATE_TIMEOUT_MILLIS,
            early_response_buffer_size: system::EARLY_RESPONSE_BUFFER_SIZE,
        }
    }
}

/// Verification analysis limits and per-minute allowlists
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    pub max_time_duration_minutes: u32,
    pub log_host_batch_size: usize,
    pub max_sampling_size_per_group: usize,
    /// Reads of the analysis summary before giving up
    pub summary_fetch_attempts: u32,
    pub summary_fetch_backoff_ms: u64,
    pub timeout_buffer_minutes: u32,
    /// Step types eligible for per-minute collection behind the feature flag
    pub per_minute_cv_states: Vec<String>,
    /// Step types eligible for per-minute collection unconditionally
    pub ga_per_minute_cv_states: Vec<String>,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            max_time_duration_minutes: system::MAX_ANALYSIS_DURATION_MINUTES,
            log_host_batch_size: system::LOG_HOST_BATCH_SIZE,
            max_sampling_size_per_group: system::MAX_SAMPLING_SIZE_PER_GROUP,
            summary_fetch_attempts: 5,
            summary_fetch_backoff_ms: 2000,
            timeout_buffer_minutes: system::ANALYSIS_TIMEOUT_BUFFER_MINUTES,
            per_minute_cv_states: vec!["SUMO".to_string(), "ELK".to_string()],
            ga_per_minute_cv_states: vec![
                "APP_DYNAMICS".to_string(),
                "NEW_RELIC".to_string(),
                "CLOUD_WATCH".to_string(),
            ],
        }
    }
}

impl AnalysisConfig {
    pub fn summary_fetch_backoff(&self) -> Duration {
        Duration::from_millis(self.summary_fetch_backoff_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// `EnvFilter` directive used when `RUST_LOG` is unset
    pub level: String,
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

impl StatesConfig {
    /// Validate configuration values
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if self.dispatch.blocking_timeout_ms == 0 {
            return Err(ConfigurationError::invalid_value(
                "dispatch.blocking_timeout_ms",
                "0",
                "blocking calls must be bounded by a positive timeout",
            ));
        }

        if self.execution.default_state_timeout_ms == 0 {
            return Err(ConfigurationError::invalid_value(
                "execution.default_state_timeout_ms",
                "0",
                "state timeout must be greater than 0",
            ));
        }

        let analysis = &self.analysis;
        if analysis.max_time_duration_minutes == 0
            || analysis.max_time_duration_minutes > system::MAX_ANALYSIS_DURATION_MINUTES
        {
            return Err(ConfigurationError::invalid_value(
                "analysis.max_time_duration_minutes",
                analysis.max_time_duration_minutes.to_string(),
                format!(
                    "must be between 1 and {}",
                    system::MAX_ANALYSIS_DURATION_MINUTES
                ),
            ));
        }

        if analysis.log_host_batch_size == 0 {
            return Err(ConfigurationError::invalid_value(
                "analysis.log_host_batch_size",
                "0",
                "batch size must be greater than 0",
            ));
        }

        if analysis.max_sampling_size_per_group == 0 {
            return Err(ConfigurationError::invalid_value(
                "analysis.max_sampling_size_per_group",
                "0",
                "sampling size must be greater than 0",
            ));
        }

        if analysis.summary_fetch_attempts == 0 {
            return Err(ConfigurationError::invalid_value(
                "analysis.summary_fetch_attempts",
                "0",
                "at least one summary read is required",
            ));
        }

        if self.logging.level.is_empty() {
            return Err(ConfigurationError::missing_required_field(
                "logging.level",
                "logging configuration",
            ));
        }

        Ok(())
    }
}
