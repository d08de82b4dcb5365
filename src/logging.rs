//! # Structured Logging Module
//!
//! Environment-aware structured logging for suspended and resumed step
//! executions. Console output by default, JSON when configured.

use crate::config::LoggingConfig;
use chrono::Utc;
use std::sync::OnceLock;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

static LOGGER_INITIALIZED: OnceLock<()> = OnceLock::new();

/// Initialize structured logging with environment-specific defaults
pub fn init_structured_logging() {
    let environment = get_environment();
    init_with_config(&LoggingConfig {
        level: get_log_level(&environment).to_string(),
        json: environment == "production",
    });
}

/// Initialize structured logging from a loaded [`LoggingConfig`]
pub fn init_with_config(config: &LoggingConfig) {
    LOGGER_INITIALIZED.get_or_init(|| {
        let filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));

        let layer = if config.json {
            fmt::layer()
                .with_target(true)
                .with_thread_ids(true)
                .json()
                .with_filter(filter)
                .boxed()
        } else {
            fmt::layer()
                .with_target(true)
                .with_thread_ids(true)
                .with_level(true)
                .with_filter(filter)
                .boxed()
        };

        // A global subscriber may already be set by the embedding process
        if tracing_subscriber::registry().with(layer).try_init().is_err() {
            tracing::debug!("Global tracing subscriber already initialized");
        }

        tracing::info!(
            pid = std::process::id(),
            level = %config.level,
            json = config.json,
            "🔧 STRUCTURED LOGGING: Initialized"
        );
    });
}

fn get_environment() -> String {
    std::env::var("DELIVERY_STATES_ENV")
        .or_else(|_| std::env::var("APP_ENV"))
        .unwrap_or_else(|_| "development".to_string())
}

fn get_log_level(environment: &str) -> &'static str {
    match environment {
        "production" => "info",
        _ => "debug",
    }
}

/// Log structured data for step operations
pub fn log_step_operation(
    operation: &str,
    instance_id: &str,
    step_name: &str,
    status: &str,
    details: Option<&str>,
) {
    tracing::info!(
        operation = %operation,
        instance_id = %instance_id,
        step_name = %step_name,
        status = %status,
        details = details,
        timestamp = %Utc::now().to_rfc3339(),
        "🔧 STEP_OPERATION"
    );
}

/// Log structured data for verification analysis operations
pub fn log_analysis_operation(
    operation: &str,
    instance_id: &str,
    analysis_type: &str,
    status: &str,
    details: Option<&str>,
) {
    tracing::info!(
        operation = %operation,
        instance_id = %instance_id,
        analysis_type = %analysis_type,
        status = %status,
        details = details,
        timestamp = %Utc::now().to_rfc3339(),
        "🔬 ANALYSIS_OPERATION"
    );
}

/// Log structured data for phase and phase step spawning
pub fn log_phase_operation(
    operation: &str,
    instance_id: &str,
    phase_name: &str,
    children: usize,
    status: &str,
) {
    tracing::info!(
        operation = %operation,
        instance_id = %instance_id,
        phase_name = %phase_name,
        children = children,
        status = %status,
        timestamp = %Utc::now().to_rfc3339(),
        "🧭 PHASE_OPERATION"
    );
}
