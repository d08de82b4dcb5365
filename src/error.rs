//! Error types for the delivery states core.
//!

use crate::config::ConfigurationError;
use crate::constants::ExecutionStatus;
use crate::state_machine::StateMachineError;
use std::collections::BTreeMap;
use thiserror::Error;

/// Field-level validation messages keyed by field (or rule) name.
pub type FieldErrors = BTreeMap<String, String>;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum StateError {
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),
    #[error("Field validation failed: {0:?}")]
    FieldValidation(FieldErrors),
    #[error("Missing context element: {0}")]
    MissingContextElement(String),
    #[error("Error: Expression {0} could not be resolved")]
    ExpressionNotResolved(String),
    #[error("{0}")]
    InvalidRequest(String),
    #[error("Dispatch error: {0}")]
    Dispatch(String),
    #[error("Task {task_type} did not complete within {timeout_ms}ms")]
    DispatchTimeout { task_type: String, timeout_ms: u64 },
    #[error("{0}")]
    RemoteTask(String),
    #[error("State transition error: {0}")]
    StateTransition(String),
    #[error("Persistence error: {0}")]
    Persistence(String),
    #[error("Internal error: {0}")]
    Internal(String),
}

impl StateError {
    /// Terminal status a step takes when this error escapes `execute` or
    /// `handle_async_response`.
    pub fn to_execution_status(&self) -> ExecutionStatus {
        match self {
            StateError::RemoteTask(_) => ExecutionStatus::Failed,
            _ => ExecutionStatus::Error,
        }
    }

    /// Message surfaced on the step's final status.
    pub fn user_message(&self) -> String {
        self.to_string()
    }

    pub fn missing_element(kind: impl std::fmt::Display) -> Self {
        StateError::MissingContextElement(kind.to_string())
    }
}

impl From<serde_json::Error> for StateError {
    fn from(error: serde_json::Error) -> Self {
        StateError::InvalidRequest(format!("JSON serialization error: {error}"))
    }
}

impl From<StateMachineError> for StateError {
    fn from(error: StateMachineError) -> Self {
        StateError::StateTransition(error.to_string())
    }
}

impl From<ConfigurationError> for StateError {
    fn from(error: ConfigurationError) -> Self {
        StateError::InvalidConfiguration(error.to_string())
    }
}

pub type StateResult<T> = anyhow::Result<T, StateError>;
pub type Result<T> = std::result::Result<T, StateError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expression_error_message() {
        let err = StateError::ExpressionNotResolved("${workflow.variables.tier}".to_string());
        assert_eq!(
            err.to_string(),
            "Error: Expression ${workflow.variables.tier} could not be resolved"
        );
        assert_eq!(err.to_execution_status(), ExecutionStatus::Error);
    }

    #[test]
    fn test_remote_failures_are_failed() {
        let err = StateError::RemoteTask("connection refused".to_string());
        assert_eq!(err.to_execution_status(), ExecutionStatus::Failed);
        assert_eq!(err.user_message(), "connection refused");
    }
}
