use crate::constants::ExecutionStatus;
use crate::context::ContextElement;
use crate::step::{StateExecutionData, StepType};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use uuid::Uuid;

/// Kind of work a worker is asked to perform
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskType {
    ShellScript,
    HttpCall,
    JenkinsStart,
    JenkinsPoll,
    HelmReleaseHistory,
    HelmDeploy,
    HelmRollback,
    ContainerResize,
    CodeDeploy,
    LogDataCollection,
    MetricDataCollection,
}

impl TaskType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ShellScript => "SHELL_SCRIPT",
            Self::HttpCall => "HTTP_CALL",
            Self::JenkinsStart => "JENKINS_START",
            Self::JenkinsPoll => "JENKINS_POLL",
            Self::HelmReleaseHistory => "HELM_RELEASE_HISTORY",
            Self::HelmDeploy => "HELM_DEPLOY",
            Self::HelmRollback => "HELM_ROLLBACK",
            Self::ContainerResize => "CONTAINER_RESIZE",
            Self::CodeDeploy => "CODE_DEPLOY",
            Self::LogDataCollection => "LOG_DATA_COLLECTION",
            Self::MetricDataCollection => "METRIC_DATA_COLLECTION",
        }
    }
}

impl fmt::Display for TaskType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Opaque unit of remote work
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskDescriptor {
    pub wait_id: String,
    pub task_type: TaskType,
    pub account_id: String,
    pub app_id: String,
    pub env_id: Option<String>,
    pub payload: Value,
    pub timeout_ms: u64,
    pub description: Option<String>,
}

impl TaskDescriptor {
    /// New descriptor with a freshly generated wait id
    pub fn new(task_type: TaskType, account_id: &str, app_id: &str, payload: Value) -> Self {
        Self {
            wait_id: Uuid::new_v4().to_string(),
            task_type,
            account_id: account_id.to_string(),
            app_id: app_id.to_string(),
            env_id: None,
            payload,
            timeout_ms: 10 * 60 * 1000,
            description: None,
        }
    }

    /// Use a caller-chosen wait id (activity ids double as wait ids for some steps)
    pub fn with_wait_id(mut self, wait_id: impl Into<String>) -> Self {
        self.wait_id = wait_id.into();
        self
    }

    pub fn with_env_id(mut self, env_id: Option<String>) -> Self {
        self.env_id = env_id;
        self
    }

    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

/// Result reported by a worker for one task
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskResult {
    pub status: ExecutionStatus,
    #[serde(default)]
    pub output: Value,
    pub error_message: Option<String>,
}

/// Completion notice from a spawned child instance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ElementNotify {
    pub status: ExecutionStatus,
    #[serde(default)]
    pub notify_elements: Vec<ContextElement>,
    pub error_message: Option<String>,
    #[serde(default)]
    pub step_name: Option<String>,
    #[serde(default)]
    pub step_type: Option<StepType>,
    /// Data the child recorded, read by composite parents for summaries
    #[serde(default)]
    pub state_execution_data: Option<StateExecutionData>,
}

/// Distinguished error variant carried instead of a result
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub message: String,
}

/// Typed response delivered for a wait id
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "data", rename_all = "snake_case")]
pub enum ResponseData {
    Task(TaskResult),
    Notify(ElementNotify),
    Error(ErrorResponse),
}

impl ResponseData {
    pub fn success(output: Value) -> Self {
        Self::Task(TaskResult {
            status: ExecutionStatus::Success,
            output,
            error_message: None,
        })
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self::Task(TaskResult {
            status: ExecutionStatus::Failed,
            output: Value::Null,
            error_message: Some(message.into()),
        })
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::Error(ErrorResponse {
            message: message.into(),
        })
    }

    pub fn notify(status: ExecutionStatus, notify_elements: Vec<ContextElement>) -> Self {
        Self::Notify(ElementNotify {
            status,
            notify_elements,
            error_message: None,
            step_name: None,
            step_type: None,
            state_execution_data: None,
        })
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Self::Error(_))
    }

    /// Status this response reports, ERROR for the error variant
    pub fn status(&self) -> ExecutionStatus {
        match self {
            Self::Task(result) => result.status,
            Self::Notify(notify) => notify.status,
            Self::Error(_) => ExecutionStatus::Error,
        }
    }

    pub fn error_message(&self) -> Option<&str> {
        match self {
            Self::Task(result) => result.error_message.as_deref(),
            Self::Notify(notify) => notify.error_message.as_deref(),
            Self::Error(error) => Some(error.message.as_str()),
        }
    }

    pub fn as_task(&self) -> Option<&TaskResult> {
        match self {
            Self::Task(result) => Some(result),
            _ => None,
        }
    }

    pub fn as_notify(&self) -> Option<&ElementNotify> {
        match self {
            Self::Notify(notify) => Some(notify),
            _ => None,
        }
    }
}
