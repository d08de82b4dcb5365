use super::data::StateExecutionData;
use super::Step;
use crate::constants::ExecutionStatus;
use crate::context::ContextElement;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// How a composite step runs its children
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExecutionMode {
    #[default]
    Sequential,
    Parallel,
}

/// One child to spawn, with the elements pushed onto its context
#[derive(Clone)]
pub struct SpawnChild {
    pub name: String,
    pub step: Arc<dyn Step>,
    pub elements: Vec<ContextElement>,
}

impl fmt::Debug for SpawnChild {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SpawnChild")
            .field("name", &self.name)
            .field("step_type", &self.step.step_type())
            .field("elements", &self.elements.len())
            .finish()
    }
}

/// Children a composite step asks the engine to run
#[derive(Debug, Clone)]
pub struct SpawnPlan {
    /// Correlation id of the parent; child completions are reported to it
    pub notify_id: String,
    pub mode: ExecutionMode,
    pub children: Vec<SpawnChild>,
}

/// Result of `execute` or `handle_async_response`
#[derive(Debug, Clone, Default)]
pub struct ExecutionResponse {
    pub status: ExecutionStatus,
    pub is_async: bool,
    pub correlation_ids: Vec<String>,
    pub state_execution_data: Option<StateExecutionData>,
    pub context_elements: Vec<ContextElement>,
    pub notify_elements: Vec<ContextElement>,
    pub error_message: Option<String>,
    pub spawn_plan: Option<SpawnPlan>,
}

impl ExecutionResponse {
    /// Synchronous terminal response
    pub fn completed(status: ExecutionStatus) -> Self {
        Self {
            status,
            ..Default::default()
        }
    }

    pub fn success() -> Self {
        Self::completed(ExecutionStatus::Success)
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self::completed(ExecutionStatus::Failed).with_message(message)
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::completed(ExecutionStatus::Error).with_message(message)
    }

    pub fn skipped(message: impl Into<String>) -> Self {
        Self::completed(ExecutionStatus::Skipped).with_message(message)
    }

    /// Suspend until every wait id has a response
    pub fn suspended(correlation_ids: Vec<String>) -> Self {
        Self {
            status: ExecutionStatus::Running,
            is_async: true,
            correlation_ids,
            ..Default::default()
        }
    }

    /// Suspend until the spawned children complete
    pub fn spawning(plan: SpawnPlan) -> Self {
        Self {
            status: ExecutionStatus::Running,
            is_async: true,
            correlation_ids: vec![plan.notify_id.clone()],
            spawn_plan: Some(plan),
            ..Default::default()
        }
    }

    pub fn with_state_data(mut self, data: StateExecutionData) -> Self {
        self.state_execution_data = Some(data);
        self
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.error_message = Some(message.into());
        self
    }

    pub fn with_context_element(mut self, element: ContextElement) -> Self {
        self.context_elements.push(element);
        self
    }

    pub fn with_notify_elements(mut self, elements: Vec<ContextElement>) -> Self {
        self.notify_elements.extend(elements);
        self
    }
}
