//! # In-Memory Dispatcher
//!
//! Records every submission and answers blocking calls from programmed
//! responses. Used by tests and by embedders running without a worker pool.

use super::facade::TaskDispatchFacade;
use super::types::{ResponseData, TaskDescriptor, TaskType};
use crate::error::{StateError, StateResult};
use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::time::Duration;
use tracing::debug;

#[derive(Debug, Default)]
pub struct InMemoryDispatcher {
    submitted: Mutex<Vec<TaskDescriptor>>,
    blocking_calls: Mutex<Vec<TaskDescriptor>>,
    blocking_responses: DashMap<TaskType, ResponseData>,
    blocking_delay: Mutex<Option<Duration>>,
    unavailable: Mutex<bool>,
}

impl InMemoryDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Program the inline answer for a task type
    pub fn respond_blocking(&self, task_type: TaskType, response: ResponseData) {
        self.blocking_responses.insert(task_type, response);
    }

    /// Delay blocking answers, to exercise timeouts
    pub fn set_blocking_delay(&self, delay: Duration) {
        *self.blocking_delay.lock() = Some(delay);
    }

    /// Reject every submission as if no worker were reachable
    pub fn set_unavailable(&self, unavailable: bool) {
        *self.unavailable.lock() = unavailable;
    }

    pub fn submitted(&self) -> Vec<TaskDescriptor> {
        self.submitted.lock().clone()
    }

    pub fn submitted_of(&self, task_type: TaskType) -> Vec<TaskDescriptor> {
        self.submitted
            .lock()
            .iter()
            .filter(|d| d.task_type == task_type)
            .cloned()
            .collect()
    }

    pub fn blocking_calls(&self) -> Vec<TaskDescriptor> {
        self.blocking_calls.lock().clone()
    }

    fn check_available(&self, task_type: TaskType) -> StateResult<()> {
        if *self.unavailable.lock() {
            return Err(StateError::Dispatch(format!(
                "no worker available for task type {task_type}"
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl TaskDispatchFacade for InMemoryDispatcher {
    async fn submit(&self, descriptor: TaskDescriptor) -> StateResult<String> {
        self.check_available(descriptor.task_type)?;

        debug!(
            wait_id = %descriptor.wait_id,
            task_type = %descriptor.task_type,
            app_id = %descriptor.app_id,
            "📤 Task queued"
        );

        let wait_id = descriptor.wait_id.clone();
        self.submitted.lock().push(descriptor);
        Ok(wait_id)
    }

    async fn submit_blocking(
        &self,
        descriptor: TaskDescriptor,
        timeout: Duration,
    ) -> StateResult<ResponseData> {
        self.check_available(descriptor.task_type)?;

        let task_type = descriptor.task_type;
        self.blocking_calls.lock().push(descriptor);
        let delay = *self.blocking_delay.lock();
        let programmed = self.blocking_responses.get(&task_type).map(|r| r.clone());

        let answer = async move {
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
            programmed
        };

        match tokio::time::timeout(timeout, answer).await {
            Ok(Some(response)) => Ok(response),
            Ok(None) => Err(StateError::Dispatch(format!(
                "no inline handler for task type {task_type}"
            ))),
            Err(_) => Err(StateError::DispatchTimeout {
                task_type: task_type.to_string(),
                timeout_ms: timeout.as_millis() as u64,
            }),
        }
    }
}
