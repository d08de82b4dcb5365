use super::types::{ResponseData, TaskDescriptor};
use crate::error::StateResult;
use async_trait::async_trait;
use std::time::Duration;

/// Submission surface of the remote worker pool
#[async_trait]
pub trait TaskDispatchFacade: Send + Sync {
    /// Queue a task and return its wait id without waiting for the result
    async fn submit(&self, descriptor: TaskDescriptor) -> StateResult<String>;

    /// Execute a task inline, bounded by `timeout`
    async fn submit_blocking(
        &self,
        descriptor: TaskDescriptor,
        timeout: Duration,
    ) -> StateResult<ResponseData>;
}
