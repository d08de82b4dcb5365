//! # Activity Log
//!
//! Audit record of one remote-dispatching step execution. Steps create an
//! activity before submitting and update it when they finish or abort.
//!
//! ```rust
//! use delivery_states::activity::{Activity, ActivityLog, InMemoryActivityLog};
//! use delivery_states::context::StateExecutionContext;
//! use delivery_states::ExecutionStatus;
//!
//! # tokio_test::block_on(async {
//! let context = StateExecutionContext::builder()
//!     .app_id("app")
//!     .workflow_execution_id("wfe")
//!     .state_execution_instance_id("step-1")
//!     .build();
//! let log = InMemoryActivityLog::new();
//!
//! let id = log.create(Activity::for_step(&context, "Deploy", "HELM_DEPLOY")).await?;
//! log.update_status(&id, ExecutionStatus::Success).await?;
//! assert_eq!(log.get(&id).map(|a| a.status), Some(ExecutionStatus::Success));
//! # Ok::<(), delivery_states::StateError>(())
//! # }).unwrap();
//! ```

use crate::constants::ExecutionStatus;
use crate::context::ExecutionContext;
use crate::error::{StateError, StateResult};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Activity {
    pub id: String,
    pub app_id: String,
    pub workflow_execution_id: String,
    pub state_execution_instance_id: String,
    pub command_name: String,
    pub command_type: String,
    pub status: ExecutionStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Activity {
    /// RUNNING activity for the step executing in `context`
    pub fn for_step(context: &dyn ExecutionContext, command_name: &str, command_type: &str) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            app_id: context.app_id().to_string(),
            workflow_execution_id: context.workflow_execution_id().to_string(),
            state_execution_instance_id: context.state_execution_instance_id().to_string(),
            command_name: command_name.to_string(),
            command_type: command_type.to_string(),
            status: ExecutionStatus::Running,
            created_at: now,
            updated_at: now,
        }
    }
}

#[async_trait]
pub trait ActivityLog: Send + Sync {
    /// Store an activity and return its id
    async fn create(&self, activity: Activity) -> StateResult<String>;

    async fn update_status(&self, activity_id: &str, status: ExecutionStatus) -> StateResult<()>;
}

#[derive(Debug, Default)]
pub struct InMemoryActivityLog {
    activities: DashMap<String, Activity>,
}

impl InMemoryActivityLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, activity_id: &str) -> Option<Activity> {
        self.activities.get(activity_id).map(|a| a.clone())
    }

    pub fn len(&self) -> usize {
        self.activities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.activities.is_empty()
    }
}

#[async_trait]
impl ActivityLog for InMemoryActivityLog {
    async fn create(&self, activity: Activity) -> StateResult<String> {
        let id = activity.id.clone();
        self.activities.insert(id.clone(), activity);
        Ok(id)
    }

    async fn update_status(&self, activity_id: &str, status: ExecutionStatus) -> StateResult<()> {
        let mut activity = self
            .activities
            .get_mut(activity_id)
            .ok_or_else(|| StateError::Persistence(format!("activity {activity_id} not found")))?;
        activity.status = status;
        activity.updated_at = Utc::now();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::StateExecutionContext;

    #[tokio::test]
    async fn test_create_and_update() {
        let ctx = StateExecutionContext::builder()
            .app_id("app")
            .workflow_execution_id("wfe")
            .state_execution_instance_id("i-1")
            .build();
        let log = InMemoryActivityLog::new();

        let id = log
            .create(Activity::for_step(&ctx, "Deploy", "SHELL_SCRIPT"))
            .await
            .unwrap();
        assert_eq!(log.get(&id).unwrap().status, ExecutionStatus::Running);

        log.update_status(&id, ExecutionStatus::Aborted).await.unwrap();
        assert_eq!(log.get(&id).unwrap().status, ExecutionStatus::Aborted);
        assert!(log.update_status("missing", ExecutionStatus::Failed).await.is_err());
    }
}
