//! # Leaf Deployment Steps
//!
//! Steps that build a task payload, dispatch it to a worker and finish on the
//! worker's response. Every step here creates an activity before submitting,
//! uses the activity id (or a fresh id) as its wait id, and records the data
//! it needs to resume on the context before the task leaves the process.

pub mod code_deploy;
pub mod container;
pub mod helm;
pub mod http;
pub mod jenkins;
pub mod shell_script;

use crate::activity::{Activity, ActivityLog};
use crate::config::StatesConfig;
use crate::constants::ExecutionStatus;
use crate::context::{
    ContextElementType, ExecutionContext, HostElement, InfraMappingElement, InstanceElement,
    PhaseElement,
};
use crate::dispatch::{ResponseData, TaskDispatchFacade};
use crate::error::{StateError, StateResult};
use crate::workflow::sweeping_output::SweepingOutputStore;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::warn;

pub use code_deploy::{CodeDeployRollbackStep, CodeDeployStep};
pub use container::{ContainerDeployStep, ContainerRollbackStep};
pub use helm::{HelmDeployStep, HelmRollbackStep};
pub use http::HttpStep;
pub use jenkins::JenkinsStep;
pub use shell_script::ShellScriptStep;

/// Collaborators injected into every leaf step
#[derive(Clone)]
pub struct StepServices {
    pub dispatcher: Arc<dyn TaskDispatchFacade>,
    pub activities: Arc<dyn ActivityLog>,
    pub outputs: Arc<dyn SweepingOutputStore>,
    pub config: Arc<StatesConfig>,
}

impl StepServices {
    pub fn new(
        dispatcher: Arc<dyn TaskDispatchFacade>,
        activities: Arc<dyn ActivityLog>,
        outputs: Arc<dyn SweepingOutputStore>,
        config: Arc<StatesConfig>,
    ) -> Self {
        Self {
            dispatcher,
            activities,
            outputs,
            config,
        }
    }

    pub(crate) async fn create_activity(
        &self,
        context: &dyn ExecutionContext,
        command_name: &str,
        command_type: &str,
    ) -> StateResult<String> {
        self.activities
            .create(Activity::for_step(context, command_name, command_type))
            .await
    }

    /// Activity status updates never change the step's own outcome
    pub(crate) async fn finish_activity(&self, activity_id: &str, status: ExecutionStatus) {
        if let Err(e) = self.activities.update_status(activity_id, status).await {
            warn!(activity_id = %activity_id, error = %e, "Failed to update activity status");
        }
    }

    /// Mark the activity recorded in the instance's execution data ABORTED
    pub(crate) async fn abort_activity(&self, context: &dyn ExecutionContext) {
        let data = context.state_execution_data();
        if let Some(activity_id) = data.as_ref().and_then(|d| d.activity_id()) {
            self.finish_activity(activity_id, ExecutionStatus::Aborted).await;
        }
    }

    pub(crate) fn task_timeout_ms(&self, step_timeout: Option<u64>) -> u64 {
        step_timeout.unwrap_or(self.config.dispatch.default_task_timeout_ms)
    }
}

impl std::fmt::Debug for StepServices {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StepServices").finish_non_exhaustive()
    }
}

pub(crate) fn require_phase(context: &dyn ExecutionContext) -> StateResult<PhaseElement> {
    context
        .phase_element()
        .ok_or_else(|| StateError::missing_element(ContextElementType::Phase))
}

pub(crate) fn require_infra_mapping(
    context: &dyn ExecutionContext,
) -> StateResult<InfraMappingElement> {
    context
        .infra_mapping_element()
        .ok_or_else(|| StateError::missing_element(ContextElementType::InfraMapping))
}

/// The single response of a one-task wait
pub(crate) fn single_response(
    responses: &HashMap<String, ResponseData>,
) -> StateResult<&ResponseData> {
    responses
        .values()
        .next()
        .ok_or_else(|| StateError::InvalidRequest("no response received".to_string()))
}

/// Instances a deploy task reported, as context elements
pub(crate) fn instances_from_output(
    output: &Value,
    phase_name: Option<&str>,
    workload_name: Option<&str>,
) -> Vec<InstanceElement> {
    output
        .get("instances")
        .and_then(Value::as_array)
        .map(|instances| {
            instances
                .iter()
                .filter_map(|raw| {
                    let host_name = raw.get("hostName").and_then(Value::as_str)?;
                    let text = |key: &str| raw.get(key).and_then(Value::as_str).map(str::to_string);
                    Some(InstanceElement {
                        uuid: text("instanceId").unwrap_or_else(|| host_name.to_string()),
                        host: HostElement {
                            host_name: host_name.to_string(),
                            ip: text("ip"),
                            pod_name: text("podName"),
                            container_id: text("containerId"),
                            ..Default::default()
                        },
                        new_instance: raw
                            .get("newInstance")
                            .and_then(Value::as_bool)
                            .unwrap_or(true),
                        workload_name: workload_name.map(str::to_string),
                        phase_name: phase_name.map(str::to_string),
                    })
                })
                .collect()
        })
        .unwrap_or_default()
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use crate::activity::InMemoryActivityLog;
    use crate::context::{ContextElement, DeploymentType, StateExecutionContext};
    use crate::dispatch::InMemoryDispatcher;
    use crate::workflow::sweeping_output::InMemorySweepingOutputStore;

    pub struct Harness {
        pub dispatcher: Arc<InMemoryDispatcher>,
        pub activities: Arc<InMemoryActivityLog>,
        pub outputs: Arc<InMemorySweepingOutputStore>,
        pub services: StepServices,
    }

    pub fn harness() -> Harness {
        let dispatcher = Arc::new(InMemoryDispatcher::new());
        let activities = Arc::new(InMemoryActivityLog::new());
        let outputs = Arc::new(InMemorySweepingOutputStore::new());
        let services = StepServices::new(
            dispatcher.clone(),
            activities.clone(),
            outputs.clone(),
            Arc::new(StatesConfig::default()),
        );
        Harness {
            dispatcher,
            activities,
            outputs,
            services,
        }
    }

    pub fn phase_element(deployment_type: DeploymentType) -> ContextElement {
        ContextElement::Phase(PhaseElement {
            phase_name: "Phase 1".to_string(),
            service_id: "svc-1".to_string(),
            service_name: "orders".to_string(),
            infra_mapping_id: "infra-1".to_string(),
            deployment_type,
            rollback: false,
            phase_name_for_rollback: None,
        })
    }

    pub fn infra_element(deployment_type: DeploymentType) -> ContextElement {
        ContextElement::InfraMapping(InfraMappingElement {
            uuid: "infra-1".to_string(),
            name: "prod-cluster".to_string(),
            deployment_type,
            cluster_name: Some("prod".to_string()),
            load_balancers: vec![],
            region: Some("us-east-1".to_string()),
        })
    }

    pub fn context_with(elements: Vec<ContextElement>) -> StateExecutionContext {
        let mut builder = StateExecutionContext::builder()
            .account_id("acc")
            .app_id("app")
            .env_id("env")
            .workflow_id("wf")
            .workflow_execution_id("wfe")
            .state_execution_instance_id("step-1");
        for element in elements {
            builder = builder.element(element);
        }
        builder.build()
    }

    pub fn respond(wait_id: &str, response: ResponseData) -> HashMap<String, ResponseData> {
        HashMap::from([(wait_id.to_string(), response)])
    }
}
