//! Helm release deploy and rollback.
//!
//! Deploy looks up the release history inline (the one blocking call in the
//! crate), derives the version pair, then installs asynchronously with the
//! activity id as wait id. A successful install publishes the deployed
//! instances as a notify element and as sweeping output.

use super::{instances_from_output, require_infra_mapping, require_phase, single_response, StepServices};
use crate::constants::{system, ExecutionStatus};
use crate::context::{
    ContextElement, ContextElementType, ExecutionContext, HelmRollbackElement, InstanceListElement,
};
use crate::dispatch::{ResponseData, TaskDescriptor, TaskType};
use crate::error::{FieldErrors, StateError, StateResult};
use crate::step::{ExecutionResponse, HelmExecutionData, StateExecutionData, Step, StepType};
use crate::workflow::sweeping_output::{SweepingOutput, SweepingOutputScope};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::time::Duration;
use tracing::{info, instrument, warn};

const HISTORY_LOOKUP_FAILED: &str = "Failed to find the previous helm release version. Make sure that the helm client and tiller is installed";

#[derive(Debug)]
pub struct HelmDeployStep {
    name: String,
    release_name: String,
    chart_name: String,
    chart_version: Option<String>,
    namespace: String,
    steady_state_timeout_minutes: u32,
    services: StepServices,
}

impl HelmDeployStep {
    pub fn new(
        name: impl Into<String>,
        release_name: impl Into<String>,
        chart_name: impl Into<String>,
        services: StepServices,
    ) -> Self {
        Self {
            name: name.into(),
            release_name: release_name.into(),
            chart_name: chart_name.into(),
            chart_version: None,
            namespace: "default".to_string(),
            steady_state_timeout_minutes: system::DEFAULT_STEADY_STATE_TIMEOUT_MINUTES,
            services,
        }
    }

    pub fn with_chart_version(mut self, version: impl Into<String>) -> Self {
        self.chart_version = Some(version.into());
        self
    }

    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    pub fn with_steady_state_timeout_minutes(mut self, minutes: u32) -> Self {
        self.steady_state_timeout_minutes = minutes;
        self
    }

    /// Previous version from the release history: last revision, or 0
    async fn previous_version(
        &self,
        context: &dyn ExecutionContext,
        release_name: &str,
    ) -> StateResult<u32> {
        let timeout = Duration::from_millis(2 * system::DEFAULT_TILLER_CONNECTION_TIMEOUT_MILLIS)
            .min(self.services.config.dispatch.blocking_timeout());
        let descriptor = TaskDescriptor::new(
            TaskType::HelmReleaseHistory,
            context.account_id(),
            context.app_id(),
            json!({"releaseName": release_name, "namespace": self.namespace}),
        )
        .with_env_id(context.env_id().map(str::to_string))
        .with_timeout_ms(timeout.as_millis() as u64);

        let response = self
            .services
            .dispatcher
            .submit_blocking(descriptor, timeout)
            .await
            .map_err(|e| {
                warn!(release = %release_name, error = %e, "Helm release history lookup failed");
                StateError::RemoteTask(HISTORY_LOOKUP_FAILED.to_string())
            })?;

        let Some(result) = response.as_task().filter(|r| r.status == ExecutionStatus::Success) else {
            return Err(StateError::RemoteTask(HISTORY_LOOKUP_FAILED.to_string()));
        };

        let last = result
            .output
            .get("releases")
            .and_then(Value::as_array)
            .and_then(|releases| {
                releases
                    .iter()
                    .filter_map(|r| r.get("revision").and_then(Value::as_u64))
                    .max()
            })
            .unwrap_or(0);
        Ok(last as u32)
    }
}

#[async_trait]
impl Step for HelmDeployStep {
    fn name(&self) -> &str {
        &self.name
    }

    fn step_type(&self) -> StepType {
        StepType::HelmDeploy
    }

    fn validate_fields(&self) -> FieldErrors {
        let mut errors = FieldErrors::new();
        if self.release_name.trim().is_empty() {
            errors.insert("helmReleaseNamePrefix".to_string(), "Helm release name should be provided".to_string());
        }
        if self.chart_name.trim().is_empty() {
            errors.insert("chartName".to_string(), "Chart name should be provided".to_string());
        }
        errors
    }

    fn timeout_millis(&self) -> Option<u64> {
        Some(u64::from(self.steady_state_timeout_minutes) * 60 * 1000)
    }

    #[instrument(skip(self, context), fields(step = %self.name))]
    async fn execute(&self, context: &dyn ExecutionContext) -> StateResult<ExecutionResponse> {
        require_phase(context)?;
        let infra = require_infra_mapping(context)?;
        let release_name = context.render_required(&self.release_name)?;

        let activity_id = self
            .services
            .create_activity(context, &self.name, StepType::HelmDeploy.as_str())
            .await?;

        let previous_version = self.previous_version(context, &release_name).await?;
        let new_version = previous_version + 1;

        let data = StateExecutionData::Helm(HelmExecutionData {
            activity_id: activity_id.clone(),
            release_name: release_name.clone(),
            previous_version,
            new_version,
            rollback_version: None,
        });
        context.save_state_execution_data(data.clone());

        let descriptor = TaskDescriptor::new(
            TaskType::HelmDeploy,
            context.account_id(),
            context.app_id(),
            json!({
                "releaseName": release_name,
                "chartName": self.chart_name,
                "chartVersion": self.chart_version,
                "namespace": self.namespace,
                "clusterName": infra.cluster_name,
                "newReleaseVersion": new_version,
                "steadyStateTimeoutMinutes": self.steady_state_timeout_minutes,
            }),
        )
        .with_wait_id(activity_id)
        .with_env_id(context.env_id().map(str::to_string))
        .with_timeout_ms(self.timeout_millis().unwrap_or_default());

        let wait_id = self.services.dispatcher.submit(descriptor).await?;
        info!(release = %release_name, previous_version, new_version, "⎈ Helm install submitted");

        Ok(ExecutionResponse::suspended(vec![wait_id]).with_state_data(data))
    }

    async fn handle_async_response(
        &self,
        context: &dyn ExecutionContext,
        responses: &HashMap<String, ResponseData>,
    ) -> StateResult<ExecutionResponse> {
        let response = single_response(responses)?;
        let Some(StateExecutionData::Helm(data)) = context.state_execution_data() else {
            return Err(StateError::Internal("helm deploy resumed without execution data".to_string()));
        };

        let status = response.status();
        self.services.finish_activity(&data.activity_id, status).await;

        if status != ExecutionStatus::Success {
            return Ok(ExecutionResponse::completed(status)
                .with_message(response.error_message().unwrap_or("Helm install failed"))
                .with_state_data(StateExecutionData::Helm(data)));
        }

        let phase_name = context.phase_element().map(|p| p.phase_name);
        let output = response.as_task().map(|r| r.output.clone()).unwrap_or(Value::Null);
        let instances = instances_from_output(&output, phase_name.as_deref(), Some(&data.release_name));

        self.services.outputs.save(SweepingOutput::new(
            context,
            system::INSTANCE_INFO_OUTPUT,
            SweepingOutputScope::Workflow,
            json!({
                "newInstanceTrafficPercent": 100,
                "hostNames": instances.iter().map(|i| i.host.host_name.clone()).collect::<Vec<_>>(),
            }),
        ))?;
        self.services.outputs.save(SweepingOutput::new(
            context,
            system::HELM_RELEASE_INFO_OUTPUT,
            SweepingOutputScope::Phase,
            json!({
                "releaseName": data.release_name,
                "previousVersion": data.previous_version,
                "newVersion": data.new_version,
            }),
        ))?;

        Ok(ExecutionResponse::success()
            .with_notify_elements(vec![ContextElement::InstanceList(InstanceListElement { instances })])
            .with_state_data(StateExecutionData::Helm(data)))
    }

    async fn handle_abort(&self, context: &dyn ExecutionContext) -> StateResult<()> {
        self.services.abort_activity(context).await;
        Ok(())
    }
}

/// Roll a release back to the version recorded by the forward deploy
#[derive(Debug)]
pub struct HelmRollbackStep {
    name: String,
    steady_state_timeout_minutes: u32,
    services: StepServices,
}

impl HelmRollbackStep {
    pub fn new(name: impl Into<String>, services: StepServices) -> Self {
        Self {
            name: name.into(),
            steady_state_timeout_minutes: system::DEFAULT_STEADY_STATE_TIMEOUT_MINUTES,
            services,
        }
    }
}

#[async_trait]
impl Step for HelmRollbackStep {
    fn name(&self) -> &str {
        &self.name
    }

    fn step_type(&self) -> StepType {
        StepType::HelmRollback
    }

    fn timeout_millis(&self) -> Option<u64> {
        Some(u64::from(self.steady_state_timeout_minutes) * 60 * 1000)
    }

    async fn execute(&self, context: &dyn ExecutionContext) -> StateResult<ExecutionResponse> {
        let rollback = context
            .context_element(ContextElementType::HelmRollback)
            .and_then(|e| match e {
                ContextElement::HelmRollback(r) => Some(r),
                _ => None,
            });
        let Some(HelmRollbackElement {
            release_name,
            previous_version,
            new_version,
        }) = rollback
        else {
            return Ok(ExecutionResponse::skipped("No Helm release recorded for rollback"));
        };

        if previous_version == 0 {
            return Ok(ExecutionResponse::skipped(format!(
                "Release {release_name} has no previous version to roll back to"
            )));
        }

        let activity_id = self
            .services
            .create_activity(context, &self.name, StepType::HelmRollback.as_str())
            .await?;

        let data = StateExecutionData::Helm(HelmExecutionData {
            activity_id: activity_id.clone(),
            release_name: release_name.clone(),
            previous_version,
            new_version,
            rollback_version: Some(previous_version),
        });
        context.save_state_execution_data(data.clone());

        let descriptor = TaskDescriptor::new(
            TaskType::HelmRollback,
            context.account_id(),
            context.app_id(),
            json!({"releaseName": release_name, "rollbackVersion": previous_version}),
        )
        .with_wait_id(activity_id)
        .with_env_id(context.env_id().map(str::to_string))
        .with_timeout_ms(self.timeout_millis().unwrap_or_default());

        let wait_id = self.services.dispatcher.submit(descriptor).await?;
        Ok(ExecutionResponse::suspended(vec![wait_id]).with_state_data(data))
    }

    async fn handle_async_response(
        &self,
        context: &dyn ExecutionContext,
        responses: &HashMap<String, ResponseData>,
    ) -> StateResult<ExecutionResponse> {
        let response = single_response(responses)?;
        let status = response.status();
        if let Some(activity_id) = context.state_execution_data().as_ref().and_then(|d| d.activity_id()) {
            self.services.finish_activity(activity_id, status).await;
        }

        let mut result = ExecutionResponse::completed(status);
        if let Some(message) = response.error_message() {
            result = result.with_message(message);
        }
        Ok(result)
    }

    async fn handle_abort(&self, context: &dyn ExecutionContext) -> StateResult<()> {
        self.services.abort_activity(context).await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::DeploymentType;
    use crate::states::test_support::*;
    use crate::workflow::sweeping_output::SweepingOutputStore;

    fn deploy_ctx() -> crate::context::StateExecutionContext {
        context_with(vec![
            phase_element(DeploymentType::Helm),
            infra_element(DeploymentType::Helm),
        ])
    }

    #[tokio::test]
    async fn test_version_pair_from_history() {
        let h = harness();
        h.dispatcher.respond_blocking(
            TaskType::HelmReleaseHistory,
            ResponseData::success(json!({"releases": [{"revision": 3}, {"revision": 4}]})),
        );
        let step = HelmDeployStep::new("helm", "orders-${env.uuid}", "orders", h.services.clone());
        let ctx = deploy_ctx();

        let response = step.execute(&ctx).await.unwrap();
        assert!(response.is_async);
        match ctx.state_execution_data() {
            Some(StateExecutionData::Helm(data)) => {
                assert_eq!(data.release_name, "orders-env");
                assert_eq!(data.previous_version, 4);
                assert_eq!(data.new_version, 5);
                assert_eq!(response.correlation_ids, vec![data.activity_id]);
            }
            other => panic!("unexpected data {other:?}"),
        }
        assert_eq!(h.dispatcher.blocking_calls().len(), 1);
    }

    #[tokio::test]
    async fn test_first_release_starts_at_one() {
        let h = harness();
        h.dispatcher
            .respond_blocking(TaskType::HelmReleaseHistory, ResponseData::success(json!({"releases": []})));
        let step = HelmDeployStep::new("helm", "orders", "orders", h.services.clone());
        let ctx = deploy_ctx();
        step.execute(&ctx).await.unwrap();
        assert_eq!(h.dispatcher.submitted()[0].payload["newReleaseVersion"], 1);
    }

    #[tokio::test]
    async fn test_history_failure_fails_step() {
        let h = harness();
        h.dispatcher
            .respond_blocking(TaskType::HelmReleaseHistory, ResponseData::failure("tiller down"));
        let step = HelmDeployStep::new("helm", "orders", "orders", h.services.clone());

        let err = step.execute(&deploy_ctx()).await.unwrap_err();
        assert_eq!(err.to_execution_status(), ExecutionStatus::Failed);
        assert!(err.to_string().starts_with("Failed to find the previous helm release version"));
        assert!(h.dispatcher.submitted().is_empty());
    }

    #[tokio::test]
    async fn test_success_publishes_instances() {
        let h = harness();
        h.dispatcher
            .respond_blocking(TaskType::HelmReleaseHistory, ResponseData::success(json!({"releases": []})));
        let step = HelmDeployStep::new("helm", "orders", "orders", h.services.clone());
        let ctx = deploy_ctx();
        let response = step.execute(&ctx).await.unwrap();

        let result = step
            .handle_async_response(
                &ctx,
                &respond(
                    &response.correlation_ids[0],
                    ResponseData::success(json!({"instances": [
                        {"hostName": "orders-7d9-abc", "podName": "orders-7d9-abc"},
                        {"hostName": "orders-7d9-def", "podName": "orders-7d9-def"}
                    ]})),
                ),
            )
            .await
            .unwrap();

        assert_eq!(result.status, ExecutionStatus::Success);
        match &result.notify_elements[0] {
            ContextElement::InstanceList(list) => {
                assert_eq!(list.instances.len(), 2);
                assert_eq!(list.instances[0].workload_name.as_deref(), Some("orders"));
            }
            other => panic!("unexpected element {other:?}"),
        }
        assert!(h
            .outputs
            .find(SweepingOutputScope::Workflow, "wfe", system::INSTANCE_INFO_OUTPUT)
            .is_some());
        assert!(h
            .outputs
            .find(SweepingOutputScope::Phase, "wfe/Phase 1", system::HELM_RELEASE_INFO_OUTPUT)
            .is_some());
    }

    #[tokio::test]
    async fn test_rollback_without_release_is_skipped() {
        let h = harness();
        let step = HelmRollbackStep::new("rollback", h.services.clone());
        let result = step.execute(&context_with(vec![])).await.unwrap();
        assert_eq!(result.status, ExecutionStatus::Skipped);
        assert!(h.dispatcher.submitted().is_empty());
    }

    #[tokio::test]
    async fn test_rollback_targets_previous_version() {
        let h = harness();
        let step = HelmRollbackStep::new("rollback", h.services.clone());
        let ctx = context_with(vec![ContextElement::HelmRollback(HelmRollbackElement {
            release_name: "orders".to_string(),
            previous_version: 4,
            new_version: 5,
        })]);

        let response = step.execute(&ctx).await.unwrap();
        assert!(response.is_async);
        let submitted = h.dispatcher.submitted_of(TaskType::HelmRollback);
        assert_eq!(submitted[0].payload["rollbackVersion"], 4);
    }
}
