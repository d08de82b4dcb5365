//! AWS CodeDeploy revision deploy and its rollback to the previous bundle.

use super::{require_phase, single_response, StepServices};
use crate::constants::ExecutionStatus;
use crate::context::{
    BundleCoordinates, CodeDeployRollbackElement, ContextElement, ContextElementType,
    ExecutionContext,
};
use crate::dispatch::{ResponseData, TaskDescriptor, TaskType};
use crate::error::{FieldErrors, StateError, StateResult};
use crate::step::{CodeDeployExecutionData, ExecutionResponse, StateExecutionData, Step, StepType};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::HashMap;

#[derive(Debug)]
pub struct CodeDeployStep {
    name: String,
    application_name: String,
    deployment_group: String,
    bundle: BundleCoordinates,
    services: StepServices,
}

impl CodeDeployStep {
    pub fn new(
        name: impl Into<String>,
        application_name: impl Into<String>,
        deployment_group: impl Into<String>,
        bundle: BundleCoordinates,
        services: StepServices,
    ) -> Self {
        Self {
            name: name.into(),
            application_name: application_name.into(),
            deployment_group: deployment_group.into(),
            bundle,
            services,
        }
    }
}

#[async_trait]
impl Step for CodeDeployStep {
    fn name(&self) -> &str {
        &self.name
    }

    fn step_type(&self) -> StepType {
        StepType::CodeDeploy
    }

    fn validate_fields(&self) -> FieldErrors {
        let mut errors = FieldErrors::new();
        if self.application_name.trim().is_empty() {
            errors.insert("applicationName".to_string(), "Application name should be provided".to_string());
        }
        if self.deployment_group.trim().is_empty() {
            errors.insert("deploymentGroup".to_string(), "Deployment group should be provided".to_string());
        }
        if self.bundle.bucket.trim().is_empty() || self.bundle.key.trim().is_empty() {
            errors.insert("bundle".to_string(), "Bucket and key should be provided".to_string());
        }
        errors
    }

    async fn execute(&self, context: &dyn ExecutionContext) -> StateResult<ExecutionResponse> {
        require_phase(context)?;
        let bundle = BundleCoordinates {
            bucket: context.render_required(&self.bundle.bucket)?,
            key: context.render_required(&self.bundle.key)?,
            bundle_type: self.bundle.bundle_type.clone(),
        };

        let activity_id = self
            .services
            .create_activity(context, &self.name, StepType::CodeDeploy.as_str())
            .await?;

        let data = StateExecutionData::CodeDeploy(CodeDeployExecutionData {
            activity_id: activity_id.clone(),
            application_name: self.application_name.clone(),
            deployment_group: self.deployment_group.clone(),
            bundle: Some(bundle.clone()),
            old_bundle: None,
        });
        context.save_state_execution_data(data.clone());

        let descriptor = TaskDescriptor::new(
            TaskType::CodeDeploy,
            context.account_id(),
            context.app_id(),
            json!({
                "applicationName": self.application_name,
                "deploymentGroup": self.deployment_group,
                "bundle": bundle,
            }),
        )
        .with_wait_id(activity_id)
        .with_env_id(context.env_id().map(str::to_string))
        .with_timeout_ms(self.services.task_timeout_ms(None));

        let wait_id = self.services.dispatcher.submit(descriptor).await?;
        Ok(ExecutionResponse::suspended(vec![wait_id]).with_state_data(data))
    }

    async fn handle_async_response(
        &self,
        context: &dyn ExecutionContext,
        responses: &HashMap<String, ResponseData>,
    ) -> StateResult<ExecutionResponse> {
        let response = single_response(responses)?;
        let Some(StateExecutionData::CodeDeploy(mut data)) = context.state_execution_data() else {
            return Err(StateError::Internal("code deploy resumed without execution data".to_string()));
        };

        let status = response.status();
        self.services.finish_activity(&data.activity_id, status).await;

        let output = response.as_task().map(|r| r.output.clone()).unwrap_or(Value::Null);
        if let Some(previous) = output.get("previousBundle") {
            data.old_bundle = serde_json::from_value(previous.clone()).ok();
        }

        let mut result = ExecutionResponse::completed(status).with_state_data(StateExecutionData::CodeDeploy(data));
        if status != ExecutionStatus::Success {
            result = result.with_message(response.error_message().unwrap_or("CodeDeploy deployment failed"));
        }
        Ok(result)
    }

    async fn handle_abort(&self, context: &dyn ExecutionContext) -> StateResult<()> {
        self.services.abort_activity(context).await;
        Ok(())
    }
}

/// Redeploy the bundle that was live before the forward deployment
#[derive(Debug)]
pub struct CodeDeployRollbackStep {
    name: String,
    services: StepServices,
}

impl CodeDeployRollbackStep {
    pub fn new(name: impl Into<String>, services: StepServices) -> Self {
        Self {
            name: name.into(),
            services,
        }
    }
}

#[async_trait]
impl Step for CodeDeployRollbackStep {
    fn name(&self) -> &str {
        &self.name
    }

    fn step_type(&self) -> StepType {
        StepType::CodeDeployRollback
    }

    async fn execute(&self, context: &dyn ExecutionContext) -> StateResult<ExecutionResponse> {
        let rollback = context
            .context_element(ContextElementType::CodeDeployRollback)
            .and_then(|e| match e {
                ContextElement::CodeDeployRollback(r) => Some(r),
                _ => None,
            });
        let Some(CodeDeployRollbackElement {
            application_name,
            deployment_group,
            old_bundle: Some(old_bundle),
        }) = rollback
        else {
            return Ok(ExecutionResponse::skipped("No previous revision recorded for rollback"));
        };

        let activity_id = self
            .services
            .create_activity(context, &self.name, StepType::CodeDeployRollback.as_str())
            .await?;

        let data = StateExecutionData::CodeDeploy(CodeDeployExecutionData {
            activity_id: activity_id.clone(),
            application_name: application_name.clone(),
            deployment_group: deployment_group.clone(),
            bundle: Some(old_bundle.clone()),
            old_bundle: None,
        });
        context.save_state_execution_data(data.clone());

        let descriptor = TaskDescriptor::new(
            TaskType::CodeDeploy,
            context.account_id(),
            context.app_id(),
            json!({
                "applicationName": application_name,
                "deploymentGroup": deployment_group,
                "bundle": old_bundle,
                "rollback": true,
            }),
        )
        .with_wait_id(activity_id)
        .with_env_id(context.env_id().map(str::to_string))
        .with_timeout_ms(self.services.task_timeout_ms(None));

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
        let data = context.state_execution_data();
        if let Some(activity_id) = data.as_ref().and_then(|d| d.activity_id()) {
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

    fn bundle(key: &str) -> BundleCoordinates {
        BundleCoordinates {
            bucket: "releases".to_string(),
            key: key.to_string(),
            bundle_type: "zip".to_string(),
        }
    }

    #[tokio::test]
    async fn test_captures_previous_bundle() {
        let h = harness();
        let ctx = context_with(vec![phase_element(DeploymentType::AwsCodeDeploy)]);
        let step = CodeDeployStep::new(
            "deploy",
            "orders",
            "orders-dg",
            bundle("orders/${workflow.variables.build}.zip"),
            h.services.clone(),
        );
        assert!(step.execute(&ctx).await.is_err(), "unresolved build variable");

        let step = CodeDeployStep::new("deploy", "orders", "orders-dg", bundle("orders/12.zip"), h.services.clone());
        let response = step.execute(&ctx).await.unwrap();
        let result = step
            .handle_async_response(
                &ctx,
                &respond(
                    &response.correlation_ids[0],
                    ResponseData::success(json!({"previousBundle": {
                        "bucket": "releases", "key": "orders/11.zip", "bundle_type": "zip"
                    }})),
                ),
            )
            .await
            .unwrap();

        match result.state_execution_data {
            Some(StateExecutionData::CodeDeploy(data)) => {
                assert_eq!(data.old_bundle.unwrap().key, "orders/11.zip");
            }
            other => panic!("unexpected data {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_rollback_without_old_bundle_is_skipped() {
        let h = harness();
        let ctx = context_with(vec![ContextElement::CodeDeployRollback(CodeDeployRollbackElement {
            application_name: "orders".to_string(),
            deployment_group: "orders-dg".to_string(),
            old_bundle: None,
        })]);
        let step = CodeDeployRollbackStep::new("rollback", h.services.clone());
        assert_eq!(step.execute(&ctx).await.unwrap().status, ExecutionStatus::Skipped);
    }

    #[tokio::test]
    async fn test_rollback_redeploys_old_bundle() {
        let h = harness();
        let ctx = context_with(vec![ContextElement::CodeDeployRollback(CodeDeployRollbackElement {
            application_name: "orders".to_string(),
            deployment_group: "orders-dg".to_string(),
            old_bundle: Some(bundle("orders/11.zip")),
        })]);
        let step = CodeDeployRollbackStep::new("rollback", h.services.clone());
        step.execute(&ctx).await.unwrap();
        assert_eq!(h.dispatcher.submitted()[0].payload["bundle"]["key"], "orders/11.zip");
    }
}
