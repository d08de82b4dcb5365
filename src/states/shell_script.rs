//! Script execution on a target host or directly on a worker.

use super::{require_phase, single_response, StepServices};
use crate::context::{ContextElementType, ExecutionContext};
use crate::dispatch::{ResponseData, TaskDescriptor, TaskType};
use crate::error::{FieldErrors, StateError, StateResult};
use crate::step::{
    CommandExecutionData, ExecutionResponse, StateExecutionData, Step, StepType,
};
use crate::workflow::sweeping_output::{SweepingOutput, SweepingOutputScope};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::{BTreeMap, HashMap};
use tracing::{debug, instrument};

#[derive(Debug)]
pub struct ShellScriptStep {
    name: String,
    script: String,
    execute_on_delegate: bool,
    target_host: Option<String>,
    output_variables: Vec<String>,
    sweeping_output: Option<(String, SweepingOutputScope)>,
    requires_artifact: bool,
    timeout_ms: Option<u64>,
    services: StepServices,
}

impl ShellScriptStep {
    pub fn new(name: impl Into<String>, script: impl Into<String>, services: StepServices) -> Self {
        Self {
            name: name.into(),
            script: script.into(),
            execute_on_delegate: true,
            target_host: None,
            output_variables: Vec::new(),
            sweeping_output: None,
            requires_artifact: false,
            timeout_ms: None,
            services,
        }
    }

    /// Run on `host` (an expression or literal) instead of the worker itself
    pub fn on_target_host(mut self, host: impl Into<String>) -> Self {
        self.execute_on_delegate = false;
        self.target_host = Some(host.into());
        self
    }

    /// Export the named script variables, optionally as sweeping output
    pub fn with_output_variables(
        mut self,
        variables: Vec<String>,
        sweeping_output: Option<(String, SweepingOutputScope)>,
    ) -> Self {
        self.output_variables = variables;
        self.sweeping_output = sweeping_output;
        self
    }

    /// Fail when no artifact for the phase's service is in context
    pub fn requiring_artifact(mut self) -> Self {
        self.requires_artifact = true;
        self
    }

    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = Some(timeout_ms);
        self
    }

    fn resolve_artifact(&self, context: &dyn ExecutionContext) -> StateResult<Option<String>> {
        if !self.requires_artifact {
            return Ok(None);
        }

        let phase = require_phase(context)?;
        context
            .context_elements(ContextElementType::Artifact)
            .iter()
            .rev()
            .filter_map(|e| e.as_artifact())
            .find(|a| a.service_ids.contains(&phase.service_id))
            .map(|a| Some(a.build_no.clone()))
            .ok_or_else(|| {
                StateError::InvalidRequest(format!(
                    "Unable to find artifact for service {}",
                    phase.service_name
                ))
            })
    }

    fn exported_variables(&self, output: &Value) -> BTreeMap<String, String> {
        let Some(values) = output.get("outputVariables").and_then(Value::as_object) else {
            return BTreeMap::new();
        };
        self.output_variables
            .iter()
            .filter_map(|name| {
                values
                    .get(name)
                    .and_then(Value::as_str)
                    .map(|v| (name.clone(), v.to_string()))
            })
            .collect()
    }
}

#[async_trait]
impl Step for ShellScriptStep {
    fn name(&self) -> &str {
        &self.name
    }

    fn step_type(&self) -> StepType {
        StepType::ShellScript
    }

    fn validate_fields(&self) -> FieldErrors {
        let mut errors = FieldErrors::new();
        if self.script.trim().is_empty() {
            errors.insert("scriptString".to_string(), "Script should be provided".to_string());
        }
        if !self.execute_on_delegate
            && self.target_host.as_deref().map_or(true, |h| h.trim().is_empty())
        {
            errors.insert(
                "targetHost".to_string(),
                "Target host should be provided when not executing on the worker".to_string(),
            );
        }
        if self.sweeping_output.is_some() && self.output_variables.is_empty() {
            errors.insert(
                "outputVars".to_string(),
                "Output variables should be provided to publish a sweeping output".to_string(),
            );
        }
        errors
    }

    fn timeout_millis(&self) -> Option<u64> {
        self.timeout_ms
    }

    #[instrument(skip(self, context), fields(step = %self.name))]
    async fn execute(&self, context: &dyn ExecutionContext) -> StateResult<ExecutionResponse> {
        let script = context.render_required(&self.script)?;
        let host_name = match &self.target_host {
            Some(host) if !self.execute_on_delegate => Some(context.render_required(host)?),
            _ => None,
        };
        let artifact_build_no = self.resolve_artifact(context)?;

        let activity_id = self
            .services
            .create_activity(context, &self.name, StepType::ShellScript.as_str())
            .await?;

        let data = StateExecutionData::Command(CommandExecutionData {
            activity_id: activity_id.clone(),
            host_name: host_name.clone(),
            artifact_build_no: artifact_build_no.clone(),
            output_variables: BTreeMap::new(),
        });
        context.save_state_execution_data(data.clone());

        let descriptor = TaskDescriptor::new(
            TaskType::ShellScript,
            context.account_id(),
            context.app_id(),
            json!({
                "script": script,
                "host": host_name,
                "executeOnDelegate": self.execute_on_delegate,
                "outputVars": self.output_variables,
                "artifactBuildNo": artifact_build_no,
                "serviceVariables": context.service_variables(),
            }),
        )
        .with_wait_id(activity_id)
        .with_env_id(context.env_id().map(str::to_string))
        .with_timeout_ms(self.services.task_timeout_ms(self.timeout_ms))
        .with_description(format!("Shell script {}", self.name));

        let wait_id = self.services.dispatcher.submit(descriptor).await?;
        debug!(wait_id = %wait_id, "Shell script submitted");

        Ok(ExecutionResponse::suspended(vec![wait_id]).with_state_data(data))
    }

    async fn handle_async_response(
        &self,
        context: &dyn ExecutionContext,
        responses: &HashMap<String, ResponseData>,
    ) -> StateResult<ExecutionResponse> {
        let response = single_response(responses)?;
        let Some(StateExecutionData::Command(mut data)) = context.state_execution_data() else {
            return Err(StateError::Internal("shell script resumed without execution data".to_string()));
        };

        let status = response.status();
        self.services.finish_activity(&data.activity_id, status).await;

        if let Some(result) = response.as_task() {
            data.output_variables = self.exported_variables(&result.output);
        }

        if status.is_broken() {
            let message = response.error_message().unwrap_or("script failed").to_string();
            return Ok(ExecutionResponse::completed(status)
                .with_message(message)
                .with_state_data(StateExecutionData::Command(data)));
        }

        if let Some((name, scope)) = &self.sweeping_output {
            self.services.outputs.save(SweepingOutput::new(
                context,
                name,
                *scope,
                json!(data.output_variables),
            ))?;
        }

        Ok(ExecutionResponse::completed(status).with_state_data(StateExecutionData::Command(data)))
    }

    async fn handle_abort(&self, context: &dyn ExecutionContext) -> StateResult<()> {
        self.services.abort_activity(context).await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::ExecutionStatus;
    use crate::context::{ArtifactElement, ContextElement, DeploymentType};
    use crate::states::test_support::*;
    use crate::workflow::sweeping_output::SweepingOutputStore;

    #[tokio::test]
    async fn test_submits_rendered_script() {
        let h = harness();
        let ctx = context_with(vec![phase_element(DeploymentType::Ssh)]);
        let step = ShellScriptStep::new("deploy", "echo ${service.name}", h.services.clone());

        let response = step.execute(&ctx).await.unwrap();
        assert!(response.is_async);
        let submitted = h.dispatcher.submitted_of(TaskType::ShellScript);
        assert_eq!(submitted.len(), 1);
        assert_eq!(submitted[0].payload["script"], "echo orders");
        assert_eq!(response.correlation_ids, vec![submitted[0].wait_id.clone()]);
        assert!(ctx.state_execution_data().is_some());
    }

    #[tokio::test]
    async fn test_unresolved_expression_is_error() {
        let h = harness();
        let ctx = context_with(vec![]);
        let step = ShellScriptStep::new("deploy", "echo ${workflow.variables.nope}", h.services.clone());

        let err = step.execute(&ctx).await.unwrap_err();
        assert_eq!(err.to_execution_status(), ExecutionStatus::Error);
        assert!(h.dispatcher.submitted().is_empty());
    }

    #[tokio::test]
    async fn test_missing_artifact() {
        let h = harness();
        let ctx = context_with(vec![phase_element(DeploymentType::Ssh)]);
        let step = ShellScriptStep::new("install", "install.sh", h.services.clone()).requiring_artifact();

        let err = step.execute(&ctx).await.unwrap_err();
        assert_eq!(err.to_string(), "Unable to find artifact for service orders");
    }

    #[tokio::test]
    async fn test_artifact_matched_by_service() {
        let h = harness();
        let ctx = context_with(vec![
            phase_element(DeploymentType::Ssh),
            ContextElement::Artifact(ArtifactElement {
                uuid: "art-1".to_string(),
                name: "orders-jar".to_string(),
                build_no: "42".to_string(),
                service_ids: vec!["svc-1".to_string()],
            }),
        ]);
        let step = ShellScriptStep::new("install", "install.sh", h.services.clone()).requiring_artifact();

        step.execute(&ctx).await.unwrap();
        assert_eq!(h.dispatcher.submitted()[0].payload["artifactBuildNo"], "42");
    }

    #[tokio::test]
    async fn test_output_variables_published() {
        let h = harness();
        let ctx = context_with(vec![phase_element(DeploymentType::Ssh)]);
        let step = ShellScriptStep::new("build", "export VERSION=1", h.services.clone())
            .with_output_variables(
                vec!["VERSION".to_string()],
                Some(("build".to_string(), SweepingOutputScope::Workflow)),
            );

        let response = step.execute(&ctx).await.unwrap();
        let wait_id = response.correlation_ids[0].clone();
        let result = step
            .handle_async_response(
                &ctx,
                &respond(
                    &wait_id,
                    ResponseData::success(json!({"outputVariables": {"VERSION": "1", "OTHER": "x"}})),
                ),
            )
            .await
            .unwrap();

        assert_eq!(result.status, ExecutionStatus::Success);
        let saved = h
            .outputs
            .find(SweepingOutputScope::Workflow, "wfe", "build")
            .unwrap();
        assert_eq!(saved.value, json!({"VERSION": "1"}));
        assert_eq!(h.activities.get(&wait_id).unwrap().status, ExecutionStatus::Success);
    }

    #[test]
    fn test_validation_messages() {
        let h = harness();
        let step = ShellScriptStep::new("x", " ", h.services.clone()).on_target_host("");
        let errors = step.validate_fields();
        assert!(errors.contains_key("scriptString"));
        assert!(errors.contains_key("targetHost"));
    }
}
