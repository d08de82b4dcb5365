//! Jenkins job trigger with a two-phase START / POLL protocol.
//!
//! The START task queues the build and reports the queued build URL. That
//! response is not terminal: it triggers exactly one POLL task, whose
//! response decides the step's status. An empty queued build URL fails the
//! step without polling.

use super::{single_response, StepServices};
use crate::constants::ExecutionStatus;
use crate::context::ExecutionContext;
use crate::dispatch::{ResponseData, TaskDescriptor, TaskType};
use crate::error::{FieldErrors, StateError, StateResult};
use crate::step::{
    ExecutionResponse, JenkinsExecutionData, JenkinsPhase, StateExecutionData, Step, StepType,
};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::{BTreeMap, HashMap};
use tracing::info;

#[derive(Debug)]
pub struct JenkinsStep {
    name: String,
    jenkins_config_id: String,
    job_name: String,
    parameters: BTreeMap<String, String>,
    timeout_ms: Option<u64>,
    services: StepServices,
}

impl JenkinsStep {
    pub fn new(
        name: impl Into<String>,
        jenkins_config_id: impl Into<String>,
        job_name: impl Into<String>,
        services: StepServices,
    ) -> Self {
        Self {
            name: name.into(),
            jenkins_config_id: jenkins_config_id.into(),
            job_name: job_name.into(),
            parameters: BTreeMap::new(),
            timeout_ms: None,
            services,
        }
    }

    pub fn with_parameter(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.parameters.insert(name.into(), value.into());
        self
    }

    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = Some(timeout_ms);
        self
    }

    fn descriptor(
        &self,
        context: &dyn ExecutionContext,
        task_type: TaskType,
        payload: Value,
    ) -> TaskDescriptor {
        TaskDescriptor::new(task_type, context.account_id(), context.app_id(), payload)
            .with_env_id(context.env_id().map(str::to_string))
            .with_timeout_ms(self.services.task_timeout_ms(self.timeout_ms))
    }

    async fn start_poll(
        &self,
        context: &dyn ExecutionContext,
        mut data: JenkinsExecutionData,
        output: &Value,
    ) -> StateResult<ExecutionResponse> {
        let queued_build_url = output
            .get("queuedBuildUrl")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();

        if queued_build_url.is_empty() {
            self.services
                .finish_activity(&data.activity_id, ExecutionStatus::Failed)
                .await;
            return Ok(ExecutionResponse::failed(format!(
                "Failed to queue Jenkins job {}",
                data.job_name
            ))
            .with_state_data(StateExecutionData::Jenkins(data)));
        }

        data.phase = JenkinsPhase::Poll;
        data.queued_build_url = Some(queued_build_url.clone());
        let resumed = StateExecutionData::Jenkins(data);
        context.save_state_execution_data(resumed.clone());

        let descriptor = self.descriptor(
            context,
            TaskType::JenkinsPoll,
            json!({
                "jenkinsConfigId": self.jenkins_config_id,
                "queuedBuildUrl": queued_build_url,
            }),
        );
        let wait_id = self.services.dispatcher.submit(descriptor).await?;
        info!(wait_id = %wait_id, job = %self.job_name, "Jenkins build queued, polling");

        Ok(ExecutionResponse::suspended(vec![wait_id]).with_state_data(resumed))
    }
}

#[async_trait]
impl Step for JenkinsStep {
    fn name(&self) -> &str {
        &self.name
    }

    fn step_type(&self) -> StepType {
        StepType::Jenkins
    }

    fn validate_fields(&self) -> FieldErrors {
        let mut errors = FieldErrors::new();
        if self.jenkins_config_id.trim().is_empty() {
            errors.insert("jenkinsConfigId".to_string(), "Jenkins server should be provided".to_string());
        }
        if self.job_name.trim().is_empty() {
            errors.insert("jobName".to_string(), "Job name should be provided".to_string());
        }
        errors
    }

    fn timeout_millis(&self) -> Option<u64> {
        self.timeout_ms
    }

    async fn execute(&self, context: &dyn ExecutionContext) -> StateResult<ExecutionResponse> {
        let job_name = context.render_required(&self.job_name)?;
        let parameters = self
            .parameters
            .iter()
            .map(|(k, v)| Ok((k.clone(), context.render_required(v)?)))
            .collect::<StateResult<BTreeMap<_, _>>>()?;

        let activity_id = self
            .services
            .create_activity(context, &self.name, StepType::Jenkins.as_str())
            .await?;

        let data = StateExecutionData::Jenkins(JenkinsExecutionData {
            activity_id,
            job_name: job_name.clone(),
            phase: JenkinsPhase::Start,
            queued_build_url: None,
            build_url: None,
            build_number: None,
        });
        context.save_state_execution_data(data.clone());

        let descriptor = self.descriptor(
            context,
            TaskType::JenkinsStart,
            json!({
                "jenkinsConfigId": self.jenkins_config_id,
                "jobName": job_name,
                "parameters": parameters,
            }),
        );
        let wait_id = self.services.dispatcher.submit(descriptor).await?;
        Ok(ExecutionResponse::suspended(vec![wait_id]).with_state_data(data))
    }

    async fn handle_async_response(
        &self,
        context: &dyn ExecutionContext,
        responses: &HashMap<String, ResponseData>,
    ) -> StateResult<ExecutionResponse> {
        let response = single_response(responses)?;
        let Some(StateExecutionData::Jenkins(mut data)) = context.state_execution_data() else {
            return Err(StateError::Internal("jenkins step resumed without execution data".to_string()));
        };

        let status = response.status();
        if status != ExecutionStatus::Success {
            self.services.finish_activity(&data.activity_id, status).await;
            return Ok(ExecutionResponse::completed(status)
                .with_message(response.error_message().unwrap_or("Jenkins task failed"))
                .with_state_data(StateExecutionData::Jenkins(data)));
        }

        let output = response
            .as_task()
            .map(|r| r.output.clone())
            .unwrap_or(Value::Null);

        match data.phase {
            JenkinsPhase::Start => self.start_poll(context, data, &output).await,
            JenkinsPhase::Poll => {
                let text = |key: &str| output.get(key).and_then(Value::as_str).map(str::to_string);
                data.build_url = text("buildUrl");
                data.build_number = text("buildNumber");
                let build_status = match text("buildResult").as_deref() {
                    Some("SUCCESS") | None => ExecutionStatus::Success,
                    Some(_) => ExecutionStatus::Failed,
                };
                self.services
                    .finish_activity(&data.activity_id, build_status)
                    .await;
                let mut result = ExecutionResponse::completed(build_status)
                    .with_state_data(StateExecutionData::Jenkins(data));
                if build_status != ExecutionStatus::Success {
                    result = result.with_message(format!(
                        "Jenkins build finished with {}",
                        text("buildResult").unwrap_or_default()
                    ));
                }
                Ok(result)
            }
        }
    }

    async fn handle_abort(&self, context: &dyn ExecutionContext) -> StateResult<()> {
        self.services.abort_activity(context).await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::states::test_support::*;

    fn step(h: &Harness) -> JenkinsStep {
        JenkinsStep::new("build", "jenkins-1", "orders-build", h.services.clone())
            .with_parameter("branch", "${workflow.variables.branch}")
    }

    fn ctx() -> crate::context::StateExecutionContext {
        crate::context::StateExecutionContext::builder()
            .account_id("acc")
            .app_id("app")
            .workflow_variable("branch", json!("main"))
            .state_execution_instance_id("step-1")
            .build()
    }

    #[tokio::test]
    async fn test_start_then_single_poll() {
        let h = harness();
        let step = step(&h);
        let ctx = ctx();

        let started = step.execute(&ctx).await.unwrap();
        assert_eq!(h.dispatcher.submitted_of(TaskType::JenkinsStart).len(), 1);
        assert_eq!(h.dispatcher.submitted()[0].payload["parameters"]["branch"], "main");

        let polled = step
            .handle_async_response(
                &ctx,
                &respond(
                    &started.correlation_ids[0],
                    ResponseData::success(json!({"queuedBuildUrl": "https://ci/queue/7"})),
                ),
            )
            .await
            .unwrap();
        assert!(polled.is_async);
        assert_eq!(polled.status, ExecutionStatus::Running);
        let polls = h.dispatcher.submitted_of(TaskType::JenkinsPoll);
        assert_eq!(polls.len(), 1);
        assert_eq!(polled.correlation_ids, vec![polls[0].wait_id.clone()]);

        let finished = step
            .handle_async_response(
                &ctx,
                &respond(
                    &polls[0].wait_id,
                    ResponseData::success(json!({"buildResult": "SUCCESS", "buildNumber": "12"})),
                ),
            )
            .await
            .unwrap();
        assert_eq!(finished.status, ExecutionStatus::Success);
        assert_eq!(h.dispatcher.submitted_of(TaskType::JenkinsPoll).len(), 1);
    }

    #[tokio::test]
    async fn test_empty_queue_url_fails_without_poll() {
        let h = harness();
        let step = step(&h);
        let ctx = ctx();

        let started = step.execute(&ctx).await.unwrap();
        let result = step
            .handle_async_response(
                &ctx,
                &respond(&started.correlation_ids[0], ResponseData::success(json!({"queuedBuildUrl": ""}))),
            )
            .await
            .unwrap();

        assert_eq!(result.status, ExecutionStatus::Failed);
        assert!(!result.is_async);
        assert!(h.dispatcher.submitted_of(TaskType::JenkinsPoll).is_empty());
    }

    #[tokio::test]
    async fn test_failed_build() {
        let h = harness();
        let step = step(&h);
        let ctx = ctx();
        let started = step.execute(&ctx).await.unwrap();
        let polled = step
            .handle_async_response(
                &ctx,
                &respond(
                    &started.correlation_ids[0],
                    ResponseData::success(json!({"queuedBuildUrl": "https://ci/queue/8"})),
                ),
            )
            .await
            .unwrap();
        let result = step
            .handle_async_response(
                &ctx,
                &respond(
                    &polled.correlation_ids[0],
                    ResponseData::success(json!({"buildResult": "FAILURE"})),
                ),
            )
            .await
            .unwrap();
        assert_eq!(result.status, ExecutionStatus::Failed);
    }
}
