//! Container service resize and its rollback.

use super::{instances_from_output, require_infra_mapping, require_phase, single_response, StepServices};
use crate::constants::ExecutionStatus;
use crate::context::{
    ContainerRollbackElement, ContainerServiceData, ContextElement, ContextElementType,
    ExecutionContext, InstanceListElement,
};
use crate::dispatch::{ResponseData, TaskDescriptor, TaskType};
use crate::error::{FieldErrors, StateError, StateResult};
use crate::step::{ContainerExecutionData, ExecutionResponse, StateExecutionData, Step, StepType};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::HashMap;

/// Target size of the new container service
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstanceCount {
    Count(u32),
    Percentage(u8),
}

#[derive(Debug)]
pub struct ContainerDeployStep {
    name: String,
    instance_count: InstanceCount,
    traffic_percent: Option<i32>,
    services: StepServices,
}

impl ContainerDeployStep {
    pub fn new(name: impl Into<String>, instance_count: InstanceCount, services: StepServices) -> Self {
        Self {
            name: name.into(),
            instance_count,
            traffic_percent: None,
            services,
        }
    }

    /// Shift this share of traffic to the new service (blue/green, canary)
    pub fn with_traffic_percent(mut self, percent: i32) -> Self {
        self.traffic_percent = Some(percent);
        self
    }
}

fn service_data_from_output(output: &Value) -> StateResult<Vec<ContainerServiceData>> {
    match output.get("serviceData") {
        Some(raw) => Ok(serde_json::from_value(raw.clone())?),
        None => Ok(Vec::new()),
    }
}

#[async_trait]
impl Step for ContainerDeployStep {
    fn name(&self) -> &str {
        &self.name
    }

    fn step_type(&self) -> StepType {
        StepType::ContainerDeploy
    }

    fn validate_fields(&self) -> FieldErrors {
        let mut errors = FieldErrors::new();
        if let InstanceCount::Percentage(p) = self.instance_count {
            if p == 0 || p > 100 {
                errors.insert("instanceCount".to_string(), "Percentage should be between 1 and 100".to_string());
            }
        }
        if let Some(t) = self.traffic_percent {
            if !(0..=100).contains(&t) {
                errors.insert("trafficPercent".to_string(), "Traffic percent should be between 0 and 100".to_string());
            }
        }
        errors
    }

    async fn execute(&self, context: &dyn ExecutionContext) -> StateResult<ExecutionResponse> {
        let phase = require_phase(context)?;
        let infra = require_infra_mapping(context)?;
        let cluster_name = infra
            .cluster_name
            .clone()
            .ok_or_else(|| StateError::missing_element("cluster name on infrastructure mapping"))?;

        let activity_id = self
            .services
            .create_activity(context, &self.name, StepType::ContainerDeploy.as_str())
            .await?;

        let data = StateExecutionData::Container(ContainerExecutionData {
            activity_id: activity_id.clone(),
            cluster_name: cluster_name.clone(),
            service_data: Vec::new(),
        });
        context.save_state_execution_data(data.clone());

        let (count, unit) = match self.instance_count {
            InstanceCount::Count(c) => (c, "COUNT"),
            InstanceCount::Percentage(p) => (u32::from(p), "PERCENTAGE"),
        };
        let descriptor = TaskDescriptor::new(
            TaskType::ContainerResize,
            context.account_id(),
            context.app_id(),
            json!({
                "clusterName": cluster_name,
                "serviceName": phase.service_name,
                "instanceCount": count,
                "instanceUnitType": unit,
                "trafficPercent": self.traffic_percent,
                "rollback": false,
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
        let Some(StateExecutionData::Container(mut data)) = context.state_execution_data() else {
            return Err(StateError::Internal("container deploy resumed without execution data".to_string()));
        };

        let status = response.status();
        self.services.finish_activity(&data.activity_id, status).await;

        let output = response.as_task().map(|r| r.output.clone()).unwrap_or(Value::Null);
        data.service_data = service_data_from_output(&output)?;

        if status != ExecutionStatus::Success {
            return Ok(ExecutionResponse::completed(status)
                .with_message(response.error_message().unwrap_or("Container resize failed"))
                .with_state_data(StateExecutionData::Container(data)));
        }

        let phase_name = context.phase_element().map(|p| p.phase_name);
        let instances = instances_from_output(&output, phase_name.as_deref(), None);
        Ok(ExecutionResponse::success()
            .with_notify_elements(vec![ContextElement::InstanceList(InstanceListElement { instances })])
            .with_state_data(StateExecutionData::Container(data)))
    }

    async fn handle_abort(&self, context: &dyn ExecutionContext) -> StateResult<()> {
        self.services.abort_activity(context).await;
        Ok(())
    }
}

/// Resize services back using the reversed counts pushed by the rollback phase
#[derive(Debug)]
pub struct ContainerRollbackStep {
    name: String,
    services: StepServices,
}

impl ContainerRollbackStep {
    pub fn new(name: impl Into<String>, services: StepServices) -> Self {
        Self {
            name: name.into(),
            services,
        }
    }
}

#[async_trait]
impl Step for ContainerRollbackStep {
    fn name(&self) -> &str {
        &self.name
    }

    fn step_type(&self) -> StepType {
        StepType::ContainerRollback
    }

    async fn execute(&self, context: &dyn ExecutionContext) -> StateResult<ExecutionResponse> {
        let rollback = context
            .context_element(ContextElementType::ContainerRollback)
            .and_then(|e| match e {
                ContextElement::ContainerRollback(r) => Some(r),
                _ => None,
            });
        let Some(ContainerRollbackElement {
            cluster_name,
            service_data,
        }) = rollback
        else {
            return Ok(ExecutionResponse::skipped("No container deployment recorded for rollback"));
        };

        let activity_id = self
            .services
            .create_activity(context, &self.name, StepType::ContainerRollback.as_str())
            .await?;

        let data = StateExecutionData::Container(ContainerExecutionData {
            activity_id: activity_id.clone(),
            cluster_name: cluster_name.clone(),
            service_data: service_data.clone(),
        });
        context.save_state_execution_data(data.clone());

        let descriptor = TaskDescriptor::new(
            TaskType::ContainerResize,
            context.account_id(),
            context.app_id(),
            json!({
                "clusterName": cluster_name,
                "serviceData": service_data,
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
