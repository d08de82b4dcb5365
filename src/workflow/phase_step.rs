//! # Phase Step Sub-Workflow
//!
//! A named group of steps inside a phase (pre-deployment, deploy, verify,
//! wrap-up, ...). The phase step spawns its children through the engine,
//! sequentially or all at once, and on resume rolls their statuses up and
//! records one [`PhaseStepExecutionSummary`] for the enclosing phase.

use super::summary::{
    PhaseExecutionSummaryStore, PhaseStepExecutionSummary, PhaseStepType, StepExecutionSummary,
};
use crate::constants::{events, ExecutionStatus};
use crate::context::{ContextElement, ExecutionContext};
use crate::dispatch::{ElementNotify, ResponseData};
use crate::error::{FieldErrors, StateResult};
use crate::logging::log_phase_operation;
use crate::step::{
    aggregate_status, ExecutionMode, ExecutionResponse, PhaseStepExecutionData, SpawnChild,
    SpawnPlan, StateExecutionData, Step, StepType,
};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

pub struct PhaseStepSubWorkflow {
    name: String,
    phase_step_type: PhaseStepType,
    mode: ExecutionMode,
    steps: Vec<Arc<dyn Step>>,
    summaries: Arc<dyn PhaseExecutionSummaryStore>,
}

impl PhaseStepSubWorkflow {
    pub fn new(
        name: impl Into<String>,
        phase_step_type: PhaseStepType,
        summaries: Arc<dyn PhaseExecutionSummaryStore>,
    ) -> Self {
        Self {
            name: name.into(),
            phase_step_type,
            mode: ExecutionMode::Sequential,
            steps: Vec::new(),
            summaries,
        }
    }

    pub fn parallel(mut self) -> Self {
        self.mode = ExecutionMode::Parallel;
        self
    }

    pub fn with_step(mut self, step: Arc<dyn Step>) -> Self {
        self.steps.push(step);
        self
    }

    pub fn phase_step_type(&self) -> PhaseStepType {
        self.phase_step_type
    }

    pub fn mode(&self) -> ExecutionMode {
        self.mode
    }

    async fn record_summary(
        &self,
        context: &dyn ExecutionContext,
        status: ExecutionStatus,
        step_summaries: Vec<StepExecutionSummary>,
    ) -> StateResult<()> {
        let Some(phase) = context.phase_element() else {
            debug!(phase_step = %self.name, "No enclosing phase, summary not recorded");
            return Ok(());
        };
        self.summaries
            .append_phase_step(
                context.app_id(),
                context.workflow_execution_id(),
                &phase.phase_name,
                PhaseStepExecutionSummary {
                    phase_step_name: self.name.clone(),
                    phase_step_type: self.phase_step_type,
                    status,
                    step_summaries,
                },
            )
            .await
    }
}

impl std::fmt::Debug for PhaseStepSubWorkflow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PhaseStepSubWorkflow")
            .field("name", &self.name)
            .field("phase_step_type", &self.phase_step_type)
            .field("mode", &self.mode)
            .field("steps", &self.steps.len())
            .finish()
    }
}

/// Child notifications in declaration order
pub(crate) fn notifies_in_order<'a>(
    names: impl Iterator<Item = &'a str>,
    responses: &'a HashMap<String, ResponseData>,
) -> Vec<&'a ElementNotify> {
    let notifies: Vec<&ElementNotify> = responses.values().filter_map(ResponseData::as_notify).collect();
    names
        .filter_map(|name| {
            notifies
                .iter()
                .find(|n| n.step_name.as_deref() == Some(name))
                .copied()
        })
        .collect()
}

/// Message of the first broken child
pub(crate) fn first_failure(notifies: &[&ElementNotify]) -> Option<String> {
    notifies.iter().find(|n| n.status.is_broken()).map(|n| {
        let name = n.step_name.as_deref().unwrap_or("step");
        match &n.error_message {
            Some(message) => format!("{name}: {message}"),
            None => format!("{name} {}", n.status),
        }
    })
}

#[async_trait]
impl Step for PhaseStepSubWorkflow {
    fn name(&self) -> &str {
        &self.name
    }

    fn step_type(&self) -> StepType {
        StepType::PhaseStep
    }

    fn validate_fields(&self) -> FieldErrors {
        let mut errors = FieldErrors::new();
        let mut seen = std::collections::HashSet::new();
        for step in &self.steps {
            if !seen.insert(step.name()) {
                errors.insert("steps".to_string(), format!("Duplicate step name {}", step.name()));
            }
        }
        errors
    }

    async fn execute(&self, context: &dyn ExecutionContext) -> StateResult<ExecutionResponse> {
        let instance_id = context.state_execution_instance_id().to_string();
        let data = StateExecutionData::PhaseStep(PhaseStepExecutionData {
            phase_step_name: self.name.clone(),
            mode: self.mode,
            child_count: self.steps.len(),
        });

        if self.steps.is_empty() {
            self.record_summary(context, ExecutionStatus::Success, Vec::new()).await?;
            return Ok(ExecutionResponse::success().with_state_data(data));
        }

        log_phase_operation(
            events::SPAWN_STARTED,
            &instance_id,
            &self.name,
            self.steps.len(),
            ExecutionStatus::Running.as_str(),
        );

        let children = self
            .steps
            .iter()
            .map(|step| SpawnChild {
                name: step.name().to_string(),
                step: Arc::clone(step),
                elements: Vec::new(),
            })
            .collect();

        Ok(ExecutionResponse::spawning(SpawnPlan {
            notify_id: instance_id,
            mode: self.mode,
            children,
        })
        .with_state_data(data))
    }

    async fn handle_async_response(
        &self,
        context: &dyn ExecutionContext,
        responses: &HashMap<String, ResponseData>,
    ) -> StateResult<ExecutionResponse> {
        let notifies = notifies_in_order(self.steps.iter().map(|s| s.name()), responses);
        let status = aggregate_status(responses.values().map(ResponseData::status));

        let step_summaries = notifies
            .iter()
            .map(|n| StepExecutionSummary {
                step_name: n.step_name.clone().unwrap_or_default(),
                step_type: n.step_type,
                status: n.status,
                error_message: n.error_message.clone(),
                state_execution_data: n.state_execution_data.clone(),
            })
            .collect();
        self.record_summary(context, status, step_summaries).await?;

        let notify_elements: Vec<ContextElement> = notifies
            .iter()
            .flat_map(|n| n.notify_elements.iter().cloned())
            .collect();

        log_phase_operation(
            events::SPAWN_COMPLETED,
            context.state_execution_instance_id(),
            &self.name,
            notifies.len(),
            status.as_str(),
        );

        let mut response = ExecutionResponse::completed(status).with_notify_elements(notify_elements);
        if let Some(message) = first_failure(&notifies) {
            response = response.with_message(message);
        }
        Ok(response)
    }
}
