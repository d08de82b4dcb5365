//! # Phase Sub-Workflow
//!
//! A deployment phase binds one service to one infrastructure mapping and
//! runs its phase steps in order. Forward phases spawn the phase steps with a
//! fresh [`PhaseElement`] on their context. Rollback phases first rebuild
//! the undo instructions from the forward phase's recorded summary and push
//! them, together with the artifact to redeploy, into every phase step.

use super::artifact::{
    effective_artifact_variables, resolve_rollback_artifact, ArtifactHistory, ArtifactVariable,
};
use super::catalog::InfrastructureCatalog;
use super::phase_step::{first_failure, notifies_in_order};
use super::rollback::rollback_elements;
use super::summary::PhaseExecutionSummaryStore;
use super::sweeping_output::{phase_scope_id, SweepingOutput, SweepingOutputScope, SweepingOutputStore};
use crate::constants::{events, system, ExecutionStatus};
use crate::context::{ContextElement, DeploymentType, ExecutionContext, PhaseElement};
use crate::dispatch::ResponseData;
use crate::error::{FieldErrors, StateError, StateResult};
use crate::logging::log_phase_operation;
use crate::step::{
    aggregate_status, ExecutionMode, ExecutionResponse, PhaseExecutionData, SpawnChild, SpawnPlan,
    StateExecutionData, Step, StepType,
};
use async_trait::async_trait;
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, instrument};

/// Collaborators shared by every phase of a workflow
#[derive(Clone)]
pub struct PhaseServices {
    pub catalog: Arc<dyn InfrastructureCatalog>,
    pub summaries: Arc<dyn PhaseExecutionSummaryStore>,
    pub artifacts: Arc<dyn ArtifactHistory>,
    pub outputs: Arc<dyn SweepingOutputStore>,
}

impl PhaseServices {
    pub fn new(
        catalog: Arc<dyn InfrastructureCatalog>,
        summaries: Arc<dyn PhaseExecutionSummaryStore>,
        artifacts: Arc<dyn ArtifactHistory>,
        outputs: Arc<dyn SweepingOutputStore>,
    ) -> Self {
        Self {
            catalog,
            summaries,
            artifacts,
            outputs,
        }
    }
}

impl std::fmt::Debug for PhaseServices {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PhaseServices").finish_non_exhaustive()
    }
}

pub struct PhaseSubWorkflow {
    phase_name: String,
    /// Service id or an expression yielding it
    service_id: String,
    /// Infrastructure mapping id or an expression yielding it
    infra_mapping_id: String,
    deployment_type: DeploymentType,
    phase_name_for_rollback: Option<String>,
    phase_steps: Vec<Arc<dyn Step>>,
    artifact_variables: Vec<ArtifactVariable>,
    services: PhaseServices,
}

impl PhaseSubWorkflow {
    pub fn new(
        phase_name: impl Into<String>,
        service_id: impl Into<String>,
        infra_mapping_id: impl Into<String>,
        deployment_type: DeploymentType,
        services: PhaseServices,
    ) -> Self {
        Self {
            phase_name: phase_name.into(),
            service_id: service_id.into(),
            infra_mapping_id: infra_mapping_id.into(),
            deployment_type,
            phase_name_for_rollback: None,
            phase_steps: Vec::new(),
            artifact_variables: Vec::new(),
            services,
        }
    }

    /// Turn this phase into the rollback of `forward_phase`
    pub fn rollback_of(mut self, forward_phase: impl Into<String>) -> Self {
        self.phase_name_for_rollback = Some(forward_phase.into());
        self
    }

    pub fn with_phase_step(mut self, phase_step: Arc<dyn Step>) -> Self {
        self.phase_steps.push(phase_step);
        self
    }

    pub fn with_artifact_variables(mut self, variables: Vec<ArtifactVariable>) -> Self {
        self.artifact_variables = variables;
        self
    }

    pub fn phase_name(&self) -> &str {
        &self.phase_name
    }

    pub fn is_rollback(&self) -> bool {
        self.phase_name_for_rollback.is_some()
    }

    /// Rollback elements and artifact for the forward phase, `None` when it never ran
    async fn rollback_context(
        &self,
        context: &dyn ExecutionContext,
        forward_phase: &str,
        service_id: &str,
    ) -> StateResult<Option<Vec<ContextElement>>> {
        let Some(summary) = self
            .services
            .summaries
            .find(context.app_id(), context.workflow_execution_id(), forward_phase)
            .await?
        else {
            return Ok(None);
        };

        let mut elements = rollback_elements(&summary);

        let previous = self
            .services
            .artifacts
            .last_successful_execution(
                context.app_id(),
                context.workflow_id(),
                context.workflow_execution_id(),
            )
            .await?;
        if let Some(previous) = previous {
            let effective = effective_artifact_variables(
                &self.artifact_variables,
                service_id,
                context.env_id(),
            );
            if let Some(artifact) = resolve_rollback_artifact(&effective, &previous, service_id) {
                info!(
                    phase = %self.phase_name,
                    artifact_id = %artifact.uuid,
                    previous_execution = %previous.workflow_execution_id,
                    "Rolling back to previously deployed artifact"
                );
                elements.push(ContextElement::Artifact(artifact));
            }
        }

        Ok(Some(elements))
    }
}

impl std::fmt::Debug for PhaseSubWorkflow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PhaseSubWorkflow")
            .field("phase_name", &self.phase_name)
            .field("deployment_type", &self.deployment_type)
            .field("phase_name_for_rollback", &self.phase_name_for_rollback)
            .field("phase_steps", &self.phase_steps.len())
            .finish()
    }
}

#[async_trait]
impl Step for PhaseSubWorkflow {
    fn name(&self) -> &str {
        &self.phase_name
    }

    fn step_type(&self) -> StepType {
        StepType::Phase
    }

    fn validate_fields(&self) -> FieldErrors {
        let mut errors = FieldErrors::new();
        if self.service_id.trim().is_empty() {
            errors.insert("serviceId".to_string(), "Service should be provided".to_string());
        }
        if self.infra_mapping_id.trim().is_empty() {
            errors.insert(
                "infraMappingId".to_string(),
                "Infrastructure mapping should be provided".to_string(),
            );
        }
        if self
            .phase_name_for_rollback
            .as_deref()
            .is_some_and(|name| name.trim().is_empty())
        {
            errors.insert(
                "phaseNameForRollback".to_string(),
                "Phase to roll back should be provided".to_string(),
            );
        }
        errors
    }

    #[instrument(skip(self, context), fields(phase = %self.phase_name, rollback = self.is_rollback()))]
    async fn execute(&self, context: &dyn ExecutionContext) -> StateResult<ExecutionResponse> {
        let app_id = context.app_id();
        let service_id = context.render_required(&self.service_id)?;
        let infra_mapping_id = context.render_required(&self.infra_mapping_id)?;

        let service = self
            .services
            .catalog
            .service(app_id, &service_id)
            .await?
            .ok_or_else(|| StateError::InvalidRequest(format!("Service {service_id} not found")))?;
        let infra_mapping = self
            .services
            .catalog
            .infra_mapping(app_id, &infra_mapping_id)
            .await?
            .ok_or_else(|| {
                StateError::InvalidRequest(format!(
                    "Infrastructure mapping {infra_mapping_id} not found"
                ))
            })?;

        let rollback = self.is_rollback();
        let data = StateExecutionData::Phase(PhaseExecutionData {
            phase_name: self.phase_name.clone(),
            service_id: service.uuid.clone(),
            infra_mapping_id: infra_mapping.uuid.clone(),
            deployment_type: self.deployment_type,
            rollback,
        });

        let mut elements = vec![
            ContextElement::Phase(PhaseElement {
                phase_name: self.phase_name.clone(),
                service_id: service.uuid.clone(),
                service_name: service.name.clone(),
                infra_mapping_id: infra_mapping.uuid.clone(),
                deployment_type: self.deployment_type,
                rollback,
                phase_name_for_rollback: self.phase_name_for_rollback.clone(),
            }),
            ContextElement::Service(service),
            ContextElement::InfraMapping(infra_mapping),
        ];

        if let Some(forward_phase) = &self.phase_name_for_rollback {
            match self.rollback_context(context, forward_phase, &service_id).await? {
                Some(rollback_elements) => elements.extend(rollback_elements),
                None => {
                    info!(phase = %self.phase_name, forward_phase = %forward_phase, "Forward phase never ran, nothing to roll back");
                    return Ok(ExecutionResponse::success()
                        .with_message(format!(
                            "No execution found for phase {forward_phase}, nothing to roll back"
                        ))
                        .with_state_data(data));
                }
            }
        }

        if self.phase_steps.is_empty() {
            return Ok(ExecutionResponse::success().with_state_data(data));
        }

        let instance_id = context.state_execution_instance_id().to_string();
        log_phase_operation(
            events::SPAWN_STARTED,
            &instance_id,
            &self.phase_name,
            self.phase_steps.len(),
            ExecutionStatus::Running.as_str(),
        );

        let children = self
            .phase_steps
            .iter()
            .map(|phase_step| SpawnChild {
                name: phase_step.name().to_string(),
                step: Arc::clone(phase_step),
                elements: elements.clone(),
            })
            .collect();

        Ok(ExecutionResponse::spawning(SpawnPlan {
            notify_id: instance_id,
            mode: ExecutionMode::Sequential,
            children,
        })
        .with_state_data(data))
    }

    async fn handle_async_response(
        &self,
        context: &dyn ExecutionContext,
        responses: &HashMap<String, ResponseData>,
    ) -> StateResult<ExecutionResponse> {
        let notifies = notifies_in_order(self.phase_steps.iter().map(|s| s.name()), responses);
        let status = aggregate_status(responses.values().map(ResponseData::status));
        let notify_elements: Vec<ContextElement> = notifies
            .iter()
            .flat_map(|n| n.notify_elements.iter().cloned())
            .collect();

        let phase_steps: Vec<_> = notifies
            .iter()
            .map(|n| json!({"name": n.step_name, "status": n.status}))
            .collect();
        self.services.outputs.save(SweepingOutput {
            name: system::PHASE_OUTPUT.to_string(),
            scope: SweepingOutputScope::Phase,
            scope_id: phase_scope_id(context.workflow_execution_id(), &self.phase_name),
            app_id: context.app_id().to_string(),
            value: json!({
                "phaseName": self.phase_name,
                "rollback": self.is_rollback(),
                "status": status,
                "phaseSteps": phase_steps,
                "contextElements": notify_elements,
            }),
        })?;

        log_phase_operation(
            events::SPAWN_COMPLETED,
            context.state_execution_instance_id(),
            &self.phase_name,
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
