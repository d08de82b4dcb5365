//! Rollback elements rebuilt from a forward phase's summary.

use super::summary::{PhaseExecutionSummary, PhaseStepType};
use crate::context::{
    CodeDeployRollbackElement, ContainerRollbackElement, ContainerServiceData, ContextElement,
    HelmRollbackElement,
};
use crate::step::StateExecutionData;

/// Swap desired and previous counts and traffic of every service
///
/// Applying it twice gives back the input.
pub fn reverse_service_data(service_data: &[ContainerServiceData]) -> Vec<ContainerServiceData> {
    service_data.iter().map(ContainerServiceData::reversed).collect()
}

/// One rollback element per deployment recorded by the forward phase
pub fn rollback_elements(summary: &PhaseExecutionSummary) -> Vec<ContextElement> {
    let mut elements = Vec::new();
    for phase_step in &summary.phase_steps {
        for data in phase_step.step_data() {
            let element = match (phase_step.phase_step_type, data) {
                (PhaseStepType::ContainerDeploy, StateExecutionData::Container(container)) => {
                    ContextElement::ContainerRollback(ContainerRollbackElement {
                        cluster_name: container.cluster_name.clone(),
                        service_data: reverse_service_data(&container.service_data),
                    })
                }
                (PhaseStepType::CodeDeploy, StateExecutionData::CodeDeploy(code_deploy)) => {
                    ContextElement::CodeDeployRollback(CodeDeployRollbackElement {
                        application_name: code_deploy.application_name.clone(),
                        deployment_group: code_deploy.deployment_group.clone(),
                        old_bundle: code_deploy.old_bundle.clone(),
                    })
                }
                (PhaseStepType::HelmDeploy, StateExecutionData::Helm(helm)) => {
                    ContextElement::HelmRollback(HelmRollbackElement {
                        release_name: helm.release_name.clone(),
                        previous_version: helm.previous_version,
                        new_version: helm.new_version,
                    })
                }
                _ => continue,
            };
            elements.push(element);
        }
    }
    elements
}
