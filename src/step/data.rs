use crate::analysis::AnalysisExecutionData;
use crate::context::{BundleCoordinates, ContainerServiceData, DeploymentType};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::response::ExecutionMode;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandExecutionData {
    pub activity_id: String,
    pub host_name: Option<String>,
    pub artifact_build_no: Option<String>,
    #[serde(default)]
    pub output_variables: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HttpExecutionData {
    pub activity_id: String,
    pub url: String,
    pub method: String,
    #[serde(default)]
    pub expected_status_codes: Vec<u16>,
    pub http_response_code: Option<u16>,
}

/// Stage of the Jenkins two-phase protocol
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JenkinsPhase {
    Start,
    Poll,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JenkinsExecutionData {
    pub activity_id: String,
    pub job_name: String,
    pub phase: JenkinsPhase,
    pub queued_build_url: Option<String>,
    pub build_url: Option<String>,
    pub build_number: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HelmExecutionData {
    pub activity_id: String,
    pub release_name: String,
    pub previous_version: u32,
    pub new_version: u32,
    /// Version restored by a rollback
    pub rollback_version: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContainerExecutionData {
    pub activity_id: String,
    pub cluster_name: String,
    pub service_data: Vec<ContainerServiceData>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CodeDeployExecutionData {
    pub activity_id: String,
    pub application_name: String,
    pub deployment_group: String,
    pub bundle: Option<BundleCoordinates>,
    pub old_bundle: Option<BundleCoordinates>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhaseStepExecutionData {
    pub phase_step_name: String,
    pub mode: ExecutionMode,
    pub child_count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhaseExecutionData {
    pub phase_name: String,
    pub service_id: String,
    pub infra_mapping_id: String,
    pub deployment_type: DeploymentType,
    pub rollback: bool,
}

/// Typed progress payload attached to a step instance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "data", rename_all = "snake_case")]
pub enum StateExecutionData {
    Command(CommandExecutionData),
    Http(HttpExecutionData),
    Jenkins(JenkinsExecutionData),
    Helm(HelmExecutionData),
    Container(ContainerExecutionData),
    CodeDeploy(CodeDeployExecutionData),
    Analysis(AnalysisExecutionData),
    PhaseStep(PhaseStepExecutionData),
    Phase(PhaseExecutionData),
}

impl StateExecutionData {
    pub fn activity_id(&self) -> Option<&str> {
        match self {
            Self::Command(d) => Some(&d.activity_id),
            Self::Http(d) => Some(&d.activity_id),
            Self::Jenkins(d) => Some(&d.activity_id),
            Self::Helm(d) => Some(&d.activity_id),
            Self::Container(d) => Some(&d.activity_id),
            Self::CodeDeploy(d) => Some(&d.activity_id),
            Self::Analysis(d) => Some(&d.activity_id),
            Self::PhaseStep(_) | Self::Phase(_) => None,
        }
    }
}
