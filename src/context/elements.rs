use serde::{Deserialize, Serialize};
use std::fmt;

/// How a service is deployed onto its infrastructure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DeploymentType {
    Ssh,
    Kubernetes,
    Helm,
    Ecs,
    AwsCodeDeploy,
    AwsAmi,
    AwsLambda,
    Pcf,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ContextElementType {
    Phase,
    Service,
    InfraMapping,
    Instance,
    InstanceList,
    Artifact,
    ContainerRollback,
    CodeDeployRollback,
    HelmRollback,
}

impl fmt::Display for ContextElementType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Phase => "PHASE",
            Self::Service => "SERVICE",
            Self::InfraMapping => "INFRA_MAPPING",
            Self::Instance => "INSTANCE",
            Self::InstanceList => "INSTANCE_LIST",
            Self::Artifact => "ARTIFACT",
            Self::ContainerRollback => "CONTAINER_ROLLBACK",
            Self::CodeDeployRollback => "CODE_DEPLOY_ROLLBACK",
            Self::HelmRollback => "HELM_ROLLBACK",
        };
        f.write_str(name)
    }
}

/// Identity of the deployment phase a step runs in
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhaseElement {
    pub phase_name: String,
    pub service_id: String,
    pub service_name: String,
    pub infra_mapping_id: String,
    pub deployment_type: DeploymentType,
    #[serde(default)]
    pub rollback: bool,
    /// Forward phase this rollback phase undoes
    pub phase_name_for_rollback: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceElement {
    pub uuid: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InfraMappingElement {
    pub uuid: String,
    pub name: String,
    pub deployment_type: DeploymentType,
    pub cluster_name: Option<String>,
    #[serde(default)]
    pub load_balancers: Vec<String>,
    pub region: Option<String>,
}

/// Host fields as reported by the different infrastructure providers
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostElement {
    pub host_name: String,
    pub ip: Option<String>,
    pub public_dns: Option<String>,
    pub ec2_instance_id: Option<String>,
    pub pod_name: Option<String>,
    pub container_id: Option<String>,
    pub pcf_app_name: Option<String>,
    pub pcf_instance_index: Option<u32>,
}

impl HostElement {
    pub fn named(host_name: impl Into<String>) -> Self {
        Self {
            host_name: host_name.into(),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceElement {
    pub uuid: String,
    pub host: HostElement,
    /// Created by the current deployment rather than pre-existing
    #[serde(default)]
    pub new_instance: bool,
    pub workload_name: Option<String>,
    /// Phase that deployed this instance
    pub phase_name: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceListElement {
    pub instances: Vec<InstanceElement>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactElement {
    pub uuid: String,
    pub name: String,
    pub build_no: String,
    #[serde(default)]
    pub service_ids: Vec<String>,
}

/// Per-service container counts recorded by a container deploy
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContainerServiceData {
    pub name: String,
    pub desired_count: i32,
    pub previous_count: i32,
    pub desired_traffic_percent: Option<i32>,
    pub previous_traffic_percent: Option<i32>,
}

impl ContainerServiceData {
    /// Undo mapping: desired and previous values trade places
    pub fn reversed(&self) -> Self {
        Self {
            name: self.name.clone(),
            desired_count: self.previous_count,
            previous_count: self.desired_count,
            desired_traffic_percent: self.previous_traffic_percent,
            previous_traffic_percent: self.desired_traffic_percent,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerRollbackElement {
    pub cluster_name: String,
    pub service_data: Vec<ContainerServiceData>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BundleCoordinates {
    pub bucket: String,
    pub key: String,
    pub bundle_type: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodeDeployRollbackElement {
    pub application_name: String,
    pub deployment_group: String,
    pub old_bundle: Option<BundleCoordinates>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HelmRollbackElement {
    pub release_name: String,
    pub previous_version: u32,
    pub new_version: u32,
}

/// Value pushed onto a step's context stack
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "element_type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ContextElement {
    Phase(PhaseElement),
    Service(ServiceElement),
    InfraMapping(InfraMappingElement),
    Instance(InstanceElement),
    InstanceList(InstanceListElement),
    Artifact(ArtifactElement),
    ContainerRollback(ContainerRollbackElement),
    CodeDeployRollback(CodeDeployRollbackElement),
    HelmRollback(HelmRollbackElement),
}

impl ContextElement {
    pub fn element_type(&self) -> ContextElementType {
        match self {
            Self::Phase(_) => ContextElementType::Phase,
            Self::Service(_) => ContextElementType::Service,
            Self::InfraMapping(_) => ContextElementType::InfraMapping,
            Self::Instance(_) => ContextElementType::Instance,
            Self::InstanceList(_) => ContextElementType::InstanceList,
            Self::Artifact(_) => ContextElementType::Artifact,
            Self::ContainerRollback(_) => ContextElementType::ContainerRollback,
            Self::CodeDeployRollback(_) => ContextElementType::CodeDeployRollback,
            Self::HelmRollback(_) => ContextElementType::HelmRollback,
        }
    }

    /// Lookup key used by `context_element_by_key`
    pub fn key(&self) -> &str {
        match self {
            Self::Phase(e) => &e.phase_name,
            Self::Service(e) => &e.uuid,
            Self::InfraMapping(e) => &e.uuid,
            Self::Instance(e) => &e.uuid,
            Self::InstanceList(_) => "instances",
            Self::Artifact(e) => &e.uuid,
            Self::ContainerRollback(e) => &e.cluster_name,
            Self::CodeDeployRollback(e) => &e.application_name,
            Self::HelmRollback(e) => &e.release_name,
        }
    }

    pub fn as_phase(&self) -> Option<&PhaseElement> {
        match self {
            Self::Phase(e) => Some(e),
            _ => None,
        }
    }

    pub fn as_service(&self) -> Option<&ServiceElement> {
        match self {
            Self::Service(e) => Some(e),
            _ => None,
        }
    }

    pub fn as_infra_mapping(&self) -> Option<&InfraMappingElement> {
        match self {
            Self::InfraMapping(e) => Some(e),
            _ => None,
        }
    }

    pub fn as_instance(&self) -> Option<&InstanceElement> {
        match self {
            Self::Instance(e) => Some(e),
            _ => None,
        }
    }

    pub fn as_instance_list(&self) -> Option<&InstanceListElement> {
        match self {
            Self::InstanceList(e) => Some(e),
            _ => None,
        }
    }

    pub fn as_artifact(&self) -> Option<&ArtifactElement> {
        match self {
            Self::Artifact(e) => Some(e),
            _ => None,
        }
    }
}
