//! # Node Selection
//!
//! Splits the hosts of a deployment into the *test* set (what is being
//! verified) and the *control* set (what it is compared against), keyed by
//! hostname with the analysis group as value.
//!
//! | Strategy | Test | Control |
//! |----------|------|---------|
//! | `CompareWithPrevious` | every instance of the phase | empty, baseline comes from the last execution |
//! | `CompareWithCurrent` / `Predictive` | new instances of the phase (plus earlier phases on request) | all deployed nodes minus new ones |
//!
//! A host never appears in both sets.

use super::types::ComparisonStrategy;
use crate::constants::system::DEFAULT_GROUP_NAME;
use crate::context::expression::find_unresolved;
use crate::context::{
    execution_context::host_scope, DeploymentType, ExecutionContext, InstanceElement, PhaseElement,
};
use crate::error::StateResult;
use async_trait::async_trait;
use dashmap::DashMap;
use rand::seq::SliceRandom;
use rand::Rng;
use serde_json::json;
use std::collections::BTreeMap;
use tracing::warn;

/// hostname -> group
pub type NodeMap = BTreeMap<String, String>;

#[derive(Debug, Clone, Default)]
pub struct NodeSelectionOptions {
    /// Template rendered per host, e.g. `${host.ec2Instance.instanceId}`
    pub hostname_template: Option<String>,
    pub include_previous_phase_nodes: bool,
    /// Cap control groups at `max_sampling_size_per_group` hosts
    pub sample_control_nodes: bool,
    pub max_sampling_size_per_group: usize,
    pub new_nodes_traffic_shift_percent: Option<u32>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct NodeSelection {
    pub control: NodeMap,
    pub test: NodeMap,
    pub new_nodes_traffic_shift_percent: Option<u32>,
}

/// Every instance currently deployed for a service on an infrastructure
#[async_trait]
pub trait InstanceSource: Send + Sync {
    async fn deployed_instances(
        &self,
        app_id: &str,
        service_id: &str,
        infra_mapping_id: &str,
    ) -> StateResult<Vec<InstanceElement>>;
}

#[derive(Debug, Default)]
pub struct InMemoryInstanceSource {
    instances: DashMap<(String, String), Vec<InstanceElement>>,
}

impl InMemoryInstanceSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_instances(&self, service_id: &str, infra_mapping_id: &str, instances: Vec<InstanceElement>) {
        self.instances
            .insert((service_id.to_string(), infra_mapping_id.to_string()), instances);
    }
}

#[async_trait]
impl InstanceSource for InMemoryInstanceSource {
    async fn deployed_instances(
        &self,
        _app_id: &str,
        service_id: &str,
        infra_mapping_id: &str,
    ) -> StateResult<Vec<InstanceElement>> {
        Ok(self
            .instances
            .get(&(service_id.to_string(), infra_mapping_id.to_string()))
            .map(|entry| entry.value().clone())
            .unwrap_or_default())
    }
}

/// Raw host identity per infrastructure type
pub fn host_name(deployment_type: DeploymentType, instance: &InstanceElement) -> String {
    let host = &instance.host;
    match deployment_type {
        DeploymentType::Pcf => match (&host.pcf_app_name, host.pcf_instance_index) {
            (Some(app), Some(index)) => format!("{app}:{index}"),
            _ => host.host_name.clone(),
        },
        DeploymentType::Kubernetes | DeploymentType::Helm => {
            host.pod_name.clone().unwrap_or_else(|| host.host_name.clone())
        }
        DeploymentType::Ecs => host
            .container_id
            .clone()
            .unwrap_or_else(|| host.host_name.clone()),
        DeploymentType::AwsAmi => host
            .public_dns
            .clone()
            .unwrap_or_else(|| host.host_name.clone()),
        _ => host.host_name.clone(),
    }
}

/// Analysis group of a host: the workload name for Helm, the default group otherwise
pub fn group_name(deployment_type: DeploymentType, instance: &InstanceElement) -> String {
    match (deployment_type, &instance.workload_name) {
        (DeploymentType::Helm, Some(workload)) if !workload.is_empty() => workload.clone(),
        _ => DEFAULT_GROUP_NAME.to_string(),
    }
}

/// Host identity as the monitoring system knows it. A template that does not
/// resolve for a host falls back to the plain host name.
pub fn node_name(
    context: &dyn ExecutionContext,
    deployment_type: DeploymentType,
    instance: &InstanceElement,
    hostname_template: Option<&str>,
) -> String {
    let Some(template) = hostname_template.filter(|t| !t.trim().is_empty()) else {
        return host_name(deployment_type, instance);
    };

    let rendered = context.render_expression_with(template, &json!({"host": host_scope(instance)}));
    match find_unresolved(&rendered) {
        None => rendered,
        Some(expression) => {
            warn!(
                host = %instance.host.host_name,
                expression = %expression,
                "Hostname template did not resolve, using host name"
            );
            host_name(deployment_type, instance)
        }
    }
}

fn to_node_map<'a>(
    context: &dyn ExecutionContext,
    deployment_type: DeploymentType,
    instances: impl IntoIterator<Item = &'a InstanceElement>,
    hostname_template: Option<&str>,
) -> NodeMap {
    instances
        .into_iter()
        .map(|instance| {
            (
                node_name(context, deployment_type, instance, hostname_template),
                group_name(deployment_type, instance),
            )
        })
        .collect()
}

fn in_phase(instance: &InstanceElement, phase_name: &str) -> bool {
    instance
        .phase_name
        .as_deref()
        .map_or(true, |name| name == phase_name)
}

/// Compute the test and control node maps for the current phase
///
/// `deployed` is every node currently running the service; it is only read by
/// the side-by-side strategies.
pub fn control_and_test_nodes<R: Rng + ?Sized>(
    context: &dyn ExecutionContext,
    phase: &PhaseElement,
    strategy: ComparisonStrategy,
    options: &NodeSelectionOptions,
    deployed: &[InstanceElement],
    rng: &mut R,
) -> NodeSelection {
    let deployment_type = phase.deployment_type;
    let template = options.hostname_template.as_deref();
    let instances = context.instance_elements();

    let mut selection = NodeSelection {
        new_nodes_traffic_shift_percent: options.new_nodes_traffic_shift_percent,
        ..Default::default()
    };

    match strategy {
        ComparisonStrategy::CompareWithPrevious => {
            let phase_instances = instances.iter().filter(|i| in_phase(i, &phase.phase_name));
            selection.test = to_node_map(context, deployment_type, phase_instances, template);
        }
        ComparisonStrategy::CompareWithCurrent | ComparisonStrategy::Predictive => {
            let new_instances = instances.iter().filter(|i| {
                i.new_instance
                    && (in_phase(i, &phase.phase_name) || options.include_previous_phase_nodes)
            });
            selection.test = to_node_map(context, deployment_type, new_instances, template);

            let mut control = to_node_map(context, deployment_type, deployed, template);
            control.retain(|host, _| !selection.test.contains_key(host));
            if options.sample_control_nodes {
                control = sample_nodes(control, options.max_sampling_size_per_group, rng);
            }
            selection.control = control;
        }
    }

    selection
}

/// Keep at most `max_per_group` hosts of each group, chosen uniformly at random
pub fn sample_nodes<R: Rng + ?Sized>(nodes: NodeMap, max_per_group: usize, rng: &mut R) -> NodeMap {
    let mut groups: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for (host, group) in nodes {
        groups.entry(group).or_default().push(host);
    }

    let mut sampled = NodeMap::new();
    for (group, mut hosts) in groups {
        if hosts.len() > max_per_group {
            hosts.shuffle(rng);
            hosts.truncate(max_per_group);
        }
        sampled.extend(hosts.into_iter().map(|host| (host, group.clone())));
    }
    sampled
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{
        ContextElement, HostElement, InstanceListElement, StateExecutionContext,
    };
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn instance(host: &str, new_instance: bool, phase: &str) -> InstanceElement {
        InstanceElement {
            uuid: host.to_string(),
            host: HostElement::named(host),
            new_instance,
            workload_name: None,
            phase_name: Some(phase.to_string()),
        }
    }

    fn phase(deployment_type: DeploymentType) -> PhaseElement {
        PhaseElement {
            phase_name: "Phase 2".to_string(),
            service_id: "svc".to_string(),
            service_name: "orders".to_string(),
            infra_mapping_id: "infra".to_string(),
            deployment_type,
            rollback: false,
            phase_name_for_rollback: None,
        }
    }

    fn context(instances: Vec<InstanceElement>) -> StateExecutionContext {
        StateExecutionContext::builder()
            .account_id("acc")
            .app_id("app")
            .workflow_id("wf")
            .workflow_execution_id("wfe")
            .state_execution_instance_id("se")
            .element(ContextElement::InstanceList(InstanceListElement { instances }))
            .build()
    }

    #[test]
    fn test_compare_with_current_excludes_new_nodes_from_control() {
        let ctx = context(vec![
            instance("new-1", true, "Phase 2"),
            instance("new-0", true, "Phase 1"),
        ]);
        let deployed = vec![
            instance("old-1", false, "Phase 2"),
            instance("old-2", false, "Phase 2"),
            instance("new-1", true, "Phase 2"),
        ];
        let selection = control_and_test_nodes(
            &ctx,
            &phase(DeploymentType::Ssh),
            ComparisonStrategy::CompareWithCurrent,
            &NodeSelectionOptions::default(),
            &deployed,
            &mut StdRng::seed_from_u64(7),
        );

        assert_eq!(selection.test.keys().collect::<Vec<_>>(), vec!["new-1"]);
        assert_eq!(selection.control.keys().collect::<Vec<_>>(), vec!["old-1", "old-2"]);
    }

    #[test]
    fn test_previous_phase_nodes_are_included_on_request() {
        let ctx = context(vec![
            instance("new-1", true, "Phase 2"),
            instance("new-0", true, "Phase 1"),
        ]);
        let options = NodeSelectionOptions {
            include_previous_phase_nodes: true,
            ..Default::default()
        };
        let selection = control_and_test_nodes(
            &ctx,
            &phase(DeploymentType::Ssh),
            ComparisonStrategy::Predictive,
            &options,
            &[instance("new-0", true, "Phase 1")],
            &mut StdRng::seed_from_u64(7),
        );
        assert_eq!(selection.test.len(), 2);
        assert!(selection.control.is_empty());
    }

    #[test]
    fn test_compare_with_previous_has_no_control() {
        let ctx = context(vec![instance("a", false, "Phase 2"), instance("b", true, "Phase 2")]);
        let selection = control_and_test_nodes(
            &ctx,
            &phase(DeploymentType::Ssh),
            ComparisonStrategy::CompareWithPrevious,
            &NodeSelectionOptions::default(),
            &[instance("c", false, "Phase 2")],
            &mut StdRng::seed_from_u64(7),
        );
        assert_eq!(selection.test.len(), 2);
        assert!(selection.control.is_empty());
    }

    #[test]
    fn test_hostname_template_and_helm_group() {
        let mut pod = instance("node-1", true, "Phase 2");
        pod.host.pod_name = Some("orders-7f9c".to_string());
        pod.host.ip = Some("10.0.0.4".to_string());
        pod.workload_name = Some("orders-canary".to_string());
        let ctx = context(vec![pod.clone()]);

        assert_eq!(host_name(DeploymentType::Helm, &pod), "orders-7f9c");
        assert_eq!(group_name(DeploymentType::Helm, &pod), "orders-canary");
        assert_eq!(group_name(DeploymentType::Kubernetes, &pod), DEFAULT_GROUP_NAME);
        assert_eq!(
            node_name(&ctx, DeploymentType::Helm, &pod, Some("${host.ip}")),
            "10.0.0.4"
        );
    }

    #[test]
    fn test_unresolved_template_keeps_hosts_distinct() {
        let instances = vec![
            instance("web-1", true, "Phase 2"),
            instance("web-2", true, "Phase 2"),
            instance("web-3", true, "Phase 2"),
        ];
        let ctx = context(instances.clone());
        let options = NodeSelectionOptions {
            hostname_template: Some("${host.ec2Instance.instanceId}".to_string()),
            ..Default::default()
        };
        let selection = control_and_test_nodes(
            &ctx,
            &phase(DeploymentType::AwsAmi),
            ComparisonStrategy::CompareWithCurrent,
            &options,
            &instances,
            &mut StdRng::seed_from_u64(7),
        );
        assert_eq!(
            selection.test.keys().collect::<Vec<_>>(),
            vec!["web-1", "web-2", "web-3"]
        );
    }

    #[test]
    fn test_pcf_host_identity() {
        let mut app = instance("cell-3", true, "Phase 2");
        app.host.pcf_app_name = Some("orders__4".to_string());
        app.host.pcf_instance_index = Some(1);
        assert_eq!(host_name(DeploymentType::Pcf, &app), "orders__4:1");
    }

    #[test]
    fn test_sampling_caps_each_group() {
        let mut nodes = NodeMap::new();
        for i in 0..25 {
            nodes.insert(format!("a-{i}"), "A".to_string());
        }
        for i in 0..3 {
            nodes.insert(format!("b-{i}"), "B".to_string());
        }
        let sampled = sample_nodes(nodes, 10, &mut StdRng::seed_from_u64(42));
        assert_eq!(sampled.values().filter(|g| *g == "A").count(), 10);
        assert_eq!(sampled.values().filter(|g| *g == "B").count(), 3);
    }
}
