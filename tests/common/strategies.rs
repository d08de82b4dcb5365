use delivery_states::analysis::ComparisonStrategy;
use delivery_states::context::{ContainerServiceData, DeploymentType, HostElement, InstanceElement};
use proptest::prelude::*;

pub fn comparison_strategy_strategy() -> impl Strategy<Value = ComparisonStrategy> {
    prop_oneof![
        Just(ComparisonStrategy::CompareWithPrevious),
        Just(ComparisonStrategy::CompareWithCurrent),
        Just(ComparisonStrategy::Predictive),
    ]
}

pub fn deployment_type_strategy() -> impl Strategy<Value = DeploymentType> {
    prop_oneof![
        Just(DeploymentType::Ssh),
        Just(DeploymentType::Kubernetes),
        Just(DeploymentType::Helm),
        Just(DeploymentType::Ecs),
        Just(DeploymentType::AwsAmi),
        Just(DeploymentType::Pcf),
    ]
}

/// Instance whose host carries every provider-specific field, from a small
/// host space so that new and deployed sets overlap
pub fn instance_strategy() -> impl Strategy<Value = InstanceElement> {
    (0u8..30, any::<bool>(), prop::option::of("[a-c]"), prop::bool::weighted(0.9)).prop_map(
        |(n, new_instance, workload, in_phase)| {
            let host = format!("host-{n:02}");
            InstanceElement {
                uuid: host.clone(),
                host: HostElement {
                    host_name: host.clone(),
                    ip: Some(format!("10.0.0.{n}")),
                    public_dns: Some(format!("{host}.compute.internal")),
                    ec2_instance_id: Some(format!("i-{n:04}")),
                    pod_name: Some(format!("pod-{n:02}")),
                    container_id: Some(format!("container-{n:02}")),
                    pcf_app_name: Some("orders".to_string()),
                    pcf_instance_index: Some(u32::from(n)),
                },
                new_instance,
                workload_name: workload,
                phase_name: Some(if in_phase { "Phase 1" } else { "Phase 0" }.to_string()),
            }
        },
    )
}

pub fn service_data_strategy() -> impl Strategy<Value = ContainerServiceData> {
    (
        "[a-z]{3,8}__[0-9]",
        0i32..50,
        0i32..50,
        prop::option::of(0i32..=100),
        prop::option::of(0i32..=100),
    )
        .prop_map(
            |(name, desired_count, previous_count, desired_traffic, previous_traffic)| {
                ContainerServiceData {
                    name,
                    desired_count,
                    previous_count,
                    desired_traffic_percent: desired_traffic,
                    previous_traffic_percent: previous_traffic,
                }
            },
        )
}
