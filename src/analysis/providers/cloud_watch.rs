//! CloudWatch metric collection: one task per load balancer and one per ECS
//! cluster.

use super::with_envelope;
use crate::analysis::collection::DataCollector;
use crate::analysis::types::{AnalysisContext, AnalysisType};
use crate::config::AnalysisConfig;
use crate::context::{ContextElementType, ExecutionContext};
use crate::dispatch::{TaskDescriptor, TaskType};
use crate::error::{FieldErrors, StateError, StateResult};
use async_trait::async_trait;
use serde_json::json;
use std::collections::BTreeMap;

pub const STATE_TYPE: &str = "CLOUD_WATCH";

#[derive(Debug, Clone, Default)]
pub struct CloudWatchCollector {
    connector_id: String,
    region: Option<String>,
    /// load balancer name -> metric names
    load_balancer_metrics: BTreeMap<String, Vec<String>>,
    ecs_metrics: Vec<String>,
}

impl CloudWatchCollector {
    pub fn new(connector_id: impl Into<String>) -> Self {
        Self {
            connector_id: connector_id.into(),
            ..Default::default()
        }
    }

    pub fn in_region(mut self, region: impl Into<String>) -> Self {
        self.region = Some(region.into());
        self
    }

    pub fn with_load_balancer(mut self, name: impl Into<String>, metrics: Vec<String>) -> Self {
        self.load_balancer_metrics.insert(name.into(), metrics);
        self
    }

    pub fn with_ecs_metrics(mut self, metrics: Vec<String>) -> Self {
        self.ecs_metrics = metrics;
        self
    }
}

#[async_trait]
impl DataCollector for CloudWatchCollector {
    fn state_type(&self) -> &str {
        STATE_TYPE
    }

    fn analysis_type(&self) -> AnalysisType {
        AnalysisType::Metric
    }

    fn supports_v2_data_collection(&self) -> bool {
        false
    }

    fn validate_fields(&self) -> FieldErrors {
        let mut errors = FieldErrors::new();
        if self.connector_id.trim().is_empty() {
            errors.insert("connectorId".to_string(), "AWS connector should be provided".to_string());
        }
        if self.load_balancer_metrics.is_empty() && self.ecs_metrics.is_empty() {
            errors.insert(
                "metrics".to_string(),
                "At least one load balancer or ECS metric should be configured".to_string(),
            );
        }
        errors
    }

    async fn collection_tasks(
        &self,
        context: &dyn ExecutionContext,
        analysis: &AnalysisContext,
        _config: &AnalysisConfig,
    ) -> StateResult<Vec<TaskDescriptor>> {
        let infra = context.infra_mapping_element();
        let region = match &self.region {
            Some(region) => context.render_required(region)?,
            None => infra
                .as_ref()
                .and_then(|i| i.region.clone())
                .ok_or_else(|| StateError::InvalidRequest("No AWS region configured for CloudWatch".to_string()))?,
        };
        let hosts = analysis.collection_hosts();

        let mut tasks = Vec::new();
        for (load_balancer, metrics) in &self.load_balancer_metrics {
            let load_balancer = context.render_required(load_balancer)?;
            tasks.push(
                TaskDescriptor::new(
                    TaskType::MetricDataCollection,
                    &analysis.account_id,
                    &analysis.app_id,
                    with_envelope(
                        analysis,
                        json!({
                            "connectorId": self.connector_id,
                            "region": region,
                            "loadBalancer": load_balancer,
                            "metrics": metrics,
                            "hosts": hosts,
                        }),
                    ),
                )
                .with_description(format!("CloudWatch collection for load balancer {load_balancer}")),
            );
        }

        if !self.ecs_metrics.is_empty() {
            let cluster = infra
                .and_then(|i| i.cluster_name)
                .ok_or_else(|| StateError::missing_element(format!("{} cluster name", ContextElementType::InfraMapping)))?;
            tasks.push(
                TaskDescriptor::new(
                    TaskType::MetricDataCollection,
                    &analysis.account_id,
                    &analysis.app_id,
                    with_envelope(
                        analysis,
                        json!({
                            "connectorId": self.connector_id,
                            "region": region,
                            "cluster": cluster,
                            "metrics": self.ecs_metrics,
                        }),
                    ),
                )
                .with_description(format!("CloudWatch collection for ECS cluster {cluster}")),
            );
        }

        Ok(tasks)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::test_support::analysis_context;
    use crate::context::DeploymentType;
    use crate::states::test_support::{context_with, infra_element};

    #[tokio::test]
    async fn test_task_per_load_balancer_and_cluster() {
        let ctx = context_with(vec![infra_element(DeploymentType::Ecs)]);
        let collector = CloudWatchCollector::new("aws-1")
            .with_load_balancer("orders-alb", vec!["Latency".to_string()])
            .with_load_balancer("orders-nlb", vec!["HealthyHostCount".to_string()])
            .with_ecs_metrics(vec!["CPUUtilization".to_string()]);

        let tasks = collector
            .collection_tasks(&ctx, &analysis_context(3, 3), &AnalysisConfig::default())
            .await
            .unwrap();

        assert_eq!(tasks.len(), 3);
        assert_eq!(tasks[0].payload["loadBalancer"], "orders-alb");
        assert_eq!(tasks[1].payload["loadBalancer"], "orders-nlb");
        assert_eq!(tasks[2].payload["cluster"], "prod");
        assert!(tasks.iter().all(|t| t.payload["region"] == "us-east-1"));
    }

    #[test]
    fn test_requires_some_metric() {
        let errors = CloudWatchCollector::new("aws-1").validate_fields();
        assert!(errors.contains_key("metrics"));
    }
}
