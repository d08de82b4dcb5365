//! Baseline lookup for `CompareWithPrevious` verification.

use super::nodes::{group_name, node_name, NodeMap};
use crate::context::{ExecutionContext, InstanceElement, PhaseElement};
use crate::error::StateResult;
use async_trait::async_trait;
use dashmap::DashMap;
use tracing::info;

pub const BASELINE_RUN_MESSAGE: &str = "No previous execution found. This will be the baseline run";

/// History of successful executions per workflow and service
#[async_trait]
pub trait BaselineResolver: Send + Sync {
    /// Latest successful execution other than `current_execution_id`
    async fn last_successful_execution(
        &self,
        app_id: &str,
        workflow_id: &str,
        service_id: &str,
        current_execution_id: &str,
    ) -> StateResult<Option<String>>;

    async fn execution_instances(
        &self,
        workflow_execution_id: &str,
        service_id: &str,
    ) -> StateResult<Vec<InstanceElement>>;
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct BaselineNodes {
    pub execution_id: Option<String>,
    pub nodes: NodeMap,
    pub message: Option<String>,
}

/// Nodes of the last successful execution; empty with a message on the first run
pub async fn last_execution_nodes(
    resolver: &dyn BaselineResolver,
    context: &dyn ExecutionContext,
    phase: &PhaseElement,
    hostname_template: Option<&str>,
) -> StateResult<BaselineNodes> {
    let previous = resolver
        .last_successful_execution(
            context.app_id(),
            context.workflow_id(),
            &phase.service_id,
            context.workflow_execution_id(),
        )
        .await?;

    let Some(execution_id) = previous else {
        info!(
            workflow_id = %context.workflow_id(),
            service_id = %phase.service_id,
            "{BASELINE_RUN_MESSAGE}"
        );
        return Ok(BaselineNodes {
            message: Some(BASELINE_RUN_MESSAGE.to_string()),
            ..Default::default()
        });
    };

    let nodes = resolver
        .execution_instances(&execution_id, &phase.service_id)
        .await?
        .iter()
        .map(|instance| {
            (
                node_name(context, phase.deployment_type, instance, hostname_template),
                group_name(phase.deployment_type, instance),
            )
        })
        .collect();

    Ok(BaselineNodes {
        execution_id: Some(execution_id),
        nodes,
        message: None,
    })
}

#[derive(Debug, Clone)]
struct RecordedExecution {
    execution_id: String,
    instances: Vec<InstanceElement>,
}

#[derive(Debug, Default)]
pub struct InMemoryBaselineResolver {
    /// (app_id, workflow_id, service_id) -> executions, oldest first
    executions: DashMap<(String, String, String), Vec<RecordedExecution>>,
}

impl InMemoryBaselineResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_success(
        &self,
        app_id: &str,
        workflow_id: &str,
        service_id: &str,
        execution_id: &str,
        instances: Vec<InstanceElement>,
    ) {
        self.executions
            .entry((app_id.to_string(), workflow_id.to_string(), service_id.to_string()))
            .or_default()
            .push(RecordedExecution {
                execution_id: execution_id.to_string(),
                instances,
            });
    }
}

#[async_trait]
impl BaselineResolver for InMemoryBaselineResolver {
    async fn last_successful_execution(
        &self,
        app_id: &str,
        workflow_id: &str,
        service_id: &str,
        current_execution_id: &str,
    ) -> StateResult<Option<String>> {
        let key = (app_id.to_string(), workflow_id.to_string(), service_id.to_string());
        Ok(self.executions.get(&key).and_then(|executions| {
            executions
                .iter()
                .rev()
                .find(|e| e.execution_id != current_execution_id)
                .map(|e| e.execution_id.clone())
        }))
    }

    async fn execution_instances(
        &self,
        workflow_execution_id: &str,
        _service_id: &str,
    ) -> StateResult<Vec<InstanceElement>> {
        Ok(self
            .executions
            .iter()
            .flat_map(|entry| entry.value().clone())
            .find(|e| e.execution_id == workflow_execution_id)
            .map(|e| e.instances)
            .unwrap_or_default())
    }
}
