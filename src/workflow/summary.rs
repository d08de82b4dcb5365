//! Append-only outcome records of phase execution, read by rollback phases.

use crate::constants::ExecutionStatus;
use crate::error::{StateError, StateResult};
use crate::step::{StateExecutionData, StepType};
use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};

/// What a phase step does, which decides how it is rolled back
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PhaseStepType {
    PreDeployment,
    ContainerDeploy,
    CodeDeploy,
    HelmDeploy,
    Deploy,
    Verify,
    Wrapup,
    PostDeployment,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepExecutionSummary {
    pub step_name: String,
    pub step_type: Option<StepType>,
    pub status: ExecutionStatus,
    pub error_message: Option<String>,
    pub state_execution_data: Option<StateExecutionData>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhaseStepExecutionSummary {
    pub phase_step_name: String,
    pub phase_step_type: PhaseStepType,
    pub status: ExecutionStatus,
    pub step_summaries: Vec<StepExecutionSummary>,
}

impl PhaseStepExecutionSummary {
    /// Data of every child that recorded some
    pub fn step_data(&self) -> impl Iterator<Item = &StateExecutionData> {
        self.step_summaries
            .iter()
            .filter_map(|s| s.state_execution_data.as_ref())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhaseExecutionSummary {
    pub app_id: String,
    pub workflow_execution_id: String,
    pub phase_name: String,
    /// In completion order
    pub phase_steps: Vec<PhaseStepExecutionSummary>,
}

impl PhaseExecutionSummary {
    pub fn phase_step(&self, name: &str) -> Option<&PhaseStepExecutionSummary> {
        self.phase_steps.iter().find(|s| s.phase_step_name == name)
    }
}

/// Phase summaries keyed by `(app_id, workflow_execution_id, phase_name)`
#[async_trait]
pub trait PhaseExecutionSummaryStore: Send + Sync {
    /// Record a finished phase step; a phase step is recorded at most once
    async fn append_phase_step(
        &self,
        app_id: &str,
        workflow_execution_id: &str,
        phase_name: &str,
        summary: PhaseStepExecutionSummary,
    ) -> StateResult<()>;

    async fn find(
        &self,
        app_id: &str,
        workflow_execution_id: &str,
        phase_name: &str,
    ) -> StateResult<Option<PhaseExecutionSummary>>;
}

#[derive(Debug, Default)]
pub struct InMemoryPhaseSummaryStore {
    phases: DashMap<(String, String, String), PhaseExecutionSummary>,
}

impl InMemoryPhaseSummaryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PhaseExecutionSummaryStore for InMemoryPhaseSummaryStore {
    async fn append_phase_step(
        &self,
        app_id: &str,
        workflow_execution_id: &str,
        phase_name: &str,
        summary: PhaseStepExecutionSummary,
    ) -> StateResult<()> {
        let key = (
            app_id.to_string(),
            workflow_execution_id.to_string(),
            phase_name.to_string(),
        );
        match self.phases.entry(key) {
            Entry::Occupied(mut entry) => {
                let phase = entry.get_mut();
                if phase.phase_step(&summary.phase_step_name).is_some() {
                    return Err(StateError::Persistence(format!(
                        "phase step {} already recorded for phase {phase_name}",
                        summary.phase_step_name
                    )));
                }
                phase.phase_steps.push(summary);
            }
            Entry::Vacant(entry) => {
                entry.insert(PhaseExecutionSummary {
                    app_id: app_id.to_string(),
                    workflow_execution_id: workflow_execution_id.to_string(),
                    phase_name: phase_name.to_string(),
                    phase_steps: vec![summary],
                });
            }
        }
        Ok(())
    }

    async fn find(
        &self,
        app_id: &str,
        workflow_execution_id: &str,
        phase_name: &str,
    ) -> StateResult<Option<PhaseExecutionSummary>> {
        let key = (
            app_id.to_string(),
            workflow_execution_id.to_string(),
            phase_name.to_string(),
        );
        Ok(self.phases.get(&key).map(|entry| entry.value().clone()))
    }
}
