//! # Step Execution
//!
//! The step abstraction and the execute/suspend/resume protocol.
//!
//! ## Protocol
//!
//! 1. [`Step::execute`] renders its fields, records the data it needs to
//!    resume, submits one task per remote unit of work and returns an async
//!    [`ExecutionResponse`] carrying every wait id.
//! 2. The [`StepExecutor`] registers the wait ids and parks the instance.
//! 3. Once every response has arrived (or an error short-circuits the join)
//!    the executor calls [`Step::handle_async_response`], which finalizes the
//!    status. Only multi-stage protocols submit again from there.
//! 4. Terminal statuses are immutable; late responses are ignored.

pub mod aggregation;
pub mod data;
pub mod executor;
pub mod instance;
pub mod response;

use crate::context::ExecutionContext;
use crate::dispatch::ResponseData;
use crate::error::{FieldErrors, StateResult};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

pub use aggregation::aggregate_status;
pub use data::{
    CodeDeployExecutionData, CommandExecutionData, ContainerExecutionData, HelmExecutionData,
    HttpExecutionData, JenkinsExecutionData, JenkinsPhase, PhaseExecutionData,
    PhaseStepExecutionData, StateExecutionData,
};
pub use executor::{StepCompletion, StepExecutor, StepOutcome};
pub use instance::StepInstance;
pub use response::{ExecutionMode, ExecutionResponse, SpawnChild, SpawnPlan};

/// Type tag of a step
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StepType {
    ShellScript,
    Http,
    Jenkins,
    HelmDeploy,
    HelmRollback,
    ContainerDeploy,
    ContainerRollback,
    CodeDeploy,
    CodeDeployRollback,
    LogAnalysis,
    MetricAnalysis,
    PhaseStep,
    Phase,
}

impl StepType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ShellScript => "SHELL_SCRIPT",
            Self::Http => "HTTP",
            Self::Jenkins => "JENKINS",
            Self::HelmDeploy => "HELM_DEPLOY",
            Self::HelmRollback => "HELM_ROLLBACK",
            Self::ContainerDeploy => "CONTAINER_DEPLOY",
            Self::ContainerRollback => "CONTAINER_ROLLBACK",
            Self::CodeDeploy => "CODE_DEPLOY",
            Self::CodeDeployRollback => "CODE_DEPLOY_ROLLBACK",
            Self::LogAnalysis => "LOG_ANALYSIS",
            Self::MetricAnalysis => "METRIC_ANALYSIS",
            Self::PhaseStep => "PHASE_STEP",
            Self::Phase => "PHASE",
        }
    }

    pub fn is_composite(&self) -> bool {
        matches!(self, Self::PhaseStep | Self::Phase)
    }
}

impl fmt::Display for StepType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A pluggable unit of work executed inside a workflow
#[async_trait]
pub trait Step: Send + Sync {
    fn name(&self) -> &str;

    fn step_type(&self) -> StepType;

    /// Field-level configuration problems, empty when the step can run
    fn validate_fields(&self) -> FieldErrors {
        FieldErrors::new()
    }

    /// Lifetime of an instance before the scheduler expires it
    fn timeout_millis(&self) -> Option<u64> {
        None
    }

    async fn execute(&self, context: &dyn ExecutionContext) -> StateResult<ExecutionResponse>;

    /// Called once with the complete response set of the current wait
    async fn handle_async_response(
        &self,
        context: &dyn ExecutionContext,
        responses: &HashMap<String, ResponseData>,
    ) -> StateResult<ExecutionResponse>;

    /// Mark in-flight side records on abort; dispatched tasks are left alone
    async fn handle_abort(&self, _context: &dyn ExecutionContext) -> StateResult<()> {
        Ok(())
    }
}

impl fmt::Debug for dyn Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Step")
            .field("name", &self.name())
            .field("step_type", &self.step_type())
            .finish()
    }
}
