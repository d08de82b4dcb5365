//! # Workflow Composition
//!
//! Composite steps and the in-process engine that runs them.
//!
//! A [`PhaseSubWorkflow`] binds a service to an infrastructure mapping and
//! runs its phase steps in order; a [`PhaseStepSubWorkflow`] runs its leaf
//! steps sequentially or in parallel and records their outcome in the
//! append-only phase summary. Rollback phases read that summary back to
//! rebuild undo instructions for every deployment the forward phase made.
//! The [`WorkflowEngine`] turns spawn plans into child instances and routes
//! child completions back to their parents.

pub mod artifact;
pub mod catalog;
pub mod engine;
pub mod failure_strategy;
pub mod phase;
pub mod phase_step;
pub mod rollback;
pub mod summary;
pub mod sweeping_output;

pub use artifact::{
    effective_artifact_variables, resolve_rollback_artifact, ArtifactEntityType, ArtifactHistory,
    ArtifactVariable, ArtifactVariableBinding, ExecutionArtifacts, InMemoryArtifactHistory,
};
pub use catalog::{InMemoryInfrastructureCatalog, InfrastructureCatalog};
pub use engine::WorkflowEngine;
pub use failure_strategy::{ContinueOnFailureAdvisor, FailureStrategyAdvisor, StopOnFailureAdvisor};
pub use phase::{PhaseServices, PhaseSubWorkflow};
pub use phase_step::PhaseStepSubWorkflow;
pub use rollback::{reverse_service_data, rollback_elements};
pub use summary::{
    InMemoryPhaseSummaryStore, PhaseExecutionSummary, PhaseExecutionSummaryStore,
    PhaseStepExecutionSummary, PhaseStepType, StepExecutionSummary,
};
pub use sweeping_output::{
    InMemorySweepingOutputStore, SweepingOutput, SweepingOutputScope, SweepingOutputStore,
};
