//! # Execution Context
//!
//! The read-mostly facade a step uses to reach workflow-scoped elements,
//! identifiers, variables and expression rendering.
//!
//! [`ExecutionContext`] is the single cohesive boundary steps depend on.
//! [`StateExecutionContext`] is the in-process implementation the workflow
//! engine builds for every step instance; children receive a copy of their
//! parent's element stack with their own elements pushed on top.

pub mod elements;
pub mod execution_context;
pub mod expression;

pub use elements::{
    ArtifactElement, BundleCoordinates, CodeDeployRollbackElement, ContainerRollbackElement,
    ContainerServiceData, ContextElement, ContextElementType, DeploymentType, HelmRollbackElement,
    HostElement, InfraMappingElement, InstanceElement, InstanceListElement, PhaseElement,
    ServiceElement,
};
pub use execution_context::{ExecutionContext, StateExecutionContext, StateExecutionContextBuilder};
