#![allow(clippy::doc_markdown)] // Allow technical terms like AppDynamics, CloudWatch in docs
#![allow(clippy::missing_errors_doc)] // Allow public functions without # Errors sections
#![allow(clippy::must_use_candidate)] // Allow methods without must_use when context is clear

//! # Delivery States
//!
//! Step execution, verification analysis and phase orchestration core for
//! continuous-delivery workflows.
//!
//! ## Overview
//!
//! A workflow is a tree of steps. Leaf steps hand remote work to a worker
//! through the [`dispatch`] facade and suspend; the worker's reply arrives
//! later, keyed by a wait id, and resumes the step. Composite steps (phases
//! and phase steps) spawn children and roll their statuses up.
//!
//! ## Architecture
//!
//! - [`step`]: the execute/suspend/resume protocol, step instances and the
//!   executor that drives them
//! - [`correlation`]: wait id registration and the "wait for all" join
//! - [`context`]: context elements and expression rendering
//! - [`states`]: leaf deployment steps (shell script, HTTP, Jenkins, Helm,
//!   containers, CodeDeploy)
//! - [`analysis`]: baseline vs canary verification over log and metric
//!   providers
//! - [`workflow`]: phases, phase steps, rollback and the in-process engine
//! - [`state_machine`]: step status transitions
//! - [`config`], [`logging`], [`error`]: ambient configuration, structured
//!   logging and error types
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use delivery_states::config::StatesConfig;
//! use delivery_states::context::StateExecutionContext;
//! use delivery_states::workflow::WorkflowEngine;
//! use delivery_states::step::Step;
//! use std::sync::Arc;
//!
//! # async fn example(step: Arc<dyn Step>) -> Result<(), delivery_states::StateError> {
//! delivery_states::logging::init_structured_logging();
//!
//! let engine = WorkflowEngine::from_config(&StatesConfig::default());
//! let context = StateExecutionContext::builder()
//!     .account_id("account")
//!     .app_id("app")
//!     .workflow_execution_id("execution-1")
//!     .state_execution_instance_id("phase-1")
//!     .build();
//!
//! let instance_id = engine.start_root(step, context).await?;
//! println!("status: {:?}", engine.status(&instance_id));
//! # Ok(())
//! # }
//! ```

pub mod activity;
pub mod analysis;
pub mod config;
pub mod constants;
pub mod context;
pub mod correlation;
pub mod dispatch;
pub mod error;
pub mod logging;
pub mod state_machine;
pub mod states;
pub mod step;
pub mod workflow;

pub use config::{ConfigManager, StatesConfig};
pub use constants::{status_groups, system, ExecutionStatus};
pub use error::{FieldErrors, Result, StateError, StateResult};
pub use step::{ExecutionResponse, Step, StepExecutor, StepType};
pub use workflow::WorkflowEngine;
