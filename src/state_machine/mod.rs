//! # Step State Machine
//!
//! Lifecycle rules for a single step instance. Every status change a step
//! instance goes through is driven by a [`StepEvent`] and validated against
//! the transition table in [`StepStateMachine`], which keeps terminal states
//! immutable.

pub mod errors;
pub mod events;
pub mod step_state_machine;

pub use errors::{StateMachineError, StateMachineResult};
pub use events::StepEvent;
pub use step_state_machine::{StepStateMachine, StepTransition};
