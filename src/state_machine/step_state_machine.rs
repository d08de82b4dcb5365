use super::{
    errors::{StateMachineError, StateMachineResult},
    events::StepEvent,
};
use crate::constants::ExecutionStatus;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One recorded status change
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepTransition {
    pub from: ExecutionStatus,
    pub to: ExecutionStatus,
    pub event: String,
    pub at: DateTime<Utc>,
}

/// Status holder for a step instance with an append-only transition history
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StepStateMachine {
    current: ExecutionStatus,
    history: Vec<StepTransition>,
}

impl StepStateMachine {
    /// Create a new state machine in NEW
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current_state(&self) -> ExecutionStatus {
        self.current
    }

    pub fn history(&self) -> &[StepTransition] {
        &self.history
    }

    /// Attempt to transition the step status
    pub fn transition(&mut self, event: StepEvent) -> StateMachineResult<ExecutionStatus> {
        let target = Self::determine_target_state(self.current, &event)?;

        tracing::debug!(
            from = %self.current,
            to = %target,
            event = event.event_type(),
            "Step status transition"
        );

        self.history.push(StepTransition {
            from: self.current,
            to: target,
            event: event.event_type().to_string(),
            at: Utc::now(),
        });
        self.current = target;
        Ok(target)
    }

    /// Determine the target status for an event without applying it
    pub fn determine_target_state(
        current_state: ExecutionStatus,
        event: &StepEvent,
    ) -> StateMachineResult<ExecutionStatus> {
        use ExecutionStatus::*;

        let target = match (current_state, event) {
            (New, StepEvent::Start) | (Queued, StepEvent::Start) => Running,
            (New, StepEvent::Queue) => Queued,

            (New, StepEvent::Skip) | (Queued, StepEvent::Skip) => Skipped,

            (Running, StepEvent::Complete(status)) if status.is_terminal() => *status,

            (New, StepEvent::Abort) | (Queued, StepEvent::Abort) | (Running, StepEvent::Abort) => {
                Aborted
            }

            (Queued, StepEvent::Expire) | (Running, StepEvent::Expire) => Error,

            (from_state, _) => {
                return Err(StateMachineError::InvalidTransition {
                    from: Some(from_state.to_string()),
                    to: format!("{event:?}"),
                })
            }
        };

        Ok(target)
    }

    pub fn is_terminal(&self) -> bool {
        self.current.is_terminal()
    }
}
