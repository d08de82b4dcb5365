use crate::constants::ExecutionStatus;
use serde::{Deserialize, Serialize};

/// Events that can trigger step instance status transitions
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum StepEvent {
    /// Begin executing the step
    Start,
    /// Park the step until the scheduler releases it
    Queue,
    /// Finish with the given terminal status
    Complete(ExecutionStatus),
    /// Skip without executing
    Skip,
    /// Abort requested by the operator or the workflow
    Abort,
    /// Deadline passed without a terminal response
    Expire,
}

impl StepEvent {
    /// Get a string representation of the event type for logging
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::Queue => "queue",
            Self::Complete(_) => "complete",
            Self::Skip => "skip",
            Self::Abort => "abort",
            Self::Expire => "expire",
        }
    }

    /// Check if this event always lands in a terminal status
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Start | Self::Queue)
    }
}
