//! Whether a composite keeps running its sequential children after one of
//! them broke.

use crate::constants::ExecutionStatus;
use crate::step::StepType;

pub trait FailureStrategyAdvisor: Send + Sync {
    fn should_continue(&self, parent_step_type: StepType, child_name: &str, status: ExecutionStatus) -> bool;
}

/// Stop at the first FAILED, ERROR or ABORTED child
#[derive(Debug, Default, Clone, Copy)]
pub struct StopOnFailureAdvisor;

impl FailureStrategyAdvisor for StopOnFailureAdvisor {
    fn should_continue(&self, _parent_step_type: StepType, _child_name: &str, status: ExecutionStatus) -> bool {
        !status.is_broken()
    }
}

/// Run every child regardless of outcome
#[derive(Debug, Default, Clone, Copy)]
pub struct ContinueOnFailureAdvisor;

impl FailureStrategyAdvisor for ContinueOnFailureAdvisor {
    fn should_continue(&self, _parent_step_type: StepType, _child_name: &str, _status: ExecutionStatus) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stop_on_broken_status() {
        let advisor = StopOnFailureAdvisor;
        assert!(advisor.should_continue(StepType::PhaseStep, "deploy", ExecutionStatus::Success));
        assert!(advisor.should_continue(StepType::PhaseStep, "deploy", ExecutionStatus::Skipped));
        assert!(!advisor.should_continue(StepType::PhaseStep, "deploy", ExecutionStatus::Failed));
        assert!(!advisor.should_continue(StepType::Phase, "deploy", ExecutionStatus::Aborted));
        assert!(ContinueOnFailureAdvisor.should_continue(StepType::Phase, "deploy", ExecutionStatus::Error));
    }
}
