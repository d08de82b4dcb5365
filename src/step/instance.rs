use super::data::StateExecutionData;
use super::StepType;
use crate::constants::ExecutionStatus;
use crate::context::ContextElement;
use crate::state_machine::{StepEvent, StepStateMachine, StepTransition};
use crate::error::StateResult;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Runtime record of one step execution
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepInstance {
    pub id: String,
    pub name: String,
    pub step_type: StepType,
    pub parent_id: Option<String>,
    machine: StepStateMachine,
    pub is_async: bool,
    pub pending_correlation_ids: Vec<String>,
    pub state_execution_data: Option<StateExecutionData>,
    pub error_message: Option<String>,
    pub notify_elements: Vec<ContextElement>,
    pub started_at: Option<DateTime<Utc>>,
    pub expires_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
}

impl StepInstance {
    pub fn new(id: &str, name: &str, step_type: StepType, parent_id: Option<String>) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            step_type,
            parent_id,
            machine: StepStateMachine::new(),
            is_async: false,
            pending_correlation_ids: Vec::new(),
            state_execution_data: None,
            error_message: None,
            notify_elements: Vec::new(),
            started_at: None,
            expires_at: None,
            ended_at: None,
        }
    }

    pub fn status(&self) -> ExecutionStatus {
        self.machine.current_state()
    }

    pub fn is_terminal(&self) -> bool {
        self.machine.is_terminal()
    }

    pub fn history(&self) -> &[StepTransition] {
        self.machine.history()
    }

    /// NEW -> RUNNING and stamp the expiry deadline
    pub fn start(&mut self, timeout_ms: u64) -> StateResult<()> {
        self.machine.transition(StepEvent::Start)?;
        let now = Utc::now();
        self.started_at = Some(now);
        self.expires_at = Some(now + Duration::milliseconds(timeout_ms as i64));
        Ok(())
    }

    pub fn transition(&mut self, event: StepEvent) -> StateResult<ExecutionStatus> {
        let status = self.machine.transition(event)?;
        if status.is_terminal() {
            self.ended_at = Some(Utc::now());
            self.pending_correlation_ids.clear();
        }
        Ok(status)
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        !self.is_terminal() && self.expires_at.is_some_and(|deadline| deadline <= now)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_start_sets_deadline() {
        let mut instance = StepInstance::new("i-1", "deploy", StepType::ShellScript, None);
        instance.start(1_000).unwrap();
        assert_eq!(instance.status(), ExecutionStatus::Running);
        let started = instance.started_at.unwrap();
        assert_eq!(instance.expires_at.unwrap() - started, Duration::seconds(1));
        assert!(instance.is_expired_at(started + Duration::seconds(2)));
        assert!(!instance.is_expired_at(started));
    }

    #[test]
    fn test_terminal_clears_pending_ids() {
        let mut instance = StepInstance::new("i-1", "deploy", StepType::Http, None);
        instance.start(1_000).unwrap();
        instance.pending_correlation_ids = vec!["w1".to_string()];
        instance
            .transition(StepEvent::Complete(ExecutionStatus::Success))
            .unwrap();
        assert!(instance.pending_correlation_ids.is_empty());
        assert!(instance.ended_at.is_some());
        assert!(!instance.is_expired_at(Utc::now() + Duration::days(1)));
        assert!(instance.transition(StepEvent::Abort).is_err());
    }
}
