//! # Step Executor
//!
//! Drives step instances through execute, suspend, resume, abort and expiry.
//!
//! The executor owns every live [`StepInstance`], the context it executes
//! in, and the registration of its correlation set. It never blocks on a
//! remote task: `start` and `resume` return as soon as the step has either
//! completed or suspended again.

use super::data::StateExecutionData;
use super::instance::StepInstance;
use super::response::{ExecutionResponse, SpawnPlan};
use super::{Step, StepType};
use crate::config::ExecutionConfig;
use crate::constants::{events, ExecutionStatus};
use crate::context::{ContextElement, ExecutionContext, StateExecutionContext};
use crate::correlation::WaitCorrelationRegistry;
use crate::dispatch::ResponseData;
use crate::error::{StateError, StateResult};
use crate::logging::log_step_operation;
use crate::state_machine::StepEvent;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, instrument, warn};

/// Terminal result of one instance
#[derive(Debug, Clone, PartialEq)]
pub struct StepCompletion {
    pub instance_id: String,
    pub parent_id: Option<String>,
    pub step_name: String,
    pub step_type: StepType,
    pub state_execution_data: Option<StateExecutionData>,
    pub status: ExecutionStatus,
    pub error_message: Option<String>,
    pub notify_elements: Vec<ContextElement>,
    pub context_elements: Vec<ContextElement>,
}

/// What the caller must do next for an instance
#[derive(Debug)]
pub enum StepOutcome {
    /// Parked until every wait id is answered
    Suspended {
        instance_id: String,
        wait_ids: Vec<String>,
    },
    /// Composite step asked for children
    Spawn { instance_id: String, plan: SpawnPlan },
    Completed(StepCompletion),
    /// The instance was already terminal
    Ignored { instance_id: String },
}

impl StepOutcome {
    pub fn completion(&self) -> Option<&StepCompletion> {
        match self {
            Self::Completed(completion) => Some(completion),
            _ => None,
        }
    }
}

/// Result of applying one step response
enum Applied {
    Outcome(StepOutcome),
    /// Held responses completed the join as it was registered
    Replayed(HashMap<String, ResponseData>),
}

struct ManagedStep {
    step: Arc<dyn Step>,
    context: Arc<StateExecutionContext>,
    instance: Mutex<StepInstance>,
}

pub struct StepExecutor {
    registry: Arc<WaitCorrelationRegistry>,
    default_timeout_ms: u64,
    steps: DashMap<String, Arc<ManagedStep>>,
}

impl std::fmt::Debug for StepExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StepExecutor")
            .field("default_timeout_ms", &self.default_timeout_ms)
            .field("instances", &self.steps.len())
            .finish()
    }
}

impl StepExecutor {
    pub fn new(registry: Arc<WaitCorrelationRegistry>, config: &ExecutionConfig) -> Self {
        Self {
            registry,
            default_timeout_ms: config.default_state_timeout_ms,
            steps: DashMap::new(),
        }
    }

    pub fn registry(&self) -> &Arc<WaitCorrelationRegistry> {
        &self.registry
    }

    /// Snapshot of an instance
    pub fn instance(&self, instance_id: &str) -> Option<StepInstance> {
        self.steps
            .get(instance_id)
            .map(|managed| managed.instance.lock().clone())
    }

    pub fn status(&self, instance_id: &str) -> Option<ExecutionStatus> {
        self.steps
            .get(instance_id)
            .map(|managed| managed.instance.lock().status())
    }

    pub fn context(&self, instance_id: &str) -> Option<Arc<StateExecutionContext>> {
        self.steps
            .get(instance_id)
            .map(|managed| Arc::clone(&managed.context))
    }

    /// Non-terminal instances whose deadline has passed
    pub fn expired_instances(&self, now: DateTime<Utc>) -> Vec<String> {
        self.steps
            .iter()
            .filter(|entry| entry.value().instance.lock().is_expired_at(now))
            .map(|entry| entry.key().clone())
            .collect()
    }

    /// Create the instance and run `execute`
    #[instrument(skip(self, step, context), fields(instance_id = %context.state_execution_instance_id(), step = %step.name()))]
    pub async fn start(
        &self,
        step: Arc<dyn Step>,
        context: Arc<StateExecutionContext>,
        parent_id: Option<String>,
    ) -> StateResult<StepOutcome> {
        let instance_id = context.state_execution_instance_id().to_string();
        if self.steps.contains_key(&instance_id) {
            return Err(StateError::InvalidRequest(format!(
                "step instance {instance_id} already started"
            )));
        }

        let timeout_ms = step.timeout_millis().unwrap_or(self.default_timeout_ms);
        let mut instance = StepInstance::new(&instance_id, step.name(), step.step_type(), parent_id);
        instance.start(timeout_ms)?;

        let managed = Arc::new(ManagedStep {
            step: Arc::clone(&step),
            context,
            instance: Mutex::new(instance),
        });
        self.steps.insert(instance_id.clone(), Arc::clone(&managed));

        log_step_operation(
            events::STEP_EXECUTE_REQUESTED,
            &instance_id,
            step.name(),
            ExecutionStatus::Running.as_str(),
            None,
        );

        let field_errors = step.validate_fields();
        if !field_errors.is_empty() {
            let error = StateError::FieldValidation(field_errors);
            return self.complete(
                &managed,
                StepEvent::Complete(ExecutionStatus::Error),
                Some(error.user_message()),
                ExecutionResponse::default(),
            );
        }

        let result = step.execute(managed.context.as_ref()).await;
        self.settle(&managed, result).await
    }

    /// Route one worker response; resumes the instance once its join completes
    pub async fn deliver(
        &self,
        wait_id: &str,
        response: ResponseData,
    ) -> StateResult<Option<StepOutcome>> {
        match self.registry.notify(wait_id, response) {
            Some(event) => self
                .resume(&event.instance_id, event.responses)
                .await
                .map(Some),
            None => Ok(None),
        }
    }

    /// Hand the complete response set to the step
    #[instrument(skip(self, responses), fields(responses = responses.len()))]
    pub async fn resume(
        &self,
        instance_id: &str,
        responses: HashMap<String, ResponseData>,
    ) -> StateResult<StepOutcome> {
        let managed = self.managed(instance_id)?;

        if managed.instance.lock().is_terminal() {
            debug!(event = events::STEP_LATE_RESPONSE_IGNORED, instance_id = %instance_id, "Late response ignored");
            return Ok(StepOutcome::Ignored {
                instance_id: instance_id.to_string(),
            });
        }

        let step_name = managed.step.name().to_string();
        log_step_operation(
            events::STEP_RESUMED,
            instance_id,
            &step_name,
            ExecutionStatus::Running.as_str(),
            None,
        );

        self.settle_responses(&managed, responses).await
    }

    /// Abort an instance; tasks already dispatched are left to finish
    #[instrument(skip(self))]
    pub async fn abort(&self, instance_id: &str) -> StateResult<StepOutcome> {
        let managed = self.managed(instance_id)?;
        if managed.instance.lock().is_terminal() {
            return Ok(StepOutcome::Ignored {
                instance_id: instance_id.to_string(),
            });
        }

        let dropped = self.registry.cancel(instance_id);
        if let Err(e) = managed.step.handle_abort(managed.context.as_ref()).await {
            warn!(instance_id = %instance_id, error = %e, "Abort handler failed");
        }

        log_step_operation(
            events::STEP_ABORTED,
            instance_id,
            managed.step.name(),
            ExecutionStatus::Aborted.as_str(),
            Some(&format!("{dropped} pending responses dropped")),
        );

        self.complete(
            &managed,
            StepEvent::Abort,
            Some("Execution aborted".to_string()),
            ExecutionResponse::default(),
        )
    }

    /// Expire an instance whose deadline passed
    #[instrument(skip(self))]
    pub async fn expire(&self, instance_id: &str) -> StateResult<StepOutcome> {
        let managed = self.managed(instance_id)?;
        if managed.instance.lock().is_terminal() {
            return Ok(StepOutcome::Ignored {
                instance_id: instance_id.to_string(),
            });
        }

        self.registry.cancel(instance_id);
        log_step_operation(
            events::STEP_EXPIRED,
            instance_id,
            managed.step.name(),
            ExecutionStatus::Error.as_str(),
            None,
        );

        self.complete(
            &managed,
            StepEvent::Expire,
            Some("Step timed out".to_string()),
            ExecutionResponse::default(),
        )
    }

    fn managed(&self, instance_id: &str) -> StateResult<Arc<ManagedStep>> {
        self.steps
            .get(instance_id)
            .map(|managed| Arc::clone(&managed))
            .ok_or_else(|| StateError::InvalidRequest(format!("unknown step instance {instance_id}")))
    }

    fn record_data(&self, managed: &ManagedStep, data: StateExecutionData) {
        managed.context.save_state_execution_data(data.clone());
        managed.instance.lock().state_execution_data = Some(data);
    }

    /// Hand a complete response set to the step, short-circuiting on an
    /// error response
    async fn settle_responses(
        &self,
        managed: &Arc<ManagedStep>,
        responses: HashMap<String, ResponseData>,
    ) -> StateResult<StepOutcome> {
        if let Some(outcome) = self.short_circuit(managed, &responses) {
            return outcome;
        }

        let result = managed
            .step
            .handle_async_response(managed.context.as_ref(), &responses)
            .await;
        self.settle(managed, result).await
    }

    /// Apply step results until the instance completes, suspends or spawns.
    /// Loops when responses held for its wait ids complete the join at
    /// registration.
    async fn settle(
        &self,
        managed: &Arc<ManagedStep>,
        mut result: StateResult<ExecutionResponse>,
    ) -> StateResult<StepOutcome> {
        loop {
            let responses = match self.apply(managed, result)? {
                Applied::Outcome(outcome) => return Ok(outcome),
                Applied::Replayed(responses) => responses,
            };

            debug!(
                instance_id = %managed.context.state_execution_instance_id(),
                responses = responses.len(),
                "Join completed by held responses"
            );
            if let Some(outcome) = self.short_circuit(managed, &responses) {
                return outcome;
            }
            result = managed
                .step
                .handle_async_response(managed.context.as_ref(), &responses)
                .await;
        }
    }

    /// ERROR completion when the set carries an error response
    fn short_circuit(
        &self,
        managed: &Arc<ManagedStep>,
        responses: &HashMap<String, ResponseData>,
    ) -> Option<StateResult<StepOutcome>> {
        let error = responses.values().find(|r| r.is_error())?;
        let message = error.error_message().unwrap_or("remote task error").to_string();
        warn!(
            instance_id = %managed.context.state_execution_instance_id(),
            error = %message,
            "❌ Error response received"
        );
        Some(self.complete(
            managed,
            StepEvent::Complete(ExecutionStatus::Error),
            Some(message),
            ExecutionResponse::default(),
        ))
    }

    fn apply(
        &self,
        managed: &Arc<ManagedStep>,
        result: StateResult<ExecutionResponse>,
    ) -> StateResult<Applied> {
        let instance_id = managed.context.state_execution_instance_id().to_string();

        let mut response = match result {
            Ok(response) => response,
            Err(error) => {
                warn!(instance_id = %instance_id, error = %error, "❌ Step failed");
                return self
                    .complete(
                        managed,
                        StepEvent::Complete(error.to_execution_status()),
                        Some(error.user_message()),
                        ExecutionResponse::default(),
                    )
                    .map(Applied::Outcome);
            }
        };

        if let Some(data) = response.state_execution_data.take() {
            self.record_data(managed, data);
        }

        if !response.is_async {
            let status = response.status;
            if !status.is_terminal() {
                return self
                    .complete(
                        managed,
                        StepEvent::Complete(ExecutionStatus::Error),
                        Some(format!("step returned non-terminal status {status} without suspending")),
                        ExecutionResponse::default(),
                    )
                    .map(Applied::Outcome);
            }
            let message = response.error_message.take();
            return self
                .complete(managed, StepEvent::Complete(status), message, response)
                .map(Applied::Outcome);
        }

        if managed.instance.lock().is_terminal() {
            return Ok(Applied::Outcome(StepOutcome::Ignored { instance_id }));
        }

        if let Some(plan) = response.spawn_plan.take() {
            managed.instance.lock().is_async = true;
            return Ok(Applied::Outcome(StepOutcome::Spawn { instance_id, plan }));
        }

        if response.correlation_ids.is_empty() {
            return self
                .complete(
                    managed,
                    StepEvent::Complete(ExecutionStatus::Error),
                    Some("async response carried no correlation ids".to_string()),
                    ExecutionResponse::default(),
                )
                .map(Applied::Outcome);
        }

        let replayed = self
            .registry
            .register(&instance_id, &response.correlation_ids)?;
        {
            let mut instance = managed.instance.lock();
            instance.is_async = true;
            instance.pending_correlation_ids = response.correlation_ids.clone();
        }

        if let Some(event) = replayed {
            return Ok(Applied::Replayed(event.responses));
        }

        log_step_operation(
            events::STEP_SUSPENDED,
            &instance_id,
            managed.step.name(),
            ExecutionStatus::Running.as_str(),
            Some(&format!("{} pending", response.correlation_ids.len())),
        );

        Ok(Applied::Outcome(StepOutcome::Suspended {
            instance_id,
            wait_ids: response.correlation_ids,
        }))
    }

    fn complete(
        &self,
        managed: &Arc<ManagedStep>,
        event: StepEvent,
        error_message: Option<String>,
        response: ExecutionResponse,
    ) -> StateResult<StepOutcome> {
        let instance_id = managed.context.state_execution_instance_id().to_string();
        let mut instance = managed.instance.lock();

        if instance.is_terminal() {
            return Ok(StepOutcome::Ignored { instance_id });
        }

        let status = instance.transition(event)?;
        instance.error_message = error_message.clone();
        instance.notify_elements = response.notify_elements.clone();
        let parent_id = instance.parent_id.clone();
        let step_name = instance.name.clone();
        let step_type = instance.step_type;
        let state_execution_data = instance.state_execution_data.clone();
        drop(instance);

        log_step_operation(
            events::STEP_COMPLETED,
            &instance_id,
            managed.step.name(),
            status.as_str(),
            error_message.as_deref(),
        );

        Ok(StepOutcome::Completed(StepCompletion {
            instance_id,
            parent_id,
            step_name,
            step_type,
            state_execution_data,
            status,
            error_message,
            notify_elements: response.notify_elements,
            context_elements: response.context_elements,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FieldErrors;
    use crate::step::StepType;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Suspends on `waits` ids, succeeds when every response succeeded
    struct WaitingStep {
        waits: usize,
        resumed: AtomicUsize,
        aborted: AtomicUsize,
        invalid: bool,
    }

    impl WaitingStep {
        fn new(waits: usize) -> Self {
            Self {
                waits,
                resumed: AtomicUsize::new(0),
                aborted: AtomicUsize::new(0),
                invalid: false,
            }
        }
    }

    #[async_trait]
    impl Step for WaitingStep {
        fn name(&self) -> &str {
            "waiting"
        }

        fn step_type(&self) -> StepType {
            StepType::ShellScript
        }

        fn validate_fields(&self) -> FieldErrors {
            let mut errors = FieldErrors::new();
            if self.invalid {
                errors.insert("command".to_string(), "Command should be provided".to_string());
            }
            errors
        }

        async fn execute(&self, _context: &dyn ExecutionContext) -> StateResult<ExecutionResponse> {
            if self.waits == 0 {
                return Ok(ExecutionResponse::success());
            }
            let ids = (0..self.waits).map(|i| format!("wait-{i}")).collect();
            Ok(ExecutionResponse::suspended(ids))
        }

        async fn handle_async_response(
            &self,
            _context: &dyn ExecutionContext,
            responses: &HashMap<String, ResponseData>,
        ) -> StateResult<ExecutionResponse> {
            self.resumed.fetch_add(1, Ordering::SeqCst);
            let status = crate::step::aggregate_status(responses.values().map(|r| r.status()));
            Ok(ExecutionResponse::completed(status))
        }

        async fn handle_abort(&self, _context: &dyn ExecutionContext) -> StateResult<()> {
            self.aborted.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn executor() -> StepExecutor {
        StepExecutor::new(
            Arc::new(WaitCorrelationRegistry::new()),
            &ExecutionConfig::default(),
        )
    }

    fn context(id: &str) -> Arc<StateExecutionContext> {
        Arc::new(
            StateExecutionContext::builder()
                .account_id("acc")
                .app_id("app")
                .state_execution_instance_id(id)
                .build(),
        )
    }

    #[tokio::test]
    async fn test_synchronous_completion() {
        let executor = executor();
        let outcome = executor
            .start(Arc::new(WaitingStep::new(0)), context("i-1"), None)
            .await
            .unwrap();
        assert_eq!(outcome.completion().unwrap().status, ExecutionStatus::Success);
        assert_eq!(executor.status("i-1"), Some(ExecutionStatus::Success));
    }

    #[tokio::test]
    async fn test_resume_after_all_responses() {
        let executor = executor();
        let step = Arc::new(WaitingStep::new(2));
        let outcome = executor
            .start(step.clone(), context("i-1"), None)
            .await
            .unwrap();
        assert!(matches!(outcome, StepOutcome::Suspended { ref wait_ids, .. } if wait_ids.len() == 2));

        assert!(executor
            .deliver("wait-1", ResponseData::success(json!({})))
            .await
            .unwrap()
            .is_none());
        let outcome = executor
            .deliver("wait-0", ResponseData::failure("exit 2"))
            .await
            .unwrap()
            .unwrap();

        assert_eq!(outcome.completion().unwrap().status, ExecutionStatus::Failed);
        assert_eq!(step.resumed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_response_ahead_of_suspend_resumes_on_start() {
        let executor = executor();
        let step = Arc::new(WaitingStep::new(2));

        assert!(executor
            .deliver("wait-0", ResponseData::success(json!({})))
            .await
            .unwrap()
            .is_none());

        let outcome = executor.start(step.clone(), context("i-1"), None).await.unwrap();
        assert!(matches!(outcome, StepOutcome::Suspended { .. }));
        assert_eq!(executor.registry().pending_count("i-1"), 1);

        let outcome = executor
            .deliver("wait-1", ResponseData::success(json!({})))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(outcome.completion().unwrap().status, ExecutionStatus::Success);
        assert_eq!(step.resumed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_all_responses_ahead_of_suspend_complete_the_step() {
        let executor = executor();
        let step = Arc::new(WaitingStep::new(1));
        executor
            .deliver("wait-0", ResponseData::failure("exit 4"))
            .await
            .unwrap();

        let outcome = executor.start(step.clone(), context("i-1"), None).await.unwrap();
        assert_eq!(outcome.completion().unwrap().status, ExecutionStatus::Failed);
        assert_eq!(step.resumed.load(Ordering::SeqCst), 1);
        assert_eq!(executor.registry().held_count(), 0);
    }

    #[tokio::test]
    async fn test_error_response_skips_handler() {
        let executor = executor();
        let step = Arc::new(WaitingStep::new(3));
        executor.start(step.clone(), context("i-1"), None).await.unwrap();

        let outcome = executor
            .deliver("wait-2", ResponseData::error("delegate unreachable"))
            .await
            .unwrap()
            .unwrap();
        let completion = outcome.completion().unwrap();
        assert_eq!(completion.status, ExecutionStatus::Error);
        assert_eq!(completion.error_message.as_deref(), Some("delegate unreachable"));
        assert_eq!(step.resumed.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_abort_ignores_late_responses() {
        let executor = executor();
        let step = Arc::new(WaitingStep::new(1));
        executor.start(step.clone(), context("i-1"), None).await.unwrap();

        let outcome = executor.abort("i-1").await.unwrap();
        assert_eq!(outcome.completion().unwrap().status, ExecutionStatus::Aborted);
        assert_eq!(step.aborted.load(Ordering::SeqCst), 1);

        // the registration is gone, so the late response goes nowhere
        assert!(executor
            .deliver("wait-0", ResponseData::success(json!({})))
            .await
            .unwrap()
            .is_none());
        let late = executor
            .resume("i-1", HashMap::new())
            .await
            .unwrap();
        assert!(matches!(late, StepOutcome::Ignored { .. }));
        assert_eq!(step.resumed.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_expire_yields_error() {
        let executor = executor();
        executor
            .start(Arc::new(WaitingStep::new(1)), context("i-1"), None)
            .await
            .unwrap();

        let later = Utc::now() + chrono::Duration::hours(5);
        assert_eq!(executor.expired_instances(later), vec!["i-1".to_string()]);

        let outcome = executor.expire("i-1").await.unwrap();
        assert_eq!(outcome.completion().unwrap().status, ExecutionStatus::Error);
        assert!(executor.expired_instances(later).is_empty());
    }

    #[tokio::test]
    async fn test_invalid_fields_fail_before_execute() {
        let executor = executor();
        let mut step = WaitingStep::new(1);
        step.invalid = true;
        let outcome = executor
            .start(Arc::new(step), context("i-1"), None)
            .await
            .unwrap();
        let completion = outcome.completion().unwrap();
        assert_eq!(completion.status, ExecutionStatus::Error);
        assert!(completion
            .error_message
            .as_deref()
            .unwrap()
            .contains("Command should be provided"));
        assert_eq!(executor.registry().pending_count("i-1"), 0);
    }

    #[tokio::test]
    async fn test_duplicate_start_rejected() {
        let executor = executor();
        executor
            .start(Arc::new(WaitingStep::new(1)), context("i-1"), None)
            .await
            .unwrap();
        assert!(executor
            .start(Arc::new(WaitingStep::new(1)), context("i-1"), None)
            .await
            .is_err());
    }
}
