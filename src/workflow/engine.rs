//! # Workflow Engine
//!
//! In-process driver for composite steps. The [`StepExecutor`] runs one
//! instance at a time and hands back a [`StepOutcome`]; the engine turns
//! spawn plans into child instances, feeds child completions back to their
//! parent as notify responses and resumes the parent once every child is
//! terminal.
//!
//! ## Spawn tracking
//!
//! Each composite instance with live children owns a tracker holding the
//! children still to start (sequential mode), the children running, and the
//! notify responses collected so far. A sequential child sees the notify
//! elements of every earlier sibling on its context, which is how a verify
//! phase step learns about the instances a deploy phase step created.
//!
//! When a child breaks and the [`FailureStrategyAdvisor`] says stop, the
//! children not yet started are recorded as SKIPPED and the parent resumes
//! as soon as the running ones finish.

use super::failure_strategy::{FailureStrategyAdvisor, StopOnFailureAdvisor};
use crate::config::StatesConfig;
use crate::constants::{events, ExecutionStatus};
use crate::context::{ContextElement, ExecutionContext, StateExecutionContext};
use crate::correlation::WaitCorrelationRegistry;
use crate::dispatch::{ElementNotify, ResponseData};
use crate::error::{StateError, StateResult};
use crate::logging::log_phase_operation;
use crate::step::{ExecutionMode, SpawnChild, SpawnPlan, Step, StepCompletion, StepExecutor, StepOutcome, StepType};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use futures::future::join_all;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

struct SpawnTracker {
    parent_step_type: StepType,
    mode: ExecutionMode,
    pending: VecDeque<SpawnChild>,
    running: HashSet<String>,
    responses: HashMap<String, ResponseData>,
    sibling_elements: Vec<ContextElement>,
}

/// What to do after a child completion was recorded
enum NextAction {
    Start(String, SpawnChild, Vec<ContextElement>),
    Resume(HashMap<String, ResponseData>),
    Wait,
}

pub struct WorkflowEngine {
    executor: Arc<StepExecutor>,
    advisor: Arc<dyn FailureStrategyAdvisor>,
    trackers: Mutex<HashMap<String, SpawnTracker>>,
    completions: DashMap<String, StepCompletion>,
}

impl std::fmt::Debug for WorkflowEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkflowEngine")
            .field("executor", &self.executor)
            .field("active_spawns", &self.trackers.lock().len())
            .field("completions", &self.completions.len())
            .finish()
    }
}

fn notify_response(completion: &StepCompletion) -> ResponseData {
    ResponseData::Notify(ElementNotify {
        status: completion.status,
        notify_elements: completion.notify_elements.clone(),
        error_message: completion.error_message.clone(),
        step_name: Some(completion.step_name.clone()),
        step_type: Some(completion.step_type),
        state_execution_data: completion.state_execution_data.clone(),
    })
}

fn skipped_response(child: &SpawnChild) -> ResponseData {
    ResponseData::Notify(ElementNotify {
        status: ExecutionStatus::Skipped,
        notify_elements: Vec::new(),
        error_message: Some("Skipped after an earlier step failed".to_string()),
        step_name: Some(child.name.clone()),
        step_type: Some(child.step.step_type()),
        state_execution_data: None,
    })
}

impl WorkflowEngine {
    pub fn new(executor: Arc<StepExecutor>) -> Self {
        Self {
            executor,
            advisor: Arc::new(StopOnFailureAdvisor),
            trackers: Mutex::new(HashMap::new()),
            completions: DashMap::new(),
        }
    }

    /// Engine with its own correlation registry and executor
    pub fn from_config(config: &StatesConfig) -> Self {
        let registry = Arc::new(WaitCorrelationRegistry::with_buffer_capacity(
            config.execution.early_response_buffer_size,
        ));
        Self::new(Arc::new(StepExecutor::new(registry, &config.execution)))
    }

    pub fn with_failure_strategy(mut self, advisor: Arc<dyn FailureStrategyAdvisor>) -> Self {
        self.advisor = advisor;
        self
    }

    pub fn executor(&self) -> &Arc<StepExecutor> {
        &self.executor
    }

    /// Terminal result of any instance the engine drove
    pub fn completion(&self, instance_id: &str) -> Option<StepCompletion> {
        self.completions.get(instance_id).map(|c| c.clone())
    }

    pub fn status(&self, instance_id: &str) -> Option<ExecutionStatus> {
        self.executor.status(instance_id)
    }

    /// Children of `parent_id` that are currently running
    pub fn running_children(&self, parent_id: &str) -> Vec<String> {
        self.trackers
            .lock()
            .get(parent_id)
            .map(|t| t.running.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Start a top-level step; returns its instance id
    #[instrument(skip(self, step, context), fields(step = %step.name()))]
    pub async fn start_root(
        &self,
        step: Arc<dyn Step>,
        context: StateExecutionContext,
    ) -> StateResult<String> {
        let instance_id = context.state_execution_instance_id().to_string();
        let outcome = self.executor.start(step, Arc::new(context), None).await?;
        self.drive(outcome).await?;
        Ok(instance_id)
    }

    /// Route a worker response; returns whether it resumed an instance
    pub async fn deliver(&self, wait_id: &str, response: ResponseData) -> StateResult<bool> {
        match self.executor.deliver(wait_id, response).await? {
            Some(outcome) => {
                self.drive(outcome).await?;
                Ok(true)
            }
            None => {
                debug!(wait_id = %wait_id, "Response matched no waiting instance");
                Ok(false)
            }
        }
    }

    /// Abort an instance and everything it spawned, innermost first
    #[instrument(skip(self))]
    pub async fn abort(&self, instance_id: &str) -> StateResult<()> {
        for descendant in self.detach_descendants(instance_id) {
            if let StepOutcome::Completed(completion) = self.executor.abort(&descendant).await? {
                self.completions
                    .insert(completion.instance_id.clone(), completion);
            }
        }

        let outcome = self.executor.abort(instance_id).await?;
        self.drive(outcome).await
    }

    /// Expire every instance whose deadline passed, together with anything
    /// it spawned; returns how many instances expired
    pub async fn expire_due(&self, now: DateTime<Utc>) -> StateResult<usize> {
        let expired = self.executor.expired_instances(now);
        let mut count = 0;
        for instance_id in expired {
            for descendant in self.detach_descendants(&instance_id) {
                if let StepOutcome::Completed(completion) = self.executor.expire(&descendant).await? {
                    count += 1;
                    self.completions
                        .insert(completion.instance_id.clone(), completion);
                }
            }

            let outcome = self.executor.expire(&instance_id).await?;
            if outcome.completion().is_some() {
                count += 1;
            }
            self.drive(outcome).await?;
        }
        Ok(count)
    }

    /// Drop the spawn trackers below `instance_id`; returns the descendants, innermost first
    fn detach_descendants(&self, instance_id: &str) -> Vec<String> {
        let mut trackers = self.trackers.lock();
        let mut order = Vec::new();
        collect_descendants(&trackers, instance_id, &mut order);
        for descendant in &order {
            trackers.remove(descendant);
        }
        trackers.remove(instance_id);
        drop(trackers);

        order.retain(|id| self.executor.status(id).is_some());
        order
    }

    async fn drive(&self, first: StepOutcome) -> StateResult<()> {
        let mut queue = VecDeque::from([first]);
        while let Some(outcome) = queue.pop_front() {
            match outcome {
                StepOutcome::Suspended { .. } | StepOutcome::Ignored { .. } => {}
                StepOutcome::Spawn { instance_id, plan } => {
                    queue.extend(self.begin_spawn(&instance_id, plan).await?);
                }
                StepOutcome::Completed(completion) => {
                    self.trackers.lock().remove(&completion.instance_id);
                    let parent_id = completion.parent_id.clone();
                    if let Some(parent_id) = parent_id {
                        queue.extend(self.child_completed(&parent_id, &completion).await?);
                    } else {
                        info!(
                            instance_id = %completion.instance_id,
                            status = %completion.status,
                            "Workflow step finished"
                        );
                    }
                    self.completions
                        .insert(completion.instance_id.clone(), completion);
                }
            }
        }
        Ok(())
    }

    async fn begin_spawn(&self, parent_id: &str, plan: SpawnPlan) -> StateResult<Vec<StepOutcome>> {
        let parent_step_type = self
            .executor
            .instance(parent_id)
            .map(|i| i.step_type)
            .ok_or_else(|| StateError::InvalidRequest(format!("unknown step instance {parent_id}")))?;

        if plan.children.is_empty() {
            return Ok(vec![self.executor.resume(parent_id, HashMap::new()).await?]);
        }

        let mut pending: VecDeque<SpawnChild> = plan.children.into();
        let to_start: Vec<(String, SpawnChild)> = match plan.mode {
            ExecutionMode::Sequential => pending
                .pop_front()
                .map(|child| (Uuid::new_v4().to_string(), child))
                .into_iter()
                .collect(),
            ExecutionMode::Parallel => pending
                .drain(..)
                .map(|child| (Uuid::new_v4().to_string(), child))
                .collect(),
        };

        self.trackers.lock().insert(
            parent_id.to_string(),
            SpawnTracker {
                parent_step_type,
                mode: plan.mode,
                pending,
                running: to_start.iter().map(|(id, _)| id.clone()).collect(),
                responses: HashMap::new(),
                sibling_elements: Vec::new(),
            },
        );

        debug!(parent_id = %parent_id, mode = ?plan.mode, started = to_start.len(), "Spawning children");

        Ok(join_all(
            to_start
                .into_iter()
                .map(|(child_id, child)| self.launch(parent_id, child_id, child, Vec::new())),
        )
        .await)
    }

    /// Start a child; a child that cannot start completes as ERROR so its
    /// parent still resumes
    async fn launch(
        &self,
        parent_id: &str,
        child_id: String,
        child: SpawnChild,
        sibling_elements: Vec<ContextElement>,
    ) -> StepOutcome {
        let step_name = child.name.clone();
        let step_type = child.step.step_type();
        match self
            .start_child(parent_id, child_id.clone(), child, sibling_elements)
            .await
        {
            Ok(outcome) => outcome,
            Err(error) => {
                warn!(
                    parent_id = %parent_id,
                    child_id = %child_id,
                    step = %step_name,
                    error = %error,
                    "❌ Child step failed to start"
                );
                StepOutcome::Completed(StepCompletion {
                    instance_id: child_id,
                    parent_id: Some(parent_id.to_string()),
                    step_name,
                    step_type,
                    state_execution_data: None,
                    status: ExecutionStatus::Error,
                    error_message: Some(error.user_message()),
                    notify_elements: Vec::new(),
                    context_elements: Vec::new(),
                })
            }
        }
    }

    async fn start_child(
        &self,
        parent_id: &str,
        child_id: String,
        child: SpawnChild,
        sibling_elements: Vec<ContextElement>,
    ) -> StateResult<StepOutcome> {
        let parent_context = self
            .executor
            .context(parent_id)
            .ok_or_else(|| StateError::InvalidRequest(format!("unknown step instance {parent_id}")))?;

        let mut elements = child.elements;
        elements.extend(sibling_elements);
        let context = parent_context.child(&child_id, elements);
        self.executor
            .start(child.step, Arc::new(context), Some(parent_id.to_string()))
            .await
    }

    async fn child_completed(
        &self,
        parent_id: &str,
        completion: &StepCompletion,
    ) -> StateResult<Vec<StepOutcome>> {
        let action = {
            let mut trackers = self.trackers.lock();
            let Some(tracker) = trackers.get_mut(parent_id) else {
                debug!(parent_id = %parent_id, child_id = %completion.instance_id, "Parent no longer waiting");
                return Ok(Vec::new());
            };
            if !tracker.running.remove(&completion.instance_id) {
                return Ok(Vec::new());
            }

            tracker
                .responses
                .insert(completion.instance_id.clone(), notify_response(completion));
            tracker
                .sibling_elements
                .extend(completion.notify_elements.iter().cloned());

            log_phase_operation(
                events::SPAWN_CHILD_COMPLETED,
                parent_id,
                &completion.step_name,
                tracker.running.len() + tracker.pending.len(),
                completion.status.as_str(),
            );

            if completion.status.is_broken()
                && !self.advisor.should_continue(
                    tracker.parent_step_type,
                    &completion.step_name,
                    completion.status,
                )
            {
                for child in tracker.pending.drain(..) {
                    tracker
                        .responses
                        .insert(Uuid::new_v4().to_string(), skipped_response(&child));
                }
            }

            let next = match tracker.mode {
                ExecutionMode::Sequential => tracker.pending.pop_front(),
                ExecutionMode::Parallel => None,
            };
            match next {
                Some(child) => {
                    let child_id = Uuid::new_v4().to_string();
                    tracker.running.insert(child_id.clone());
                    NextAction::Start(child_id, child, tracker.sibling_elements.clone())
                }
                None if tracker.running.is_empty() => {
                    let responses = std::mem::take(&mut tracker.responses);
                    trackers.remove(parent_id);
                    NextAction::Resume(responses)
                }
                None => NextAction::Wait,
            }
        };

        match action {
            NextAction::Start(child_id, child, sibling_elements) => Ok(vec![
                self.launch(parent_id, child_id, child, sibling_elements).await,
            ]),
            NextAction::Resume(responses) => {
                Ok(vec![self.executor.resume(parent_id, responses).await?])
            }
            NextAction::Wait => Ok(Vec::new()),
        }
    }
}

fn collect_descendants(trackers: &HashMap<String, SpawnTracker>, instance_id: &str, order: &mut Vec<String>) {
    if let Some(tracker) = trackers.get(instance_id) {
        for child in &tracker.running {
            collect_descendants(trackers, child, order);
            order.push(child.clone());
        }
    }
}
