//! # Analysis Orchestrator
//!
//! Shared driver of every verification step. A provider [`DataCollector`]
//! supplies the tasks; the orchestrator owns everything around them.
//!
//! ## Trigger
//!
//! 1. Select test and control nodes (baseline nodes for `CompareWithPrevious`).
//! 2. Complete with SUCCESS when the phase produced no hosts to verify.
//! 3. Fix the collection window at the current minute and decide per-minute
//!    collection.
//! 4. Build the collection tasks, create the activity, save the
//!    [`AnalysisContext`] and the resume data, then submit every task.
//!
//! ## Resume
//!
//! Once every collection task has reported, the latest summary is polled
//! with a bounded retry and classified against the tolerance.

use super::baseline::{last_execution_nodes, BaselineNodes};
use super::collection::{is_eligible_for_per_minute_task, Clock, CollectionWindow, DataCollector};
use super::flags::{FeatureFlags, FeatureName};
use super::metadata::{record_best_effort, VerificationMetadata, VerificationMetadataRecorder};
use super::nodes::{control_and_test_nodes, InstanceSource, NodeSelectionOptions};
use super::poller::{Sleeper, SummaryPoller};
use super::store::{AnalysisContextStore, AnalysisSummaryStore};
use super::types::{
    AnalysisContext, AnalysisExecutionData, AnalysisSummary, AnalysisTolerance, AnalysisType,
    ComparisonStrategy,
};
use super::verdict::{qa_override, verdict};
use super::BaselineResolver;
use crate::activity::{Activity, ActivityLog};
use crate::config::{AnalysisConfig, StatesConfig};
use crate::constants::{events, ExecutionStatus};
use crate::context::{ContextElement, ContextElementType, ExecutionContext};
use crate::dispatch::{ResponseData, TaskDispatchFacade};
use crate::error::{FieldErrors, StateError, StateResult};
use crate::logging::log_analysis_operation;
use crate::step::{ExecutionResponse, StateExecutionData, StepType};
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{instrument, warn};
use uuid::Uuid;

pub const NO_NEW_INSTANCES_MESSAGE: &str =
    "Could not find newly deployed instances. Skipping verification";
pub const SUMMARY_NOT_SAVED_MESSAGE: &str =
    "Analysis summary could not be found, failed to save in DB";

/// User-facing knobs shared by log and metric verification
#[derive(Debug, Clone, PartialEq)]
pub struct AnalysisSettings {
    pub comparison_strategy: ComparisonStrategy,
    pub time_duration_minutes: u32,
    pub tolerance: AnalysisTolerance,
    pub hostname_template: Option<String>,
    pub include_previous_phase_nodes: bool,
    pub sample_control_nodes: bool,
    pub new_nodes_traffic_shift_percent: Option<u32>,
}

impl AnalysisSettings {
    pub fn new(
        comparison_strategy: ComparisonStrategy,
        time_duration_minutes: u32,
        tolerance: AnalysisTolerance,
    ) -> Self {
        Self {
            comparison_strategy,
            time_duration_minutes,
            tolerance,
            hostname_template: None,
            include_previous_phase_nodes: false,
            sample_control_nodes: false,
            new_nodes_traffic_shift_percent: None,
        }
    }

    pub fn with_hostname_template(mut self, template: impl Into<String>) -> Self {
        self.hostname_template = Some(template.into());
        self
    }

    pub fn including_previous_phase_nodes(mut self) -> Self {
        self.include_previous_phase_nodes = true;
        self
    }

    pub fn sampling_control_nodes(mut self) -> Self {
        self.sample_control_nodes = true;
        self
    }

    pub fn with_traffic_shift(mut self, percent: u32) -> Self {
        self.new_nodes_traffic_shift_percent = Some(percent);
        self
    }

    pub fn validate(&self, config: &AnalysisConfig) -> FieldErrors {
        let mut errors = FieldErrors::new();
        if self.time_duration_minutes == 0
            || self.time_duration_minutes > config.max_time_duration_minutes
        {
            errors.insert(
                "timeDuration".to_string(),
                format!(
                    "Time duration should be between 1 and {} minutes",
                    config.max_time_duration_minutes
                ),
            );
        }
        if let Some(percent) = self.new_nodes_traffic_shift_percent {
            if percent > 100 {
                errors.insert(
                    "newInstanceTrafficShiftPercent".to_string(),
                    "Traffic shift percent should be between 0 and 100".to_string(),
                );
            }
        }
        errors
    }

    /// Instance lifetime: the window, but never less than the configured padding
    pub fn timeout_millis(&self, config: &AnalysisConfig) -> u64 {
        u64::from(self.time_duration_minutes.max(config.timeout_buffer_minutes)) * 60 * 1000
    }
}

/// Collaborators of the orchestrator
#[derive(Clone)]
pub struct AnalysisServices {
    pub dispatcher: Arc<dyn TaskDispatchFacade>,
    pub activities: Arc<dyn ActivityLog>,
    pub flags: Arc<dyn FeatureFlags>,
    pub summaries: Arc<dyn AnalysisSummaryStore>,
    pub contexts: Arc<dyn AnalysisContextStore>,
    pub baseline: Arc<dyn BaselineResolver>,
    pub instances: Arc<dyn InstanceSource>,
    pub metadata: Arc<dyn VerificationMetadataRecorder>,
    pub clock: Arc<dyn Clock>,
    pub sleeper: Arc<dyn Sleeper>,
    pub config: Arc<StatesConfig>,
}

pub struct AnalysisOrchestrator {
    services: AnalysisServices,
    poller: SummaryPoller,
}

impl std::fmt::Debug for AnalysisOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AnalysisOrchestrator")
            .field("poller", &self.poller)
            .finish_non_exhaustive()
    }
}

fn analysis_data(context: &dyn ExecutionContext) -> StateResult<AnalysisExecutionData> {
    match context.state_execution_data() {
        Some(StateExecutionData::Analysis(data)) => Ok(data),
        _ => Err(StateError::Internal(
            "analysis resumed without execution data".to_string(),
        )),
    }
}

fn step_type_for(analysis_type: AnalysisType) -> StepType {
    match analysis_type {
        AnalysisType::Log => StepType::LogAnalysis,
        AnalysisType::Metric => StepType::MetricAnalysis,
    }
}

impl AnalysisOrchestrator {
    pub fn new(services: AnalysisServices) -> Self {
        let analysis = &services.config.analysis;
        let poller = SummaryPoller::new(
            analysis.summary_fetch_attempts,
            analysis.summary_fetch_backoff(),
            Arc::clone(&services.sleeper),
        );
        Self { services, poller }
    }

    pub fn config(&self) -> &AnalysisConfig {
        &self.services.config.analysis
    }

    fn is_qa_verification(&self, context: &dyn ExecutionContext) -> bool {
        let flags = &self.services.flags;
        flags.is_enabled(FeatureName::QaVerificationOverride, context.account_id())
            || flags.is_enabled(FeatureName::QaVerificationOverride, context.app_id())
    }

    /// Select nodes, build the collection tasks and submit them
    #[instrument(skip_all, fields(instance_id = %context.state_execution_instance_id(), provider = %collector.state_type()))]
    pub async fn trigger(
        &self,
        context: &dyn ExecutionContext,
        step_name: &str,
        settings: &AnalysisSettings,
        collector: &dyn DataCollector,
    ) -> StateResult<ExecutionResponse> {
        let phase = context
            .phase_element()
            .ok_or_else(|| StateError::missing_element(ContextElementType::Phase))?;
        let config = self.config();
        let instance_id = context.state_execution_instance_id().to_string();
        let analysis_type = collector.analysis_type();

        let options = NodeSelectionOptions {
            hostname_template: settings.hostname_template.clone(),
            include_previous_phase_nodes: settings.include_previous_phase_nodes,
            sample_control_nodes: settings.sample_control_nodes,
            max_sampling_size_per_group: config.max_sampling_size_per_group,
            new_nodes_traffic_shift_percent: settings.new_nodes_traffic_shift_percent,
        };

        let deployed = if settings.comparison_strategy == ComparisonStrategy::CompareWithPrevious {
            Vec::new()
        } else {
            self.services
                .instances
                .deployed_instances(context.app_id(), &phase.service_id, &phase.infra_mapping_id)
                .await?
        };
        let selection = {
            let mut rng = rand::rng();
            control_and_test_nodes(
                context,
                &phase,
                settings.comparison_strategy,
                &options,
                &deployed,
                &mut rng,
            )
        };

        if selection.test.is_empty() {
            log_analysis_operation(
                events::ANALYSIS_SKIPPED,
                &instance_id,
                &analysis_type.to_string(),
                ExecutionStatus::Success.as_str(),
                Some(NO_NEW_INSTANCES_MESSAGE),
            );
            return Ok(ExecutionResponse::success().with_message(NO_NEW_INSTANCES_MESSAGE));
        }

        let baseline = if settings.comparison_strategy == ComparisonStrategy::CompareWithPrevious {
            last_execution_nodes(
                self.services.baseline.as_ref(),
                context,
                &phase,
                settings.hostname_template.as_deref(),
            )
            .await?
        } else {
            BaselineNodes::default()
        };

        let window = CollectionWindow::starting_now(self.services.clock.as_ref(), settings.time_duration_minutes);
        let per_minute_collection = collector.supports_v2_data_collection()
            && is_eligible_for_per_minute_task(
                settings.comparison_strategy,
                collector.state_type(),
                context.account_id(),
                self.services.flags.as_ref(),
                config,
            );

        let analysis = AnalysisContext {
            correlation_id: Uuid::new_v4().to_string(),
            account_id: context.account_id().to_string(),
            app_id: context.app_id().to_string(),
            env_id: context.env_id().map(str::to_string),
            workflow_id: context.workflow_id().to_string(),
            workflow_execution_id: context.workflow_execution_id().to_string(),
            state_execution_id: instance_id.clone(),
            service_id: phase.service_id.clone(),
            phase_name: phase.phase_name.clone(),
            state_type: collector.state_type().to_string(),
            analysis_type,
            comparison_strategy: settings.comparison_strategy,
            tolerance: settings.tolerance,
            control_nodes: selection.control.clone(),
            test_nodes: selection.test.clone(),
            last_execution_nodes: baseline.nodes,
            time_duration_minutes: window.duration_minutes,
            start_data_collection_minute: window.start_minute,
            prev_workflow_execution_id: baseline.execution_id,
            per_minute_collection,
            new_nodes_traffic_shift_percent: selection.new_nodes_traffic_shift_percent,
            created_at: Utc::now(),
        };

        let task_timeout_ms = settings.timeout_millis(config);
        let descriptors: Vec<_> = collector
            .collection_tasks(context, &analysis, config)
            .await?
            .into_iter()
            .map(|descriptor| {
                descriptor
                    .with_env_id(context.env_id().map(str::to_string))
                    .with_timeout_ms(task_timeout_ms)
            })
            .collect();
        if descriptors.is_empty() {
            return Err(StateError::InvalidRequest(format!(
                "No data collection tasks could be created for {}",
                collector.state_type()
            )));
        }

        let activity_id = self
            .services
            .activities
            .create(Activity::for_step(
                context,
                step_name,
                step_type_for(analysis_type).as_str(),
            ))
            .await?;

        self.services.contexts.save_context(analysis.clone()).await?;

        let data = AnalysisExecutionData {
            activity_id,
            correlation_id: analysis.correlation_id.clone(),
            analysis_type,
            state_type: analysis.state_type.clone(),
            comparison_strategy: analysis.comparison_strategy,
            tolerance: analysis.tolerance,
            analysis_minute: analysis.start_data_collection_minute,
            time_duration_minutes: analysis.time_duration_minutes,
            control_nodes: analysis.control_nodes.clone(),
            test_nodes: analysis.test_nodes.clone(),
            last_execution_nodes: analysis.last_execution_nodes.clone(),
            baseline_execution_id: analysis.prev_workflow_execution_id.clone(),
            wait_ids: descriptors.iter().map(|d| d.wait_id.clone()).collect(),
            message: baseline.message,
        };
        context.save_state_execution_data(StateExecutionData::Analysis(data.clone()));

        record_best_effort(
            self.services.metadata.as_ref(),
            VerificationMetadata {
                account_id: analysis.account_id.clone(),
                app_id: analysis.app_id.clone(),
                workflow_id: analysis.workflow_id.clone(),
                workflow_execution_id: analysis.workflow_execution_id.clone(),
                state_execution_id: instance_id.clone(),
                state_type: analysis.state_type.clone(),
                service_id: analysis.service_id.clone(),
                phase_name: analysis.phase_name.clone(),
                artifact_name: context
                    .context_element(ContextElementType::Artifact)
                    .and_then(|e| match e {
                        ContextElement::Artifact(artifact) => Some(artifact.name),
                        _ => None,
                    }),
                started_at: analysis.created_at,
            },
        )
        .await;

        let mut wait_ids = Vec::with_capacity(descriptors.len());
        for descriptor in descriptors {
            wait_ids.push(self.services.dispatcher.submit(descriptor).await?);
        }

        log_analysis_operation(
            events::ANALYSIS_TRIGGERED,
            &instance_id,
            &analysis_type.to_string(),
            ExecutionStatus::Running.as_str(),
            Some(&format!(
                "{} test, {} control, {} tasks, per_minute={}",
                analysis.test_nodes.len(),
                analysis.control_nodes.len(),
                wait_ids.len(),
                per_minute_collection
            )),
        );

        let mut response = ExecutionResponse::suspended(wait_ids);
        if let Some(message) = &data.message {
            response = response.with_message(message.clone());
        }
        Ok(response.with_state_data(StateExecutionData::Analysis(data)))
    }

    /// Classify the verification once every collection task has reported
    #[instrument(skip_all, fields(instance_id = %context.state_execution_instance_id()))]
    pub async fn resume(
        &self,
        context: &dyn ExecutionContext,
        responses: &HashMap<String, ResponseData>,
    ) -> StateResult<ExecutionResponse> {
        let mut data = analysis_data(context)?;
        let instance_id = context.state_execution_instance_id();

        if let Some(failed) = responses
            .values()
            .find(|r| r.status() != ExecutionStatus::Success)
        {
            let message = failed
                .error_message()
                .unwrap_or("Data collection failed")
                .to_string();
            self.finish_activity(&data.activity_id, ExecutionStatus::Failed).await;
            data.message = Some(message.clone());
            return Ok(ExecutionResponse::failed(message)
                .with_state_data(StateExecutionData::Analysis(data)));
        }

        let summary = self
            .poller
            .poll(
                self.services.summaries.as_ref(),
                context.app_id(),
                instance_id,
                data.analysis_type,
            )
            .await?;

        let (status, message) = if self.is_qa_verification(context) {
            (qa_override(summary.as_ref()), Some("QA verification override applied".to_string()))
        } else {
            match &summary {
                None => (ExecutionStatus::Error, Some(SUMMARY_NOT_SAVED_MESSAGE.to_string())),
                Some(summary) => match summary.risk_level {
                    None => (
                        ExecutionStatus::Success,
                        Some(
                            summary
                                .message
                                .clone()
                                .unwrap_or_else(|| "No data found for verification".to_string()),
                        ),
                    ),
                    Some(risk) => (verdict(risk, data.tolerance), summary.message.clone()),
                },
            }
        };

        self.finish_activity(&data.activity_id, status).await;
        log_analysis_operation(
            events::ANALYSIS_VERDICT,
            instance_id,
            &data.analysis_type.to_string(),
            status.as_str(),
            message.as_deref(),
        );

        // a broken verdict reports its own cause
        let message = match (data.message.take(), message) {
            (Some(_), Some(verdict)) if status.is_broken() => Some(verdict),
            (Some(baseline), Some(verdict)) => Some(format!("{baseline}. {verdict}")),
            (baseline, verdict) => verdict.or(baseline),
        };
        data.message = message.clone();
        let mut response =
            ExecutionResponse::completed(status).with_state_data(StateExecutionData::Analysis(data));
        if let Some(message) = message {
            response = response.with_message(message);
        }
        Ok(response)
    }

    /// Mark the activity ABORTED and make sure a summary exists
    pub async fn abort(
        &self,
        context: &dyn ExecutionContext,
        analysis_type: AnalysisType,
    ) -> StateResult<()> {
        let instance_id = context.state_execution_instance_id();
        if let Ok(data) = analysis_data(context) {
            self.finish_activity(&data.activity_id, ExecutionStatus::Aborted).await;
        }

        let existing = self
            .services
            .summaries
            .latest_summary(context.app_id(), instance_id, analysis_type)
            .await?;
        if existing.is_none() {
            self.services
                .summaries
                .save_summary(AnalysisSummary::aborted(context.app_id(), instance_id, analysis_type))
                .await?;
        }

        log_analysis_operation(
            events::ANALYSIS_ABORTED,
            instance_id,
            &analysis_type.to_string(),
            ExecutionStatus::Aborted.as_str(),
            None,
        );
        Ok(())
    }

    async fn finish_activity(&self, activity_id: &str, status: ExecutionStatus) {
        if let Err(e) = self.services.activities.update_status(activity_id, status).await {
            warn!(activity_id = %activity_id, error = %e, "Failed to update activity status");
        }
    }
}
