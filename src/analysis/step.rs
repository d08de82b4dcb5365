//! Log and metric verification steps.

use super::collection::DataCollector;
use super::orchestrator::{AnalysisOrchestrator, AnalysisSettings};
use super::types::AnalysisType;
use crate::context::ExecutionContext;
use crate::dispatch::ResponseData;
use crate::error::{FieldErrors, StateResult};
use crate::step::{ExecutionResponse, Step, StepType};
use async_trait::async_trait;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// A verification step: shared orchestration plus one provider collector
///
/// The step is a log or metric analysis depending on what its collector
/// collects.
pub struct AnalysisStep {
    name: String,
    settings: AnalysisSettings,
    collector: Arc<dyn DataCollector>,
    orchestrator: Arc<AnalysisOrchestrator>,
}

impl AnalysisStep {
    pub fn new(
        name: impl Into<String>,
        settings: AnalysisSettings,
        collector: Arc<dyn DataCollector>,
        orchestrator: Arc<AnalysisOrchestrator>,
    ) -> Self {
        Self {
            name: name.into(),
            settings,
            collector,
            orchestrator,
        }
    }

    pub fn analysis_type(&self) -> AnalysisType {
        self.collector.analysis_type()
    }

    pub fn settings(&self) -> &AnalysisSettings {
        &self.settings
    }
}

impl fmt::Debug for AnalysisStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AnalysisStep")
            .field("name", &self.name)
            .field("provider", &self.collector.state_type())
            .field("settings", &self.settings)
            .finish()
    }
}

#[async_trait]
impl Step for AnalysisStep {
    fn name(&self) -> &str {
        &self.name
    }

    fn step_type(&self) -> StepType {
        match self.analysis_type() {
            AnalysisType::Log => StepType::LogAnalysis,
            AnalysisType::Metric => StepType::MetricAnalysis,
        }
    }

    fn validate_fields(&self) -> FieldErrors {
        let mut errors = self.settings.validate(self.orchestrator.config());
        errors.extend(self.collector.validate_fields());
        errors
    }

    fn timeout_millis(&self) -> Option<u64> {
        Some(self.settings.timeout_millis(self.orchestrator.config()))
    }

    async fn execute(&self, context: &dyn ExecutionContext) -> StateResult<ExecutionResponse> {
        self.orchestrator
            .trigger(context, &self.name, &self.settings, self.collector.as_ref())
            .await
    }

    async fn handle_async_response(
        &self,
        context: &dyn ExecutionContext,
        responses: &HashMap<String, ResponseData>,
    ) -> StateResult<ExecutionResponse> {
        self.orchestrator.resume(context, responses).await
    }

    async fn handle_abort(&self, context: &dyn ExecutionContext) -> StateResult<()> {
        self.orchestrator.abort(context, self.analysis_type()).await
    }
}
