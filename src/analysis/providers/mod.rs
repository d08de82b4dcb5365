//! Provider collectors: log search, AppDynamics and CloudWatch.

pub mod app_dynamics;
pub mod cloud_watch;
pub mod log;

use crate::context::{expression, ExecutionContext};
use crate::error::StateResult;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

pub use app_dynamics::{AppDynamicsCatalog, AppDynamicsCollector, InMemoryAppDynamicsCatalog};
pub use cloud_watch::CloudWatchCollector;
pub use log::LogCollector;

use super::types::AnalysisContext;

/// A field bound to a workflow variable instead of a fixed value
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TemplateExpression {
    pub field_name: String,
    /// Variable reference such as `${AppDynamics_Server}`
    pub expression: String,
}

impl TemplateExpression {
    pub fn new(field_name: impl Into<String>, expression: impl Into<String>) -> Self {
        Self {
            field_name: field_name.into(),
            expression: expression.into(),
        }
    }

    /// Workflow variable name behind the expression
    pub fn variable_name(&self) -> &str {
        self.expression
            .trim()
            .trim_start_matches("${")
            .trim_end_matches('}')
            .trim()
    }
}

pub(crate) fn is_templatized(templates: &[TemplateExpression], field: &str) -> bool {
    templates.iter().any(|t| t.field_name == field)
}

/// Value of a field after template and expression rendering
pub(crate) fn resolve_field(
    context: &dyn ExecutionContext,
    templates: &[TemplateExpression],
    field: &str,
    value: &str,
) -> StateResult<String> {
    match templates.iter().find(|t| t.field_name == field) {
        Some(template) => {
            context.render_required(&expression::workflow_variable(template.variable_name()))
        }
        None => context.render_required(value),
    }
}

/// Payload fields every collection task carries
pub(crate) fn collection_envelope(analysis: &AnalysisContext) -> Value {
    json!({
        "correlationId": analysis.correlation_id,
        "stateExecutionId": analysis.state_execution_id,
        "stateType": analysis.state_type,
        "serviceId": analysis.service_id,
        "comparisonStrategy": analysis.comparison_strategy,
        "startDataCollectionMinute": analysis.start_data_collection_minute,
        "timeDurationMinutes": analysis.time_duration_minutes,
        "perMinuteCollection": analysis.per_minute_collection,
    })
}

/// Merge provider fields into the shared envelope
pub(crate) fn with_envelope(analysis: &AnalysisContext, fields: Value) -> Value {
    let mut payload = collection_envelope(analysis);
    if let (Some(target), Value::Object(extra)) = (payload.as_object_mut(), fields) {
        target.extend(extra);
    }
    payload
}
