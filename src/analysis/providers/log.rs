use super::{resolve_field, with_envelope, TemplateExpression};
use crate::analysis::collection::DataCollector;
use crate::analysis::types::{AnalysisContext, AnalysisType};
use crate::config::AnalysisConfig;
use crate::context::ExecutionContext;
use crate::dispatch::{TaskDescriptor, TaskType};
use crate::error::{FieldErrors, StateResult};
use async_trait::async_trait;
use serde_json::json;

/// Log search collector (ELK, Sumo Logic, Splunk, ...)
///
/// Hosts are collected in batches so one slow host does not hold the whole
/// window; every batch is its own task.
#[derive(Debug, Clone)]
pub struct LogCollector {
    state_type: String,
    analysis_server_config_id: String,
    query: String,
    hostname_field: String,
    template_expressions: Vec<TemplateExpression>,
}

impl LogCollector {
    pub fn new(
        state_type: impl Into<String>,
        analysis_server_config_id: impl Into<String>,
        query: impl Into<String>,
    ) -> Self {
        Self {
            state_type: state_type.into(),
            analysis_server_config_id: analysis_server_config_id.into(),
            query: query.into(),
            hostname_field: "hostname".to_string(),
            template_expressions: Vec::new(),
        }
    }

    pub fn with_hostname_field(mut self, field: impl Into<String>) -> Self {
        self.hostname_field = field.into();
        self
    }

    pub fn with_template_expressions(mut self, templates: Vec<TemplateExpression>) -> Self {
        self.template_expressions = templates;
        self
    }
}

#[async_trait]
impl DataCollector for LogCollector {
    fn state_type(&self) -> &str {
        &self.state_type
    }

    fn analysis_type(&self) -> AnalysisType {
        AnalysisType::Log
    }

    fn supports_v2_data_collection(&self) -> bool {
        true
    }

    fn validate_fields(&self) -> FieldErrors {
        let mut errors = FieldErrors::new();
        if self.query.trim().is_empty() {
            errors.insert("query".to_string(), "Search query should be provided".to_string());
        }
        if self.analysis_server_config_id.trim().is_empty()
            && !super::is_templatized(&self.template_expressions, "analysisServerConfigId")
        {
            errors.insert(
                "analysisServerConfigId".to_string(),
                "Log server connector should be provided".to_string(),
            );
        }
        errors
    }

    async fn collection_tasks(
        &self,
        context: &dyn ExecutionContext,
        analysis: &AnalysisContext,
        config: &AnalysisConfig,
    ) -> StateResult<Vec<TaskDescriptor>> {
        let server_config_id = resolve_field(
            context,
            &self.template_expressions,
            "analysisServerConfigId",
            &self.analysis_server_config_id,
        )?;
        let query = resolve_field(context, &self.template_expressions, "query", &self.query)?;

        let hosts = analysis.collection_hosts();
        let tasks = hosts
            .chunks(config.log_host_batch_size.max(1))
            .enumerate()
            .map(|(batch, hosts)| {
                TaskDescriptor::new(
                    TaskType::LogDataCollection,
                    &analysis.account_id,
                    &analysis.app_id,
                    with_envelope(
                        analysis,
                        json!({
                            "serverConfigId": server_config_id,
                            "query": query,
                            "hostnameField": self.hostname_field,
                            "hosts": hosts,
                        }),
                    ),
                )
                .with_description(format!("{} log collection batch {}", self.state_type, batch + 1))
            })
            .collect();
        Ok(tasks)
    }
}
