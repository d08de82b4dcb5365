//! AppDynamics metric collection, one task per monitored tier.

use super::{is_templatized, resolve_field, with_envelope, TemplateExpression};
use crate::analysis::collection::DataCollector;
use crate::analysis::types::{AnalysisContext, AnalysisType};
use crate::config::AnalysisConfig;
use crate::context::{expression, ExecutionContext};
use crate::dispatch::{TaskDescriptor, TaskType};
use crate::error::{FieldErrors, StateError, StateResult};
use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::json;
use std::sync::Arc;

pub const STATE_TYPE: &str = "APP_DYNAMICS";

const CONNECTOR_FIELD: &str = "analysisServerConfigId";
const APPLICATION_FIELD: &str = "applicationId";
const TIER_FIELD: &str = "tierId";

/// Controller lookups needed to turn names into ids
#[async_trait]
pub trait AppDynamicsCatalog: Send + Sync {
    async fn application_id_by_name(
        &self,
        connector_id: &str,
        application_name: &str,
    ) -> StateResult<Option<String>>;

    async fn tier_id_by_name(
        &self,
        connector_id: &str,
        application_id: &str,
        tier_name: &str,
    ) -> StateResult<Option<String>>;

    /// Tiers the given tier calls into
    async fn dependent_tiers(
        &self,
        connector_id: &str,
        application_id: &str,
        tier_id: &str,
    ) -> StateResult<Vec<String>>;
}

pub struct AppDynamicsCollector {
    analysis_server_config_id: String,
    application_id: String,
    tier_id: String,
    template_expressions: Vec<TemplateExpression>,
    include_dependent_tiers: bool,
    catalog: Arc<dyn AppDynamicsCatalog>,
}

impl std::fmt::Debug for AppDynamicsCollector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppDynamicsCollector")
            .field("analysis_server_config_id", &self.analysis_server_config_id)
            .field("application_id", &self.application_id)
            .field("tier_id", &self.tier_id)
            .field("template_expressions", &self.template_expressions)
            .field("include_dependent_tiers", &self.include_dependent_tiers)
            .finish()
    }
}

fn is_numeric_id(value: &str) -> bool {
    !value.is_empty() && value.chars().all(|c| c.is_ascii_digit())
}

impl AppDynamicsCollector {
    pub fn new(
        analysis_server_config_id: impl Into<String>,
        application_id: impl Into<String>,
        tier_id: impl Into<String>,
        catalog: Arc<dyn AppDynamicsCatalog>,
    ) -> Self {
        Self {
            analysis_server_config_id: analysis_server_config_id.into(),
            application_id: application_id.into(),
            tier_id: tier_id.into(),
            template_expressions: Vec::new(),
            include_dependent_tiers: false,
            catalog,
        }
    }

    pub fn with_template_expressions(mut self, templates: Vec<TemplateExpression>) -> Self {
        self.template_expressions = templates;
        self
    }

    pub fn with_dependent_tiers(mut self) -> Self {
        self.include_dependent_tiers = true;
        self
    }

    async fn resolve_application(&self, context: &dyn ExecutionContext, connector_id: &str) -> StateResult<String> {
        let rendered = resolve_field(context, &self.template_expressions, APPLICATION_FIELD, &self.application_id)?;
        if is_numeric_id(&rendered) {
            return Ok(rendered);
        }
        self.catalog
            .application_id_by_name(connector_id, &rendered)
            .await?
            .ok_or_else(|| {
                StateError::InvalidRequest(format!(
                    "Not able to resolve application ID for application name {rendered}. Please check your expression or application name"
                ))
            })
    }

    async fn resolve_tier(
        &self,
        context: &dyn ExecutionContext,
        connector_id: &str,
        application_id: &str,
    ) -> StateResult<String> {
        let rendered = resolve_field(context, &self.template_expressions, TIER_FIELD, &self.tier_id)?;
        if is_numeric_id(&rendered) {
            return Ok(rendered);
        }
        self.catalog
            .tier_id_by_name(connector_id, application_id, &rendered)
            .await?
            .ok_or_else(|| {
                StateError::InvalidRequest(format!(
                    "Not able to resolve tier ID for tier name {rendered}. Please check your expression or tier name"
                ))
            })
    }
}

#[async_trait]
impl DataCollector for AppDynamicsCollector {
    fn state_type(&self) -> &str {
        STATE_TYPE
    }

    fn analysis_type(&self) -> AnalysisType {
        AnalysisType::Metric
    }

    fn supports_v2_data_collection(&self) -> bool {
        true
    }

    fn validate_fields(&self) -> FieldErrors {
        let templates = &self.template_expressions;
        let connector_templatized = is_templatized(templates, CONNECTOR_FIELD);
        let application_templatized = is_templatized(templates, APPLICATION_FIELD);
        let tier_templatized = is_templatized(templates, TIER_FIELD);

        let mut errors = FieldErrors::new();
        let missing = |value: &str, templatized: bool| value.trim().is_empty() && !templatized;
        if missing(&self.analysis_server_config_id, connector_templatized)
            || missing(&self.application_id, application_templatized)
            || missing(&self.tier_id, tier_templatized)
        {
            errors.insert(
                "Required Fields missing".to_string(),
                "Connector, Application and tier should be provided".to_string(),
            );
            return errors;
        }

        let application_expression = expression::is_expression(&self.application_id);
        let tier_expression = expression::is_expression(&self.tier_id);

        if connector_templatized && !application_templatized && !application_expression {
            errors.insert(
                "Invalid templatization for application".to_string(),
                "If connector is templatized then application should be either templatized or should be an expression"
                    .to_string(),
            );
        }
        if application_templatized && !tier_templatized && !tier_expression {
            errors.insert(
                "Invalid templatization for tier".to_string(),
                "If application is templatized then tier should be either templatized or should be an expression"
                    .to_string(),
            );
        }
        if !application_templatized && application_expression && !tier_expression {
            errors.insert(
                "Invalid expression for tier".to_string(),
                "If application is an expression then tier should be an expression as well".to_string(),
            );
        }
        errors
    }

    async fn collection_tasks(
        &self,
        context: &dyn ExecutionContext,
        analysis: &AnalysisContext,
        _config: &AnalysisConfig,
    ) -> StateResult<Vec<TaskDescriptor>> {
        let connector_id = resolve_field(
            context,
            &self.template_expressions,
            CONNECTOR_FIELD,
            &self.analysis_server_config_id,
        )?;
        let application_id = self.resolve_application(context, &connector_id).await?;
        let tier_id = self.resolve_tier(context, &connector_id, &application_id).await?;

        let mut tiers = vec![tier_id.clone()];
        if self.include_dependent_tiers {
            for dependent in self
                .catalog
                .dependent_tiers(&connector_id, &application_id, &tier_id)
                .await?
            {
                if !tiers.contains(&dependent) {
                    tiers.push(dependent);
                }
            }
        }

        let hosts = analysis.collection_hosts();
        Ok(tiers
            .into_iter()
            .map(|tier| {
                TaskDescriptor::new(
                    TaskType::MetricDataCollection,
                    &analysis.account_id,
                    &analysis.app_id,
                    with_envelope(
                        analysis,
                        json!({
                            "connectorId": connector_id,
                            "applicationId": application_id,
                            "tierId": tier,
                            "hosts": hosts,
                        }),
                    ),
                )
                .with_description(format!("AppDynamics collection for tier {tier}"))
            })
            .collect())
    }
}

/// Catalog backed by maps, keyed by connector-independent names
#[derive(Debug, Default)]
pub struct InMemoryAppDynamicsCatalog {
    applications: DashMap<String, String>,
    /// (application_id, tier_name) -> tier_id
    tiers: DashMap<(String, String), String>,
    dependents: DashMap<String, Vec<String>>,
}

impl InMemoryAppDynamicsCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_application(&self, name: &str, id: &str) {
        self.applications.insert(name.to_string(), id.to_string());
    }

    pub fn add_tier(&self, application_id: &str, name: &str, id: &str) {
        self.tiers
            .insert((application_id.to_string(), name.to_string()), id.to_string());
    }

    pub fn add_dependent_tiers(&self, tier_id: &str, dependents: Vec<String>) {
        self.dependents.insert(tier_id.to_string(), dependents);
    }
}

#[async_trait]
impl AppDynamicsCatalog for InMemoryAppDynamicsCatalog {
    async fn application_id_by_name(
        &self,
        _connector_id: &str,
        application_name: &str,
    ) -> StateResult<Option<String>> {
        Ok(self.applications.get(application_name).map(|id| id.clone()))
    }

    async fn tier_id_by_name(
        &self,
        _connector_id: &str,
        application_id: &str,
        tier_name: &str,
    ) -> StateResult<Option<String>> {
        Ok(self
            .tiers
            .get(&(application_id.to_string(), tier_name.to_string()))
            .map(|id| id.clone()))
    }

    async fn dependent_tiers(
        &self,
        _connector_id: &str,
        _application_id: &str,
        tier_id: &str,
    ) -> StateResult<Vec<String>> {
        Ok(self
            .dependents
            .get(tier_id)
            .map(|d| d.clone())
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::test_support::analysis_context;
    use crate::context::StateExecutionContext;

    fn collector(connector: &str, app: &str, tier: &str) -> AppDynamicsCollector {
        AppDynamicsCollector::new(connector, app, tier, Arc::new(InMemoryAppDynamicsCatalog::new()))
    }

    fn only_error(errors: &FieldErrors) -> (&str, &str) {
        assert_eq!(errors.len(), 1, "{errors:?}");
        let (k, v) = errors.iter().next().unwrap();
        (k.as_str(), v.as_str())
    }

    #[test]
    fn test_required_fields() {
        let errors = collector("", "", "test12").validate_fields();
        assert_eq!(
            only_error(&errors),
            ("Required Fields missing", "Connector, Application and tier should be provided")
        );
        assert!(collector("conn", "123", "456").validate_fields().is_empty());
    }

    #[test]
    fn test_only_connector_templatized() {
        let c = collector("${AppDynamics_Server}", "123", "456").with_template_expressions(vec![
            TemplateExpression::new(CONNECTOR_FIELD, "${AppDynamics_Server}"),
        ]);
        assert_eq!(only_error(&c.validate_fields()).0, "Invalid templatization for application");
    }

    #[test]
    fn test_connector_and_application_templatized() {
        let c = collector("${AppDynamics_Server}", "123", "456").with_template_expressions(vec![
            TemplateExpression::new(CONNECTOR_FIELD, "${AppDynamics_Server}"),
            TemplateExpression::new(APPLICATION_FIELD, "${AppDynamics_App}"),
        ]);
        assert_eq!(
            only_error(&c.validate_fields()),
            (
                "Invalid templatization for tier",
                "If application is templatized then tier should be either templatized or should be an expression"
            )
        );
    }

    #[test]
    fn test_all_templatized() {
        let c = collector("", "", "").with_template_expressions(vec![
            TemplateExpression::new(CONNECTOR_FIELD, "${AppDynamics_Server}"),
            TemplateExpression::new(APPLICATION_FIELD, "${AppDynamics_App}"),
            TemplateExpression::new(TIER_FIELD, "${AppDynamics_Tier}"),
        ]);
        assert!(c.validate_fields().is_empty());
    }

    #[test]
    fn test_application_expression_requires_tier_expression() {
        let c = collector("${AppDynamics_Server}", "${app.name}", "").with_template_expressions(vec![
            TemplateExpression::new(CONNECTOR_FIELD, "${AppDynamics_Server}"),
            TemplateExpression::new(TIER_FIELD, "${AppDynamics_Tier}"),
        ]);
        assert_eq!(only_error(&c.validate_fields()).0, "Invalid expression for tier");

        let c = collector("${AppDynamics_Server}", "${app.name}", "${service.name}").with_template_expressions(vec![
            TemplateExpression::new(CONNECTOR_FIELD, "${AppDynamics_Server}"),
        ]);
        assert!(c.validate_fields().is_empty());
    }

    #[tokio::test]
    async fn test_unknown_tier_name() {
        let ctx = StateExecutionContext::builder().build();
        let err = collector("conn", "123", "123aa")
            .collection_tasks(&ctx, &analysis_context(1, 0), &AnalysisConfig::default())
            .await
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "Not able to resolve tier ID for tier name 123aa. Please check your expression or tier name"
        );
    }

    #[tokio::test]
    async fn test_one_task_per_tier_including_dependents() {
        let catalog = Arc::new(InMemoryAppDynamicsCatalog::new());
        catalog.add_tier("123", "checkout", "456");
        catalog.add_dependent_tiers("456", vec!["457".to_string(), "456".to_string(), "458".to_string()]);
        let ctx = StateExecutionContext::builder()
            .workflow_variable("appd_tier_name", json!("checkout"))
            .build();

        let c = AppDynamicsCollector::new("conn", "123", "", catalog)
            .with_template_expressions(vec![TemplateExpression::new(TIER_FIELD, "${appd_tier_name}")])
            .with_dependent_tiers();
        let tasks = c
            .collection_tasks(&ctx, &analysis_context(2, 0), &AnalysisConfig::default())
            .await
            .unwrap();

        let tiers: Vec<&str> = tasks.iter().map(|t| t.payload["tierId"].as_str().unwrap()).collect();
        assert_eq!(tiers, vec!["456", "457", "458"]);
        assert!(tasks.iter().all(|t| t.task_type == TaskType::MetricDataCollection));
    }
}
