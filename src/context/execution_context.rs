use super::elements::{
    ContextElement, ContextElementType, InfraMappingElement, InstanceElement, PhaseElement,
    ServiceElement,
};
use super::expression;
use crate::error::{StateError, StateResult};
use crate::step::StateExecutionData;
use parking_lot::RwLock;
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;

/// Read-mostly facade over the workflow a step executes in
pub trait ExecutionContext: Send + Sync {
    /// Most recently pushed element of a type
    fn context_element(&self, element_type: ContextElementType) -> Option<ContextElement>;

    fn context_element_by_key(
        &self,
        element_type: ContextElementType,
        key: &str,
    ) -> Option<ContextElement>;

    /// Every element of a type, oldest first
    fn context_elements(&self, element_type: ContextElementType) -> Vec<ContextElement>;

    fn render_expression(&self, template: &str) -> String;

    /// Render with extra top-level scope entries (e.g. a synthetic `host`)
    fn render_expression_with(&self, template: &str, scoped: &Value) -> String;

    fn account_id(&self) -> &str;
    fn app_id(&self) -> &str;
    fn env_id(&self) -> Option<&str>;
    fn workflow_id(&self) -> &str;
    fn workflow_execution_id(&self) -> &str;
    fn state_execution_instance_id(&self) -> &str;

    fn service_variables(&self) -> BTreeMap<String, String>;

    /// Data recorded by this instance's `execute`, available on resume
    fn state_execution_data(&self) -> Option<StateExecutionData>;

    /// Persist resume data; steps call this before submitting remote work
    fn save_state_execution_data(&self, data: StateExecutionData);

    fn phase_element(&self) -> Option<PhaseElement> {
        self.context_element(ContextElementType::Phase)
            .and_then(|e| e.as_phase().cloned())
    }

    fn service_element(&self) -> Option<ServiceElement> {
        self.context_element(ContextElementType::Service)
            .and_then(|e| e.as_service().cloned())
    }

    fn infra_mapping_element(&self) -> Option<InfraMappingElement> {
        self.context_element(ContextElementType::InfraMapping)
            .and_then(|e| e.as_infra_mapping().cloned())
    }

    fn instance_elements(&self) -> Vec<InstanceElement> {
        let mut instances: Vec<InstanceElement> = self
            .context_elements(ContextElementType::Instance)
            .iter()
            .filter_map(|e| e.as_instance().cloned())
            .collect();
        for list in self.context_elements(ContextElementType::InstanceList) {
            if let Some(list) = list.as_instance_list() {
                instances.extend(list.instances.iter().cloned());
            }
        }
        instances
    }

    /// Render a field and fail if any expression is left unresolved
    fn render_required(&self, template: &str) -> StateResult<String> {
        let rendered = self.render_expression(template);
        match expression::find_unresolved(&rendered) {
            Some(unresolved) => Err(StateError::ExpressionNotResolved(unresolved)),
            None => Ok(rendered),
        }
    }
}

/// In-process [`ExecutionContext`] built by the workflow engine
#[derive(Debug)]
pub struct StateExecutionContext {
    account_id: String,
    app_id: String,
    env_id: Option<String>,
    workflow_id: String,
    workflow_execution_id: String,
    state_execution_instance_id: String,
    elements: Vec<ContextElement>,
    workflow_variables: BTreeMap<String, Value>,
    service_variables: BTreeMap<String, String>,
    state_execution_data: RwLock<Option<StateExecutionData>>,
}

impl StateExecutionContext {
    pub fn builder() -> StateExecutionContextBuilder {
        StateExecutionContextBuilder::default()
    }

    /// Context for a spawned child: same workflow, own instance id, parent
    /// elements plus `pushed` on top
    pub fn child(&self, instance_id: &str, pushed: Vec<ContextElement>) -> Self {
        let mut elements = self.elements.clone();
        elements.extend(pushed);
        Self {
            account_id: self.account_id.clone(),
            app_id: self.app_id.clone(),
            env_id: self.env_id.clone(),
            workflow_id: self.workflow_id.clone(),
            workflow_execution_id: self.workflow_execution_id.clone(),
            state_execution_instance_id: instance_id.to_string(),
            elements,
            workflow_variables: self.workflow_variables.clone(),
            service_variables: self.service_variables.clone(),
            state_execution_data: RwLock::new(None),
        }
    }

    pub fn elements(&self) -> &[ContextElement] {
        &self.elements
    }

    fn scope(&self) -> Value {
        let mut scope = Map::new();
        scope.insert(
            "workflow".to_string(),
            json!({
                "uuid": self.workflow_id,
                "executionId": self.workflow_execution_id,
                "variables": self.workflow_variables,
            }),
        );
        scope.insert(
            "app".to_string(),
            json!({"uuid": self.app_id, "accountId": self.account_id}),
        );
        scope.insert("env".to_string(), json!({"uuid": self.env_id}));
        scope.insert(
            "serviceVariable".to_string(),
            json!(self.service_variables),
        );

        if let Some(service) = self.service_element() {
            scope.insert(
                "service".to_string(),
                json!({"uuid": service.uuid, "name": service.name}),
            );
        } else if let Some(phase) = self.phase_element() {
            scope.insert(
                "service".to_string(),
                json!({"uuid": phase.service_id, "name": phase.service_name}),
            );
        }

        if let Some(infra) = self.infra_mapping_element() {
            scope.insert(
                "infra".to_string(),
                json!({
                    "uuid": infra.uuid,
                    "name": infra.name,
                    "cluster": infra.cluster_name,
                    "region": infra.region,
                }),
            );
        }

        if let Some(ContextElement::Instance(instance)) =
            self.context_element(ContextElementType::Instance)
        {
            scope.insert("host".to_string(), host_scope(&instance));
        }

        if let Some(ContextElement::Artifact(artifact)) =
            self.context_element(ContextElementType::Artifact)
        {
            scope.insert(
                "artifact".to_string(),
                json!({"name": artifact.name, "buildNo": artifact.build_no}),
            );
        }

        Value::Object(scope)
    }
}

/// Scope entry exposing an instance's host under the keys templates use
pub fn host_scope(instance: &InstanceElement) -> Value {
    let host = &instance.host;
    json!({
        "hostName": host.host_name,
        "ip": host.ip,
        "publicDns": host.public_dns,
        "ec2Instance": {"instanceId": host.ec2_instance_id},
        "podName": host.pod_name,
        "containerId": host.container_id,
        "pcfElement": {
            "applicationId": host.pcf_app_name,
            "instanceIndex": host.pcf_instance_index,
        },
    })
}

impl ExecutionContext for StateExecutionContext {
    fn context_element(&self, element_type: ContextElementType) -> Option<ContextElement> {
        self.elements
            .iter()
            .rev()
            .find(|e| e.element_type() == element_type)
            .cloned()
    }

    fn context_element_by_key(
        &self,
        element_type: ContextElementType,
        key: &str,
    ) -> Option<ContextElement> {
        self.elements
            .iter()
            .rev()
            .find(|e| e.element_type() == element_type && e.key() == key)
            .cloned()
    }

    fn context_elements(&self, element_type: ContextElementType) -> Vec<ContextElement> {
        self.elements
            .iter()
            .filter(|e| e.element_type() == element_type)
            .cloned()
            .collect()
    }

    fn render_expression(&self, template: &str) -> String {
        if !expression::is_expression(template) {
            return template.to_string();
        }
        expression::render(template, &self.scope())
    }

    fn render_expression_with(&self, template: &str, scoped: &Value) -> String {
        if !expression::is_expression(template) {
            return template.to_string();
        }
        expression::render(template, &expression::merge_scope(&self.scope(), scoped))
    }

    fn account_id(&self) -> &str {
        &self.account_id
    }

    fn app_id(&self) -> &str {
        &self.app_id
    }

    fn env_id(&self) -> Option<&str> {
        self.env_id.as_deref()
    }

    fn workflow_id(&self) -> &str {
        &self.workflow_id
    }

    fn workflow_execution_id(&self) -> &str {
        &self.workflow_execution_id
    }

    fn state_execution_instance_id(&self) -> &str {
        &self.state_execution_instance_id
    }

    fn service_variables(&self) -> BTreeMap<String, String> {
        self.service_variables.clone()
    }

    fn state_execution_data(&self) -> Option<StateExecutionData> {
        self.state_execution_data.read().clone()
    }

    fn save_state_execution_data(&self, data: StateExecutionData) {
        *self.state_execution_data.write() = Some(data);
    }
}

#[derive(Debug, Default)]
pub struct StateExecutionContextBuilder {
    account_id: String,
    app_id: String,
    env_id: Option<String>,
    workflow_id: String,
    workflow_execution_id: String,
    state_execution_instance_id: String,
    elements: Vec<ContextElement>,
    workflow_variables: BTreeMap<String, Value>,
    service_variables: BTreeMap<String, String>,
}

impl StateExecutionContextBuilder {
    pub fn account_id(mut self, account_id: impl Into<String>) -> Self {
        self.account_id = account_id.into();
        self
    }

    pub fn app_id(mut self, app_id: impl Into<String>) -> Self {
        self.app_id = app_id.into();
        self
    }

    pub fn env_id(mut self, env_id: impl Into<String>) -> Self {
        self.env_id = Some(env_id.into());
        self
    }

    pub fn workflow_id(mut self, workflow_id: impl Into<String>) -> Self {
        self.workflow_id = workflow_id.into();
        self
    }

    pub fn workflow_execution_id(mut self, id: impl Into<String>) -> Self {
        self.workflow_execution_id = id.into();
        self
    }

    pub fn state_execution_instance_id(mut self, id: impl Into<String>) -> Self {
        self.state_execution_instance_id = id.into();
        self
    }

    pub fn element(mut self, element: ContextElement) -> Self {
        self.elements.push(element);
        self
    }

    pub fn workflow_variable(mut self, name: impl Into<String>, value: Value) -> Self {
        self.workflow_variables.insert(name.into(), value);
        self
    }

    pub fn service_variable(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.service_variables.insert(name.into(), value.into());
        self
    }

    pub fn build(self) -> StateExecutionContext {
        StateExecutionContext {
            account_id: self.account_id,
            app_id: self.app_id,
            env_id: self.env_id,
            workflow_id: self.workflow_id,
            workflow_execution_id: self.workflow_execution_id,
            state_execution_instance_id: self.state_execution_instance_id,
            elements: self.elements,
            workflow_variables: self.workflow_variables,
            service_variables: self.service_variables,
            state_execution_data: RwLock::new(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::elements::{DeploymentType, HostElement};

    fn phase() -> ContextElement {
        ContextElement::Phase(PhaseElement {
            phase_name: "Phase 1".to_string(),
            service_id: "svc-1".to_string(),
            service_name: "orders".to_string(),
            infra_mapping_id: "infra-1".to_string(),
            deployment_type: DeploymentType::Ssh,
            rollback: false,
            phase_name_for_rollback: None,
        })
    }

    fn context() -> StateExecutionContext {
        StateExecutionContext::builder()
            .account_id("acc")
            .app_id("app")
            .env_id("env")
            .workflow_id("wf")
            .workflow_execution_id("wfe")
            .state_execution_instance_id("root")
            .element(phase())
            .workflow_variable("tier", json!("checkout"))
            .service_variable("port", "8080")
            .build()
    }

    #[test]
    fn test_renders_workflow_and_service_scope() {
        let ctx = context();
        assert_eq!(
            ctx.render_expression("${service.name}:${workflow.variables.tier}:${serviceVariable.port}"),
            "orders:checkout:8080"
        );
        assert_eq!(ctx.render_expression("literal"), "literal");
    }

    #[test]
    fn test_render_required_reports_expression() {
        let ctx = context();
        let err = ctx.render_required("${workflow.variables.missing}").unwrap_err();
        assert_eq!(
            err.to_string(),
            "Error: Expression ${workflow.variables.missing} could not be resolved"
        );
    }

    #[test]
    fn test_child_pushes_elements_on_top() {
        let parent = context();
        let instance = InstanceElement {
            uuid: "i-1".to_string(),
            host: HostElement::named("host-1"),
            new_instance: true,
            workload_name: None,
            phase_name: None,
        };
        let child = parent.child("child-1", vec![ContextElement::Instance(instance)]);

        assert_eq!(child.state_execution_instance_id(), "child-1");
        assert_eq!(child.instance_elements().len(), 1);
        assert!(parent.instance_elements().is_empty());
        assert_eq!(child.render_expression("${host.hostName}"), "host-1");
        assert!(child
            .context_element_by_key(ContextElementType::Phase, "Phase 1")
            .is_some());
    }

    #[test]
    fn test_scoped_render_overrides() {
        let ctx = context();
        let rendered =
            ctx.render_expression_with("${host.hostName}.corp", &json!({"host": {"hostName": "h9"}}));
        assert_eq!(rendered, "h9.corp");
    }
}
