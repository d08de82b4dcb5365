//! Named, scope-bound values one step publishes for later steps to read.

use crate::context::ExecutionContext;
use crate::error::{StateError, StateResult};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SweepingOutputScope {
    #[default]
    Phase,
    Workflow,
    Pipeline,
}

impl SweepingOutputScope {
    /// Identifier the scope is bound to for the step executing in `context`
    pub fn scope_id(&self, context: &dyn ExecutionContext) -> String {
        match self {
            Self::Phase => {
                let phase = context
                    .phase_element()
                    .map(|p| p.phase_name)
                    .unwrap_or_default();
                phase_scope_id(context.workflow_execution_id(), &phase)
            }
            Self::Workflow => context.workflow_execution_id().to_string(),
            Self::Pipeline => context.workflow_id().to_string(),
        }
    }
}

/// Scope id of a phase within one workflow execution
pub fn phase_scope_id(workflow_execution_id: &str, phase_name: &str) -> String {
    format!("{workflow_execution_id}/{phase_name}")
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SweepingOutput {
    pub name: String,
    pub scope: SweepingOutputScope,
    pub scope_id: String,
    pub app_id: String,
    pub value: Value,
}

impl SweepingOutput {
    pub fn new(
        context: &dyn ExecutionContext,
        name: &str,
        scope: SweepingOutputScope,
        value: Value,
    ) -> Self {
        Self {
            name: name.to_string(),
            scope,
            scope_id: scope.scope_id(context),
            app_id: context.app_id().to_string(),
            value,
        }
    }
}

pub trait SweepingOutputStore: Send + Sync {
    /// Names are unique within a scope instance
    fn save(&self, output: SweepingOutput) -> StateResult<()>;

    fn find(&self, scope: SweepingOutputScope, scope_id: &str, name: &str) -> Option<SweepingOutput>;
}

#[derive(Debug, Default)]
pub struct InMemorySweepingOutputStore {
    outputs: DashMap<(SweepingOutputScope, String, String), SweepingOutput>,
}

impl InMemorySweepingOutputStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.outputs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.outputs.is_empty()
    }
}

impl SweepingOutputStore for InMemorySweepingOutputStore {
    fn save(&self, output: SweepingOutput) -> StateResult<()> {
        let key = (output.scope, output.scope_id.clone(), output.name.clone());
        match self.outputs.entry(key) {
            Entry::Occupied(_) => Err(StateError::InvalidRequest(format!(
                "Output with name {} has already been saved in this scope",
                output.name
            ))),
            Entry::Vacant(slot) => {
                slot.insert(output);
                Ok(())
            }
        }
    }

    fn find(&self, scope: SweepingOutputScope, scope_id: &str, name: &str) -> Option<SweepingOutput> {
        self.outputs
            .get(&(scope, scope_id.to_string(), name.to_string()))
            .map(|o| o.clone())
    }
}
