//! Artifact selection for rollback phases.
//!
//! Artifact variables may be declared on the service, the environment and the
//! workflow. The workflow declaration overrides the environment one, which
//! overrides the service one. A rollback redeploys whatever the last
//! successful execution bound to the effective variables, or failing that the
//! artifact it deployed for the rolling-back service.

use crate::context::ArtifactElement;
use crate::error::StateResult;
use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ArtifactEntityType {
    Service,
    Environment,
    Workflow,
}

impl ArtifactEntityType {
    fn precedence(&self) -> u8 {
        match self {
            Self::Service => 0,
            Self::Environment => 1,
            Self::Workflow => 2,
        }
    }
}

/// Declaration of an artifact variable on one entity
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactVariable {
    pub name: String,
    pub entity_type: ArtifactEntityType,
    pub entity_id: String,
}

impl ArtifactVariable {
    pub fn new(name: impl Into<String>, entity_type: ArtifactEntityType, entity_id: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            entity_type,
            entity_id: entity_id.into(),
        }
    }
}

/// Artifact an execution bound to a variable
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactVariableBinding {
    pub name: String,
    pub entity_id: String,
    pub artifact_id: String,
}

/// What a successful execution deployed
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionArtifacts {
    pub workflow_execution_id: String,
    #[serde(default)]
    pub bindings: Vec<ArtifactVariableBinding>,
    #[serde(default)]
    pub artifacts: Vec<ArtifactElement>,
}

impl ArtifactVariable {
    /// Whether the declaring entity applies to `service_id` in `env_id`
    fn applies_to(&self, service_id: &str, env_id: Option<&str>) -> bool {
        match self.entity_type {
            ArtifactEntityType::Service => self.entity_id == service_id,
            ArtifactEntityType::Environment => env_id.map_or(true, |env| self.entity_id == env),
            ArtifactEntityType::Workflow => true,
        }
    }
}

/// One variable per name for the rolling-back service, taken from the most
/// specific declaring entity. Declarations on other services or environments
/// are ignored.
pub fn effective_artifact_variables(
    variables: &[ArtifactVariable],
    service_id: &str,
    env_id: Option<&str>,
) -> Vec<ArtifactVariable> {
    let mut effective: BTreeMap<&str, &ArtifactVariable> = BTreeMap::new();
    for variable in variables.iter().filter(|v| v.applies_to(service_id, env_id)) {
        let replace = effective
            .get(variable.name.as_str())
            .map_or(true, |current| {
                variable.entity_type.precedence() > current.entity_type.precedence()
            });
        if replace {
            effective.insert(&variable.name, variable);
        }
    }
    effective.into_values().cloned().collect()
}

/// Artifact to redeploy for `service_id`
pub fn resolve_rollback_artifact(
    effective: &[ArtifactVariable],
    previous: &ExecutionArtifacts,
    service_id: &str,
) -> Option<ArtifactElement> {
    let bound = effective.iter().find_map(|variable| {
        let binding = previous
            .bindings
            .iter()
            .find(|b| b.name == variable.name && b.entity_id == variable.entity_id)?;
        previous
            .artifacts
            .iter()
            .find(|artifact| artifact.uuid == binding.artifact_id)
    });

    bound
        .or_else(|| {
            previous
                .artifacts
                .iter()
                .find(|artifact| artifact.service_ids.iter().any(|id| id == service_id))
        })
        .cloned()
}

/// Lookup of the artifacts deployed by earlier executions
#[async_trait]
pub trait ArtifactHistory: Send + Sync {
    /// Latest successful execution of the workflow other than `current_execution_id`
    async fn last_successful_execution(
        &self,
        app_id: &str,
        workflow_id: &str,
        current_execution_id: &str,
    ) -> StateResult<Option<ExecutionArtifacts>>;
}

#[derive(Debug, Default)]
pub struct InMemoryArtifactHistory {
    executions: DashMap<(String, String), Vec<ExecutionArtifacts>>,
}

impl InMemoryArtifactHistory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a successful execution; later records are newer
    pub fn record_success(&self, app_id: &str, workflow_id: &str, execution: ExecutionArtifacts) {
        self.executions
            .entry((app_id.to_string(), workflow_id.to_string()))
            .or_default()
            .push(execution);
    }
}

#[async_trait]
impl ArtifactHistory for InMemoryArtifactHistory {
    async fn last_successful_execution(
        &self,
        app_id: &str,
        workflow_id: &str,
        current_execution_id: &str,
    ) -> StateResult<Option<ExecutionArtifacts>> {
        let key = (app_id.to_string(), workflow_id.to_string());
        Ok(self.executions.get(&key).and_then(|executions| {
            executions
                .iter()
                .rev()
                .find(|e| e.workflow_execution_id != current_execution_id)
                .cloned()
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn artifact(uuid: &str, service_ids: &[&str]) -> ArtifactElement {
        ArtifactElement {
            uuid: uuid.to_string(),
            name: format!("build-{uuid}"),
            build_no: "1".to_string(),
            service_ids: service_ids.iter().map(|s| s.to_string()).collect(),
        }
    }

    #[test]
    fn test_workflow_declaration_wins() {
        let variables = vec![
            ArtifactVariable::new("artifact", ArtifactEntityType::Service, "svc-1"),
            ArtifactVariable::new("artifact", ArtifactEntityType::Workflow, "wf"),
            ArtifactVariable::new("artifact", ArtifactEntityType::Environment, "env"),
            ArtifactVariable::new("sidecar", ArtifactEntityType::Service, "svc-1"),
        ];
        let effective = effective_artifact_variables(&variables, "svc-1", Some("env"));
        assert_eq!(effective.len(), 2);
        assert_eq!(effective[0].name, "artifact");
        assert_eq!(effective[0].entity_type, ArtifactEntityType::Workflow);
        assert_eq!(effective[1].name, "sidecar");
    }

    #[test]
    fn test_binding_match_then_service_fallback() {
        let previous = ExecutionArtifacts {
            workflow_execution_id: "wfe-0".to_string(),
            bindings: vec![ArtifactVariableBinding {
                name: "artifact".to_string(),
                entity_id: "wf".to_string(),
                artifact_id: "art-2".to_string(),
            }],
            artifacts: vec![artifact("art-1", &["svc-1"]), artifact("art-2", &["svc-9"])],
        };

        let bound = vec![ArtifactVariable::new("artifact", ArtifactEntityType::Workflow, "wf")];
        assert_eq!(
            resolve_rollback_artifact(&bound, &previous, "svc-1").unwrap().uuid,
            "art-2"
        );

        let unbound = vec![ArtifactVariable::new("artifact", ArtifactEntityType::Environment, "env")];
        assert_eq!(
            resolve_rollback_artifact(&unbound, &previous, "svc-1").unwrap().uuid,
            "art-1"
        );
        assert!(resolve_rollback_artifact(&unbound, &previous, "svc-3").is_none());
    }

    #[test]
    fn test_service_declarations_follow_rolling_back_service() {
        let variables = vec![
            ArtifactVariable::new("artifact", ArtifactEntityType::Service, "svc-a"),
            ArtifactVariable::new("artifact", ArtifactEntityType::Service, "svc-b"),
        ];
        let previous = ExecutionArtifacts {
            workflow_execution_id: "wfe-0".to_string(),
            bindings: vec![
                ArtifactVariableBinding {
                    name: "artifact".to_string(),
                    entity_id: "svc-a".to_string(),
                    artifact_id: "art-a".to_string(),
                },
                ArtifactVariableBinding {
                    name: "artifact".to_string(),
                    entity_id: "svc-b".to_string(),
                    artifact_id: "art-b".to_string(),
                },
            ],
            artifacts: vec![artifact("art-a", &["svc-a"]), artifact("art-b", &["svc-b"])],
        };

        let effective = effective_artifact_variables(&variables, "svc-b", None);
        assert_eq!(effective.len(), 1);
        assert_eq!(effective[0].entity_id, "svc-b");
        assert_eq!(
            resolve_rollback_artifact(&effective, &previous, "svc-b").unwrap().uuid,
            "art-b"
        );
    }

    #[test]
    fn test_other_environment_declaration_ignored() {
        let variables = vec![
            ArtifactVariable::new("artifact", ArtifactEntityType::Service, "svc-1"),
            ArtifactVariable::new("artifact", ArtifactEntityType::Environment, "env-qa"),
        ];
        let effective = effective_artifact_variables(&variables, "svc-1", Some("env-prod"));
        assert_eq!(effective.len(), 1);
        assert_eq!(effective[0].entity_type, ArtifactEntityType::Service);
    }

    #[tokio::test]
    async fn test_history_skips_current_execution() {
        let history = InMemoryArtifactHistory::new();
        history.record_success("app", "wf", ExecutionArtifacts {
            workflow_execution_id: "wfe-1".to_string(),
            ..Default::default()
        });
        history.record_success("app", "wf", ExecutionArtifacts {
            workflow_execution_id: "wfe-2".to_string(),
            ..Default::default()
        });

        let found = history
            .last_successful_execution("app", "wf", "wfe-2")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.workflow_execution_id, "wfe-1");
        assert!(history
            .last_successful_execution("app", "other", "wfe-2")
            .await
            .unwrap()
            .is_none());
    }
}
