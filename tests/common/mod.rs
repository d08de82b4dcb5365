//! Shared fixtures for the integration tests: one set of in-memory
//! collaborators wired the way an embedding service would wire them.

#![allow(dead_code)]

pub mod strategies;

use chrono::{TimeZone, Utc};
use delivery_states::activity::InMemoryActivityLog;
use delivery_states::analysis::{
    AnalysisOrchestrator, AnalysisServices, FixedClock, InMemoryAnalysisStore,
    InMemoryBaselineResolver, InMemoryFeatureFlags, InMemoryInstanceSource,
    InMemoryMetadataRecorder, RecordingSleeper,
};
use delivery_states::config::StatesConfig;
use delivery_states::context::{
    DeploymentType, HostElement, InfraMappingElement, InstanceElement, ServiceElement,
    StateExecutionContext,
};
use delivery_states::dispatch::InMemoryDispatcher;
use delivery_states::states::StepServices;
use delivery_states::workflow::{
    InMemoryArtifactHistory, InMemoryInfrastructureCatalog, InMemoryPhaseSummaryStore,
    InMemorySweepingOutputStore, PhaseServices, WorkflowEngine,
};
use std::sync::Arc;

pub const APP_ID: &str = "app-1";
pub const SERVICE_ID: &str = "svc-orders";
pub const INFRA_MAPPING_ID: &str = "infra-prod-ecs";

pub struct Pipeline {
    pub engine: WorkflowEngine,
    pub dispatcher: Arc<InMemoryDispatcher>,
    pub activities: Arc<InMemoryActivityLog>,
    pub outputs: Arc<InMemorySweepingOutputStore>,
    pub summaries: Arc<InMemoryPhaseSummaryStore>,
    pub analysis_store: Arc<InMemoryAnalysisStore>,
    pub deployed: Arc<InMemoryInstanceSource>,
    pub artifacts: Arc<InMemoryArtifactHistory>,
    pub step_services: StepServices,
    pub phase_services: PhaseServices,
    pub orchestrator: Arc<AnalysisOrchestrator>,
}

pub fn pipeline() -> Pipeline {
    let config = Arc::new(StatesConfig::default());
    let dispatcher = Arc::new(InMemoryDispatcher::new());
    let activities = Arc::new(InMemoryActivityLog::new());
    let outputs = Arc::new(InMemorySweepingOutputStore::new());
    let summaries = Arc::new(InMemoryPhaseSummaryStore::new());
    let analysis_store = Arc::new(InMemoryAnalysisStore::new());
    let deployed = Arc::new(InMemoryInstanceSource::new());
    let artifacts = Arc::new(InMemoryArtifactHistory::new());

    let catalog = Arc::new(InMemoryInfrastructureCatalog::new());
    catalog.add_service(APP_ID, ServiceElement {
        uuid: SERVICE_ID.to_string(),
        name: "orders".to_string(),
    });
    catalog.add_infra_mapping(APP_ID, InfraMappingElement {
        uuid: INFRA_MAPPING_ID.to_string(),
        name: "prod-ecs".to_string(),
        deployment_type: DeploymentType::Ecs,
        cluster_name: Some("prod".to_string()),
        load_balancers: vec![],
        region: Some("us-east-1".to_string()),
    });

    let step_services = StepServices::new(
        dispatcher.clone(),
        activities.clone(),
        outputs.clone(),
        Arc::clone(&config),
    );
    let phase_services = PhaseServices::new(
        catalog,
        summaries.clone(),
        artifacts.clone(),
        outputs.clone(),
    );
    let orchestrator = Arc::new(AnalysisOrchestrator::new(AnalysisServices {
        dispatcher: dispatcher.clone(),
        activities: activities.clone(),
        flags: Arc::new(InMemoryFeatureFlags::new()),
        summaries: analysis_store.clone(),
        contexts: analysis_store.clone(),
        baseline: Arc::new(InMemoryBaselineResolver::new()),
        instances: deployed.clone(),
        metadata: Arc::new(InMemoryMetadataRecorder::new()),
        clock: Arc::new(FixedClock::new(
            Utc.with_ymd_and_hms(2024, 3, 1, 10, 0, 0).unwrap(),
        )),
        sleeper: Arc::new(RecordingSleeper::new()),
        config: Arc::clone(&config),
    }));

    Pipeline {
        engine: WorkflowEngine::from_config(&config),
        dispatcher,
        activities,
        outputs,
        summaries,
        analysis_store,
        deployed,
        artifacts,
        step_services,
        phase_services,
        orchestrator,
    }
}

pub fn root_context(instance_id: &str) -> StateExecutionContext {
    StateExecutionContext::builder()
        .account_id("account-1")
        .app_id(APP_ID)
        .env_id("env-prod")
        .workflow_id("wf-canary")
        .workflow_execution_id("wfe-100")
        .state_execution_instance_id(instance_id)
        .build()
}

pub fn deployed_instance(host: &str, new_instance: bool) -> InstanceElement {
    InstanceElement {
        uuid: host.to_string(),
        host: HostElement::named(host),
        new_instance,
        workload_name: None,
        phase_name: Some("Phase 1".to_string()),
    }
}
