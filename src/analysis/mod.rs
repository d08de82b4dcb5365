//! # Verification Analysis
//!
//! Compares the hosts of a deployment against a baseline and fails the step
//! when the measured risk exceeds the user's tolerance.
//!
//! ## Architecture
//!
//! - [`AnalysisOrchestrator`]: node selection, collection scheduling, the
//!   bounded summary poll and the verdict. Shared by every provider.
//! - [`DataCollector`]: provider capability that turns an
//!   [`AnalysisContext`] into collection tasks ([`providers`]).
//! - [`AnalysisStep`]: the [`Step`](crate::step::Step) binding one collector
//!   to the orchestrator. Log or metric, depending on the collector.
//!
//! Every external system the orchestrator reads (summary store, baseline
//! history, deployed instances, feature flags, metadata) sits behind a trait
//! with an in-memory implementation next to it.

pub mod baseline;
pub mod collection;
pub mod flags;
pub mod metadata;
pub mod nodes;
pub mod orchestrator;
pub mod poller;
pub mod providers;
pub mod step;
pub mod store;
pub mod types;
pub mod verdict;

pub use baseline::{
    last_execution_nodes, BaselineNodes, BaselineResolver, InMemoryBaselineResolver,
    BASELINE_RUN_MESSAGE,
};
pub use collection::{
    is_eligible_for_per_minute_task, Clock, CollectionWindow, DataCollector, FixedClock,
    SystemClock,
};
pub use flags::{FeatureFlags, FeatureName, InMemoryFeatureFlags};
pub use metadata::{InMemoryMetadataRecorder, VerificationMetadata, VerificationMetadataRecorder};
pub use nodes::{
    control_and_test_nodes, sample_nodes, InMemoryInstanceSource, InstanceSource, NodeMap,
    NodeSelection, NodeSelectionOptions,
};
pub use orchestrator::{AnalysisOrchestrator, AnalysisServices, AnalysisSettings};
pub use poller::{RecordingSleeper, Sleeper, SummaryPoller, TokioSleeper};
pub use step::AnalysisStep;
pub use store::{AnalysisContextStore, AnalysisSummaryStore, InMemoryAnalysisStore};
pub use types::{
    AnalysisContext, AnalysisExecutionData, AnalysisSummary, AnalysisTolerance, AnalysisType,
    ComparisonStrategy, RiskLevel,
};
pub use verdict::{qa_override, verdict};

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use crate::activity::InMemoryActivityLog;
    use crate::config::StatesConfig;
    use crate::context::{
        ContextElement, DeploymentType, HostElement, InstanceElement, InstanceListElement,
        StateExecutionContext,
    };
    use crate::dispatch::InMemoryDispatcher;
    use crate::states::test_support::{context_with, infra_element, phase_element};
    use chrono::{TimeZone, Utc};
    use std::collections::BTreeMap;
    use std::sync::Arc;

    pub struct AnalysisHarness {
        pub dispatcher: Arc<InMemoryDispatcher>,
        pub activities: Arc<InMemoryActivityLog>,
        pub store: Arc<InMemoryAnalysisStore>,
        pub flags: Arc<InMemoryFeatureFlags>,
        pub baseline: Arc<InMemoryBaselineResolver>,
        pub instances: Arc<InMemoryInstanceSource>,
        pub metadata: Arc<InMemoryMetadataRecorder>,
        pub sleeper: Arc<RecordingSleeper>,
        pub orchestrator: Arc<AnalysisOrchestrator>,
    }

    impl AnalysisHarness {
        pub fn step(&self, settings: AnalysisSettings) -> AnalysisStep {
            AnalysisStep::new(
                "Verify Logs",
                settings,
                Arc::new(providers::LogCollector::new("ELK", "elk-1", "level:error")),
                Arc::clone(&self.orchestrator),
            )
        }
    }

    pub fn analysis_harness() -> AnalysisHarness {
        let dispatcher = Arc::new(InMemoryDispatcher::new());
        let activities = Arc::new(InMemoryActivityLog::new());
        let store = Arc::new(InMemoryAnalysisStore::new());
        let flags = Arc::new(InMemoryFeatureFlags::new());
        let baseline = Arc::new(InMemoryBaselineResolver::new());
        let instances = Arc::new(InMemoryInstanceSource::new());
        let metadata = Arc::new(InMemoryMetadataRecorder::new());
        let sleeper = Arc::new(RecordingSleeper::new());
        let orchestrator = Arc::new(AnalysisOrchestrator::new(AnalysisServices {
            dispatcher: dispatcher.clone(),
            activities: activities.clone(),
            flags: flags.clone(),
            summaries: store.clone(),
            contexts: store.clone(),
            baseline: baseline.clone(),
            instances: instances.clone(),
            metadata: metadata.clone(),
            clock: Arc::new(FixedClock::new(Utc.with_ymd_and_hms(2024, 3, 1, 10, 0, 0).unwrap())),
            sleeper: sleeper.clone(),
            config: Arc::new(StatesConfig::default()),
        }));
        AnalysisHarness {
            dispatcher,
            activities,
            store,
            flags,
            baseline,
            instances,
            metadata,
            sleeper,
            orchestrator,
        }
    }

    pub fn instance(host: &str, new_instance: bool) -> InstanceElement {
        InstanceElement {
            uuid: host.to_string(),
            host: HostElement::named(host),
            new_instance,
            workload_name: None,
            phase_name: Some("Phase 1".to_string()),
        }
    }

    pub fn context_with_instances(instances: Vec<InstanceElement>) -> StateExecutionContext {
        context_with(vec![
            phase_element(DeploymentType::Ssh),
            infra_element(DeploymentType::Ssh),
            ContextElement::InstanceList(InstanceListElement { instances }),
        ])
    }

    /// Context with `test` new hosts and `control` old hosts
    pub fn analysis_context(test: usize, control: usize) -> AnalysisContext {
        let nodes = |prefix: &str, n: usize| -> BTreeMap<String, String> {
            (0..n)
                .map(|i| (format!("{prefix}-{i:02}"), "DEFAULT".to_string()))
                .collect()
        };
        AnalysisContext {
            correlation_id: "corr".to_string(),
            account_id: "acc".to_string(),
            app_id: "app".to_string(),
            env_id: Some("env".to_string()),
            workflow_id: "wf".to_string(),
            workflow_execution_id: "wfe".to_string(),
            state_execution_id: "step-1".to_string(),
            service_id: "svc-1".to_string(),
            phase_name: "Phase 1".to_string(),
            state_type: "ELK".to_string(),
            analysis_type: AnalysisType::Log,
            comparison_strategy: ComparisonStrategy::CompareWithCurrent,
            tolerance: AnalysisTolerance::Medium,
            control_nodes: nodes("old", control),
            test_nodes: nodes("new", test),
            last_execution_nodes: BTreeMap::new(),
            time_duration_minutes: 15,
            start_data_collection_minute: 28_497_000,
            prev_workflow_execution_id: None,
            per_minute_collection: false,
            new_nodes_traffic_shift_percent: None,
            created_at: Utc::now(),
        }
    }
}
