//! End-to-end runs of phases through the in-process engine: deploy, verify,
//! fail, abort and roll back against in-memory workers.

mod common;

use common::{deployed_instance, pipeline, root_context, Pipeline, APP_ID, INFRA_MAPPING_ID, SERVICE_ID};
use delivery_states::analysis::{
    AnalysisSettings, AnalysisStep, AnalysisSummary, AnalysisSummaryStore, AnalysisTolerance,
    AnalysisType, ComparisonStrategy, RiskLevel,
};
use delivery_states::analysis::providers::LogCollector;
use delivery_states::constants::system;
use delivery_states::context::DeploymentType;
use delivery_states::dispatch::{ResponseData, TaskType};
use delivery_states::states::container::InstanceCount;
use delivery_states::states::{ContainerDeployStep, ContainerRollbackStep};
use delivery_states::workflow::{
    PhaseExecutionSummaryStore, PhaseStepSubWorkflow, PhaseStepType, PhaseSubWorkflow,
    SweepingOutputScope, SweepingOutputStore,
};
use delivery_states::{ExecutionStatus, Step};
use serde_json::json;
use std::sync::Arc;

fn forward_phase(p: &Pipeline, tolerance: AnalysisTolerance) -> Arc<dyn Step> {
    let deploy = PhaseStepSubWorkflow::new(
        "Deploy Containers",
        PhaseStepType::ContainerDeploy,
        p.summaries.clone(),
    )
    .with_step(Arc::new(ContainerDeployStep::new(
        "Upgrade Containers",
        InstanceCount::Count(2),
        p.step_services.clone(),
    )));

    let verify = PhaseStepSubWorkflow::new("Verify Service", PhaseStepType::Verify, p.summaries.clone())
        .parallel()
        .with_step(Arc::new(AnalysisStep::new(
            "Verify Logs",
            AnalysisSettings::new(ComparisonStrategy::CompareWithCurrent, 15, tolerance),
            Arc::new(LogCollector::new("ELK", "elk-connector", "level:error")),
            Arc::clone(&p.orchestrator),
        )));

    Arc::new(
        PhaseSubWorkflow::new(
            "Phase 1",
            SERVICE_ID,
            INFRA_MAPPING_ID,
            DeploymentType::Ecs,
            p.phase_services.clone(),
        )
        .with_phase_step(Arc::new(deploy))
        .with_phase_step(Arc::new(verify)),
    )
}

fn rollback_phase(p: &Pipeline) -> Arc<dyn Step> {
    let rollback = PhaseStepSubWorkflow::new(
        "Rollback Containers",
        PhaseStepType::ContainerDeploy,
        p.summaries.clone(),
    )
    .with_step(Arc::new(ContainerRollbackStep::new(
        "Rollback Containers",
        p.step_services.clone(),
    )));

    Arc::new(
        PhaseSubWorkflow::new(
            "Rollback Phase 1",
            SERVICE_ID,
            INFRA_MAPPING_ID,
            DeploymentType::Ecs,
            p.phase_services.clone(),
        )
        .rollback_of("Phase 1")
        .with_phase_step(Arc::new(rollback)),
    )
}

fn resize_output() -> ResponseData {
    ResponseData::success(json!({
        "serviceData": [
            {"name": "orders__2", "desired_count": 2, "previous_count": 0,
             "desired_traffic_percent": 100, "previous_traffic_percent": 0},
            {"name": "orders__1", "desired_count": 0, "previous_count": 2,
             "desired_traffic_percent": 0, "previous_traffic_percent": 100}
        ],
        "instances": [
            {"hostName": "orders-new-1", "newInstance": true},
            {"hostName": "orders-new-2", "newInstance": true}
        ]
    }))
}

fn seed_deployed_nodes(p: &Pipeline) {
    p.deployed.set_instances(
        SERVICE_ID,
        INFRA_MAPPING_ID,
        vec![
            deployed_instance("orders-old-1", false),
            deployed_instance("orders-old-2", false),
            deployed_instance("orders-new-1", true),
            deployed_instance("orders-new-2", true),
        ],
    );
}

#[tokio::test]
async fn test_deploy_verify_and_rollback() {
    let p = pipeline();
    seed_deployed_nodes(&p);

    let root = p
        .engine
        .start_root(forward_phase(&p, AnalysisTolerance::Medium), root_context("phase-1"))
        .await
        .unwrap();
    assert_eq!(p.engine.status(&root), Some(ExecutionStatus::Running));

    let resize = p.dispatcher.submitted_of(TaskType::ContainerResize);
    assert_eq!(resize.len(), 1);
    assert_eq!(resize[0].payload["clusterName"], "prod");
    assert!(p.engine.deliver(&resize[0].wait_id, resize_output()).await.unwrap());

    // the verify phase step sees the instances the deploy phase step created
    let collection = p.dispatcher.submitted_of(TaskType::LogDataCollection);
    assert_eq!(collection.len(), 1);
    let payload = &collection[0].payload;
    assert_eq!(
        payload["hosts"],
        json!(["orders-new-1", "orders-new-2", "orders-old-1", "orders-old-2"])
    );

    let verify_instance = payload["stateExecutionId"].as_str().unwrap();
    p.analysis_store
        .save_summary(
            AnalysisSummary::new(APP_ID, verify_instance, AnalysisType::Log).with_risk(RiskLevel::Low, 120),
        )
        .await
        .unwrap();
    p.engine
        .deliver(&collection[0].wait_id, ResponseData::success(json!({})))
        .await
        .unwrap();

    let completion = p.engine.completion(&root).unwrap();
    assert_eq!(completion.status, ExecutionStatus::Success);

    let summary = p
        .summaries
        .find(APP_ID, "wfe-100", "Phase 1")
        .await
        .unwrap()
        .unwrap();
    let phase_steps: Vec<_> = summary
        .phase_steps
        .iter()
        .map(|s| (s.phase_step_name.as_str(), s.status))
        .collect();
    assert_eq!(
        phase_steps,
        vec![
            ("Deploy Containers", ExecutionStatus::Success),
            ("Verify Service", ExecutionStatus::Success),
        ]
    );
    let phase_output = p
        .outputs
        .find(SweepingOutputScope::Phase, "wfe-100/Phase 1", system::PHASE_OUTPUT)
        .unwrap();
    assert_eq!(phase_output.value["status"], "SUCCESS");

    // roll the same execution back
    let rollback_root = p
        .engine
        .start_root(rollback_phase(&p), root_context("rollback-1"))
        .await
        .unwrap();
    let resize = p.dispatcher.submitted_of(TaskType::ContainerResize);
    assert_eq!(resize.len(), 2);
    let undo = &resize[1].payload;
    assert_eq!(undo["rollback"], true);
    assert_eq!(undo["serviceData"][0]["name"], "orders__2");
    assert_eq!(undo["serviceData"][0]["desired_count"], 0);
    assert_eq!(undo["serviceData"][1]["desired_count"], 2);
    assert_eq!(undo["serviceData"][1]["desired_traffic_percent"], 100);

    p.engine
        .deliver(&resize[1].wait_id, ResponseData::success(json!({})))
        .await
        .unwrap();
    assert_eq!(
        p.engine.completion(&rollback_root).unwrap().status,
        ExecutionStatus::Success
    );
}

#[tokio::test]
async fn test_high_risk_fails_phase() {
    let p = pipeline();
    seed_deployed_nodes(&p);

    let root = p
        .engine
        .start_root(forward_phase(&p, AnalysisTolerance::High), root_context("phase-1"))
        .await
        .unwrap();
    let resize = p.dispatcher.submitted_of(TaskType::ContainerResize);
    p.engine.deliver(&resize[0].wait_id, resize_output()).await.unwrap();

    let collection = p.dispatcher.submitted_of(TaskType::LogDataCollection);
    let verify_instance = collection[0].payload["stateExecutionId"].as_str().unwrap();
    p.analysis_store
        .save_summary(
            AnalysisSummary::new(APP_ID, verify_instance, AnalysisType::Log).with_risk(RiskLevel::High, 40),
        )
        .await
        .unwrap();
    p.engine
        .deliver(&collection[0].wait_id, ResponseData::success(json!({})))
        .await
        .unwrap();

    let completion = p.engine.completion(&root).unwrap();
    assert_eq!(completion.status, ExecutionStatus::Failed);
    assert!(completion
        .error_message
        .as_deref()
        .unwrap()
        .starts_with("Verify Service"));
}

#[tokio::test]
async fn test_failed_deploy_skips_verification() {
    let p = pipeline();
    seed_deployed_nodes(&p);

    let root = p
        .engine
        .start_root(forward_phase(&p, AnalysisTolerance::Medium), root_context("phase-1"))
        .await
        .unwrap();
    let resize = p.dispatcher.submitted_of(TaskType::ContainerResize);
    p.engine
        .deliver(
            &resize[0].wait_id,
            ResponseData::failure("service did not reach steady state"),
        )
        .await
        .unwrap();

    let completion = p.engine.completion(&root).unwrap();
    assert_eq!(completion.status, ExecutionStatus::Failed);
    assert!(completion
        .error_message
        .as_deref()
        .unwrap()
        .contains("steady state"));
    assert!(p.dispatcher.submitted_of(TaskType::LogDataCollection).is_empty());

    let summary = p
        .summaries
        .find(APP_ID, "wfe-100", "Phase 1")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(summary.phase_steps.len(), 1);
    assert_eq!(
        p.activities.get(&resize[0].wait_id).unwrap().status,
        ExecutionStatus::Failed
    );
}

#[tokio::test]
async fn test_rollback_of_phase_that_never_ran() {
    let p = pipeline();
    let root = p
        .engine
        .start_root(rollback_phase(&p), root_context("rollback-1"))
        .await
        .unwrap();

    let completion = p.engine.completion(&root).unwrap();
    assert_eq!(completion.status, ExecutionStatus::Success);
    assert!(p.dispatcher.submitted().is_empty());
}

#[tokio::test]
async fn test_abort_marks_running_activity() {
    let p = pipeline();
    seed_deployed_nodes(&p);

    let root = p
        .engine
        .start_root(forward_phase(&p, AnalysisTolerance::Medium), root_context("phase-1"))
        .await
        .unwrap();
    let resize = p.dispatcher.submitted_of(TaskType::ContainerResize);

    p.engine.abort(&root).await.unwrap();
    assert_eq!(p.engine.status(&root), Some(ExecutionStatus::Aborted));
    assert_eq!(
        p.activities.get(&resize[0].wait_id).unwrap().status,
        ExecutionStatus::Aborted
    );

    // the worker finishing later changes nothing
    assert!(!p.engine.deliver(&resize[0].wait_id, resize_output()).await.unwrap());
    assert_eq!(p.engine.status(&root), Some(ExecutionStatus::Aborted));
}
