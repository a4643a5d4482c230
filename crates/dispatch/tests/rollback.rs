#![forbid(unsafe_code)]

use ao_core::{JobStatus, RollbackStatus};
use ao_dispatch::{CreateProposal, DispatchConfig, DispatchService, ExecutionState, RollbackState};
use ao_storage::{SqliteStore, WorkItemPriority};
use serde_json::{Value, json};
use std::path::PathBuf;
use std::sync::Arc;

fn temp_dir(test_name: &str) -> PathBuf {
    let base = std::env::temp_dir();
    let pid = std::process::id();
    let nonce = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos();
    let dir = base.join(format!("ao_dispatch_{test_name}_{pid}_{nonce}"));
    std::fs::create_dir_all(&dir).expect("create temp dir");
    dir
}

fn open_service(test_name: &str) -> (Arc<SqliteStore>, DispatchService) {
    let store = Arc::new(SqliteStore::open(temp_dir(test_name)).expect("open store"));
    store.fleet_install_schema().expect("install fleet schema");
    let config = DispatchConfig {
        auto_execute_enabled: Some(false),
        ..DispatchConfig::default()
    };
    let service = DispatchService::new(Arc::clone(&store), config).expect("service");
    (store, service)
}

/// Creates, approves and executes; returns the job id.
fn executed(service: &DispatchService, proposal_type: &str, payload: Value) -> String {
    let proposal = service
        .create(CreateProposal {
            proposal_type: proposal_type.to_string(),
            payload,
            requested_by: "planner".to_string(),
            ..CreateProposal::default()
        })
        .expect("create");
    service.approve(&proposal.id, "reviewer", None).expect("approve");
    let outcome = service.execute(&proposal.id, "operator").expect("execute");
    assert_eq!(outcome.state, ExecutionState::Succeeded, "{outcome:?}");
    outcome.job_id().expect("job").to_string()
}

#[test]
fn pause_rollback_restores_implicit_active_status() {
    let (store, service) = open_service("pause_rollback");
    let job_id = executed(&service, "pause_agent", json!({"agent_id": "AG1", "reason": "incident"}));

    let paused = store.fleet_agent_status("AG1").expect("status").expect("record");
    assert_eq!(paused.status, "paused");
    assert_eq!(paused.reason.as_deref(), Some("incident"));
    let job = service.get_job(&job_id).expect("job");
    let evidence = job.evidence.expect("evidence");
    assert_eq!(evidence["before"]["status"], json!("active"));
    assert_eq!(evidence["before"]["implicit"], json!(true));

    let outcome = service.rollback(&job_id, "operator", None).expect("rollback");
    assert_eq!(outcome.state, RollbackState::Succeeded);
    let rollback = outcome.rollback.expect("rollback job");
    assert_eq!(rollback.status, RollbackStatus::Succeeded);
    assert_eq!(
        service.get_rollback_job(&rollback.id).expect("get rollback").job_id,
        job_id
    );
    assert_eq!(
        store.fleet_agent_status("AG1").expect("status").expect("record").status,
        "active"
    );
}

#[test]
fn resume_rollback_restores_recorded_pause() {
    let (store, service) = open_service("resume_rollback");
    store
        .fleet_set_agent_status("AG2", "paused", Some("drain".to_string()))
        .expect("seed status");
    let job_id = executed(&service, "resume_agent", json!({"agent_id": "AG2"}));
    assert_eq!(
        store.fleet_agent_status("AG2").expect("status").expect("record").status,
        "active"
    );

    service.rollback(&job_id, "operator", None).expect("rollback");
    let restored = store.fleet_agent_status("AG2").expect("status").expect("record");
    assert_eq!(restored.status, "paused");
    assert_eq!(restored.reason.as_deref(), Some("drain"));
}

#[test]
fn reprioritize_rollback_restores_each_item() {
    let (store, service) = open_service("reprioritize_rollback");
    store.fleet_upsert_work_item("W1", "T2", 90).expect("seed W1");
    store.fleet_upsert_work_item("W2", "T2", 15).expect("seed W2");
    let job_id = executed(&service, "reprioritize_task", json!({"task_id": "T2", "priority": "P2"}));
    assert!(
        store
            .fleet_work_items("T2")
            .expect("items")
            .iter()
            .all(|item| item.priority == 50)
    );

    service.rollback(&job_id, "operator", None).expect("rollback");
    assert_eq!(
        store.fleet_work_items("T2").expect("items"),
        vec![
            WorkItemPriority {
                work_item_id: "W1".to_string(),
                priority: 90
            },
            WorkItemPriority {
                work_item_id: "W2".to_string(),
                priority: 15
            },
        ]
    );
}

#[test]
fn only_succeeded_jobs_roll_back_and_only_once() {
    let (store, service) = open_service("rollback_precondition");
    store.fleet_upsert_task("T1", Some("A9"), None).expect("seed task");
    let proposal = service
        .create(CreateProposal {
            proposal_type: "reassign_task".to_string(),
            payload: json!({"task_id": "T1", "to_agent": "A2", "from_agent": "A1"}),
            requested_by: "planner".to_string(),
            ..CreateProposal::default()
        })
        .expect("create");
    service.approve(&proposal.id, "reviewer", None).expect("approve");
    let failed = service.execute(&proposal.id, "operator").expect("execute");
    assert_eq!(failed.state, ExecutionState::Failed);
    let err = service
        .rollback(failed.job_id().expect("job"), "operator", None)
        .expect_err("failed job");
    assert_eq!(err.code(), "INVALID_STATE");

    let job_id = executed(&service, "pause_agent", json!({"agent_id": "AG3"}));
    service.rollback(&job_id, "operator", None).expect("first rollback");
    let err = service
        .rollback(&job_id, "operator", None)
        .expect_err("second rollback");
    assert_eq!(err.code(), "INVALID_STATE");
    assert_eq!(service.list_rollback_jobs(&job_id).expect("list").len(), 1);

    let err = service.rollback("JOB-9999", "operator", None).expect_err("unknown");
    assert_eq!(err.code(), "NOT_FOUND");
}

#[test]
fn failed_revert_is_recorded_and_can_be_retried() {
    let (store, service) = open_service("revert_failed");
    store.fleet_upsert_task("T1", Some("A1"), None).expect("seed task");
    let job_id = executed(
        &service,
        "reassign_task",
        json!({"task_id": "T1", "to_agent": "A2", "from_agent": "A1"}),
    );
    // Someone else moved the task after execution.
    store.fleet_upsert_task("T1", Some("A5"), None).expect("move task");

    let outcome = service.rollback(&job_id, "operator", None).expect("rollback");
    assert_eq!(outcome.state, RollbackState::Failed);
    assert_eq!(outcome.reason_code.as_deref(), Some("PRECONDITION_FAILED"));
    assert_eq!(outcome.job.status, JobStatus::Succeeded);
    assert_eq!(
        store.fleet_task("T1").expect("task").expect("exists").owner_agent.as_deref(),
        Some("A5")
    );

    store.fleet_upsert_task("T1", Some("A2"), None).expect("restore owner");
    let outcome = service.rollback(&job_id, "operator", None).expect("second rollback");
    assert_eq!(outcome.state, RollbackState::Succeeded);
    assert_eq!(outcome.job.status, JobStatus::RolledBack);
    assert_eq!(service.list_rollback_jobs(&job_id).expect("list").len(), 2);
}
