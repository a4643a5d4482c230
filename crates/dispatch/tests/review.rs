#![forbid(unsafe_code)]

use ao_core::{ExecutionMode, ProposalStatus, RiskLevel};
use ao_dispatch::{
    CreateProposal, DeploymentMode, DispatchConfig, DispatchService, ExecutionState,
};
use ao_storage::SqliteStore;
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

fn open_service(test_name: &str, config: DispatchConfig) -> (Arc<SqliteStore>, DispatchService) {
    let store = Arc::new(SqliteStore::open(temp_dir(test_name)).expect("open store"));
    store.fleet_install_schema().expect("install fleet schema");
    let service = DispatchService::new(Arc::clone(&store), config).expect("service");
    (store, service)
}

fn request(proposal_type: &str, payload: Value) -> CreateProposal {
    CreateProposal {
        proposal_type: proposal_type.to_string(),
        payload,
        reason: "queue depth above target".to_string(),
        evidence_refs: vec!["metrics:queue_depth".to_string()],
        requested_by: "planner".to_string(),
        ..CreateProposal::default()
    }
}

#[test]
fn risk_is_computed_server_side() {
    let (_store, service) = open_service("risk_server_side", DispatchConfig::default());

    let top = service
        .create(request("reprioritize_task", json!({"task_id": "T2", "priority": "P0"})))
        .expect("P0");
    assert_eq!(top.risk_level, RiskLevel::Medium);
    let bottom = service
        .create(request("reprioritize_task", json!({"task_id": "T2", "priority": "P3"})))
        .expect("P3");
    assert_eq!(bottom.risk_level, RiskLevel::Low);

    let mut claimed = request("pause_agent", json!({"agent_id": "AG1"}));
    claimed.risk_level = Some("low".to_string());
    let paused = service.create(claimed).expect("claimed low");
    assert_eq!(paused.risk_level, RiskLevel::High);
    assert_eq!(paused.status, ProposalStatus::Pending);
    assert_eq!(paused.source, "planner");

    let mut unknown_claim = request("pause_agent", json!({"agent_id": "AG2"}));
    unknown_claim.risk_level = Some("catastrophic".to_string());
    let accepted = service.create(unknown_claim).expect("unknown claim is not a rejection");
    assert_eq!(accepted.risk_level, RiskLevel::High);
    let events = service.audit_for_proposal(&accepted.id).expect("audit");
    assert_eq!(events[0].details["risk_override"], json!(true));
    assert_eq!(events[0].details["requested_risk"], json!("catastrophic"));
}

#[test]
fn malformed_submissions_are_invalid_payload() {
    let (_store, service) = open_service("invalid_payload", DispatchConfig::default());
    for (kind, payload) in [
        ("reassign_task", json!({"task_id": "T1"})),
        ("reprioritize_task", json!({"task_id": "T1", "priority": 500})),
        ("pause_agent", json!({"agent_id": 42})),
        ("Not A Type", json!({})),
    ] {
        let err = service
            .create(request(kind, payload))
            .expect_err("malformed");
        assert_eq!(err.code(), "INVALID_PAYLOAD", "{kind}");
    }

    let mut bad_scope = request("pause_agent", json!({"agent_id": "AG1"}));
    bad_scope.scope = Some(json!({"kind": "galaxy"}));
    assert_eq!(
        service.create(bad_scope).expect_err("bad scope").code(),
        "INVALID_PAYLOAD"
    );
    assert!(service.list_proposals(None).expect("list").is_empty());
}

#[test]
fn low_risk_allowlisted_approval_auto_executes() {
    let (store, service) = open_service("auto_execute", DispatchConfig::default());
    store.fleet_upsert_work_item("W1", "T2", 80).expect("seed W1");
    store.fleet_upsert_work_item("W2", "T2", 35).expect("seed W2");

    let proposal = service
        .create(request("reprioritize_task", json!({"task_id": "T2", "priority": "low"})))
        .expect("create");
    let approval = service
        .approve(&proposal.id, "reviewer", Some("fine".to_string()))
        .expect("approve");
    assert!(approval.eligible);
    let outcome = approval
        .auto_execution
        .expect("auto execution attempted")
        .expect("auto execution ran");
    assert_eq!(outcome.state, ExecutionState::Succeeded);
    let job = outcome.job.expect("job");
    assert_eq!(job.execution_mode, ExecutionMode::Auto);

    let proposal = approval.proposal;
    assert_eq!(proposal.status, ProposalStatus::Executed);
    assert!(proposal.auto_execute_eligible);
    assert!(proposal.approved_then_auto_execute);
    assert_eq!(
        proposal.auto_execute_policy,
        Some(json!({"reason": "eligible", "max_risk": "low", "enabled": true}))
    );
    assert!(
        store
            .fleet_work_items("T2")
            .expect("items")
            .iter()
            .all(|item| item.priority == 25)
    );
}

#[test]
fn approval_records_why_auto_execution_was_skipped() {
    let (_store, service) = open_service("auto_blocked", DispatchConfig::default());
    let top = service
        .create(request("reprioritize_task", json!({"task_id": "T2", "priority": "P0"})))
        .expect("create");
    let approval = service.approve(&top.id, "reviewer", None).expect("approve");
    assert!(!approval.eligible);
    assert!(approval.auto_execution.is_none());
    assert_eq!(approval.proposal.status, ProposalStatus::Approved);
    assert_eq!(
        approval.proposal.auto_execute_policy.as_ref().map(|p| p["reason"].clone()),
        Some(json!("risk_blocked"))
    );

    let reassign = service
        .create(request("reassign_task", json!({"task_id": "T1", "to_agent": "A2"})))
        .expect("create");
    let approval = service.approve(&reassign.id, "reviewer", None).expect("approve");
    assert_eq!(
        approval.proposal.auto_execute_policy.as_ref().map(|p| p["reason"].clone()),
        Some(json!("unsupported_type"))
    );

    let (_store, locked) = open_service(
        "auto_locked",
        DispatchConfig {
            deployment_mode: DeploymentMode::Locked,
            ..DispatchConfig::default()
        },
    );
    let low = locked
        .create(request("reprioritize_task", json!({"task_id": "T2", "priority": "P3"})))
        .expect("create");
    let approval = locked.approve(&low.id, "reviewer", None).expect("approve");
    assert!(!approval.eligible);
    assert_eq!(
        approval.proposal.auto_execute_policy,
        Some(json!({"reason": "auto_execute_disabled", "max_risk": "low", "enabled": false}))
    );
}

#[test]
fn auto_execution_failure_keeps_the_approval() {
    let store = Arc::new(SqliteStore::open(temp_dir("auto_schema_missing")).expect("open store"));
    let service =
        DispatchService::new(Arc::clone(&store), DispatchConfig::default()).expect("service");
    let proposal = service
        .create(request("reprioritize_task", json!({"task_id": "T2", "priority": 10})))
        .expect("create");

    let approval = service.approve(&proposal.id, "reviewer", None).expect("approve");
    let outcome = approval
        .auto_execution
        .expect("attempted")
        .expect("handler failure is an outcome");
    assert_eq!(outcome.state, ExecutionState::Failed);
    assert_eq!(outcome.reason_code.as_deref(), Some("SCHEMA_MISSING"));
    assert_eq!(approval.proposal.status, ProposalStatus::Failed);
    assert!(approval.proposal.reviewed_by.is_some());
}

#[test]
fn skipping_approval_is_an_invalid_transition() {
    let (store, service) = open_service("skip_approval", DispatchConfig::default());
    let proposal = service
        .create(request("pause_agent", json!({"agent_id": "AG1"})))
        .expect("create");

    let err = store
        .proposal_transition(ao_storage::ProposalTransitionRequest::new(
            &proposal.id,
            ProposalStatus::Executed,
            "operator",
        ))
        .expect_err("pending -> executed");
    assert_eq!(err.code(), "INVALID_STATE");
    assert_eq!(
        service.get_proposal(&proposal.id).expect("get").status,
        ProposalStatus::Pending
    );

    let rejected = service
        .reject(&proposal.id, "reviewer", Some("too risky".to_string()))
        .expect("reject");
    assert_eq!(rejected.status, ProposalStatus::Rejected);
    assert_eq!(rejected.review_comment.as_deref(), Some("too risky"));
    for err in [
        service.approve(&proposal.id, "reviewer", None).map(|_| ()),
        service.cancel_proposal(&proposal.id, "planner", None).map(|_| ()),
        service.execute(&proposal.id, "operator").map(|_| ()),
    ] {
        assert_eq!(err.expect_err("rejected is terminal").code(), "INVALID_STATE");
    }
}

#[test]
fn ledger_replays_every_decision() {
    let (_store, service) = open_service("audit_replay", DispatchConfig::default());
    let proposal = service
        .create(request("pause_agent", json!({"agent_id": "AG5"})))
        .expect("create");
    service.approve(&proposal.id, "reviewer", None).expect("approve");
    let job_id = service
        .execute(&proposal.id, "operator")
        .expect("execute")
        .job_id()
        .expect("job")
        .to_string();
    service.rollback(&job_id, "operator", None).expect("rollback");

    let events = service.audit_for_proposal(&proposal.id).expect("audit");
    let trail: Vec<(&str, Value, Value)> = events
        .iter()
        .map(|event| {
            (
                event.action.as_str(),
                event.details["from"].clone(),
                event.details["to"].clone(),
            )
        })
        .collect();
    assert_eq!(
        trail,
        vec![
            ("dispatch_job_rollback_succeeded", json!("succeeded"), json!("rolled_back")),
            ("dispatch_job_rollback_started", Value::Null, json!("running")),
            ("dispatch_proposal_executed", json!("approved"), json!("executed")),
            ("dispatch_job_succeeded", json!("running"), json!("succeeded")),
            ("dispatch_job_started", json!("queued"), json!("running")),
            ("dispatch_job_created", Value::Null, json!("queued")),
            ("approve", json!("pending"), json!("approved")),
            ("create", Value::Null, json!("pending")),
        ]
    );
    assert!(events.iter().all(|event| !event.actor.is_empty()));

    let err = service.audit_for_proposal("PROP-4040").expect_err("unknown");
    assert_eq!(err.code(), "NOT_FOUND");
}
