#![forbid(unsafe_code)]

use ao_core::{ProposalAction, ProposalScope, ProposalStatus, RiskLevel};
use ao_storage::{
    AutoExecuteDecision, ListProposalsRequest, ProposalCreateRequest, ProposalTransitionRequest,
    SqliteStore, StoreError,
};
use serde_json::json;
use std::path::PathBuf;

fn temp_dir(test_name: &str) -> PathBuf {
    let base = std::env::temp_dir();
    let pid = std::process::id();
    let nonce = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos();
    let dir = base.join(format!("ao_storage_{test_name}_{pid}_{nonce}"));
    std::fs::create_dir_all(&dir).expect("create temp dir");
    dir
}

fn create_request(proposal_type: &str, payload: serde_json::Value) -> ProposalCreateRequest {
    ProposalCreateRequest {
        source: "planner".to_string(),
        action: ProposalAction::parse(proposal_type, &payload).expect("valid payload"),
        requested_risk: None,
        scope: ProposalScope::Global,
        reason: "load balancing".to_string(),
        evidence_refs: vec!["metrics:queue_depth".to_string()],
        requested_by: "agent-7".to_string(),
    }
}

#[test]
fn create_stores_pending_proposal_with_computed_risk() {
    let store = SqliteStore::open(temp_dir("create_pending")).expect("open store");

    let mut request = create_request(
        "reassign_task",
        json!({"task_id": "T1", "to_agent": "A2", "from_agent": "A1"}),
    );
    request.requested_risk = Some(" low ".to_string());
    let proposal = store.proposal_create(request).expect("create proposal");

    assert_eq!(proposal.id, "PROP-0001");
    assert_eq!(proposal.status, ProposalStatus::Pending);
    assert_eq!(proposal.risk_level, RiskLevel::Medium);
    assert_eq!(proposal.revision, 1);
    assert_eq!(proposal.evidence_refs, vec!["metrics:queue_depth".to_string()]);
    assert_eq!(
        proposal.payload(),
        json!({"task_id": "T1", "to_agent": "A2", "from_agent": "A1"})
    );

    let events = store
        .audit_for_proposal(&proposal.id, 0)
        .expect("audit events");
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].action, "create");
    assert_eq!(events[0].details["risk_override"], json!(true));
    assert_eq!(events[0].details["requested_risk"], json!("low"));
    assert_eq!(events[0].details["risk_level"], json!("medium"));

    let second = store
        .proposal_create(create_request("pause_agent", json!({"agent_id": "AG1"})))
        .expect("create second");
    assert_eq!(second.id, "PROP-0002");
    assert_eq!(second.risk_level, RiskLevel::High);
}

#[test]
fn unknown_risk_claim_is_accepted_and_audited_as_override() {
    let store = SqliteStore::open(temp_dir("unknown_risk_claim")).expect("open store");

    let mut request = create_request("reprioritize_task", json!({"task_id": "T4", "priority": "P3"}));
    request.requested_risk = Some("severe".to_string());
    let proposal = store.proposal_create(request).expect("create proposal");
    assert_eq!(proposal.risk_level, RiskLevel::Low);

    let mut matching = create_request("reprioritize_task", json!({"task_id": "T5", "priority": "P3"}));
    matching.requested_risk = Some("LOW".to_string());
    let agreed = store.proposal_create(matching).expect("create matching");

    let events = store.audit_for_proposal(&proposal.id, 0).expect("audit");
    assert_eq!(events[0].details["risk_override"], json!(true));
    assert_eq!(events[0].details["requested_risk"], json!("severe"));
    assert_eq!(events[0].details["risk_level"], json!("low"));

    let events = store.audit_for_proposal(&agreed.id, 0).expect("audit");
    assert_eq!(events[0].details["risk_override"], json!(false));
    assert_eq!(events[0].details["requested_risk"], json!(null));
}

#[test]
fn skipping_approval_is_rejected_and_status_is_kept() {
    let store = SqliteStore::open(temp_dir("skip_approval")).expect("open store");
    let proposal = store
        .proposal_create(create_request(
            "reprioritize_task",
            json!({"task_id": "T2", "priority": "P3"}),
        ))
        .expect("create proposal");

    let err = store
        .proposal_transition(ProposalTransitionRequest::new(
            &proposal.id,
            ProposalStatus::Executed,
            "operator",
        ))
        .expect_err("pending -> executed must fail");
    match err {
        StoreError::InvalidTransition(err) => {
            assert_eq!(err.from, "pending");
            assert_eq!(err.to, "executed");
        }
        other => panic!("unexpected error: {other:?}"),
    }

    let stored = store
        .proposal_get(&proposal.id)
        .expect("get proposal")
        .expect("proposal exists");
    assert_eq!(stored.status, ProposalStatus::Pending);
    assert_eq!(stored.updated_at_ms, proposal.updated_at_ms);
    assert_eq!(
        store.audit_for_proposal(&proposal.id, 0).expect("audit").len(),
        1
    );
}

#[test]
fn approval_records_reviewer_and_auto_execute_policy() {
    let store = SqliteStore::open(temp_dir("approve_review")).expect("open store");
    let proposal = store
        .proposal_create(create_request(
            "reprioritize_task",
            json!({"task_id": "T2", "priority": "low"}),
        ))
        .expect("create proposal");

    let mut request =
        ProposalTransitionRequest::new(&proposal.id, ProposalStatus::Approved, "reviewer-1");
    request.comment = Some("  looks fine ".to_string());
    request.expected_revision = Some(proposal.revision);
    request.auto_execute = Some(AutoExecuteDecision {
        eligible: true,
        policy: json!({"reason": "eligible", "max_risk": "low", "enabled": true}),
        will_execute: true,
    });
    let review = store.proposal_transition(request).expect("approve");

    assert_eq!(review.previous_status, ProposalStatus::Pending);
    let approved = review.proposal;
    assert_eq!(approved.status, ProposalStatus::Approved);
    assert_eq!(approved.revision, 2);
    assert!(approved.updated_at_ms > proposal.updated_at_ms);
    assert_eq!(approved.reviewed_by.as_deref(), Some("reviewer-1"));
    assert_eq!(approved.review_comment.as_deref(), Some("looks fine"));
    assert!(approved.auto_execute_eligible);
    assert!(approved.approved_then_auto_execute);
    assert_eq!(
        approved.auto_execute_policy,
        Some(json!({"reason": "eligible", "max_risk": "low", "enabled": true}))
    );

    let events = store.audit_for_proposal(&proposal.id, 0).expect("audit");
    assert_eq!(events.len(), 2);
    assert_eq!(events[0].action, "approve");
    assert_eq!(events[0].details["from"], json!("pending"));
    assert_eq!(events[0].details["to"], json!("approved"));
    assert!(events[0].seq > events[1].seq);
}

#[test]
fn stale_revision_is_refused() {
    let store = SqliteStore::open(temp_dir("stale_revision")).expect("open store");
    let proposal = store
        .proposal_create(create_request("pause_agent", json!({"agent_id": "AG1"})))
        .expect("create proposal");

    let mut request =
        ProposalTransitionRequest::new(&proposal.id, ProposalStatus::Rejected, "reviewer-1");
    request.expected_revision = Some(proposal.revision + 5);
    let err = store.proposal_transition(request).expect_err("stale revision");
    assert_eq!(err.code(), "REVISION_MISMATCH");
}

#[test]
fn terminal_proposals_accept_no_transitions() {
    let store = SqliteStore::open(temp_dir("terminal_closed")).expect("open store");
    let proposal = store
        .proposal_create(create_request("resume_agent", json!({"agent_id": "AG1"})))
        .expect("create proposal");
    store
        .proposal_transition(ProposalTransitionRequest::new(
            &proposal.id,
            ProposalStatus::Rejected,
            "reviewer-1",
        ))
        .expect("reject");

    for target in ProposalStatus::ALL {
        let err = store
            .proposal_transition(ProposalTransitionRequest::new(
                &proposal.id,
                target,
                "reviewer-2",
            ))
            .expect_err("rejected is terminal");
        assert_eq!(err.code(), "INVALID_STATE");
    }
    let stored = store
        .proposal_get(&proposal.id)
        .expect("get")
        .expect("exists");
    assert_eq!(stored.status, ProposalStatus::Rejected);
}

#[test]
fn list_filters_by_status() {
    let store = SqliteStore::open(temp_dir("list_filter")).expect("open store");
    let first = store
        .proposal_create(create_request("pause_agent", json!({"agent_id": "AG1"})))
        .expect("create first");
    store
        .proposal_create(create_request("pause_agent", json!({"agent_id": "AG2"})))
        .expect("create second");
    store
        .proposal_transition(ProposalTransitionRequest::new(
            &first.id,
            ProposalStatus::Cancelled,
            "agent-7",
        ))
        .expect("cancel");

    let pending = store
        .proposal_list(ListProposalsRequest {
            status: Some(ProposalStatus::Pending),
            ..ListProposalsRequest::default()
        })
        .expect("list pending");
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].id, "PROP-0002");

    let all = store
        .proposal_list(ListProposalsRequest::default())
        .expect("list all");
    assert_eq!(all.len(), 2);
}

#[test]
fn unknown_proposal_is_reported() {
    let store = SqliteStore::open(temp_dir("unknown_proposal")).expect("open store");
    assert!(store.proposal_get("PROP-9999").expect("get").is_none());
    let err = store
        .proposal_transition(ProposalTransitionRequest::new(
            "PROP-9999",
            ProposalStatus::Approved,
            "reviewer-1",
        ))
        .expect_err("unknown id");
    assert!(matches!(err, StoreError::UnknownId));
}
