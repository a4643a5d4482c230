#![forbid(unsafe_code)]

use ao_core::{ExecutionMode, JobStatus, ProposalAction, ProposalScope, ProposalStatus};
use ao_storage::{
    JobCreateRequest, JobCreateResult, JobFinishRequest, JobRow, JobStartResult, ListJobsRequest,
    ProposalCreateRequest, ProposalRow, ProposalTransitionRequest, SqliteStore, StoreError,
};
use rusqlite::Connection;
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

fn approved(store: &SqliteStore, proposal_type: &str, payload: serde_json::Value) -> ProposalRow {
    let proposal = store
        .proposal_create(ProposalCreateRequest {
            source: "scheduler".to_string(),
            action: ProposalAction::parse(proposal_type, &payload).expect("valid payload"),
            requested_risk: None,
            scope: ProposalScope::Global,
            reason: String::new(),
            evidence_refs: Vec::new(),
            requested_by: "scheduler".to_string(),
        })
        .expect("create proposal");
    store
        .proposal_transition(ProposalTransitionRequest::new(
            &proposal.id,
            ProposalStatus::Approved,
            "reviewer",
        ))
        .expect("approve")
        .proposal
}

fn job_request(proposal: &ProposalRow, key: &str, resource: &str, max_attempts: i64) -> JobCreateRequest {
    JobCreateRequest {
        proposal_id: proposal.id.clone(),
        idempotency_key: key.to_string(),
        resource_key: resource.to_string(),
        execution_mode: ExecutionMode::Manual,
        max_attempts,
        actor: "operator".to_string(),
    }
}

fn created(result: JobCreateResult) -> JobRow {
    match result {
        JobCreateResult::Created(job) => job,
        other => panic!("expected a new job, got {other:?}"),
    }
}

fn started(result: JobStartResult) -> JobRow {
    match result {
        JobStartResult::Started(job) => job,
        other => panic!("expected job to start, got {other:?}"),
    }
}

fn finish(store: &SqliteStore, job_id: &str, success: bool) -> JobRow {
    store
        .job_finish(JobFinishRequest {
            job_id: job_id.to_string(),
            actor: "operator".to_string(),
            success,
            evidence: json!({"before": null, "after": null}),
            reason_code: (!success).then(|| "HANDLER_FAILED".to_string()),
            message: (!success).then(|| "boom".to_string()),
        })
        .expect("finish job")
        .job
}

#[test]
fn duplicate_idempotency_key_returns_existing_job() {
    let store = SqliteStore::open(temp_dir("dup_idempotency")).expect("open store");
    let proposal = approved(&store, "pause_agent", json!({"agent_id": "AG1"}));

    let job = created(
        store
            .job_create(job_request(&proposal, "key-1", "agent:AG1", 3))
            .expect("create job"),
    );
    assert_eq!(job.id, "JOB-0001");
    assert_eq!(job.status, JobStatus::Queued);
    assert_eq!(job.attempt, 0);

    match store
        .job_create(job_request(&proposal, "key-1", "agent:AG1", 3))
        .expect("second create")
    {
        JobCreateResult::Existing(existing) => assert_eq!(existing.id, job.id),
        other => panic!("expected existing job, got {other:?}"),
    }

    let jobs = store.job_list(ListJobsRequest::default()).expect("list jobs");
    assert_eq!(jobs.len(), 1);
    let stored = store
        .proposal_get(&proposal.id)
        .expect("get proposal")
        .expect("proposal exists");
    assert_eq!(stored.execution_ref.as_deref(), Some("JOB-0001"));
}

#[test]
fn active_resource_blocks_second_job_until_terminal() {
    let store = SqliteStore::open(temp_dir("resource_exclusive")).expect("open store");
    let first = approved(&store, "pause_agent", json!({"agent_id": "AG1"}));
    let second = approved(&store, "resume_agent", json!({"agent_id": "AG1"}));

    let job = created(
        store
            .job_create(job_request(&first, "key-a", "agent:AG1", 3))
            .expect("create first job"),
    );
    match store
        .job_create(job_request(&second, "key-b", "agent:AG1", 3))
        .expect("second create")
    {
        JobCreateResult::ResourceBusy(active) => assert_eq!(active.id, job.id),
        other => panic!("expected busy resource, got {other:?}"),
    }

    started(store.job_start(&job.id, "operator").expect("start"));
    finish(&store, &job.id, true);

    let next = created(
        store
            .job_create(job_request(&second, "key-b", "agent:AG1", 3))
            .expect("create after release"),
    );
    // A rejected insert does not consume a job id.
    assert_eq!(next.id, "JOB-0002");
}

#[test]
fn storage_index_rejects_raw_duplicate_active_jobs() {
    let storage_dir = temp_dir("raw_index");
    let store = SqliteStore::open(&storage_dir).expect("open store");
    let proposal = approved(&store, "pause_agent", json!({"agent_id": "AG9"}));
    created(
        store
            .job_create(job_request(&proposal, "key-raw", "agent:AG9", 3))
            .expect("create job"),
    );

    let conn = Connection::open(store.db_path()).expect("open raw connection");
    let err = conn
        .execute(
            "INSERT INTO jobs(id, proposal_id, status, idempotency_key, resource_key, \
             execution_mode, attempt, max_attempts, created_at_ms, updated_at_ms) \
             VALUES ('JOB-9999', ?1, 'running', 'other-key', 'agent:AG9', 'manual', 1, 3, 0, 0)",
            [&proposal.id],
        )
        .expect_err("partial unique index must reject");
    assert!(err.to_string().contains("UNIQUE"));
}

#[test]
fn finishing_moves_proposal_and_retry_keeps_identity() {
    let store = SqliteStore::open(temp_dir("finish_retry")).expect("open store");
    let proposal = approved(&store, "pause_agent", json!({"agent_id": "AG1"}));
    let job = created(
        store
            .job_create(job_request(&proposal, "key-r", "agent:AG1", 2))
            .expect("create job"),
    );

    let running = started(store.job_start(&job.id, "operator").expect("start"));
    assert_eq!(running.attempt, 1);
    assert_eq!(running.status, JobStatus::Running);

    let failed = finish(&store, &job.id, false);
    assert_eq!(failed.status, JobStatus::Failed);
    assert_eq!(failed.last_error_code.as_deref(), Some("HANDLER_FAILED"));
    let proposal_now = store
        .proposal_get(&proposal.id)
        .expect("get")
        .expect("exists");
    assert_eq!(proposal_now.status, ProposalStatus::Failed);

    let retried = started(store.job_start(&job.id, "operator").expect("retry"));
    assert_eq!(retried.id, job.id);
    assert_eq!(retried.attempt, 2);
    assert_eq!(retried.idempotency_key, job.idempotency_key);

    let result = store
        .job_finish(JobFinishRequest {
            job_id: job.id.clone(),
            actor: "operator".to_string(),
            success: true,
            evidence: json!({"before": {}, "after": {}}),
            reason_code: None,
            message: None,
        })
        .expect("finish retry");
    assert_eq!(result.job.status, JobStatus::Succeeded);
    assert_eq!(result.job.last_error_code, None);
    // The proposal is terminal; the job record is authoritative.
    assert!(!result.proposal_transitioned);
    assert_eq!(result.proposal_status, ProposalStatus::Failed);
}

#[test]
fn attempts_are_bounded() {
    let store = SqliteStore::open(temp_dir("attempt_bound")).expect("open store");
    let proposal = approved(&store, "pause_agent", json!({"agent_id": "AG1"}));
    let job = created(
        store
            .job_create(job_request(&proposal, "key-bound", "agent:AG1", 1))
            .expect("create job"),
    );
    started(store.job_start(&job.id, "operator").expect("start"));
    finish(&store, &job.id, false);

    for _ in 0..3 {
        let err = store
            .job_start(&job.id, "operator")
            .expect_err("attempts exhausted");
        match err {
            StoreError::AttemptsExhausted {
                attempt,
                max_attempts,
            } => {
                assert_eq!(attempt, 1);
                assert_eq!(max_attempts, 1);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }
    let stored = store.job_get(&job.id).expect("get").expect("exists");
    assert_eq!(stored.attempt, 1);
    assert_eq!(stored.status, JobStatus::Failed);
}

#[test]
fn only_queued_jobs_can_be_cancelled() {
    let store = SqliteStore::open(temp_dir("cancel_queued")).expect("open store");
    let proposal = approved(&store, "pause_agent", json!({"agent_id": "AG1"}));
    let job = created(
        store
            .job_create(job_request(&proposal, "key-c", "agent:AG1", 3))
            .expect("create job"),
    );

    let cancelled = store
        .job_cancel(&job.id, "operator", Some("maintenance window".to_string()))
        .expect("cancel");
    assert_eq!(cancelled.status, JobStatus::Cancelled);
    assert_eq!(cancelled.last_error_message.as_deref(), Some("maintenance window"));

    let err = store
        .job_cancel(&job.id, "operator", None)
        .expect_err("cancelled is terminal");
    assert_eq!(err.code(), "INVALID_STATE");
    let err = store
        .job_start(&job.id, "operator")
        .expect_err("cancelled job cannot start");
    assert_eq!(err.code(), "INVALID_STATE");

    let counts = store.job_status_counts().expect("counts");
    assert_eq!(counts.cancelled, 1);
    assert_eq!(counts.total(), 1);
}

#[test]
fn jobs_need_an_approved_proposal() {
    let store = SqliteStore::open(temp_dir("job_needs_approval")).expect("open store");
    let proposal = store
        .proposal_create(ProposalCreateRequest {
            source: "scheduler".to_string(),
            action: ProposalAction::parse("pause_agent", &json!({"agent_id": "AG1"}))
                .expect("valid payload"),
            requested_risk: None,
            scope: ProposalScope::Global,
            reason: String::new(),
            evidence_refs: Vec::new(),
            requested_by: "scheduler".to_string(),
        })
        .expect("create proposal");

    let err = store
        .job_create(job_request(&proposal, "key-p", "agent:AG1", 3))
        .expect_err("pending proposal");
    assert_eq!(err.code(), "INVALID_STATE");
}
