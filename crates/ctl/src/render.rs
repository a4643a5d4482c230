#![forbid(unsafe_code)]

use ao_dispatch::{ApprovalOutcome, ExecutionOutcome, RollbackOutcome};
use ao_storage::{
    AuditEventRow, JobRow, JobStatusCounts, ProposalRow, RollbackJobRow, ts_ms_to_rfc3339,
};
use serde_json::{Value, json};

fn ts(ms: i64) -> Value {
    Value::String(ts_ms_to_rfc3339(ms))
}

fn opt_ts(ms: Option<i64>) -> Value {
    ms.map(ts).unwrap_or(Value::Null)
}

pub(crate) fn error_json(code: &str, message: &str) -> Value {
    json!({"error": {"code": code, "message": message}})
}

pub(crate) fn proposal_json(row: &ProposalRow) -> Value {
    json!({
        "id": row.id,
        "revision": row.revision,
        "proposal_type": row.proposal_type().as_str(),
        "payload": row.payload(),
        "status": row.status.as_str(),
        "risk_level": row.risk_level.as_str(),
        "scope": row.scope.to_json(),
        "source": row.source,
        "reason": row.reason,
        "evidence_refs": row.evidence_refs,
        "requested_by": row.requested_by,
        "requested_at": ts(row.requested_at_ms),
        "reviewed_by": row.reviewed_by,
        "reviewed_at": opt_ts(row.reviewed_at_ms),
        "review_comment": row.review_comment,
        "execution_ref": row.execution_ref,
        "auto_execute_eligible": row.auto_execute_eligible,
        "auto_execute_policy": row.auto_execute_policy,
        "approved_then_auto_execute": row.approved_then_auto_execute,
        "created_at": ts(row.created_at_ms),
        "updated_at": ts(row.updated_at_ms),
        "updated_at_ms": row.updated_at_ms,
    })
}

pub(crate) fn job_json(row: &JobRow) -> Value {
    json!({
        "id": row.id,
        "proposal_id": row.proposal_id,
        "status": row.status.as_str(),
        "idempotency_key": row.idempotency_key,
        "resource_key": row.resource_key,
        "execution_mode": row.execution_mode.as_str(),
        "attempt": row.attempt,
        "max_attempts": row.max_attempts,
        "started_at": opt_ts(row.started_at_ms),
        "ended_at": opt_ts(row.ended_at_ms),
        "last_error_code": row.last_error_code,
        "last_error_message": row.last_error_message,
        "evidence": row.evidence,
        "created_at": ts(row.created_at_ms),
        "updated_at": ts(row.updated_at_ms),
    })
}

pub(crate) fn rollback_json(row: &RollbackJobRow) -> Value {
    json!({
        "id": row.id,
        "job_id": row.job_id,
        "proposal_id": row.proposal_id,
        "resource_key": row.resource_key,
        "status": row.status.as_str(),
        "reason": row.reason,
        "started_at": ts(row.started_at_ms),
        "ended_at": opt_ts(row.ended_at_ms),
        "last_error_code": row.last_error_code,
        "last_error_message": row.last_error_message,
        "evidence": row.evidence,
        "created_at": ts(row.created_at_ms),
        "updated_at": ts(row.updated_at_ms),
    })
}

pub(crate) fn audit_json(row: &AuditEventRow) -> Value {
    json!({
        "seq": row.seq,
        "event_id": row.event_id,
        "proposal_id": row.proposal_id,
        "action": row.action,
        "actor": row.actor,
        "at": ts(row.at_ms),
        "details": row.details,
    })
}

pub(crate) fn outcome_json(outcome: &ExecutionOutcome) -> Value {
    json!({
        "execution_state": outcome.state.as_str(),
        "job": outcome.job.as_ref().map(job_json),
        "proposal_status": outcome.proposal_status.map(|status| status.as_str()),
        "reason_code": outcome.reason_code,
        "message": outcome.message,
    })
}

pub(crate) fn rollback_outcome_json(outcome: &RollbackOutcome) -> Value {
    json!({
        "rollback_state": outcome.state.as_str(),
        "rollback": outcome.rollback.as_ref().map(rollback_json),
        "job": job_json(&outcome.job),
        "reason_code": outcome.reason_code,
        "message": outcome.message,
    })
}

pub(crate) fn approval_json(outcome: &ApprovalOutcome) -> Value {
    let execution = match &outcome.auto_execution {
        None => Value::Null,
        Some(Ok(execution)) => outcome_json(execution),
        Some(Err(err)) => error_json(err.code(), &err.to_string()),
    };
    json!({
        "proposal": proposal_json(&outcome.proposal),
        "auto_execute": {
            "eligible": outcome.eligible,
            "execution": execution,
        },
    })
}

pub(crate) fn counts_json(counts: &JobStatusCounts) -> Value {
    json!({
        "queued": counts.queued,
        "running": counts.running,
        "succeeded": counts.succeeded,
        "failed": counts.failed,
        "cancelled": counts.cancelled,
        "rolled_back": counts.rolled_back,
        "total": counts.total(),
    })
}
