#![forbid(unsafe_code)]

use super::audit::{
    AUDIT_JOB_CANCELLED, AUDIT_JOB_CREATED, AUDIT_JOB_FAILED, AUDIT_JOB_OUTCOME_UNKNOWN,
    AUDIT_JOB_STARTED, AUDIT_JOB_SUCCEEDED, append_audit_event_tx,
};
use super::proposals::{
    ProposalStatusColumns, load_proposal_tx, proposal_audit_action, set_execution_ref_tx,
    update_proposal_status_tx,
};
use super::rollback_jobs::running_rollback_for_resource;
use super::support::{
    ConstraintKind, classify_constraint_violation, decode_optional_json_column, encode_json,
    in_savepoint, next_counter_tx, next_updated_at_ms, now_ms,
};
use super::*;
use ao_core::{
    ExecutionMode, JobId, JobStatus, ProposalStatus, can_transition, validate_job_transition,
};
use rusqlite::params;
use serde_json::{Value, json};
use tracing::{info, warn};

const JOB_COLUMNS: &str = "id, proposal_id, status, idempotency_key, resource_key, execution_mode, \
     attempt, max_attempts, started_at_ms, ended_at_ms, last_error_code, last_error_message, \
     evidence_json, created_at_ms, updated_at_ms";
const MAX_KEY_LEN: usize = 256;
const MAX_ERROR_CODE_LEN: usize = 64;
const MAX_ERROR_MESSAGE_LEN: usize = 2_000;

impl SqliteStore {
    /// Inserts a `queued` job. Uniqueness of the idempotency key and of the
    /// active resource key is left to the indexes; their violations come back
    /// as `Existing` / `ResourceBusy` instead of errors.
    pub fn job_create(&self, request: JobCreateRequest) -> Result<JobCreateResult, StoreError> {
        let actor = normalize_actor(&request.actor)?;
        let idempotency_key = normalize_required(
            &request.idempotency_key,
            MAX_KEY_LEN,
            "idempotency_key must not be empty",
            "idempotency_key is too long",
        )?;
        let resource_key = normalize_required(
            &request.resource_key,
            MAX_KEY_LEN,
            "resource_key must not be empty",
            "resource_key is too long",
        )?;
        if request.max_attempts < 1 {
            return Err(StoreError::InvalidInput("max_attempts must be at least 1"));
        }
        let proposal_id = request.proposal_id.trim().to_string();
        let execution_mode = request.execution_mode;
        let max_attempts = request.max_attempts;

        let result = self.write(move |tx| {
            // A key that already has a job wins over the proposal's current status.
            if let Some(existing) = job_by_idempotency_key(tx, &idempotency_key)? {
                return Ok(JobCreateResult::Existing(existing));
            }
            let proposal = load_proposal_tx(tx, &proposal_id)?.ok_or(StoreError::UnknownId)?;
            if proposal.status != ProposalStatus::Approved {
                return Err(StoreError::StateConflict {
                    entity: "proposal",
                    id: proposal.id,
                    status: proposal.status.as_str().to_string(),
                    expected: ProposalStatus::Approved.as_str(),
                });
            }
            if let Some(rollback) = running_rollback_for_resource(tx, &resource_key)? {
                return Ok(JobCreateResult::RollbackInProgress(rollback));
            }

            let inserted = in_savepoint(tx, "job_insert", |tx| {
                let seq = next_counter_tx(tx, "job")?;
                let id = JobId::from_seq(seq).into_string();
                let now = now_ms();
                tx.execute(
                    "INSERT INTO jobs(id, proposal_id, status, idempotency_key, resource_key, \
                     execution_mode, attempt, max_attempts, created_at_ms, updated_at_ms) \
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, 0, ?7, ?8, ?8)",
                    params![
                        id,
                        proposal_id,
                        JobStatus::Queued.as_str(),
                        idempotency_key,
                        resource_key,
                        execution_mode.as_str(),
                        max_attempts,
                        now,
                    ],
                )?;
                Ok::<_, StoreError>(id)
            })?;

            let job_id = match inserted {
                Ok(job_id) => job_id,
                Err(StoreError::Sql(err)) => {
                    return match classify_constraint_violation(&err) {
                        Some(ConstraintKind::IdempotencyKey) => {
                            match job_by_idempotency_key(tx, &idempotency_key)? {
                                Some(existing) => Ok(JobCreateResult::Existing(existing)),
                                None => Err(StoreError::Sql(err)),
                            }
                        }
                        Some(ConstraintKind::ResourceKey) => {
                            match active_job_for_resource(tx, &resource_key)? {
                                Some(active) => Ok(JobCreateResult::ResourceBusy(active)),
                                None => Err(StoreError::Sql(err)),
                            }
                        }
                        _ => Err(StoreError::Sql(err)),
                    };
                }
                Err(err) => return Err(err),
            };

            set_execution_ref_tx(tx, &proposal_id, &job_id)?;
            append_audit_event_tx(
                tx,
                &proposal_id,
                AUDIT_JOB_CREATED,
                &actor,
                json!({
                    "entity": "job",
                    "job_id": job_id,
                    "from": Value::Null,
                    "to": JobStatus::Queued.as_str(),
                    "idempotency_key": idempotency_key,
                    "resource_key": resource_key,
                    "execution_mode": execution_mode.as_str(),
                    "max_attempts": max_attempts,
                }),
            );

            let job = load_job(tx, &job_id)?.ok_or(StoreError::UnknownId)?;
            Ok(JobCreateResult::Created(job))
        })?;

        match &result {
            JobCreateResult::Created(job) => info!(
                job_id = job.id.as_str(),
                proposal_id = job.proposal_id.as_str(),
                resource_key = job.resource_key.as_str(),
                "job created"
            ),
            JobCreateResult::Existing(job) => info!(
                job_id = job.id.as_str(),
                status = job.status.as_str(),
                "job already exists for idempotency key"
            ),
            JobCreateResult::ResourceBusy(job) => warn!(
                job_id = job.id.as_str(),
                resource_key = job.resource_key.as_str(),
                "resource already has an active job"
            ),
            JobCreateResult::RollbackInProgress(rollback) => warn!(
                rollback_job_id = rollback.id.as_str(),
                resource_key = rollback.resource_key.as_str(),
                "resource is being rolled back"
            ),
        }
        Ok(result)
    }

    /// `queued|failed -> running`, consuming one attempt.
    pub fn job_start(&self, job_id: &str, actor: &str) -> Result<JobStartResult, StoreError> {
        let actor = normalize_actor(actor)?;
        let job_id = job_id.trim().to_string();

        let result = self.write(move |tx| {
            let job = load_job(tx, &job_id)?.ok_or(StoreError::UnknownId)?;
            validate_job_transition(job.status, JobStatus::Running, None)?;
            if job.attempt >= job.max_attempts {
                return Err(StoreError::AttemptsExhausted {
                    attempt: job.attempt,
                    max_attempts: job.max_attempts,
                });
            }
            if let Some(rollback) = running_rollback_for_resource(tx, &job.resource_key)? {
                return Ok(JobStartResult::RollbackInProgress(rollback));
            }

            let now = now_ms();
            let update = tx.execute(
                "UPDATE jobs SET status=?3, attempt=attempt+1, started_at_ms=?4, ended_at_ms=NULL, \
                 updated_at_ms=?5, last_error_code=NULL, last_error_message=NULL \
                 WHERE id=?1 AND status=?2",
                params![
                    job.id,
                    job.status.as_str(),
                    JobStatus::Running.as_str(),
                    now,
                    next_updated_at_ms(job.updated_at_ms),
                ],
            );
            let changed = match update {
                Ok(changed) => changed,
                Err(err) => {
                    if classify_constraint_violation(&err) == Some(ConstraintKind::ResourceKey) {
                        if let Some(active) = active_job_for_resource(tx, &job.resource_key)? {
                            return Ok(JobStartResult::ResourceBusy(active));
                        }
                    }
                    return Err(err.into());
                }
            };
            if changed == 0 {
                return Err(job_state_conflict(&job, "queued or failed"));
            }

            append_audit_event_tx(
                tx,
                &job.proposal_id,
                AUDIT_JOB_STARTED,
                &actor,
                json!({
                    "entity": "job",
                    "job_id": job.id,
                    "from": job.status.as_str(),
                    "to": JobStatus::Running.as_str(),
                    "attempt": job.attempt + 1,
                    "max_attempts": job.max_attempts,
                    "retry": job.status == JobStatus::Failed,
                }),
            );

            let started = load_job(tx, &job.id)?.ok_or(StoreError::UnknownId)?;
            Ok(JobStartResult::Started(started))
        })?;

        if let JobStartResult::Started(job) = &result {
            info!(
                job_id = job.id.as_str(),
                attempt = job.attempt,
                max_attempts = job.max_attempts,
                "job started"
            );
        }
        Ok(result)
    }

    /// `running -> succeeded|failed`, then moves the owning proposal to
    /// `executed|failed` when its transition table allows it.
    pub fn job_finish(&self, request: JobFinishRequest) -> Result<JobFinishResult, StoreError> {
        let actor = normalize_actor(&request.actor)?;
        let job_id = request.job_id.trim().to_string();
        let reason_code = clip(request.reason_code, MAX_ERROR_CODE_LEN);
        let message = clip(request.message, MAX_ERROR_MESSAGE_LEN);
        let success = request.success;
        let evidence = request.evidence;

        let result = self.write(move |tx| {
            let job = load_job(tx, &job_id)?.ok_or(StoreError::UnknownId)?;
            let target = if success {
                JobStatus::Succeeded
            } else {
                JobStatus::Failed
            };
            validate_job_transition(job.status, target, None)?;

            let (error_code, error_message) = if success {
                (None, None)
            } else {
                (reason_code.clone(), message.clone())
            };
            let now = now_ms();
            let changed = tx.execute(
                "UPDATE jobs SET status=?3, ended_at_ms=?4, updated_at_ms=?5, last_error_code=?6, \
                 last_error_message=?7, evidence_json=?8 \
                 WHERE id=?1 AND status=?2",
                params![
                    job.id,
                    job.status.as_str(),
                    target.as_str(),
                    now,
                    next_updated_at_ms(job.updated_at_ms),
                    error_code,
                    error_message,
                    encode_json(&evidence),
                ],
            )?;
            if changed == 0 {
                return Err(job_state_conflict(&job, "running"));
            }

            let proposal = load_proposal_tx(tx, &job.proposal_id)?.ok_or(StoreError::UnknownId)?;
            let proposal_target = if success {
                ProposalStatus::Executed
            } else {
                ProposalStatus::Failed
            };
            let proposal_transitioned = can_transition(proposal.status, proposal_target);

            append_audit_event_tx(
                tx,
                &job.proposal_id,
                if success {
                    AUDIT_JOB_SUCCEEDED
                } else {
                    AUDIT_JOB_FAILED
                },
                &actor,
                json!({
                    "entity": "job",
                    "job_id": job.id,
                    "from": job.status.as_str(),
                    "to": target.as_str(),
                    "attempt": job.attempt,
                    "max_attempts": job.max_attempts,
                    "reason_code": reason_code,
                    "message": message,
                    "evidence": evidence,
                    "proposal_transition": {
                        "from": proposal.status.as_str(),
                        "to": proposal_target.as_str(),
                        "applied": proposal_transitioned,
                    },
                }),
            );

            let proposal_status = if proposal_transitioned {
                update_proposal_status_tx(
                    tx,
                    &proposal,
                    proposal_target,
                    ProposalStatusColumns::unchanged(&proposal),
                )?;
                append_audit_event_tx(
                    tx,
                    &proposal.id,
                    proposal_audit_action(proposal_target),
                    &actor,
                    json!({
                        "entity": "proposal",
                        "from": proposal.status.as_str(),
                        "to": proposal_target.as_str(),
                        "job_id": job.id,
                        "reason_code": reason_code,
                    }),
                );
                proposal_target
            } else {
                warn!(
                    proposal_id = proposal.id.as_str(),
                    status = proposal.status.as_str(),
                    target = proposal_target.as_str(),
                    "proposal already terminal; keeping its status"
                );
                proposal.status
            };

            let job = load_job(tx, &job.id)?.ok_or(StoreError::UnknownId)?;
            Ok(JobFinishResult {
                job,
                proposal_status,
                proposal_transitioned,
            })
        })?;

        info!(
            job_id = result.job.id.as_str(),
            status = result.job.status.as_str(),
            attempt = result.job.attempt,
            proposal_status = result.proposal_status.as_str(),
            "job finished"
        );
        Ok(result)
    }

    /// Leaves a running job `running` but records that its outcome is unknown,
    /// together with the before-state needed to settle it later.
    pub fn job_mark_outcome_unknown(
        &self,
        job_id: &str,
        actor: &str,
        evidence: Value,
        message: Option<String>,
    ) -> Result<JobRow, StoreError> {
        let actor = normalize_actor(actor)?;
        let job_id = job_id.trim().to_string();
        let message = clip(message, MAX_ERROR_MESSAGE_LEN);

        let job = self.write(move |tx| {
            let job = load_job(tx, &job_id)?.ok_or(StoreError::UnknownId)?;
            let changed = tx.execute(
                "UPDATE jobs SET last_error_code=?3, last_error_message=?4, evidence_json=?5, \
                 updated_at_ms=?6 \
                 WHERE id=?1 AND status=?2",
                params![
                    job.id,
                    JobStatus::Running.as_str(),
                    JOB_OUTCOME_UNKNOWN,
                    message,
                    encode_json(&evidence),
                    next_updated_at_ms(job.updated_at_ms),
                ],
            )?;
            if changed == 0 {
                return Err(job_state_conflict(&job, "running"));
            }

            append_audit_event_tx(
                tx,
                &job.proposal_id,
                AUDIT_JOB_OUTCOME_UNKNOWN,
                &actor,
                json!({
                    "entity": "job",
                    "job_id": job.id,
                    "from": JobStatus::Running.as_str(),
                    "to": JobStatus::Running.as_str(),
                    "attempt": job.attempt,
                    "reason_code": JOB_OUTCOME_UNKNOWN,
                    "message": message,
                    "evidence": evidence,
                }),
            );
            load_job(tx, &job.id)?.ok_or(StoreError::UnknownId)
        })?;

        warn!(job_id = job.id.as_str(), "job outcome unknown; left running");
        Ok(job)
    }

    /// `queued -> cancelled`. Running jobs are not preemptible.
    pub fn job_cancel(
        &self,
        job_id: &str,
        actor: &str,
        reason: Option<String>,
    ) -> Result<JobRow, StoreError> {
        let actor = normalize_actor(actor)?;
        let reason = normalize_optional_text(reason, MAX_ERROR_MESSAGE_LEN, "reason is too long")?;
        let job_id = job_id.trim().to_string();

        let job = self.write(move |tx| {
            let job = load_job(tx, &job_id)?.ok_or(StoreError::UnknownId)?;
            validate_job_transition(job.status, JobStatus::Cancelled, reason.as_deref())?;

            let now = now_ms();
            let changed = tx.execute(
                "UPDATE jobs SET status=?3, ended_at_ms=?4, updated_at_ms=?5, last_error_code=?6, \
                 last_error_message=?7 \
                 WHERE id=?1 AND status=?2",
                params![
                    job.id,
                    job.status.as_str(),
                    JobStatus::Cancelled.as_str(),
                    now,
                    next_updated_at_ms(job.updated_at_ms),
                    "CANCELLED",
                    reason,
                ],
            )?;
            if changed == 0 {
                return Err(job_state_conflict(&job, "queued"));
            }

            append_audit_event_tx(
                tx,
                &job.proposal_id,
                AUDIT_JOB_CANCELLED,
                &actor,
                json!({
                    "entity": "job",
                    "job_id": job.id,
                    "from": job.status.as_str(),
                    "to": JobStatus::Cancelled.as_str(),
                    "reason": reason,
                }),
            );
            load_job(tx, &job.id)?.ok_or(StoreError::UnknownId)
        })?;

        info!(job_id = job.id.as_str(), "job cancelled");
        Ok(job)
    }

    pub fn job_get(&self, job_id: &str) -> Result<Option<JobRow>, StoreError> {
        let job_id = job_id.trim().to_string();
        self.read(move |conn| load_job(conn, &job_id))
    }

    pub fn job_by_idempotency_key(&self, key: &str) -> Result<Option<JobRow>, StoreError> {
        let key = key.trim().to_string();
        self.read(move |conn| job_by_idempotency_key(conn, &key))
    }

    /// Most recently created job of a proposal.
    pub fn job_latest_for_proposal(&self, proposal_id: &str) -> Result<Option<JobRow>, StoreError> {
        let proposal_id = proposal_id.trim().to_string();
        self.read(move |conn| {
            let sql = format!(
                "SELECT {JOB_COLUMNS} FROM jobs WHERE proposal_id=?1 \
                 ORDER BY created_at_ms DESC, id DESC LIMIT 1"
            );
            let mut stmt = conn.prepare(&sql)?;
            let mut rows = stmt.query(params![proposal_id])?;
            match rows.next()? {
                Some(row) => read_job_row(row).map(Some),
                None => Ok(None),
            }
        })
    }

    pub fn job_list(&self, request: ListJobsRequest) -> Result<Vec<JobRow>, StoreError> {
        let (limit, offset) = page_bounds(request.limit, request.offset)?;
        let status = request.status.map(JobStatus::as_str);
        let proposal_id = request
            .proposal_id
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty());

        self.read(move |conn| {
            let sql = format!(
                "SELECT {JOB_COLUMNS} FROM jobs \
                 WHERE (?1 IS NULL OR status=?1) AND (?2 IS NULL OR proposal_id=?2) \
                 ORDER BY created_at_ms DESC, id DESC \
                 LIMIT ?3 OFFSET ?4"
            );
            let mut stmt = conn.prepare(&sql)?;
            let mut rows = stmt.query(params![status, proposal_id, limit, offset])?;
            let mut out = Vec::new();
            while let Some(row) = rows.next()? {
                out.push(read_job_row(row)?);
            }
            Ok(out)
        })
    }

    pub fn job_status_counts(&self) -> Result<JobStatusCounts, StoreError> {
        self.read(|conn| {
            let mut stmt = conn.prepare("SELECT status, COUNT(*) FROM jobs GROUP BY status")?;
            let mut rows = stmt.query([])?;
            let mut counts = JobStatusCounts::default();
            while let Some(row) = rows.next()? {
                let status_raw: String = row.get(0)?;
                let count: i64 = row.get(1)?;
                if let Some(status) = JobStatus::parse(&status_raw) {
                    counts.add(status, u64::try_from(count).unwrap_or(0));
                }
            }
            Ok(counts)
        })
    }
}

pub(in crate::store) fn load_job(
    conn: &Connection,
    job_id: &str,
) -> Result<Option<JobRow>, StoreError> {
    let sql = format!("SELECT {JOB_COLUMNS} FROM jobs WHERE id=?1");
    let mut stmt = conn.prepare(&sql)?;
    let mut rows = stmt.query(params![job_id])?;
    match rows.next()? {
        Some(row) => read_job_row(row).map(Some),
        None => Ok(None),
    }
}

pub(in crate::store) fn active_job_for_resource(
    conn: &Connection,
    resource_key: &str,
) -> Result<Option<JobRow>, StoreError> {
    let sql = format!(
        "SELECT {JOB_COLUMNS} FROM jobs \
         WHERE resource_key=?1 AND status IN ('queued','running') \
         LIMIT 1"
    );
    let mut stmt = conn.prepare(&sql)?;
    let mut rows = stmt.query(params![resource_key])?;
    match rows.next()? {
        Some(row) => read_job_row(row).map(Some),
        None => Ok(None),
    }
}

fn job_by_idempotency_key(conn: &Connection, key: &str) -> Result<Option<JobRow>, StoreError> {
    let sql = format!("SELECT {JOB_COLUMNS} FROM jobs WHERE idempotency_key=?1");
    let mut stmt = conn.prepare(&sql)?;
    let mut rows = stmt.query(params![key])?;
    match rows.next()? {
        Some(row) => read_job_row(row).map(Some),
        None => Ok(None),
    }
}

fn read_job_row(row: &rusqlite::Row<'_>) -> Result<JobRow, StoreError> {
    let status_raw: String = row.get(2)?;
    let status = JobStatus::parse(&status_raw)
        .ok_or(StoreError::InvalidInput("stored job status is unknown"))?;
    let mode_raw: String = row.get(5)?;
    let execution_mode = ExecutionMode::parse(&mode_raw)
        .ok_or(StoreError::InvalidInput("stored execution mode is unknown"))?;

    Ok(JobRow {
        id: row.get(0)?,
        proposal_id: row.get(1)?,
        status,
        idempotency_key: row.get(3)?,
        resource_key: row.get(4)?,
        execution_mode,
        attempt: row.get(6)?,
        max_attempts: row.get(7)?,
        started_at_ms: row.get(8)?,
        ended_at_ms: row.get(9)?,
        last_error_code: row.get(10)?,
        last_error_message: row.get(11)?,
        evidence: decode_optional_json_column("evidence_json", row.get(12)?)?,
        created_at_ms: row.get(13)?,
        updated_at_ms: row.get(14)?,
    })
}

fn job_state_conflict(job: &JobRow, expected: &'static str) -> StoreError {
    StoreError::StateConflict {
        entity: "job",
        id: job.id.clone(),
        status: job.status.as_str().to_string(),
        expected,
    }
}

pub(in crate::store) fn clip(value: Option<String>, max_len: usize) -> Option<String> {
    value
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
        .map(|value| value.chars().take(max_len).collect())
}
