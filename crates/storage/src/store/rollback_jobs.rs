#![forbid(unsafe_code)]

use super::audit::{
    AUDIT_ROLLBACK_FAILED, AUDIT_ROLLBACK_STARTED, AUDIT_ROLLBACK_SUCCEEDED,
    append_audit_event_tx,
};
use super::jobs::{active_job_for_resource, clip, load_job};
use super::support::{
    ConstraintKind, classify_constraint_violation, decode_optional_json_column, encode_json,
    in_savepoint, next_counter_tx, next_updated_at_ms, now_ms,
};
use super::*;
use ao_core::{JobStatus, RollbackJobId, RollbackStatus, validate_job_transition};
use rusqlite::params;
use serde_json::{Value, json};
use tracing::{info, warn};

const ROLLBACK_COLUMNS: &str = "id, job_id, proposal_id, resource_key, status, reason, started_at_ms, \
     ended_at_ms, last_error_code, last_error_message, evidence_json, created_at_ms, updated_at_ms";

impl SqliteStore {
    /// Opens a `running` rollback against a `succeeded` job.
    pub fn rollback_create(
        &self,
        request: RollbackCreateRequest,
    ) -> Result<RollbackStartResult, StoreError> {
        let actor = normalize_actor(&request.actor)?;
        let reason = normalize_optional_text(request.reason, MAX_REASON_LEN, "reason is too long")?;
        let job_id = request.job_id.trim().to_string();

        let result = self.write(move |tx| {
            let job = load_job(tx, &job_id)?.ok_or(StoreError::UnknownId)?;
            if job.status != JobStatus::Succeeded {
                return Err(StoreError::StateConflict {
                    entity: "job",
                    id: job.id,
                    status: job.status.as_str().to_string(),
                    expected: JobStatus::Succeeded.as_str(),
                });
            }
            if let Some(active) = active_job_for_resource(tx, &job.resource_key)? {
                return Ok(RollbackStartResult::ResourceBusy(active));
            }

            let inserted = in_savepoint(tx, "rollback_insert", |tx| {
                let seq = next_counter_tx(tx, "rollback_job")?;
                let id = RollbackJobId::from_seq(seq).into_string();
                let now = now_ms();
                tx.execute(
                    "INSERT INTO rollback_jobs(id, job_id, proposal_id, resource_key, status, reason, \
                     started_at_ms, created_at_ms, updated_at_ms) \
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?7, ?7)",
                    params![
                        id,
                        job.id,
                        job.proposal_id,
                        job.resource_key,
                        RollbackStatus::Running.as_str(),
                        reason,
                        now,
                    ],
                )?;
                Ok::<_, StoreError>(id)
            })?;

            let rollback_id = match inserted {
                Ok(rollback_id) => rollback_id,
                Err(StoreError::Sql(err))
                    if classify_constraint_violation(&err) == Some(ConstraintKind::RollbackJob) =>
                {
                    return match running_rollback_for_job_or_resource(tx, &job)? {
                        Some(running) => Ok(RollbackStartResult::AlreadyRunning(running)),
                        None => Err(StoreError::Sql(err)),
                    };
                }
                Err(err) => return Err(err),
            };

            append_audit_event_tx(
                tx,
                &job.proposal_id,
                AUDIT_ROLLBACK_STARTED,
                &actor,
                json!({
                    "entity": "rollback_job",
                    "rollback_job_id": rollback_id,
                    "job_id": job.id,
                    "from": Value::Null,
                    "to": RollbackStatus::Running.as_str(),
                    "reason": reason,
                }),
            );

            let rollback = load_rollback(tx, &rollback_id)?.ok_or(StoreError::UnknownId)?;
            Ok(RollbackStartResult::Started { rollback, job })
        })?;

        match &result {
            RollbackStartResult::Started { rollback, job } => info!(
                rollback_job_id = rollback.id.as_str(),
                job_id = job.id.as_str(),
                "rollback started"
            ),
            RollbackStartResult::AlreadyRunning(rollback) => warn!(
                rollback_job_id = rollback.id.as_str(),
                "rollback already running"
            ),
            RollbackStartResult::ResourceBusy(active) => warn!(
                job_id = active.id.as_str(),
                resource_key = active.resource_key.as_str(),
                "resource has an active job; rollback refused"
            ),
        }
        Ok(result)
    }

    /// Closes a running rollback. On success the job becomes `rolled_back`.
    pub fn rollback_finish(
        &self,
        request: RollbackFinishRequest,
    ) -> Result<RollbackFinishResult, StoreError> {
        let actor = normalize_actor(&request.actor)?;
        let rollback_id = request.rollback_job_id.trim().to_string();
        let reason_code = clip(request.reason_code, 64);
        let message = clip(request.message, 2_000);
        let success = request.success;
        let evidence = request.evidence;

        let result = self.write(move |tx| {
            let rollback = load_rollback(tx, &rollback_id)?.ok_or(StoreError::UnknownId)?;
            if rollback.status != RollbackStatus::Running {
                return Err(StoreError::StateConflict {
                    entity: "rollback_job",
                    id: rollback.id,
                    status: rollback.status.as_str().to_string(),
                    expected: RollbackStatus::Running.as_str(),
                });
            }
            let job = load_job(tx, &rollback.job_id)?.ok_or(StoreError::UnknownId)?;
            if success {
                validate_job_transition(job.status, JobStatus::RolledBack, None)?;
            }

            let target = if success {
                RollbackStatus::Succeeded
            } else {
                RollbackStatus::Failed
            };
            let (error_code, error_message) = if success {
                (None, None)
            } else {
                (reason_code.clone(), message.clone())
            };
            let now = now_ms();
            tx.execute(
                "UPDATE rollback_jobs SET status=?3, ended_at_ms=?4, updated_at_ms=?5, \
                 last_error_code=?6, last_error_message=?7, evidence_json=?8 \
                 WHERE id=?1 AND status=?2",
                params![
                    rollback.id,
                    RollbackStatus::Running.as_str(),
                    target.as_str(),
                    now,
                    next_updated_at_ms(rollback.updated_at_ms),
                    error_code,
                    error_message,
                    encode_json(&evidence),
                ],
            )?;

            let details = if success {
                let changed = tx.execute(
                    "UPDATE jobs SET status=?3, updated_at_ms=?4 WHERE id=?1 AND status=?2",
                    params![
                        job.id,
                        JobStatus::Succeeded.as_str(),
                        JobStatus::RolledBack.as_str(),
                        next_updated_at_ms(job.updated_at_ms),
                    ],
                )?;
                if changed == 0 {
                    return Err(StoreError::StateConflict {
                        entity: "job",
                        id: job.id,
                        status: job.status.as_str().to_string(),
                        expected: JobStatus::Succeeded.as_str(),
                    });
                }
                json!({
                    "entity": "job",
                    "job_id": job.id,
                    "from": job.status.as_str(),
                    "to": JobStatus::RolledBack.as_str(),
                    "rollback_job_id": rollback.id,
                    "rollback_status": target.as_str(),
                    "evidence": evidence,
                })
            } else {
                json!({
                    "entity": "rollback_job",
                    "rollback_job_id": rollback.id,
                    "job_id": job.id,
                    "from": RollbackStatus::Running.as_str(),
                    "to": target.as_str(),
                    "job_status": job.status.as_str(),
                    "reason_code": reason_code,
                    "message": message,
                    "evidence": evidence,
                })
            };
            append_audit_event_tx(
                tx,
                &rollback.proposal_id,
                if success {
                    AUDIT_ROLLBACK_SUCCEEDED
                } else {
                    AUDIT_ROLLBACK_FAILED
                },
                &actor,
                details,
            );

            let rollback = load_rollback(tx, &rollback.id)?.ok_or(StoreError::UnknownId)?;
            let job = load_job(tx, &job.id)?.ok_or(StoreError::UnknownId)?;
            Ok(RollbackFinishResult { rollback, job })
        })?;

        info!(
            rollback_job_id = result.rollback.id.as_str(),
            status = result.rollback.status.as_str(),
            job_status = result.job.status.as_str(),
            "rollback finished"
        );
        Ok(result)
    }

    pub fn rollback_get(&self, rollback_job_id: &str) -> Result<Option<RollbackJobRow>, StoreError> {
        let rollback_job_id = rollback_job_id.trim().to_string();
        self.read(move |conn| load_rollback(conn, &rollback_job_id))
    }

    pub fn rollback_list_for_job(&self, job_id: &str) -> Result<Vec<RollbackJobRow>, StoreError> {
        let job_id = job_id.trim().to_string();
        self.read(move |conn| {
            let sql = format!(
                "SELECT {ROLLBACK_COLUMNS} FROM rollback_jobs WHERE job_id=?1 \
                 ORDER BY created_at_ms DESC, id DESC"
            );
            let mut stmt = conn.prepare(&sql)?;
            let mut rows = stmt.query(params![job_id])?;
            let mut out = Vec::new();
            while let Some(row) = rows.next()? {
                out.push(read_rollback_row(row)?);
            }
            Ok(out)
        })
    }
}

pub(in crate::store) fn running_rollback_for_resource(
    conn: &Connection,
    resource_key: &str,
) -> Result<Option<RollbackJobRow>, StoreError> {
    let sql = format!(
        "SELECT {ROLLBACK_COLUMNS} FROM rollback_jobs \
         WHERE resource_key=?1 AND status='running' LIMIT 1"
    );
    let mut stmt = conn.prepare(&sql)?;
    let mut rows = stmt.query(params![resource_key])?;
    match rows.next()? {
        Some(row) => read_rollback_row(row).map(Some),
        None => Ok(None),
    }
}

fn running_rollback_for_job_or_resource(
    conn: &Connection,
    job: &JobRow,
) -> Result<Option<RollbackJobRow>, StoreError> {
    let sql = format!(
        "SELECT {ROLLBACK_COLUMNS} FROM rollback_jobs \
         WHERE (job_id=?1 OR resource_key=?2) AND status='running' \
         ORDER BY created_at_ms ASC LIMIT 1"
    );
    let mut stmt = conn.prepare(&sql)?;
    let mut rows = stmt.query(params![job.id, job.resource_key])?;
    match rows.next()? {
        Some(row) => read_rollback_row(row).map(Some),
        None => Ok(None),
    }
}

fn load_rollback(
    conn: &Connection,
    rollback_id: &str,
) -> Result<Option<RollbackJobRow>, StoreError> {
    let sql = format!("SELECT {ROLLBACK_COLUMNS} FROM rollback_jobs WHERE id=?1");
    let mut stmt = conn.prepare(&sql)?;
    let mut rows = stmt.query(params![rollback_id])?;
    match rows.next()? {
        Some(row) => read_rollback_row(row).map(Some),
        None => Ok(None),
    }
}

fn read_rollback_row(row: &rusqlite::Row<'_>) -> Result<RollbackJobRow, StoreError> {
    let status_raw: String = row.get(4)?;
    let status = RollbackStatus::parse(&status_raw)
        .ok_or(StoreError::InvalidInput("stored rollback status is unknown"))?;
    Ok(RollbackJobRow {
        id: row.get(0)?,
        job_id: row.get(1)?,
        proposal_id: row.get(2)?,
        resource_key: row.get(3)?,
        status,
        reason: row.get(5)?,
        started_at_ms: row.get(6)?,
        ended_at_ms: row.get(7)?,
        last_error_code: row.get(8)?,
        last_error_message: row.get(9)?,
        evidence: decode_optional_json_column("evidence_json", row.get(10)?)?,
        created_at_ms: row.get(11)?,
        updated_at_ms: row.get(12)?,
    })
}
