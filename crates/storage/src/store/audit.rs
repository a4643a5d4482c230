#![forbid(unsafe_code)]

use super::support::{decode_json_column, encode_json, in_savepoint, now_ms};
use super::*;
use ao_core::audit_event_id;
use rusqlite::params;
use serde_json::Value;
use tracing::error;

pub const AUDIT_CREATE: &str = "create";
pub const AUDIT_APPROVE: &str = "approve";
pub const AUDIT_REJECT: &str = "reject";
pub const AUDIT_CANCEL: &str = "cancel";
pub const AUDIT_PROPOSAL_EXECUTED: &str = "dispatch_proposal_executed";
pub const AUDIT_PROPOSAL_FAILED: &str = "dispatch_proposal_failed";
pub const AUDIT_JOB_CREATED: &str = "dispatch_job_created";
pub const AUDIT_JOB_STARTED: &str = "dispatch_job_started";
pub const AUDIT_JOB_SUCCEEDED: &str = "dispatch_job_succeeded";
pub const AUDIT_JOB_FAILED: &str = "dispatch_job_failed";
pub const AUDIT_JOB_CANCELLED: &str = "dispatch_job_cancelled";
pub const AUDIT_JOB_OUTCOME_UNKNOWN: &str = "dispatch_job_outcome_unknown";
pub const AUDIT_ROLLBACK_STARTED: &str = "dispatch_job_rollback_started";
pub const AUDIT_ROLLBACK_SUCCEEDED: &str = "dispatch_job_rollback_succeeded";
pub const AUDIT_ROLLBACK_FAILED: &str = "dispatch_job_rollback_failed";

impl SqliteStore {
    /// Ledger entries for one proposal, newest first. `limit == 0` returns
    /// the whole trail.
    pub fn audit_for_proposal(
        &self,
        proposal_id: &str,
        limit: usize,
    ) -> Result<Vec<AuditEventRow>, StoreError> {
        self.audit_page(AuditPageRequest {
            proposal_id: proposal_id.to_string(),
            before_seq: None,
            limit,
        })
    }

    /// One page of a proposal's ledger, newest first, strictly older than
    /// `before_seq` when set. Pass the last row's `seq` to fetch the next page.
    pub fn audit_page(&self, request: AuditPageRequest) -> Result<Vec<AuditEventRow>, StoreError> {
        let proposal_id = request.proposal_id.trim().to_string();
        // SQLite reads a negative LIMIT as "no limit".
        let limit = match request.limit {
            0 => -1,
            limit => to_sqlite_i64(limit)?,
        };
        let before_seq = request.before_seq;

        self.read(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT seq, proposal_id, action, actor, at_ms, details_json \
                 FROM audit_events \
                 WHERE proposal_id=?1 AND (?2 IS NULL OR seq < ?2) \
                 ORDER BY seq DESC \
                 LIMIT ?3",
            )?;
            let mut rows = stmt.query(params![proposal_id, before_seq, limit])?;
            let mut out = Vec::new();
            while let Some(row) = rows.next()? {
                let seq: i64 = row.get(0)?;
                let details_raw: String = row.get(5)?;
                out.push(AuditEventRow {
                    seq,
                    event_id: audit_event_id(seq),
                    proposal_id: row.get(1)?,
                    action: row.get(2)?,
                    actor: row.get(3)?,
                    at_ms: row.get(4)?,
                    details: decode_json_column("details_json", &details_raw)?,
                });
            }
            Ok(out)
        })
    }
}

/// Appends one ledger entry next to the state change it describes.
///
/// The insert runs in its own savepoint: if it fails, only the event is lost,
/// the enclosing state change still commits. Returns the event id on success.
pub(in crate::store) fn append_audit_event_tx(
    tx: &Transaction<'_>,
    proposal_id: &str,
    action: &str,
    actor: &str,
    details: Value,
) -> Option<String> {
    let inserted = in_savepoint(tx, "audit_event", |tx| {
        tx.execute(
            "INSERT INTO audit_events(proposal_id, action, actor, at_ms, details_json) \
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![proposal_id, action, actor, now_ms(), encode_json(&details)],
        )?;
        Ok::<_, StoreError>(tx.last_insert_rowid())
    });

    match inserted {
        Ok(Ok(seq)) => Some(audit_event_id(seq)),
        Ok(Err(err)) | Err(err) => {
            error!(
                proposal_id,
                action,
                actor,
                error = %err,
                "audit event write failed; state change kept"
            );
            None
        }
    }
}
