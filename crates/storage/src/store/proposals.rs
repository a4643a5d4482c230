#![forbid(unsafe_code)]

use super::audit::{
    AUDIT_APPROVE, AUDIT_CANCEL, AUDIT_CREATE, AUDIT_PROPOSAL_EXECUTED, AUDIT_PROPOSAL_FAILED,
    AUDIT_REJECT, append_audit_event_tx,
};
use super::support::{
    decode_json_column, decode_optional_json_column, encode_json, encode_optional_json,
    next_counter_tx, next_updated_at_ms, now_ms,
};
use super::*;
use ao_core::{
    ProposalAction, ProposalId, ProposalScope, ProposalStatus, RiskLevel, calculate_risk,
    validate_transition,
};
use rusqlite::params;
use serde_json::{Value, json};
use tracing::{info, warn};

const PROPOSAL_COLUMNS: &str = "id, revision, source, proposal_type, payload_json, status, risk_level, \
     scope_json, reason, evidence_refs_json, requested_by, requested_at_ms, reviewed_by, \
     reviewed_at_ms, review_comment, execution_ref, auto_execute_eligible, \
     auto_execute_policy_json, approved_then_auto_execute, created_at_ms, updated_at_ms";
const MAX_RISK_CLAIM_LEN: usize = 32;

impl SqliteStore {
    /// Stores a new `pending` proposal. The risk level is always the classifier's.
    pub fn proposal_create(
        &self,
        request: ProposalCreateRequest,
    ) -> Result<ProposalRow, StoreError> {
        let source = normalize_required(
            &request.source,
            MAX_ACTOR_LEN,
            "source must not be empty",
            "source is too long",
        )?;
        let requested_by = normalize_required(
            &request.requested_by,
            MAX_ACTOR_LEN,
            "requested_by must not be empty",
            "requested_by is too long",
        )?;
        let reason = request.reason.trim().to_string();
        if reason.chars().count() > MAX_REASON_LEN {
            return Err(StoreError::InvalidInput("reason is too long"));
        }
        let evidence_refs = normalize_evidence_refs(request.evidence_refs)?;

        let action = request.action;
        let scope = request.scope;
        let risk_level = calculate_risk(&action);
        // A claim that is not a known level is still an override: the
        // classifier decides, the raw claim goes to the ledger.
        let risk_override = request
            .requested_risk
            .map(|raw| raw.trim().chars().take(MAX_RISK_CLAIM_LEN).collect::<String>())
            .filter(|raw| !raw.is_empty())
            .filter(|raw| RiskLevel::parse(raw) != Some(risk_level));
        if let Some(requested) = risk_override.as_deref() {
            warn!(
                proposal_type = action.proposal_type().as_str(),
                requested,
                computed = risk_level.as_str(),
                "caller risk level overridden by classifier"
            );
        }

        let proposal = self.write(move |tx| {
            let seq = next_counter_tx(tx, "proposal")?;
            let id = ProposalId::from_seq(seq).into_string();
            let now = now_ms();
            tx.execute(
                "INSERT INTO proposals(id, revision, source, proposal_type, payload_json, status, \
                 risk_level, scope_json, reason, evidence_refs_json, requested_by, requested_at_ms, \
                 created_at_ms, updated_at_ms) \
                 VALUES (?1, 1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?11, ?11)",
                params![
                    id,
                    source,
                    action.proposal_type().as_str(),
                    encode_json(&action.payload_json()),
                    ProposalStatus::Pending.as_str(),
                    risk_level.as_str(),
                    encode_json(&scope.to_json()),
                    reason,
                    encode_json(&json!(evidence_refs)),
                    requested_by,
                    now,
                ],
            )?;

            append_audit_event_tx(
                tx,
                &id,
                AUDIT_CREATE,
                &requested_by,
                json!({
                    "entity": "proposal",
                    "from": Value::Null,
                    "to": ProposalStatus::Pending.as_str(),
                    "proposal_type": action.proposal_type().as_str(),
                    "risk_level": risk_level.as_str(),
                    "requested_risk": risk_override,
                    "risk_override": risk_override.is_some(),
                    "source": source,
                    "scope": scope.to_json(),
                    "evidence_refs": evidence_refs,
                }),
            );

            load_proposal_tx(tx, &id)?.ok_or(StoreError::UnknownId)
        })?;

        info!(
            proposal_id = proposal.id.as_str(),
            proposal_type = proposal.proposal_type().as_str(),
            risk = proposal.risk_level.as_str(),
            "proposal created"
        );
        Ok(proposal)
    }

    /// Moves a proposal along the transition table. Disallowed moves fail and
    /// leave the stored status untouched.
    pub fn proposal_transition(
        &self,
        request: ProposalTransitionRequest,
    ) -> Result<ProposalReviewResult, StoreError> {
        let actor = normalize_actor(&request.actor)?;
        let comment = normalize_optional_text(request.comment, MAX_COMMENT_LEN, "comment is too long")?;
        let reason = normalize_optional_text(request.reason, MAX_REASON_LEN, "reason is too long")?;
        let proposal_id = request.proposal_id.trim().to_string();
        let to = request.to;
        let expected_revision = request.expected_revision;
        let auto_execute = request.auto_execute;

        let result = self.write(move |tx| {
            let current = load_proposal_tx(tx, &proposal_id)?.ok_or(StoreError::UnknownId)?;
            if let Some(expected) = expected_revision {
                if expected != current.revision {
                    return Err(StoreError::RevisionMismatch {
                        expected,
                        actual: current.revision,
                    });
                }
            }
            if let Err(err) = validate_transition(current.status, to, reason.as_deref()) {
                warn!(proposal_id = proposal_id.as_str(), error = %err, "proposal transition rejected");
                return Err(err.into());
            }

            let is_review = matches!(
                to,
                ProposalStatus::Approved | ProposalStatus::Rejected | ProposalStatus::Cancelled
            );
            let now = now_ms();
            let (reviewed_by, reviewed_at_ms, review_comment) = if is_review {
                (Some(actor.clone()), Some(now), comment.clone())
            } else {
                (
                    current.reviewed_by.clone(),
                    current.reviewed_at_ms,
                    current.review_comment.clone(),
                )
            };
            let (eligible, policy, will_execute) = match &auto_execute {
                Some(decision) => (
                    decision.eligible,
                    Some(decision.policy.clone()),
                    decision.will_execute,
                ),
                None => (
                    current.auto_execute_eligible,
                    current.auto_execute_policy.clone(),
                    current.approved_then_auto_execute,
                ),
            };

            update_proposal_status_tx(
                tx,
                &current,
                to,
                ProposalStatusColumns {
                    reviewed_by: reviewed_by.as_deref(),
                    reviewed_at_ms,
                    review_comment: review_comment.as_deref(),
                    auto_execute_eligible: eligible,
                    auto_execute_policy: policy.as_ref(),
                    approved_then_auto_execute: will_execute,
                },
            )?;

            append_audit_event_tx(
                tx,
                &proposal_id,
                proposal_audit_action(to),
                &actor,
                json!({
                    "entity": "proposal",
                    "from": current.status.as_str(),
                    "to": to.as_str(),
                    "reason": reason,
                    "comment": comment,
                    "revision": current.revision + 1,
                    "auto_execute": auto_execute.as_ref().map(|decision| json!({
                        "eligible": decision.eligible,
                        "policy": decision.policy,
                        "will_execute": decision.will_execute,
                    })),
                }),
            );

            let proposal = load_proposal_tx(tx, &proposal_id)?.ok_or(StoreError::UnknownId)?;
            Ok(ProposalReviewResult {
                proposal,
                previous_status: current.status,
            })
        })?;

        info!(
            proposal_id = result.proposal.id.as_str(),
            from = result.previous_status.as_str(),
            to = result.proposal.status.as_str(),
            "proposal transitioned"
        );
        Ok(result)
    }

    pub fn proposal_get(&self, proposal_id: &str) -> Result<Option<ProposalRow>, StoreError> {
        let proposal_id = proposal_id.trim().to_string();
        self.read(move |conn| load_proposal_tx(conn, &proposal_id))
    }

    pub fn proposal_list(
        &self,
        request: ListProposalsRequest,
    ) -> Result<Vec<ProposalRow>, StoreError> {
        let (limit, offset) = page_bounds(request.limit, request.offset)?;
        let status = request.status.map(ProposalStatus::as_str);

        self.read(move |conn| {
            let sql = format!(
                "SELECT {PROPOSAL_COLUMNS} FROM proposals \
                 WHERE (?1 IS NULL OR status=?1) \
                 ORDER BY created_at_ms DESC, id DESC \
                 LIMIT ?2 OFFSET ?3"
            );
            let mut stmt = conn.prepare(&sql)?;
            let mut rows = stmt.query(params![status, limit, offset])?;
            let mut out = Vec::new();
            while let Some(row) = rows.next()? {
                out.push(read_proposal_row(row)?);
            }
            Ok(out)
        })
    }
}

pub(in crate::store) struct ProposalStatusColumns<'a> {
    pub(in crate::store) reviewed_by: Option<&'a str>,
    pub(in crate::store) reviewed_at_ms: Option<i64>,
    pub(in crate::store) review_comment: Option<&'a str>,
    pub(in crate::store) auto_execute_eligible: bool,
    pub(in crate::store) auto_execute_policy: Option<&'a Value>,
    pub(in crate::store) approved_then_auto_execute: bool,
}

impl<'a> ProposalStatusColumns<'a> {
    pub(in crate::store) fn unchanged(current: &'a ProposalRow) -> Self {
        Self {
            reviewed_by: current.reviewed_by.as_deref(),
            reviewed_at_ms: current.reviewed_at_ms,
            review_comment: current.review_comment.as_deref(),
            auto_execute_eligible: current.auto_execute_eligible,
            auto_execute_policy: current.auto_execute_policy.as_ref(),
            approved_then_auto_execute: current.approved_then_auto_execute,
        }
    }
}

/// Conditional on the status the caller read, so a concurrent change cannot
/// be overwritten.
pub(in crate::store) fn update_proposal_status_tx(
    conn: &Connection,
    current: &ProposalRow,
    to: ProposalStatus,
    columns: ProposalStatusColumns<'_>,
) -> Result<(), StoreError> {
    let changed = conn.execute(
        "UPDATE proposals SET status=?3, revision=revision+1, updated_at_ms=?4, \
         reviewed_by=?5, reviewed_at_ms=?6, review_comment=?7, auto_execute_eligible=?8, \
         auto_execute_policy_json=?9, approved_then_auto_execute=?10 \
         WHERE id=?1 AND status=?2",
        params![
            current.id,
            current.status.as_str(),
            to.as_str(),
            next_updated_at_ms(current.updated_at_ms),
            columns.reviewed_by,
            columns.reviewed_at_ms,
            columns.review_comment,
            columns.auto_execute_eligible,
            encode_optional_json(columns.auto_execute_policy),
            columns.approved_then_auto_execute,
        ],
    )?;
    if changed == 0 {
        return Err(StoreError::StateConflict {
            entity: "proposal",
            id: current.id.clone(),
            status: "changed concurrently".to_string(),
            expected: current.status.as_str(),
        });
    }
    Ok(())
}

pub(in crate::store) fn proposal_audit_action(to: ProposalStatus) -> &'static str {
    match to {
        ProposalStatus::Pending => AUDIT_CREATE,
        ProposalStatus::Approved => AUDIT_APPROVE,
        ProposalStatus::Rejected => AUDIT_REJECT,
        ProposalStatus::Cancelled => AUDIT_CANCEL,
        ProposalStatus::Executed => AUDIT_PROPOSAL_EXECUTED,
        ProposalStatus::Failed => AUDIT_PROPOSAL_FAILED,
    }
}

pub(in crate::store) fn load_proposal_tx(
    conn: &Connection,
    proposal_id: &str,
) -> Result<Option<ProposalRow>, StoreError> {
    let sql = format!("SELECT {PROPOSAL_COLUMNS} FROM proposals WHERE id=?1");
    let mut stmt = conn.prepare(&sql)?;
    let mut rows = stmt.query(params![proposal_id])?;
    match rows.next()? {
        Some(row) => read_proposal_row(row).map(Some),
        None => Ok(None),
    }
}

pub(in crate::store) fn set_execution_ref_tx(
    conn: &Connection,
    proposal_id: &str,
    job_id: &str,
) -> Result<(), StoreError> {
    conn.execute(
        "UPDATE proposals SET execution_ref=?2 WHERE id=?1",
        params![proposal_id, job_id],
    )?;
    Ok(())
}

fn read_proposal_row(row: &rusqlite::Row<'_>) -> Result<ProposalRow, StoreError> {
    let proposal_type: String = row.get(3)?;
    let payload_raw: String = row.get(4)?;
    let payload = decode_json_column("payload_json", &payload_raw)?;
    let action = ProposalAction::parse(&proposal_type, &payload)
        .map_err(|err| StoreError::InvalidPayload(err.to_string()))?;

    let status_raw: String = row.get(5)?;
    let status = ProposalStatus::parse(&status_raw)
        .ok_or(StoreError::InvalidInput("stored proposal status is unknown"))?;
    let risk_raw: String = row.get(6)?;
    let risk_level = RiskLevel::parse(&risk_raw)
        .ok_or(StoreError::InvalidInput("stored risk level is unknown"))?;

    let scope_raw: String = row.get(7)?;
    let scope_value = decode_json_column("scope_json", &scope_raw)?;
    let scope = ProposalScope::parse(Some(&scope_value)).map_err(StoreError::InvalidPayload)?;

    let evidence_raw: String = row.get(9)?;
    let evidence_refs = match decode_json_column("evidence_refs_json", &evidence_raw)? {
        Value::Array(items) => items
            .into_iter()
            .filter_map(|item| item.as_str().map(str::to_string))
            .collect(),
        _ => Vec::new(),
    };

    Ok(ProposalRow {
        id: row.get(0)?,
        revision: row.get(1)?,
        source: row.get(2)?,
        action,
        status,
        risk_level,
        scope,
        reason: row.get(8)?,
        evidence_refs,
        requested_by: row.get(10)?,
        requested_at_ms: row.get(11)?,
        reviewed_by: row.get(12)?,
        reviewed_at_ms: row.get(13)?,
        review_comment: row.get(14)?,
        execution_ref: row.get(15)?,
        auto_execute_eligible: row.get(16)?,
        auto_execute_policy: decode_optional_json_column(
            "auto_execute_policy_json",
            row.get(17)?,
        )?,
        approved_then_auto_execute: row.get(18)?,
        created_at_ms: row.get(19)?,
        updated_at_ms: row.get(20)?,
    })
}

fn normalize_evidence_refs(refs: Vec<String>) -> Result<Vec<String>, StoreError> {
    let refs: Vec<String> = refs
        .into_iter()
        .map(|item| item.trim().to_string())
        .filter(|item| !item.is_empty())
        .collect();
    if refs.len() > MAX_EVIDENCE_REFS {
        return Err(StoreError::InvalidInput("too many evidence_refs"));
    }
    if refs
        .iter()
        .any(|item| item.chars().count() > MAX_EVIDENCE_REF_LEN)
    {
        return Err(StoreError::InvalidInput("evidence_ref is too long"));
    }
    Ok(refs)
}
