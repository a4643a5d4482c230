#![forbid(unsafe_code)]

use super::{
    ActionHandler, ApplyOutcome, REASON_INVALID_PAYLOAD, RevertOutcome, mismatched_action,
};
use ao_core::{AgentStatusChange, ProposalAction, ProposalType};
use ao_storage::{FleetAgentStatusRow, SqliteStore};
use serde_json::{Value, json};
use std::sync::Arc;

pub const AGENT_STATUS_ACTIVE: &str = "active";
pub const AGENT_STATUS_PAUSED: &str = "paused";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AgentStatusTarget {
    Paused,
    Active,
}

impl AgentStatusTarget {
    fn status(self) -> &'static str {
        match self {
            AgentStatusTarget::Paused => AGENT_STATUS_PAUSED,
            AgentStatusTarget::Active => AGENT_STATUS_ACTIVE,
        }
    }

    fn proposal_type(self) -> ProposalType {
        match self {
            AgentStatusTarget::Paused => ProposalType::PauseAgent,
            AgentStatusTarget::Active => ProposalType::ResumeAgent,
        }
    }
}

/// `pause_agent` / `resume_agent`. An agent without a status record counts
/// as active.
pub struct AgentStatusHandler {
    store: Arc<SqliteStore>,
    target: AgentStatusTarget,
}

impl AgentStatusHandler {
    pub fn new(store: Arc<SqliteStore>, target: AgentStatusTarget) -> Self {
        Self { store, target }
    }

    fn change<'a>(&self, action: &'a ProposalAction) -> Result<&'a AgentStatusChange, String> {
        match (self.target, action) {
            (AgentStatusTarget::Paused, ProposalAction::PauseAgent(change))
            | (AgentStatusTarget::Active, ProposalAction::ResumeAgent(change)) => Ok(change),
            _ => Err(mismatched_action(
                self.target.proposal_type().as_str(),
                action,
            )),
        }
    }
}

impl ActionHandler for AgentStatusHandler {
    fn proposal_type(&self) -> ProposalType {
        self.target.proposal_type()
    }

    fn apply(&self, action: &ProposalAction) -> ApplyOutcome {
        let change = match self.change(action) {
            Ok(change) => change,
            Err(message) => return ApplyOutcome::failed(REASON_INVALID_PAYLOAD, message),
        };
        let snapshot = match self.store.fleet_agent_status(&change.agent_id) {
            Ok(current) => before_json(&change.agent_id, current.as_ref()),
            Err(err) => return ApplyOutcome::from_store_error(&err),
        };
        match self.store.fleet_set_agent_status(
            &change.agent_id,
            self.target.status(),
            change.reason.clone(),
        ) {
            Ok(result) => ApplyOutcome::applied(
                before_json(&change.agent_id, result.before.as_ref()),
                status_json(&result.after),
            ),
            Err(err) => ApplyOutcome::from_write_error(snapshot, &err),
        }
    }

    /// Writes back exactly the captured status, `active` when none was
    /// captured.
    fn revert(&self, action: &ProposalAction, before: &Value) -> RevertOutcome {
        let change = match self.change(action) {
            Ok(change) => change,
            Err(message) => return RevertOutcome::failed(REASON_INVALID_PAYLOAD, message),
        };
        let (status, reason) = captured_status(before);
        match self
            .store
            .fleet_set_agent_status(&change.agent_id, status, reason)
        {
            Ok(result) => RevertOutcome::reverted(status_json(&result.after)),
            Err(err) => RevertOutcome::from_write_error(&err),
        }
    }

    fn settle(&self, action: &ProposalAction, before: &Value) -> ApplyOutcome {
        let change = match self.change(action) {
            Ok(change) => change,
            Err(message) => return ApplyOutcome::failed(REASON_INVALID_PAYLOAD, message),
        };
        match self.store.fleet_agent_status(&change.agent_id) {
            Ok(Some(current))
                if current.status == self.target.status()
                    && current.reason.as_deref() == trimmed(change.reason.as_deref()) =>
            {
                ApplyOutcome::applied(before.clone(), status_json(&current))
            }
            Ok(_) => ApplyOutcome::not_applied(before.clone()),
            Err(err) => ApplyOutcome::unresolved(before.clone(), err.to_string()),
        }
    }

    fn settle_revert(&self, action: &ProposalAction, before: &Value) -> RevertOutcome {
        let change = match self.change(action) {
            Ok(change) => change,
            Err(message) => return RevertOutcome::failed(REASON_INVALID_PAYLOAD, message),
        };
        let (status, reason) = captured_status(before);
        match self.store.fleet_agent_status(&change.agent_id) {
            Ok(Some(current))
                if current.status == status
                    && current.reason.as_deref() == trimmed(reason.as_deref()) =>
            {
                RevertOutcome::reverted(status_json(&current))
            }
            Ok(_) => RevertOutcome::not_applied(),
            Err(err) => RevertOutcome::unresolved(err.to_string()),
        }
    }
}

fn before_json(agent_id: &str, row: Option<&FleetAgentStatusRow>) -> Value {
    match row {
        Some(row) => status_json(row),
        None => json!({
            "agent_id": agent_id,
            "status": AGENT_STATUS_ACTIVE,
            "reason": null,
            "implicit": true,
        }),
    }
}

fn captured_status(before: &Value) -> (&str, Option<String>) {
    let status = before
        .get("status")
        .and_then(Value::as_str)
        .filter(|status| !status.trim().is_empty())
        .unwrap_or(AGENT_STATUS_ACTIVE);
    let reason = before
        .get("reason")
        .and_then(Value::as_str)
        .map(str::to_string);
    (status, reason)
}

/// The store keeps reasons trimmed, blank as none.
fn trimmed(reason: Option<&str>) -> Option<&str> {
    reason.map(str::trim).filter(|reason| !reason.is_empty())
}

fn status_json(row: &FleetAgentStatusRow) -> Value {
    json!({
        "agent_id": row.agent_id,
        "status": row.status,
        "reason": row.reason,
    })
}
