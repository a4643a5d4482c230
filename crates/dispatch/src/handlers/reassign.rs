#![forbid(unsafe_code)]

use super::{
    ActionHandler, ApplyOutcome, REASON_INVALID_PAYLOAD, REASON_NOT_FOUND,
    REASON_PRECONDITION_FAILED, RevertOutcome, mismatched_action,
};
use ao_core::{ProposalAction, ProposalType};
use ao_storage::{FleetReassignRequest, FleetReassignResult, SqliteStore};
use serde_json::Value;
use std::sync::Arc;

/// Moves a task to another agent and clears its route plan. `from_agent`
/// acts as a compare-and-set on the current owner.
pub struct ReassignTaskHandler {
    store: Arc<SqliteStore>,
}

impl ReassignTaskHandler {
    pub fn new(store: Arc<SqliteStore>) -> Self {
        Self { store }
    }
}

impl ActionHandler for ReassignTaskHandler {
    fn proposal_type(&self) -> ProposalType {
        ProposalType::ReassignTask
    }

    fn apply(&self, action: &ProposalAction) -> ApplyOutcome {
        let ProposalAction::ReassignTask(action) = action else {
            return ApplyOutcome::failed(
                REASON_INVALID_PAYLOAD,
                mismatched_action("reassign_task", action),
            );
        };
        let snapshot = match self.store.fleet_task(&action.task_id) {
            Ok(Some(task)) => task.ownership_json(),
            Ok(None) => Value::Null,
            Err(err) => return ApplyOutcome::from_store_error(&err),
        };
        let result = self.store.fleet_reassign_task(FleetReassignRequest {
            task_id: action.task_id.clone(),
            expected_owner: action.from_agent.clone(),
            new_owner: Some(action.to_agent.clone()),
            route_plan: None,
        });
        match result {
            Ok(FleetReassignResult::Reassigned { before, after }) => {
                ApplyOutcome::applied(before.ownership_json(), after.ownership_json())
            }
            Ok(FleetReassignResult::TaskMissing) => ApplyOutcome::failed(
                REASON_NOT_FOUND,
                format!("task {} not found", action.task_id),
            ),
            Ok(FleetReassignResult::OwnerMismatch { expected, actual }) => ApplyOutcome::failed(
                REASON_PRECONDITION_FAILED,
                format!(
                    "task {} is owned by {}, expected {expected}",
                    action.task_id,
                    actual.as_deref().unwrap_or("nobody")
                ),
            ),
            Err(err) => ApplyOutcome::from_write_error(snapshot, &err),
        }
    }

    /// Restores the captured owner and route plan, provided the task still
    /// belongs to the agent it was moved to.
    fn revert(&self, action: &ProposalAction, before: &Value) -> RevertOutcome {
        let ProposalAction::ReassignTask(action) = action else {
            return RevertOutcome::failed(
                REASON_INVALID_PAYLOAD,
                mismatched_action("reassign_task", action),
            );
        };
        let Some((owner, route_plan)) = captured_ownership(before) else {
            return RevertOutcome::failed(REASON_INVALID_PAYLOAD, "before-state is missing");
        };

        let result = self.store.fleet_reassign_task(FleetReassignRequest {
            task_id: action.task_id.clone(),
            expected_owner: Some(action.to_agent.clone()),
            new_owner: owner,
            route_plan,
        });
        match result {
            Ok(FleetReassignResult::Reassigned { after, .. }) => {
                RevertOutcome::reverted(after.ownership_json())
            }
            Ok(FleetReassignResult::TaskMissing) => RevertOutcome::failed(
                REASON_NOT_FOUND,
                format!("task {} not found", action.task_id),
            ),
            Ok(FleetReassignResult::OwnerMismatch { expected, actual }) => RevertOutcome::failed(
                REASON_PRECONDITION_FAILED,
                format!(
                    "task {} changed owner since execution ({}, expected {expected})",
                    action.task_id,
                    actual.as_deref().unwrap_or("nobody")
                ),
            ),
            Err(err) => RevertOutcome::from_write_error(&err),
        }
    }

    /// The task counts as moved when `to_agent` owns it with no route plan.
    fn settle(&self, action: &ProposalAction, before: &Value) -> ApplyOutcome {
        let ProposalAction::ReassignTask(action) = action else {
            return ApplyOutcome::failed(
                REASON_INVALID_PAYLOAD,
                mismatched_action("reassign_task", action),
            );
        };
        match self.store.fleet_task(&action.task_id) {
            Ok(Some(task))
                if task.owner_agent.as_deref() == Some(action.to_agent.as_str())
                    && task.route_plan.is_none() =>
            {
                ApplyOutcome::applied(before.clone(), task.ownership_json())
            }
            Ok(Some(_)) => ApplyOutcome::not_applied(before.clone()),
            Ok(None) => ApplyOutcome::failed(
                REASON_NOT_FOUND,
                format!("task {} not found", action.task_id),
            ),
            Err(err) => ApplyOutcome::unresolved(before.clone(), err.to_string()),
        }
    }

    fn settle_revert(&self, action: &ProposalAction, before: &Value) -> RevertOutcome {
        let ProposalAction::ReassignTask(action) = action else {
            return RevertOutcome::failed(
                REASON_INVALID_PAYLOAD,
                mismatched_action("reassign_task", action),
            );
        };
        let Some((owner, route_plan)) = captured_ownership(before) else {
            return RevertOutcome::failed(REASON_INVALID_PAYLOAD, "before-state is missing");
        };
        match self.store.fleet_task(&action.task_id) {
            Ok(Some(task)) if task.owner_agent == owner && task.route_plan == route_plan => {
                RevertOutcome::reverted(task.ownership_json())
            }
            Ok(Some(_)) => RevertOutcome::not_applied(),
            Ok(None) => RevertOutcome::failed(
                REASON_NOT_FOUND,
                format!("task {} not found", action.task_id),
            ),
            Err(err) => RevertOutcome::unresolved(err.to_string()),
        }
    }
}

fn captured_ownership(before: &Value) -> Option<(Option<String>, Option<Value>)> {
    let before = before.as_object()?;
    let owner = before
        .get("owner")
        .and_then(Value::as_str)
        .map(str::to_string);
    let route_plan = before.get("route_plan").filter(|v| !v.is_null()).cloned();
    Some((owner, route_plan))
}
