#![forbid(unsafe_code)]

use super::{
    ActionHandler, ApplyOutcome, REASON_INVALID_PAYLOAD, REASON_NOT_FOUND, RevertOutcome,
    mismatched_action,
};
use ao_core::{ProposalAction, ProposalType};
use ao_storage::{FleetReprioritizeResult, SqliteStore, StoreError, WorkItemPriority};
use serde_json::{Value, json};
use std::sync::Arc;

/// Sets every work item under a task to one priority. The before-state keeps
/// each item's own priority so revert can restore them individually.
pub struct ReprioritizeTaskHandler {
    store: Arc<SqliteStore>,
}

impl ReprioritizeTaskHandler {
    pub fn new(store: Arc<SqliteStore>) -> Self {
        Self { store }
    }
}

impl ActionHandler for ReprioritizeTaskHandler {
    fn proposal_type(&self) -> ProposalType {
        ProposalType::ReprioritizeTask
    }

    fn apply(&self, action: &ProposalAction) -> ApplyOutcome {
        let ProposalAction::ReprioritizeTask(action) = action else {
            return ApplyOutcome::failed(
                REASON_INVALID_PAYLOAD,
                mismatched_action("reprioritize_task", action),
            );
        };
        let priority = action.priority.numeric();
        let snapshot = match self.store.fleet_work_items(&action.task_id) {
            Ok(items) => items_json(&action.task_id, &items, None),
            Err(err) => return ApplyOutcome::from_store_error(&err),
        };
        match self.store.fleet_reprioritize_task(&action.task_id, priority) {
            Ok(FleetReprioritizeResult::Reprioritized { before, after }) => ApplyOutcome::applied(
                items_json(&action.task_id, &before, None),
                items_json(&action.task_id, &after, Some(action.priority.to_json())),
            ),
            Ok(FleetReprioritizeResult::TaskMissing) => ApplyOutcome::failed(
                REASON_NOT_FOUND,
                format!("task {} not found", action.task_id),
            ),
            Err(err) => ApplyOutcome::from_write_error(snapshot, &err),
        }
    }

    fn revert(&self, action: &ProposalAction, before: &Value) -> RevertOutcome {
        let ProposalAction::ReprioritizeTask(action) = action else {
            return RevertOutcome::failed(
                REASON_INVALID_PAYLOAD,
                mismatched_action("reprioritize_task", action),
            );
        };
        let Some(items) = parse_items(before) else {
            return RevertOutcome::failed(
                REASON_INVALID_PAYLOAD,
                "before-state has no work item priorities",
            );
        };
        match self
            .store
            .fleet_restore_priorities(&action.task_id, items.clone())
        {
            Ok(restored) => {
                let mut out = items_json(&action.task_id, &items, None);
                out["restored"] = json!(restored);
                RevertOutcome::reverted(out)
            }
            Err(err) => RevertOutcome::from_write_error(&err),
        }
    }

    fn settle(&self, action: &ProposalAction, before: &Value) -> ApplyOutcome {
        let ProposalAction::ReprioritizeTask(action) = action else {
            return ApplyOutcome::failed(
                REASON_INVALID_PAYLOAD,
                mismatched_action("reprioritize_task", action),
            );
        };
        let priority = action.priority.numeric();
        let current = match self.store.fleet_work_items(&action.task_id) {
            Ok(items) => items,
            Err(err) => return ApplyOutcome::unresolved(before.clone(), err.to_string()),
        };
        if current.is_empty() {
            // Nothing to move: applied for a known task, missing otherwise.
            return match self.store.fleet_task(&action.task_id) {
                Ok(Some(_)) => ApplyOutcome::applied(
                    before.clone(),
                    items_json(&action.task_id, &current, Some(action.priority.to_json())),
                ),
                Ok(None) | Err(StoreError::SchemaMissing(_)) => ApplyOutcome::failed(
                    REASON_NOT_FOUND,
                    format!("task {} not found", action.task_id),
                ),
                Err(err) => ApplyOutcome::unresolved(before.clone(), err.to_string()),
            };
        }
        if current.iter().all(|item| item.priority == priority) {
            ApplyOutcome::applied(
                before.clone(),
                items_json(&action.task_id, &current, Some(action.priority.to_json())),
            )
        } else {
            ApplyOutcome::not_applied(before.clone())
        }
    }

    fn settle_revert(&self, action: &ProposalAction, before: &Value) -> RevertOutcome {
        let ProposalAction::ReprioritizeTask(action) = action else {
            return RevertOutcome::failed(
                REASON_INVALID_PAYLOAD,
                mismatched_action("reprioritize_task", action),
            );
        };
        let Some(items) = parse_items(before) else {
            return RevertOutcome::failed(
                REASON_INVALID_PAYLOAD,
                "before-state has no work item priorities",
            );
        };
        let current = match self.store.fleet_work_items(&action.task_id) {
            Ok(current) => current,
            Err(err) => return RevertOutcome::unresolved(err.to_string()),
        };
        let restored = items.iter().filter(|item| current.contains(item)).count();
        let restorable = items
            .iter()
            .filter(|item| current.iter().any(|c| c.work_item_id == item.work_item_id))
            .count();
        if restored == restorable {
            let mut out = items_json(&action.task_id, &items, None);
            out["restored"] = json!(restored);
            RevertOutcome::reverted(out)
        } else {
            RevertOutcome::not_applied()
        }
    }
}

fn items_json(task_id: &str, items: &[WorkItemPriority], requested: Option<Value>) -> Value {
    let work_items: Vec<Value> = items
        .iter()
        .map(|item| json!({"work_item_id": item.work_item_id, "priority": item.priority}))
        .collect();
    let mut out = json!({"task_id": task_id, "work_items": work_items});
    if let Some(requested) = requested {
        out["priority"] = requested;
    }
    out
}

fn parse_items(before: &Value) -> Option<Vec<WorkItemPriority>> {
    let raw = before.get("work_items")?.as_array()?;
    raw.iter()
        .map(|item| {
            Some(WorkItemPriority {
                work_item_id: item.get("work_item_id")?.as_str()?.to_string(),
                priority: item.get("priority")?.as_i64()?,
            })
        })
        .collect()
}
