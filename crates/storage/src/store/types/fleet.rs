#![forbid(unsafe_code)]

use serde_json::{Value, json};

#[derive(Clone, Debug, PartialEq)]
pub struct FleetTaskRow {
    pub task_id: String,
    pub owner_agent: Option<String>,
    pub route_plan: Option<Value>,
    pub updated_at_ms: i64,
}

impl FleetTaskRow {
    pub fn ownership_json(&self) -> Value {
        json!({
            "task_id": self.task_id,
            "owner": self.owner_agent,
            "route_plan": self.route_plan,
        })
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WorkItemPriority {
    pub work_item_id: String,
    pub priority: i64,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FleetAgentStatusRow {
    pub agent_id: String,
    pub status: String,
    pub reason: Option<String>,
    pub updated_at_ms: i64,
}

#[derive(Clone, Debug, PartialEq)]
pub enum FleetReassignResult {
    Reassigned {
        before: FleetTaskRow,
        after: FleetTaskRow,
    },
    TaskMissing,
    OwnerMismatch {
        expected: String,
        actual: Option<String>,
    },
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FleetReprioritizeResult {
    Reprioritized {
        before: Vec<WorkItemPriority>,
        after: Vec<WorkItemPriority>,
    },
    TaskMissing,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FleetAgentStatusChange {
    /// `None` when the agent had no status record yet.
    pub before: Option<FleetAgentStatusRow>,
    pub after: FleetAgentStatusRow,
}
