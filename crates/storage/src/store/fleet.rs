#![forbid(unsafe_code)]

use super::support::{
    decode_optional_json_column, encode_optional_json, fleet_install_schema_tx, now_ms,
    require_fleet_table,
};
use super::*;
use rusqlite::{OptionalExtension, params};
use serde_json::Value;

const FLEET_TASKS: &str = "fleet_tasks";
const FLEET_WORK_ITEMS: &str = "fleet_work_items";
const FLEET_AGENT_STATUS: &str = "fleet_agent_status";

// The fleet tables belong to the operational layer the reference handlers act
// on. Each mutation reads its before-state, checks preconditions and writes in
// one transaction.
impl SqliteStore {
    pub fn fleet_install_schema(&self) -> Result<(), StoreError> {
        self.write(|tx| fleet_install_schema_tx(tx))
    }

    pub fn fleet_upsert_task(
        &self,
        task_id: &str,
        owner_agent: Option<&str>,
        route_plan: Option<Value>,
    ) -> Result<FleetTaskRow, StoreError> {
        let task_id = normalize_fleet_id(task_id, "task_id must not be empty")?;
        let owner_agent = owner_agent.map(str::trim).filter(|v| !v.is_empty()).map(str::to_string);
        self.write(move |tx| {
            require_fleet_table(tx, FLEET_TASKS)?;
            tx.execute(
                "INSERT INTO fleet_tasks(task_id, owner_agent, route_plan_json, updated_at_ms) \
                 VALUES (?1, ?2, ?3, ?4) \
                 ON CONFLICT(task_id) DO UPDATE SET owner_agent=excluded.owner_agent, \
                 route_plan_json=excluded.route_plan_json, updated_at_ms=excluded.updated_at_ms",
                params![
                    task_id,
                    owner_agent,
                    encode_optional_json(route_plan.as_ref()),
                    now_ms()
                ],
            )?;
            load_task(tx, &task_id)?.ok_or(StoreError::UnknownId)
        })
    }

    pub fn fleet_upsert_work_item(
        &self,
        work_item_id: &str,
        task_id: &str,
        priority: i64,
    ) -> Result<(), StoreError> {
        let work_item_id = normalize_fleet_id(work_item_id, "work_item_id must not be empty")?;
        let task_id = normalize_fleet_id(task_id, "task_id must not be empty")?;
        self.write(move |tx| {
            require_fleet_table(tx, FLEET_WORK_ITEMS)?;
            tx.execute(
                "INSERT INTO fleet_work_items(work_item_id, task_id, priority, updated_at_ms) \
                 VALUES (?1, ?2, ?3, ?4) \
                 ON CONFLICT(work_item_id) DO UPDATE SET task_id=excluded.task_id, \
                 priority=excluded.priority, updated_at_ms=excluded.updated_at_ms",
                params![work_item_id, task_id, priority, now_ms()],
            )?;
            Ok(())
        })
    }

    pub fn fleet_task(&self, task_id: &str) -> Result<Option<FleetTaskRow>, StoreError> {
        let task_id = task_id.trim().to_string();
        self.read(move |conn| {
            require_fleet_table(conn, FLEET_TASKS)?;
            load_task(conn, &task_id)
        })
    }

    pub fn fleet_work_items(&self, task_id: &str) -> Result<Vec<WorkItemPriority>, StoreError> {
        let task_id = task_id.trim().to_string();
        self.read(move |conn| {
            require_fleet_table(conn, FLEET_WORK_ITEMS)?;
            load_work_items(conn, &task_id)
        })
    }

    pub fn fleet_agent_status(
        &self,
        agent_id: &str,
    ) -> Result<Option<FleetAgentStatusRow>, StoreError> {
        let agent_id = agent_id.trim().to_string();
        self.read(move |conn| {
            require_fleet_table(conn, FLEET_AGENT_STATUS)?;
            load_agent_status(conn, &agent_id)
        })
    }

    /// Changes a task's owner and route plan. With `expected_owner` set, a
    /// different current owner leaves the row untouched.
    pub fn fleet_reassign_task(
        &self,
        request: FleetReassignRequest,
    ) -> Result<FleetReassignResult, StoreError> {
        let task_id = normalize_fleet_id(&request.task_id, "task_id must not be empty")?;
        self.write(move |tx| {
            require_fleet_table(tx, FLEET_TASKS)?;
            let Some(before) = load_task(tx, &task_id)? else {
                return Ok(FleetReassignResult::TaskMissing);
            };
            if let Some(expected) = request.expected_owner {
                if before.owner_agent.as_deref() != Some(expected.as_str()) {
                    return Ok(FleetReassignResult::OwnerMismatch {
                        expected,
                        actual: before.owner_agent,
                    });
                }
            }

            tx.execute(
                "UPDATE fleet_tasks SET owner_agent=?2, route_plan_json=?3, updated_at_ms=?4 \
                 WHERE task_id=?1",
                params![
                    task_id,
                    request.new_owner,
                    encode_optional_json(request.route_plan.as_ref()),
                    now_ms().max(before.updated_at_ms + 1),
                ],
            )?;
            let after = load_task(tx, &task_id)?.ok_or(StoreError::UnknownId)?;
            Ok(FleetReassignResult::Reassigned { before, after })
        })
    }

    /// Sets every work item under a task to `priority`.
    pub fn fleet_reprioritize_task(
        &self,
        task_id: &str,
        priority: i64,
    ) -> Result<FleetReprioritizeResult, StoreError> {
        let task_id = normalize_fleet_id(task_id, "task_id must not be empty")?;
        self.write(move |tx| {
            require_fleet_table(tx, FLEET_WORK_ITEMS)?;
            let before = load_work_items(tx, &task_id)?;
            if before.is_empty() {
                let task_known = require_fleet_table(tx, FLEET_TASKS).is_ok()
                    && load_task(tx, &task_id)?.is_some();
                if !task_known {
                    return Ok(FleetReprioritizeResult::TaskMissing);
                }
            }
            tx.execute(
                "UPDATE fleet_work_items SET priority=?2, updated_at_ms=?3 WHERE task_id=?1",
                params![task_id, priority, now_ms()],
            )?;
            let after = load_work_items(tx, &task_id)?;
            Ok(FleetReprioritizeResult::Reprioritized { before, after })
        })
    }

    /// Restores individual work item priorities. Returns how many rows matched.
    pub fn fleet_restore_priorities(
        &self,
        task_id: &str,
        items: Vec<WorkItemPriority>,
    ) -> Result<usize, StoreError> {
        let task_id = normalize_fleet_id(task_id, "task_id must not be empty")?;
        self.write(move |tx| {
            require_fleet_table(tx, FLEET_WORK_ITEMS)?;
            let now = now_ms();
            let mut restored = 0;
            for item in &items {
                restored += tx.execute(
                    "UPDATE fleet_work_items SET priority=?3, updated_at_ms=?4 \
                     WHERE work_item_id=?1 AND task_id=?2",
                    params![item.work_item_id, task_id, item.priority, now],
                )?;
            }
            Ok(restored)
        })
    }

    /// Upserts an agent's status record and returns the record it replaced.
    pub fn fleet_set_agent_status(
        &self,
        agent_id: &str,
        status: &str,
        reason: Option<String>,
    ) -> Result<FleetAgentStatusChange, StoreError> {
        let agent_id = normalize_fleet_id(agent_id, "agent_id must not be empty")?;
        let status = normalize_fleet_id(status, "status must not be empty")?;
        let reason = normalize_optional_text(reason, MAX_REASON_LEN, "reason is too long")?;
        self.write(move |tx| {
            require_fleet_table(tx, FLEET_AGENT_STATUS)?;
            let before = load_agent_status(tx, &agent_id)?;
            let updated_at_ms = match &before {
                Some(before) => now_ms().max(before.updated_at_ms + 1),
                None => now_ms(),
            };
            tx.execute(
                "INSERT INTO fleet_agent_status(agent_id, status, reason, updated_at_ms) \
                 VALUES (?1, ?2, ?3, ?4) \
                 ON CONFLICT(agent_id) DO UPDATE SET status=excluded.status, \
                 reason=excluded.reason, updated_at_ms=excluded.updated_at_ms",
                params![agent_id, status, reason, updated_at_ms],
            )?;
            let after = load_agent_status(tx, &agent_id)?.ok_or(StoreError::UnknownId)?;
            Ok(FleetAgentStatusChange { before, after })
        })
    }
}

fn normalize_fleet_id(value: &str, empty: &'static str) -> Result<String, StoreError> {
    normalize_required(value, MAX_ACTOR_LEN, empty, "identifier is too long")
}

fn load_task(conn: &Connection, task_id: &str) -> Result<Option<FleetTaskRow>, StoreError> {
    let row = conn
        .query_row(
            "SELECT task_id, owner_agent, route_plan_json, updated_at_ms \
             FROM fleet_tasks WHERE task_id=?1",
            params![task_id],
            |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, Option<String>>(1)?,
                    row.get::<_, Option<String>>(2)?,
                    row.get::<_, i64>(3)?,
                ))
            },
        )
        .optional()?;
    let Some((task_id, owner_agent, route_plan_raw, updated_at_ms)) = row else {
        return Ok(None);
    };
    Ok(Some(FleetTaskRow {
        task_id,
        owner_agent,
        route_plan: decode_optional_json_column("route_plan_json", route_plan_raw)?,
        updated_at_ms,
    }))
}

fn load_work_items(conn: &Connection, task_id: &str) -> Result<Vec<WorkItemPriority>, StoreError> {
    let mut stmt = conn.prepare(
        "SELECT work_item_id, priority FROM fleet_work_items \
         WHERE task_id=?1 ORDER BY work_item_id ASC",
    )?;
    let mut rows = stmt.query(params![task_id])?;
    let mut out = Vec::new();
    while let Some(row) = rows.next()? {
        out.push(WorkItemPriority {
            work_item_id: row.get(0)?,
            priority: row.get(1)?,
        });
    }
    Ok(out)
}

fn load_agent_status(
    conn: &Connection,
    agent_id: &str,
) -> Result<Option<FleetAgentStatusRow>, StoreError> {
    let row = conn
        .query_row(
            "SELECT agent_id, status, reason, updated_at_ms \
             FROM fleet_agent_status WHERE agent_id=?1",
            params![agent_id],
            |row| {
                Ok(FleetAgentStatusRow {
                    agent_id: row.get(0)?,
                    status: row.get(1)?,
                    reason: row.get(2)?,
                    updated_at_ms: row.get(3)?,
                })
            },
        )
        .optional()?;
    Ok(row)
}
