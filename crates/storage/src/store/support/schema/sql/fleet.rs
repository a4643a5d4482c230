#![forbid(unsafe_code)]

// Reference operational tables touched by the built-in handlers.
pub(super) const SQL: &str = r#"

        CREATE TABLE IF NOT EXISTS fleet_tasks (
          task_id TEXT PRIMARY KEY,
          owner_agent TEXT,
          route_plan_json TEXT,
          updated_at_ms INTEGER NOT NULL
        );

        CREATE TABLE IF NOT EXISTS fleet_work_items (
          work_item_id TEXT PRIMARY KEY,
          task_id TEXT NOT NULL,
          priority INTEGER NOT NULL,
          updated_at_ms INTEGER NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_fleet_work_items_task
          ON fleet_work_items(task_id, work_item_id);

        CREATE TABLE IF NOT EXISTS fleet_agent_status (
          agent_id TEXT PRIMARY KEY,
          status TEXT NOT NULL,
          reason TEXT,
          updated_at_ms INTEGER NOT NULL
        );
"#;
