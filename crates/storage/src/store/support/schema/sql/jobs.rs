#![forbid(unsafe_code)]

pub(super) const SQL: &str = r#"

        CREATE TABLE IF NOT EXISTS jobs (
          id TEXT PRIMARY KEY,
          proposal_id TEXT NOT NULL,
          status TEXT NOT NULL CHECK(status IN ('queued','running','succeeded','failed','cancelled','rolled_back')),
          idempotency_key TEXT NOT NULL,
          resource_key TEXT NOT NULL,
          execution_mode TEXT NOT NULL CHECK(execution_mode IN ('manual','auto')),
          attempt INTEGER NOT NULL DEFAULT 0,
          max_attempts INTEGER NOT NULL CHECK(max_attempts >= 1),
          started_at_ms INTEGER,
          ended_at_ms INTEGER,
          last_error_code TEXT,
          last_error_message TEXT,
          evidence_json TEXT,
          created_at_ms INTEGER NOT NULL,
          updated_at_ms INTEGER NOT NULL,
          FOREIGN KEY(proposal_id) REFERENCES proposals(id)
        );

        CREATE TABLE IF NOT EXISTS rollback_jobs (
          id TEXT PRIMARY KEY,
          job_id TEXT NOT NULL,
          proposal_id TEXT NOT NULL,
          resource_key TEXT NOT NULL,
          status TEXT NOT NULL CHECK(status IN ('running','succeeded','failed')),
          reason TEXT,
          started_at_ms INTEGER NOT NULL,
          ended_at_ms INTEGER,
          last_error_code TEXT,
          last_error_message TEXT,
          evidence_json TEXT,
          created_at_ms INTEGER NOT NULL,
          updated_at_ms INTEGER NOT NULL,
          FOREIGN KEY(job_id) REFERENCES jobs(id)
        );
"#;
