#![forbid(unsafe_code)]

pub(super) const SQL: &str = r#"

        CREATE TABLE IF NOT EXISTS proposals (
          id TEXT PRIMARY KEY,
          revision INTEGER NOT NULL,
          source TEXT NOT NULL,
          proposal_type TEXT NOT NULL,
          payload_json TEXT NOT NULL,
          status TEXT NOT NULL CHECK(status IN ('pending','approved','rejected','cancelled','executed','failed')),
          risk_level TEXT NOT NULL CHECK(risk_level IN ('low','medium','high','critical')),
          scope_json TEXT NOT NULL,
          reason TEXT NOT NULL,
          evidence_refs_json TEXT NOT NULL,
          requested_by TEXT NOT NULL,
          requested_at_ms INTEGER NOT NULL,
          reviewed_by TEXT,
          reviewed_at_ms INTEGER,
          review_comment TEXT,
          execution_ref TEXT,
          auto_execute_eligible INTEGER NOT NULL DEFAULT 0,
          auto_execute_policy_json TEXT,
          approved_then_auto_execute INTEGER NOT NULL DEFAULT 0,
          created_at_ms INTEGER NOT NULL,
          updated_at_ms INTEGER NOT NULL
        );
"#;
