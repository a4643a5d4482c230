#![forbid(unsafe_code)]

pub(super) const SQL: &str = r#"

        CREATE INDEX IF NOT EXISTS idx_proposals_status_created
          ON proposals(status, created_at_ms);

        CREATE UNIQUE INDEX IF NOT EXISTS idx_jobs_idempotency_key
          ON jobs(idempotency_key);

        CREATE UNIQUE INDEX IF NOT EXISTS idx_jobs_active_resource
          ON jobs(resource_key)
          WHERE status IN ('queued','running');

        CREATE INDEX IF NOT EXISTS idx_jobs_proposal
          ON jobs(proposal_id, created_at_ms);

        CREATE UNIQUE INDEX IF NOT EXISTS idx_rollback_jobs_running_job
          ON rollback_jobs(job_id)
          WHERE status = 'running';

        CREATE UNIQUE INDEX IF NOT EXISTS idx_rollback_jobs_running_resource
          ON rollback_jobs(resource_key)
          WHERE status = 'running';

        CREATE INDEX IF NOT EXISTS idx_audit_events_proposal
          ON audit_events(proposal_id, seq);
"#;
