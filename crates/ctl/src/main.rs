#![forbid(unsafe_code)]

mod args;
mod render;

use ao_core::{JobStatus, ProposalStatus};
use ao_dispatch::{CreateProposal, DispatchConfig, DispatchError, DispatchService};
use ao_storage::{SqliteStore, StoreError};
use args::{CliArgs, ENV_STORAGE_DIR, parse_args, usage};
use render::{
    approval_json, audit_json, counts_json, error_json, job_json, outcome_json, proposal_json,
    rollback_json, rollback_outcome_json,
};
use serde_json::{Value, json};
use std::process::ExitCode;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

const DEFAULT_AUDIT_PAGE: usize = 100;

#[derive(Debug, thiserror::Error)]
enum CliError {
    #[error("{0}")]
    Usage(String),
    #[error(transparent)]
    Dispatch(#[from] DispatchError),
}

impl From<StoreError> for CliError {
    fn from(value: StoreError) -> Self {
        Self::Dispatch(value.into())
    }
}

impl From<String> for CliError {
    fn from(value: String) -> Self {
        Self::Usage(value)
    }
}

impl CliError {
    fn code(&self) -> &'static str {
        match self {
            CliError::Usage(_) => "USAGE",
            CliError::Dispatch(err) => err.code(),
        }
    }
}

fn install_logging() {
    // stdout carries the JSON result.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();
}

fn main() -> ExitCode {
    let raw = std::env::args().skip(1).collect::<Vec<_>>();
    let args = match parse_args(raw, std::env::var(ENV_STORAGE_DIR).ok()) {
        Ok(Some(args)) => args,
        Ok(None) => {
            print!("{}", usage());
            return ExitCode::SUCCESS;
        }
        Err(message) => {
            eprint!("error: {message}\n\n{}", usage());
            return ExitCode::from(2);
        }
    };
    install_logging();

    match run(&args) {
        Ok(value) => {
            println!("{}", pretty(&value));
            ExitCode::SUCCESS
        }
        Err(err) => {
            tracing::debug!(code = err.code(), "command failed: {err}");
            println!("{}", pretty(&error_json(err.code(), &err.to_string())));
            ExitCode::FAILURE
        }
    }
}

fn pretty(value: &Value) -> String {
    serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string())
}

fn run(args: &CliArgs) -> Result<Value, CliError> {
    let config = DispatchConfig::from_env()?;
    let store = SqliteStore::open_with_timeout(&args.storage_dir, config.write_timeout)?;
    let service = DispatchService::new(Arc::new(store), config)?;

    match args.command.as_str() {
        "create" => {
            let payload: Value =
                serde_json::from_str(args.arg(1, "payload-json")?).map_err(|err| {
                    DispatchError::InvalidPayload(format!("payload is not JSON: {err}"))
                })?;
            let scope = match args.flag("--scope") {
                Some(raw) => Some(serde_json::from_str::<Value>(raw).map_err(|err| {
                    DispatchError::InvalidPayload(format!("scope is not JSON: {err}"))
                })?),
                None => None,
            };
            let proposal = service.create(CreateProposal {
                proposal_type: args.arg(0, "type")?.to_string(),
                payload,
                scope,
                reason: args.flag("--reason").unwrap_or_default().to_string(),
                evidence_refs: args.flag_all("--evidence"),
                requested_by: args.require_flag("--by")?.to_string(),
                source: None,
                risk_level: args.flag("--risk").map(str::to_string),
            })?;
            Ok(proposal_json(&proposal))
        }
        "approve" => {
            let outcome = service.approve(
                args.arg(0, "proposal")?,
                args.require_flag("--by")?,
                comment(args),
            )?;
            Ok(approval_json(&outcome))
        }
        "reject" => {
            let proposal = service.reject(
                args.arg(0, "proposal")?,
                args.require_flag("--by")?,
                comment(args),
            )?;
            Ok(proposal_json(&proposal))
        }
        "cancel-proposal" => {
            let proposal = service.cancel_proposal(
                args.arg(0, "proposal")?,
                args.require_flag("--by")?,
                comment(args),
            )?;
            Ok(proposal_json(&proposal))
        }
        "execute" => {
            let outcome = service.execute(args.arg(0, "proposal")?, args.require_flag("--by")?)?;
            Ok(outcome_json(&outcome))
        }
        "retry" => {
            let outcome = service.retry(args.arg(0, "job")?, args.require_flag("--by")?)?;
            Ok(outcome_json(&outcome))
        }
        "settle" => {
            let outcome = service.settle(args.arg(0, "job")?, args.require_flag("--by")?)?;
            Ok(outcome_json(&outcome))
        }
        "rollback" => {
            let outcome = service.rollback(
                args.arg(0, "job")?,
                args.require_flag("--by")?,
                args.flag("--reason").map(str::to_string),
            )?;
            Ok(rollback_outcome_json(&outcome))
        }
        "cancel" => {
            let job = service.cancel(
                args.arg(0, "job")?,
                args.require_flag("--by")?,
                args.flag("--reason").map(str::to_string),
            )?;
            Ok(job_json(&job))
        }
        "proposals" => {
            let status = match args.flag("--status") {
                Some(raw) => Some(
                    ProposalStatus::parse(raw)
                        .ok_or_else(|| format!("unknown proposal status {raw:?}"))?,
                ),
                None => None,
            };
            let rows = service.list_proposals(status)?;
            Ok(Value::Array(rows.iter().map(proposal_json).collect()))
        }
        "proposal" => Ok(proposal_json(&service.get_proposal(args.arg(0, "id")?)?)),
        "jobs" => {
            let status = match args.flag("--status") {
                Some(raw) => Some(
                    JobStatus::parse(raw).ok_or_else(|| format!("unknown job status {raw:?}"))?,
                ),
                None => None,
            };
            let rows = service.list_jobs(status, args.flag("--proposal"))?;
            Ok(Value::Array(rows.iter().map(job_json).collect()))
        }
        "job" => Ok(job_json(&service.get_job(args.arg(0, "id")?)?)),
        "rollback-job" => Ok(rollback_json(
            &service.get_rollback_job(args.arg(0, "id")?)?,
        )),
        "rollbacks" => {
            let rows = service.list_rollback_jobs(args.arg(0, "job")?)?;
            Ok(Value::Array(rows.iter().map(rollback_json).collect()))
        }
        "audit" => {
            let proposal_id = args.arg(0, "proposal")?;
            let limit = parse_count(args, "--limit")?;
            let before_seq = parse_count(args, "--before")?;
            if limit.is_none() && before_seq.is_none() {
                let rows = service.audit_for_proposal(proposal_id)?;
                return Ok(Value::Array(rows.iter().map(audit_json).collect()));
            }
            let rows = service.audit_page(
                proposal_id,
                before_seq.map(|seq| seq as i64),
                limit.unwrap_or(DEFAULT_AUDIT_PAGE),
            )?;
            let next_before = match rows.last() {
                Some(row) if rows.len() == limit.unwrap_or(DEFAULT_AUDIT_PAGE) => json!(row.seq),
                _ => Value::Null,
            };
            Ok(json!({
                "events": rows.iter().map(audit_json).collect::<Vec<_>>(),
                "next_before": next_before,
            }))
        }
        "stats" => Ok(counts_json(&service.job_status_counts()?)),
        "init-fleet" => {
            service.engine().store().fleet_install_schema()?;
            Ok(json!({"fleet_schema": "installed"}))
        }
        other => Err(CliError::Usage(format!("unknown command {other:?}"))),
    }
}

fn parse_count(args: &CliArgs, flag: &str) -> Result<Option<usize>, CliError> {
    match args.flag(flag) {
        None => Ok(None),
        Some(raw) => match raw.trim().parse::<usize>() {
            Ok(value) if value > 0 && value <= i64::MAX as usize => Ok(Some(value)),
            _ => Err(CliError::Usage(format!("{flag} must be a positive integer"))),
        },
    }
}

fn comment(args: &CliArgs) -> Option<String> {
    args.flag("--comment").map(str::to_string)
}
