#![forbid(unsafe_code)]

mod audit;
mod error;
mod fleet;
mod jobs;
mod proposals;
mod requests;
mod rollback_jobs;
mod support;
mod types;
mod writer;

pub use error::StoreError;
pub use requests::*;
pub use support::ts_ms_to_rfc3339;
pub use types::*;
pub use writer::{DEFAULT_WRITE_TIMEOUT, WriteExecutor};

use rusqlite::{Connection, OpenFlags, Transaction};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

const DB_FILE_NAME: &str = "agent_ops.db";
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);
const DEFAULT_LIST_LIMIT: usize = 50;
const MAX_LIST_LIMIT: usize = 200;
const MAX_ACTOR_LEN: usize = 128;
const MAX_REASON_LEN: usize = 2_000;
const MAX_COMMENT_LEN: usize = 2_000;
const MAX_EVIDENCE_REFS: usize = 32;
const MAX_EVIDENCE_REF_LEN: usize = 256;

/// Proposal, job, rollback and audit persistence.
///
/// Every write goes through one [`WriteExecutor`]; reads open their own
/// connection and never wait behind queued writes.
#[derive(Debug)]
pub struct SqliteStore {
    storage_dir: PathBuf,
    db_path: PathBuf,
    write_timeout: Duration,
    writer: WriteExecutor,
}

impl SqliteStore {
    pub fn open(storage_dir: impl AsRef<Path>) -> Result<Self, StoreError> {
        Self::open_with_timeout(storage_dir, DEFAULT_WRITE_TIMEOUT)
    }

    pub fn open_with_timeout(
        storage_dir: impl AsRef<Path>,
        write_timeout: Duration,
    ) -> Result<Self, StoreError> {
        let storage_dir = storage_dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&storage_dir)?;

        let db_path = storage_dir.join(DB_FILE_NAME);
        let conn = Connection::open(&db_path)?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        conn.execute_batch(
            "PRAGMA journal_mode=WAL;\nPRAGMA synchronous=NORMAL;\nPRAGMA foreign_keys=ON;",
        )?;

        support::install_schema(&conn)?;
        support::preflight_gate(&conn)?;

        let writer = WriteExecutor::spawn(conn)?;
        info!(db = %db_path.display(), "store opened");
        Ok(Self {
            storage_dir,
            db_path,
            write_timeout,
            writer,
        })
    }

    pub fn storage_dir(&self) -> &Path {
        &self.storage_dir
    }

    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    pub fn write_timeout(&self) -> Duration {
        self.write_timeout
    }

    pub fn writer(&self) -> &WriteExecutor {
        &self.writer
    }

    /// Returns once every write submitted before this call has finished,
    /// including writes whose callers already timed out.
    pub fn flush_writes(&self, timeout: Duration) -> Result<(), StoreError> {
        self.writer.submit(timeout, |_tx| Ok(()))
    }

    /// Submits a write transaction with the store's default timeout.
    pub fn write<T, F>(&self, f: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(&Transaction<'_>) -> Result<T, StoreError> + Send + 'static,
    {
        self.writer.submit(self.write_timeout, f)
    }

    pub fn read<T>(
        &self,
        f: impl FnOnce(&Connection) -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        let conn = Connection::open_with_flags(
            &self.db_path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        f(&conn)
    }
}

fn normalize_required(
    value: &str,
    max_len: usize,
    empty: &'static str,
    too_long: &'static str,
) -> Result<String, StoreError> {
    let value = value.trim();
    if value.is_empty() {
        return Err(StoreError::InvalidInput(empty));
    }
    if value.chars().count() > max_len {
        return Err(StoreError::InvalidInput(too_long));
    }
    Ok(value.to_string())
}

fn normalize_actor(value: &str) -> Result<String, StoreError> {
    normalize_required(
        value,
        MAX_ACTOR_LEN,
        "actor must not be empty",
        "actor is too long",
    )
}

fn normalize_optional_text(
    value: Option<String>,
    max_len: usize,
    too_long: &'static str,
) -> Result<Option<String>, StoreError> {
    let Some(value) = value else {
        return Ok(None);
    };
    let value = value.trim();
    if value.is_empty() {
        return Ok(None);
    }
    if value.chars().count() > max_len {
        return Err(StoreError::InvalidInput(too_long));
    }
    Ok(Some(value.to_string()))
}

fn page_bounds(limit: usize, offset: usize) -> Result<(i64, i64), StoreError> {
    let limit = match limit {
        0 => DEFAULT_LIST_LIMIT,
        limit => limit.min(MAX_LIST_LIMIT),
    };
    Ok((to_sqlite_i64(limit)?, to_sqlite_i64(offset)?))
}

fn to_sqlite_i64(value: usize) -> Result<i64, StoreError> {
    i64::try_from(value).map_err(|_| StoreError::InvalidInput("value is too large"))
}
