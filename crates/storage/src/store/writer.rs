#![forbid(unsafe_code)]

use super::StoreError;
use rusqlite::{Connection, Transaction, TransactionBehavior};
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::mpsc;
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{debug, error, warn};

pub const DEFAULT_WRITE_TIMEOUT: Duration = Duration::from_millis(5_000);

type WriteTask = Box<dyn FnOnce(&mut Connection) + Send + 'static>;

/// Owns the only write connection. Submitted closures run one at a time, each
/// inside its own immediate transaction: `Ok` commits, `Err` rolls back.
pub struct WriteExecutor {
    sender: Option<mpsc::Sender<WriteTask>>,
    worker: Option<JoinHandle<()>>,
}

impl std::fmt::Debug for WriteExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WriteExecutor")
            .field("open", &self.sender.is_some())
            .finish()
    }
}

impl WriteExecutor {
    pub(in crate::store) fn spawn(conn: Connection) -> Result<Self, StoreError> {
        let (sender, receiver) = mpsc::channel::<WriteTask>();
        let worker = std::thread::Builder::new()
            .name("ao-store-writer".to_string())
            .spawn(move || {
                let mut conn = conn;
                while let Ok(task) = receiver.recv() {
                    task(&mut conn);
                }
                debug!("store writer stopped");
            })?;
        Ok(Self {
            sender: Some(sender),
            worker: Some(worker),
        })
    }

    /// Runs `f` on the writer thread and waits at most `timeout` for its result.
    ///
    /// `WriteTimeout` means the outcome is unknown: the closure may still commit
    /// after the caller stopped waiting.
    pub fn submit<T, F>(&self, timeout: Duration, f: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(&Transaction<'_>) -> Result<T, StoreError> + Send + 'static,
    {
        let sender = self.sender.as_ref().ok_or(StoreError::WriterClosed)?;
        let (reply_tx, reply_rx) = mpsc::sync_channel::<Result<T, StoreError>>(1);

        let task: WriteTask = Box::new(move |conn: &mut Connection| {
            let result = run_in_transaction(conn, f);
            // The caller may have timed out and dropped the receiver.
            let _ = reply_tx.send(result);
        });
        sender.send(task).map_err(|_| StoreError::WriterClosed)?;

        match reply_rx.recv_timeout(timeout) {
            Ok(result) => result,
            Err(mpsc::RecvTimeoutError::Timeout) => {
                let timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
                warn!(timeout_ms, "store write timed out; outcome unknown");
                Err(StoreError::WriteTimeout { timeout_ms })
            }
            Err(mpsc::RecvTimeoutError::Disconnected) => Err(StoreError::WriteAborted),
        }
    }
}

fn run_in_transaction<T, F>(conn: &mut Connection, f: F) -> Result<T, StoreError>
where
    F: FnOnce(&Transaction<'_>) -> Result<T, StoreError>,
{
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
    let outcome = catch_unwind(AssertUnwindSafe(|| f(&tx)));
    match outcome {
        Ok(Ok(value)) => {
            tx.commit()?;
            Ok(value)
        }
        // Dropping the transaction rolls it back.
        Ok(Err(err)) => Err(err),
        Err(_) => {
            error!("store write panicked; transaction rolled back");
            Err(StoreError::WriteAborted)
        }
    }
}

impl Drop for WriteExecutor {
    fn drop(&mut self) {
        self.sender.take();
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}
