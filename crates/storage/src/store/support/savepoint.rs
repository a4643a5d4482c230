#![forbid(unsafe_code)]

use super::super::StoreError;
use rusqlite::Transaction;

/// Runs `f` inside a named savepoint of the enclosing transaction. An inner
/// `Err` undoes only the savepoint; the outer transaction stays usable.
pub(in crate::store) fn in_savepoint<T, E>(
    tx: &Transaction<'_>,
    name: &'static str,
    f: impl FnOnce(&Transaction<'_>) -> Result<T, E>,
) -> Result<Result<T, E>, StoreError> {
    tx.execute_batch(&format!("SAVEPOINT {name}"))?;
    let result = f(tx);
    match &result {
        Ok(_) => tx.execute_batch(&format!("RELEASE {name}"))?,
        Err(_) => tx.execute_batch(&format!("ROLLBACK TO {name}; RELEASE {name}"))?,
    }
    Ok(result)
}
