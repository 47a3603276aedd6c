//! Lock-aware transactional write wrapper

use crate::resilience::Backoff;
use crate::storage::{StorageError, StorageResult};
use rusqlite::{Connection, ErrorCode, Transaction, TransactionBehavior};

/// True for SQLITE_BUSY / SQLITE_LOCKED
pub fn is_lock_error(err: &rusqlite::Error) -> bool {
    matches!(
        err.sqlite_error_code(),
        Some(ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked)
    )
}

/// Runs `op` inside an immediate transaction, retrying lock errors
///
/// Each attempt begins a fresh transaction; a failed attempt is rolled back
/// before the next one, so at most one attempt's writes are committed.
/// Lock errors are retried with `backoff` up to its attempt cap and then
/// surfaced as [`StorageError::Locked`]. Other errors are not retried.
pub fn with_write_retry<T, F>(conn: &mut Connection, backoff: &Backoff, mut op: F) -> StorageResult<T>
where
    F: FnMut(&Transaction<'_>) -> rusqlite::Result<T>,
{
    let mut attempts = 0u32;
    loop {
        attempts += 1;
        let result = run_once(conn, &mut op);
        match result {
            Ok(value) => {
                if attempts > 1 {
                    tracing::debug!(attempts, "Write succeeded after lock contention");
                }
                return Ok(value);
            }
            Err(err) if is_lock_error(&err) => {
                if !backoff.should_retry(attempts) {
                    tracing::error!(attempts, error = %err, "Database still locked, giving up");
                    return Err(StorageError::Locked { attempts });
                }
                let delay = backoff.delay_for(attempts);
                tracing::debug!(attempts, delay_ms = delay.as_millis() as u64, "Database locked, retrying write");
                std::thread::sleep(delay);
            }
            Err(err) => return Err(StorageError::classify(err)),
        }
    }
}

fn run_once<T, F>(conn: &mut Connection, op: &mut F) -> rusqlite::Result<T>
where
    F: FnMut(&Transaction<'_>) -> rusqlite::Result<T>,
{
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
    let value = op(&tx)?;
    tx.commit()?;
    Ok(value)
}
