//! Bounded retry for transient storage failures

use super::traits::{StorageError, StorageResult};
use std::time::Duration;
use tracing::warn;

/// How often and how patiently to retry a store call.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Total attempts, including the first
    pub attempts: u32,
    /// Delay before the first retry; doubled on each further retry
    pub initial_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            initial_backoff: Duration::from_millis(50),
        }
    }
}

impl RetryPolicy {
    /// A policy that never retries.
    pub fn none() -> Self {
        Self {
            attempts: 1,
            initial_backoff: Duration::ZERO,
        }
    }
}

/// Run `op`, retrying only errors that report themselves transient.
///
/// Store operations are idempotent merges and deletes, so replaying one
/// after a busy/locked failure cannot double-apply.
pub async fn with_retry<T, F>(policy: RetryPolicy, what: &str, mut op: F) -> StorageResult<T>
where
    F: FnMut() -> StorageResult<T>,
{
    let mut backoff = policy.initial_backoff;
    let mut attempt = 1;
    loop {
        match op() {
            Err(e) if e.is_transient() && attempt < policy.attempts.max(1) => {
                warn!(operation = what, attempt, error = %e, "transient storage error, retrying");
                tokio::time::sleep(backoff).await;
                backoff = backoff.saturating_mul(2);
                attempt += 1;
            }
            other => return other,
        }
    }
}

/// Build the error SQLite reports under lock contention (used by tests).
#[cfg(test)]
pub(crate) fn busy_error() -> StorageError {
    StorageError::Database(rusqlite::Error::SqliteFailure(
        rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_BUSY),
        Some("database is locked".to_string()),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    fn fast() -> RetryPolicy {
        RetryPolicy {
            attempts: 3,
            initial_backoff: Duration::from_millis(1),
        }
    }

    #[tokio::test]
    async fn retries_transient_errors_until_success() {
        let calls = Cell::new(0);
        let result = with_retry(fast(), "test", || {
            calls.set(calls.get() + 1);
            if calls.get() < 3 {
                Err(busy_error())
            } else {
                Ok(7)
            }
        })
        .await;
        assert_eq!(result.unwrap(), 7);
        assert_eq!(calls.get(), 3);
    }

    #[tokio::test]
    async fn gives_up_after_configured_attempts() {
        let calls = Cell::new(0);
        let result: StorageResult<()> = with_retry(fast(), "test", || {
            calls.set(calls.get() + 1);
            Err(busy_error())
        })
        .await;
        assert!(result.unwrap_err().is_transient());
        assert_eq!(calls.get(), 3);
    }

    #[tokio::test]
    async fn does_not_retry_data_errors() {
        let calls = Cell::new(0);
        let result: StorageResult<()> = with_retry(fast(), "test", || {
            calls.set(calls.get() + 1);
            Err(StorageError::InvalidData("bad embedding".into()))
        })
        .await;
        assert!(matches!(result, Err(StorageError::InvalidData(_))));
        assert_eq!(calls.get(), 1);
    }
}
