//! Bounded retry for store write conflicts.

use crate::config::RetryPolicy;
use crate::error::{QuotaError, QuotaResult};
use log::warn;
use rand::Rng;
use std::thread;
use std::time::Duration;

/// Runs `attempt` until it succeeds, fails with a non-conflict error, or the
/// retry budget is spent.
///
/// Only write conflicts (`SQLITE_BUSY`/`SQLITE_LOCKED`) are retried. Exhausted
/// retries surface as `QuotaError::Conflict`.
pub(crate) fn with_retry<T>(
    policy: &RetryPolicy,
    operation: &'static str,
    mut attempt: impl FnMut() -> QuotaResult<T>,
) -> QuotaResult<T> {
    let mut attempts: u32 = 0;
    loop {
        attempts += 1;
        match attempt() {
            Err(err) if is_conflict(&err) => {
                if attempts > policy.max_retries {
                    return Err(QuotaError::Conflict { attempts });
                }
                let backoff = jittered_backoff(policy, attempts);
                warn!(
                    "event=mutation_conflict_retry module=mutator status=retry op={} attempt={} backoff_ms={}",
                    operation,
                    attempts,
                    backoff.as_millis()
                );
                thread::sleep(backoff);
            }
            other => return other,
        }
    }
}

fn is_conflict(err: &QuotaError) -> bool {
    match err {
        QuotaError::Db(db) => db.is_write_conflict(),
        _ => false,
    }
}

/// Full jitter over an exponentially growing, capped ceiling.
fn jittered_backoff(policy: &RetryPolicy, attempt: u32) -> Duration {
    let exp = policy
        .base_backoff_ms
        .saturating_mul(1u64 << attempt.saturating_sub(1).min(16));
    let ceiling = exp.min(policy.max_backoff_ms);
    if ceiling == 0 {
        return Duration::ZERO;
    }
    Duration::from_millis(rand::thread_rng().gen_range(0..=ceiling))
}

#[cfg(test)]
mod tests {
    use super::{jittered_backoff, with_retry};
    use crate::config::RetryPolicy;
    use crate::db::DbError;
    use crate::error::QuotaError;
    use rusqlite::ffi;

    fn busy() -> QuotaError {
        QuotaError::Db(DbError::Sqlite(rusqlite::Error::SqliteFailure(
            ffi::Error::new(ffi::SQLITE_BUSY),
            None,
        )))
    }

    fn fast_policy() -> RetryPolicy {
        RetryPolicy {
            max_retries: 3,
            base_backoff_ms: 0,
            max_backoff_ms: 0,
        }
    }

    #[test]
    fn conflicts_are_retried_then_surface_as_conflict() {
        let mut calls = 0;
        let result: Result<(), _> = with_retry(&fast_policy(), "test", || {
            calls += 1;
            Err(busy())
        });
        assert!(matches!(result, Err(QuotaError::Conflict { attempts: 4 })));
        assert_eq!(calls, 4);
    }

    #[test]
    fn success_after_transient_conflict() {
        let mut calls = 0;
        let result = with_retry(&fast_policy(), "test", || {
            calls += 1;
            if calls < 3 {
                Err(busy())
            } else {
                Ok(calls)
            }
        });
        assert_eq!(result.unwrap(), 3);
    }

    #[test]
    fn terminal_errors_are_not_retried() {
        let mut calls = 0;
        let result: Result<(), _> = with_retry(&fast_policy(), "test", || {
            calls += 1;
            Err(QuotaError::InvalidData("bad".to_string()))
        });
        assert!(matches!(result, Err(QuotaError::InvalidData(_))));
        assert_eq!(calls, 1);
    }

    #[test]
    fn backoff_never_exceeds_cap() {
        let policy = RetryPolicy {
            max_retries: 3,
            base_backoff_ms: 10,
            max_backoff_ms: 25,
        };
        for attempt in 1..8 {
            assert!(jittered_backoff(&policy, attempt).as_millis() <= 25);
        }
    }
}
