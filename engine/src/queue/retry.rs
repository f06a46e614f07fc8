//! Bounded retry of storage transactions under contention.

use std::time::Duration;

use rand::Rng;
use rusqlite::ErrorCode;
use tracing::{debug, error};

use crate::error::SchedError;

/// Default attempt bound for mutating operations.
pub const DEFAULT_RETRY_BOUND: u32 = 100;

const BACKOFF_BASE_MS: u64 = 1;
const BACKOFF_MAX_MS: u64 = 50;

/// Result of [`with_retry`].
#[derive(Debug)]
pub enum Retry<T> {
    Ok(T),
    /// A non-transient error, returned on the attempt that produced it
    Failed(rusqlite::Error),
    /// Every attempt hit contention
    ExhaustedRetries {
        attempts: u32,
        last: rusqlite::Error,
    },
}

impl<T> Retry<T> {
    pub fn into_result(self) -> Result<T, SchedError> {
        match self {
            Retry::Ok(v) => Ok(v),
            Retry::Failed(e) => Err(SchedError::Storage(e)),
            Retry::ExhaustedRetries { attempts, last } => {
                error!(attempts, error = %last, "Storage contention, giving up");
                Err(SchedError::StorageExhausted {
                    attempts,
                    source: last,
                })
            }
        }
    }
}

/// Busy/locked databases and allocation failures are worth another attempt.
pub fn is_transient(err: &rusqlite::Error) -> bool {
    matches!(
        err.sqlite_error_code(),
        Some(ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked | ErrorCode::OutOfMemory)
    )
}

/// Doubling delay plus up to half again of random jitter, so contending
/// writers do not wake in lockstep.
fn backoff(attempt: u32) -> Duration {
    let ms = BACKOFF_BASE_MS
        .saturating_mul(1u64 << attempt.min(6))
        .min(BACKOFF_MAX_MS);
    let jitter = rand::thread_rng().gen_range(0..=ms / 2);
    Duration::from_millis(ms + jitter)
}

/// Run `op` until it succeeds, fails permanently, or `bound` attempts hit
/// transient errors. `op` receives the zero-based attempt number.
pub fn with_retry<T, F>(bound: u32, mut op: F) -> Retry<T>
where
    F: FnMut(u32) -> Result<T, rusqlite::Error>,
{
    let bound = bound.max(1);
    let mut attempt = 0;
    loop {
        match op(attempt) {
            Ok(v) => return Retry::Ok(v),
            Err(e) if is_transient(&e) => {
                attempt += 1;
                if attempt >= bound {
                    return Retry::ExhaustedRetries { attempts: attempt, last: e };
                }
                debug!(attempt, error = %e, "Transient storage error, retrying");
                std::thread::sleep(backoff(attempt));
            }
            Err(e) => return Retry::Failed(e),
        }
    }
}
