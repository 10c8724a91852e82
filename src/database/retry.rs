//! Bounded retry wrapper around Store writes (spec.md §4.A: "every write is
//! wrapped in a bounded retry, up to 3 attempts, exponential 100ms -> 400ms").
//!
//! Grounded on `rust-srec::database::retry::retry_on_sqlite_busy`, generalized
//! from "retry on SQLITE_BUSY" to "retry while `Error::is_transient_storage_error`".

use rand::random;
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tracing::debug;

use crate::error::{Error, Result};

const MAX_RETRIES: usize = 3;
const BASE_DELAY_MS: u64 = 100;
const MAX_DELAY_MS: u64 = 400;

pub async fn retry_db<T, F, Fut>(op_name: &'static str, mut op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt = 0usize;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) => {
                if !err.is_transient_storage_error() || attempt >= MAX_RETRIES {
                    if attempt >= MAX_RETRIES && err.is_transient_storage_error() {
                        return Err(Error::StorageUnavailable(format!(
                            "{op_name} failed after {MAX_RETRIES} retries: {err}"
                        )));
                    }
                    return Err(err);
                }

                let exp_ms = BASE_DELAY_MS.saturating_mul(1u64 << attempt);
                let capped_ms = exp_ms.min(MAX_DELAY_MS);
                let jitter_ms = random::<u64>() % (capped_ms / 4 + 1);
                let delay = Duration::from_millis((capped_ms + jitter_ms).min(MAX_DELAY_MS));

                debug!(op = op_name, attempt, ?delay, "retrying transient storage error");
                sleep(delay).await;
                attempt += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn succeeds_without_retry_on_first_try() {
        let calls = AtomicUsize::new(0);
        let result = retry_db("noop", || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok::<_, Error>(42)
        })
        .await
        .unwrap();
        assert_eq!(result, 42);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn propagates_non_transient_errors_immediately() {
        let calls = AtomicUsize::new(0);
        let result: Result<()> = retry_db("fails", || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(Error::validation("bad input"))
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
