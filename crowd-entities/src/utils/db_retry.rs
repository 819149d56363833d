//! Batch-level retry for transient database failures
//!
//! Relocation batches and restamp batches run through [`retry_transient`]; lock
//! contention, pool exhaustion and statement timeouts are retried with exponential
//! backoff per [`RetryPolicy`]. Anything else fails immediately.

use crowd_common::config::RetryPolicy;
use crowd_common::{Error, Result};
use std::future::Future;
use std::time::{Duration, Instant};

/// Retry an operation while it fails with a transient error.
///
/// **Algorithm:**
/// 1. Attempt operation
/// 2. If successful, return result
/// 3. If the error is transient ([`Error::is_transient`]) and attempts remain:
///    log WARN, sleep `policy.backoff_for(attempt)`, retry
/// 4. Otherwise return the error as-is
///
/// # Arguments
/// * `operation_name` - Name for logging (e.g., "relocate member activities")
/// * `policy` - Attempt limit and backoff bounds
/// * `operation` - Async closure that performs one complete attempt
pub async fn retry_transient<F, Fut, T>(
    operation_name: &str,
    policy: &RetryPolicy,
    mut operation: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let start_time = Instant::now();
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 0;

    loop {
        attempt += 1;

        match operation().await {
            Ok(result) => {
                if attempt > 1 {
                    let elapsed_ms = start_time.elapsed().as_millis();
                    if elapsed_ms > 2000 {
                        tracing::warn!(
                            operation = operation_name,
                            attempt,
                            elapsed_ms,
                            "Operation succeeded after significant retry period (>2s)"
                        );
                    } else {
                        tracing::debug!(
                            operation = operation_name,
                            attempt,
                            elapsed_ms,
                            "Operation succeeded after retry"
                        );
                    }
                }
                return Ok(result);
            }
            Err(err) => {
                if !err.is_transient() {
                    return Err(err);
                }

                if attempt >= max_attempts {
                    tracing::error!(
                        operation = operation_name,
                        attempt,
                        elapsed_ms = start_time.elapsed().as_millis(),
                        error = %err,
                        "Transient failure persisted, giving up"
                    );
                    return Err(err);
                }

                let backoff = policy.backoff_for(attempt);
                tracing::warn!(
                    operation = operation_name,
                    attempt,
                    backoff_ms = backoff.as_millis(),
                    error = %err,
                    "Transient failure, will retry after backoff"
                );

                tokio::time::sleep(backoff).await;
            }
        }
    }
}

/// Run a future under a time budget, mapping expiry to [`Error::Timeout`]
pub async fn with_timeout<Fut, T>(operation_name: &str, budget: Duration, fut: Fut) -> Result<T>
where
    Fut: Future<Output = Result<T>>,
{
    match tokio::time::timeout(budget, fut).await {
        Ok(result) => result,
        Err(_) => Err(Error::Timeout(format!(
            "{} exceeded {} ms",
            operation_name,
            budget.as_millis()
        ))),
    }
}
