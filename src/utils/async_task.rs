use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tokio::time::sleep;
use tokio::time::timeout;
use tracing::debug;
use tracing::error;
use tracing::warn;

use crate::BackoffPolicy;
use crate::ConnectionError;
use crate::Result;

/// Runs `task` with a per-attempt timeout, retrying transient connection
/// failures with randomized exponential backoff.
///
/// Logical errors are returned on first sight. After `max_retries` retries the
/// last transient failure is reported as [`ConnectionError::RetryExhausted`].
pub(crate) async fn task_with_timeout_and_exponential_backoff<F, T, P>(
    operation: &str,
    task: F,
    policy: &BackoffPolicy,
) -> Result<P>
where
    F: Fn() -> T,
    T: Future<Output = Result<P>>,
{
    let timeout_duration = policy.timeout();
    let mut retries = 0;

    loop {
        let error = match timeout(timeout_duration, task()).await {
            Ok(Ok(r)) => return Ok(r),
            Ok(Err(e)) if !e.is_retryable() => return Err(e),
            Ok(Err(e)) => e,
            Err(_) => ConnectionError::Timeout {
                operation: operation.to_string(),
                duration: timeout_duration,
            }
            .into(),
        };

        if retries >= policy.max_retries {
            warn!(operation, attempts = retries + 1, %error, "retries exhausted");
            return Err(ConnectionError::RetryExhausted {
                operation: operation.to_string(),
                attempts: retries + 1,
                last_error: error.to_string(),
            }
            .into());
        }

        let delay = backoff_delay(policy, retries);
        debug!(operation, retry = retries + 1, ?delay, %error, "transient failure, backing off");
        sleep(delay).await;
        retries += 1;
    }
}

/// Sleep before retry number `retry + 1`: `base * random(1..=2^(retry+1))`,
/// capped at `max_delay_ms`.
pub(crate) fn backoff_delay(
    policy: &BackoffPolicy,
    retry: usize,
) -> Duration {
    let shift = (retry as u32 + 1).min(30);
    let factor = rand::thread_rng().gen_range(1..=(1u64 << shift));
    let millis = policy.base_delay_ms.saturating_mul(factor).min(policy.max_delay_ms);
    Duration::from_millis(millis)
}

// Helper function to spawn tasks and log their failures
pub(crate) fn spawn_task<F, Fut>(
    name: &str,
    task_fn: F,
) -> tokio::task::JoinHandle<()>
where
    F: FnOnce() -> Fut + Send + 'static,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    let name = name.to_string();
    tokio::spawn(async move {
        if let Err(e) = task_fn().await {
            error!("spawned task: {name} stopped or encountered an error: {:?}", e);
        }
    })
}
