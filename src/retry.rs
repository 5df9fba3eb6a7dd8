use std::future::Future;

use rand::Rng as _;
use tokio_util::sync::CancellationToken;

/// Retry decision returned by the error classifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryAction {
    Retry,
    Abort,
}

/// Exponential backoff with jitter so concurrent downloads that hit the same
/// transient failure don't stampede the endpoint in lockstep.
#[derive(Debug, Clone)]
pub struct Backoff {
    pub max_retries: u32,
    pub base_delay_secs: u64,
    pub max_delay_secs: u64,
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            max_retries: 4,
            base_delay_secs: 2,
            max_delay_secs: 60,
        }
    }
}

impl Backoff {
    /// Delay before retry number `retry` (0-indexed):
    /// `min(base << retry, max) + jitter(0..base)`.
    pub fn delay(&self, retry: u32) -> std::time::Duration {
        let exp = self
            .base_delay_secs
            .saturating_mul(1u64.checked_shl(retry).unwrap_or(u64::MAX));
        let capped = exp.min(self.max_delay_secs);
        let jitter = if self.base_delay_secs > 0 {
            rand::thread_rng().gen_range(0..self.base_delay_secs)
        } else {
            0
        };
        std::time::Duration::from_secs(capped + jitter)
    }
}

/// Outcome of a retried operation, distinguishing exhaustion from interrupt.
#[derive(Debug)]
pub enum RetryOutcome<T, E> {
    Ok(T),
    /// The classifier aborted or retries ran out. Carries the final error
    /// and how many attempts were made.
    Err { error: E, attempts: u32 },
    /// The cancellation token fired while waiting to retry.
    Interrupted,
}

/// Run `operation` up to `1 + max_retries` times, sleeping between attempts.
///
/// `classifier` decides per error whether a retry is worth it. The operation
/// receives the attempt index so it can refresh short-lived inputs (expired
/// download URLs). The sleep is raced against `cancel` so an interrupt never
/// waits out a backoff window.
pub async fn retry_with_backoff<F, Fut, T, E, C>(
    backoff: &Backoff,
    cancel: &CancellationToken,
    classifier: C,
    operation: F,
) -> RetryOutcome<T, E>
where
    F: Fn(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    C: Fn(&E) -> RetryAction,
    E: std::fmt::Display,
{
    let total_attempts = backoff.max_retries + 1;

    for attempt in 0..total_attempts {
        match operation(attempt).await {
            Ok(value) => return RetryOutcome::Ok(value),
            Err(error) => {
                let give_up =
                    classifier(&error) == RetryAction::Abort || attempt + 1 >= total_attempts;
                if give_up {
                    return RetryOutcome::Err {
                        error,
                        attempts: attempt + 1,
                    };
                }
                let delay = backoff.delay(attempt);
                tracing::warn!(
                    "Attempt {}/{} failed, retrying in {}s: {}",
                    attempt + 1,
                    total_attempts,
                    delay.as_secs(),
                    error
                );
                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = cancel.cancelled() => return RetryOutcome::Interrupted,
                }
            }
        }
    }

    unreachable!("loop returns on success, abort, or exhaustion")
}
