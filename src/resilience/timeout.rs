//! Bounded Execution
//!
//! Cancellable timeout wrapper with a typed outcome, and the backoff sleeps
//! used between attempts.

use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::error::{IdpError, IdpResult, NetworkError};

/// Outcome of a call run under a timeout.
#[derive(Debug)]
pub enum TimedCall<T> {
    /// The call finished in time.
    Completed(T),
    /// The timeout elapsed first. The call future has been dropped.
    TimedOut(Duration),
    /// The caller cancelled. The call future has been dropped.
    Cancelled,
}

impl<T> TimedCall<T> {
    /// Fold the timeout and cancellation outcomes into network errors.
    pub fn into_result(self) -> IdpResult<T> {
        match self {
            Self::Completed(value) => Ok(value),
            Self::TimedOut(timeout) => Err(IdpError::Network(NetworkError::Timeout { timeout })),
            Self::Cancelled => Err(IdpError::Network(NetworkError::Cancelled)),
        }
    }
}

/// Run `future` until it completes, `timeout` elapses, or `cancel` fires.
///
/// Cancellation wins over a simultaneous completion.
pub async fn run_with_timeout<F>(
    future: F,
    timeout: Duration,
    cancel: &CancellationToken,
) -> TimedCall<F::Output>
where
    F: Future,
{
    tokio::select! {
        biased;
        _ = cancel.cancelled() => TimedCall::Cancelled,
        result = tokio::time::timeout(timeout, future) => match result {
            Ok(value) => TimedCall::Completed(value),
            Err(_) => TimedCall::TimedOut(timeout),
        },
    }
}

/// Sleep for `delay` unless cancelled. Returns `false` when cancelled.
pub async fn sleep_cancellable(delay: Duration, cancel: &CancellationToken) -> bool {
    if delay.is_zero() {
        return !cancel.is_cancelled();
    }

    tokio::select! {
        biased;
        _ = cancel.cancelled() => false,
        _ = tokio::time::sleep(delay) => true,
    }
}

/// Exponential backoff `base * 2^attempt`, optionally jittered by up to
/// `jitter` of its value, never above `max`.
pub fn exponential_backoff(base: Duration, attempt: u32, jitter: f64, max: Duration) -> Duration {
    let exp = 2u32.saturating_pow(attempt.min(16));
    let delay = base.saturating_mul(exp);

    let delay = if jitter > 0.0 {
        let factor = 1.0 + rand::thread_rng().gen_range(-jitter..=jitter);
        delay.mul_f64(factor.max(0.0))
    } else {
        delay
    };

    delay.min(max)
}
