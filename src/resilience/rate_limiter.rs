//! Rate Limiter
//!
//! Rate-limit aware execution of provider calls. Tracks, per operation, the
//! point until which the provider asked us to back off and a rolling
//! history of calls, and retries throttled or unavailable responses with
//! bounded, cancellable sleeps.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::core::RateLimitedResponse;
use crate::error::{IdpError, IdpResult, NetworkError, RateLimitError};
use crate::resilience::timeout::{exponential_backoff, run_with_timeout, sleep_cancellable, TimedCall};
use crate::telemetry::{NoOpMetrics, ResilienceMetrics};
use crate::types::{RateLimitConfig, DEFAULT_RATE_LIMIT_CONFIG};

/// Active provider rate limit of one operation.
#[derive(Debug, Clone, Copy)]
pub struct RateLimitState {
    pub blocked_until: Instant,
    pub recorded_at: DateTime<Utc>,
}

/// Rate limiter statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RateLimiterStats {
    pub total_attempts: u64,
    pub rate_limited_responses: u64,
    pub unavailable_responses: u64,
    pub timeouts: u64,
    pub retries: u64,
    pub exhausted: u64,
}

/// Rate-limit aware executor shared by all provider calls.
pub struct RateLimiter {
    config: RateLimitConfig,
    rate_limits: DashMap<String, RateLimitState>,
    call_history: DashMap<String, VecDeque<Instant>>,
    stats: Mutex<RateLimiterStats>,
    metrics: Arc<dyn ResilienceMetrics>,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            config,
            rate_limits: DashMap::new(),
            call_history: DashMap::new(),
            stats: Mutex::new(RateLimiterStats::default()),
            metrics: Arc::new(NoOpMetrics),
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<dyn ResilienceMetrics>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn config(&self) -> &RateLimitConfig {
        &self.config
    }

    /// Execute `call` with bounded retries, honoring provider retry hints.
    ///
    /// Each attempt runs under the configured call timeout. Throttled (429)
    /// and unavailable (503, 408) responses are retried after the delay the
    /// provider asked for, or an exponential backoff when it gave none. Any
    /// other response is returned as is. Cancelling `cancel` aborts the
    /// in-flight attempt and any pending sleep.
    pub async fn execute_with_rate_limit_handling<F, Fut, R>(
        &self,
        mut call: F,
        operation: &str,
        cancel: &CancellationToken,
    ) -> IdpResult<R>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = IdpResult<R>>,
        R: RateLimitedResponse,
    {
        let max_attempts = self.config.max_attempts.max(1);
        let started = Instant::now();

        for attempt in 1..=max_attempts {
            if let Some(delay) = self.get_retry_delay(operation) {
                tracing::warn!(
                    operation,
                    delay_ms = delay.as_millis() as u64,
                    attempt,
                    "Operation is rate limited, waiting before attempt"
                );

                if delay > self.config.max_retry_delay {
                    return Err(IdpError::RateLimit(RateLimitError::DelayTooLong {
                        operation: operation.to_string(),
                        delay,
                    }));
                }

                if !sleep_cancellable(delay, cancel).await {
                    return Err(IdpError::Network(NetworkError::Cancelled));
                }
            }

            self.record_api_call(operation);
            self.stats.lock().total_attempts += 1;
            if attempt > 1 {
                self.stats.lock().retries += 1;
            }

            let outcome = run_with_timeout(call(), self.config.call_timeout, cancel).await;

            let response = match outcome {
                TimedCall::Cancelled => {
                    tracing::info!(operation, attempt, "Provider call cancelled by caller");
                    return Err(IdpError::Network(NetworkError::Cancelled));
                }
                TimedCall::TimedOut(timeout) => {
                    self.stats.lock().timeouts += 1;
                    tracing::warn!(
                        operation,
                        attempt,
                        max_attempts,
                        timeout_ms = timeout.as_millis() as u64,
                        "Provider call timed out"
                    );

                    if attempt >= max_attempts {
                        break;
                    }
                    self.backoff(attempt, operation, cancel).await?;
                    continue;
                }
                TimedCall::Completed(Err(error)) => {
                    if !error.is_retryable() {
                        return Err(error);
                    }

                    tracing::warn!(
                        operation,
                        attempt,
                        max_attempts,
                        error = %error,
                        "Provider call failed"
                    );

                    if attempt >= max_attempts {
                        break;
                    }
                    self.backoff(attempt, operation, cancel).await?;
                    continue;
                }
                TimedCall::Completed(Ok(response)) => response,
            };

            let meta = response.response_meta();
            match meta.status {
                429 => {
                    self.stats.lock().rate_limited_responses += 1;
                    self.metrics.record_rate_limited(operation);
                    let delay = meta
                        .suggested_delay(Utc::now())
                        .unwrap_or(self.config.default_rate_limit_delay);

                    tracing::warn!(
                        operation,
                        attempt,
                        retry_after_secs = delay.as_secs_f64(),
                        "Provider rate limit hit"
                    );
                    self.record_rate_limit(operation, delay);

                    if attempt >= max_attempts {
                        self.stats.lock().exhausted += 1;
                        return Err(IdpError::RateLimit(RateLimitError::Exceeded {
                            operation: operation.to_string(),
                            retry_after: delay,
                        }));
                    }
                }
                503 | 408 => {
                    self.stats.lock().unavailable_responses += 1;
                    let delay = meta.suggested_delay(Utc::now()).unwrap_or_else(|| {
                        exponential_backoff(
                            self.config.backoff_base,
                            attempt,
                            self.config.backoff_jitter,
                            self.config.max_retry_delay,
                        )
                    });

                    tracing::warn!(
                        operation,
                        status = meta.status,
                        attempt,
                        retry_after_secs = delay.as_secs_f64(),
                        "Provider unavailable"
                    );

                    if attempt >= max_attempts {
                        break;
                    }

                    if delay > self.config.max_retry_delay {
                        return Err(IdpError::RateLimit(RateLimitError::DelayTooLong {
                            operation: operation.to_string(),
                            delay,
                        }));
                    }

                    if !sleep_cancellable(delay, cancel).await {
                        return Err(IdpError::Network(NetworkError::Cancelled));
                    }
                }
                status => {
                    self.log_completion(operation, status, started.elapsed(), attempt);
                    return Ok(response);
                }
            }
        }

        self.stats.lock().exhausted += 1;
        tracing::error!(operation, max_attempts, "Max retry attempts exceeded");
        Err(IdpError::RateLimit(RateLimitError::RetriesExhausted {
            operation: operation.to_string(),
            attempts: max_attempts,
        }))
    }

    async fn backoff(&self, attempt: u32, operation: &str, cancel: &CancellationToken) -> IdpResult<()> {
        let delay = exponential_backoff(
            self.config.backoff_base,
            attempt,
            self.config.backoff_jitter,
            self.config.max_retry_delay,
        );
        tracing::debug!(operation, attempt, delay_ms = delay.as_millis() as u64, "Backing off");

        if sleep_cancellable(delay, cancel).await {
            Ok(())
        } else {
            Err(IdpError::Network(NetworkError::Cancelled))
        }
    }

    /// Whether the provider asked us to back off and the delay has not passed.
    pub fn is_rate_limited(&self, operation: &str) -> bool {
        self.get_retry_delay(operation).is_some()
    }

    /// Remaining delay of an active rate limit. Expired limits are removed.
    pub fn get_retry_delay(&self, operation: &str) -> Option<Duration> {
        let now = Instant::now();
        self.rate_limits
            .remove_if(operation, |_, state| state.blocked_until <= now);

        self.rate_limits
            .get(operation)
            .map(|state| state.blocked_until.saturating_duration_since(now))
    }

    /// Block `operation` for `retry_after`.
    pub fn record_rate_limit(&self, operation: &str, retry_after: Duration) {
        let state = RateLimitState {
            blocked_until: Instant::now() + retry_after,
            recorded_at: Utc::now(),
        };
        self.rate_limits.insert(operation.to_string(), state);

        tracing::warn!(
            operation,
            retry_after_secs = retry_after.as_secs_f64(),
            "Rate limit recorded"
        );
    }

    /// Record a call attempt, pruning entries older than the history window.
    pub fn record_api_call(&self, operation: &str) {
        let now = Instant::now();
        let window = self.config.history_window;

        let count = {
            let mut calls = self.call_history.entry(operation.to_string()).or_default();
            calls.push_back(now);
            while let Some(oldest) = calls.front() {
                if now.saturating_duration_since(*oldest) > window {
                    calls.pop_front();
                } else {
                    break;
                }
            }
            calls.len()
        };

        if count > self.config.high_volume_threshold {
            tracing::warn!(
                operation,
                calls = count,
                window_secs = window.as_secs(),
                "High volume of provider calls"
            );
        }
    }

    /// Calls recorded for `operation` within the history window.
    pub fn call_count(&self, operation: &str) -> usize {
        let now = Instant::now();
        let window = self.config.history_window;
        self.call_history
            .get(operation)
            .map(|calls| {
                calls
                    .iter()
                    .filter(|at| now.saturating_duration_since(**at) <= window)
                    .count()
            })
            .unwrap_or(0)
    }

    pub fn stats(&self) -> RateLimiterStats {
        self.stats.lock().clone()
    }

    fn log_completion(&self, operation: &str, status: u16, elapsed: Duration, attempts: u32) {
        let duration_ms = elapsed.as_millis() as u64;
        match status {
            401 | 403 | 429 => tracing::warn!(
                operation, status, duration_ms, attempts,
                "Provider call completed"
            ),
            500 | 503 => tracing::error!(
                operation, status, duration_ms, attempts,
                "Provider call completed"
            ),
            _ => tracing::info!(
                operation, status, duration_ms, attempts,
                "Provider call completed"
            ),
        }

        if elapsed > self.config.slow_call_threshold {
            tracing::warn!(operation, duration_ms, "Slow provider call");
        }

        if attempts > 1 {
            tracing::info!(operation, attempts, "Provider call required retries");
        }
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(DEFAULT_RATE_LIMIT_CONFIG)
    }
}

/// Create rate limiter.
pub fn create_rate_limiter(config: RateLimitConfig) -> RateLimiter {
    RateLimiter::new(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{HttpRequest, HttpResponse, HttpTransport, MockHttpTransport, ResponseMeta};
    use crate::telemetry::metrics::names;
    use crate::telemetry::InMemoryMetrics;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    async fn run(
        limiter: &RateLimiter,
        transport: &Arc<MockHttpTransport>,
        cancel: &CancellationToken,
    ) -> IdpResult<HttpResponse> {
        limiter
            .execute_with_rate_limit_handling(
                || {
                    let transport = Arc::clone(transport);
                    async move { transport.send(HttpRequest::get("https://idp.test/token")).await }
                },
                "token",
                cancel,
            )
            .await
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_first_attempt() {
        let limiter = RateLimiter::default();
        let transport = Arc::new(MockHttpTransport::new());
        transport.queue_status(200);

        let response = run(&limiter, &transport, &CancellationToken::new()).await.unwrap();

        assert_eq!(response.status, 200);
        assert_eq!(transport.request_count(), 1);
        assert_eq!(limiter.call_count("token"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_non_retryable_status_returned_immediately() {
        let limiter = RateLimiter::default();
        let transport = Arc::new(MockHttpTransport::new());
        transport.queue_status(400).queue_status(200);

        let response = run(&limiter, &transport, &CancellationToken::new()).await.unwrap();

        assert_eq!(response.status, 400);
        assert_eq!(transport.request_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_429_honors_retry_after_then_succeeds() {
        let limiter = RateLimiter::default();
        let transport = Arc::new(MockHttpTransport::new());
        transport
            .queue_response(HttpResponse::new(429).with_header("retry-after", "2"))
            .queue_status(200);

        let started = Instant::now();
        let response = run(&limiter, &transport, &CancellationToken::new()).await.unwrap();

        assert_eq!(response.status, 200);
        assert_eq!(transport.request_count(), 2);
        assert!(started.elapsed() >= Duration::from_secs(2));
        assert!(!limiter.is_rate_limited("token"));
        assert_eq!(limiter.stats().rate_limited_responses, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_429_without_hint_blocks_for_default_delay() {
        let limiter = RateLimiter::default();
        let transport = Arc::new(MockHttpTransport::new());
        transport.queue_status(429).queue_status(200);

        let started = Instant::now();
        run(&limiter, &transport, &CancellationToken::new()).await.unwrap();

        assert!(started.elapsed() >= Duration::from_secs(60));
    }

    #[tokio::test(start_paused = true)]
    async fn test_429_on_last_attempt_is_rate_limit_error() {
        let limiter = RateLimiter::default();
        let transport = Arc::new(MockHttpTransport::new());
        transport.set_default_response(HttpResponse::new(429).with_header("retry-after", "1"));

        let result = run(&limiter, &transport, &CancellationToken::new()).await;

        assert!(matches!(
            result,
            Err(IdpError::RateLimit(RateLimitError::Exceeded { ref operation, .. })) if operation == "token"
        ));
        assert_eq!(transport.request_count(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_429_responses_are_counted_in_metrics() {
        let metrics = Arc::new(InMemoryMetrics::new());
        let limiter = RateLimiter::default().with_metrics(metrics.clone());
        let transport = Arc::new(MockHttpTransport::new());
        transport
            .queue_response(HttpResponse::new(429).with_header("retry-after", "1"))
            .queue_status(503)
            .queue_status(200);

        run(&limiter, &transport, &CancellationToken::new()).await.unwrap();

        let entries = metrics.get_entries_by_name(names::RATE_LIMITED_TOTAL);
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].label("operation"), Some("token"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_503_backoff_and_exhaustion() {
        let limiter = RateLimiter::default();
        let transport = Arc::new(MockHttpTransport::new());
        transport.set_default_response(HttpResponse::new(503));

        let started = Instant::now();
        let result = run(&limiter, &transport, &CancellationToken::new()).await;

        assert!(matches!(
            result,
            Err(IdpError::RateLimit(RateLimitError::RetriesExhausted { attempts: 3, .. }))
        ));
        assert_eq!(transport.request_count(), 3);
        // 2s after the first attempt, 4s after the second
        assert_eq!(started.elapsed(), Duration::from_secs(6));
    }

    #[tokio::test(start_paused = true)]
    async fn test_hint_above_cap_is_rejected() {
        let limiter = RateLimiter::default();
        let transport = Arc::new(MockHttpTransport::new());
        transport
            .queue_response(HttpResponse::new(503).with_header("retry-after", "3600"))
            .queue_status(200);

        let started = Instant::now();
        let result = run(&limiter, &transport, &CancellationToken::new()).await;

        assert!(matches!(
            result,
            Err(IdpError::RateLimit(RateLimitError::DelayTooLong { .. }))
        ));
        assert_eq!(started.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_active_block_above_cap_aborts_before_calling() {
        let limiter = RateLimiter::default();
        limiter.record_rate_limit("token", Duration::from_secs(10 * 60));

        let transport = Arc::new(MockHttpTransport::new());
        transport.queue_status(200);
        let result = run(&limiter, &transport, &CancellationToken::new()).await;

        assert!(matches!(
            result,
            Err(IdpError::RateLimit(RateLimitError::DelayTooLong { .. }))
        ));
        assert_eq!(transport.request_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeouts_are_retried_then_surface() {
        let limiter = RateLimiter::default();
        let attempts = AtomicU32::new(0);

        let result = limiter
            .execute_with_rate_limit_handling(
                || {
                    attempts.fetch_add(1, Ordering::SeqCst);
                    async {
                        tokio::time::sleep(Duration::from_secs(120)).await;
                        Ok::<_, IdpError>(ResponseMeta::new(200))
                    }
                },
                "graph_user",
                &CancellationToken::new(),
            )
            .await;

        assert!(matches!(
            result,
            Err(IdpError::RateLimit(RateLimitError::RetriesExhausted { ref operation, attempts: 3 }))
                if operation == "graph_user"
        ));
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
        assert!(!limiter.is_rate_limited("graph_user"));
        assert_eq!(limiter.stats().timeouts, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_connection_failure_retried() {
        let limiter = RateLimiter::default();
        let transport = Arc::new(MockHttpTransport::new());
        transport
            .queue_error(IdpError::Network(NetworkError::ConnectionFailed {
                message: "reset".to_string(),
            }))
            .queue_status(200);

        let response = run(&limiter, &transport, &CancellationToken::new()).await.unwrap();
        assert_eq!(response.status, 200);
        assert_eq!(limiter.stats().retries, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_during_backoff() {
        let limiter = RateLimiter::default();
        let transport = Arc::new(MockHttpTransport::new());
        transport.set_default_response(HttpResponse::new(503));

        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            trigger.cancel();
        });

        let result = run(&limiter, &transport, &cancel).await;

        assert!(matches!(result, Err(IdpError::Network(NetworkError::Cancelled))));
        assert_eq!(transport.request_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_call_history_window() {
        let limiter = RateLimiter::default();
        limiter.record_api_call("authentication");
        limiter.record_api_call("authentication");

        tokio::time::advance(Duration::from_secs(61 * 60)).await;
        limiter.record_api_call("authentication");

        assert_eq!(limiter.call_count("authentication"), 1);
        assert_eq!(limiter.call_count("registration"), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limit_expires() {
        let limiter = RateLimiter::default();
        limiter.record_rate_limit("authentication", Duration::from_secs(30));
        assert!(limiter.is_rate_limited("authentication"));
        assert_eq!(
            limiter.get_retry_delay("authentication"),
            Some(Duration::from_secs(30))
        );

        tokio::time::advance(Duration::from_secs(30)).await;
        assert!(!limiter.is_rate_limited("authentication"));
        assert_eq!(limiter.get_retry_delay("authentication"), None);
    }
}
