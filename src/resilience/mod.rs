//! Resilience
//!
//! Resilience patterns for calls against the external identity provider.
//!
//! This module provides:
//!
//! - **Circuit Breaker**: per-operation failure window that routes traffic away
//!   from a failing provider
//! - **Rate Limiter**: retries honoring provider retry hints
//! - **Timeout**: cancellable bounded execution with a typed outcome

pub mod circuit_breaker;
pub mod rate_limiter;
pub mod timeout;

// Circuit Breaker
pub use circuit_breaker::{
    create_circuit_breaker, CircuitBreaker, CircuitBreakerStats, CircuitState, FailureRecord,
};

// Rate Limiter
pub use rate_limiter::{create_rate_limiter, RateLimitState, RateLimiter, RateLimiterStats};

// Timeout
pub use timeout::{exponential_backoff, run_with_timeout, sleep_cancellable, TimedCall};
