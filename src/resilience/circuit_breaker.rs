//! Circuit Breaker
//!
//! Per-operation failure counting over a trailing window. An operation whose
//! failure count reaches the threshold is open until the window since its
//! last failure has passed. Stale records are dropped lazily whenever they
//! are read.

use dashmap::DashMap;
use parking_lot::Mutex;
use std::time::Duration;
use tokio::time::Instant;

use crate::types::{CircuitBreakerConfig, DEFAULT_CIRCUIT_BREAKER_CONFIG};

/// Circuit state of a single operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Calls flow to the provider.
    Closed,
    /// Calls are routed away from the provider.
    Open,
}

impl CircuitState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Closed => "closed",
            Self::Open => "open",
        }
    }
}

/// Failure bookkeeping of one operation.
#[derive(Debug, Clone, Copy)]
pub struct FailureRecord {
    pub failure_count: u32,
    pub last_failure_at: Instant,
}

impl FailureRecord {
    fn is_stale(&self, now: Instant, cooldown: Duration) -> bool {
        now.saturating_duration_since(self.last_failure_at) > cooldown
    }
}

/// Circuit breaker statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CircuitBreakerStats {
    pub failures_recorded: u64,
    pub successes_recorded: u64,
    /// Times an operation crossed the failure threshold.
    pub times_opened: u64,
    /// Records dropped because their window had passed.
    pub stale_records_pruned: u64,
}

/// Per-operation circuit breaker.
pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    records: DashMap<String, FailureRecord>,
    stats: Mutex<CircuitBreakerStats>,
}

impl CircuitBreaker {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            records: DashMap::new(),
            stats: Mutex::new(CircuitBreakerStats::default()),
        }
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    /// Record a failed call. Returns the failure count within the window.
    pub fn record_failure(&self, operation: &str) -> u32 {
        let now = Instant::now();
        let count = {
            let mut record = self
                .records
                .entry(operation.to_string())
                .or_insert(FailureRecord {
                    failure_count: 0,
                    last_failure_at: now,
                });

            if record.is_stale(now, self.config.cooldown) {
                record.failure_count = 0;
            }
            record.failure_count += 1;
            record.last_failure_at = now;
            record.failure_count
        };

        let mut stats = self.stats.lock();
        stats.failures_recorded += 1;

        if count == self.config.max_failures {
            stats.times_opened += 1;
            tracing::warn!(
                operation,
                failures = count,
                cooldown_secs = self.config.cooldown.as_secs(),
                "Circuit breaker opened"
            );
        } else {
            tracing::debug!(operation, failures = count, "Circuit breaker failure recorded");
        }

        count
    }

    /// Record a successful call, closing the operation immediately.
    pub fn record_success(&self, operation: &str) {
        if let Some((_, record)) = self.records.remove(operation) {
            tracing::info!(
                operation,
                previous_failures = record.failure_count,
                "Circuit breaker reset after success"
            );
        }
        self.stats.lock().successes_recorded += 1;
    }

    /// Whether any operation is open.
    ///
    /// Drops every record whose window has passed as a side effect.
    pub fn is_open(&self) -> bool {
        let now = Instant::now();
        let cooldown = self.config.cooldown;
        let before = self.records.len();

        self.records.retain(|_, record| !record.is_stale(now, cooldown));

        let pruned = before.saturating_sub(self.records.len());
        if pruned > 0 {
            self.stats.lock().stale_records_pruned += pruned as u64;
        }

        self.records
            .iter()
            .any(|record| record.failure_count >= self.config.max_failures)
    }

    /// Whether `operation` is open.
    pub fn is_open_for(&self, operation: &str) -> bool {
        self.failure_count(operation) >= self.config.max_failures
    }

    /// Failures of `operation` within the window. Drops the record if stale.
    pub fn failure_count(&self, operation: &str) -> u32 {
        let now = Instant::now();
        let cooldown = self.config.cooldown;

        if self
            .records
            .remove_if(operation, |_, record| record.is_stale(now, cooldown))
            .is_some()
        {
            self.stats.lock().stale_records_pruned += 1;
            tracing::debug!(operation, "Circuit breaker record expired");
        }

        self.records
            .get(operation)
            .map(|record| record.failure_count)
            .unwrap_or(0)
    }

    pub fn state(&self, operation: &str) -> CircuitState {
        if self.is_open_for(operation) {
            CircuitState::Open
        } else {
            CircuitState::Closed
        }
    }

    /// Operations currently open.
    pub fn open_operations(&self) -> Vec<String> {
        let now = Instant::now();
        self.records
            .iter()
            .filter(|entry| {
                entry.failure_count >= self.config.max_failures
                    && !entry.is_stale(now, self.config.cooldown)
            })
            .map(|entry| entry.key().clone())
            .collect()
    }

    /// Forget all failure records.
    pub fn reset(&self) {
        self.records.clear();
    }

    pub fn stats(&self) -> CircuitBreakerStats {
        self.stats.lock().clone()
    }
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new(DEFAULT_CIRCUIT_BREAKER_CONFIG)
    }
}

/// Create circuit breaker.
pub fn create_circuit_breaker(config: CircuitBreakerConfig) -> CircuitBreaker {
    CircuitBreaker::new(config)
}
