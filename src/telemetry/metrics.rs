//! Metrics
//!
//! Resilience metrics collection interfaces and implementations.

use parking_lot::Mutex;
use std::collections::HashMap;

/// Metric labels.
pub type MetricLabels = HashMap<String, String>;

/// Metric names.
pub mod names {
    pub const FALLBACKS_TOTAL: &str = "idp_fallbacks_total";
    pub const EXTERNAL_CALLS_TOTAL: &str = "idp_external_calls_total";
    pub const ATTEMPT_DURATION_MS: &str = "idp_attempt_duration_ms";
    pub const CIRCUIT_BREAKER_STATE: &str = "idp_circuit_breaker_state";
    pub const RATE_LIMITED_TOTAL: &str = "idp_rate_limited_total";
}

/// Resilience metrics interface.
pub trait ResilienceMetrics: Send + Sync {
    /// Record a request routed to the local path.
    fn record_fallback(&self, operation: &str, reason: &str);

    /// Record the outcome of an external provider call.
    fn record_external_outcome(&self, operation: &str, outcome: &str);

    /// Record how long an attempt took on a given path.
    fn record_attempt_duration(&self, operation: &str, path: &str, duration_ms: f64);

    /// Record the breaker state of an operation (1 open, 0 closed).
    fn record_circuit_breaker_state(&self, operation: &str, open: bool);

    /// Record a provider rate-limit response.
    fn record_rate_limited(&self, operation: &str);
}

/// No-op metrics implementation.
pub struct NoOpMetrics;

impl ResilienceMetrics for NoOpMetrics {
    fn record_fallback(&self, _operation: &str, _reason: &str) {}
    fn record_external_outcome(&self, _operation: &str, _outcome: &str) {}
    fn record_attempt_duration(&self, _operation: &str, _path: &str, _duration_ms: f64) {}
    fn record_circuit_breaker_state(&self, _operation: &str, _open: bool) {}
    fn record_rate_limited(&self, _operation: &str) {}
}

/// No-op metrics singleton.
pub fn no_op_metrics() -> NoOpMetrics {
    NoOpMetrics
}

/// Metric entry for in-memory storage.
#[derive(Debug, Clone)]
pub struct MetricEntry {
    pub name: String,
    pub value: f64,
    pub labels: MetricLabels,
    pub timestamp: u64,
}

impl MetricEntry {
    pub fn label(&self, key: &str) -> Option<&str> {
        self.labels.get(key).map(String::as_str)
    }
}

/// In-memory metrics for testing.
#[derive(Default)]
pub struct InMemoryMetrics {
    entries: Mutex<Vec<MetricEntry>>,
}

impl InMemoryMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_entries(&self) -> Vec<MetricEntry> {
        self.entries.lock().clone()
    }

    pub fn get_entries_by_name(&self, name: &str) -> Vec<MetricEntry> {
        self.entries
            .lock()
            .iter()
            .filter(|e| e.name == name)
            .cloned()
            .collect()
    }

    /// Number of entries of `name` whose label `key` equals `value`.
    pub fn count(&self, name: &str, key: &str, value: &str) -> usize {
        self.entries
            .lock()
            .iter()
            .filter(|e| e.name == name && e.label(key) == Some(value))
            .count()
    }

    pub fn clear(&self) {
        self.entries.lock().clear();
    }

    fn record(&self, name: &str, value: f64, labels: &[(&str, &str)]) {
        let now = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as u64;

        let labels = labels
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();

        self.entries.lock().push(MetricEntry {
            name: name.to_string(),
            value,
            labels,
            timestamp: now,
        });
    }
}

impl ResilienceMetrics for InMemoryMetrics {
    fn record_fallback(&self, operation: &str, reason: &str) {
        self.record(
            names::FALLBACKS_TOTAL,
            1.0,
            &[("operation", operation), ("reason", reason)],
        );
    }

    fn record_external_outcome(&self, operation: &str, outcome: &str) {
        self.record(
            names::EXTERNAL_CALLS_TOTAL,
            1.0,
            &[("operation", operation), ("outcome", outcome)],
        );
    }

    fn record_attempt_duration(&self, operation: &str, path: &str, duration_ms: f64) {
        self.record(
            names::ATTEMPT_DURATION_MS,
            duration_ms,
            &[("operation", operation), ("path", path)],
        );
    }

    fn record_circuit_breaker_state(&self, operation: &str, open: bool) {
        let state = if open { "open" } else { "closed" };
        self.record(
            names::CIRCUIT_BREAKER_STATE,
            if open { 1.0 } else { 0.0 },
            &[("operation", operation), ("state", state)],
        );
    }

    fn record_rate_limited(&self, operation: &str) {
        self.record(names::RATE_LIMITED_TOTAL, 1.0, &[("operation", operation)]);
    }
}

/// Create in-memory metrics for testing.
pub fn create_in_memory_metrics() -> InMemoryMetrics {
    InMemoryMetrics::new()
}
