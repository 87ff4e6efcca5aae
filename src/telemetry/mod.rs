//! Telemetry
//!
//! Observability components for the resilience layer.
//!
//! This module provides:
//!
//! - **Logging**: authentication events with identity masking
//! - **Metrics**: fallback, outcome, duration and breaker-state metrics

pub mod logging;
pub mod metrics;

// Metrics
pub use metrics::{
    create_in_memory_metrics, no_op_metrics, InMemoryMetrics, MetricEntry, MetricLabels,
    NoOpMetrics, ResilienceMetrics,
};

// Logging
pub use logging::{
    create_in_memory_logger, identity_fingerprint, mask_identity, no_op_logger, AuthEventLogger,
    AuthLogContext, InMemoryLogger, LogEntry, LogLevel, Logger, NoOpLogger, TracingLogger,
};
