//! Builders
//!
//! Fluent builder for the resilience layer configuration.

pub mod config;

pub use config::{resilience_config, ResilienceConfigBuilder};
