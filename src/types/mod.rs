//! Types
//!
//! Configuration, request and result types of the resilience layer.

pub mod auth;
pub mod config;

pub use auth::*;
pub use config::*;
