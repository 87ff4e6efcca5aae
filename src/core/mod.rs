//! Core Components
//!
//! HTTP transport used to reach the identity provider.

pub mod transport;

pub use transport::*;
