//! Identity Provider Resilience
//!
//! Keeps authentication, registration and authorization-URL generation
//! usable while an external OAuth2/OIDC identity provider is slow,
//! rate-limiting or down.
//!
//! # Features
//!
//! - Per-operation circuit breaker with a trailing failure window
//! - Cancellable bounded-timeout execution
//! - Retries honoring `Retry-After` style provider hints
//! - Cached provider health probe with background refresh
//! - Fallback to a local authentication path
//! - Classification of provider errors into user-safe results
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use identity_resilience::{
//!     resilience_config, FallbackOrchestrator, HealthProbe, LoginRequest, ReqwestHttpTransport,
//! };
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = resilience_config()
//!         .external_enabled(true)
//!         .authority("https://login.example.com/tenant")
//!         .build()?;
//!
//!     let probe = HealthProbe::new(Arc::new(ReqwestHttpTransport::new()?), &config);
//!     let orchestrator = FallbackOrchestrator::new(config, Arc::new(probe));
//!
//!     let result = orchestrator
//!         .handle_authentication_with_fallback(
//!             &LoginRequest::new("alice@example.com"),
//!             || async { external_login().await },
//!             || async { local_login().await },
//!             &CancellationToken::new(),
//!         )
//!         .await;
//!
//!     println!("{} ({})", result.message, result.status_code);
//!     Ok(())
//! }
//! ```
//!
//! # Architecture
//!
//! - `types`: configuration, requests and result types
//! - `error`: error hierarchy and provider error classification
//! - `core`: HTTP transport and rate-limit hint extraction
//! - `health`: cached provider health probe
//! - `resilience`: circuit breaker, rate limiter, bounded execution
//! - `fallback`: the orchestrator combining all of the above
//! - `telemetry`: authentication event logging and metrics
//! - `builders`: fluent configuration builder

pub mod builders;
pub mod core;
pub mod error;
pub mod fallback;
pub mod health;
pub mod resilience;
pub mod telemetry;
pub mod types;

// Re-export builders
pub use builders::{resilience_config, ResilienceConfigBuilder};

// Re-export errors
pub use error::{
    classify, ClassifiedError, ConfigurationError, ErrorClassifier, ErrorCode, FallbackAction,
    IdpError, IdpResult, NetworkError, ProtocolError, ProviderError, RateLimitError, Severity,
};

// Re-export types
pub use types::{
    AuthPath, AuthResponse, AuthResult, AuthUrlResponse, CircuitBreakerConfig, Environment,
    ErrorMetadata, FallbackConfig, HealthCheckConfig, LoginRequest, Operation, RateLimitConfig,
    RegistrationRequest, ResilienceConfig,
};

// Re-export transport
pub use crate::core::{
    HttpMethod, HttpRequest, HttpResponse, HttpTransport, MockHttpTransport, RateLimitedResponse,
    ReqwestHttpTransport, ResponseMeta,
};

// Re-export components
pub use fallback::{create_fallback_orchestrator, FallbackOrchestrator, FallbackReason};
pub use health::{HealthProbe, HealthStatus, MockProviderHealth, ProviderHealth};
pub use resilience::{CircuitBreaker, CircuitState, RateLimiter, TimedCall};
