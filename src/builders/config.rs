//! Configuration Builder
//!
//! Fluent builder for the resilience layer configuration.

use std::time::Duration;
use url::Url;

use crate::error::{ConfigurationError, IdpError};
use crate::types::{
    CircuitBreakerConfig, Environment, FallbackConfig, HealthCheckConfig, RateLimitConfig,
    ResilienceConfig,
};

/// Resilience configuration builder.
#[derive(Default)]
pub struct ResilienceConfigBuilder {
    environment: Environment,
    external_enabled: bool,
    authority: Option<String>,
    health_check_url: Option<String>,
    health_check: HealthCheckConfig,
    circuit_breaker: CircuitBreakerConfig,
    rate_limit: RateLimitConfig,
    fallback: FallbackConfig,
}

impl ResilienceConfigBuilder {
    /// Create new configuration builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set execution environment.
    pub fn environment(mut self, environment: Environment) -> Self {
        self.environment = environment;
        self
    }

    /// Enable or disable the external provider.
    pub fn external_enabled(mut self, enabled: bool) -> Self {
        self.external_enabled = enabled;
        self
    }

    /// Set provider authority.
    pub fn authority(mut self, authority: impl Into<String>) -> Self {
        self.authority = Some(authority.into());
        self
    }

    /// Set explicit health-check URL.
    pub fn health_check_url(mut self, url: impl Into<String>) -> Self {
        self.health_check_url = Some(url.into());
        self
    }

    /// Set minimum interval between health probes.
    pub fn health_check_interval(mut self, interval: Duration) -> Self {
        self.health_check.interval = interval;
        self
    }

    /// Set health probe timeout.
    pub fn health_check_timeout(mut self, timeout: Duration) -> Self {
        self.health_check.timeout = timeout;
        self
    }

    /// Set failures needed to open the circuit.
    pub fn max_failures(mut self, max_failures: u32) -> Self {
        self.circuit_breaker.max_failures = max_failures;
        self
    }

    /// Set circuit breaker cooldown window.
    pub fn circuit_cooldown(mut self, cooldown: Duration) -> Self {
        self.circuit_breaker.cooldown = cooldown;
        self
    }

    /// Set maximum attempts of the rate-limit aware executor.
    pub fn max_retry_attempts(mut self, attempts: u32) -> Self {
        self.rate_limit.max_attempts = attempts;
        self
    }

    /// Set per-attempt timeout of the rate-limit aware executor.
    pub fn call_timeout(mut self, timeout: Duration) -> Self {
        self.rate_limit.call_timeout = timeout;
        self
    }

    /// Set the cap on any single retry delay.
    pub fn max_retry_delay(mut self, delay: Duration) -> Self {
        self.rate_limit.max_retry_delay = delay;
        self
    }

    /// Set external login timeout.
    pub fn login_timeout(mut self, timeout: Duration) -> Self {
        self.fallback.login_timeout = timeout;
        self
    }

    /// Set external registration timeout.
    pub fn registration_timeout(mut self, timeout: Duration) -> Self {
        self.fallback.registration_timeout = timeout;
        self
    }

    /// Set local auth endpoint advertised in fallback descriptors.
    pub fn local_auth_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.fallback.local_auth_endpoint = endpoint.into();
        self
    }

    /// Replace the whole rate-limit configuration.
    pub fn rate_limit(mut self, config: RateLimitConfig) -> Self {
        self.rate_limit = config;
        self
    }

    /// Build the configuration.
    pub fn build(self) -> Result<ResilienceConfig, IdpError> {
        if let Some(authority) = &self.authority {
            validate_url(authority)?;
        }

        if let Some(url) = &self.health_check_url {
            validate_url(url)?;
        }

        // An enabled provider needs an endpoint to probe.
        if self.external_enabled
            && !self.environment.is_development()
            && self.authority.is_none()
            && self.health_check_url.is_none()
        {
            return Err(IdpError::Configuration(ConfigurationError::MissingRequired {
                field: "authority".to_string(),
            }));
        }

        if self.rate_limit.max_attempts == 0 {
            return Err(IdpError::Configuration(ConfigurationError::InvalidConfig {
                message: "max_attempts must be at least 1".to_string(),
            }));
        }

        if self.circuit_breaker.max_failures == 0 {
            return Err(IdpError::Configuration(ConfigurationError::InvalidConfig {
                message: "max_failures must be at least 1".to_string(),
            }));
        }

        if !(0.0..=1.0).contains(&self.rate_limit.backoff_jitter) {
            return Err(IdpError::Configuration(ConfigurationError::InvalidConfig {
                message: "backoff_jitter must be between 0.0 and 1.0".to_string(),
            }));
        }

        Ok(ResilienceConfig {
            environment: self.environment,
            external_enabled: self.external_enabled,
            authority: self.authority,
            health_check_url: self.health_check_url,
            health_check: self.health_check,
            circuit_breaker: self.circuit_breaker,
            rate_limit: self.rate_limit,
            fallback: self.fallback,
        })
    }
}

fn validate_url(raw: &str) -> Result<(), IdpError> {
    match Url::parse(raw) {
        Ok(url) if matches!(url.scheme(), "http" | "https") => Ok(()),
        _ => Err(IdpError::Configuration(ConfigurationError::InvalidEndpoint {
            url: raw.to_string(),
        })),
    }
}

/// Create a new resilience configuration builder.
pub fn resilience_config() -> ResilienceConfigBuilder {
    ResilienceConfigBuilder::new()
}
