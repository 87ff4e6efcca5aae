//! Configuration Types
//!
//! Tunables for the resilience layer: execution environment, provider
//! endpoints, and per-component timeouts and thresholds.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use crate::builders::ResilienceConfigBuilder;
use crate::error::{ConfigurationError, IdpError};

/// Execution environment of the platform.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    /// Local development. The external provider is never contacted.
    Development,
    /// Pre-production.
    Staging,
    /// Production.
    #[default]
    Production,
}

impl Environment {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Development => "development",
            Self::Staging => "staging",
            Self::Production => "production",
        }
    }

    /// Offline mode: health probes short-circuit and every call goes local.
    pub fn is_development(&self) -> bool {
        matches!(self, Self::Development)
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Environment {
    type Err = IdpError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "development" | "dev" | "local" => Ok(Self::Development),
            "staging" | "stage" => Ok(Self::Staging),
            "production" | "prod" => Ok(Self::Production),
            other => Err(IdpError::Configuration(ConfigurationError::InvalidConfig {
                message: format!("unknown environment '{}'", other),
            })),
        }
    }
}

/// Circuit breaker configuration.
#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Failures within the cooldown window that open the circuit.
    pub max_failures: u32,
    /// Trailing window after the last failure before the record is dropped.
    pub cooldown: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        DEFAULT_CIRCUIT_BREAKER_CONFIG
    }
}

/// Default circuit breaker configuration.
pub const DEFAULT_CIRCUIT_BREAKER_CONFIG: CircuitBreakerConfig = CircuitBreakerConfig {
    max_failures: 3,
    cooldown: Duration::from_secs(10 * 60),
};

/// Rate-limit aware executor configuration.
#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    /// Maximum number of attempts per call, including the first one.
    pub max_attempts: u32,
    /// Timeout applied to each individual attempt.
    pub call_timeout: Duration,
    /// Longest the executor will ever sleep before an attempt.
    pub max_retry_delay: Duration,
    /// Block duration used when a 429 carries no retry hint.
    pub default_rate_limit_delay: Duration,
    /// Base of the exponential backoff (`base * 2^attempt`).
    pub backoff_base: Duration,
    /// Jitter factor (0.0-1.0) applied to exponential backoff.
    pub backoff_jitter: f64,
    /// Rolling window kept in the call history.
    pub history_window: Duration,
    /// Call count within the window above which a warning is logged.
    pub high_volume_threshold: usize,
    /// Completed calls slower than this are logged as warnings.
    pub slow_call_threshold: Duration,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        DEFAULT_RATE_LIMIT_CONFIG
    }
}

/// Default rate-limit configuration.
pub const DEFAULT_RATE_LIMIT_CONFIG: RateLimitConfig = RateLimitConfig {
    max_attempts: 3,
    call_timeout: Duration::from_secs(30),
    max_retry_delay: Duration::from_secs(5 * 60),
    default_rate_limit_delay: Duration::from_secs(60),
    backoff_base: Duration::from_secs(1),
    backoff_jitter: 0.0,
    history_window: Duration::from_secs(60 * 60),
    high_volume_threshold: 100,
    slow_call_threshold: Duration::from_secs(10),
};

/// Health probe configuration.
#[derive(Debug, Clone)]
pub struct HealthCheckConfig {
    /// Minimum time between two probes.
    pub interval: Duration,
    /// Timeout of a single probe request.
    pub timeout: Duration,
}

impl Default for HealthCheckConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(5 * 60),
            timeout: Duration::from_secs(10),
        }
    }
}

/// Fallback orchestration configuration.
#[derive(Debug, Clone)]
pub struct FallbackConfig {
    /// Timeout of an external login attempt.
    pub login_timeout: Duration,
    /// Timeout of an external registration attempt.
    pub registration_timeout: Duration,
    /// Attempts slower than this are logged as warnings.
    pub slow_attempt_threshold: Duration,
    /// Endpoint advertised to clients when they must use local auth.
    pub local_auth_endpoint: String,
}

impl Default for FallbackConfig {
    fn default() -> Self {
        Self {
            login_timeout: Duration::from_secs(15),
            registration_timeout: Duration::from_secs(20),
            slow_attempt_threshold: Duration::from_secs(5),
            local_auth_endpoint: DEFAULT_LOCAL_AUTH_ENDPOINT.to_string(),
        }
    }
}

/// Complete resilience layer configuration.
#[derive(Debug, Clone, Default)]
pub struct ResilienceConfig {
    /// Execution environment.
    pub environment: Environment,
    /// Feature flag enabling the external provider at all.
    pub external_enabled: bool,
    /// Provider authority, e.g. `https://login.example.com/tenant`.
    pub authority: Option<String>,
    /// Explicit health-check URL, overriding the authority metadata document.
    pub health_check_url: Option<String>,
    pub health_check: HealthCheckConfig,
    pub circuit_breaker: CircuitBreakerConfig,
    pub rate_limit: RateLimitConfig,
    pub fallback: FallbackConfig,
}

impl ResilienceConfig {
    /// Create a new configuration builder.
    pub fn builder() -> ResilienceConfigBuilder {
        ResilienceConfigBuilder::new()
    }

    /// Create configuration from environment variables.
    ///
    /// # Environment Variables
    ///
    /// - `IDP_ENVIRONMENT`: development, staging or production (default production)
    /// - `USE_EXTERNAL_IDP`: `true` enables the external provider
    /// - `IDP_AUTHORITY`: provider authority URL
    /// - `IDP_HEALTH_CHECK_URL`: explicit health-check URL
    /// - `IDP_LOGIN_TIMEOUT_SECS`, `IDP_REGISTRATION_TIMEOUT_SECS`
    /// - `IDP_MAX_RETRY_ATTEMPTS`
    pub fn from_env() -> Result<Self, IdpError> {
        let mut builder = ResilienceConfigBuilder::new();

        if let Ok(environment) = std::env::var("IDP_ENVIRONMENT") {
            builder = builder.environment(environment.parse()?);
        }

        let external_enabled = std::env::var("USE_EXTERNAL_IDP")
            .map(|v| v.trim().eq_ignore_ascii_case("true"))
            .unwrap_or(false);
        builder = builder.external_enabled(external_enabled);

        if let Ok(authority) = std::env::var("IDP_AUTHORITY") {
            builder = builder.authority(authority);
        }

        if let Ok(url) = std::env::var("IDP_HEALTH_CHECK_URL") {
            builder = builder.health_check_url(url);
        }

        if let Some(secs) = parse_setting::<u64>("IDP_LOGIN_TIMEOUT_SECS", env("IDP_LOGIN_TIMEOUT_SECS"))? {
            builder = builder.login_timeout(Duration::from_secs(secs));
        }

        if let Some(secs) =
            parse_setting::<u64>("IDP_REGISTRATION_TIMEOUT_SECS", env("IDP_REGISTRATION_TIMEOUT_SECS"))?
        {
            builder = builder.registration_timeout(Duration::from_secs(secs));
        }

        if let Some(attempts) =
            parse_setting::<u32>("IDP_MAX_RETRY_ATTEMPTS", env("IDP_MAX_RETRY_ATTEMPTS"))?
        {
            builder = builder.max_retry_attempts(attempts);
        }

        builder.build()
    }

    /// URL probed by the health check.
    pub fn health_check_url(&self) -> Option<String> {
        if let Some(url) = &self.health_check_url {
            return Some(url.clone());
        }

        self.authority.as_ref().map(|authority| {
            format!(
                "{}/.well-known/openid-configuration",
                authority.trim_end_matches('/')
            )
        })
    }
}

fn env(key: &str) -> Option<String> {
    std::env::var(key).ok()
}

/// Parse an optional numeric setting. Unset is `None`; anything that does
/// not parse as `T` is a configuration error.
fn parse_setting<T: FromStr>(key: &str, value: Option<String>) -> Result<Option<T>, IdpError> {
    match value {
        None => Ok(None),
        Some(raw) => raw.trim().parse::<T>().map(Some).map_err(|_| {
            IdpError::Configuration(ConfigurationError::InvalidConfig {
                message: format!("{} must be a non-negative integer, got '{}'", key, raw),
            })
        }),
    }
}

/// Local login endpoint advertised by fallback descriptors.
pub const DEFAULT_LOCAL_AUTH_ENDPOINT: &str = "/api/auth/login";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_environment_parse() {
        assert_eq!("Development".parse::<Environment>().unwrap(), Environment::Development);
        assert_eq!("prod".parse::<Environment>().unwrap(), Environment::Production);
        assert!("qa-cluster".parse::<Environment>().is_err());
    }

    #[test]
    fn test_parse_setting() {
        assert_eq!(parse_setting::<u32>("IDP_MAX_RETRY_ATTEMPTS", None).unwrap(), None);
        assert_eq!(
            parse_setting::<u32>("IDP_MAX_RETRY_ATTEMPTS", Some(" 5 ".to_string())).unwrap(),
            Some(5)
        );

        let too_large = parse_setting::<u32>("IDP_MAX_RETRY_ATTEMPTS", Some("4294967299".to_string()));
        assert!(matches!(
            too_large,
            Err(IdpError::Configuration(ConfigurationError::InvalidConfig { .. }))
        ));

        let garbage = parse_setting::<u64>("IDP_LOGIN_TIMEOUT_SECS", Some("15s".to_string()));
        assert!(garbage.is_err());
    }

    #[test]
    fn test_defaults() {
        let config = ResilienceConfig::default();
        assert_eq!(config.environment, Environment::Production);
        assert!(!config.external_enabled);
        assert_eq!(config.circuit_breaker.max_failures, 3);
        assert_eq!(config.rate_limit.max_attempts, 3);
        assert_eq!(config.fallback.login_timeout, Duration::from_secs(15));
        assert_eq!(config.fallback.registration_timeout, Duration::from_secs(20));
    }

    #[test]
    fn test_health_check_url_from_authority() {
        let config = ResilienceConfig {
            authority: Some("https://login.example.com/tenant/".to_string()),
            ..Default::default()
        };
        assert_eq!(
            config.health_check_url().as_deref(),
            Some("https://login.example.com/tenant/.well-known/openid-configuration")
        );

        let config = ResilienceConfig {
            authority: Some("https://login.example.com/tenant".to_string()),
            health_check_url: Some("https://status.example.com/ping".to_string()),
            ..Default::default()
        };
        assert_eq!(
            config.health_check_url().as_deref(),
            Some("https://status.example.com/ping")
        );
    }
}
