//! Error Classification
//!
//! Normalizes provider error codes into a category with severity, HTTP
//! status, user-facing message and a suggested recovery action.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

use crate::error::{IdpError, NetworkError, RateLimitError};
use crate::types::{AuthResult, Environment, ErrorMetadata, DEFAULT_LOCAL_AUTH_ENDPOINT};

/// Normalized error code.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    AccessDenied,
    InvalidRequest,
    InvalidClient,
    InvalidGrant,
    UnauthorizedClient,
    UnsupportedGrantType,
    InvalidScope,
    ServerError,
    TemporarilyUnavailable,
    ApiTimeout,
    RateLimitExceeded,
    ServiceUnavailable,
    UnknownError,
}

/// How loudly an error is logged.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Informational,
    Warning,
    Error,
}

/// Recovery action suggested to the caller.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FallbackAction {
    /// Retry with the external provider.
    Retry,
    /// Retry with the provider or switch to local authentication.
    RetryOrLocal,
    /// Use local authentication.
    UseLocal,
    /// Nothing the user can do.
    ContactSupport,
}

impl FallbackAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Retry => "retry",
            Self::RetryOrLocal => "retry_or_local",
            Self::UseLocal => "use_local",
            Self::ContactSupport => "contact_support",
        }
    }
}

impl fmt::Display for FallbackAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl ErrorCode {
    /// Normalize a raw provider error code. Matching is case-insensitive;
    /// anything unrecognized becomes [`ErrorCode::UnknownError`].
    pub fn normalize(raw: &str) -> Self {
        match raw.trim().to_ascii_uppercase().as_str() {
            "ACCESS_DENIED" => Self::AccessDenied,
            "INVALID_REQUEST" => Self::InvalidRequest,
            "INVALID_CLIENT" => Self::InvalidClient,
            "INVALID_GRANT" => Self::InvalidGrant,
            "UNAUTHORIZED_CLIENT" => Self::UnauthorizedClient,
            "UNSUPPORTED_GRANT_TYPE" => Self::UnsupportedGrantType,
            "INVALID_SCOPE" => Self::InvalidScope,
            "SERVER_ERROR" => Self::ServerError,
            "TEMPORARILY_UNAVAILABLE" => Self::TemporarilyUnavailable,
            "API_TIMEOUT" => Self::ApiTimeout,
            "RATE_LIMIT_EXCEEDED" => Self::RateLimitExceeded,
            "SERVICE_UNAVAILABLE" => Self::ServiceUnavailable,
            _ => Self::UnknownError,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AccessDenied => "ACCESS_DENIED",
            Self::InvalidRequest => "INVALID_REQUEST",
            Self::InvalidClient => "INVALID_CLIENT",
            Self::InvalidGrant => "INVALID_GRANT",
            Self::UnauthorizedClient => "UNAUTHORIZED_CLIENT",
            Self::UnsupportedGrantType => "UNSUPPORTED_GRANT_TYPE",
            Self::InvalidScope => "INVALID_SCOPE",
            Self::ServerError => "SERVER_ERROR",
            Self::TemporarilyUnavailable => "TEMPORARILY_UNAVAILABLE",
            Self::ApiTimeout => "API_TIMEOUT",
            Self::RateLimitExceeded => "RATE_LIMIT_EXCEEDED",
            Self::ServiceUnavailable => "SERVICE_UNAVAILABLE",
            Self::UnknownError => "UNKNOWN_ERROR",
        }
    }

    pub fn severity(&self) -> Severity {
        match self {
            Self::AccessDenied => Severity::Informational,
            Self::InvalidClient
            | Self::UnauthorizedClient
            | Self::InvalidGrant
            | Self::ServerError
            | Self::TemporarilyUnavailable
            | Self::ServiceUnavailable => Severity::Error,
            _ => Severity::Warning,
        }
    }

    pub fn http_status(&self) -> u16 {
        match self {
            Self::AccessDenied => 403,
            Self::InvalidClient | Self::UnauthorizedClient | Self::InvalidGrant => 401,
            Self::ServerError => 500,
            Self::TemporarilyUnavailable | Self::ServiceUnavailable => 503,
            Self::ApiTimeout => 504,
            Self::RateLimitExceeded => 429,
            _ => 400,
        }
    }

    pub fn fallback_action(&self) -> FallbackAction {
        match self {
            Self::InvalidRequest
            | Self::UnsupportedGrantType
            | Self::InvalidScope
            | Self::RateLimitExceeded => FallbackAction::Retry,
            Self::InvalidClient | Self::UnauthorizedClient => FallbackAction::ContactSupport,
            Self::ServerError | Self::TemporarilyUnavailable | Self::ServiceUnavailable => {
                FallbackAction::UseLocal
            }
            _ => FallbackAction::RetryOrLocal,
        }
    }

    pub fn user_message(&self) -> &'static str {
        match self {
            Self::AccessDenied => "Authentication was cancelled or access was denied.",
            Self::InvalidRequest => "Invalid authentication request. Please try again.",
            Self::InvalidClient => "Authentication configuration error. Please contact support.",
            Self::InvalidGrant => "Authentication session expired. Please try again.",
            Self::UnauthorizedClient => {
                "This application is not authorized for this authentication method."
            }
            Self::UnsupportedGrantType => "Authentication method not supported.",
            Self::InvalidScope => "Insufficient permissions for this authentication.",
            Self::ServerError => {
                "Authentication service error. Please try again or use local authentication."
            }
            Self::TemporarilyUnavailable => {
                "Authentication service is temporarily unavailable. Please try again later."
            }
            Self::ApiTimeout => {
                "Authentication service is experiencing delays. Please try again or use local authentication."
            }
            Self::RateLimitExceeded => {
                "Too many authentication requests. Please wait before trying again."
            }
            Self::ServiceUnavailable => {
                "External authentication is temporarily unavailable. Please use local authentication or try again later."
            }
            Self::UnknownError => {
                "Authentication failed. Please try again or use local authentication."
            }
        }
    }

    /// Codes caused by the user's own choices at the provider. A login that
    /// fails with one of these is returned to the caller instead of being
    /// silently replaced by local authentication.
    pub fn blocks_login_fallback(&self) -> bool {
        matches!(
            self,
            Self::AccessDenied | Self::InvalidRequest | Self::InvalidScope
        )
    }

    /// Whether the code means the provider itself is failing.
    pub fn is_provider_outage(&self) -> bool {
        self.fallback_action() == FallbackAction::UseLocal
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Normalized view of a provider error.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct ClassifiedError {
    pub code: ErrorCode,
    pub severity: Severity,
    pub http_status: u16,
    pub user_message: &'static str,
    pub fallback_action: FallbackAction,
}

impl From<ErrorCode> for ClassifiedError {
    fn from(code: ErrorCode) -> Self {
        Self {
            code,
            severity: code.severity(),
            http_status: code.http_status(),
            user_message: code.user_message(),
            fallback_action: code.fallback_action(),
        }
    }
}

/// Classify a raw provider error code.
pub fn classify(raw_error_code: &str) -> ClassifiedError {
    ClassifiedError::from(ErrorCode::normalize(raw_error_code))
}

/// Turns provider errors and resilience outcomes into [`AuthResult`]s.
#[derive(Debug, Clone, Copy, Default)]
pub struct ErrorClassifier {
    environment: Environment,
}

impl ErrorClassifier {
    pub fn new(environment: Environment) -> Self {
        Self { environment }
    }

    /// Classify a raw provider error code.
    pub fn classify(&self, raw_error_code: &str) -> ClassifiedError {
        classify(raw_error_code)
    }

    /// Classify a typed error raised while talking to the provider.
    pub fn classify_error(&self, error: &IdpError) -> ClassifiedError {
        let code = match error {
            IdpError::Provider(provider) => ErrorCode::normalize(provider.code()),
            IdpError::Network(NetworkError::Timeout { .. } | NetworkError::Cancelled) => {
                ErrorCode::ApiTimeout
            }
            IdpError::Network(_) => ErrorCode::ServiceUnavailable,
            IdpError::RateLimit(
                RateLimitError::Exceeded { .. } | RateLimitError::DelayTooLong { .. },
            ) => ErrorCode::RateLimitExceeded,
            IdpError::RateLimit(RateLimitError::RetriesExhausted { .. }) => {
                ErrorCode::ServiceUnavailable
            }
            IdpError::Protocol(_) => ErrorCode::ServerError,
            IdpError::Configuration(_) => ErrorCode::InvalidClient,
        };
        ClassifiedError::from(code)
    }

    /// Build the failure result for an OAuth2 error returned by the provider.
    pub fn handle_oauth2_error(
        &self,
        error: &str,
        error_description: Option<&str>,
        auth_flow: &str,
        state: Option<&str>,
    ) -> AuthResult {
        let classified = self.classify(error);
        let description = error_description.unwrap_or("none");
        let state = state.unwrap_or("none");

        match classified.severity {
            Severity::Informational => tracing::info!(
                auth_flow, error, description, state,
                "OAuth2 error from identity provider"
            ),
            Severity::Warning => tracing::warn!(
                auth_flow, error, description, state,
                "OAuth2 error from identity provider"
            ),
            Severity::Error => tracing::error!(
                auth_flow, error, description, state,
                "OAuth2 error from identity provider"
            ),
        }

        let detail = error_description.unwrap_or(error).to_string();
        AuthResult::classified(&classified, Some(detail))
            .with_metadata("error_code", classified.code.as_str())
            .with_metadata("auth_flow", auth_flow)
            .with_metadata("fallback_action", classified.fallback_action.as_str())
    }

    /// Build the failure result for a provider call that timed out.
    pub fn handle_api_timeout(&self, operation: &str, duration: Duration) -> AuthResult {
        tracing::warn!(
            operation,
            duration_ms = duration.as_millis() as u64,
            "Identity provider API timeout"
        );

        if duration > Duration::from_secs(30) {
            tracing::error!(
                operation,
                "Critical identity provider timeout, consider local authentication"
            );
        }

        AuthResult::classified(&ClassifiedError::from(ErrorCode::ApiTimeout), None)
    }

    /// Build the failure result for exhausted provider rate limits.
    pub fn handle_rate_limit_exceeded(&self, operation: &str, retry_after: Duration) -> AuthResult {
        tracing::warn!(
            operation,
            retry_after_secs = retry_after.as_secs_f64(),
            "Identity provider rate limit exceeded"
        );

        let seconds = retry_after.as_secs_f64().ceil() as u64;
        let classified = ClassifiedError::from(ErrorCode::RateLimitExceeded);

        AuthResult::failure(
            format!(
                "Too many authentication requests. Please wait {} seconds before trying again.",
                seconds
            ),
            vec![classified.code.as_str().to_string()],
            classified.http_status,
        )
        .with_error(ErrorMetadata {
            retry_after_seconds: Some(seconds),
            ..ErrorMetadata::from(&classified)
        })
        .with_metadata("retry_after", seconds)
    }

    /// Build the failure result for an unreachable provider.
    pub fn handle_service_unavailable(&self, operation: &str, error: Option<&IdpError>) -> AuthResult {
        match error {
            Some(error) => tracing::error!(
                operation,
                error = %error,
                "Identity provider unavailable"
            ),
            None => tracing::error!(operation, "Identity provider unavailable"),
        }

        let classified = ClassifiedError::from(ErrorCode::ServiceUnavailable);
        let message = if self.environment.is_development() {
            "External authentication is unavailable in development. Use local authentication."
        } else {
            classified.user_message
        };

        AuthResult::failure(
            message,
            vec![classified.code.as_str().to_string()],
            classified.http_status,
        )
        .with_error(ErrorMetadata::from(&classified))
        .with_metadata("fallback_available", true)
        .with_metadata("local_auth_endpoint", DEFAULT_LOCAL_AUTH_ENDPOINT)
    }

    /// Convert any typed error into a user-safe failure result.
    pub fn to_auth_result(&self, operation: &str, error: &IdpError) -> AuthResult {
        match error {
            IdpError::RateLimit(RateLimitError::Exceeded { retry_after, .. })
            | IdpError::RateLimit(RateLimitError::DelayTooLong {
                delay: retry_after, ..
            }) => self.handle_rate_limit_exceeded(operation, *retry_after),
            IdpError::Network(NetworkError::Timeout { timeout }) => {
                self.handle_api_timeout(operation, *timeout)
            }
            IdpError::Provider(provider) => {
                let classified = self.classify(provider.code());
                AuthResult::classified(&classified, None)
            }
            other => {
                let classified = self.classify_error(other);
                if classified.code == ErrorCode::ServiceUnavailable {
                    self.handle_service_unavailable(operation, Some(other))
                } else {
                    AuthResult::classified(&classified, None)
                }
            }
        }
    }
}
