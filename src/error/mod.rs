//! Identity Provider Error Types
//!
//! Layered error hierarchy for calls made against the external identity
//! provider, plus parsing of OAuth2 error responses.

pub mod classification;

use std::time::Duration;
use thiserror::Error;

pub use classification::{
    classify, ClassifiedError, ErrorClassifier, ErrorCode, FallbackAction, Severity,
};

/// Root error type for the resilience layer.
#[derive(Error, Debug)]
pub enum IdpError {
    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigurationError),

    #[error("Network error: {0}")]
    Network(#[from] NetworkError),

    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    #[error("Rate limit error: {0}")]
    RateLimit(#[from] RateLimitError),

    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),
}

impl IdpError {
    /// Get error code for telemetry.
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::Configuration(_) => "IDP_CONFIG",
            Self::Network(_) => "IDP_NETWORK",
            Self::Provider(_) => "IDP_PROVIDER",
            Self::RateLimit(_) => "IDP_RATE_LIMIT",
            Self::Protocol(_) => "IDP_PROTOCOL",
        }
    }

    /// Check if error is retryable.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Network(e) => e.is_retryable(),
            Self::Provider(ProviderError::ServerError { .. }) => true,
            Self::Provider(ProviderError::TemporarilyUnavailable { .. }) => true,
            _ => false,
        }
    }

    /// Get retry-after duration if applicable.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::Provider(ProviderError::TemporarilyUnavailable { retry_after }) => *retry_after,
            Self::RateLimit(RateLimitError::Exceeded { retry_after, .. }) => Some(*retry_after),
            Self::RateLimit(RateLimitError::DelayTooLong { delay, .. }) => Some(*delay),
            _ => None,
        }
    }
}

/// Configuration error.
#[derive(Error, Debug)]
pub enum ConfigurationError {
    #[error("Invalid configuration: {message}")]
    InvalidConfig { message: String },

    #[error("Missing required field: {field}")]
    MissingRequired { field: String },

    #[error("Invalid endpoint URL: {url}")]
    InvalidEndpoint { url: String },
}

/// Network/transport error.
#[derive(Error, Debug)]
pub enum NetworkError {
    #[error("Connection failed: {message}")]
    ConnectionFailed { message: String },

    #[error("Request timeout after {timeout:?}")]
    Timeout { timeout: Duration },

    #[error("Request cancelled by caller")]
    Cancelled,

    #[error("TLS error: {message}")]
    TlsError { message: String },
}

impl NetworkError {
    /// Check if error is retryable.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, Self::TlsError { .. } | Self::Cancelled)
    }
}

/// Provider (OAuth2 server) error.
#[derive(Error, Debug)]
pub enum ProviderError {
    #[error("Access denied")]
    AccessDenied { error_description: Option<String> },

    #[error("Invalid client credentials")]
    InvalidClient { error_description: Option<String> },

    #[error("Invalid grant: {message}")]
    InvalidGrant { message: String },

    #[error("Invalid request: {message}")]
    InvalidRequest { message: String },

    #[error("Invalid scope: {scope}")]
    InvalidScope { scope: String },

    #[error("Unauthorized client for this grant type")]
    UnauthorizedClient { error_description: Option<String> },

    #[error("Unsupported grant type: {grant_type}")]
    UnsupportedGrantType { grant_type: String },

    #[error("Server error: {message}")]
    ServerError { message: String },

    #[error("Server temporarily unavailable")]
    TemporarilyUnavailable { retry_after: Option<Duration> },

    #[error("Provider returned error {code}")]
    Other {
        code: String,
        error_description: Option<String>,
    },
}

impl ProviderError {
    /// Raw OAuth2 error code as sent on the wire.
    pub fn code(&self) -> &str {
        match self {
            Self::AccessDenied { .. } => "access_denied",
            Self::InvalidClient { .. } => "invalid_client",
            Self::InvalidGrant { .. } => "invalid_grant",
            Self::InvalidRequest { .. } => "invalid_request",
            Self::InvalidScope { .. } => "invalid_scope",
            Self::UnauthorizedClient { .. } => "unauthorized_client",
            Self::UnsupportedGrantType { .. } => "unsupported_grant_type",
            Self::ServerError { .. } => "server_error",
            Self::TemporarilyUnavailable { .. } => "temporarily_unavailable",
            Self::Other { code, .. } => code,
        }
    }
}

/// Rate-limit handling error.
#[derive(Error, Debug)]
pub enum RateLimitError {
    #[error("Rate limit exceeded for {operation}, retry after {retry_after:?}")]
    Exceeded {
        operation: String,
        retry_after: Duration,
    },

    #[error("Rate limit delay too long for {operation}: {delay:?}")]
    DelayTooLong { operation: String, delay: Duration },

    #[error("Max retry attempts ({attempts}) exceeded for {operation}")]
    RetriesExhausted { operation: String, attempts: u32 },
}

/// Protocol/response parsing error.
#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("Invalid response: {message}")]
    InvalidResponse { message: String },

    #[error("Unexpected redirect to: {location}")]
    UnexpectedRedirect { location: String },

    #[error("Response too large: {size} bytes")]
    ResponseTooLarge { size: usize },
}

/// Result type for identity provider operations.
pub type IdpResult<T> = Result<T, IdpError>;

/// OAuth2 error response from provider.
#[derive(Debug, Clone, serde::Deserialize)]
pub struct OAuth2ErrorResponse {
    pub error: String,
    #[serde(default)]
    pub error_description: Option<String>,
    #[serde(default)]
    pub error_uri: Option<String>,
}

/// Map an OAuth2 error response to a provider error.
pub fn map_provider_error(response: &OAuth2ErrorResponse) -> ProviderError {
    let description = response.error_description.clone();
    match response.error.to_ascii_lowercase().as_str() {
        "access_denied" => ProviderError::AccessDenied {
            error_description: description,
        },
        "invalid_client" => ProviderError::InvalidClient {
            error_description: description,
        },
        "invalid_grant" => ProviderError::InvalidGrant {
            message: description.unwrap_or_else(|| "Invalid grant".to_string()),
        },
        "invalid_request" => ProviderError::InvalidRequest {
            message: description.unwrap_or_else(|| "Invalid request".to_string()),
        },
        "invalid_scope" => ProviderError::InvalidScope {
            scope: description.unwrap_or_default(),
        },
        "unauthorized_client" => ProviderError::UnauthorizedClient {
            error_description: description,
        },
        "unsupported_grant_type" => ProviderError::UnsupportedGrantType {
            grant_type: description.unwrap_or_default(),
        },
        "server_error" => ProviderError::ServerError {
            message: description.unwrap_or_else(|| "Server error".to_string()),
        },
        "temporarily_unavailable" => ProviderError::TemporarilyUnavailable { retry_after: None },
        _ => ProviderError::Other {
            code: response.error.clone(),
            error_description: description,
        },
    }
}

/// Parse error response from HTTP body.
pub fn parse_error_response(body: &str) -> Option<OAuth2ErrorResponse> {
    serde_json::from_str(body).ok()
}

/// Create error from HTTP status and body.
pub fn create_error_from_response(status: u16, body: &str) -> IdpError {
    if let Some(response) = parse_error_response(body) {
        return IdpError::Provider(map_provider_error(&response));
    }

    let error = match status {
        400 => ProviderError::InvalidRequest {
            message: "Bad request".to_string(),
        },
        401 => ProviderError::InvalidClient {
            error_description: Some("Unauthorized".to_string()),
        },
        403 => ProviderError::AccessDenied {
            error_description: Some("Forbidden".to_string()),
        },
        429 | 503 => ProviderError::TemporarilyUnavailable { retry_after: None },
        _ => ProviderError::ServerError {
            message: format!("HTTP {}", status),
        },
    };

    IdpError::Provider(error)
}
