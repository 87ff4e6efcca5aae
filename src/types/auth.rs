//! Authentication Types
//!
//! Requests handed to the orchestrator and the uniform result types it
//! returns to the API layer.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::error::{ClassifiedError, ErrorCode, FallbackAction};

/// Logical external call, used as the partition key of all resilience state.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    Authentication,
    Registration,
    UrlGeneration,
}

impl Operation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Authentication => "authentication",
            Self::Registration => "registration",
            Self::UrlGeneration => "url_generation",
        }
    }

    /// Label of the user-facing flow, used in log events.
    pub fn flow(&self) -> &'static str {
        match self {
            Self::Authentication => "Login",
            Self::Registration => "Registration",
            Self::UrlGeneration => "AuthUrl",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which authentication path produced a result.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthPath {
    External,
    Local,
}

impl AuthPath {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::External => "External",
            Self::Local => "Local",
        }
    }
}

/// Login request as seen by the resilience layer.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct LoginRequest {
    /// User identity (e-mail address).
    pub email: String,
    /// Where to send the user after login.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub return_url: Option<String>,
    /// Caller explicitly requests local authentication.
    #[serde(default)]
    pub force_local_auth: bool,
    /// Caller does not want to be redirected to the external provider.
    #[serde(default)]
    pub skip_external_redirect: bool,
}

impl LoginRequest {
    pub fn new(email: impl Into<String>) -> Self {
        Self {
            email: email.into(),
            ..Default::default()
        }
    }

    /// Request local-only handling.
    pub fn force_local(mut self) -> Self {
        self.force_local_auth = true;
        self
    }

    pub fn wants_local(&self) -> bool {
        self.force_local_auth || self.skip_external_redirect
    }
}

/// Registration request as seen by the resilience layer.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct RegistrationRequest {
    pub email: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub return_url: Option<String>,
    /// Caller explicitly requests local registration.
    #[serde(default)]
    pub force_local_registration: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub organization_domain: Option<String>,
}

impl RegistrationRequest {
    pub fn new(email: impl Into<String>) -> Self {
        Self {
            email: email.into(),
            ..Default::default()
        }
    }

    pub fn force_local(mut self) -> Self {
        self.force_local_registration = true;
        self
    }
}

/// Payload of a successful authentication.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct AuthResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub redirect_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth_path: Option<AuthPath>,
}

/// Machine-readable error details attached to a failed result.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ErrorMetadata {
    pub code: ErrorCode,
    pub fallback_action: FallbackAction,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after_seconds: Option<u64>,
}

impl From<&ClassifiedError> for ErrorMetadata {
    fn from(classified: &ClassifiedError) -> Self {
        Self {
            code: classified.code,
            fallback_action: classified.fallback_action,
            retry_after_seconds: None,
        }
    }
}

/// Uniform result returned by every orchestrated operation.
#[derive(Clone, Debug, Serialize)]
pub struct AuthResult {
    pub success: bool,
    pub message: String,
    /// HTTP status hint for the API layer.
    pub status_code: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<AuthResponse>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorMetadata>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, serde_json::Value>,
}

impl AuthResult {
    /// Successful result without user data.
    pub fn success(message: impl Into<String>, redirect_url: Option<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
            status_code: 200,
            data: Some(AuthResponse {
                redirect_url,
                ..Default::default()
            }),
            errors: Vec::new(),
            error: None,
            metadata: BTreeMap::new(),
        }
    }

    /// Successful result carrying authentication data.
    pub fn authenticated(data: AuthResponse, message: impl Into<String>) -> Self {
        Self {
            data: Some(data),
            ..Self::success(message, None)
        }
    }

    /// Failed result. When `errors` is empty the message is used.
    pub fn failure(message: impl Into<String>, errors: Vec<String>, status_code: u16) -> Self {
        let message = message.into();
        let errors = if errors.is_empty() {
            vec![message.clone()]
        } else {
            errors
        };

        Self {
            success: false,
            message,
            status_code,
            data: None,
            errors,
            error: None,
            metadata: BTreeMap::new(),
        }
    }

    /// Failed result built from a classified provider error.
    pub fn classified(classified: &ClassifiedError, detail: Option<String>) -> Self {
        let errors = vec![detail.unwrap_or_else(|| classified.code.as_str().to_string())];
        Self::failure(classified.user_message, errors, classified.http_status)
            .with_error(ErrorMetadata::from(classified))
    }

    pub fn with_error(mut self, error: ErrorMetadata) -> Self {
        self.error = Some(error);
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn is_success(&self) -> bool {
        self.success
    }

    /// Normalized error code, if the result carries one.
    ///
    /// Without metadata the raw error strings are normalized. A code that
    /// blocks login fallback wins over the first entry wherever it appears.
    pub fn error_code(&self) -> Option<ErrorCode> {
        if self.success {
            return None;
        }
        if let Some(error) = &self.error {
            return Some(error.code);
        }

        let mut codes = self.errors.iter().map(|raw| ErrorCode::normalize(raw));
        let first = codes.next()?;
        if first.blocks_login_fallback() {
            return Some(first);
        }
        Some(codes.find(ErrorCode::blocks_login_fallback).unwrap_or(first))
    }

    pub fn user_id(&self) -> Option<&str> {
        self.data.as_ref().and_then(|d| d.user_id.as_deref())
    }
}

/// Result of authorization URL generation.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct AuthUrlResponse {
    /// The client should use local authentication.
    pub use_local_auth: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub external_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auth_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub local_endpoint: Option<String>,
    pub message: String,
}

impl AuthUrlResponse {
    /// Descriptor pointing at the external provider.
    pub fn external(url: impl Into<String>, auth_type: impl Into<String>) -> Self {
        Self {
            use_local_auth: false,
            external_url: Some(url.into()),
            auth_type: Some(auth_type.into()),
            local_endpoint: None,
            message: String::new(),
        }
    }

    /// Descriptor redirecting the client to local authentication.
    pub fn local(endpoint: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            use_local_auth: true,
            external_url: None,
            auth_type: None,
            local_endpoint: Some(endpoint.into()),
            message: message.into(),
        }
    }
}
