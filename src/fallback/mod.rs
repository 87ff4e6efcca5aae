//! Fallback Orchestration
//!
//! Top-level policy deciding, per request, whether the external identity
//! provider is tried and when the local authentication path takes over.
//!
//! A request goes local when the caller asks for it, when the provider is
//! ineligible (development mode, feature flag off, an open circuit, a failed
//! health probe), or when the external attempt times out, is cancelled or
//! fails. Login failures caused by the user at the provider are returned
//! as they are.

use std::future::Future;
use std::sync::Arc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::error::{classify, ErrorClassifier, ErrorCode, IdpError, IdpResult};
use crate::health::ProviderHealth;
use crate::resilience::{run_with_timeout, CircuitBreaker, RateLimiter, TimedCall};
use crate::telemetry::{AuthEventLogger, Logger, NoOpMetrics, ResilienceMetrics, TracingLogger};
use crate::types::{
    AuthPath, AuthResult, AuthUrlResponse, LoginRequest, Operation, RegistrationRequest,
    ResilienceConfig,
};

/// Why a request was routed to the local path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FallbackReason {
    /// The caller asked for local handling.
    Requested,
    /// Offline mode.
    Development,
    /// External provider disabled by configuration.
    Disabled,
    /// A circuit is open.
    CircuitOpen,
    /// The last health probe failed.
    ProviderUnhealthy,
    /// The external attempt exceeded its timeout.
    Timeout,
    /// The caller cancelled the external attempt.
    Cancelled,
    /// The provider returned a classified failure.
    ProviderError,
    /// Transport or protocol failure while talking to the provider.
    UnexpectedError,
}

impl FallbackReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Requested => "requested_local",
            Self::Development => "development",
            Self::Disabled => "disabled",
            Self::CircuitOpen => "circuit_open",
            Self::ProviderUnhealthy => "provider_unhealthy",
            Self::Timeout => "timeout",
            Self::Cancelled => "cancelled",
            Self::ProviderError => "provider_error",
            Self::UnexpectedError => "unexpected_error",
        }
    }
}

const LOCAL_FAILURE_MESSAGE: &str = "Authentication failed. Please try again later.";

/// Fallback orchestrator.
pub struct FallbackOrchestrator {
    config: ResilienceConfig,
    breaker: Arc<CircuitBreaker>,
    rate_limiter: Arc<RateLimiter>,
    health: Arc<dyn ProviderHealth>,
    classifier: ErrorClassifier,
    events: AuthEventLogger,
    metrics: Arc<dyn ResilienceMetrics>,
}

impl FallbackOrchestrator {
    /// Create an orchestrator with fresh breaker and limiter state, logging
    /// through `tracing` and discarding metrics.
    pub fn new(config: ResilienceConfig, health: Arc<dyn ProviderHealth>) -> Self {
        let events = AuthEventLogger::new(
            Arc::new(TracingLogger),
            config.environment,
            config.fallback.slow_attempt_threshold,
        );

        Self {
            breaker: Arc::new(CircuitBreaker::new(config.circuit_breaker.clone())),
            rate_limiter: Arc::new(RateLimiter::new(config.rate_limit.clone())),
            classifier: ErrorClassifier::new(config.environment),
            health,
            events,
            metrics: Arc::new(NoOpMetrics),
            config,
        }
    }

    pub fn with_logger(mut self, logger: Arc<dyn Logger>) -> Self {
        self.events = AuthEventLogger::new(
            logger,
            self.config.environment,
            self.config.fallback.slow_attempt_threshold,
        );
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<dyn ResilienceMetrics>) -> Self {
        self.metrics = metrics;
        self
    }

    /// Share a circuit breaker with other components.
    pub fn with_circuit_breaker(mut self, breaker: Arc<CircuitBreaker>) -> Self {
        self.breaker = breaker;
        self
    }

    /// Share a rate limiter with other components.
    pub fn with_rate_limiter(mut self, rate_limiter: Arc<RateLimiter>) -> Self {
        self.rate_limiter = rate_limiter;
        self
    }

    pub fn circuit_breaker(&self) -> &Arc<CircuitBreaker> {
        &self.breaker
    }

    /// Limiter external calls should run their HTTP requests through.
    pub fn rate_limiter(&self) -> &Arc<RateLimiter> {
        &self.rate_limiter
    }

    pub fn classifier(&self) -> &ErrorClassifier {
        &self.classifier
    }

    pub fn config(&self) -> &ResilienceConfig {
        &self.config
    }

    /// Authenticate through the provider, falling back to `local`.
    pub async fn handle_authentication_with_fallback<E, EF, L, LF>(
        &self,
        request: &LoginRequest,
        external: E,
        local: L,
        cancel: &CancellationToken,
    ) -> AuthResult
    where
        E: FnOnce() -> EF,
        EF: Future<Output = IdpResult<AuthResult>>,
        L: FnOnce() -> LF,
        LF: Future<Output = IdpResult<AuthResult>>,
    {
        self.run(
            Operation::Authentication,
            &request.email,
            request.wants_local(),
            external,
            local,
            cancel,
        )
        .await
    }

    /// Register through the provider, falling back to `local`.
    pub async fn handle_registration_with_fallback<E, EF, L, LF>(
        &self,
        request: &RegistrationRequest,
        external: E,
        local: L,
        cancel: &CancellationToken,
    ) -> AuthResult
    where
        E: FnOnce() -> EF,
        EF: Future<Output = IdpResult<AuthResult>>,
        L: FnOnce() -> LF,
        LF: Future<Output = IdpResult<AuthResult>>,
    {
        self.run(
            Operation::Registration,
            &request.email,
            request.force_local_registration,
            external,
            local,
            cancel,
        )
        .await
    }

    /// Build the provider authorization URL, or a descriptor sending the
    /// client to local authentication.
    pub fn get_auth_url_with_fallback<U>(
        &self,
        email: Option<&str>,
        return_url: Option<&str>,
        url: U,
    ) -> AuthUrlResponse
    where
        U: FnOnce() -> IdpResult<AuthUrlResponse>,
    {
        let operation = Operation::UrlGeneration;
        let local_endpoint = self.config.fallback.local_auth_endpoint.as_str();

        if let Some(reason) = self.external_unavailable_reason() {
            self.metrics.record_fallback(operation.as_str(), reason.as_str());
            return AuthUrlResponse::local(
                local_endpoint,
                "External authentication unavailable, use local authentication",
            );
        }

        match url() {
            Ok(response) if !response.use_local_auth => {
                self.record_provider_success(operation);
                response
            }
            Ok(response) => {
                self.record_provider_failure(operation);
                self.metrics
                    .record_fallback(operation.as_str(), FallbackReason::ProviderError.as_str());
                AuthUrlResponse {
                    local_endpoint: response
                        .local_endpoint
                        .or_else(|| Some(local_endpoint.to_string())),
                    message: "Authentication service temporarily unavailable, use local authentication"
                        .to_string(),
                    ..response
                }
            }
            Err(error) => {
                self.record_provider_failure(operation);
                self.metrics
                    .record_fallback(operation.as_str(), FallbackReason::UnexpectedError.as_str());
                tracing::error!(
                    identity = %email.map(crate::telemetry::mask_identity).unwrap_or_default(),
                    return_url = return_url.unwrap_or(""),
                    error = %error,
                    "Error generating provider authorization URL"
                );
                AuthUrlResponse::local(
                    local_endpoint,
                    "Authentication service error, use local authentication",
                )
            }
        }
    }

    /// Whether the external provider is eligible right now.
    pub fn should_use_external(&self) -> bool {
        self.external_unavailable_reason().is_none()
    }

    /// Success descriptor advertising local authentication.
    pub fn create_fallback_response(
        &self,
        operation: Operation,
        reason: &str,
        redirect_endpoint: Option<&str>,
    ) -> AuthResult {
        let mut message = format!(
            "External authentication unavailable for {}. {}",
            operation, reason
        );

        if let Some(endpoint) = redirect_endpoint.filter(|e| !e.is_empty()) {
            message.push_str(&format!(" Please use {}", endpoint));
        }

        AuthResult::success(message, redirect_endpoint.map(str::to_string))
    }

    fn external_unavailable_reason(&self) -> Option<FallbackReason> {
        if self.config.environment.is_development() {
            return Some(FallbackReason::Development);
        }

        if !self.config.external_enabled {
            return Some(FallbackReason::Disabled);
        }

        if self.breaker.is_open() {
            tracing::warn!(
                open = ?self.breaker.open_operations(),
                "Circuit breaker open, skipping identity provider"
            );
            return Some(FallbackReason::CircuitOpen);
        }

        if !self.health.is_available() {
            return Some(FallbackReason::ProviderUnhealthy);
        }

        None
    }

    async fn run<E, EF, L, LF>(
        &self,
        operation: Operation,
        identity: &str,
        wants_local: bool,
        external: E,
        local: L,
        cancel: &CancellationToken,
    ) -> AuthResult
    where
        E: FnOnce() -> EF,
        EF: Future<Output = IdpResult<AuthResult>>,
        L: FnOnce() -> LF,
        LF: Future<Output = IdpResult<AuthResult>>,
    {
        let started = Instant::now();

        if wants_local {
            return self
                .fall_back(operation, identity, FallbackReason::Requested, local, started)
                .await;
        }

        if let Some(reason) = self.external_unavailable_reason() {
            return self.fall_back(operation, identity, reason, local, started).await;
        }

        self.events.log_attempt(operation, identity, AuthPath::External);

        let timeout = match operation {
            Operation::Registration => self.config.fallback.registration_timeout,
            _ => self.config.fallback.login_timeout,
        };

        let reason = match run_with_timeout(external(), timeout, cancel).await {
            TimedCall::Completed(Ok(result)) if result.is_success() => {
                self.record_provider_success(operation);
                self.metrics.record_external_outcome(operation.as_str(), "success");
                self.finish(operation, identity, AuthPath::External, &result, started);
                return result;
            }
            TimedCall::Completed(Ok(result)) => {
                match self.handle_rejection(operation, identity, result, started) {
                    Ok(reason) => reason,
                    Err(result) => return result,
                }
            }
            TimedCall::Completed(Err(IdpError::Provider(error))) => {
                let result = AuthResult::classified(&classify(error.code()), Some(error.to_string()));
                match self.handle_rejection(operation, identity, result, started) {
                    Ok(reason) => reason,
                    Err(result) => return result,
                }
            }
            TimedCall::Completed(Err(error)) => {
                self.record_provider_failure(operation);
                self.metrics.record_external_outcome(operation.as_str(), "error");
                tracing::error!(
                    operation = %operation,
                    error = %error,
                    error_code = error.error_code(),
                    "Unexpected error during external {}",
                    operation.flow()
                );
                FallbackReason::UnexpectedError
            }
            TimedCall::TimedOut(elapsed) => {
                self.record_provider_failure(operation);
                self.metrics.record_external_outcome(operation.as_str(), "timeout");
                tracing::warn!(
                    operation = %operation,
                    timeout_ms = elapsed.as_millis() as u64,
                    "External {} timed out",
                    operation.flow()
                );
                FallbackReason::Timeout
            }
            TimedCall::Cancelled => {
                self.record_provider_failure(operation);
                self.metrics.record_external_outcome(operation.as_str(), "cancelled");
                tracing::info!(operation = %operation, "External {} cancelled", operation.flow());
                FallbackReason::Cancelled
            }
        };

        self.fall_back(operation, identity, reason, local, started).await
    }

    /// Decide what a classified provider failure leads to. `Err` carries a
    /// result to return as is.
    fn handle_rejection(
        &self,
        operation: Operation,
        identity: &str,
        result: AuthResult,
        started: Instant,
    ) -> Result<FallbackReason, AuthResult> {
        let code = result.error_code().unwrap_or(ErrorCode::UnknownError);
        self.metrics.record_external_outcome(operation.as_str(), "rejected");
        self.events.log_failure(
            operation,
            identity,
            AuthPath::External,
            &result.message,
            Some(code.as_str()),
            started.elapsed(),
        );

        if code.is_provider_outage() {
            self.record_provider_failure(operation);
        }

        if operation == Operation::Authentication && code.blocks_login_fallback() {
            return Err(result);
        }

        Ok(FallbackReason::ProviderError)
    }

    async fn fall_back<L, LF>(
        &self,
        operation: Operation,
        identity: &str,
        reason: FallbackReason,
        local: L,
        started: Instant,
    ) -> AuthResult
    where
        L: FnOnce() -> LF,
        LF: Future<Output = IdpResult<AuthResult>>,
    {
        self.events.log_fallback(operation, identity, reason.as_str());
        self.metrics.record_fallback(operation.as_str(), reason.as_str());

        let result = match local().await {
            Ok(result) => result,
            Err(error) => {
                tracing::error!(
                    operation = %operation,
                    error = %error,
                    "Local {} failed",
                    operation.flow()
                );
                AuthResult::failure(LOCAL_FAILURE_MESSAGE, Vec::new(), 500)
            }
        };

        self.finish(operation, identity, AuthPath::Local, &result, started);
        result
    }

    fn finish(
        &self,
        operation: Operation,
        identity: &str,
        path: AuthPath,
        result: &AuthResult,
        started: Instant,
    ) {
        let elapsed = started.elapsed();

        if result.is_success() {
            self.events.log_success(operation, identity, path, elapsed);
        } else {
            let code = result.error_code().map(|c| c.as_str());
            self.events
                .log_failure(operation, identity, path, &result.message, code, elapsed);
        }

        self.metrics.record_attempt_duration(
            operation.as_str(),
            path.as_str(),
            elapsed.as_secs_f64() * 1000.0,
        );
    }

    fn record_provider_success(&self, operation: Operation) {
        self.breaker.record_success(operation.as_str());
        self.metrics
            .record_circuit_breaker_state(operation.as_str(), false);
    }

    fn record_provider_failure(&self, operation: Operation) {
        let failures = self.breaker.record_failure(operation.as_str());
        tracing::warn!(
            operation = %operation,
            failures,
            "Identity provider failure recorded"
        );
        self.metrics
            .record_circuit_breaker_state(operation.as_str(), self.breaker.is_open_for(operation.as_str()));
    }
}

/// Create a fallback orchestrator.
pub fn create_fallback_orchestrator(
    config: ResilienceConfig,
    health: Arc<dyn ProviderHealth>,
) -> FallbackOrchestrator {
    FallbackOrchestrator::new(config, health)
}
