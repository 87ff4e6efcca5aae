//! Integration tests for the fallback orchestrator, rate limiter, circuit
//! breaker and health probe working together.

use futures::future::join_all;
use identity_resilience::telemetry::metrics::names;
use identity_resilience::telemetry::InMemoryMetrics;
use identity_resilience::{
    AuthPath, AuthResponse, AuthResult, CircuitBreaker, Environment, ErrorCode,
    FallbackOrchestrator, HealthProbe, HttpRequest, HttpResponse, HttpTransport, IdpError,
    IdpResult, LoginRequest, MockHttpTransport, MockProviderHealth, RateLimitError, RateLimiter,
    ReqwestHttpTransport, ResilienceConfig,
};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const TOKEN_URL: &str = "https://login.example.com/tenant/oauth2/v2.0/token";

fn config() -> ResilienceConfig {
    ResilienceConfig::builder()
        .environment(Environment::Production)
        .external_enabled(true)
        .authority("https://login.example.com/tenant")
        .build()
        .unwrap()
}

fn local_ok() -> IdpResult<AuthResult> {
    Ok(AuthResult::authenticated(
        AuthResponse {
            user_id: Some("local-user".to_string()),
            auth_path: Some(AuthPath::Local),
            ..Default::default()
        },
        "Login successful",
    ))
}

/// External login that redeems credentials at the token endpoint through the
/// orchestrator's rate limiter.
async fn external_login(
    limiter: &RateLimiter,
    transport: &Arc<MockHttpTransport>,
    cancel: &CancellationToken,
) -> IdpResult<AuthResult> {
    let response = limiter
        .execute_with_rate_limit_handling(
            || {
                let transport = Arc::clone(transport);
                async move {
                    transport
                        .send(HttpRequest::post_form(TOKEN_URL, "grant_type=password"))
                        .await
                }
            },
            "token",
            cancel,
        )
        .await;

    match response {
        Ok(response) if response.is_success() => Ok(AuthResult::authenticated(
            AuthResponse {
                user_id: Some("external-user".to_string()),
                auth_path: Some(AuthPath::External),
                ..Default::default()
            },
            "Login successful",
        )),
        Ok(response) => Err(identity_resilience::error::create_error_from_response(
            response.status,
            &response.body,
        )),
        Err(error) => Err(error),
    }
}

#[tokio::test(start_paused = true)]
async fn test_login_succeeds_after_provider_throttling() {
    // Arrange
    let orchestrator =
        FallbackOrchestrator::new(config(), Arc::new(MockProviderHealth::new(true)));
    let transport = Arc::new(MockHttpTransport::new());
    transport
        .queue_response(HttpResponse::new(429).with_header("retry-after", "3"))
        .queue_json_response(200, &serde_json::json!({"access_token": "abc"}));
    let cancel = CancellationToken::new();

    // Act
    let result = orchestrator
        .handle_authentication_with_fallback(
            &LoginRequest::new("alice.smith@example.com"),
            || external_login(orchestrator.rate_limiter(), &transport, &cancel),
            || async { local_ok() },
            &cancel,
        )
        .await;

    // Assert
    assert!(result.is_success());
    assert_eq!(result.user_id(), Some("external-user"));
    assert_eq!(transport.request_count(), 2);
    assert_eq!(orchestrator.rate_limiter().call_count("token"), 2);
    assert_eq!(orchestrator.circuit_breaker().failure_count("authentication"), 0);
}

#[tokio::test(start_paused = true)]
async fn test_rate_limit_exhaustion_falls_back_to_local() {
    // Arrange
    let metrics = Arc::new(InMemoryMetrics::new());
    let limiter = Arc::new(RateLimiter::default().with_metrics(metrics.clone()));
    let breaker = Arc::new(CircuitBreaker::default());
    let orchestrator = FallbackOrchestrator::new(config(), Arc::new(MockProviderHealth::new(true)))
        .with_rate_limiter(limiter.clone())
        .with_circuit_breaker(breaker.clone())
        .with_metrics(metrics.clone());
    let transport = Arc::new(MockHttpTransport::new());
    transport.set_default_response(HttpResponse::new(429).with_header("retry-after", "1"));
    let cancel = CancellationToken::new();

    // Act
    let result = orchestrator
        .handle_authentication_with_fallback(
            &LoginRequest::new("alice.smith@example.com"),
            || external_login(orchestrator.rate_limiter(), &transport, &cancel),
            || async { local_ok() },
            &cancel,
        )
        .await;

    // Assert
    assert_eq!(result.user_id(), Some("local-user"));
    assert_eq!(transport.request_count(), 3);
    assert_eq!(breaker.failure_count("authentication"), 1);
    assert_eq!(limiter.stats().rate_limited_responses, 3);
    assert_eq!(metrics.get_entries_by_name(names::RATE_LIMITED_TOTAL).len(), 3);
    assert_eq!(metrics.count(names::FALLBACKS_TOTAL, "reason", "unexpected_error"), 1);
}

#[tokio::test(start_paused = true)]
async fn test_rate_limit_error_maps_to_user_safe_result() {
    // Arrange
    let limiter = RateLimiter::default();
    let transport = Arc::new(MockHttpTransport::new());
    transport.set_default_response(HttpResponse::new(429).with_header("retry-after", "4"));
    let cancel = CancellationToken::new();
    let orchestrator =
        FallbackOrchestrator::new(config(), Arc::new(MockProviderHealth::new(true)));

    // Act
    let error = external_login(&limiter, &transport, &cancel)
        .await
        .unwrap_err();
    let result = orchestrator.classifier().to_auth_result("token", &error);

    // Assert
    assert!(matches!(
        error,
        IdpError::RateLimit(RateLimitError::Exceeded { .. })
    ));
    assert_eq!(result.status_code, 429);
    assert_eq!(result.error_code(), Some(ErrorCode::RateLimitExceeded));
    assert_eq!(
        result.error.as_ref().and_then(|e| e.retry_after_seconds),
        Some(4)
    );
}

#[tokio::test(start_paused = true)]
async fn test_provider_rejection_is_returned_to_caller() {
    // Arrange
    let orchestrator =
        FallbackOrchestrator::new(config(), Arc::new(MockProviderHealth::new(true)));
    let transport = Arc::new(MockHttpTransport::new());
    transport.queue_json_response(
        400,
        &serde_json::json!({"error": "invalid_scope", "error_description": "admin"}),
    );
    let cancel = CancellationToken::new();
    let local_calls = AtomicU32::new(0);

    // Act
    let result = orchestrator
        .handle_authentication_with_fallback(
            &LoginRequest::new("alice.smith@example.com"),
            || external_login(orchestrator.rate_limiter(), &transport, &cancel),
            || {
                local_calls.fetch_add(1, Ordering::SeqCst);
                async { local_ok() }
            },
            &cancel,
        )
        .await;

    // Assert
    assert!(!result.is_success());
    assert_eq!(result.error_code(), Some(ErrorCode::InvalidScope));
    assert_eq!(local_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_failures_open_breaker() {
    // Arrange
    let metrics = Arc::new(InMemoryMetrics::new());
    let orchestrator = FallbackOrchestrator::new(config(), Arc::new(MockProviderHealth::new(true)))
        .with_metrics(metrics.clone());
    let cancel = CancellationToken::new();
    let external_calls = AtomicU32::new(0);

    // Act
    let logins = (0..5).map(|i| {
        let request = LoginRequest::new(format!("user{}@example.com", i));
        let orchestrator = &orchestrator;
        let external_calls = &external_calls;
        let cancel = &cancel;
        async move {
            orchestrator
                .handle_authentication_with_fallback(
                    &request,
                    || async move {
                        external_calls.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_secs(30)).await;
                        local_ok()
                    },
                    || async { local_ok() },
                    cancel,
                )
                .await
        }
    });
    let results = join_all(logins).await;

    // Assert
    assert!(results.iter().all(|r| r.user_id() == Some("local-user")));
    assert_eq!(external_calls.load(Ordering::SeqCst), 5);
    assert!(orchestrator.circuit_breaker().is_open());
    assert_eq!(metrics.count(names::FALLBACKS_TOTAL, "reason", "timeout"), 5);

    // The next login skips the provider
    let result = orchestrator
        .handle_authentication_with_fallback(
            &LoginRequest::new("late@example.com"),
            || async {
                external_calls.fetch_add(1, Ordering::SeqCst);
                local_ok()
            },
            || async { local_ok() },
            &cancel,
        )
        .await;
    assert!(result.is_success());
    assert_eq!(external_calls.load(Ordering::SeqCst), 5);
    assert_eq!(metrics.count(names::FALLBACKS_TOTAL, "reason", "circuit_open"), 1);
}

#[tokio::test(start_paused = true)]
async fn test_breaker_recovers_after_cooldown() {
    // Arrange
    let orchestrator =
        FallbackOrchestrator::new(config(), Arc::new(MockProviderHealth::new(true)));
    for _ in 0..3 {
        orchestrator.circuit_breaker().record_failure("registration");
    }
    assert!(!orchestrator.should_use_external());

    // Act
    tokio::time::advance(Duration::from_secs(10 * 60 + 1)).await;

    // Assert
    assert!(orchestrator.should_use_external());
    assert_eq!(orchestrator.circuit_breaker().failure_count("registration"), 0);
}

#[tokio::test]
async fn test_unhealthy_provider_routes_next_login_local() {
    // Arrange
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/tenant/.well-known/openid-configuration"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let config = ResilienceConfig::builder()
        .environment(Environment::Staging)
        .external_enabled(true)
        .authority(format!("{}/tenant", server.uri()))
        .build()
        .unwrap();
    let probe = HealthProbe::new(Arc::new(ReqwestHttpTransport::new().unwrap()), &config);
    let orchestrator = FallbackOrchestrator::new(config, Arc::new(probe.clone()));
    let external_calls = AtomicU32::new(0);
    let cancel = CancellationToken::new();

    // Act - the first read is optimistic and starts a refresh
    assert!(orchestrator.should_use_external());
    assert_eq!(probe.wait_for_refresh().await, Some(false));

    let result = orchestrator
        .handle_authentication_with_fallback(
            &LoginRequest::new("alice.smith@example.com"),
            || async {
                external_calls.fetch_add(1, Ordering::SeqCst);
                local_ok()
            },
            || async { local_ok() },
            &cancel,
        )
        .await;

    // Assert
    assert!(result.is_success());
    assert_eq!(external_calls.load(Ordering::SeqCst), 0);
    assert!(!probe.status().is_healthy);
}

#[tokio::test]
async fn test_auth_url_with_fallback_in_development() {
    // Arrange
    let config = ResilienceConfig::builder()
        .environment(Environment::Development)
        .external_enabled(true)
        .local_auth_endpoint("/auth/local")
        .build()
        .unwrap();
    let orchestrator = FallbackOrchestrator::new(config, Arc::new(MockProviderHealth::new(true)));

    // Act
    let response = orchestrator.get_auth_url_with_fallback(Some("alice@example.com"), None, || {
        Ok(identity_resilience::AuthUrlResponse::external(
            "https://login.example.com/authorize",
            "Login",
        ))
    });

    // Assert
    assert!(response.use_local_auth);
    assert_eq!(response.local_endpoint.as_deref(), Some("/auth/local"));
    tokio_test::assert_ok!(serde_json::to_string(&response));
}
