//! Provider Health
//!
//! Cached reachability check of the identity provider. Reads never block:
//! a stale verdict is returned immediately while a single background
//! refresh brings it up to date.

use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::core::{HttpRequest, HttpTransport, ReqwestHttpTransport};
use crate::types::{Environment, HealthCheckConfig, ResilienceConfig};

/// Answers whether the external provider should be considered reachable.
pub trait ProviderHealth: Send + Sync {
    fn is_available(&self) -> bool;
}

/// Last probe verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HealthStatus {
    pub is_healthy: bool,
    /// `None` until the first probe completes.
    pub last_checked_at: Option<Instant>,
}

impl Default for HealthStatus {
    fn default() -> Self {
        Self {
            is_healthy: true,
            last_checked_at: None,
        }
    }
}

struct ProbeInner<T> {
    transport: Arc<T>,
    url: Option<String>,
    environment: Environment,
    config: HealthCheckConfig,
    status: RwLock<HealthStatus>,
    refresh: Mutex<Option<JoinHandle<bool>>>,
}

/// TTL-bounded health probe.
pub struct HealthProbe<T: HttpTransport + 'static = ReqwestHttpTransport> {
    inner: Arc<ProbeInner<T>>,
}

impl<T: HttpTransport + 'static> Clone for HealthProbe<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: HttpTransport + 'static> HealthProbe<T> {
    /// Create a probe for the endpoint derived from `config`.
    pub fn new(transport: Arc<T>, config: &ResilienceConfig) -> Self {
        Self::with_endpoint(
            transport,
            config.health_check_url(),
            config.environment,
            config.health_check.clone(),
        )
    }

    pub fn with_endpoint(
        transport: Arc<T>,
        url: Option<String>,
        environment: Environment,
        config: HealthCheckConfig,
    ) -> Self {
        Self {
            inner: Arc::new(ProbeInner {
                transport,
                url,
                environment,
                config,
                status: RwLock::new(HealthStatus::default()),
                refresh: Mutex::new(None),
            }),
        }
    }

    /// Cached verdict. Triggers a background refresh when the verdict is
    /// older than the check interval.
    pub fn is_available(&self) -> bool {
        if self.inner.environment.is_development() {
            return false;
        }

        let status = *self.inner.status.read();
        let fresh = status
            .last_checked_at
            .map(|at| at.elapsed() < self.inner.config.interval)
            .unwrap_or(false);

        if !fresh {
            self.spawn_refresh();
        }

        status.is_healthy
    }

    /// Probe the provider now and store the verdict.
    pub async fn check_now(&self) -> bool {
        check(&self.inner).await
    }

    /// Wait for the in-flight background refresh, if any. Returns its verdict.
    pub async fn wait_for_refresh(&self) -> Option<bool> {
        let handle = self.inner.refresh.lock().take();
        match handle {
            Some(handle) => handle.await.ok(),
            None => None,
        }
    }

    pub fn status(&self) -> HealthStatus {
        *self.inner.status.read()
    }

    fn spawn_refresh(&self) {
        let mut refresh = self.inner.refresh.lock();
        if refresh.as_ref().map(|h| !h.is_finished()).unwrap_or(false) {
            return;
        }

        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                let inner = Arc::clone(&self.inner);
                *refresh = Some(runtime.spawn(async move { check(&inner).await }));
            }
            Err(_) => {
                tracing::debug!("No async runtime, skipping provider health refresh");
            }
        }
    }
}

impl<T: HttpTransport + 'static> ProviderHealth for HealthProbe<T> {
    fn is_available(&self) -> bool {
        HealthProbe::is_available(self)
    }
}

async fn check<T: HttpTransport>(inner: &ProbeInner<T>) -> bool {
    if inner.environment.is_development() {
        return false;
    }

    let timeout = inner.config.timeout;
    let healthy = match &inner.url {
        None => {
            tracing::warn!("No provider health-check endpoint configured");
            false
        }
        Some(url) => {
            let request = HttpRequest::get(url.as_str()).with_timeout(timeout);
            match tokio::time::timeout(timeout, inner.transport.send(request)).await {
                Ok(Ok(response)) => {
                    if !response.is_success() {
                        tracing::warn!(url = %url, status = response.status, "Provider health check failed");
                    }
                    response.is_success()
                }
                Ok(Err(error)) => {
                    tracing::warn!(url = %url, error = %error, "Provider health check failed");
                    false
                }
                Err(_) => {
                    tracing::warn!(
                        url = %url,
                        timeout_ms = timeout.as_millis() as u64,
                        "Provider health check timed out"
                    );
                    false
                }
            }
        }
    };

    let previous = {
        let mut status = inner.status.write();
        let previous = status.is_healthy;
        *status = HealthStatus {
            is_healthy: healthy,
            last_checked_at: Some(Instant::now()),
        };
        previous
    };

    if previous != healthy {
        if healthy {
            tracing::info!("Identity provider is available again");
        } else {
            tracing::warn!("Identity provider marked unavailable");
        }
    }

    healthy
}

/// Create a health probe over the default reqwest transport.
pub fn create_health_probe(
    transport: Arc<ReqwestHttpTransport>,
    config: &ResilienceConfig,
) -> HealthProbe<ReqwestHttpTransport> {
    HealthProbe::new(transport, config)
}

/// Mock provider health for testing.
#[derive(Debug)]
pub struct MockProviderHealth {
    available: AtomicBool,
}

impl MockProviderHealth {
    pub fn new(available: bool) -> Self {
        Self {
            available: AtomicBool::new(available),
        }
    }

    pub fn set_available(&self, available: bool) -> &Self {
        self.available.store(available, Ordering::SeqCst);
        self
    }
}

impl Default for MockProviderHealth {
    fn default() -> Self {
        Self::new(true)
    }
}

impl ProviderHealth for MockProviderHealth {
    fn is_available(&self) -> bool {
        self.available.load(Ordering::SeqCst)
    }
}
