//! HTTP Transport
//!
//! HTTP client interface used to reach the identity provider, plus
//! extraction of rate-limit hints from responses.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use crate::error::{ConfigurationError, IdpError, IdpResult, NetworkError, ProtocolError};

/// Default per-request timeout of the reqwest transport.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Default maximum accepted response body size (1 MiB).
pub const DEFAULT_MAX_RESPONSE_SIZE: usize = 1024 * 1024;

/// Provider header carrying a retry hint in milliseconds.
pub const RETRY_AFTER_MS_HEADER: &str = "x-ms-retry-after-ms";

/// HTTP request definition.
#[derive(Clone, Debug)]
pub struct HttpRequest {
    pub method: HttpMethod,
    pub url: String,
    pub headers: HashMap<String, String>,
    pub body: Option<String>,
    /// Overrides the transport default when set.
    pub timeout: Option<Duration>,
}

impl HttpRequest {
    /// GET request without body.
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            method: HttpMethod::Get,
            url: url.into(),
            headers: HashMap::new(),
            body: None,
            timeout: None,
        }
    }

    /// POST request with a form-encoded body.
    pub fn post_form(url: impl Into<String>, body: impl Into<String>) -> Self {
        let mut headers = HashMap::new();
        headers.insert(
            "content-type".to_string(),
            "application/x-www-form-urlencoded".to_string(),
        );
        Self {
            method: HttpMethod::Post,
            url: url.into(),
            headers,
            body: Some(body.into()),
            timeout: None,
        }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// HTTP method.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HttpMethod {
    Get,
    Post,
}

impl HttpMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
        }
    }
}

/// HTTP response definition. Header names are lowercase.
#[derive(Clone, Debug)]
pub struct HttpResponse {
    pub status: u16,
    pub headers: HashMap<String, String>,
    pub body: String,
}

impl HttpResponse {
    pub fn new(status: u16) -> Self {
        Self {
            status,
            headers: HashMap::new(),
            body: String::new(),
        }
    }

    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.insert(name.to_ascii_lowercase(), value.into());
        self
    }

    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        self.body = body.into();
        self
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Transport-neutral status and retry hints of a provider response.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ResponseMeta {
    pub status: u16,
    /// Explicit delay requested by the provider.
    pub retry_after: Option<Duration>,
    /// Explicit point in time after which the provider accepts calls again.
    pub retry_after_at: Option<DateTime<Utc>>,
}

impl ResponseMeta {
    pub fn new(status: u16) -> Self {
        Self {
            status,
            ..Default::default()
        }
    }

    pub fn with_retry_after_at(mut self, at: DateTime<Utc>) -> Self {
        self.retry_after_at = Some(at);
        self
    }

    /// Build from lowercase response headers.
    ///
    /// `Retry-After` is read as delta-seconds first, then as an HTTP date.
    /// `x-ms-retry-after-ms` is only consulted when `Retry-After` is absent
    /// or unparseable.
    pub fn from_headers(status: u16, headers: &HashMap<String, String>) -> Self {
        let mut meta = Self::new(status);

        if let Some(value) = headers.get("retry-after").map(|v| v.trim()) {
            if let Ok(seconds) = value.parse::<u64>() {
                meta.retry_after = Some(Duration::from_secs(seconds));
            } else if let Ok(at) = DateTime::parse_from_rfc2822(value) {
                meta.retry_after_at = Some(at.with_timezone(&Utc));
            }
        }

        if meta.retry_after.is_none() && meta.retry_after_at.is_none() {
            meta.retry_after = headers
                .get(RETRY_AFTER_MS_HEADER)
                .and_then(|v| v.trim().parse::<u64>().ok())
                .map(Duration::from_millis);
        }

        meta
    }

    /// Delay the provider asked for, relative to `now`. A target time that
    /// has already passed yields one second.
    pub fn suggested_delay(&self, now: DateTime<Utc>) -> Option<Duration> {
        if let Some(delay) = self.retry_after {
            return Some(delay);
        }

        self.retry_after_at.map(|at| {
            (at - now)
                .to_std()
                .ok()
                .filter(|d| !d.is_zero())
                .unwrap_or(Duration::from_secs(1))
        })
    }
}

/// Responses the rate limiter can inspect for status and retry hints.
pub trait RateLimitedResponse {
    fn response_meta(&self) -> ResponseMeta;
}

impl RateLimitedResponse for HttpResponse {
    fn response_meta(&self) -> ResponseMeta {
        ResponseMeta::from_headers(self.status, &self.headers)
    }
}

impl RateLimitedResponse for ResponseMeta {
    fn response_meta(&self) -> ResponseMeta {
        self.clone()
    }
}

/// HTTP transport interface (for dependency injection).
#[async_trait]
pub trait HttpTransport: Send + Sync {
    /// Send an HTTP request.
    async fn send(&self, request: HttpRequest) -> IdpResult<HttpResponse>;
}

/// Default reqwest-based HTTP transport.
pub struct ReqwestHttpTransport {
    client: reqwest::Client,
    default_timeout: Duration,
    max_response_size: usize,
}

impl ReqwestHttpTransport {
    /// Create new transport with default settings.
    pub fn new() -> IdpResult<Self> {
        Self::with_options(DEFAULT_REQUEST_TIMEOUT, DEFAULT_MAX_RESPONSE_SIZE)
    }

    /// Create transport with custom options.
    pub fn with_options(timeout: Duration, max_response_size: usize) -> IdpResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|e| {
                IdpError::Configuration(ConfigurationError::InvalidConfig {
                    message: format!("failed to create HTTP client: {}", e),
                })
            })?;

        Ok(Self {
            client,
            default_timeout: timeout,
            max_response_size,
        })
    }
}

#[async_trait]
impl HttpTransport for ReqwestHttpTransport {
    async fn send(&self, request: HttpRequest) -> IdpResult<HttpResponse> {
        let timeout = request.timeout.unwrap_or(self.default_timeout);

        let mut req_builder = match request.method {
            HttpMethod::Get => self.client.get(&request.url),
            HttpMethod::Post => self.client.post(&request.url),
        };

        for (key, value) in &request.headers {
            req_builder = req_builder.header(key, value);
        }

        if let Some(body) = request.body {
            req_builder = req_builder.body(body);
        }

        let response = req_builder.timeout(timeout).send().await.map_err(|e| {
            if e.is_timeout() {
                IdpError::Network(NetworkError::Timeout { timeout })
            } else {
                IdpError::Network(NetworkError::ConnectionFailed {
                    message: e.to_string(),
                })
            }
        })?;

        let status = response.status().as_u16();

        if (300..400).contains(&status) {
            let location = response
                .headers()
                .get("location")
                .and_then(|v| v.to_str().ok())
                .unwrap_or("")
                .to_string();
            return Err(IdpError::Protocol(ProtocolError::UnexpectedRedirect {
                location,
            }));
        }

        let mut headers = HashMap::new();
        for (key, value) in response.headers() {
            if let Ok(v) = value.to_str() {
                headers.insert(key.as_str().to_ascii_lowercase(), v.to_string());
            }
        }

        if let Some(len) = response.content_length() {
            if len as usize > self.max_response_size {
                return Err(IdpError::Protocol(ProtocolError::ResponseTooLarge {
                    size: len as usize,
                }));
            }
        }

        let body = response.text().await.map_err(|e| {
            IdpError::Protocol(ProtocolError::InvalidResponse {
                message: e.to_string(),
            })
        })?;

        if body.len() > self.max_response_size {
            return Err(IdpError::Protocol(ProtocolError::ResponseTooLarge {
                size: body.len(),
            }));
        }

        Ok(HttpResponse {
            status,
            headers,
            body,
        })
    }
}

/// Mock HTTP transport for testing. Replies are served in FIFO order.
#[derive(Default)]
pub struct MockHttpTransport {
    replies: Mutex<VecDeque<IdpResult<HttpResponse>>>,
    request_history: Mutex<Vec<HttpRequest>>,
    default_response: Mutex<Option<HttpResponse>>,
    latency: Mutex<Option<Duration>>,
}

impl MockHttpTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a response to return.
    pub fn queue_response(&self, response: HttpResponse) -> &Self {
        self.replies.lock().push_back(Ok(response));
        self
    }

    /// Queue a bare status response.
    pub fn queue_status(&self, status: u16) -> &Self {
        self.queue_response(HttpResponse::new(status))
    }

    /// Queue a JSON response.
    pub fn queue_json_response<T: serde::Serialize>(&self, status: u16, body: &T) -> &Self {
        let response = HttpResponse::new(status)
            .with_header("content-type", "application/json")
            .with_body(serde_json::to_string(body).unwrap_or_default());
        self.queue_response(response)
    }

    /// Queue a transport error.
    pub fn queue_error(&self, error: IdpError) -> &Self {
        self.replies.lock().push_back(Err(error));
        self
    }

    /// Set default response when queue is empty.
    pub fn set_default_response(&self, response: HttpResponse) -> &Self {
        *self.default_response.lock() = Some(response);
        self
    }

    /// Delay every reply by `latency`.
    pub fn set_latency(&self, latency: Duration) -> &Self {
        *self.latency.lock() = Some(latency);
        self
    }

    pub fn get_requests(&self) -> Vec<HttpRequest> {
        self.request_history.lock().clone()
    }

    pub fn request_count(&self) -> usize {
        self.request_history.lock().len()
    }
}

#[async_trait]
impl HttpTransport for MockHttpTransport {
    async fn send(&self, request: HttpRequest) -> IdpResult<HttpResponse> {
        self.request_history.lock().push(request);

        let latency = *self.latency.lock();
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }

        let reply = self.replies.lock().pop_front();
        match reply {
            Some(reply) => reply,
            None => self.default_response.lock().clone().ok_or_else(|| {
                IdpError::Network(NetworkError::ConnectionFailed {
                    message: "No mock response available".to_string(),
                })
            }),
        }
    }
}
