//! Logging
//!
//! Structured authentication event logging.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use parking_lot::Mutex;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crate::types::{AuthPath, Environment, Operation};

/// Log level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LogLevel::Debug => write!(f, "DEBUG"),
            LogLevel::Info => write!(f, "INFO"),
            LogLevel::Warn => write!(f, "WARN"),
            LogLevel::Error => write!(f, "ERROR"),
        }
    }
}

/// Authentication log context.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AuthLogContext {
    /// Event type, e.g. `AuthenticationAttempt`.
    pub event: Option<String>,
    pub operation: Option<String>,
    /// Masked user identity.
    pub identity: Option<String>,
    /// Stable fingerprint of the identity, for correlation across events.
    pub identity_ref: Option<String>,
    pub auth_path: Option<String>,
    pub duration_ms: Option<u64>,
    pub extra: BTreeMap<String, String>,
}

impl AuthLogContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn event(mut self, event: impl Into<String>) -> Self {
        self.event = Some(event.into());
        self
    }

    pub fn operation(mut self, operation: impl Into<String>) -> Self {
        self.operation = Some(operation.into());
        self
    }

    pub fn identity(mut self, identity: impl Into<String>) -> Self {
        self.identity = Some(identity.into());
        self
    }

    pub fn identity_ref(mut self, identity_ref: impl Into<String>) -> Self {
        self.identity_ref = Some(identity_ref.into());
        self
    }

    pub fn auth_path(mut self, path: AuthPath) -> Self {
        self.auth_path = Some(path.as_str().to_string());
        self
    }

    pub fn duration(mut self, duration: Duration) -> Self {
        self.duration_ms = Some(duration.as_millis() as u64);
        self
    }

    /// Add extra context.
    pub fn extra(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.extra.insert(key.into(), value.into());
        self
    }
}

/// Logger interface.
pub trait Logger: Send + Sync {
    /// Emit one entry.
    fn log(&self, level: LogLevel, message: &str, context: &AuthLogContext);

    /// Check if a log level is enabled.
    fn is_enabled(&self, level: LogLevel) -> bool;

    fn debug(&self, message: &str, context: &AuthLogContext) {
        self.log(LogLevel::Debug, message, context);
    }

    fn info(&self, message: &str, context: &AuthLogContext) {
        self.log(LogLevel::Info, message, context);
    }

    fn warn(&self, message: &str, context: &AuthLogContext) {
        self.log(LogLevel::Warn, message, context);
    }

    fn error(&self, message: &str, context: &AuthLogContext) {
        self.log(LogLevel::Error, message, context);
    }
}

/// No-op logger implementation.
pub struct NoOpLogger;

impl Logger for NoOpLogger {
    fn log(&self, _level: LogLevel, _message: &str, _context: &AuthLogContext) {}

    fn is_enabled(&self, _level: LogLevel) -> bool {
        false
    }
}

/// No-op logger singleton.
pub fn no_op_logger() -> NoOpLogger {
    NoOpLogger
}

/// Logger forwarding to `tracing` with the context as structured fields.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingLogger;

impl Logger for TracingLogger {
    fn log(&self, level: LogLevel, message: &str, context: &AuthLogContext) {
        let event = context.event.as_deref().unwrap_or("");
        let operation = context.operation.as_deref().unwrap_or("");
        let identity = context.identity.as_deref().unwrap_or("");
        let identity_ref = context.identity_ref.as_deref().unwrap_or("");
        let auth_path = context.auth_path.as_deref().unwrap_or("");
        let duration_ms = context.duration_ms.unwrap_or(0);
        let extra = format!("{:?}", context.extra);

        match level {
            LogLevel::Debug => tracing::debug!(
                event, operation, identity, identity_ref, auth_path, duration_ms, extra = %extra,
                "{}", message
            ),
            LogLevel::Info => tracing::info!(
                event, operation, identity, identity_ref, auth_path, duration_ms, extra = %extra,
                "{}", message
            ),
            LogLevel::Warn => tracing::warn!(
                event, operation, identity, identity_ref, auth_path, duration_ms, extra = %extra,
                "{}", message
            ),
            LogLevel::Error => tracing::error!(
                event, operation, identity, identity_ref, auth_path, duration_ms, extra = %extra,
                "{}", message
            ),
        }
    }

    fn is_enabled(&self, level: LogLevel) -> bool {
        match level {
            LogLevel::Debug => tracing::enabled!(tracing::Level::DEBUG),
            LogLevel::Info => tracing::enabled!(tracing::Level::INFO),
            LogLevel::Warn => tracing::enabled!(tracing::Level::WARN),
            LogLevel::Error => tracing::enabled!(tracing::Level::ERROR),
        }
    }
}

/// Log entry for in-memory storage.
#[derive(Debug, Clone)]
pub struct LogEntry {
    pub level: LogLevel,
    pub message: String,
    pub context: AuthLogContext,
    pub timestamp: u64,
}

/// In-memory logger for testing.
pub struct InMemoryLogger {
    entries: Mutex<Vec<LogEntry>>,
    min_level: LogLevel,
}

impl InMemoryLogger {
    pub fn new() -> Self {
        Self::with_level(LogLevel::Debug)
    }

    /// Create in-memory logger with minimum level.
    pub fn with_level(min_level: LogLevel) -> Self {
        Self {
            entries: Mutex::new(Vec::new()),
            min_level,
        }
    }

    pub fn get_entries(&self) -> Vec<LogEntry> {
        self.entries.lock().clone()
    }

    pub fn get_entries_by_level(&self, level: LogLevel) -> Vec<LogEntry> {
        self.entries
            .lock()
            .iter()
            .filter(|e| e.level == level)
            .cloned()
            .collect()
    }

    /// Entries whose context carries the given event type.
    pub fn get_entries_by_event(&self, event: &str) -> Vec<LogEntry> {
        self.entries
            .lock()
            .iter()
            .filter(|e| e.context.event.as_deref() == Some(event))
            .cloned()
            .collect()
    }

    pub fn clear(&self) {
        self.entries.lock().clear();
    }
}

impl Default for InMemoryLogger {
    fn default() -> Self {
        Self::new()
    }
}

impl Logger for InMemoryLogger {
    fn log(&self, level: LogLevel, message: &str, context: &AuthLogContext) {
        if level < self.min_level {
            return;
        }

        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as u64;

        self.entries.lock().push(LogEntry {
            level,
            message: message.to_string(),
            context: context.clone(),
            timestamp: now,
        });
    }

    fn is_enabled(&self, level: LogLevel) -> bool {
        level >= self.min_level
    }
}

/// Create in-memory logger for testing.
pub fn create_in_memory_logger() -> InMemoryLogger {
    InMemoryLogger::new()
}

/// Event types emitted by [`AuthEventLogger`].
pub mod events {
    pub const ATTEMPT: &str = "AuthenticationAttempt";
    pub const SUCCESS: &str = "AuthenticationSuccess";
    pub const FAILURE: &str = "AuthenticationFailure";
    pub const FALLBACK: &str = "AuthenticationFallback";
}

/// Authentication event vocabulary on top of a [`Logger`].
///
/// Identities are masked outside development and every event carries a
/// fingerprint of the identity so events of one user can be correlated
/// without logging the address.
#[derive(Clone)]
pub struct AuthEventLogger {
    logger: Arc<dyn Logger>,
    mask_identities: bool,
    slow_threshold: Duration,
}

impl AuthEventLogger {
    pub fn new(logger: Arc<dyn Logger>, environment: Environment, slow_threshold: Duration) -> Self {
        Self {
            logger,
            mask_identities: !environment.is_development(),
            slow_threshold,
        }
    }

    fn context(&self, event: &str, operation: Operation, identity: &str) -> AuthLogContext {
        let shown = if self.mask_identities {
            mask_identity(identity)
        } else if identity.is_empty() {
            "Unknown".to_string()
        } else {
            identity.to_string()
        };

        AuthLogContext::new()
            .event(event)
            .operation(operation.as_str())
            .identity(shown)
            .identity_ref(identity_fingerprint(identity))
            .extra("flow", operation.flow())
    }

    pub fn log_attempt(&self, operation: Operation, identity: &str, path: AuthPath) {
        let context = self.context(events::ATTEMPT, operation, identity).auth_path(path);
        self.logger.info(
            &format!("{} attempt using {} authentication", operation.flow(), path.as_str()),
            &context,
        );
    }

    pub fn log_success(&self, operation: Operation, identity: &str, path: AuthPath, duration: Duration) {
        let context = self
            .context(events::SUCCESS, operation, identity)
            .auth_path(path)
            .duration(duration);
        self.logger.info(
            &format!("{} successful using {} authentication", operation.flow(), path.as_str()),
            &context,
        );
        self.check_slow(operation, path, duration, &context);
    }

    pub fn log_failure(
        &self,
        operation: Operation,
        identity: &str,
        path: AuthPath,
        reason: &str,
        error_code: Option<&str>,
        duration: Duration,
    ) {
        let context = self
            .context(events::FAILURE, operation, identity)
            .auth_path(path)
            .duration(duration)
            .extra("reason", reason)
            .extra("error_code", error_code.unwrap_or("UNKNOWN"));
        self.logger.warn(
            &format!("{} failed using {} authentication", operation.flow(), path.as_str()),
            &context,
        );
        self.check_slow(operation, path, duration, &context);
    }

    pub fn log_fallback(&self, operation: Operation, identity: &str, reason: &str) {
        let context = self
            .context(events::FALLBACK, operation, identity)
            .extra("from", AuthPath::External.as_str())
            .extra("to", AuthPath::Local.as_str())
            .extra("reason", reason);
        self.logger.warn(
            &format!("Authentication fallback: External -> Local due to {}", reason),
            &context,
        );
    }

    fn check_slow(&self, operation: Operation, path: AuthPath, duration: Duration, context: &AuthLogContext) {
        if duration > self.slow_threshold {
            self.logger.warn(
                &format!(
                    "Slow authentication: {} via {} took {}ms",
                    operation.flow(),
                    path.as_str(),
                    duration.as_millis()
                ),
                context,
            );
        }
    }
}

/// Mask an e-mail address as `ab***e@domain`. Local parts of three
/// characters or fewer become `***`. Values that are not a single-`@`
/// address are returned unchanged.
pub fn mask_identity(identity: &str) -> String {
    if identity.is_empty() {
        return "Unknown".to_string();
    }

    let mut parts = identity.split('@');
    match (parts.next(), parts.next(), parts.next()) {
        (Some(local), Some(domain), None) => {
            let chars: Vec<char> = local.chars().collect();
            let masked = if chars.len() > 3 {
                let head: String = chars[..2].iter().collect();
                format!("{}***{}", head, chars[chars.len() - 1])
            } else {
                "***".to_string()
            };
            format!("{}@{}", masked, domain)
        }
        _ => identity.to_string(),
    }
}

/// Short, stable, non-reversible reference to an identity.
pub fn identity_fingerprint(identity: &str) -> String {
    let digest = Sha256::digest(identity.trim().to_lowercase().as_bytes());
    let mut encoded = URL_SAFE_NO_PAD.encode(digest);
    encoded.truncate(12);
    encoded
}
