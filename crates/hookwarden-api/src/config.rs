//! Configuration types for the HTTP service
//!
//! Every section is defaulted so a partial file (or none at all) yields a
//! runnable configuration. Call [`ServiceConfig::validate`] after loading.

use hookwarden_core::signature::WebhookSecret;
use hookwarden_core::{CircuitBreakerConfig, RetryConfig, RetryPreset, WebhookSource};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use url::Url;

use crate::errors::ConfigError;

/// Service configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    /// HTTP server settings
    pub server: ServerConfig,

    /// Per-provider webhook settings
    pub providers: ProvidersConfig,

    /// Event ledger settings
    pub ledger: LedgerConfig,

    /// Handler retry policy
    pub retry: RetrySettings,

    /// Downstream circuit breaker settings
    pub circuit_breaker: CircuitBreakerSettings,

    /// Background sweeper settings
    pub sweeper: SweeperConfig,

    /// Downstream forwarding rules
    pub forwarding: Vec<ForwardingRule>,

    /// Logging configuration
    pub logging: LoggingConfig,
}

impl ServiceConfig {
    /// Check cross-field constraints that serde cannot express.
    ///
    /// # Errors
    ///
    /// [`ConfigError`] describing the first invalid setting found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.server.port == 0 {
            return Err(ConfigError::Invalid {
                message: "server.port must be non-zero".to_string(),
            });
        }

        for source in WebhookSource::ALL {
            self.providers.get(source).validate(source)?;
        }

        if self.ledger.max_retries == 0 {
            return Err(ConfigError::Invalid {
                message: "ledger.max_retries must be at least 1".to_string(),
            });
        }
        if self.ledger.backend == LedgerBackend::Filesystem
            && self.ledger.path.as_os_str().is_empty()
        {
            return Err(ConfigError::Missing {
                key: "ledger.path".to_string(),
            });
        }

        if self.circuit_breaker.failure_threshold == 0
            || self.circuit_breaker.success_threshold == 0
        {
            return Err(ConfigError::Invalid {
                message: "circuit_breaker thresholds must be at least 1".to_string(),
            });
        }

        if self.sweeper.enabled && self.sweeper.interval_seconds == 0 {
            return Err(ConfigError::Invalid {
                message: "sweeper.interval_seconds must be non-zero".to_string(),
            });
        }

        for (index, rule) in self.forwarding.iter().enumerate() {
            if !matches!(rule.url.scheme(), "http" | "https") {
                return Err(ConfigError::Invalid {
                    message: format!("forwarding[{}].url must use http or https", index),
                });
            }
        }

        Ok(())
    }

    /// Largest body any enabled provider accepts.
    pub fn max_body_bytes(&self) -> usize {
        WebhookSource::ALL
            .iter()
            .map(|source| self.providers.get(*source).max_body_bytes_for(*source))
            .max()
            .unwrap_or(DEFAULT_IDENTITY_BODY_BYTES)
    }
}

// ============================================================================
// Server
// ============================================================================

/// HTTP server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Host to bind to
    pub host: String,

    /// Port to listen on
    pub port: u16,

    /// Graceful shutdown timeout in seconds
    pub shutdown_timeout_seconds: u64,

    /// Enable CORS
    pub enable_cors: bool,

    /// Enable compression
    pub enable_compression: bool,

    /// Expose the `/admin` routes
    pub enable_admin: bool,

    /// High-severity errors in the recent window that mark the service degraded
    pub degraded_error_threshold: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            shutdown_timeout_seconds: 30,
            enable_cors: true,
            enable_compression: true,
            enable_admin: true,
            degraded_error_threshold: 10,
        }
    }
}

// ============================================================================
// Providers
// ============================================================================

pub const DEFAULT_IDENTITY_BODY_BYTES: usize = 1024 * 1024;
pub const DEFAULT_BILLING_BODY_BYTES: usize = 2 * 1024 * 1024;
pub const DEFAULT_SOCIAL_BODY_BYTES: usize = 512 * 1024;

/// Body cap applied when a provider does not configure one.
pub fn default_max_body_bytes(source: WebhookSource) -> usize {
    match source {
        WebhookSource::Identity => DEFAULT_IDENTITY_BODY_BYTES,
        WebhookSource::Billing => DEFAULT_BILLING_BODY_BYTES,
        WebhookSource::Social => DEFAULT_SOCIAL_BODY_BYTES,
    }
}

/// Settings for all three providers.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ProvidersConfig {
    pub identity: ProviderConfig,
    pub billing: ProviderConfig,
    pub social: ProviderConfig,
}

impl ProvidersConfig {
    pub fn get(&self, source: WebhookSource) -> &ProviderConfig {
        match source {
            WebhookSource::Identity => &self.identity,
            WebhookSource::Billing => &self.billing,
            WebhookSource::Social => &self.social,
        }
    }
}

/// Settings for one provider endpoint.
#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    /// Accept webhooks from this provider
    pub enabled: bool,

    /// Current shared signing secret
    #[serde(skip_serializing)]
    pub secret: Option<WebhookSecret>,

    /// Previous secret, still accepted while the provider rotates keys
    #[serde(skip_serializing)]
    pub previous_secret: Option<WebhookSecret>,

    /// Body size cap; the provider default applies when unset
    pub max_body_bytes: Option<usize>,

    pub rate_limit: RateLimitConfig,

    /// Allowed skew for timestamped signatures
    pub timestamp_tolerance_seconds: u64,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            secret: None,
            previous_secret: None,
            max_body_bytes: None,
            rate_limit: RateLimitConfig::default(),
            timestamp_tolerance_seconds: 300,
        }
    }
}

impl std::fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let redact = |s: &Option<WebhookSecret>| s.as_ref().map(|_| "<REDACTED>");
        f.debug_struct("ProviderConfig")
            .field("enabled", &self.enabled)
            .field("secret", &redact(&self.secret))
            .field("previous_secret", &redact(&self.previous_secret))
            .field("max_body_bytes", &self.max_body_bytes)
            .field("rate_limit", &self.rate_limit)
            .field(
                "timestamp_tolerance_seconds",
                &self.timestamp_tolerance_seconds,
            )
            .finish()
    }
}

impl ProviderConfig {
    /// Provider config with a signing secret, everything else defaulted.
    pub fn with_secret(secret: impl Into<String>) -> Self {
        Self {
            secret: Some(WebhookSecret::new(secret)),
            ..Self::default()
        }
    }

    pub fn max_body_bytes_for(&self, source: WebhookSource) -> usize {
        self.max_body_bytes
            .unwrap_or_else(|| default_max_body_bytes(source))
    }

    pub fn timestamp_tolerance(&self) -> Duration {
        Duration::from_secs(self.timestamp_tolerance_seconds)
    }

    /// Secrets to verify against, current first. Empty entries are skipped.
    pub fn secrets(&self) -> Vec<WebhookSecret> {
        [&self.secret, &self.previous_secret]
            .into_iter()
            .flatten()
            .filter(|s| !s.is_empty())
            .cloned()
            .collect()
    }

    fn validate(&self, source: WebhookSource) -> Result<(), ConfigError> {
        if !self.enabled {
            return Ok(());
        }

        let invalid = |message: &str| ConfigError::Provider {
            provider: source.to_string(),
            message: message.to_string(),
        };

        match self.secret.as_ref().map(WebhookSecret::expose) {
            None => {
                return Err(ConfigError::Missing {
                    key: format!("providers.{}.secret", source),
                })
            }
            Some(s) if s.trim().is_empty() => return Err(invalid("secret must not be empty")),
            Some(_) => {}
        }
        if self.max_body_bytes == Some(0) {
            return Err(invalid("max_body_bytes must be non-zero"));
        }
        if self.rate_limit.max_requests == 0 {
            return Err(invalid("rate_limit.max_requests must be non-zero"));
        }
        if self.rate_limit.window_ms == 0 {
            return Err(invalid("rate_limit.window_ms must be non-zero"));
        }
        Ok(())
    }
}

/// Fixed-window limit applied per `(source, caller)` key.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    pub max_requests: u32,
    pub window_ms: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_requests: 100,
            window_ms: 60_000,
        }
    }
}

impl RateLimitConfig {
    pub fn window(&self) -> Duration {
        Duration::from_millis(self.window_ms)
    }
}

// ============================================================================
// Ledger, retry, breaker
// ============================================================================

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LedgerBackend {
    #[default]
    Memory,
    Filesystem,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LedgerConfig {
    pub backend: LedgerBackend,

    /// Root directory for the filesystem backend
    pub path: PathBuf,

    /// Cap on operator and sweeper retries per event
    pub max_retries: u32,

    /// Processed events older than this are purged
    pub retention_days: u64,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            backend: LedgerBackend::Memory,
            path: PathBuf::from("data/ledger"),
            max_retries: hookwarden_core::ledger::DEFAULT_MAX_RETRIES,
            retention_days: 30,
        }
    }
}

impl LedgerConfig {
    pub fn retention(&self) -> Duration {
        Duration::from_secs(self.retention_days.saturating_mul(24 * 60 * 60))
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    pub preset: RetryPreset,
}

impl RetrySettings {
    pub fn to_config(&self) -> RetryConfig {
        self.preset.config()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerSettings {
    pub failure_threshold: u32,
    pub recovery_timeout_ms: u64,
    pub success_threshold: u32,
    pub operation_timeout_seconds: u64,
}

impl Default for CircuitBreakerSettings {
    fn default() -> Self {
        let defaults = CircuitBreakerConfig::default();
        Self {
            failure_threshold: defaults.failure_threshold,
            recovery_timeout_ms: defaults.recovery_timeout.as_millis() as u64,
            success_threshold: defaults.success_threshold,
            operation_timeout_seconds: defaults.operation_timeout.as_secs(),
        }
    }
}

impl CircuitBreakerSettings {
    pub fn to_config(&self) -> CircuitBreakerConfig {
        CircuitBreakerConfig::default()
            .with_failure_threshold(self.failure_threshold)
            .with_recovery_timeout(Duration::from_millis(self.recovery_timeout_ms))
            .with_success_threshold(self.success_threshold)
            .with_operation_timeout(Duration::from_secs(self.operation_timeout_seconds))
    }
}

// ============================================================================
// Sweeper and forwarding
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SweeperConfig {
    pub enabled: bool,
    pub interval_seconds: u64,
    /// Events considered per queue per pass
    pub batch_size: usize,
}

impl Default for SweeperConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_seconds: 60,
            batch_size: 100,
        }
    }
}

impl SweeperConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_seconds)
    }
}

/// Forward events of `source` to `url`.
///
/// An empty `event_types` list forwards every event type of the source.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForwardingRule {
    pub source: WebhookSource,

    #[serde(default)]
    pub event_types: Vec<String>,

    pub url: Url,

    /// Circuit breaker key; defaults to the URL host
    #[serde(default)]
    pub dependency: Option<String>,

    #[serde(default = "default_forward_timeout_seconds")]
    pub timeout_seconds: u64,
}

fn default_forward_timeout_seconds() -> u64 {
    10
}

impl ForwardingRule {
    /// Breaker key for this rule's downstream.
    pub fn dependency_name(&self) -> String {
        self.dependency
            .clone()
            .or_else(|| self.url.host_str().map(str::to_string))
            .unwrap_or_else(|| self.url.to_string())
    }
}

// ============================================================================
// Logging
// ============================================================================

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter directive when `RUST_LOG` is unset
    pub level: String,

    /// Enable JSON structured logging
    pub json_format: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "hookwarden_service=info,hookwarden_api=info,hookwarden_core=info,tower_http=debug"
                .to_string(),
            json_format: false,
        }
    }
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
