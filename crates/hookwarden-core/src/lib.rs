//! # Hookwarden Core
//!
//! Core logic for the Hookwarden webhook ingestion and delivery service.
//!
//! This crate authenticates inbound webhook notifications from the identity,
//! billing, and social providers, records them in an idempotent event ledger,
//! and dispatches them to registered handlers with retry, backoff, and
//! circuit-breaker protection.
//!
//! ## Architecture
//!
//! - Business logic depends only on trait abstractions ([`ledger::EventLedger`],
//!   [`dispatcher::EventHandler`], [`monitoring::MetricsCollector`])
//! - Storage and transport implementations are injected at runtime
//! - Process-local protection state (rate limits, breakers) lives in explicit
//!   components constructed once and shared by handle
//!
//! ## Usage
//!
//! ```rust
//! use hookwarden_core::{EventId, WebhookSource};
//!
//! let event_id = EventId::new();
//! let source: WebhookSource = "billing".parse().unwrap();
//! assert_eq!(source, WebhookSource::Billing);
//! ```

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

pub use ulid::Ulid;

// ============================================================================
// Domain Identifier Types
// ============================================================================

/// Unique identifier for a ledger record.
///
/// Uses ULID so identifiers sort by creation time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EventId(Ulid);

impl EventId {
    /// Generate a new unique event ID
    pub fn new() -> Self {
        Self(Ulid::new())
    }
}

impl Default for EventId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for EventId {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let ulid = s.parse::<Ulid>().map_err(|_| ParseError::InvalidFormat {
            expected: "ULID format".to_string(),
            actual: s.to_string(),
        })?;
        Ok(Self(ulid))
    }
}

/// External provider that emitted a webhook.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WebhookSource {
    /// Identity provider (user lifecycle events)
    Identity,
    /// Payment provider (subscription lifecycle events)
    Billing,
    /// Social-posting aggregator (post lifecycle events)
    Social,
}

impl WebhookSource {
    /// Every supported provider, in routing order.
    pub const ALL: [WebhookSource; 3] = [Self::Identity, Self::Billing, Self::Social];

    /// Get string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Identity => "identity",
            Self::Billing => "billing",
            Self::Social => "social",
        }
    }

    /// Name of the HTTP header carrying this provider's signature.
    pub fn signature_header(&self) -> &'static str {
        match self {
            Self::Identity => "clerk-signature",
            Self::Billing => "stripe-signature",
            Self::Social => "x-ayrshare-signature",
        }
    }
}

impl fmt::Display for WebhookSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for WebhookSource {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "identity" => Ok(Self::Identity),
            "billing" => Ok(Self::Billing),
            "social" => Ok(Self::Social),
            _ => Err(ParseError::InvalidFormat {
                expected: "identity, billing, or social".to_string(),
                actual: s.to_string(),
            }),
        }
    }
}

// ============================================================================
// Time Types
// ============================================================================

/// UTC timestamp with microsecond precision
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Timestamp(DateTime<Utc>);

impl Timestamp {
    /// Create timestamp for current moment
    pub fn now() -> Self {
        Self(Utc::now())
    }

    /// Create timestamp from seconds since the Unix epoch
    pub fn from_unix_seconds(seconds: i64) -> Option<Self> {
        Utc.timestamp_opt(seconds, 0).single().map(Self)
    }

    /// Convert to RFC3339 string
    pub fn to_rfc3339(&self) -> String {
        self.0.to_rfc3339()
    }

    /// Seconds since the Unix epoch
    pub fn unix_seconds(&self) -> i64 {
        self.0.timestamp()
    }

    /// Add seconds to timestamp
    pub fn add_seconds(&self, seconds: u64) -> Self {
        let duration = chrono::Duration::seconds(seconds as i64);
        Self(self.0 + duration)
    }

    /// Subtract duration from timestamp
    pub fn subtract_duration(&self, duration: Duration) -> Self {
        let chrono_duration = chrono::Duration::from_std(duration).unwrap_or_default();
        Self(self.0 - chrono_duration)
    }

    /// Get duration since another timestamp, zero if `other` is later
    pub fn duration_since(&self, other: Self) -> Duration {
        let chrono_duration = self.0.signed_duration_since(other.0);
        chrono_duration.to_std().unwrap_or_default()
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.to_rfc3339())
    }
}

impl PartialOrd for Timestamp {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Timestamp {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.0.cmp(&other.0)
    }
}

// ============================================================================
// Error Classification
// ============================================================================

/// Classification of a handler or downstream failure.
///
/// The retry engine and the error aggregator only ever look at the kind,
/// never at the error message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Connection refused, reset, DNS failure
    Network,
    /// Downstream did not answer in time
    Timeout,
    /// Downstream answered with a 5xx status
    ServerError,
    /// Downstream answered with 429
    RateLimited,
    /// Concurrent modification or uniqueness conflict
    Conflict,
    /// Downstream rejected the request as malformed (4xx)
    Client,
    /// Payload failed local validation
    Validation,
    /// Domain rule rejected the operation
    BusinessLogic,
    /// Circuit breaker rejected the call without invoking it
    CircuitOpen,
    /// Bug or unexpected system state
    Internal,
}

impl ErrorKind {
    /// Get string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Network => "network",
            Self::Timeout => "timeout",
            Self::ServerError => "server_error",
            Self::RateLimited => "rate_limited",
            Self::Conflict => "conflict",
            Self::Client => "client",
            Self::Validation => "validation",
            Self::BusinessLogic => "business_logic",
            Self::CircuitOpen => "circuit_open",
            Self::Internal => "internal",
        }
    }

    /// Check if this kind of failure may succeed when attempted again
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Network
                | Self::Timeout
                | Self::ServerError
                | Self::RateLimited
                | Self::Conflict
                | Self::CircuitOpen
        )
    }

    /// Operational severity used by the error aggregator
    pub fn severity(&self) -> Severity {
        match self {
            Self::Client | Self::Validation | Self::BusinessLogic | Self::Conflict => Severity::Low,
            Self::Network | Self::Timeout | Self::RateLimited | Self::CircuitOpen => {
                Severity::Medium
            }
            Self::ServerError | Self::Internal => Severity::High,
        }
    }

    /// Classify a downstream HTTP status. Returns `None` for success statuses.
    pub fn from_http_status(status: u16) -> Option<Self> {
        match status {
            200..=399 => None,
            408 => Some(Self::Timeout),
            409 => Some(Self::Conflict),
            429 => Some(Self::RateLimited),
            400..=499 => Some(Self::Client),
            _ => Some(Self::ServerError),
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Severity of a recorded error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
}

impl Severity {
    /// Get string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        }
    }
}

/// Errors that can report their classification.
pub trait Classify {
    /// The kind of failure this error represents
    fn kind(&self) -> ErrorKind;
}

// ============================================================================
// Error Types
// ============================================================================

/// Error type for input validation failures
#[derive(Debug, Clone, thiserror::Error, Serialize, Deserialize)]
pub enum ValidationError {
    #[error("Field '{field}' is required")]
    Required { field: String },

    #[error("Field '{field}' has invalid format: {message}")]
    InvalidFormat { field: String, message: String },

    #[error("Field '{field}' exceeds maximum length of {max_length}")]
    TooLong { field: String, max_length: usize },
}

/// Error type for string parsing failures
#[derive(Debug, Clone, thiserror::Error)]
pub enum ParseError {
    #[error("Invalid format: expected {expected}, got '{actual}'")]
    InvalidFormat { expected: String, actual: String },
}

// ============================================================================
// Module declarations
// ============================================================================

/// Circuit breaker protecting downstream dependencies
pub mod circuit_breaker;

/// Routing of verified events to handlers
pub mod dispatcher;

/// Event type and identifier extraction per provider
pub mod envelope;

/// Durable record of received events
pub mod ledger;

/// Metrics collection traits
pub mod monitoring;

/// Error aggregation for health reporting
pub mod observability;

/// Fixed-window request limiting
pub mod rate_limiter;

/// Retry with exponential backoff
pub mod retry;

/// Webhook signature verification
pub mod signature;

pub use circuit_breaker::{
    CircuitBreaker, CircuitBreakerConfig, CircuitBreakerError, CircuitBreakerRegistry,
    CircuitMetrics, CircuitState,
};
pub use dispatcher::{
    DispatchOutcome, EventDispatcher, EventHandler, HandlerError, HandlerRegistry, SweepReport,
};
pub use envelope::{extract_event_identity, parse_event, EventIdentity, ParsedEvent};
pub use ledger::{
    EventLedger, FilesystemEventLedger, InMemoryEventLedger, LedgerError, LedgerStats,
    RecordOutcome, WebhookEvent,
};
pub use monitoring::{MetricsCollector, NoOpMetricsCollector};
pub use observability::{ErrorAggregator, ErrorSample, ErrorSummary, LatencyStats};
pub use rate_limiter::RateLimiter;
pub use retry::{retry_with_backoff, RetryConfig, RetryExhausted, RetryPreset};
pub use signature::{verify, SignatureFailure, VerificationResult, VerifyOptions, WebhookSecret};

#[cfg(test)]
#[path = "lib_tests.rs"]
mod tests;
