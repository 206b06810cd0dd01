//! Metrics collection and monitoring.
//!
//! Core components report what happened through [`MetricsCollector`]; the
//! HTTP layer implements it with Prometheus. Recording is best-effort and
//! never fails a business operation.
//!
//! # Examples
//!
//! ```rust
//! use hookwarden_core::monitoring::{MetricsCollector, NoOpMetricsCollector};
//! use hookwarden_core::WebhookSource;
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! let metrics: Arc<dyn MetricsCollector> = Arc::new(NoOpMetricsCollector);
//!
//! metrics.record_webhook_request(WebhookSource::Billing, 200, Duration::from_millis(12));
//! metrics.record_duplicate(WebhookSource::Billing);
//! ```

use std::time::Duration;

use crate::circuit_breaker::CircuitState;
use crate::{ErrorKind, WebhookSource};

/// Metrics collector for webhook ingestion and dispatch.
///
/// All methods take `&self` so one collector can be shared as
/// `Arc<dyn MetricsCollector>` across request tasks.
pub trait MetricsCollector: Send + Sync {
    /// Record a completed inbound webhook request and its HTTP status.
    fn record_webhook_request(&self, source: WebhookSource, status: u16, duration: Duration);

    /// Record a request rejected by signature verification.
    fn record_signature_failure(&self, source: WebhookSource, reason: &str);

    /// Record a request rejected by the rate limiter.
    fn record_rate_limited(&self, source: WebhookSource);

    /// Record a delivery that resolved to an existing ledger record.
    fn record_duplicate(&self, source: WebhookSource);

    /// Record a single handler invocation.
    fn record_handler_attempt(&self, source: WebhookSource, event_type: &str, success: bool);

    /// Record a retry scheduled after a transient failure.
    fn record_retry_attempt(&self, source: WebhookSource);

    /// Record an event that ended in the failed state.
    fn record_dispatch_failure(&self, source: WebhookSource, kind: ErrorKind);

    /// Record a circuit breaker state change.
    fn record_circuit_state(&self, dependency: &str, state: CircuitState);

    /// Record end-to-end dispatch time for one event.
    fn record_dispatch_latency(&self, source: WebhookSource, duration: Duration);
}

/// Collector that discards every observation.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOpMetricsCollector;

impl MetricsCollector for NoOpMetricsCollector {
    fn record_webhook_request(&self, _source: WebhookSource, _status: u16, _duration: Duration) {}

    fn record_signature_failure(&self, _source: WebhookSource, _reason: &str) {}

    fn record_rate_limited(&self, _source: WebhookSource) {}

    fn record_duplicate(&self, _source: WebhookSource) {}

    fn record_handler_attempt(&self, _source: WebhookSource, _event_type: &str, _success: bool) {}

    fn record_retry_attempt(&self, _source: WebhookSource) {}

    fn record_dispatch_failure(&self, _source: WebhookSource, _kind: ErrorKind) {}

    fn record_circuit_state(&self, _dependency: &str, _state: CircuitState) {}

    fn record_dispatch_latency(&self, _source: WebhookSource, _duration: Duration) {}
}

#[cfg(test)]
#[path = "monitoring_tests.rs"]
mod tests;
