//! Prometheus metrics for the HTTP service.
//!
//! All metrics live in a dedicated [`Registry`] owned by [`ServiceMetrics`],
//! so several instances (one per test router) can coexist.

use hookwarden_core::{CircuitState, ErrorKind, MetricsCollector, WebhookSource};
use prometheus::{
    HistogramOpts, HistogramVec, IntCounterVec, IntGaugeVec, Opts, Registry, TextEncoder,
};
use std::sync::Arc;
use std::time::Duration;

const NAMESPACE: &str = "hookwarden";

/// Service metrics for observability
#[derive(Debug)]
pub struct ServiceMetrics {
    registry: Registry,

    // HTTP request metrics
    pub http_requests_total: IntCounterVec,
    pub http_request_duration: HistogramVec,

    // Webhook ingestion metrics
    pub webhook_requests_total: IntCounterVec,
    pub webhook_duration_seconds: HistogramVec,
    pub signature_failures_total: IntCounterVec,
    pub rate_limited_total: IntCounterVec,
    pub duplicate_deliveries_total: IntCounterVec,

    // Dispatch metrics
    pub handler_attempts_total: IntCounterVec,
    pub retry_attempts_total: IntCounterVec,
    pub dispatch_failures_total: IntCounterVec,
    pub dispatch_duration_seconds: HistogramVec,
    pub circuit_breaker_state: IntGaugeVec,
}

impl ServiceMetrics {
    pub fn new() -> Result<Arc<Self>, prometheus::Error> {
        let registry = Registry::new_custom(Some(NAMESPACE.to_string()), None)?;

        let counter = |name: &str, help: &str, labels: &[&str]| {
            let metric = IntCounterVec::new(Opts::new(name, help), labels)?;
            registry.register(Box::new(metric.clone()))?;
            Ok::<_, prometheus::Error>(metric)
        };
        let histogram = |name: &str, help: &str, labels: &[&str], buckets: Vec<f64>| {
            let metric = HistogramVec::new(HistogramOpts::new(name, help).buckets(buckets), labels)?;
            registry.register(Box::new(metric.clone()))?;
            Ok::<_, prometheus::Error>(metric)
        };

        let http_requests_total = counter(
            "http_requests_total",
            "Total number of HTTP requests",
            &["method", "path", "status"],
        )?;
        let http_request_duration = histogram(
            "http_request_duration_seconds",
            "HTTP request processing time",
            &["method", "path"],
            vec![0.001, 0.01, 0.1, 1.0, 10.0],
        )?;

        let webhook_requests_total = counter(
            "webhook_requests_total",
            "Webhook requests by provider and response status",
            &["source", "status"],
        )?;
        let webhook_duration_seconds = histogram(
            "webhook_duration_seconds",
            "Webhook request processing time",
            &["source"],
            vec![0.001, 0.01, 0.1, 0.5, 1.0, 2.0, 5.0, 30.0],
        )?;
        let signature_failures_total = counter(
            "signature_failures_total",
            "Rejected webhook signatures",
            &["source", "reason"],
        )?;
        let rate_limited_total = counter(
            "rate_limited_total",
            "Webhook requests rejected by the rate limiter",
            &["source"],
        )?;
        let duplicate_deliveries_total = counter(
            "duplicate_deliveries_total",
            "Deliveries of already recorded events",
            &["source"],
        )?;

        let handler_attempts_total = counter(
            "handler_attempts_total",
            "Handler invocations by outcome",
            &["source", "event_type", "outcome"],
        )?;
        let retry_attempts_total = counter(
            "retry_attempts_total",
            "Handler attempts after the first",
            &["source"],
        )?;
        let dispatch_failures_total = counter(
            "dispatch_failures_total",
            "Events that failed after exhausting retries",
            &["source", "kind"],
        )?;
        let dispatch_duration_seconds = histogram(
            "dispatch_duration_seconds",
            "Time from first handler attempt to final outcome",
            &["source"],
            vec![0.001, 0.01, 0.1, 0.5, 1.0, 5.0, 15.0, 60.0],
        )?;

        let circuit_breaker_state = IntGaugeVec::new(
            Opts::new(
                "circuit_breaker_state",
                "Breaker state per dependency (0 closed, 1 open, 2 half-open)",
            ),
            &["dependency"],
        )?;
        registry.register(Box::new(circuit_breaker_state.clone()))?;

        #[cfg(target_os = "linux")]
        registry.register(Box::new(
            prometheus::process_collector::ProcessCollector::for_self(),
        ))?;

        Ok(Arc::new(Self {
            registry,
            http_requests_total,
            http_request_duration,
            webhook_requests_total,
            webhook_duration_seconds,
            signature_failures_total,
            rate_limited_total,
            duplicate_deliveries_total,
            handler_attempts_total,
            retry_attempts_total,
            dispatch_failures_total,
            dispatch_duration_seconds,
            circuit_breaker_state,
        }))
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Render every metric in the Prometheus text format.
    pub fn encode(&self) -> Result<String, prometheus::Error> {
        TextEncoder::new().encode_to_string(&self.registry.gather())
    }

    pub fn record_http_request(&self, method: &str, path: &str, status: u16, duration: Duration) {
        let status = status.to_string();
        self.http_requests_total
            .with_label_values(&[method, path, status.as_str()])
            .inc();
        self.http_request_duration
            .with_label_values(&[method, path])
            .observe(duration.as_secs_f64());
    }
}

impl MetricsCollector for ServiceMetrics {
    fn record_webhook_request(&self, source: WebhookSource, status: u16, duration: Duration) {
        let status = status.to_string();
        self.webhook_requests_total
            .with_label_values(&[source.as_str(), status.as_str()])
            .inc();
        self.webhook_duration_seconds
            .with_label_values(&[source.as_str()])
            .observe(duration.as_secs_f64());
    }

    fn record_signature_failure(&self, source: WebhookSource, reason: &str) {
        self.signature_failures_total
            .with_label_values(&[source.as_str(), reason])
            .inc();
    }

    fn record_rate_limited(&self, source: WebhookSource) {
        self.rate_limited_total
            .with_label_values(&[source.as_str()])
            .inc();
    }

    fn record_duplicate(&self, source: WebhookSource) {
        self.duplicate_deliveries_total
            .with_label_values(&[source.as_str()])
            .inc();
    }

    fn record_handler_attempt(&self, source: WebhookSource, event_type: &str, success: bool) {
        let outcome = if success { "success" } else { "failure" };
        self.handler_attempts_total
            .with_label_values(&[source.as_str(), event_type, outcome])
            .inc();
    }

    fn record_retry_attempt(&self, source: WebhookSource) {
        self.retry_attempts_total
            .with_label_values(&[source.as_str()])
            .inc();
    }

    fn record_dispatch_failure(&self, source: WebhookSource, kind: ErrorKind) {
        self.dispatch_failures_total
            .with_label_values(&[source.as_str(), kind.as_str()])
            .inc();
    }

    fn record_circuit_state(&self, dependency: &str, state: CircuitState) {
        self.circuit_breaker_state
            .with_label_values(&[dependency])
            .set(state.as_gauge_value());
    }

    fn record_dispatch_latency(&self, source: WebhookSource, duration: Duration) {
        self.dispatch_duration_seconds
            .with_label_values(&[source.as_str()])
            .observe(duration.as_secs_f64());
    }
}

#[cfg(test)]
#[path = "metrics_tests.rs"]
mod tests;
