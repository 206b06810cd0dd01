//! Common test utilities for integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use axum::{
    body::Body,
    http::{header, Request, Response},
    Router,
};
use hookwarden_api::{create_router, AppState, ProviderConfig, ServiceConfig, ServiceMetrics};
use hookwarden_core::{
    signature::sign, CircuitBreakerRegistry, ErrorKind, EventDispatcher, EventHandler,
    EventLedger, HandlerError, HandlerRegistry, RetryConfig, Timestamp, WebhookEvent,
    WebhookSecret, WebhookSource,
};
use std::collections::VecDeque;
use std::sync::{
    atomic::{AtomicU32, Ordering},
    Arc, Mutex,
};
use std::time::Duration;

pub const IDENTITY_SECRET: &str = "integration-identity-secret";
pub const BILLING_SECRET: &str = "integration-billing-secret";
pub const SOCIAL_SECRET: &str = "integration-social-secret";

/// Handler that replays a script of failures, then succeeds.
#[derive(Debug, Default)]
pub struct ScriptedHandler {
    failures: Mutex<VecDeque<HandlerError>>,
    always_fail: Option<HandlerError>,
    dependency: Option<String>,
    calls: AtomicU32,
}

impl ScriptedHandler {
    /// Succeeds on every call.
    pub fn succeeding() -> Self {
        Self::default()
    }

    /// Fails once per entry in `failures`, then succeeds.
    pub fn failing_times(failures: impl IntoIterator<Item = HandlerError>) -> Self {
        Self {
            failures: Mutex::new(failures.into_iter().collect()),
            ..Self::default()
        }
    }

    /// Fails every call with `error`.
    pub fn always_failing(error: HandlerError) -> Self {
        Self {
            always_fail: Some(error),
            ..Self::default()
        }
    }

    /// Route calls through the circuit breaker named `name`.
    pub fn with_dependency(mut self, name: &str) -> Self {
        self.dependency = Some(name.to_string());
        self
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl EventHandler for ScriptedHandler {
    async fn handle(&self, _event: &WebhookEvent) -> Result<(), HandlerError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(error) = &self.always_fail {
            return Err(error.clone());
        }
        match self.failures.lock().unwrap().pop_front() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    fn dependency(&self) -> Option<String> {
        self.dependency.clone()
    }
}

/// A 503 from the downstream.
pub fn server_error() -> HandlerError {
    HandlerError::new(ErrorKind::ServerError, "downstream responded 503")
}

/// Service configuration with a secret for every provider.
pub fn test_config() -> ServiceConfig {
    let mut config = ServiceConfig::default();
    config.providers.identity = ProviderConfig::with_secret(IDENTITY_SECRET);
    config.providers.billing = ProviderConfig::with_secret(BILLING_SECRET);
    config.providers.social = ProviderConfig::with_secret(SOCIAL_SECRET);
    config
}

/// Build the router around `ledger` with `handler` registered for every
/// event of every provider. Retries run without delay.
pub fn build_app(
    config: ServiceConfig,
    ledger: Arc<dyn EventLedger>,
    handler: Arc<ScriptedHandler>,
) -> (Router, AppState) {
    let metrics = ServiceMetrics::new().unwrap();

    let mut handlers = HandlerRegistry::new();
    for source in WebhookSource::ALL {
        handlers.register_wildcard(source, handler.clone());
    }

    let breakers = Arc::new(CircuitBreakerRegistry::with_metrics(
        config.circuit_breaker.to_config(),
        metrics.clone(),
    ));
    let dispatcher = EventDispatcher::new(ledger, handlers)
        .with_retry_config(RetryConfig::default().with_base_delay(Duration::ZERO))
        .with_breakers(breakers)
        .with_metrics(metrics.clone());

    let state = AppState::new(config, Arc::new(dispatcher), metrics);
    (create_router(state.clone()), state)
}

fn secret_for(source: WebhookSource) -> WebhookSecret {
    WebhookSecret::new(match source {
        WebhookSource::Identity => IDENTITY_SECRET,
        WebhookSource::Billing => BILLING_SECRET,
        WebhookSource::Social => SOCIAL_SECRET,
    })
}

/// A correctly signed webhook delivery for `source`.
pub fn signed_webhook(source: WebhookSource, body: &serde_json::Value) -> Request<Body> {
    let body = body.to_string();
    let signature = sign(
        source,
        body.as_bytes(),
        &secret_for(source),
        Timestamp::now(),
    );

    Request::builder()
        .method("POST")
        .uri(format!("/webhooks/{}", source))
        .header(header::CONTENT_TYPE, "application/json")
        .header(source.signature_header(), signature)
        .body(Body::from(body))
        .unwrap()
}

pub fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

pub fn post(uri: &str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .body(Body::empty())
        .unwrap()
}

pub async fn body_text(response: Response<Body>) -> String {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    String::from_utf8(bytes.to_vec()).unwrap()
}

pub async fn body_json(response: Response<Body>) -> serde_json::Value {
    serde_json::from_str(&body_text(response).await).unwrap()
}
