//! Tests for the webhook endpoint's rejection order and response shape.

use super::*;
use async_trait::async_trait;
use axum::{body::Body, http::Request};
use hookwarden_core::{
    signature::sign, EventHandler, HandlerError, HandlerRegistry, InMemoryEventLedger,
    RetryConfig, WebhookEvent,
};
use std::sync::atomic::{AtomicU32, Ordering};
use tower::ServiceExt;

// ============================================================================
// Fixtures
// ============================================================================

const IDENTITY_SECRET: &str = "identity-test-secret";
const BILLING_SECRET: &str = "billing-test-secret";
const SOCIAL_SECRET: &str = "social-test-secret";

/// Handler that counts invocations and optionally fails every time.
#[derive(Default)]
struct RecordingHandler {
    calls: AtomicU32,
    failure: Option<HandlerError>,
}

impl RecordingHandler {
    fn failing(error: HandlerError) -> Self {
        Self {
            calls: AtomicU32::new(0),
            failure: Some(error),
        }
    }

    fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl EventHandler for RecordingHandler {
    async fn handle(&self, _event: &WebhookEvent) -> Result<(), HandlerError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match &self.failure {
            Some(error) => Err(error.clone()),
            None => Ok(()),
        }
    }
}

fn test_config() -> ServiceConfig {
    let mut config = ServiceConfig::default();
    config.providers.identity = ProviderConfig::with_secret(IDENTITY_SECRET);
    config.providers.billing = ProviderConfig::with_secret(BILLING_SECRET);
    config.providers.social = ProviderConfig::with_secret(SOCIAL_SECRET);
    config
}

fn secret_for(source: WebhookSource) -> WebhookSecret {
    WebhookSecret::new(match source {
        WebhookSource::Identity => IDENTITY_SECRET,
        WebhookSource::Billing => BILLING_SECRET,
        WebhookSource::Social => SOCIAL_SECRET,
    })
}

fn test_app(config: ServiceConfig, handler: Arc<RecordingHandler>) -> (Router, AppState) {
    let metrics = ServiceMetrics::new().unwrap();
    let mut handlers = HandlerRegistry::new();
    for source in WebhookSource::ALL {
        handlers.register_wildcard(source, handler.clone());
    }
    let dispatcher = EventDispatcher::new(Arc::new(InMemoryEventLedger::new()), handlers)
        .with_retry_config(RetryConfig::default().with_base_delay(Duration::ZERO))
        .with_metrics(metrics.clone());

    let state = AppState::new(config, Arc::new(dispatcher), metrics);
    (create_router(state.clone()), state)
}

fn signed_request(source: WebhookSource, body: &str) -> Request<Body> {
    let signature = sign(
        source,
        body.as_bytes(),
        &secret_for(source),
        Timestamp::now(),
    );
    webhook_request(source, body, Some(&signature), "application/json")
}

fn webhook_request(
    source: WebhookSource,
    body: &str,
    signature: Option<&str>,
    content_type: &str,
) -> Request<Body> {
    let mut builder = Request::builder()
        .method("POST")
        .uri(format!("/webhooks/{}", source))
        .header(header::CONTENT_TYPE, content_type);
    if let Some(signature) = signature {
        builder = builder.header(source.signature_header(), signature);
    }
    builder.body(Body::from(body.to_string())).unwrap()
}

async fn body_text(response: Response) -> String {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    String::from_utf8(bytes.to_vec()).unwrap()
}

async fn ledger_total(state: &AppState) -> u64 {
    state.dispatcher.ledger().stats().await.unwrap().total
}

// ============================================================================
// Accepted deliveries
// ============================================================================

mod accepted_tests {
    use super::*;

    /// A correctly signed event is processed and answered with plain `OK`.
    #[tokio::test]
    async fn test_valid_webhook_returns_ok() {
        let handler = Arc::new(RecordingHandler::default());
        let (app, state) = test_app(test_config(), handler.clone());

        let body = r#"{"id":"evt_123","type":"customer.subscription.updated"}"#;
        let response = app
            .oneshot(signed_request(WebhookSource::Billing, body))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.headers().contains_key(CORRELATION_ID_HEADER));
        assert_eq!(body_text(response).await, "OK");
        assert_eq!(handler.calls(), 1);

        let event = state
            .dispatcher
            .ledger()
            .find(WebhookSource::Billing, "evt_123")
            .await
            .unwrap()
            .unwrap();
        assert!(event.processed);
    }

    /// Redelivery answers `OK` without running the handler again.
    #[tokio::test]
    async fn test_duplicate_delivery_is_acknowledged() {
        let handler = Arc::new(RecordingHandler::default());
        let (app, state) = test_app(test_config(), handler.clone());
        let body = r#"{"type":"user.created","data":{"id":"user_1"}}"#;

        for _ in 0..3 {
            let mut request = signed_request(WebhookSource::Identity, body);
            request
                .headers_mut()
                .insert("svix-id", "msg_1".parse().unwrap());
            let response = app.clone().oneshot(request).await.unwrap();
            assert_eq!(response.status(), StatusCode::OK);
        }

        assert_eq!(handler.calls(), 1);
        assert_eq!(ledger_total(&state).await, 1);
    }

    /// The previous secret keeps working during rotation.
    #[tokio::test]
    async fn test_previous_secret_accepted() {
        let mut config = test_config();
        config.providers.social.secret = Some(WebhookSecret::new("rotated-secret"));
        config.providers.social.previous_secret = Some(WebhookSecret::new(SOCIAL_SECRET));
        let (app, _state) = test_app(config, Arc::new(RecordingHandler::default()));

        let response = app
            .oneshot(signed_request(
                WebhookSource::Social,
                r#"{"action":"post.published","refId":7}"#,
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
    }

    /// The caller's correlation id is echoed back.
    #[tokio::test]
    async fn test_correlation_id_propagated() {
        let (app, _state) = test_app(test_config(), Arc::new(RecordingHandler::default()));

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/health")
                    .header(CORRELATION_ID_HEADER, "req-42")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(
            response.headers().get(CORRELATION_ID_HEADER).unwrap(),
            "req-42"
        );
    }
}

// ============================================================================
// Rejections
// ============================================================================

mod rejection_tests {
    use super::*;

    /// Unknown and disabled providers are not found.
    #[tokio::test]
    async fn test_unknown_or_disabled_provider() {
        let mut config = test_config();
        config.providers.social.enabled = false;
        let (app, _state) = test_app(config, Arc::new(RecordingHandler::default()));

        let unknown = Request::builder()
            .method("POST")
            .uri("/webhooks/github")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from("{}"))
            .unwrap();
        let response = app.clone().oneshot(unknown).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let response = app
            .oneshot(signed_request(WebhookSource::Social, r#"{"type":"x"}"#))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    /// Content type is checked before the signature.
    #[tokio::test]
    async fn test_non_json_rejected_first() {
        let (app, state) = test_app(test_config(), Arc::new(RecordingHandler::default()));

        let response = app
            .oneshot(webhook_request(
                WebhookSource::Billing,
                "id=evt_1",
                Some("garbage"),
                "application/x-www-form-urlencoded",
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::UNSUPPORTED_MEDIA_TYPE);
        assert_eq!(ledger_total(&state).await, 0);
    }

    /// Bodies over the provider cap are rejected before verification.
    #[tokio::test]
    async fn test_oversized_body_rejected() {
        let (app, state) = test_app(test_config(), Arc::new(RecordingHandler::default()));
        let body = format!(r#"{{"type":"post.published","pad":"{}"}}"#, "a".repeat(600 * 1024));

        let response = app
            .oneshot(webhook_request(
                WebhookSource::Social,
                &body,
                None,
                "application/json",
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
        assert_eq!(ledger_total(&state).await, 0);
    }

    /// The limiter answers 429 with `Retry-After` once the window is full.
    #[tokio::test]
    async fn test_rate_limit_precedes_signature_check() {
        let mut config = test_config();
        config.providers.billing.rate_limit.max_requests = 2;
        let (app, _state) = test_app(config, Arc::new(RecordingHandler::default()));

        let mut statuses = Vec::new();
        let mut last = None;
        for _ in 0..3 {
            let response = app
                .clone()
                .oneshot(webhook_request(
                    WebhookSource::Billing,
                    r#"{"id":"evt_1","type":"invoice.paid"}"#,
                    Some("t=1,v1=forged"),
                    "application/json",
                ))
                .await
                .unwrap();
            statuses.push(response.status());
            last = Some(response);
        }

        assert_eq!(
            statuses,
            vec![
                StatusCode::UNAUTHORIZED,
                StatusCode::UNAUTHORIZED,
                StatusCode::TOO_MANY_REQUESTS
            ]
        );
        let retry_after: u64 = last
            .unwrap()
            .headers()
            .get(header::RETRY_AFTER)
            .unwrap()
            .to_str()
            .unwrap()
            .parse()
            .unwrap();
        assert!((1..=60).contains(&retry_after));
    }

    /// Forged signatures get 401 with a generic body and nothing is recorded.
    #[tokio::test]
    async fn test_invalid_signature_rejected() {
        let handler = Arc::new(RecordingHandler::default());
        let (app, state) = test_app(test_config(), handler.clone());
        let body = r#"{"id":"evt_1","type":"invoice.paid"}"#;
        let forged = sign(
            WebhookSource::Billing,
            body.as_bytes(),
            &WebhookSecret::new("attacker-secret"),
            Timestamp::now(),
        );

        let response = app
            .oneshot(webhook_request(
                WebhookSource::Billing,
                body,
                Some(&forged),
                "application/json",
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(body_text(response).await, "Unauthorized");
        assert_eq!(handler.calls(), 0);
        assert_eq!(ledger_total(&state).await, 0);
    }

    /// Authenticated payloads without an event type are a bad request.
    #[tokio::test]
    async fn test_missing_event_type_rejected() {
        let (app, state) = test_app(test_config(), Arc::new(RecordingHandler::default()));

        let response = app
            .oneshot(signed_request(WebhookSource::Billing, r#"{"id":"evt_1"}"#))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(ledger_total(&state).await, 0);
    }

    /// Exhausted handler failures answer 500 and leave a failed record.
    #[tokio::test]
    async fn test_handler_failure_returns_500() {
        let handler = Arc::new(RecordingHandler::failing(HandlerError::validation(
            "customer unknown",
        )));
        let (app, state) = test_app(test_config(), handler.clone());

        let response = app
            .oneshot(signed_request(
                WebhookSource::Billing,
                r#"{"id":"evt_9","type":"invoice.paid"}"#,
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body = body_text(response).await;
        assert_eq!(body, "Internal Server Error");
        assert!(!body.contains("customer unknown"));

        let failed = state
            .dispatcher
            .ledger()
            .list_failed(None, 10)
            .await
            .unwrap();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].external_event_id, "evt_9");
    }
}

// ============================================================================
// Helpers
// ============================================================================

mod helper_tests {
    use super::*;

    /// JSON media types are recognised with or without parameters.
    #[test]
    fn test_is_json_content_type() {
        assert!(is_json_content_type("application/json"));
        assert!(is_json_content_type("Application/JSON; charset=utf-8"));
        assert!(!is_json_content_type("text/plain"));
        assert!(!is_json_content_type(""));
    }

    /// Rate-limit keys use at most 16 signature characters.
    #[test]
    fn test_rate_limit_key() {
        assert_eq!(
            rate_limit_key(WebhookSource::Social, Some("sha256=0123456789abcdef")),
            "social:sha256=012345678"
        );
        assert_eq!(rate_limit_key(WebhookSource::Billing, None), "billing:");
    }

    /// Partial seconds round up.
    #[test]
    fn test_ceil_seconds() {
        assert_eq!(ceil_seconds(Duration::from_millis(1)), 1);
        assert_eq!(ceil_seconds(Duration::from_secs(2)), 2);
        assert_eq!(ceil_seconds(Duration::from_millis(2500)), 3);
    }
}
