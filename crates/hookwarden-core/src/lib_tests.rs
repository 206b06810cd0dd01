//! Tests for the hookwarden-core library module.

use super::*;

#[test]
fn test_event_id_generation() {
    let id1 = EventId::new();
    let id2 = EventId::new();

    assert_ne!(id1, id2);
    assert!(!id1.to_string().is_empty());
}

#[test]
fn test_event_id_round_trips_through_string() {
    let id = EventId::new();
    let parsed: EventId = id.to_string().parse().unwrap();
    assert_eq!(parsed, id);

    assert!("not-a-ulid".parse::<EventId>().is_err());
}

#[test]
fn test_webhook_source_parsing() {
    assert_eq!(
        "identity".parse::<WebhookSource>().unwrap(),
        WebhookSource::Identity
    );
    assert_eq!(
        "BILLING".parse::<WebhookSource>().unwrap(),
        WebhookSource::Billing
    );
    assert_eq!(
        "social".parse::<WebhookSource>().unwrap(),
        WebhookSource::Social
    );
    assert!("github".parse::<WebhookSource>().is_err());
}

#[test]
fn test_webhook_source_signature_headers() {
    assert_eq!(WebhookSource::Identity.signature_header(), "clerk-signature");
    assert_eq!(WebhookSource::Billing.signature_header(), "stripe-signature");
    assert_eq!(
        WebhookSource::Social.signature_header(),
        "x-ayrshare-signature"
    );
}

#[test]
fn test_webhook_source_serializes_lowercase() {
    let json = serde_json::to_string(&WebhookSource::Billing).unwrap();
    assert_eq!(json, "\"billing\"");
}

#[test]
fn test_timestamp_unix_round_trip() {
    let ts = Timestamp::from_unix_seconds(1_700_000_000).unwrap();
    assert_eq!(ts.unix_seconds(), 1_700_000_000);
    assert_eq!(
        ts.add_seconds(60).duration_since(ts),
        Duration::from_secs(60)
    );
    // Earlier minus later saturates to zero
    assert_eq!(ts.duration_since(ts.add_seconds(5)), Duration::ZERO);
}

#[test]
fn test_error_kind_transience() {
    assert!(ErrorKind::Network.is_transient());
    assert!(ErrorKind::ServerError.is_transient());
    assert!(ErrorKind::RateLimited.is_transient());
    assert!(!ErrorKind::Client.is_transient());
    assert!(!ErrorKind::Validation.is_transient());
    assert!(!ErrorKind::BusinessLogic.is_transient());
    assert!(!ErrorKind::Internal.is_transient());
}

#[test]
fn test_error_kind_severity() {
    assert_eq!(ErrorKind::Client.severity(), Severity::Low);
    assert_eq!(ErrorKind::RateLimited.severity(), Severity::Medium);
    assert_eq!(ErrorKind::ServerError.severity(), Severity::High);
    assert_eq!(ErrorKind::Internal.severity(), Severity::High);
}

#[test]
fn test_error_kind_from_http_status() {
    assert_eq!(ErrorKind::from_http_status(200), None);
    assert_eq!(ErrorKind::from_http_status(204), None);
    assert_eq!(ErrorKind::from_http_status(408), Some(ErrorKind::Timeout));
    assert_eq!(ErrorKind::from_http_status(409), Some(ErrorKind::Conflict));
    assert_eq!(ErrorKind::from_http_status(429), Some(ErrorKind::RateLimited));
    assert_eq!(ErrorKind::from_http_status(404), Some(ErrorKind::Client));
    assert_eq!(ErrorKind::from_http_status(503), Some(ErrorKind::ServerError));
}
