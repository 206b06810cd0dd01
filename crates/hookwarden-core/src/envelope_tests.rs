//! Tests for per-provider identity extraction.

use super::*;

fn no_headers() -> HashMap<String, String> {
    HashMap::new()
}

mod provider_tests {
    use super::*;

    /// Billing events use the body id and type.
    #[test]
    fn test_billing_identity() {
        let body = br#"{"id":"evt_123","type":"customer.subscription.updated","data":{}}"#;

        let parsed = parse_event(WebhookSource::Billing, &no_headers(), body).unwrap();

        assert_eq!(parsed.identity.event_type, "customer.subscription.updated");
        assert_eq!(parsed.identity.external_event_id, "evt_123");
        assert_eq!(parsed.payload["data"], serde_json::json!({}));
    }

    /// The identity provider's message header wins over the body id.
    #[test]
    fn test_identity_prefers_message_header() {
        let body = br#"{"type":"user.created","data":{"id":"user_1"}}"#;
        let mut headers = no_headers();
        headers.insert("svix-id".to_string(), "msg_abc".to_string());

        let parsed = parse_event(WebhookSource::Identity, &headers, body).unwrap();
        assert_eq!(parsed.identity.external_event_id, "msg_abc");

        let body = br#"{"id":"body_id","type":"user.created"}"#;
        let parsed = parse_event(WebhookSource::Identity, &no_headers(), body).unwrap();
        assert_eq!(parsed.identity.external_event_id, "body_id");
    }

    /// Social events fall back to `action` and `refId`.
    #[test]
    fn test_social_fallbacks() {
        let body = br#"{"action":"post.published","refId":42}"#;

        let parsed = parse_event(WebhookSource::Social, &no_headers(), body).unwrap();

        assert_eq!(parsed.identity.event_type, "post.published");
        assert_eq!(parsed.identity.external_event_id, "42");
    }

    /// Without any id the body digest is used and is stable.
    #[test]
    fn test_digest_fallback_is_deterministic() {
        let body = br#"{"type":"post.failed"}"#;

        let first = parse_event(WebhookSource::Social, &no_headers(), body).unwrap();
        let second = parse_event(WebhookSource::Social, &no_headers(), body).unwrap();

        assert!(first.identity.external_event_id.starts_with("sha256:"));
        assert_eq!(first.identity.external_event_id.len(), "sha256:".len() + 64);
        assert_eq!(first.identity, second.identity);
    }
}

mod rejection_tests {
    use super::*;

    /// A missing event type is a validation error.
    #[test]
    fn test_missing_type() {
        let body = br#"{"id":"evt_1"}"#;
        let err = parse_event(WebhookSource::Billing, &no_headers(), body).unwrap_err();
        assert!(matches!(err, ValidationError::Required { ref field } if field == "type"));
    }

    /// Blank event types are treated as missing.
    #[test]
    fn test_blank_type() {
        let body = br#"{"id":"evt_1","type":"   "}"#;
        assert!(parse_event(WebhookSource::Billing, &no_headers(), body).is_err());
    }

    /// Non-JSON and non-object bodies are rejected.
    #[test]
    fn test_invalid_bodies() {
        for body in [&b"not json"[..], &b"[1,2,3]"[..], &b"\"text\""[..]] {
            let err = parse_event(WebhookSource::Identity, &no_headers(), body).unwrap_err();
            assert!(matches!(err, ValidationError::InvalidFormat { .. }));
        }
    }

    /// Oversized event types are rejected.
    #[test]
    fn test_type_too_long() {
        let body = serde_json::to_vec(&serde_json::json!({
            "id": "evt_1",
            "type": "x".repeat(MAX_EVENT_TYPE_LEN + 1),
        }))
        .unwrap();

        let err = parse_event(WebhookSource::Billing, &no_headers(), &body).unwrap_err();
        assert!(matches!(err, ValidationError::TooLong { .. }));
    }
}
