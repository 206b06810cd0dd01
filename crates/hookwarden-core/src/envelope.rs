//! Event type and identifier extraction per provider.
//!
//! Each provider places the event type and its own event identifier in a
//! different spot:
//!
//! | Provider | Event type          | External id                          |
//! |----------|---------------------|--------------------------------------|
//! | identity | `type`              | `svix-id` header, else body `id`     |
//! | billing  | `type`              | body `id`                            |
//! | social   | `type`, else `action` | body `id`, else body `refId`       |
//!
//! When no identifier is present the SHA-256 of the raw body stands in for
//! it, so byte-identical redeliveries still deduplicate.

use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::HashMap;

use crate::{ValidationError, WebhookSource};

/// Longest accepted event type, in bytes.
pub const MAX_EVENT_TYPE_LEN: usize = 256;

/// Longest accepted external identifier, in bytes.
pub const MAX_EXTERNAL_ID_LEN: usize = 512;

/// Header carrying the identity provider's message id.
pub const IDENTITY_MESSAGE_ID_HEADER: &str = "svix-id";

/// What the ledger needs to know about an inbound notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventIdentity {
    pub event_type: String,
    pub external_event_id: String,
}

/// A decoded webhook body with its identity.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedEvent {
    pub identity: EventIdentity,
    pub payload: Value,
}

/// Decode `body` as JSON and extract its identity.
///
/// `headers` maps lowercase header names to values.
///
/// # Errors
///
/// [`ValidationError`] when the body is not a JSON object or carries no
/// usable event type.
pub fn parse_event(
    source: WebhookSource,
    headers: &HashMap<String, String>,
    body: &[u8],
) -> Result<ParsedEvent, ValidationError> {
    let payload: Value =
        serde_json::from_slice(body).map_err(|e| ValidationError::InvalidFormat {
            field: "body".to_string(),
            message: e.to_string(),
        })?;

    if !payload.is_object() {
        return Err(ValidationError::InvalidFormat {
            field: "body".to_string(),
            message: "expected a JSON object".to_string(),
        });
    }

    let identity = extract_event_identity(source, headers, &payload, body)?;
    Ok(ParsedEvent { identity, payload })
}

/// Determine event type and external id for an already decoded payload.
///
/// # Examples
///
/// ```rust
/// use hookwarden_core::{extract_event_identity, WebhookSource};
/// use std::collections::HashMap;
///
/// let body = br#"{"id":"evt_123","type":"customer.subscription.updated"}"#;
/// let payload = serde_json::from_slice(body).unwrap();
/// let identity =
///     extract_event_identity(WebhookSource::Billing, &HashMap::new(), &payload, body).unwrap();
/// assert_eq!(identity.external_event_id, "evt_123");
/// ```
pub fn extract_event_identity(
    source: WebhookSource,
    headers: &HashMap<String, String>,
    payload: &Value,
    body: &[u8],
) -> Result<EventIdentity, ValidationError> {
    let event_type = match source {
        WebhookSource::Identity | WebhookSource::Billing => string_field(payload, "type"),
        WebhookSource::Social => {
            string_field(payload, "type").or_else(|| string_field(payload, "action"))
        }
    }
    .ok_or_else(|| ValidationError::Required {
        field: "type".to_string(),
    })?;

    if event_type.len() > MAX_EVENT_TYPE_LEN {
        return Err(ValidationError::TooLong {
            field: "type".to_string(),
            max_length: MAX_EVENT_TYPE_LEN,
        });
    }

    let external_event_id = match source {
        WebhookSource::Identity => headers
            .get(IDENTITY_MESSAGE_ID_HEADER)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
            .or_else(|| id_field(payload, "id")),
        WebhookSource::Billing => id_field(payload, "id"),
        WebhookSource::Social => id_field(payload, "id").or_else(|| id_field(payload, "refId")),
    }
    .unwrap_or_else(|| body_digest_id(body));

    if external_event_id.len() > MAX_EXTERNAL_ID_LEN {
        return Err(ValidationError::TooLong {
            field: "id".to_string(),
            max_length: MAX_EXTERNAL_ID_LEN,
        });
    }

    Ok(EventIdentity {
        event_type,
        external_event_id,
    })
}

/// Stand-in identifier derived from the raw body.
pub fn body_digest_id(body: &[u8]) -> String {
    format!("sha256:{}", hex::encode(Sha256::digest(body)))
}

fn string_field(payload: &Value, name: &str) -> Option<String> {
    payload
        .get(name)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

/// Identifiers may arrive as strings or numbers.
fn id_field(payload: &Value, name: &str) -> Option<String> {
    match payload.get(name)? {
        Value::Number(n) => Some(n.to_string()),
        _ => string_field(payload, name),
    }
}

#[cfg(test)]
#[path = "envelope_tests.rs"]
mod tests;
