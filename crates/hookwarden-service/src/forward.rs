//! # Forwarding Handlers
//!
//! Event handlers that POST recorded events to downstream HTTP services.
//!
//! Each [`ForwardingRule`] becomes one [`HttpForwardHandler`]. The rule's
//! dependency name keys its circuit breaker, so a failing downstream only
//! short-circuits the rules that point at it.
//!
//! Responses are classified for the retry engine:
//!
//! | Downstream result | Outcome |
//! |-------------------|---------|
//! | 2xx, 409 | success (409 means the downstream already has the event) |
//! | connect / transport error | `network` |
//! | client timeout, 408 | `timeout` |
//! | 429 | `rate_limited` |
//! | other 4xx | `client` |
//! | 5xx | `server_error` |

use async_trait::async_trait;
use hookwarden_api::ForwardingRule;
use hookwarden_core::{ErrorKind, EventHandler, HandlerError, HandlerRegistry, WebhookEvent};
use reqwest::StatusCode;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, instrument};
use url::Url;

pub const SOURCE_HEADER: &str = "x-hookwarden-source";
pub const EVENT_TYPE_HEADER: &str = "x-hookwarden-event-type";
pub const EVENT_ID_HEADER: &str = "x-hookwarden-event-id";
pub const IDEMPOTENCY_KEY_HEADER: &str = "idempotency-key";

const USER_AGENT: &str = concat!("hookwarden/", env!("CARGO_PKG_VERSION"));

/// Errors building forwarding handlers
#[derive(Debug, thiserror::Error)]
pub enum ForwardError {
    #[error("Failed to create HTTP client for {url}: {message}")]
    Client { url: String, message: String },
}

/// POSTs an event's payload to one downstream URL.
#[derive(Debug, Clone)]
pub struct HttpForwardHandler {
    client: reqwest::Client,
    url: Url,
    dependency: String,
}

impl HttpForwardHandler {
    pub fn new(
        url: Url,
        dependency: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, ForwardError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| ForwardError::Client {
                url: url.to_string(),
                message: e.to_string(),
            })?;

        Ok(Self {
            client,
            url,
            dependency: dependency.into(),
        })
    }

    pub fn from_rule(rule: &ForwardingRule) -> Result<Self, ForwardError> {
        Self::new(
            rule.url.clone(),
            rule.dependency_name(),
            Duration::from_secs(rule.timeout_seconds),
        )
    }
}

#[async_trait]
impl EventHandler for HttpForwardHandler {
    #[instrument(skip_all, fields(
        dependency = %self.dependency,
        event_id = %event.id,
        event_type = %event.event_type,
    ))]
    async fn handle(&self, event: &WebhookEvent) -> Result<(), HandlerError> {
        let event_id = event.id.to_string();

        let response = self
            .client
            .post(self.url.clone())
            .header(SOURCE_HEADER, event.source.as_str())
            .header(EVENT_TYPE_HEADER, event.event_type.as_str())
            .header(EVENT_ID_HEADER, event_id.as_str())
            .header(IDEMPOTENCY_KEY_HEADER, event_id.as_str())
            .json(&event.payload)
            .send()
            .await
            .map_err(classify_transport_error)?;

        let status = response.status();
        if status.is_success() || status == StatusCode::CONFLICT {
            debug!(status = status.as_u16(), "Event forwarded");
            return Ok(());
        }

        let kind = ErrorKind::from_http_status(status.as_u16()).unwrap_or(ErrorKind::ServerError);
        Err(HandlerError::new(
            kind,
            format!("{} responded {}", self.dependency, status),
        ))
    }

    fn dependency(&self) -> Option<String> {
        Some(self.dependency.clone())
    }
}

fn classify_transport_error(error: reqwest::Error) -> HandlerError {
    if error.is_timeout() {
        HandlerError::timeout(error.to_string())
    } else if error.is_builder() {
        HandlerError::internal(error.to_string())
    } else {
        HandlerError::network(error.to_string())
    }
}

/// Build the dispatcher's handler registry from forwarding rules.
///
/// A rule without event types registers as the source's wildcard handler.
/// When two rules claim the same `(source, event_type)` the later one wins.
pub fn build_handler_registry(rules: &[ForwardingRule]) -> Result<HandlerRegistry, ForwardError> {
    let mut registry = HandlerRegistry::new();

    for rule in rules {
        let handler: Arc<dyn EventHandler> = Arc::new(HttpForwardHandler::from_rule(rule)?);

        if rule.event_types.is_empty() {
            registry.register_wildcard(rule.source, handler);
        } else {
            for event_type in &rule.event_types {
                registry.register(rule.source, event_type.clone(), handler.clone());
            }
        }

        info!(
            source = %rule.source,
            url = %rule.url,
            dependency = %rule.dependency_name(),
            event_types = ?rule.event_types,
            "Registered forwarding rule"
        );
    }

    Ok(registry)
}

#[cfg(test)]
#[path = "forward_tests.rs"]
mod tests;
