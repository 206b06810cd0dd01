//! Handler registration keyed by `(source, event_type)`.

use async_trait::async_trait;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tracing::info;

use crate::ledger::WebhookEvent;
use crate::{Classify, ErrorKind, WebhookSource};

/// Event type that matches every event of a source without an exact handler.
pub const WILDCARD_EVENT_TYPE: &str = "*";

// ============================================================================
// Handler trait
// ============================================================================

/// Business logic invoked for a verified, newly recorded event.
///
/// Handlers must be idempotent per operation: a retry after a partial
/// failure may repeat work that already succeeded downstream.
#[async_trait]
pub trait EventHandler: Send + Sync {
    /// Apply the event.
    async fn handle(&self, event: &WebhookEvent) -> Result<(), HandlerError>;

    /// Downstream dependency this handler calls, used as the circuit breaker
    /// key. `None` runs the handler without a breaker.
    fn dependency(&self) -> Option<String> {
        None
    }
}

/// Classified handler failure.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{kind}: {message}")]
pub struct HandlerError {
    pub kind: ErrorKind,
    pub message: String,
}

impl HandlerError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Network, message)
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Timeout, message)
    }

    pub fn server(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::ServerError, message)
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Validation, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Internal, message)
    }

    /// Check if error is transient and should be retried
    pub fn is_transient(&self) -> bool {
        self.kind.is_transient()
    }
}

impl Classify for HandlerError {
    fn kind(&self) -> ErrorKind {
        self.kind
    }
}

/// Fallback for event types nobody registered: log and succeed, so
/// providers adding new event types do not cause redelivery loops.
#[derive(Debug, Default, Clone, Copy)]
pub struct AcknowledgeHandler;

#[async_trait]
impl EventHandler for AcknowledgeHandler {
    async fn handle(&self, event: &WebhookEvent) -> Result<(), HandlerError> {
        info!(
            source = %event.source,
            event_type = %event.event_type,
            event_id = %event.id,
            "No handler registered, acknowledging event"
        );
        Ok(())
    }
}

// ============================================================================
// Registry
// ============================================================================

/// Map from `(source, event_type)` to handler.
///
/// Resolution order: exact match, then the source's
/// [`WILDCARD_EVENT_TYPE`] entry, then nothing (the dispatcher falls back to
/// [`HandlerRegistry::fallback`]).
#[derive(Clone)]
pub struct HandlerRegistry {
    handlers: HashMap<(WebhookSource, String), Arc<dyn EventHandler>>,
    fallback: Arc<dyn EventHandler>,
}

impl fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut keys: Vec<String> = self
            .handlers
            .keys()
            .map(|(source, event_type)| format!("{}/{}", source, event_type))
            .collect();
        keys.sort();
        f.debug_struct("HandlerRegistry")
            .field("handlers", &keys)
            .finish()
    }
}

impl Default for HandlerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
            fallback: Arc::new(AcknowledgeHandler),
        }
    }

    /// Register `handler` for one event type. Replaces any earlier entry.
    pub fn register(
        &mut self,
        source: WebhookSource,
        event_type: impl Into<String>,
        handler: Arc<dyn EventHandler>,
    ) -> &mut Self {
        self.handlers.insert((source, event_type.into()), handler);
        self
    }

    /// Register `handler` for every event type of `source` without an
    /// exact registration.
    pub fn register_wildcard(
        &mut self,
        source: WebhookSource,
        handler: Arc<dyn EventHandler>,
    ) -> &mut Self {
        self.register(source, WILDCARD_EVENT_TYPE, handler)
    }

    /// Replace the handler used when nothing matches.
    pub fn with_fallback(mut self, handler: Arc<dyn EventHandler>) -> Self {
        self.fallback = handler;
        self
    }

    pub fn resolve(&self, source: WebhookSource, event_type: &str) -> Option<Arc<dyn EventHandler>> {
        self.handlers
            .get(&(source, event_type.to_string()))
            .or_else(|| {
                self.handlers
                    .get(&(source, WILDCARD_EVENT_TYPE.to_string()))
            })
            .cloned()
    }

    pub fn fallback(&self) -> Arc<dyn EventHandler> {
        Arc::clone(&self.fallback)
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

#[cfg(test)]
#[path = "registry_tests.rs"]
mod tests;
