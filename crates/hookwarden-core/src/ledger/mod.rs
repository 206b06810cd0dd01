//! Event ledger: the durable record of every received webhook.
//!
//! Each inbound notification produces at most one [`WebhookEvent`] per
//! `(source, external_event_id)`. Duplicate deliveries resolve to the
//! existing record, which is what makes ingestion idempotent.
//!
//! # Lifecycle
//!
//! ```text
//! record_event ──► pending ──► mark_processed ──► processed
//!                     │
//!                     └──► mark_error ──► failed ──► retry ──► pending
//! ```
//!
//! Records are eligible for [`purge_expired`](EventLedger::purge_expired)
//! once processed and older than the retention window.
//!
//! # Backends
//!
//! - [`InMemoryEventLedger`]: process-local, for tests and single-node use
//! - [`FilesystemEventLedger`]: one JSON document per event, uniqueness
//!   enforced with exclusive file creation

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

use crate::{Classify, ErrorKind, EventId, Timestamp, WebhookSource};

mod filesystem;
mod memory;

pub use filesystem::FilesystemEventLedger;
pub use memory::InMemoryEventLedger;

/// Retry cap applied by [`EventLedger::retry`] unless configured otherwise.
pub const DEFAULT_MAX_RETRIES: u32 = 5;

// ============================================================================
// Records
// ============================================================================

/// One received webhook notification and its processing outcome.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookEvent {
    pub id: EventId,
    pub source: WebhookSource,
    pub event_type: String,
    pub external_event_id: String,
    /// Provider payload, stored verbatim
    pub payload: serde_json::Value,
    pub processed: bool,
    pub processing_error: Option<String>,
    pub retry_count: u32,
    pub created_at: Timestamp,
    /// Completion time, or last attempt time for failed events
    pub processed_at: Option<Timestamp>,
}

impl WebhookEvent {
    pub fn new(
        source: WebhookSource,
        event_type: impl Into<String>,
        external_event_id: impl Into<String>,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            id: EventId::new(),
            source,
            event_type: event_type.into(),
            external_event_id: external_event_id.into(),
            payload,
            processed: false,
            processing_error: None,
            retry_count: 0,
            created_at: Timestamp::now(),
            processed_at: None,
        }
    }

    /// Never attempted, or reset for retry.
    pub fn is_pending(&self) -> bool {
        !self.processed && self.processing_error.is_none()
    }

    /// Last attempt failed and the failure has not been resolved.
    pub fn is_failed(&self) -> bool {
        !self.processed && self.processing_error.is_some()
    }

    fn apply_processed(&mut self) {
        self.processed = true;
        self.processing_error = None;
        self.processed_at = Some(Timestamp::now());
    }

    fn apply_error(&mut self, message: &str, increment_retry: bool) {
        self.processed = false;
        self.processing_error = Some(message.to_string());
        self.processed_at = Some(Timestamp::now());
        if increment_retry {
            self.retry_count = self.retry_count.saturating_add(1);
        }
    }

    fn apply_retry(&mut self, max_retries: u32) -> Result<(), LedgerError> {
        if self.processed {
            return Err(LedgerError::AlreadyProcessed { event_id: self.id });
        }
        if self.retry_count >= max_retries {
            return Err(LedgerError::MaxRetriesExceeded {
                event_id: self.id,
                retry_count: self.retry_count,
                max_retries,
            });
        }
        self.processed = false;
        self.processing_error = None;
        self.retry_count += 1;
        Ok(())
    }

    fn matches_source(&self, source: Option<WebhookSource>) -> bool {
        source.map_or(true, |s| s == self.source)
    }

    /// Processed records older than `cutoff` may be deleted. Anything still
    /// awaiting processing is kept regardless of age.
    fn is_purgeable(&self, cutoff: Timestamp) -> bool {
        self.processed && self.created_at < cutoff
    }
}

/// Oldest-first ordering with the ULID as tie-breaker.
fn sort_oldest_first(events: &mut [WebhookEvent]) {
    events.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
}

/// Result of [`EventLedger::record_event`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordOutcome {
    pub event_id: EventId,
    /// `false` when the event had already been recorded
    pub is_new: bool,
}

/// Ledger-wide counts for health reporting.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerStats {
    pub total: u64,
    pub processed: u64,
    pub pending: u64,
    pub failed: u64,
    /// Records per provider
    pub by_source: BTreeMap<WebhookSource, u64>,
}

impl LedgerStats {
    fn count(&mut self, event: &WebhookEvent) {
        self.total += 1;
        *self.by_source.entry(event.source).or_insert(0) += 1;
        if event.processed {
            self.processed += 1;
        } else if event.is_failed() {
            self.failed += 1;
        } else {
            self.pending += 1;
        }
    }
}

// ============================================================================
// Errors
// ============================================================================

/// Errors returned by ledger operations.
#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    #[error("No event recorded for {provider} '{external_event_id}'")]
    NotFound {
        provider: WebhookSource,
        external_event_id: String,
    },

    #[error("Event not found: {event_id}")]
    EventNotFound { event_id: EventId },

    #[error("Event {event_id} has been retried {retry_count} times (max {max_retries})")]
    MaxRetriesExceeded {
        event_id: EventId,
        retry_count: u32,
        max_retries: u32,
    },

    #[error("Event {event_id} has already been processed")]
    AlreadyProcessed { event_id: EventId },

    #[error("Ledger storage error: {message}")]
    Storage { message: String },

    #[error("Ledger serialization error: {message}")]
    Serialization { message: String },
}

impl LedgerError {
    /// Check if error is transient and should be retried
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Storage { .. })
    }
}

impl Classify for LedgerError {
    fn kind(&self) -> ErrorKind {
        match self {
            Self::NotFound { .. } | Self::EventNotFound { .. } => ErrorKind::Validation,
            Self::MaxRetriesExceeded { .. } | Self::AlreadyProcessed { .. } => {
                ErrorKind::BusinessLogic
            }
            Self::Storage { .. } | Self::Serialization { .. } => ErrorKind::Internal,
        }
    }
}

// ============================================================================
// Ledger Trait
// ============================================================================

/// Durable store of received webhook events.
///
/// Implementations must make [`record_event`](Self::record_event) atomic
/// with respect to concurrent deliveries of the same event: exactly one
/// caller observes `is_new == true`.
#[async_trait]
pub trait EventLedger: Send + Sync {
    /// Insert a new event or return the existing record's id unchanged.
    async fn record_event(
        &self,
        source: WebhookSource,
        event_type: &str,
        external_event_id: &str,
        payload: serde_json::Value,
    ) -> Result<RecordOutcome, LedgerError>;

    /// Set `processed`, clear the error, stamp `processed_at`.
    ///
    /// # Errors
    ///
    /// [`LedgerError::NotFound`] if no matching record exists.
    async fn mark_processed(
        &self,
        source: WebhookSource,
        external_event_id: &str,
    ) -> Result<(), LedgerError>;

    /// Record a failed attempt, optionally counting it as a retry.
    async fn mark_error(
        &self,
        source: WebhookSource,
        external_event_id: &str,
        error_message: &str,
        increment_retry: bool,
    ) -> Result<(), LedgerError>;

    /// Never-attempted events, oldest first. Failed events are excluded.
    async fn list_unprocessed(
        &self,
        source: Option<WebhookSource>,
        limit: usize,
    ) -> Result<Vec<WebhookEvent>, LedgerError>;

    /// Events whose last attempt failed, oldest first.
    async fn list_failed(
        &self,
        source: Option<WebhookSource>,
        limit: usize,
    ) -> Result<Vec<WebhookEvent>, LedgerError>;

    /// Clear the error and make the event pending again.
    ///
    /// # Errors
    ///
    /// [`LedgerError::AlreadyProcessed`] if the event already succeeded,
    /// [`LedgerError::MaxRetriesExceeded`] once `retry_count` reaches the cap.
    async fn retry(&self, event_id: EventId) -> Result<WebhookEvent, LedgerError>;

    async fn get(&self, event_id: EventId) -> Result<Option<WebhookEvent>, LedgerError>;

    async fn find(
        &self,
        source: WebhookSource,
        external_event_id: &str,
    ) -> Result<Option<WebhookEvent>, LedgerError>;

    /// Delete processed records created more than `retention` ago.
    ///
    /// Returns the number of records removed.
    async fn purge_expired(&self, retention: Duration) -> Result<usize, LedgerError>;

    async fn stats(&self) -> Result<LedgerStats, LedgerError>;

    /// The cap enforced by [`retry`](Self::retry).
    fn max_retries(&self) -> u32;
}

#[cfg(test)]
#[path = "mod_tests.rs"]
mod tests;
