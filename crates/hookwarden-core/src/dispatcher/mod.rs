//! Event dispatcher: routes recorded events to handlers.
//!
//! Per event the dispatcher moves through
//! `received → deduplicated-or-new → processing → {processed | errored}`:
//!
//! 1. [`EventLedger::record_event`] deduplicates. A known event returns
//!    [`DispatchOutcome::Duplicate`] without touching the handler.
//! 2. The handler is resolved from the [`HandlerRegistry`] and invoked
//!    through [`retry_with_backoff`], each attempt optionally guarded by the
//!    circuit breaker named by [`EventHandler::dependency`].
//! 3. Every failed attempt is persisted with `mark_error(.., true)` so the
//!    retry count survives a crash mid-retry. Success calls `mark_processed`.
//! 4. After exhaustion the failure goes to the [`ErrorAggregator`] and the
//!    outcome is [`DispatchOutcome::Failed`].
//!
//! Failed events re-enter processing through [`EventDispatcher::reprocess`]
//! or [`EventDispatcher::sweep`] until the ledger's retry cap is reached.

use serde::Serialize;
use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::time::Instant;
use tracing::{debug, error, info, instrument, warn};

use crate::circuit_breaker::{CircuitBreakerError, CircuitBreakerRegistry};
use crate::envelope::EventIdentity;
use crate::ledger::{EventLedger, LedgerError, WebhookEvent};
use crate::monitoring::{MetricsCollector, NoOpMetricsCollector};
use crate::observability::ErrorAggregator;
use crate::retry::{retry_with_backoff, RetryConfig};
use crate::{Classify, ErrorKind, EventId, WebhookSource};

mod registry;

pub use registry::{
    AcknowledgeHandler, EventHandler, HandlerError, HandlerRegistry, WILDCARD_EVENT_TYPE,
};

/// Operation name used for dispatch latency samples.
pub const DISPATCH_OPERATION: &str = "dispatch";

// ============================================================================
// Outcomes
// ============================================================================

/// Result of dispatching or reprocessing one event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum DispatchOutcome {
    /// A registered handler succeeded.
    Processed { event_id: EventId },

    /// The event had already been recorded; nothing was invoked.
    Duplicate { event_id: EventId },

    /// No handler was registered; the event was logged and marked processed.
    Acknowledged { event_id: EventId },

    /// The handler failed and retries are exhausted.
    Failed {
        event_id: EventId,
        kind: ErrorKind,
        attempts: u32,
    },

    /// Another task in this process is already processing the event.
    InProgress { event_id: EventId },
}

impl DispatchOutcome {
    pub fn event_id(&self) -> EventId {
        match self {
            Self::Processed { event_id }
            | Self::Duplicate { event_id }
            | Self::Acknowledged { event_id }
            | Self::Failed { event_id, .. }
            | Self::InProgress { event_id } => *event_id,
        }
    }

    /// Whether the provider should be told the delivery succeeded.
    pub fn is_success(&self) -> bool {
        !matches!(self, Self::Failed { .. })
    }
}

/// Counts from one [`EventDispatcher::sweep`] pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    /// Never-attempted events picked up
    pub pending_attempted: usize,
    /// Failed events re-entered through the ledger's retry
    pub failed_retried: usize,
    pub processed: usize,
    pub failed: usize,
    /// Already in flight, handled since listing, or at the retry cap
    pub skipped: usize,
    /// Ledger errors encountered while sweeping
    pub errors: usize,
}

impl SweepReport {
    /// No events were touched and no errors occurred.
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    fn tally(&mut self, outcome: &DispatchOutcome) {
        match outcome {
            DispatchOutcome::Processed { .. } | DispatchOutcome::Acknowledged { .. } => {
                self.processed += 1
            }
            DispatchOutcome::Failed { .. } => self.failed += 1,
            DispatchOutcome::InProgress { .. } | DispatchOutcome::Duplicate { .. } => {
                self.skipped += 1
            }
        }
    }
}

// ============================================================================
// In-flight tracking
// ============================================================================

/// Removes the event from the in-flight set when dropped.
struct InFlightGuard<'a> {
    set: &'a Mutex<HashSet<EventId>>,
    event_id: EventId,
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.set
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.event_id);
    }
}

// ============================================================================
// Dispatcher
// ============================================================================

/// Routes events from the ledger to their handlers with retry and
/// circuit-breaker protection.
pub struct EventDispatcher {
    ledger: Arc<dyn EventLedger>,
    handlers: HandlerRegistry,
    breakers: Arc<CircuitBreakerRegistry>,
    retry_config: RetryConfig,
    aggregator: Arc<ErrorAggregator>,
    metrics: Arc<dyn MetricsCollector>,
    in_flight: Mutex<HashSet<EventId>>,
}

impl std::fmt::Debug for EventDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventDispatcher")
            .field("handlers", &self.handlers)
            .field("breakers", &self.breakers)
            .field("retry_config", &self.retry_config)
            .finish()
    }
}

impl EventDispatcher {
    /// Create a dispatcher with the default retry preset, a fresh breaker
    /// registry and aggregator, and no metrics.
    pub fn new(ledger: Arc<dyn EventLedger>, handlers: HandlerRegistry) -> Self {
        Self {
            ledger,
            handlers,
            breakers: Arc::new(CircuitBreakerRegistry::default()),
            retry_config: RetryConfig::default(),
            aggregator: Arc::new(ErrorAggregator::new()),
            metrics: Arc::new(NoOpMetricsCollector),
            in_flight: Mutex::new(HashSet::new()),
        }
    }

    pub fn with_retry_config(mut self, retry_config: RetryConfig) -> Self {
        self.retry_config = retry_config;
        self
    }

    pub fn with_breakers(mut self, breakers: Arc<CircuitBreakerRegistry>) -> Self {
        self.breakers = breakers;
        self
    }

    pub fn with_aggregator(mut self, aggregator: Arc<ErrorAggregator>) -> Self {
        self.aggregator = aggregator;
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<dyn MetricsCollector>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn ledger(&self) -> &Arc<dyn EventLedger> {
        &self.ledger
    }

    pub fn breakers(&self) -> &Arc<CircuitBreakerRegistry> {
        &self.breakers
    }

    pub fn aggregator(&self) -> &Arc<ErrorAggregator> {
        &self.aggregator
    }

    pub fn retry_config(&self) -> &RetryConfig {
        &self.retry_config
    }

    /// Record a verified event and, if it is new, run its handler.
    ///
    /// # Errors
    ///
    /// [`LedgerError`] when the ledger cannot record or update the event.
    /// Handler failures are not errors; they produce
    /// [`DispatchOutcome::Failed`].
    #[instrument(skip_all, fields(
        source = %source,
        event_type = %identity.event_type,
        external_event_id = %identity.external_event_id,
    ))]
    pub async fn dispatch(
        &self,
        source: WebhookSource,
        identity: EventIdentity,
        payload: serde_json::Value,
    ) -> Result<DispatchOutcome, LedgerError> {
        let recorded = self
            .ledger
            .record_event(
                source,
                &identity.event_type,
                &identity.external_event_id,
                payload,
            )
            .await?;

        if !recorded.is_new {
            info!(event_id = %recorded.event_id, "Duplicate delivery, skipping handler");
            self.metrics.record_duplicate(source);
            return Ok(DispatchOutcome::Duplicate {
                event_id: recorded.event_id,
            });
        }

        let Some(_guard) = self.begin(recorded.event_id) else {
            return Ok(DispatchOutcome::InProgress {
                event_id: recorded.event_id,
            });
        };

        // A sweep may have claimed and finished the event before we did
        let event = self.reload(recorded.event_id).await?;
        if !event.is_pending() {
            debug!(event_id = %event.id, "Event already handled by another task");
            return Ok(DispatchOutcome::InProgress { event_id: event.id });
        }
        self.run(event, false).await
    }

    /// Re-run a failed event through its handler.
    ///
    /// # Errors
    ///
    /// [`LedgerError::MaxRetriesExceeded`] once the event reached the retry
    /// cap, [`LedgerError::AlreadyProcessed`] for events that succeeded,
    /// [`LedgerError::EventNotFound`] for unknown ids.
    #[instrument(skip_all, fields(event_id = %event_id))]
    pub async fn reprocess(&self, event_id: EventId) -> Result<DispatchOutcome, LedgerError> {
        let Some(_guard) = self.begin(event_id) else {
            return Ok(DispatchOutcome::InProgress { event_id });
        };
        self.retry_claimed(event_id).await
    }

    /// Process never-attempted events, then re-attempt failed events still
    /// below the retry cap. At most `limit` of each are considered.
    ///
    /// The listings are snapshots, so each event is re-read after it has
    /// been claimed and skipped if another task already moved it on.
    pub async fn sweep(&self, limit: usize) -> Result<SweepReport, LedgerError> {
        let mut report = SweepReport::default();

        for snapshot in self.ledger.list_unprocessed(None, limit).await? {
            let Some(_guard) = self.begin(snapshot.id) else {
                report.skipped += 1;
                continue;
            };
            let event = match self.reload(snapshot.id).await {
                Ok(event) if event.is_pending() => event,
                Ok(_) => {
                    report.skipped += 1;
                    continue;
                }
                Err(e) => {
                    warn!(event_id = %snapshot.id, error = %e, "Sweep failed to reload event");
                    report.errors += 1;
                    continue;
                }
            };
            report.pending_attempted += 1;
            match self.run(event, false).await {
                Ok(outcome) => report.tally(&outcome),
                Err(e) => {
                    warn!(error = %e, "Sweep failed to process pending event");
                    report.errors += 1;
                }
            }
        }

        let max_retries = self.ledger.max_retries();
        for snapshot in self.ledger.list_failed(None, limit).await? {
            if snapshot.retry_count >= max_retries {
                report.skipped += 1;
                continue;
            }
            let Some(_guard) = self.begin(snapshot.id) else {
                report.skipped += 1;
                continue;
            };
            match self.reload(snapshot.id).await {
                Ok(event) if event.is_failed() && event.retry_count < max_retries => {}
                Ok(_) => {
                    report.skipped += 1;
                    continue;
                }
                Err(e) => {
                    warn!(event_id = %snapshot.id, error = %e, "Sweep failed to reload event");
                    report.errors += 1;
                    continue;
                }
            }
            report.failed_retried += 1;
            match self.retry_claimed(snapshot.id).await {
                Ok(outcome) => report.tally(&outcome),
                Err(e) => {
                    warn!(event_id = %snapshot.id, error = %e, "Sweep failed to retry event");
                    report.errors += 1;
                }
            }
        }

        if report != SweepReport::default() {
            info!(
                pending_attempted = report.pending_attempted,
                failed_retried = report.failed_retried,
                processed = report.processed,
                failed = report.failed,
                skipped = report.skipped,
                errors = report.errors,
                "Sweep completed"
            );
        }

        Ok(report)
    }

    /// Current ledger state of an event.
    async fn reload(&self, event_id: EventId) -> Result<WebhookEvent, LedgerError> {
        self.ledger
            .get(event_id)
            .await?
            .ok_or(LedgerError::EventNotFound { event_id })
    }

    /// Reset a failed event through the ledger and run it. The caller holds
    /// the in-flight claim.
    async fn retry_claimed(&self, event_id: EventId) -> Result<DispatchOutcome, LedgerError> {
        let event = self.ledger.retry(event_id).await?;
        info!(
            source = %event.source,
            event_type = %event.event_type,
            retry_count = event.retry_count,
            "Reprocessing event"
        );
        self.run(event, true).await
    }

    /// Claim `event_id` for this task, or `None` if it is already in flight.
    fn begin(&self, event_id: EventId) -> Option<InFlightGuard<'_>> {
        let inserted = self
            .in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(event_id);
        inserted.then_some(InFlightGuard {
            set: &self.in_flight,
            event_id,
        })
    }

    /// Invoke the handler for `event` under retry and breaker protection.
    ///
    /// `retry_counted` is set when the ledger's `retry` already incremented
    /// the count for this pass, so the first failed attempt is not counted
    /// twice.
    async fn run(
        &self,
        event: WebhookEvent,
        retry_counted: bool,
    ) -> Result<DispatchOutcome, LedgerError> {
        let started = Instant::now();
        let source = event.source;

        let (handler, acknowledged) = match self.handlers.resolve(source, &event.event_type) {
            Some(handler) => (handler, false),
            None => (self.handlers.fallback(), true),
        };
        let breaker = handler
            .dependency()
            .map(|name| self.breakers.get_or_create(&name));

        let context = format!("{}/{}", source, event.event_type);
        let event_ref = &event;
        let handler_ref = &handler;
        let breaker_ref = &breaker;

        let result = retry_with_backoff(
            |attempt| async move {
                if attempt > 1 {
                    self.metrics.record_retry_attempt(source);
                }

                let outcome = match breaker_ref {
                    Some(breaker) => breaker.execute(|| handler_ref.handle(event_ref)).await,
                    None => handler_ref
                        .handle(event_ref)
                        .await
                        .map_err(CircuitBreakerError::OperationFailed),
                };

                self.metrics
                    .record_handler_attempt(source, &event_ref.event_type, outcome.is_ok());

                if let Err(e) = &outcome {
                    let increment = !(retry_counted && attempt == 1);
                    if let Err(ledger_error) = self
                        .ledger
                        .mark_error(
                            source,
                            &event_ref.external_event_id,
                            &e.to_string(),
                            increment,
                        )
                        .await
                    {
                        warn!(
                            event_id = %event_ref.id,
                            error = %ledger_error,
                            "Failed to persist handler failure"
                        );
                    }
                }

                outcome
            },
            &self.retry_config,
            &context,
        )
        .await;

        let elapsed = started.elapsed();
        self.aggregator.record_latency(DISPATCH_OPERATION, elapsed);
        self.metrics.record_dispatch_latency(source, elapsed);

        match result {
            Ok(()) => {
                self.ledger
                    .mark_processed(source, &event.external_event_id)
                    .await?;
                debug!(
                    event_id = %event.id,
                    duration_ms = elapsed.as_millis() as u64,
                    "Event processed"
                );
                Ok(if acknowledged {
                    DispatchOutcome::Acknowledged { event_id: event.id }
                } else {
                    DispatchOutcome::Processed { event_id: event.id }
                })
            }
            Err(exhausted) => {
                let kind = exhausted.kind();
                let message = exhausted.error.to_string();
                error!(
                    event_id = %event.id,
                    source = %source,
                    event_type = %event.event_type,
                    error_kind = %kind,
                    attempts = exhausted.attempts,
                    error = %message,
                    "Event processing failed"
                );
                self.aggregator.record_error(source, kind, &message);
                self.metrics.record_dispatch_failure(source, kind);
                Ok(DispatchOutcome::Failed {
                    event_id: event.id,
                    kind,
                    attempts: exhausted.attempts,
                })
            }
        }
    }
}

#[cfg(test)]
#[path = "mod_tests.rs"]
mod tests;
