//! In-memory event ledger.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tracing::debug;

use super::{
    sort_oldest_first, EventLedger, LedgerError, LedgerStats, RecordOutcome, WebhookEvent,
    DEFAULT_MAX_RETRIES,
};
use crate::{EventId, Timestamp, WebhookSource};

#[derive(Debug, Default)]
struct LedgerState {
    events: HashMap<EventId, WebhookEvent>,
    /// Uniqueness index on `(source, external_event_id)`
    index: HashMap<(WebhookSource, String), EventId>,
}

impl LedgerState {
    fn find_mut(
        &mut self,
        source: WebhookSource,
        external_event_id: &str,
    ) -> Result<&mut WebhookEvent, LedgerError> {
        let not_found = || LedgerError::NotFound {
            provider: source,
            external_event_id: external_event_id.to_string(),
        };
        let id = *self
            .index
            .get(&(source, external_event_id.to_string()))
            .ok_or_else(not_found)?;
        self.events.get_mut(&id).ok_or_else(not_found)
    }

    fn select<F>(&self, source: Option<WebhookSource>, limit: usize, predicate: F) -> Vec<WebhookEvent>
    where
        F: Fn(&WebhookEvent) -> bool,
    {
        let mut selected: Vec<WebhookEvent> = self
            .events
            .values()
            .filter(|e| e.matches_source(source) && predicate(*e))
            .cloned()
            .collect();
        sort_oldest_first(&mut selected);
        selected.truncate(limit);
        selected
    }
}

/// Process-local ledger guarded by a mutex.
///
/// The insert-or-fetch in [`record_event`](EventLedger::record_event) runs
/// under a single lock acquisition, so concurrent duplicates cannot both
/// insert.
#[derive(Debug)]
pub struct InMemoryEventLedger {
    state: Mutex<LedgerState>,
    max_retries: u32,
}

impl Default for InMemoryEventLedger {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryEventLedger {
    pub fn new() -> Self {
        Self::with_max_retries(DEFAULT_MAX_RETRIES)
    }

    pub fn with_max_retries(max_retries: u32) -> Self {
        Self {
            state: Mutex::new(LedgerState::default()),
            max_retries,
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, LedgerState>, LedgerError> {
        self.state.lock().map_err(|e| LedgerError::Storage {
            message: format!("Ledger lock poisoned: {}", e),
        })
    }

    /// Insert a record as-is, bypassing idempotency checks. Test support for
    /// seeding events with specific timestamps.
    #[cfg(test)]
    pub(crate) fn insert_raw(&self, event: WebhookEvent) {
        let mut state = self.lock().unwrap();
        state
            .index
            .insert((event.source, event.external_event_id.clone()), event.id);
        state.events.insert(event.id, event);
    }
}

#[async_trait]
impl EventLedger for InMemoryEventLedger {
    async fn record_event(
        &self,
        source: WebhookSource,
        event_type: &str,
        external_event_id: &str,
        payload: serde_json::Value,
    ) -> Result<RecordOutcome, LedgerError> {
        let mut state = self.lock()?;
        let key = (source, external_event_id.to_string());

        if let Some(existing) = state.index.get(&key) {
            debug!(
                source = %source,
                external_event_id = %external_event_id,
                event_id = %existing,
                "Duplicate delivery resolved to existing event"
            );
            return Ok(RecordOutcome {
                event_id: *existing,
                is_new: false,
            });
        }

        let event = WebhookEvent::new(source, event_type, external_event_id, payload);
        let event_id = event.id;
        state.index.insert(key, event_id);
        state.events.insert(event_id, event);

        Ok(RecordOutcome {
            event_id,
            is_new: true,
        })
    }

    async fn mark_processed(
        &self,
        source: WebhookSource,
        external_event_id: &str,
    ) -> Result<(), LedgerError> {
        let mut state = self.lock()?;
        state.find_mut(source, external_event_id)?.apply_processed();
        Ok(())
    }

    async fn mark_error(
        &self,
        source: WebhookSource,
        external_event_id: &str,
        error_message: &str,
        increment_retry: bool,
    ) -> Result<(), LedgerError> {
        let mut state = self.lock()?;
        state
            .find_mut(source, external_event_id)?
            .apply_error(error_message, increment_retry);
        Ok(())
    }

    async fn list_unprocessed(
        &self,
        source: Option<WebhookSource>,
        limit: usize,
    ) -> Result<Vec<WebhookEvent>, LedgerError> {
        Ok(self.lock()?.select(source, limit, WebhookEvent::is_pending))
    }

    async fn list_failed(
        &self,
        source: Option<WebhookSource>,
        limit: usize,
    ) -> Result<Vec<WebhookEvent>, LedgerError> {
        Ok(self.lock()?.select(source, limit, WebhookEvent::is_failed))
    }

    async fn retry(&self, event_id: EventId) -> Result<WebhookEvent, LedgerError> {
        let mut state = self.lock()?;
        let event = state
            .events
            .get_mut(&event_id)
            .ok_or(LedgerError::EventNotFound { event_id })?;
        event.apply_retry(self.max_retries)?;
        Ok(event.clone())
    }

    async fn get(&self, event_id: EventId) -> Result<Option<WebhookEvent>, LedgerError> {
        Ok(self.lock()?.events.get(&event_id).cloned())
    }

    async fn find(
        &self,
        source: WebhookSource,
        external_event_id: &str,
    ) -> Result<Option<WebhookEvent>, LedgerError> {
        let state = self.lock()?;
        Ok(state
            .index
            .get(&(source, external_event_id.to_string()))
            .and_then(|id| state.events.get(id))
            .cloned())
    }

    async fn purge_expired(&self, retention: Duration) -> Result<usize, LedgerError> {
        let cutoff = Timestamp::now().subtract_duration(retention);
        let mut state = self.lock()?;

        let expired: Vec<WebhookEvent> = state
            .events
            .values()
            .filter(|e| e.is_purgeable(cutoff))
            .cloned()
            .collect();

        for event in &expired {
            state.events.remove(&event.id);
            state
                .index
                .remove(&(event.source, event.external_event_id.clone()));
        }

        Ok(expired.len())
    }

    async fn stats(&self) -> Result<LedgerStats, LedgerError> {
        let state = self.lock()?;
        let mut stats = LedgerStats::default();
        for event in state.events.values() {
            stats.count(event);
        }
        Ok(stats)
    }

    fn max_retries(&self) -> u32 {
        self.max_retries
    }
}

#[cfg(test)]
#[path = "memory_tests.rs"]
mod tests;
