//! Filesystem-backed event ledger.
//!
//! Layout under the base directory:
//!
//! ```text
//! events/{event_id}.json                  one document per event
//! index/{source}/{sha256(external_id)}    contains the owning event id
//! ```
//!
//! The index file is created with `create_new`, so the filesystem itself
//! arbitrates concurrent deliveries of the same event. The winner writes its
//! id into the index before publishing the staged record. The loser discards
//! its staged record and resolves to the winner's id. An index entry that
//! never resolves to a published record (a writer died between the two
//! steps) is reclaimed once it is older than `INDEX_STALE_AFTER`.

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::io::ErrorKind as IoErrorKind;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use super::{
    sort_oldest_first, EventLedger, LedgerError, LedgerStats, RecordOutcome, WebhookEvent,
    DEFAULT_MAX_RETRIES,
};
use crate::{EventId, Timestamp, WebhookSource};

/// Attempts made to read an index entry that another writer has just created.
const INDEX_READ_ATTEMPTS: u32 = 50;
const INDEX_READ_BACKOFF: Duration = Duration::from_millis(10);

/// Age after which an index entry without a published record is abandoned.
const INDEX_STALE_AFTER: Duration = Duration::from_millis(200);

/// Claim attempts per `record_event`; each retry follows a reclaimed entry.
const INDEX_CLAIM_ATTEMPTS: u32 = 3;

fn storage_error(context: &str, e: impl std::fmt::Display) -> LedgerError {
    LedgerError::Storage {
        message: format!("{}: {}", context, e),
    }
}

/// Ledger storing each event as a JSON file.
///
/// # Examples
///
/// ```no_run
/// use hookwarden_core::ledger::FilesystemEventLedger;
/// use std::path::PathBuf;
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let ledger = FilesystemEventLedger::new(PathBuf::from("./data/ledger")).await?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct FilesystemEventLedger {
    base_path: PathBuf,
    max_retries: u32,
    /// Serializes read-modify-write updates within this process
    update_lock: Mutex<()>,
}

impl FilesystemEventLedger {
    /// Open a ledger rooted at `base_path`, creating directories as needed.
    pub async fn new(base_path: PathBuf) -> Result<Self, LedgerError> {
        Self::with_max_retries(base_path, DEFAULT_MAX_RETRIES).await
    }

    pub async fn with_max_retries(
        base_path: PathBuf,
        max_retries: u32,
    ) -> Result<Self, LedgerError> {
        fs::create_dir_all(base_path.join("events"))
            .await
            .map_err(|e| storage_error("Failed to create events directory", e))?;
        for source in WebhookSource::ALL {
            fs::create_dir_all(base_path.join("index").join(source.as_str()))
                .await
                .map_err(|e| storage_error("Failed to create index directory", e))?;
        }

        Ok(Self {
            base_path,
            max_retries,
            update_lock: Mutex::new(()),
        })
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    fn event_path(&self, event_id: &EventId) -> PathBuf {
        self.base_path
            .join("events")
            .join(format!("{}.json", event_id))
    }

    fn index_path(&self, source: WebhookSource, external_event_id: &str) -> PathBuf {
        let digest = Sha256::digest(external_event_id.as_bytes());
        self.base_path
            .join("index")
            .join(source.as_str())
            .join(hex::encode(digest))
    }

    async fn write_atomic(&self, path: &Path, event: &WebhookEvent) -> Result<(), LedgerError> {
        let json = serde_json::to_vec_pretty(event).map_err(|e| LedgerError::Serialization {
            message: e.to_string(),
        })?;

        // Write to temporary file first (atomic write pattern)
        let temp_path = path.with_extension("tmp");
        let mut file = fs::File::create(&temp_path)
            .await
            .map_err(|e| storage_error("Failed to create temp file", e))?;
        file.write_all(&json)
            .await
            .map_err(|e| storage_error("Failed to write event", e))?;
        file.flush()
            .await
            .map_err(|e| storage_error("Failed to flush event", e))?;

        fs::rename(&temp_path, path)
            .await
            .map_err(|e| storage_error("Failed to rename temp file", e))
    }

    async fn read_event(&self, event_id: &EventId) -> Result<Option<WebhookEvent>, LedgerError> {
        match fs::read(self.event_path(event_id)).await {
            Ok(bytes) => serde_json::from_slice(&bytes).map(Some).map_err(|e| {
                LedgerError::Serialization {
                    message: format!("Corrupt event {}: {}", event_id, e),
                }
            }),
            Err(e) if e.kind() == IoErrorKind::NotFound => Ok(None),
            Err(e) => Err(storage_error("Failed to read event", e)),
        }
    }

    async fn read_index(&self, path: &Path) -> Result<Option<EventId>, LedgerError> {
        match fs::read_to_string(path).await {
            Ok(content) if content.trim().is_empty() => Ok(None),
            Ok(content) => content.trim().parse().map(Some).map_err(|_| {
                LedgerError::Serialization {
                    message: format!("Corrupt index entry at {}", path.display()),
                }
            }),
            Err(e) if e.kind() == IoErrorKind::NotFound => Ok(None),
            Err(e) => Err(storage_error("Failed to read index", e)),
        }
    }

    async fn event_exists(&self, event_id: &EventId) -> bool {
        fs::try_exists(self.event_path(event_id))
            .await
            .unwrap_or(false)
    }

    /// Resolve an index entry that may still be in the middle of being
    /// written by a concurrent winner.
    ///
    /// Returns `None` when the entry disappeared or was abandoned and has
    /// been removed, in which case the caller may claim it again.
    async fn await_indexed_event(
        &self,
        index_path: &Path,
    ) -> Result<Option<EventId>, LedgerError> {
        for _ in 0..INDEX_READ_ATTEMPTS {
            if let Some(event_id) = self.read_index(index_path).await? {
                if self.event_exists(&event_id).await {
                    return Ok(Some(event_id));
                }
            }

            let metadata = match fs::metadata(index_path).await {
                Ok(metadata) => metadata,
                Err(e) if e.kind() == IoErrorKind::NotFound => return Ok(None),
                Err(e) => return Err(storage_error("Failed to inspect index entry", e)),
            };
            let stale = metadata
                .modified()
                .ok()
                .and_then(|modified| modified.elapsed().ok())
                .map_or(false, |age| age >= INDEX_STALE_AFTER);
            if stale {
                warn!(path = %index_path.display(), "Reclaiming abandoned index entry");
                return match fs::remove_file(index_path).await {
                    Ok(()) => Ok(None),
                    Err(e) if e.kind() == IoErrorKind::NotFound => Ok(None),
                    Err(e) => Err(storage_error("Failed to remove stale index entry", e)),
                };
            }

            tokio::time::sleep(INDEX_READ_BACKOFF).await;
        }
        Err(LedgerError::Storage {
            message: format!("Index entry {} never became readable", index_path.display()),
        })
    }

    /// Create the index entry and write the owning id into it.
    ///
    /// Returns `false` when another writer already holds the entry.
    async fn claim_index(&self, index_path: &Path, event_id: &EventId) -> Result<bool, LedgerError> {
        let mut index_file = match fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(index_path)
            .await
        {
            Ok(file) => file,
            Err(e) if e.kind() == IoErrorKind::AlreadyExists => return Ok(false),
            Err(e) => return Err(storage_error("Failed to create index entry", e)),
        };

        let written = async {
            index_file.write_all(event_id.to_string().as_bytes()).await?;
            index_file.flush().await
        }
        .await;
        if let Err(e) = written {
            let _ = fs::remove_file(index_path).await;
            return Err(storage_error("Failed to write index", e));
        }
        Ok(true)
    }

    /// Claim the index entry for `event` and publish its staged document.
    async fn publish_staged(
        &self,
        index_path: &Path,
        staged_path: &Path,
        event: &WebhookEvent,
    ) -> Result<RecordOutcome, LedgerError> {
        for _ in 0..INDEX_CLAIM_ATTEMPTS {
            if self.claim_index(index_path, &event.id).await? {
                if let Err(e) = fs::rename(staged_path, self.event_path(&event.id)).await {
                    let _ = fs::remove_file(index_path).await;
                    return Err(storage_error("Failed to publish event", e));
                }
                return Ok(RecordOutcome {
                    event_id: event.id,
                    is_new: true,
                });
            }

            if let Some(existing) = self.await_indexed_event(index_path).await? {
                debug!(
                    source = %event.source,
                    external_event_id = %event.external_event_id,
                    event_id = %existing,
                    "Lost insert race, resolved to existing event"
                );
                return Ok(RecordOutcome {
                    event_id: existing,
                    is_new: false,
                });
            }
        }
        Err(LedgerError::Storage {
            message: format!("Could not claim index entry {}", index_path.display()),
        })
    }

    async fn load(
        &self,
        source: WebhookSource,
        external_event_id: &str,
    ) -> Result<WebhookEvent, LedgerError> {
        self.find(source, external_event_id)
            .await?
            .ok_or_else(|| LedgerError::NotFound {
                provider: source,
                external_event_id: external_event_id.to_string(),
            })
    }

    /// Read every stored event. Unreadable documents are skipped with a warning.
    async fn scan(&self) -> Result<Vec<WebhookEvent>, LedgerError> {
        let mut events = Vec::new();
        let mut read_dir = fs::read_dir(self.base_path.join("events"))
            .await
            .map_err(|e| storage_error("Failed to read events directory", e))?;

        while let Some(entry) = read_dir
            .next_entry()
            .await
            .map_err(|e| storage_error("Failed to read directory entry", e))?
        {
            let path = entry.path();
            if path.extension().and_then(|s| s.to_str()) != Some("json") {
                continue;
            }
            match fs::read(&path).await {
                Ok(bytes) => match serde_json::from_slice::<WebhookEvent>(&bytes) {
                    Ok(event) => events.push(event),
                    Err(e) => warn!(path = %path.display(), error = %e, "Skipping corrupt event file"),
                },
                // Removed by a concurrent purge
                Err(e) if e.kind() == IoErrorKind::NotFound => {}
                Err(e) => return Err(storage_error("Failed to read event", e)),
            }
        }

        Ok(events)
    }

    async fn select<F>(
        &self,
        source: Option<WebhookSource>,
        limit: usize,
        predicate: F,
    ) -> Result<Vec<WebhookEvent>, LedgerError>
    where
        F: Fn(&WebhookEvent) -> bool + Send,
    {
        let mut selected: Vec<WebhookEvent> = self
            .scan()
            .await?
            .into_iter()
            .filter(|e| e.matches_source(source) && predicate(e))
            .collect();
        sort_oldest_first(&mut selected);
        selected.truncate(limit);
        Ok(selected)
    }
}

#[async_trait]
impl EventLedger for FilesystemEventLedger {
    async fn record_event(
        &self,
        source: WebhookSource,
        event_type: &str,
        external_event_id: &str,
        payload: serde_json::Value,
    ) -> Result<RecordOutcome, LedgerError> {
        let index_path = self.index_path(source, external_event_id);

        if let Some(existing) = self.read_index(&index_path).await? {
            if self.event_exists(&existing).await {
                return Ok(RecordOutcome {
                    event_id: existing,
                    is_new: false,
                });
            }
        }

        let event = WebhookEvent::new(source, event_type, external_event_id, payload);

        // Stage the document; it only becomes visible once we own the index entry
        let staged_path = self.event_path(&event.id).with_extension("staged");
        self.write_atomic(&staged_path, &event).await?;

        let outcome = self.publish_staged(&index_path, &staged_path, &event).await;
        if !matches!(outcome, Ok(RecordOutcome { is_new: true, .. })) {
            let _ = fs::remove_file(&staged_path).await;
        }
        outcome
    }

    async fn mark_processed(
        &self,
        source: WebhookSource,
        external_event_id: &str,
    ) -> Result<(), LedgerError> {
        let _guard = self.update_lock.lock().await;
        let mut event = self.load(source, external_event_id).await?;
        event.apply_processed();
        self.write_atomic(&self.event_path(&event.id), &event).await
    }

    async fn mark_error(
        &self,
        source: WebhookSource,
        external_event_id: &str,
        error_message: &str,
        increment_retry: bool,
    ) -> Result<(), LedgerError> {
        let _guard = self.update_lock.lock().await;
        let mut event = self.load(source, external_event_id).await?;
        event.apply_error(error_message, increment_retry);
        self.write_atomic(&self.event_path(&event.id), &event).await
    }

    async fn list_unprocessed(
        &self,
        source: Option<WebhookSource>,
        limit: usize,
    ) -> Result<Vec<WebhookEvent>, LedgerError> {
        self.select(source, limit, WebhookEvent::is_pending).await
    }

    async fn list_failed(
        &self,
        source: Option<WebhookSource>,
        limit: usize,
    ) -> Result<Vec<WebhookEvent>, LedgerError> {
        self.select(source, limit, WebhookEvent::is_failed).await
    }

    async fn retry(&self, event_id: EventId) -> Result<WebhookEvent, LedgerError> {
        let _guard = self.update_lock.lock().await;
        let mut event = self
            .read_event(&event_id)
            .await?
            .ok_or(LedgerError::EventNotFound { event_id })?;
        event.apply_retry(self.max_retries)?;
        self.write_atomic(&self.event_path(&event_id), &event).await?;
        Ok(event)
    }

    async fn get(&self, event_id: EventId) -> Result<Option<WebhookEvent>, LedgerError> {
        self.read_event(&event_id).await
    }

    async fn find(
        &self,
        source: WebhookSource,
        external_event_id: &str,
    ) -> Result<Option<WebhookEvent>, LedgerError> {
        match self
            .read_index(&self.index_path(source, external_event_id))
            .await?
        {
            Some(event_id) => self.read_event(&event_id).await,
            None => Ok(None),
        }
    }

    async fn purge_expired(&self, retention: Duration) -> Result<usize, LedgerError> {
        let _guard = self.update_lock.lock().await;
        let cutoff = Timestamp::now().subtract_duration(retention);
        let mut removed = 0;

        for event in self.scan().await? {
            if !event.is_purgeable(cutoff) {
                continue;
            }
            // Index first so a crash never leaves an index entry pointing nowhere
            let index_path = self.index_path(event.source, &event.external_event_id);
            match fs::remove_file(&index_path).await {
                Ok(()) => {}
                Err(e) if e.kind() == IoErrorKind::NotFound => {}
                Err(e) => return Err(storage_error("Failed to remove index entry", e)),
            }
            match fs::remove_file(self.event_path(&event.id)).await {
                Ok(()) => removed += 1,
                Err(e) if e.kind() == IoErrorKind::NotFound => {}
                Err(e) => return Err(storage_error("Failed to remove event", e)),
            }
        }

        Ok(removed)
    }

    async fn stats(&self) -> Result<LedgerStats, LedgerError> {
        let mut stats = LedgerStats::default();
        for event in self.scan().await? {
            stats.count(&event);
        }
        Ok(stats)
    }

    fn max_retries(&self) -> u32 {
        self.max_retries
    }
}

#[cfg(test)]
#[path = "filesystem_tests.rs"]
mod tests;
