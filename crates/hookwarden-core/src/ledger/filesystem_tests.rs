//! Tests for the filesystem event ledger.

use super::*;
use serde_json::json;
use std::sync::Arc;
use tempfile::TempDir;

async fn open(dir: &TempDir) -> FilesystemEventLedger {
    FilesystemEventLedger::new(dir.path().to_path_buf())
        .await
        .unwrap()
}

/// Write a record and its index entry directly, bypassing `record_event`.
async fn seed(ledger: &FilesystemEventLedger, event: &WebhookEvent) {
    ledger
        .write_atomic(&ledger.event_path(&event.id), event)
        .await
        .unwrap();
    fs::write(
        ledger.index_path(event.source, &event.external_event_id),
        event.id.to_string(),
    )
    .await
    .unwrap();
}

mod layout_tests {
    use super::*;

    /// Opening a ledger creates the directory layout.
    #[tokio::test]
    async fn test_new_creates_directories() {
        let dir = TempDir::new().unwrap();
        let ledger = open(&dir).await;

        assert!(ledger.base_path().join("events").is_dir());
        for source in WebhookSource::ALL {
            assert!(ledger.base_path().join("index").join(source.as_str()).is_dir());
        }
    }

    /// Records survive reopening the ledger.
    #[tokio::test]
    async fn test_records_persist_across_reopen() {
        let dir = TempDir::new().unwrap();

        let event_id = {
            let ledger = open(&dir).await;
            let outcome = ledger
                .record_event(WebhookSource::Billing, "invoice.paid", "evt_123", json!({"id": "evt_123"}))
                .await
                .unwrap();
            ledger
                .mark_error(WebhookSource::Billing, "evt_123", "boom", true)
                .await
                .unwrap();
            outcome.event_id
        };

        let reopened = open(&dir).await;
        let event = reopened.get(event_id).await.unwrap().unwrap();
        assert_eq!(event.external_event_id, "evt_123");
        assert_eq!(event.retry_count, 1);
        assert!(event.is_failed());

        let duplicate = reopened
            .record_event(WebhookSource::Billing, "invoice.paid", "evt_123", json!({}))
            .await
            .unwrap();
        assert!(!duplicate.is_new);
        assert_eq!(duplicate.event_id, event_id);
    }

    /// Corrupt documents are skipped when listing.
    #[tokio::test]
    async fn test_scan_skips_corrupt_files() {
        let dir = TempDir::new().unwrap();
        let ledger = open(&dir).await;

        ledger
            .record_event(WebhookSource::Social, "post.created", "p1", json!({}))
            .await
            .unwrap();
        fs::write(dir.path().join("events").join("garbage.json"), b"{not json")
            .await
            .unwrap();

        let pending = ledger.list_unprocessed(None, 10).await.unwrap();
        assert_eq!(pending.len(), 1);
    }
}

mod idempotency_tests {
    use super::*;

    /// External ids containing path separators are safe to index.
    #[tokio::test]
    async fn test_external_id_is_hashed_for_index() {
        let dir = TempDir::new().unwrap();
        let ledger = open(&dir).await;

        let outcome = ledger
            .record_event(WebhookSource::Social, "t", "../../etc/passwd", json!({}))
            .await
            .unwrap();

        assert!(outcome.is_new);
        let found = ledger
            .find(WebhookSource::Social, "../../etc/passwd")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.id, outcome.event_id);
    }

    /// Concurrent duplicate deliveries produce exactly one record on disk.
    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_duplicates_insert_once() {
        let dir = TempDir::new().unwrap();
        let ledger = Arc::new(open(&dir).await);

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let ledger = Arc::clone(&ledger);
                tokio::spawn(async move {
                    ledger
                        .record_event(WebhookSource::Identity, "user.created", "msg_race", json!({}))
                        .await
                        .unwrap()
                })
            })
            .collect();

        let mut outcomes = Vec::new();
        for handle in handles {
            outcomes.push(handle.await.unwrap());
        }

        assert_eq!(outcomes.iter().filter(|o| o.is_new).count(), 1);
        let winner = outcomes.iter().find(|o| o.is_new).unwrap().event_id;
        assert!(outcomes.iter().all(|o| o.event_id == winner));
        assert_eq!(ledger.stats().await.unwrap().total, 1);
    }

    /// Backdate a file so it looks like it was left behind by a dead writer.
    fn backdate(path: &std::path::Path) {
        let file = std::fs::OpenOptions::new().write(true).open(path).unwrap();
        file.set_modified(std::time::SystemTime::now() - Duration::from_secs(60))
            .unwrap();
    }

    /// An empty index entry left by an interrupted write is reclaimed.
    #[tokio::test]
    async fn test_abandoned_empty_index_is_reclaimed() {
        let dir = TempDir::new().unwrap();
        let ledger = open(&dir).await;
        let index_path = ledger.index_path(WebhookSource::Billing, "evt_crash");
        std::fs::write(&index_path, "").unwrap();
        backdate(&index_path);

        let outcome = ledger
            .record_event(WebhookSource::Billing, "invoice.paid", "evt_crash", json!({}))
            .await
            .unwrap();

        assert!(outcome.is_new);
        let again = ledger
            .record_event(WebhookSource::Billing, "invoice.paid", "evt_crash", json!({}))
            .await
            .unwrap();
        assert!(!again.is_new);
        assert_eq!(again.event_id, outcome.event_id);
        assert_eq!(ledger.stats().await.unwrap().total, 1);
    }

    /// An index entry naming a record that was never published is reclaimed.
    #[tokio::test]
    async fn test_index_without_record_is_reclaimed() {
        let dir = TempDir::new().unwrap();
        let ledger = open(&dir).await;
        let orphan = EventId::new();
        let index_path = ledger.index_path(WebhookSource::Identity, "msg_orphan");
        std::fs::write(&index_path, orphan.to_string()).unwrap();
        backdate(&index_path);

        let outcome = ledger
            .record_event(WebhookSource::Identity, "user.created", "msg_orphan", json!({}))
            .await
            .unwrap();

        assert!(outcome.is_new);
        assert_ne!(outcome.event_id, orphan);
        let found = ledger
            .find(WebhookSource::Identity, "msg_orphan")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.id, outcome.event_id);
    }

    /// A fresh empty index entry is treated as abandoned once it stays
    /// unresolved past the staleness window.
    #[tokio::test]
    async fn test_fresh_empty_index_resolves_after_window() {
        let dir = TempDir::new().unwrap();
        let ledger = open(&dir).await;
        std::fs::write(ledger.index_path(WebhookSource::Social, "dm_1"), "").unwrap();

        let outcome = ledger
            .record_event(WebhookSource::Social, "dm", "dm_1", json!({}))
            .await
            .unwrap();

        assert!(outcome.is_new);
    }

    /// Recording leaves no staged documents behind.
    #[tokio::test]
    async fn test_record_leaves_no_staged_files() {
        let dir = TempDir::new().unwrap();
        let ledger = open(&dir).await;

        ledger
            .record_event(WebhookSource::Billing, "invoice.paid", "evt_1", json!({}))
            .await
            .unwrap();
        ledger
            .record_event(WebhookSource::Billing, "invoice.paid", "evt_1", json!({}))
            .await
            .unwrap();

        let leftovers: Vec<_> = std::fs::read_dir(dir.path().join("events"))
            .unwrap()
            .map(|entry| entry.unwrap().path())
            .filter(|path| path.extension().and_then(|s| s.to_str()) != Some("json"))
            .collect();
        assert!(leftovers.is_empty(), "unexpected files: {:?}", leftovers);
    }
}

mod lifecycle_tests {
    use super::*;

    /// Processing, failing and retrying round-trip through disk.
    #[tokio::test]
    async fn test_error_then_retry_then_processed() {
        let dir = TempDir::new().unwrap();
        let ledger = FilesystemEventLedger::with_max_retries(dir.path().to_path_buf(), 1)
            .await
            .unwrap();

        let outcome = ledger
            .record_event(WebhookSource::Billing, "t", "evt_1", json!({}))
            .await
            .unwrap();
        ledger
            .mark_error(WebhookSource::Billing, "evt_1", "boom", false)
            .await
            .unwrap();
        assert_eq!(ledger.list_failed(None, 10).await.unwrap().len(), 1);

        let retried = ledger.retry(outcome.event_id).await.unwrap();
        assert!(retried.is_pending());
        assert_eq!(retried.retry_count, 1);

        ledger
            .mark_processed(WebhookSource::Billing, "evt_1")
            .await
            .unwrap();
        let stats = ledger.stats().await.unwrap();
        assert_eq!(stats.processed, 1);
        assert_eq!(stats.failed, 0);

        let err = ledger.retry(outcome.event_id).await.unwrap_err();
        assert!(matches!(err, LedgerError::AlreadyProcessed { .. }));
        assert!(ledger.get(outcome.event_id).await.unwrap().unwrap().processed);

        // Cap reached
        ledger
            .mark_error(WebhookSource::Billing, "evt_1", "boom again", false)
            .await
            .unwrap();
        let err = ledger.retry(outcome.event_id).await.unwrap_err();
        assert!(matches!(err, LedgerError::MaxRetriesExceeded { .. }));
    }

    /// Unknown events are reported as not found.
    #[tokio::test]
    async fn test_mark_processed_unknown_event() {
        let dir = TempDir::new().unwrap();
        let ledger = open(&dir).await;

        let err = ledger
            .mark_processed(WebhookSource::Identity, "nope")
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::NotFound { .. }));
    }

    /// Purge deletes old processed records and their index entries only.
    #[tokio::test]
    async fn test_purge_expired() {
        let dir = TempDir::new().unwrap();
        let ledger = open(&dir).await;
        let forty_days_ago = Timestamp::now().subtract_duration(Duration::from_secs(40 * 86_400));

        let mut done = WebhookEvent::new(WebhookSource::Billing, "t", "old-done", json!({}));
        done.created_at = forty_days_ago;
        done.processed = true;
        let mut failed = WebhookEvent::new(WebhookSource::Billing, "t", "old-failed", json!({}));
        failed.created_at = forty_days_ago;
        failed.processing_error = Some("boom".to_string());

        seed(&ledger, &done).await;
        seed(&ledger, &failed).await;

        let removed = ledger
            .purge_expired(Duration::from_secs(30 * 86_400))
            .await
            .unwrap();

        assert_eq!(removed, 1);
        assert!(ledger.get(done.id).await.unwrap().is_none());
        assert!(!ledger
            .index_path(WebhookSource::Billing, "old-done")
            .exists());
        assert!(ledger.get(failed.id).await.unwrap().is_some());
    }
}
