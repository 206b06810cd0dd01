//! Background sweeper: retries pending and failed events and purges
//! processed records past retention.

use hookwarden_api::config::SweeperConfig;
use hookwarden_core::EventDispatcher;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info};

/// Periodic recovery of events the request path could not finish.
#[derive(Debug, Clone)]
pub struct Sweeper {
    dispatcher: Arc<EventDispatcher>,
    interval: Duration,
    batch_size: usize,
    retention: Duration,
}

impl Sweeper {
    pub fn new(dispatcher: Arc<EventDispatcher>, config: &SweeperConfig, retention: Duration) -> Self {
        Self {
            dispatcher,
            interval: config.interval(),
            batch_size: config.batch_size,
            retention,
        }
    }

    /// Run one sweep and one purge. Errors are logged, never returned, so
    /// a bad pass does not stop later ones.
    pub async fn run_once(&self) {
        match self.dispatcher.sweep(self.batch_size).await {
            Ok(report) if report.is_empty() => debug!("Sweep found nothing to do"),
            Ok(report) => info!(
                pending_attempted = report.pending_attempted,
                failed_retried = report.failed_retried,
                processed = report.processed,
                failed = report.failed,
                skipped = report.skipped,
                errors = report.errors,
                "Sweep complete"
            ),
            Err(e) => error!(error = %e, "Sweep failed"),
        }

        match self.dispatcher.ledger().purge_expired(self.retention).await {
            Ok(0) => {}
            Ok(purged) => info!(purged, "Purged expired ledger records"),
            Err(e) => error!(error = %e, "Ledger purge failed"),
        }
    }

    /// Sweep every interval until `shutdown` flips to `true`.
    ///
    /// The first pass runs one interval after start so startup traffic is
    /// not competing with recovery.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker.tick().await;

        info!(
            interval_seconds = self.interval.as_secs(),
            batch_size = self.batch_size,
            "Sweeper started"
        );

        loop {
            tokio::select! {
                _ = ticker.tick() => self.run_once().await,
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        info!("Sweeper stopped");
    }

    pub fn spawn(self, shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(self.run(shutdown))
    }
}

#[cfg(test)]
#[path = "sweeper_tests.rs"]
mod tests;
