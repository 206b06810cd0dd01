//! Error aggregation for health reporting.
//!
//! [`ErrorAggregator`] keeps counters per `(source, kind)`, a bounded ring of
//! recent error samples and a bounded latency window per operation. The
//! health endpoints read it through [`ErrorAggregator::summary`].

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tracing::{error, warn};

use crate::{ErrorKind, Severity, Timestamp, WebhookSource};

/// Recent error samples retained by default.
pub const DEFAULT_SAMPLE_CAPACITY: usize = 100;

/// Longest error message kept in a sample, in characters.
pub const MAX_MESSAGE_CHARS: usize = 512;

/// Latency observations retained per operation.
const LATENCY_WINDOW: usize = 1_000;

// ============================================================================
// Public types
// ============================================================================

/// One recorded failure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorSample {
    pub timestamp: Timestamp,
    pub source: WebhookSource,
    pub kind: ErrorKind,
    pub severity: Severity,
    pub message: String,
}

/// Latency statistics for one operation.
///
/// `count` covers every observation ever recorded; the remaining figures
/// are computed over the retained window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LatencyStats {
    pub operation: String,
    pub count: u64,
    pub mean_ms: f64,
    pub p95_ms: f64,
    pub max_ms: f64,
}

/// Aggregated view returned by [`ErrorAggregator::summary`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ErrorSummary {
    pub total_errors: u64,
    pub by_kind: BTreeMap<ErrorKind, u64>,
    pub by_severity: BTreeMap<Severity, u64>,
    pub by_source: BTreeMap<WebhookSource, u64>,
    /// Newest last
    pub recent: Vec<ErrorSample>,
    pub latencies: Vec<LatencyStats>,
}

// ============================================================================
// Aggregator
// ============================================================================

#[derive(Debug, Default)]
struct LatencyWindow {
    samples: VecDeque<Duration>,
    count: u64,
}

impl LatencyWindow {
    fn push(&mut self, duration: Duration) {
        if self.samples.len() == LATENCY_WINDOW {
            self.samples.pop_front();
        }
        self.samples.push_back(duration);
        self.count += 1;
    }

    fn stats(&self, operation: &str) -> LatencyStats {
        let mut sorted: Vec<f64> = self
            .samples
            .iter()
            .map(|d| d.as_secs_f64() * 1_000.0)
            .collect();
        sorted.sort_by(|a, b| a.total_cmp(b));

        let (mean_ms, p95_ms, max_ms) = if sorted.is_empty() {
            (0.0, 0.0, 0.0)
        } else {
            let mean = sorted.iter().sum::<f64>() / sorted.len() as f64;
            let p95_index = ((sorted.len() as f64 * 0.95) as usize).min(sorted.len() - 1);
            (mean, sorted[p95_index], sorted[sorted.len() - 1])
        };

        LatencyStats {
            operation: operation.to_string(),
            count: self.count,
            mean_ms,
            p95_ms,
            max_ms,
        }
    }
}

#[derive(Debug, Default)]
struct AggregatorState {
    counts: HashMap<(WebhookSource, ErrorKind), u64>,
    recent: VecDeque<ErrorSample>,
    latencies: HashMap<String, LatencyWindow>,
}

/// Process-wide collector of handler failures and dispatch latencies.
#[derive(Debug)]
pub struct ErrorAggregator {
    capacity: usize,
    state: Mutex<AggregatorState>,
}

impl Default for ErrorAggregator {
    fn default() -> Self {
        Self::new()
    }
}

impl ErrorAggregator {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_SAMPLE_CAPACITY)
    }

    /// Keep at most `capacity` recent samples.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            state: Mutex::new(AggregatorState::default()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, AggregatorState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Record a failure. High-severity kinds are logged at error level.
    pub fn record_error(&self, source: WebhookSource, kind: ErrorKind, message: &str) {
        let severity = kind.severity();
        let message: String = message.chars().take(MAX_MESSAGE_CHARS).collect();

        match severity {
            Severity::High => error!(
                source = %source,
                error_kind = %kind,
                message = %message,
                "High severity failure recorded"
            ),
            _ => warn!(
                source = %source,
                error_kind = %kind,
                severity = severity.as_str(),
                message = %message,
                "Failure recorded"
            ),
        }

        let mut state = self.lock();
        *state.counts.entry((source, kind)).or_insert(0) += 1;
        if state.recent.len() == self.capacity {
            state.recent.pop_front();
        }
        state.recent.push_back(ErrorSample {
            timestamp: Timestamp::now(),
            source,
            kind,
            severity,
            message,
        });
    }

    /// Add a latency observation for `operation`.
    pub fn record_latency(&self, operation: &str, duration: Duration) {
        self.lock()
            .latencies
            .entry(operation.to_string())
            .or_default()
            .push(duration);
    }

    pub fn summary(&self) -> ErrorSummary {
        let state = self.lock();
        let mut summary = ErrorSummary::default();

        for (&(source, kind), &count) in &state.counts {
            summary.total_errors += count;
            *summary.by_kind.entry(kind).or_insert(0) += count;
            *summary.by_severity.entry(kind.severity()).or_insert(0) += count;
            *summary.by_source.entry(source).or_insert(0) += count;
        }

        summary.recent = state.recent.iter().cloned().collect();

        summary.latencies = state
            .latencies
            .iter()
            .map(|(operation, window)| window.stats(operation))
            .collect();
        summary
            .latencies
            .sort_by(|a, b| a.operation.cmp(&b.operation));

        summary
    }

    /// Whether the recent window holds at least `threshold` high-severity
    /// samples. A zero threshold never reports degraded.
    pub fn is_degraded(&self, threshold: usize) -> bool {
        if threshold == 0 {
            return false;
        }
        self.lock()
            .recent
            .iter()
            .filter(|s| s.severity == Severity::High)
            .count()
            >= threshold
    }

    /// Count of errors recorded for one source and kind.
    pub fn count(&self, source: WebhookSource, kind: ErrorKind) -> u64 {
        self.lock().counts.get(&(source, kind)).copied().unwrap_or(0)
    }
}

#[cfg(test)]
#[path = "observability_tests.rs"]
mod tests;
