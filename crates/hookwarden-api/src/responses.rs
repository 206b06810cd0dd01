//! Response types and query parameters for the health and admin routes.

use hookwarden_core::{
    CircuitMetrics, CircuitState, DispatchOutcome, ErrorSummary, LedgerStats, Timestamp,
    WebhookEvent, WebhookSource,
};
use serde::{Deserialize, Serialize};

/// Default page size for event listings.
pub const DEFAULT_LIST_LIMIT: usize = 50;

/// Largest page size accepted for event listings.
pub const MAX_LIST_LIMIT: usize = 500;

// ============================================================================
// Health
// ============================================================================

/// Liveness response
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub timestamp: Timestamp,
    pub uptime_seconds: u64,
}

/// Deep health response with breaker, error and ledger state
#[derive(Debug, Serialize)]
pub struct DeepHealthResponse {
    /// `healthy` or `degraded`
    pub status: String,
    pub timestamp: Timestamp,
    pub circuits: Vec<CircuitMetrics>,
    pub errors: ErrorSummary,
    /// `None` when the ledger could not be queried
    pub ledger: Option<LedgerStats>,
}

/// Readiness check response
#[derive(Debug, Serialize, Deserialize)]
pub struct ReadinessResponse {
    pub ready: bool,
    pub timestamp: Timestamp,
}

// ============================================================================
// Admin
// ============================================================================

/// Query parameters for event listings
#[derive(Debug, Default, Deserialize)]
pub struct EventListParams {
    pub source: Option<WebhookSource>,
    pub limit: Option<usize>,
}

impl EventListParams {
    /// Requested limit, defaulted and clamped to [`MAX_LIST_LIMIT`].
    pub fn effective_limit(&self) -> usize {
        self.limit
            .unwrap_or(DEFAULT_LIST_LIMIT)
            .clamp(1, MAX_LIST_LIMIT)
    }
}

/// Event list response
#[derive(Debug, Serialize)]
pub struct EventListResponse {
    pub events: Vec<WebhookEvent>,
    pub count: usize,
}

impl From<Vec<WebhookEvent>> for EventListResponse {
    fn from(events: Vec<WebhookEvent>) -> Self {
        Self {
            count: events.len(),
            events,
        }
    }
}

/// Result of an operator retry
#[derive(Debug, Serialize)]
pub struct RetryResponse {
    #[serde(flatten)]
    pub outcome: DispatchOutcome,
    pub timestamp: Timestamp,
}

/// Circuit breaker listing
#[derive(Debug, Serialize)]
pub struct CircuitListResponse {
    pub circuits: Vec<CircuitMetrics>,
}

/// Result of resetting one breaker
#[derive(Debug, Serialize)]
pub struct CircuitResetResponse {
    pub name: String,
    pub state: CircuitState,
    pub timestamp: Timestamp,
}
