//! Circuit breaker protecting downstream dependencies.
//!
//! One breaker exists per downstream dependency, held in a
//! [`CircuitBreakerRegistry`]. State is process-local and resets on restart.
//!
//! # Circuit Breaker States
//!
//! - **Closed**: operations pass through; consecutive failures are counted
//! - **Open**: operations are rejected without being invoked
//! - **Half-Open**: one trial operation at a time decides between closed
//!   and open
//!
//! ```text
//! Closed ──(failures ≥ threshold)──► Open ──(recovery timeout)──► HalfOpen
//!   ▲                                  ▲                            │
//!   └──────────(success)───────────────┼────────────────────────────┤
//!                                      └─────────(failure)──────────┘
//! ```
//!
//! # Example
//!
//! ```rust
//! use hookwarden_core::circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitState};
//!
//! # tokio_test::block_on(async {
//! let breaker = CircuitBreaker::new("billing-api", CircuitBreakerConfig::default());
//! let result: Result<u32, _> = breaker.execute(|| async { Ok::<_, std::io::Error>(7) }).await;
//! assert_eq!(result.unwrap(), 7);
//! assert_eq!(breaker.state(), CircuitState::Closed);
//! # });
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use thiserror::Error;

use crate::{Classify, ErrorKind, Timestamp};

mod breaker;
mod registry;

pub use breaker::CircuitBreaker;
pub use registry::CircuitBreakerRegistry;

// ============================================================================
// Circuit State
// ============================================================================

/// Current state of the circuit breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    /// Normal operation, tracking failures.
    #[default]
    Closed,

    /// Fast-fail mode after consecutive failures reached the threshold.
    Open,

    /// Testing recovery with a single trial operation.
    HalfOpen,
}

impl CircuitState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Closed => "closed",
            Self::Open => "open",
            Self::HalfOpen => "half_open",
        }
    }

    /// Numeric value for gauges: 0 closed, 1 open, 2 half-open.
    pub fn as_gauge_value(&self) -> i64 {
        match self {
            Self::Closed => 0,
            Self::Open => 1,
            Self::HalfOpen => 2,
        }
    }

    /// Check if requests are allowed in current state.
    pub fn allows_requests(&self) -> bool {
        matches!(self, Self::Closed | Self::HalfOpen)
    }
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Circuit Breaker Configuration
// ============================================================================

/// Configuration for circuit breaker behavior.
///
/// # Default Configuration
///
/// - Failure threshold: 5 consecutive failures
/// - Recovery timeout: 60 seconds
/// - Success threshold: 1 trial success closes the circuit
/// - Operation timeout: 30 seconds
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CircuitBreakerConfig {
    /// Number of consecutive failures to trip circuit.
    pub failure_threshold: u32,

    /// Time since the last failure before a trial call is allowed.
    pub recovery_timeout: Duration,

    /// Successful half-open trials needed to close the circuit.
    pub success_threshold: u32,

    /// Upper bound on one protected operation. Exceeding it counts as a failure.
    pub operation_timeout: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            recovery_timeout: Duration::from_millis(60_000),
            success_threshold: 1,
            operation_timeout: Duration::from_secs(30),
        }
    }
}

impl CircuitBreakerConfig {
    pub fn with_failure_threshold(mut self, threshold: u32) -> Self {
        self.failure_threshold = threshold;
        self
    }

    pub fn with_recovery_timeout(mut self, timeout: Duration) -> Self {
        self.recovery_timeout = timeout;
        self
    }

    pub fn with_success_threshold(mut self, threshold: u32) -> Self {
        self.success_threshold = threshold;
        self
    }

    pub fn with_operation_timeout(mut self, timeout: Duration) -> Self {
        self.operation_timeout = timeout;
        self
    }
}

// ============================================================================
// Circuit Metrics
// ============================================================================

/// Point-in-time view of one breaker, for health checks and operators.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CircuitMetrics {
    /// Dependency the breaker protects.
    pub name: String,

    pub state: CircuitState,

    /// Operations actually invoked.
    pub total_requests: u64,

    pub successful_requests: u64,

    pub failed_requests: u64,

    /// Calls rejected without invoking the operation.
    pub rejected_requests: u64,

    pub consecutive_failures: u32,

    pub last_state_change: Timestamp,

    /// Wall-clock time of the most recent failure.
    pub last_failure_time: Option<Timestamp>,
}

impl CircuitMetrics {
    /// Failure rate from 0.0 to 1.0, or 0.0 if nothing ran yet.
    pub fn failure_rate(&self) -> f64 {
        if self.total_requests == 0 {
            0.0
        } else {
            self.failed_requests as f64 / self.total_requests as f64
        }
    }
}

// ============================================================================
// Circuit Breaker Error
// ============================================================================

/// Errors returned by [`CircuitBreaker::execute`].
#[derive(Debug, Error)]
pub enum CircuitBreakerError<E> {
    /// The breaker rejected the call without invoking the operation.
    #[error("Circuit breaker '{name}' is open")]
    CircuitOpen { name: String },

    /// The operation did not complete within the configured bound.
    #[error("Operation timeout after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    /// The operation ran and failed.
    #[error("{0}")]
    OperationFailed(E),
}

impl<E> CircuitBreakerError<E> {
    /// Check if the error came from the breaker rather than the operation.
    pub fn is_circuit_protection(&self) -> bool {
        matches!(self, Self::CircuitOpen { .. })
    }
}

impl<E: Classify> Classify for CircuitBreakerError<E> {
    fn kind(&self) -> ErrorKind {
        match self {
            Self::CircuitOpen { .. } => ErrorKind::CircuitOpen,
            Self::Timeout { .. } => ErrorKind::Timeout,
            Self::OperationFailed(e) => e.kind(),
        }
    }
}

#[cfg(test)]
#[path = "mod_tests.rs"]
mod tests;
