//! Circuit breaker implementation.
//!
//! State lives behind a `std::sync::RwLock` that is never held across an
//! await point. Cooldowns are measured with `tokio::time::Instant` so tests
//! can drive them with paused time.

use std::future::Future;
use std::sync::{Arc, PoisonError, RwLock, RwLockWriteGuard};
use tokio::time::{timeout, Instant};
use tracing::{info, warn};

use super::{CircuitBreakerConfig, CircuitBreakerError, CircuitMetrics, CircuitState};
use crate::monitoring::{MetricsCollector, NoOpMetricsCollector};
use crate::Timestamp;

// ============================================================================
// Internal State
// ============================================================================

#[derive(Debug)]
struct InternalState {
    current_state: CircuitState,

    consecutive_failures: u32,

    /// Successful trials since entering half-open
    consecutive_successes: u32,

    /// A half-open trial is currently running
    trial_in_flight: bool,

    /// Monotonic time of the most recent failure, drives the cooldown
    last_failure_at: Option<Instant>,

    last_failure_time: Option<Timestamp>,

    last_state_change: Timestamp,

    total_requests: u64,
    successful_requests: u64,
    failed_requests: u64,
    rejected_requests: u64,
}

impl InternalState {
    fn new() -> Self {
        Self {
            current_state: CircuitState::Closed,
            consecutive_failures: 0,
            consecutive_successes: 0,
            trial_in_flight: false,
            last_failure_at: None,
            last_failure_time: None,
            last_state_change: Timestamp::now(),
            total_requests: 0,
            successful_requests: 0,
            failed_requests: 0,
            rejected_requests: 0,
        }
    }
}

/// Permission to run one operation. A trial that is dropped before it
/// settles (for example because the calling task was cancelled) releases
/// the half-open slot.
struct Admission<'a> {
    breaker: &'a CircuitBreaker,
    trial: bool,
    settled: bool,
}

impl Drop for Admission<'_> {
    fn drop(&mut self) {
        if self.trial && !self.settled {
            self.breaker.write_state().trial_in_flight = false;
        }
    }
}

// ============================================================================
// Circuit Breaker
// ============================================================================

/// Breaker guarding one named downstream dependency.
pub struct CircuitBreaker {
    name: String,
    config: CircuitBreakerConfig,
    state: RwLock<InternalState>,
    metrics: Arc<dyn MetricsCollector>,
}

impl std::fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("name", &self.name)
            .field("config", &self.config)
            .field("state", &self.state())
            .finish()
    }
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self::with_metrics(name, config, Arc::new(NoOpMetricsCollector))
    }

    /// Create a breaker that reports state changes to `metrics`.
    pub fn with_metrics(
        name: impl Into<String>,
        config: CircuitBreakerConfig,
        metrics: Arc<dyn MetricsCollector>,
    ) -> Self {
        Self {
            name: name.into(),
            config,
            state: RwLock::new(InternalState::new()),
            metrics,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    /// Run `operation` under breaker protection.
    ///
    /// While open the operation is never invoked and
    /// [`CircuitBreakerError::CircuitOpen`] is returned.
    pub async fn execute<T, E, F, Fut>(&self, operation: F) -> Result<T, CircuitBreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let mut admission = self.admit().ok_or_else(|| CircuitBreakerError::CircuitOpen {
            name: self.name.clone(),
        })?;

        let result = timeout(self.config.operation_timeout, operation()).await;

        match result {
            Ok(Ok(value)) => {
                self.record_success(&mut admission);
                Ok(value)
            }
            Ok(Err(e)) => {
                self.record_failure(&mut admission);
                Err(CircuitBreakerError::OperationFailed(e))
            }
            Err(_) => {
                self.record_failure(&mut admission);
                Err(CircuitBreakerError::Timeout {
                    timeout_ms: self.config.operation_timeout.as_millis() as u64,
                })
            }
        }
    }

    /// Current state. An open breaker whose cooldown has elapsed still
    /// reports open until the next call moves it to half-open.
    pub fn state(&self) -> CircuitState {
        self.state
            .read()
            .map(|state| state.current_state)
            .unwrap_or(CircuitState::Open) // Fail-safe: treat lock poisoning as open
    }

    pub fn metrics(&self) -> CircuitMetrics {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);

        CircuitMetrics {
            name: self.name.clone(),
            state: state.current_state,
            total_requests: state.total_requests,
            successful_requests: state.successful_requests,
            failed_requests: state.failed_requests,
            rejected_requests: state.rejected_requests,
            consecutive_failures: state.consecutive_failures,
            last_state_change: state.last_state_change,
            last_failure_time: state.last_failure_time,
        }
    }

    /// Force the breaker closed and clear all counters (operator action).
    pub fn reset(&self) {
        let mut state = self.write_state();
        let previous = state.current_state;
        *state = InternalState::new();
        drop(state);

        info!(circuit = %self.name, previous_state = %previous, "Circuit breaker reset");
        self.metrics.record_circuit_state(&self.name, CircuitState::Closed);
    }

    fn write_state(&self) -> RwLockWriteGuard<'_, InternalState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Decide whether a call may proceed, moving open to half-open once the
    /// cooldown has elapsed.
    fn admit(&self) -> Option<Admission<'_>> {
        let mut state = self.write_state();

        let trial = match state.current_state {
            CircuitState::Closed => false,
            CircuitState::Open => {
                let cooled_down = state
                    .last_failure_at
                    .map_or(true, |at| at.elapsed() >= self.config.recovery_timeout);
                if !cooled_down {
                    state.rejected_requests += 1;
                    return None;
                }
                self.transition(&mut state, CircuitState::HalfOpen);
                state.consecutive_successes = 0;
                state.trial_in_flight = true;
                true
            }
            CircuitState::HalfOpen => {
                if state.trial_in_flight {
                    state.rejected_requests += 1;
                    return None;
                }
                state.trial_in_flight = true;
                true
            }
        };

        Some(Admission {
            breaker: self,
            trial,
            settled: false,
        })
    }

    fn record_success(&self, admission: &mut Admission<'_>) {
        let mut state = self.write_state();
        admission.settled = true;

        state.total_requests += 1;
        state.successful_requests += 1;
        state.consecutive_failures = 0;

        if admission.trial {
            state.trial_in_flight = false;
            if state.current_state == CircuitState::HalfOpen {
                state.consecutive_successes += 1;
                if state.consecutive_successes >= self.config.success_threshold.max(1) {
                    state.consecutive_successes = 0;
                    self.transition(&mut state, CircuitState::Closed);
                }
            }
        }
    }

    fn record_failure(&self, admission: &mut Admission<'_>) {
        let mut state = self.write_state();
        admission.settled = true;

        state.total_requests += 1;
        state.failed_requests += 1;
        state.consecutive_failures = state.consecutive_failures.saturating_add(1);
        state.consecutive_successes = 0;
        state.last_failure_at = Some(Instant::now());
        state.last_failure_time = Some(Timestamp::now());

        if admission.trial {
            state.trial_in_flight = false;
            if state.current_state == CircuitState::HalfOpen {
                self.transition(&mut state, CircuitState::Open);
            }
            return;
        }

        if state.current_state == CircuitState::Closed
            && state.consecutive_failures >= self.config.failure_threshold.max(1)
        {
            self.transition(&mut state, CircuitState::Open);
        }
    }

    fn transition(&self, state: &mut InternalState, to: CircuitState) {
        let from = state.current_state;
        if from == to {
            return;
        }
        state.current_state = to;
        state.last_state_change = Timestamp::now();

        match to {
            CircuitState::Open => warn!(
                circuit = %self.name,
                from = %from,
                consecutive_failures = state.consecutive_failures,
                "Circuit breaker opened"
            ),
            _ => info!(circuit = %self.name, from = %from, to = %to, "Circuit breaker state changed"),
        }
        self.metrics.record_circuit_state(&self.name, to);
    }
}

#[cfg(test)]
#[path = "breaker_tests.rs"]
mod tests;
