//! Registry of per-dependency circuit breakers.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use super::{CircuitBreaker, CircuitBreakerConfig, CircuitMetrics, CircuitState};
use crate::monitoring::{MetricsCollector, NoOpMetricsCollector};

/// Hands out one shared [`CircuitBreaker`] per dependency name.
///
/// Breakers are created lazily from a common configuration the first time a
/// name is requested.
pub struct CircuitBreakerRegistry {
    config: CircuitBreakerConfig,
    breakers: RwLock<HashMap<String, Arc<CircuitBreaker>>>,
    metrics: Arc<dyn MetricsCollector>,
}

impl std::fmt::Debug for CircuitBreakerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CircuitBreakerRegistry")
            .field("config", &self.config)
            .field("breakers", &self.names())
            .finish()
    }
}

impl Default for CircuitBreakerRegistry {
    fn default() -> Self {
        Self::new(CircuitBreakerConfig::default())
    }
}

impl CircuitBreakerRegistry {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self::with_metrics(config, Arc::new(NoOpMetricsCollector))
    }

    pub fn with_metrics(config: CircuitBreakerConfig, metrics: Arc<dyn MetricsCollector>) -> Self {
        Self {
            config,
            breakers: RwLock::new(HashMap::new()),
            metrics,
        }
    }

    /// Get the breaker for `name`, creating it if needed.
    pub fn get_or_create(&self, name: &str) -> Arc<CircuitBreaker> {
        if let Some(breaker) = self.get(name) {
            return breaker;
        }

        let mut breakers = self.breakers.write().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(breakers.entry(name.to_string()).or_insert_with(|| {
            Arc::new(CircuitBreaker::with_metrics(
                name,
                self.config.clone(),
                Arc::clone(&self.metrics),
            ))
        }))
    }

    pub fn get(&self, name: &str) -> Option<Arc<CircuitBreaker>> {
        self.breakers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
    }

    /// Names of every breaker created so far, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .breakers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        names.sort();
        names
    }

    /// Metrics of every breaker, sorted by name.
    pub fn snapshot(&self) -> Vec<CircuitMetrics> {
        let breakers: Vec<Arc<CircuitBreaker>> = self
            .breakers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect();

        let mut snapshot: Vec<CircuitMetrics> = breakers.iter().map(|b| b.metrics()).collect();
        snapshot.sort_by(|a, b| a.name.cmp(&b.name));
        snapshot
    }

    /// Whether any breaker currently rejects calls.
    pub fn any_open(&self) -> bool {
        self.snapshot()
            .iter()
            .any(|m| m.state == CircuitState::Open)
    }

    /// Reset the named breaker. Returns `false` if no such breaker exists.
    pub fn reset(&self, name: &str) -> bool {
        match self.get(name) {
            Some(breaker) => {
                breaker.reset();
                true
            }
            None => false,
        }
    }
}

#[cfg(test)]
#[path = "registry_tests.rs"]
mod tests;
