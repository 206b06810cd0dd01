//! Fixed-window rate limiting for inbound webhook endpoints.
//!
//! Each key (typically `"{source}:{partial signature}"`) gets a counter that
//! resets when its window expires. Bursts up to the ceiling are tolerated
//! within a window. State is process-local: a fleet of instances enforces
//! the limit per instance, not globally.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

/// Minimum spacing between opportunistic sweeps of expired windows.
const SWEEP_INTERVAL: Duration = Duration::from_secs(1);

/// Counter for one key within one window.
#[derive(Debug, Clone, Copy)]
struct RateLimitWindow {
    count: u32,
    reset_at: Instant,
}

#[derive(Debug)]
struct LimiterState {
    windows: HashMap<String, RateLimitWindow>,
    last_sweep: Instant,
}

/// Fixed-window request counter keyed by an opaque string.
///
/// Construct one per process and share it by `Arc`.
#[derive(Debug)]
pub struct RateLimiter {
    state: Mutex<LimiterState>,
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new()
    }
}

impl RateLimiter {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(LimiterState {
                windows: HashMap::new(),
                last_sweep: Instant::now(),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, LimiterState> {
        // The map is consistent after every statement, a poisoned lock is safe to reuse
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Record a request for `key` and report whether it is allowed.
    ///
    /// The first `max_requests` calls within `window` are allowed. Denied
    /// calls do not advance the counter. A zero `max_requests` denies
    /// everything.
    pub fn allow(&self, key: &str, max_requests: u32, window: Duration) -> bool {
        self.allow_at(key, max_requests, window, Instant::now())
    }

    /// [`allow`](Self::allow) evaluated at an explicit instant.
    pub fn allow_at(&self, key: &str, max_requests: u32, window: Duration, now: Instant) -> bool {
        if max_requests == 0 {
            return false;
        }

        let mut state = self.lock();
        Self::sweep_expired(&mut state, now);

        match state.windows.get_mut(key) {
            Some(current) if now < current.reset_at => {
                if current.count >= max_requests {
                    debug!(key = %key, count = current.count, "Rate limit exceeded");
                    false
                } else {
                    current.count += 1;
                    true
                }
            }
            _ => {
                state.windows.insert(
                    key.to_string(),
                    RateLimitWindow {
                        count: 1,
                        reset_at: now + window,
                    },
                );
                true
            }
        }
    }

    /// Time until the window for `key` resets, if one is active.
    pub fn retry_after(&self, key: &str) -> Option<Duration> {
        let now = Instant::now();
        let state = self.lock();
        state
            .windows
            .get(key)
            .filter(|w| now < w.reset_at)
            .map(|w| w.reset_at - now)
    }

    /// Number of keys currently tracked, expired or not.
    pub fn tracked_keys(&self) -> usize {
        self.lock().windows.len()
    }

    fn sweep_expired(state: &mut LimiterState, now: Instant) {
        if now.saturating_duration_since(state.last_sweep) < SWEEP_INTERVAL {
            return;
        }
        let before = state.windows.len();
        state.windows.retain(|_, w| now < w.reset_at);
        state.last_sweep = now;

        let removed = before - state.windows.len();
        if removed > 0 {
            debug!(removed, "Swept expired rate limit windows");
        }
    }
}

#[cfg(test)]
#[path = "rate_limiter_tests.rs"]
mod tests;
