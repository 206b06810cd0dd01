//! # Retry/Backoff Engine
//!
//! Re-attempts a fallible async operation with exponential backoff.
//!
//! Each failure is classified through [`Classify`]. Kinds outside the
//! configured retryable set end the loop immediately; retryable kinds are
//! attempted again after `min(base * factor^(attempt-1), max)`, perturbed by
//! ±10% when jitter is enabled. Sleeps use [`tokio::time::sleep`] and only
//! suspend the calling task.

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

use crate::{Classify, ErrorKind};

/// Jitter range as a fraction of the computed delay.
const JITTER_FRACTION: f64 = 0.10;

/// Named retry configurations, chosen per operation criticality.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RetryPreset {
    #[default]
    Default,
    Aggressive,
    Conservative,
}

impl RetryPreset {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Default => "default",
            Self::Aggressive => "aggressive",
            Self::Conservative => "conservative",
        }
    }

    /// Build the configuration this preset describes.
    pub fn config(&self) -> RetryConfig {
        match self {
            Self::Default => RetryConfig::default(),
            Self::Aggressive => RetryConfig::aggressive(),
            Self::Conservative => RetryConfig::conservative(),
        }
    }
}

impl fmt::Display for RetryPreset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Retry configuration for exponential backoff
///
/// # Examples
///
/// ```rust
/// use hookwarden_core::retry::RetryConfig;
/// use std::time::Duration;
///
/// let config = RetryConfig::default().without_jitter();
/// assert_eq!(config.calculate_delay(1), Duration::from_secs(1));
/// assert_eq!(config.calculate_delay(2), Duration::from_secs(2));
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct RetryConfig {
    /// Total attempts including the first one
    pub max_attempts: u32,

    /// Delay before the second attempt
    pub base_delay: Duration,

    /// Upper bound on any single delay
    pub max_delay: Duration,

    /// Exponential growth factor
    pub backoff_factor: f64,

    /// Perturb delays by ±10%
    pub jitter: bool,

    /// Error kinds worth another attempt
    pub retryable: HashSet<ErrorKind>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            backoff_factor: 2.0,
            jitter: true,
            retryable: HashSet::from([
                ErrorKind::Network,
                ErrorKind::Timeout,
                ErrorKind::ServerError,
                ErrorKind::RateLimited,
            ]),
        }
    }
}

impl RetryConfig {
    /// More attempts, shorter delays, and conflicts treated as retryable.
    pub fn aggressive() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(10),
            backoff_factor: 1.5,
            jitter: true,
            retryable: HashSet::from([
                ErrorKind::Network,
                ErrorKind::Timeout,
                ErrorKind::ServerError,
                ErrorKind::RateLimited,
                ErrorKind::Conflict,
            ]),
        }
    }

    /// Two attempts, long delays, connectivity failures only.
    pub fn conservative() -> Self {
        Self {
            max_attempts: 2,
            base_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(60),
            backoff_factor: 3.0,
            jitter: false,
            retryable: HashSet::from([ErrorKind::Network, ErrorKind::Timeout]),
        }
    }

    /// Disable jitter
    pub fn without_jitter(mut self) -> Self {
        self.jitter = false;
        self
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    pub fn with_base_delay(mut self, base_delay: Duration) -> Self {
        self.base_delay = base_delay;
        self
    }

    /// Check if another attempt may help for this kind of failure
    pub fn is_retryable(&self, kind: ErrorKind) -> bool {
        self.retryable.contains(&kind)
    }

    /// Delay to wait after failed attempt number `attempt` (1-based).
    pub fn calculate_delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
        let base_secs = self.base_delay.as_secs_f64() * self.backoff_factor.powi(exponent);
        let capped_secs = base_secs.min(self.max_delay.as_secs_f64());

        let final_secs = if self.jitter {
            Self::add_jitter(capped_secs)
        } else {
            capped_secs
        };

        Duration::from_secs_f64(final_secs)
    }

    fn add_jitter(delay_secs: f64) -> f64 {
        let jitter_range = delay_secs * JITTER_FRACTION;
        if jitter_range <= 0.0 {
            return delay_secs;
        }
        let jitter = rand::thread_rng().gen_range(-jitter_range..=jitter_range);
        (delay_secs + jitter).max(0.0)
    }
}

/// Final failure of [`retry_with_backoff`].
///
/// Carries the last error seen and how many times the operation ran.
#[derive(Debug, thiserror::Error)]
#[error("{error} (after {attempts} attempt(s))")]
pub struct RetryExhausted<E: fmt::Display + fmt::Debug> {
    pub error: E,
    pub attempts: u32,
}

impl<E: fmt::Display + fmt::Debug> RetryExhausted<E> {
    pub fn into_inner(self) -> E {
        self.error
    }
}

impl<E: Classify + fmt::Display + fmt::Debug> Classify for RetryExhausted<E> {
    fn kind(&self) -> ErrorKind {
        self.error.kind()
    }
}

/// Run `operation` until it succeeds, fails with a non-retryable error, or
/// `config.max_attempts` attempts have been made.
///
/// The closure receives the 1-based attempt number.
///
/// # Examples
///
/// ```rust
/// use hookwarden_core::retry::{retry_with_backoff, RetryConfig};
/// use hookwarden_core::{Classify, ErrorKind};
///
/// #[derive(Debug)]
/// struct Unavailable;
/// impl std::fmt::Display for Unavailable {
///     fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
///         f.write_str("unavailable")
///     }
/// }
/// impl Classify for Unavailable {
///     fn kind(&self) -> ErrorKind {
///         ErrorKind::ServerError
///     }
/// }
///
/// # tokio_test::block_on(async {
/// let config = RetryConfig::default().with_base_delay(std::time::Duration::ZERO);
/// let result = retry_with_backoff(
///     |attempt| async move { if attempt < 2 { Err(Unavailable) } else { Ok(attempt) } },
///     &config,
///     "example",
/// )
/// .await;
/// assert_eq!(result.unwrap(), 2);
/// # });
/// ```
pub async fn retry_with_backoff<T, E, F, Fut>(
    mut operation: F,
    config: &RetryConfig,
    context: &str,
) -> Result<T, RetryExhausted<E>>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Classify + fmt::Display + fmt::Debug,
{
    let max_attempts = config.max_attempts.max(1);
    let mut attempt = 1;

    loop {
        match operation(attempt).await {
            Ok(value) => {
                if attempt > 1 {
                    debug!(context = %context, attempt = attempt, "Operation succeeded after retry");
                }
                return Ok(value);
            }
            Err(error) => {
                let kind = error.kind();

                if !config.is_retryable(kind) {
                    debug!(
                        context = %context,
                        attempt = attempt,
                        error_kind = %kind,
                        error = %error,
                        "Non-retryable failure"
                    );
                    return Err(RetryExhausted {
                        error,
                        attempts: attempt,
                    });
                }

                if attempt >= max_attempts {
                    warn!(
                        context = %context,
                        attempts = attempt,
                        error_kind = %kind,
                        error = %error,
                        "Retry attempts exhausted"
                    );
                    return Err(RetryExhausted {
                        error,
                        attempts: attempt,
                    });
                }

                let delay = config.calculate_delay(attempt);
                warn!(
                    context = %context,
                    attempt = attempt,
                    max_attempts = max_attempts,
                    error_kind = %kind,
                    error = %error,
                    delay_ms = delay.as_millis() as u64,
                    "Attempt failed, backing off"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}

#[cfg(test)]
#[path = "retry_tests.rs"]
mod tests;
