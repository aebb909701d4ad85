use crate::core::DriverError;
use crate::driver::config::ConfigError;
use rand::Rng;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

pub const DEFAULT_MAX_RETRIES: u32 = 4;
pub const DEFAULT_BACKOFF_BASE: Duration = Duration::from_millis(10);
pub const DEFAULT_BACKOFF_CAP: Duration = Duration::from_millis(5000);

/// What a backoff strategy gets to look at.
#[derive(Debug, Clone, Copy)]
pub struct RetryContext<'a> {
    /// 1 for the first retry.
    pub retry_attempt: u32,
    pub last_error: &'a DriverError,
}

/// Computes how long to sleep before a retry.
pub trait BackoffStrategy: Send + Sync + fmt::Debug {
    fn calculate_delay(&self, context: &RetryContext<'_>) -> Duration;
}

/// Exponential backoff with jitter.
///
/// The ceiling for retry `n` is `min(cap, base * 2^(n-1))` and the delay is
/// drawn uniformly from the upper half of `[0, ceiling]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExponentialBackoffStrategy {
    base: Duration,
    cap: Duration,
}

impl ExponentialBackoffStrategy {
    pub fn new(base: Duration, cap: Duration) -> Result<Self, ConfigError> {
        if base.is_zero() {
            return Err(ConfigError::InvalidBackoff("base delay must be positive".into()));
        }
        if base > cap {
            return Err(ConfigError::InvalidBackoff(format!(
                "base delay {:?} exceeds cap {:?}",
                base, cap
            )));
        }
        Ok(Self { base, cap })
    }

    pub fn base(&self) -> Duration {
        self.base
    }

    pub fn cap(&self) -> Duration {
        self.cap
    }

    /// Upper bound of the delay for `retry_attempt`.
    pub fn ceiling(&self, retry_attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(retry_attempt.saturating_sub(1));
        self.base.saturating_mul(factor).min(self.cap)
    }
}

impl Default for ExponentialBackoffStrategy {
    fn default() -> Self {
        Self {
            base: DEFAULT_BACKOFF_BASE,
            cap: DEFAULT_BACKOFF_CAP,
        }
    }
}

impl BackoffStrategy for ExponentialBackoffStrategy {
    fn calculate_delay(&self, context: &RetryContext<'_>) -> Duration {
        let upper = self.ceiling(context.retry_attempt).as_micros() as u64;
        let lower = upper / 2;
        Duration::from_micros(rand::thread_rng().gen_range(lower..=upper))
    }
}

/// How many times to retry and how long to wait in between.
#[derive(Clone)]
pub struct RetryPolicy {
    max_retries: u32,
    backoff: Arc<dyn BackoffStrategy>,
}

impl RetryPolicy {
    pub fn new(max_retries: u32, backoff: Arc<dyn BackoffStrategy>) -> Self {
        Self {
            max_retries,
            backoff,
        }
    }

    /// Default backoff with a different retry limit.
    pub fn with_max_retries(max_retries: u32) -> Self {
        Self {
            max_retries,
            ..Self::default()
        }
    }

    /// A policy that never retries.
    pub fn none() -> Self {
        Self::with_max_retries(0)
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    pub fn backoff(&self) -> &dyn BackoffStrategy {
        self.backoff.as_ref()
    }

    pub(crate) fn backoff_arc(&self) -> Arc<dyn BackoffStrategy> {
        Arc::clone(&self.backoff)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            backoff: Arc::new(ExponentialBackoffStrategy::default()),
        }
    }
}

impl fmt::Debug for RetryPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("max_retries", &self.max_retries)
            .field("backoff", &self.backoff)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_rejects_bad_bounds() {
        assert!(ExponentialBackoffStrategy::new(Duration::ZERO, Duration::from_secs(1)).is_err());
        assert!(
            ExponentialBackoffStrategy::new(Duration::from_secs(2), Duration::from_secs(1))
                .is_err()
        );
        assert!(
            ExponentialBackoffStrategy::new(Duration::from_millis(5), Duration::from_millis(5))
                .is_ok()
        );
    }

    #[test]
    fn test_delay_stays_in_jitter_window() {
        let strategy =
            ExponentialBackoffStrategy::new(Duration::from_millis(10), Duration::from_millis(200))
                .unwrap();
        let error = DriverError::DriverClosed;

        for attempt in 1..=8 {
            let ceiling = strategy.ceiling(attempt);
            let delay = strategy.calculate_delay(&RetryContext {
                retry_attempt: attempt,
                last_error: &error,
            });
            assert!(delay <= ceiling, "attempt {attempt}: {delay:?} > {ceiling:?}");
            assert!(delay >= ceiling / 2, "attempt {attempt}: {delay:?} < half of {ceiling:?}");
        }
    }

    #[test]
    fn test_ceiling_doubles_until_cap() {
        let strategy =
            ExponentialBackoffStrategy::new(Duration::from_millis(10), Duration::from_millis(50))
                .unwrap();
        assert_eq!(strategy.ceiling(1), Duration::from_millis(10));
        assert_eq!(strategy.ceiling(2), Duration::from_millis(20));
        assert_eq!(strategy.ceiling(3), Duration::from_millis(40));
        assert_eq!(strategy.ceiling(4), Duration::from_millis(50));
        assert_eq!(strategy.ceiling(60), Duration::from_millis(50));
    }

    #[test]
    fn test_default_policy() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_retries(), DEFAULT_MAX_RETRIES);
        assert_eq!(RetryPolicy::none().max_retries(), 0);
    }
}
