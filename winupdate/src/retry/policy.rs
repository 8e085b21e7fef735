//! Retry policy with configurable backoff and jitter.

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Backoff strategy for retry delays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackoffStrategy {
    /// delay = base (constant)
    #[default]
    Constant,
    /// delay = base * attempt
    Linear,
    /// delay = base * 2^(attempt - 1)
    Exponential,
}

/// Jitter strategy applied on top of the backoff delay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JitterStrategy {
    /// No jitter
    #[default]
    None,
    /// Random from 0 to delay
    Full,
    /// Half fixed, half random
    Equal,
}

/// Attempt and time budget for one retryable operation.
///
/// Staging and execution each own an independent policy; nothing is shared
/// between them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Maximum attempts including the first one.
    pub max_attempts: u32,
    /// Wall-clock budget for all attempts combined. Zero means unbounded.
    pub overall_timeout: Duration,
    /// Base delay between attempts.
    pub base_delay: Duration,
    /// Cap for computed delays.
    pub max_delay: Duration,
    /// Backoff strategy.
    pub backoff: BackoffStrategy,
    /// Jitter strategy.
    pub jitter: JitterStrategy,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            overall_timeout: Duration::from_secs(300),
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            backoff: BackoffStrategy::Constant,
            jitter: JitterStrategy::None,
        }
    }
}

impl RetryPolicy {
    /// Creates a policy with the given attempt and time budgets.
    #[must_use]
    pub fn new(max_attempts: u32, overall_timeout: Duration) -> Self {
        Self {
            max_attempts,
            overall_timeout,
            ..Self::default()
        }
    }

    /// Sets the base delay between attempts.
    #[must_use]
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.base_delay = delay;
        self
    }

    /// Sets the maximum computed delay.
    #[must_use]
    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Sets the backoff strategy.
    #[must_use]
    pub fn with_backoff(mut self, strategy: BackoffStrategy) -> Self {
        self.backoff = strategy;
        self
    }

    /// Sets the jitter strategy.
    #[must_use]
    pub fn with_jitter(mut self, strategy: JitterStrategy) -> Self {
        self.jitter = strategy;
        self
    }

    /// Returns the number of attempts the runner will make (at least one).
    #[must_use]
    pub fn effective_attempts(&self) -> u32 {
        self.max_attempts.max(1)
    }

    /// Returns the overall deadline budget, or `None` when unbounded.
    #[must_use]
    pub fn budget(&self) -> Option<Duration> {
        (!self.overall_timeout.is_zero()).then_some(self.overall_timeout)
    }

    /// Calculates the delay to wait after the given (1-based) attempt failed.
    #[must_use]
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let attempt = attempt.max(1);
        let base = self.base_delay;

        let delay = match self.backoff {
            BackoffStrategy::Constant => base,
            BackoffStrategy::Linear => base.saturating_mul(attempt).min(self.max_delay.max(base)),
            BackoffStrategy::Exponential => {
                let factor = 2u32.saturating_pow(attempt - 1);
                base.saturating_mul(factor).min(self.max_delay.max(base))
            }
        };

        self.apply_jitter(delay)
    }

    fn apply_jitter(&self, delay: Duration) -> Duration {
        let millis = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);
        if millis == 0 {
            return delay;
        }

        match self.jitter {
            JitterStrategy::None => delay,
            JitterStrategy::Full => Duration::from_millis(rand::thread_rng().gen_range(0..=millis)),
            JitterStrategy::Equal => {
                let half = millis / 2;
                Duration::from_millis(half + rand::thread_rng().gen_range(0..=half))
            }
        }
    }
}
