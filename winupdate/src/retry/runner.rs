//! The retry loop shared by staging and execution.

use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::RetryPolicy;
use crate::cancellation::CancellationToken;

/// A successful result together with the number of attempts it took.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryOutcome<T> {
    /// The value returned by the successful attempt.
    pub value: T,
    /// Attempts made, including the successful one.
    pub attempts: u32,
}

/// Error returned when a retried operation gives up.
#[derive(Debug)]
pub enum RetryError<E> {
    /// Every allowed attempt failed.
    Exhausted {
        /// The operation name.
        phase: &'static str,
        /// Attempts made.
        attempts: u32,
        /// The error of the final attempt.
        last: E,
    },
    /// The overall timeout elapsed, or would have elapsed while waiting.
    TimedOut {
        /// The operation name.
        phase: &'static str,
        /// Attempts started.
        attempts: u32,
        /// Time spent before giving up.
        elapsed: Duration,
        /// The error of the last completed attempt, if any completed.
        last: Option<E>,
    },
    /// Cancellation was requested.
    Cancelled {
        /// The operation name.
        phase: &'static str,
        /// Attempts started.
        attempts: u32,
        /// The cancellation reason.
        reason: String,
    },
}

impl<E> RetryError<E> {
    /// Returns the operation name.
    #[must_use]
    pub fn phase(&self) -> &'static str {
        match self {
            Self::Exhausted { phase, .. }
            | Self::TimedOut { phase, .. }
            | Self::Cancelled { phase, .. } => phase,
        }
    }

    /// Returns the number of attempts made.
    #[must_use]
    pub fn attempts(&self) -> u32 {
        match self {
            Self::Exhausted { attempts, .. }
            | Self::TimedOut { attempts, .. }
            | Self::Cancelled { attempts, .. } => *attempts,
        }
    }

    /// Returns the last underlying error, if one was observed.
    #[must_use]
    pub fn last_error(&self) -> Option<&E> {
        match self {
            Self::Exhausted { last, .. } => Some(last),
            Self::TimedOut { last, .. } => last.as_ref(),
            Self::Cancelled { .. } => None,
        }
    }

    /// Returns true if the overall timeout ended the loop.
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::TimedOut { .. })
    }

    /// Returns true if cancellation ended the loop.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled { .. })
    }
}

impl<E: std::fmt::Display> std::fmt::Display for RetryError<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Exhausted {
                phase,
                attempts,
                last,
            } => write!(f, "{phase} failed after {attempts} attempt(s): {last}"),
            Self::TimedOut {
                phase,
                attempts,
                elapsed,
                last: Some(last),
            } => write!(
                f,
                "{phase} timed out after {elapsed:?} and {attempts} attempt(s): {last}"
            ),
            Self::TimedOut {
                phase,
                attempts,
                elapsed,
                last: None,
            } => write!(
                f,
                "{phase} timed out after {elapsed:?} and {attempts} attempt(s)"
            ),
            Self::Cancelled {
                phase,
                attempts,
                reason,
            } => write!(f, "{phase} cancelled after {attempts} attempt(s): {reason}"),
        }
    }
}

impl<E> std::error::Error for RetryError<E>
where
    E: std::error::Error + 'static,
{
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.last_error().map(|e| e as &(dyn std::error::Error + 'static))
    }
}

async fn deadline_elapsed(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

fn cancelled<E>(phase: &'static str, attempts: u32, cancel: &CancellationToken) -> RetryError<E> {
    RetryError::Cancelled {
        phase,
        attempts,
        reason: cancel
            .reason()
            .unwrap_or_else(|| "cancelled".to_string()),
    }
}

/// Executes an operation under a retry policy.
///
/// The attempt function receives the 1-based attempt number. Any `Ok`
/// stops the loop; any `Err` is retried until the attempt budget or the
/// overall timeout runs out. The timeout also bounds an attempt that is
/// still running, and cancellation is observed before, during and between
/// attempts.
pub async fn run_with_retry<T, E, F, Fut>(
    phase: &'static str,
    policy: &RetryPolicy,
    cancel: &CancellationToken,
    mut attempt_fn: F,
) -> Result<RetryOutcome<T>, RetryError<E>>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let started = Instant::now();
    let deadline = policy.budget().map(|budget| started + budget);
    let max_attempts = policy.effective_attempts();
    let mut last: Option<E> = None;
    let mut attempt = 0;

    loop {
        if cancel.is_cancelled() {
            return Err(cancelled(phase, attempt, cancel));
        }

        attempt += 1;
        debug!(phase, attempt, max_attempts, "Starting attempt");

        let result = tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(cancelled(phase, attempt, cancel)),
            result = attempt_fn(attempt) => result,
            () = deadline_elapsed(deadline) => {
                warn!(phase, attempt, "Overall timeout elapsed during attempt");
                return Err(RetryError::TimedOut {
                    phase,
                    attempts: attempt,
                    elapsed: started.elapsed(),
                    last,
                });
            }
        };

        let err = match result {
            Ok(value) => {
                info!(phase, attempt, "Attempt succeeded");
                return Ok(RetryOutcome {
                    value,
                    attempts: attempt,
                });
            }
            Err(err) => err,
        };

        if attempt >= max_attempts {
            warn!(phase, attempt, error = %err, "Attempts exhausted");
            return Err(RetryError::Exhausted {
                phase,
                attempts: attempt,
                last: err,
            });
        }

        let delay = policy.delay_for(attempt);
        if deadline.is_some_and(|deadline| Instant::now() + delay > deadline) {
            warn!(phase, attempt, error = %err, "Overall timeout would elapse before next attempt");
            return Err(RetryError::TimedOut {
                phase,
                attempts: attempt,
                elapsed: started.elapsed(),
                last: Some(err),
            });
        }

        debug!(
            phase,
            attempt,
            delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
            error = %err,
            "Retrying after error"
        );
        last = Some(err);

        tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(cancelled(phase, attempt, cancel)),
            () = tokio::time::sleep(delay) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[derive(Debug, thiserror::Error, PartialEq, Eq)]
    #[error("attempt {0} failed")]
    struct AttemptFailed(u32);

    fn quick_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy::new(max_attempts, Duration::from_secs(60)).with_delay(Duration::from_millis(1))
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_first_try() {
        let cancel = CancellationToken::new();
        let mut calls = 0;

        let result: Result<_, RetryError<AttemptFailed>> =
            run_with_retry("test", &quick_policy(3), &cancel, |_| {
                calls += 1;
                async { Ok(42) }
            })
            .await;

        let outcome = result.unwrap();
        assert_eq!(outcome.value, 42);
        assert_eq!(outcome.attempts, 1);
        assert_eq!(calls, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_after_failures() {
        let cancel = CancellationToken::new();

        let result = run_with_retry("test", &quick_policy(5), &cancel, |attempt| async move {
            if attempt < 3 {
                Err(AttemptFailed(attempt))
            } else {
                Ok("done")
            }
        })
        .await;

        let outcome = result.unwrap();
        assert_eq!(outcome.value, "done");
        assert_eq!(outcome.attempts, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhaustion_keeps_last_error() {
        let cancel = CancellationToken::new();
        let calls = Arc::new(AtomicU32::new(0));

        let result: Result<RetryOutcome<()>, _> =
            run_with_retry("upload", &quick_policy(3), &cancel, |attempt| {
                let calls = Arc::clone(&calls);
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err(AttemptFailed(attempt))
                }
            })
            .await;

        let err = result.unwrap_err();
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(err.attempts(), 3);
        assert_eq!(err.last_error(), Some(&AttemptFailed(3)));
        assert_eq!(err.to_string(), "upload failed after 3 attempt(s): attempt 3 failed");

        let source = std::error::Error::source(&err).unwrap();
        assert_eq!(source.to_string(), "attempt 3 failed");
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_attempts_still_runs_once() {
        let cancel = CancellationToken::new();
        let policy = RetryPolicy::new(0, Duration::from_secs(1));

        let result: Result<RetryOutcome<()>, _> =
            run_with_retry("test", &policy, &cancel, |attempt| async move {
                Err(AttemptFailed(attempt))
            })
            .await;

        assert_eq!(result.unwrap_err().attempts(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_before_waiting_returns_last_error() {
        let cancel = CancellationToken::new();
        let policy = RetryPolicy::new(10, Duration::from_millis(200))
            .with_delay(Duration::from_millis(100));

        let result: Result<RetryOutcome<()>, _> =
            run_with_retry("upload", &policy, &cancel, |attempt| async move {
                Err(AttemptFailed(attempt))
            })
            .await;

        let err = result.unwrap_err();
        assert!(err.is_timeout());
        assert!((2..=3).contains(&err.attempts()));
        assert!(err.last_error().is_some());
        assert!(err.to_string().contains("timed out"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_bounds_running_attempt() {
        let cancel = CancellationToken::new();
        let policy = RetryPolicy::new(3, Duration::from_secs(5));

        let result: Result<RetryOutcome<()>, RetryError<AttemptFailed>> =
            run_with_retry("update", &policy, &cancel, |_| async {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Ok(())
            })
            .await;

        let err = result.unwrap_err();
        assert!(err.is_timeout());
        assert_eq!(err.attempts(), 1);
        assert!(err.last_error().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_unbounded_timeout_uses_attempts_only() {
        let cancel = CancellationToken::new();
        let policy = RetryPolicy::new(4, Duration::ZERO).with_delay(Duration::from_secs(3600));

        let result: Result<RetryOutcome<()>, _> =
            run_with_retry("test", &policy, &cancel, |attempt| async move {
                Err(AttemptFailed(attempt))
            })
            .await;

        let err = result.unwrap_err();
        assert!(!err.is_timeout());
        assert_eq!(err.attempts(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_before_start() {
        let cancel = CancellationToken::new();
        cancel.cancel("shutting down");
        let mut calls = 0;

        let result: Result<RetryOutcome<()>, RetryError<AttemptFailed>> =
            run_with_retry("test", &quick_policy(3), &cancel, |_| {
                calls += 1;
                async { Ok(()) }
            })
            .await;

        let err = result.unwrap_err();
        assert!(err.is_cancelled());
        assert_eq!(err.attempts(), 0);
        assert_eq!(calls, 0);
        assert!(err.to_string().contains("shutting down"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_during_delay() {
        let cancel = Arc::new(CancellationToken::new());
        let policy = RetryPolicy::new(5, Duration::ZERO).with_delay(Duration::from_secs(60));
        let _deadline = cancel.cancel_after(Duration::from_secs(10));

        let result: Result<RetryOutcome<()>, _> =
            run_with_retry("test", &policy, &cancel, |attempt| async move {
                Err(AttemptFailed(attempt))
            })
            .await;

        let err = result.unwrap_err();
        assert!(err.is_cancelled());
        assert_eq!(err.attempts(), 1);
    }
}
